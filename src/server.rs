//! Native runner: actix-web in front of the same router the Spin component
//! uses, backed by SQLite.

use std::sync::Arc;

use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
use tracing::info;
use tracing_actix_web::TracingLogger;

use crate::config::{bind_addr, db_path};
use crate::core::store::{KvStore, SqliteStore};
use crate::router;

pub type SharedStore = dyn KvStore + Send + Sync;

mod adapter {
    use actix_web::HttpRequest;
    use spin_sdk::http::{Method, Request, Response};

    pub fn actix_to_spin_request(req: &HttpRequest, body: actix_web::web::Bytes) -> Request {
        let method = match req.method().as_str() {
            "GET" => Method::Get,
            "POST" => Method::Post,
            "PUT" => Method::Put,
            "DELETE" => Method::Delete,
            "HEAD" => Method::Head,
            "OPTIONS" => Method::Options,
            "PATCH" => Method::Patch,
            _ => Method::Get,
        };

        let mut builder = Request::builder();
        builder.method(method).uri(req.uri().to_string());
        for (name, value) in req.headers() {
            if let Ok(val_str) = value.to_str() {
                builder.header(name.as_str(), val_str);
            }
        }
        builder.body(body.to_vec()).build()
    }

    pub fn spin_to_actix_response(spin_resp: Response) -> actix_web::HttpResponse {
        let status = *spin_resp.status();
        let mut response = actix_web::HttpResponse::build(
            actix_web::http::StatusCode::from_u16(status)
                .unwrap_or(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR),
        );

        for (name, value) in spin_resp.headers() {
            if let Some(value) = value.as_str() {
                response.append_header((name, value));
            }
        }

        response.body(spin_resp.body().to_vec())
    }
}

pub async fn handle_all(req: HttpRequest, body: web::Bytes, store: web::Data<SharedStore>) -> HttpResponse {
    let spin_req = adapter::actix_to_spin_request(&req, body);
    let kv: &SharedStore = store.get_ref();
    adapter::spin_to_actix_response(router::route(kv, &spin_req))
}

pub fn shared_store(store: Arc<SharedStore>) -> web::Data<SharedStore> {
    web::Data::from(store)
}

pub async fn run() -> anyhow::Result<()> {
    let addr = bind_addr();
    let path = db_path();
    let store = shared_store(Arc::new(SqliteStore::open(&path)?));

    info!(%addr, db = %path, "server listening");

    HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .app_data(store.clone())
            .default_service(web::route().to(handle_all))
    })
    .bind(&addr)?
    .run()
    .await?;

    Ok(())
}
