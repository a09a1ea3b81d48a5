//! Route table and request boundary.
//!
//! Every route names its guard at registration: [`Handler::Public`] runs for
//! anyone, [`Handler::Authenticated`] only after the actor has been resolved,
//! and receives that actor explicitly.

use spin_sdk::http::{Request, Response};
use tracing::{debug, error, warn};

use crate::auth::{require_actor, RequestContext};
use crate::core::errors::AppError;
use crate::core::reply::Reply;
use crate::core::static_server::serve_static;
use crate::core::store::KvStore;
use crate::models::models::{FlashLevel, User};
use crate::templates;
use crate::{comments, likes, posts, users};

pub type PublicFn = fn(&mut RequestContext, &Request, &PathParams) -> Result<Reply, AppError>;
pub type AuthenticatedFn = fn(&mut RequestContext, &User, &Request, &PathParams) -> Result<Reply, AppError>;

#[derive(Clone, Copy)]
pub enum Handler {
    Public(PublicFn),
    Authenticated(AuthenticatedFn),
}

pub struct Route {
    pub method: &'static str,
    pub pattern: &'static str,
    pub handler: Handler,
}

const fn public(method: &'static str, pattern: &'static str, f: PublicFn) -> Route {
    Route { method, pattern, handler: Handler::Public(f) }
}

const fn authenticated(method: &'static str, pattern: &'static str, f: AuthenticatedFn) -> Route {
    Route { method, pattern, handler: Handler::Authenticated(f) }
}

/// First match wins, so fixed paths go before `{id}` patterns.
pub static ROUTES: &[Route] = &[
    public("GET", "/", posts::home),
    public("GET", "/home", posts::home),
    public("GET", "/register", users::register_form),
    public("POST", "/register", users::register),
    public("GET", "/login", users::login_form),
    public("POST", "/login", users::login),
    public("GET", "/logout", users::logout),
    authenticated("GET", "/profile", users::profile),
    authenticated("GET", "/post/new", posts::new_post_form),
    authenticated("POST", "/post/new", posts::create_post),
    authenticated("GET", "/post/{id}/edit", posts::edit_post_form),
    authenticated("POST", "/post/{id}/edit", posts::update_post),
    authenticated("POST", "/post/{id}/delete", posts::delete_post),
    authenticated("POST", "/post/{id}/comment", comments::add_comment),
    authenticated("POST", "/post/{id}/like", likes::toggle_like),
    public("GET", "/post/{id}", posts::view_post),
];

#[derive(Debug, Default, PartialEq)]
pub struct PathParams {
    id: Option<String>,
}

impl PathParams {
    pub fn id(&self) -> Result<&str, AppError> {
        self.id.as_deref().ok_or_else(AppError::post_not_found)
    }
}

fn match_path(pattern: &str, path: &str) -> Option<PathParams> {
    let path = if path.len() > 1 { path.trim_end_matches('/') } else { path };
    let mut params = PathParams::default();
    let mut pattern_segments = pattern.split('/');
    let mut path_segments = path.split('/');

    loop {
        match (pattern_segments.next(), path_segments.next()) {
            (None, None) => return Some(params),
            (Some("{id}"), Some(segment)) if !segment.is_empty() => {
                params.id = Some(segment.to_string());
            }
            (Some(expected), Some(segment)) if expected == segment => {}
            _ => return None,
        }
    }
}

enum Lookup {
    Found(&'static Route, PathParams),
    WrongMethod,
    Missing,
}

fn lookup(method: &str, path: &str) -> Lookup {
    let mut path_known = false;
    for route in ROUTES {
        if let Some(params) = match_path(route.pattern, path) {
            if route.method == method {
                return Lookup::Found(route, params);
            }
            path_known = true;
        }
    }
    if path_known {
        Lookup::WrongMethod
    } else {
        Lookup::Missing
    }
}

fn dispatch(ctx: &mut RequestContext, req: &Request, method: &str, path: &str) -> Result<Reply, AppError> {
    match lookup(method, path) {
        Lookup::Found(route, params) => match route.handler {
            Handler::Public(f) => f(ctx, req, &params),
            Handler::Authenticated(f) => match require_actor(ctx) {
                Ok(actor) => f(ctx, &actor, req, &params),
                Err(redirect) => Ok(redirect),
            },
        },
        Lookup::WrongMethod => Err(AppError::MethodNotAllowed),
        Lookup::Missing => Err(AppError::NotFound("Page not found".to_string())),
    }
}

/// Turns an error into what the actor sees.
fn recover(ctx: &mut RequestContext, err: AppError) -> Reply {
    let status = err.status();
    let message = match err {
        AppError::Authorization(message) => {
            warn!(user_id = ?ctx.actor.as_ref().map(|a| a.id.as_str()), %message, "modification refused");
            ctx.flash(FlashLevel::Danger, message);
            return Reply::redirect("/");
        }
        AppError::Internal(e) => {
            error!(error = %e, "request failed");
            "Something went wrong on our side.".to_string()
        }
        other => other.to_string(),
    };

    templates::error_page(ctx, status, &message).unwrap_or_else(|e| {
        error!(error = %e, "error page failed to render");
        Reply::page_with_status(status, message)
    })
}

fn internal_error() -> Response {
    Response::builder()
        .status(500)
        .header("content-type", "text/plain; charset=utf-8")
        .body("Internal server error")
        .build()
}

/// Serve one request against the given store. Never fails: every error is
/// rendered into a response here.
pub fn route(kv: &dyn KvStore, req: &Request) -> Response {
    let method = req.method().to_string().to_uppercase();
    let path = req.path().to_string();
    debug!(%method, %path, "request");

    if method == "GET" && path.starts_with("/static/") {
        let reply = serve_static(&path).unwrap_or_else(|| Reply::page_with_status(404, "Not found".to_string()));
        return reply.into_response(None);
    }

    let mut ctx = match RequestContext::load(kv, req) {
        Ok(ctx) => ctx,
        Err(e) => {
            error!(error = %e, "could not load request context");
            return internal_error();
        }
    };

    let reply = match dispatch(&mut ctx, req, &method, &path) {
        Ok(reply) => reply,
        Err(err) => recover(&mut ctx, err),
    };
    debug!(%method, %path, status = reply.status(), "response");

    ctx.finish(reply).unwrap_or_else(|e| {
        error!(error = %e, "could not persist session");
        internal_error()
    })
}
