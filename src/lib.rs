pub mod auth;
pub mod comments;
pub mod config;
pub mod core;
pub mod likes;
pub mod models;
pub mod posts;
pub mod router;
pub mod templates;
pub mod users;

#[cfg(not(target_arch = "wasm32"))]
pub mod server;

// === Component entrypoint ===
#[cfg(target_arch = "wasm32")]
#[spin_sdk::http_component]
fn handle(req: spin_sdk::http::Request) -> anyhow::Result<impl spin_sdk::http::IntoResponse> {
    let store = spin_sdk::key_value::Store::open_default()?;
    Ok(router::route(&store, &req))
}
