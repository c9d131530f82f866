pub mod auth;
pub mod comments;
pub mod config;
pub mod context;
pub mod core;
pub mod media;
pub mod models;
pub mod posts;
pub mod router;
pub mod telemetry;
pub mod users;

#[cfg(not(target_arch = "wasm32"))]
pub mod server;

// === Component entrypoint ===
#[cfg(target_arch = "wasm32")]
#[spin_sdk::http_component]
fn handle(req: spin_sdk::http::Request) -> anyhow::Result<impl spin_sdk::http::IntoResponse> {
    telemetry::init();
    let ctx = context::SpinContext::open_default(config::Config::from_env())?;
    Ok(router::route(&ctx, req))
}
