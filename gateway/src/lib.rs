//! Server-side proxy between the dashboard front end and the build farm.
//!
//! Every API call loads the caller's session, rebuilds its credential state,
//! performs one operation and writes the session back as a cookie.

pub mod api;
pub mod config;
pub mod errors;
pub mod state;

use shared::admin_service::AdminService;
use shared::http::run_http_service;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpListener;

pub use errors::{GatewayError, Result};
pub use state::AppState;

pub async fn run(config: config::Config) -> Result<()> {
    let state = AppState::from_config(&config)?;
    tracing::info!(
        servers = ?state.registry().names().collect::<Vec<_>>(),
        default = %state.registry().default_server().name,
        "starting gateway"
    );

    let config::Config {
        listener,
        admin_listener,
        ..
    } = config;
    let ready = Arc::new(AtomicBool::new(false));

    let api_ready = ready.clone();
    let api_task = async move {
        let addr = format!("{}:{}", listener.host, listener.port);
        let listener = TcpListener::bind(&addr).await?;
        tracing::info!(%addr, "api listening");
        api_ready.store(true, Ordering::Release);
        axum::serve(listener, api::router(state)).await?;
        Ok::<_, GatewayError>(())
    };

    let admin_task = async move {
        let admin = AdminService::new(move || ready.load(Ordering::Acquire));
        run_http_service(&admin_listener.host, admin_listener.port, admin).await?;
        Ok::<_, GatewayError>(())
    };

    tokio::try_join!(api_task, admin_task)?;
    Ok(())
}
