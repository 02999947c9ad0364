pub use crate::common::RouteResult;

use std::sync::Arc;

use axum::Router;
use gateway::core::Core;
use tokio::net::TcpListener;
use tower_cookies::CookieManagerLayer;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod common;

#[derive(Clone)]
pub struct WebState {
    pub core: Arc<Core>,
}

pub async fn start_web_server(state: WebState) -> std::io::Result<()> {
    let bind_addr = state.core.config.bind_addr.clone();
    let routes: Router = api::router(state)
        .layer(CookieManagerLayer::new())
        .layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(&bind_addr).await?;
    log::info!("[web] listening on {bind_addr}");
    axum::serve(listener, routes.into_make_service()).await?;

    Ok(())
}
