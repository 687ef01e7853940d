pub mod auth;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod matchmaking;
pub mod observability;
pub mod presence;
pub mod routes;
pub mod state;
pub mod switchboard;
pub mod validation;

use dashmap::DashMap;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::config::ServerConfig;
use crate::dispatcher::Dispatcher;
use crate::error::ServerError;
use crate::state::{AppState, PeerMap};
use crate::switchboard::Switchboard;

pub async fn serve(config: ServerConfig) -> Result<(), ServerError> {
    let addr = config.bind_addr;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;
    serve_on(listener, config).await
}

/// Runs the signaling server on an already bound listener.
pub async fn serve_on(listener: TcpListener, config: ServerConfig) -> Result<(), ServerError> {
    let peers: PeerMap = Arc::new(DashMap::new());
    let (dispatcher, _loop_handle) =
        Dispatcher::spawn(Switchboard::new(config.response_timeout), peers.clone());
    let state = AppState::new(peers, dispatcher, config);

    tracing::info!(
        component = "bootstrap",
        addr = %listener.local_addr()?,
        response_timeout_secs = state.config.response_timeout.map(|t| t.as_secs()),
        auth = state.config.jwt_secret.is_some(),
        "signaling server listening"
    );
    axum::serve(listener, routes::app(state)).await?;
    Ok(())
}
