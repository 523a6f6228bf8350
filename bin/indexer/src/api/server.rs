use super::routes::{
    alchemy_webhook, get_group, health, index_groups, list_activity, list_groups, list_members, onchain_state, quote,
    webhook_health, AppState,
};
use axum::{routing::get, Router};
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;

/// All HTTP routes bound to `state`
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhooks/alchemy", get(webhook_health).post(alchemy_webhook))
        .route("/cron/index-groups", get(index_groups).post(index_groups))
        .route("/groups", get(list_groups))
        .route("/groups/{address}", get(get_group))
        .route("/groups/{address}/members", get(list_members))
        .route("/groups/{address}/activity", get(list_activity))
        .route("/groups/{address}/quote", get(quote))
        .route("/groups/{address}/onchain", get(onchain_state))
        .with_state(state)
}

pub struct ApiServer {
    state: AppState,
    addr: SocketAddr,
    cancel_token: CancellationToken,
}

impl ApiServer {
    pub fn new(state: AppState, addr: SocketAddr) -> Self {
        Self {
            state,
            addr,
            cancel_token: CancellationToken::new(),
        }
    }

    pub fn with_cancel_token(mut self, cancel_token: CancellationToken) -> Self {
        self.cancel_token = cancel_token;
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub async fn start(self) -> eyre::Result<()> {
        let app = router(self.state);

        tracing::info!("API server listening on {}", self.addr);

        let listener = tokio::net::TcpListener::bind(&self.addr).await?;

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                self.cancel_token.cancelled().await;
            })
            .await?;

        tracing::info!("API server stopped");
        Ok(())
    }
}
