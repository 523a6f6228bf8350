use std::str::FromStr;
use std::sync::Arc;

use alloy_primitives::Address;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    Json,
};
use chain_reader::ChainRegistry;
use chrono::Utc;
use common::amount::Amount;
use common::bonding_curve::{CurveParams, CurveState};

use super::types::{
    CronResponse, ErrorResponse, HealthResponse, ListQuery, OnchainResponse, QuoteQuery, QuoteResponse, QuoteSide,
    WebhookResponse,
};
use crate::batch::BatchIndexer;
use crate::config::Environment;
use crate::store::{Activity, Group, Member, Store};
use crate::webhook::{WebhookError, WebhookIngress, SIGNATURE_HEADER};

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 500;

pub type ApiError = (StatusCode, Json<ErrorResponse>);

/// Handles shared by every request
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub registry: Arc<ChainRegistry>,
    pub default_chain_id: u64,
    pub curve: CurveParams,
    pub webhook: Arc<WebhookIngress>,
    pub batch: Arc<BatchIndexer>,
    pub cron_secret: Option<String>,
    pub environment: Environment,
}

fn api_error(status: StatusCode, error: impl Into<String>) -> ApiError {
    (status, Json(ErrorResponse { error: error.into() }))
}

fn internal_error(error: impl std::fmt::Display) -> ApiError {
    tracing::error!(%error, "Request failed");
    api_error(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
}

fn list_limit(query: &ListQuery) -> usize {
    query.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)
}

async fn find_group(state: &AppState, address: &str) -> Result<Group, ApiError> {
    let contract = Address::from_str(address)
        .map_err(|_| api_error(StatusCode::BAD_REQUEST, format!("Invalid contract address: {}", address)))?;
    state
        .store
        .find_group_by_contract(contract)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("Group not found: {}", contract)))
}

/// Liveness
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: Utc::now(),
        chain_id: state.default_chain_id,
    })
}

/// `GET /webhooks/alchemy`
pub async fn webhook_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: Utc::now(),
        chain_id: state.webhook.chain_id(),
    })
}

/// `POST /webhooks/alchemy`
pub async fn alchemy_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, ApiError> {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());

    match state.webhook.handle(&body, signature).await {
        Ok(report) => Ok(Json(WebhookResponse { success: true, report })),
        Err(WebhookError::Unauthorized) => {
            tracing::warn!("Rejected webhook with invalid signature");
            Err(api_error(StatusCode::UNAUTHORIZED, WebhookError::Unauthorized.to_string()))
        }
        Err(e @ WebhookError::InvalidPayload(_)) => {
            tracing::warn!(error = %e, "Rejected malformed webhook");
            Err(api_error(StatusCode::BAD_REQUEST, e.to_string()))
        }
        Err(e @ WebhookError::MissingSigningKey) => Err(internal_error(e)),
    }
}

fn authorize_cron(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    match &state.cron_secret {
        Some(secret) => {
            let expected = format!("Bearer {}", secret);
            let provided = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
            if provided == Some(expected.as_str()) {
                Ok(())
            } else {
                Err(api_error(StatusCode::UNAUTHORIZED, "Unauthorized"))
            }
        }
        None if state.environment.is_production() => Err(internal_error("Cron secret is not configured")),
        None => {
            tracing::warn!("CRON_SECRET not set, allowing request");
            Ok(())
        }
    }
}

/// `GET|POST /cron/index-groups`
pub async fn index_groups(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<CronResponse>, ApiError> {
    authorize_cron(&state, &headers)?;

    let report = state.batch.run_once().await.map_err(internal_error)?;

    Ok(Json(CronResponse {
        success: true,
        current_block: report.current_block,
        groups_processed: report.results.len(),
        results: report.results,
        timestamp: report.finished_at,
    }))
}

/// `GET /groups`, largest market cap first
pub async fn list_groups(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Group>>, ApiError> {
    let groups = state.store.list_groups(list_limit(&query)).await.map_err(internal_error)?;
    Ok(Json(groups))
}

pub async fn get_group(State(state): State<AppState>, Path(address): Path<String>) -> Result<Json<Group>, ApiError> {
    Ok(Json(find_group(&state, &address).await?))
}

pub async fn list_members(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<Vec<Member>>, ApiError> {
    let group = find_group(&state, &address).await?;
    let members = state.store.list_members(group.id).await.map_err(internal_error)?;
    Ok(Json(members))
}

/// Newest first
pub async fn list_activity(
    State(state): State<AppState>,
    Path(address): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Activity>>, ApiError> {
    let group = find_group(&state, &address).await?;
    let activity = state
        .store
        .list_activity(group.id, list_limit(&query))
        .await
        .map_err(internal_error)?;
    Ok(Json(activity))
}

/// Curve estimate against the indexed price and supply
pub async fn quote(
    State(state): State<AppState>,
    Path(address): Path<String>,
    Query(query): Query<QuoteQuery>,
) -> Result<Json<QuoteResponse>, ApiError> {
    let group = find_group(&state, &address).await?;
    let amount = Amount::from_str(&query.amount)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("Invalid amount: {}", e)))?;
    let curve_state = CurveState {
        price: group.token_price,
        supply: group.total_supply,
    };
    let bad_quote = |e: common::bonding_curve::CurveError| api_error(StatusCode::BAD_REQUEST, e.to_string());

    let response = match query.side {
        QuoteSide::Buy => {
            let q = state.curve.apply_purchase(curve_state, amount).map_err(bad_quote)?;
            QuoteResponse {
                group_id: group.id,
                side: QuoteSide::Buy,
                amount_in: q.eth_in,
                amount_out: q.tokens_out,
                fee: q.fee,
                average_price: q.average_price,
                current_price: group.token_price,
                new_price: q.new_price,
                clipped: false,
            }
        }
        QuoteSide::Sell => {
            let q = state.curve.apply_sale(curve_state, amount).map_err(bad_quote)?;
            QuoteResponse {
                group_id: group.id,
                side: QuoteSide::Sell,
                amount_in: q.tokens_in,
                amount_out: q.eth_out,
                fee: Amount::ZERO,
                average_price: q.average_price,
                current_price: group.token_price,
                new_price: q.new_price,
                clipped: q.clipped,
            }
        }
    };
    Ok(Json(response))
}

/// Live contract state, bypassing the read model
pub async fn onchain_state(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<OnchainResponse>, ApiError> {
    let group = find_group(&state, &address).await?;
    let reader = state
        .registry
        .get(group.chain_id)
        .map_err(|e| api_error(StatusCode::SERVICE_UNAVAILABLE, e.to_string()))?;
    let chain_state = reader.group_state(group.contract_address).await.map_err(|e| {
        tracing::warn!(group_id = %group.id, error = %e, "On-chain read failed");
        api_error(StatusCode::BAD_GATEWAY, e.to_string())
    })?;

    Ok(Json(OnchainResponse {
        group_id: group.id,
        chain_id: group.chain_id,
        contract_address: group.contract_address,
        state: chain_state,
    }))
}
