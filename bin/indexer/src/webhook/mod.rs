//! Push ingestion of contract logs from the Alchemy webhook.
//!
//! The body is authenticated with HMAC-SHA256 before it is parsed. Each log is
//! handed to [`Reconciler::process_log`], the same path the batch indexer uses,
//! and a failing log never stops the rest of the delivery.

mod payload;
mod signature;

pub use payload::{parse_quantity, WebhookActivity, WebhookEvent, WebhookLog, WebhookPayload};
pub use signature::{SignatureVerifier, SIGNATURE_HEADER};

use std::sync::Arc;

use serde::Serialize;

use crate::config::Environment;
use crate::reconciler::{ReconcileOutcome, Reconciler};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookError {
    /// Signature header missing or wrong
    Unauthorized,
    /// Production deployment without a signing key
    MissingSigningKey,
    InvalidPayload(String),
}

impl std::fmt::Display for WebhookError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WebhookError::Unauthorized => write!(f, "Invalid signature"),
            WebhookError::MissingSigningKey => write!(f, "Webhook signing key is not configured"),
            WebhookError::InvalidPayload(msg) => write!(f, "Invalid webhook payload: {}", msg),
        }
    }
}

impl std::error::Error for WebhookError {}

/// Per-delivery tally
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookReport {
    pub logs: usize,
    pub applied: usize,
    pub duplicates: usize,
    pub ignored: usize,
    pub failed: usize,
}

pub struct WebhookIngress {
    reconciler: Arc<Reconciler>,
    verifier: Option<SignatureVerifier>,
    environment: Environment,
}

impl WebhookIngress {
    pub fn new(reconciler: Arc<Reconciler>, signing_key: Option<String>, environment: Environment) -> Self {
        Self {
            reconciler,
            verifier: signing_key.filter(|k| !k.is_empty()).map(SignatureVerifier::new),
            environment,
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.reconciler.chain_id()
    }

    /// Authenticate `body` against the signature header value.
    pub fn authenticate(&self, body: &[u8], signature: Option<&str>) -> Result<(), WebhookError> {
        match &self.verifier {
            Some(verifier) => match signature {
                Some(sig) if verifier.verify(body, sig) => Ok(()),
                _ => Err(WebhookError::Unauthorized),
            },
            None if self.environment.is_production() => Err(WebhookError::MissingSigningKey),
            None => {
                tracing::warn!("Webhook signing key not set, skipping signature verification");
                Ok(())
            }
        }
    }

    /// Authenticate, parse and reconcile one delivery.
    pub async fn handle(&self, body: &[u8], signature: Option<&str>) -> Result<WebhookReport, WebhookError> {
        self.authenticate(body, signature)?;

        let payload = WebhookPayload::from_slice(body).map_err(|e| WebhookError::InvalidPayload(e.to_string()))?;

        tracing::info!(
            id = payload.id.as_deref().unwrap_or("-"),
            kind = payload.kind.as_deref().unwrap_or("-"),
            activity = payload.event.activity.len(),
            "📩 Received webhook"
        );

        let mut report = WebhookReport::default();
        let mut raws = Vec::new();
        for log in payload.logs() {
            report.logs += 1;
            let log = match log {
                Ok(log) => log,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping malformed webhook activity");
                    report.failed += 1;
                    continue;
                }
            };
            if log.removed {
                tracing::debug!(tx_hash = %log.transaction_hash, "Skipping removed log");
                report.ignored += 1;
                continue;
            }
            match log.to_raw_log() {
                Ok(raw) => raws.push(raw),
                Err(e) => {
                    tracing::warn!(tx_hash = %log.transaction_hash, error = %e, "Skipping malformed log");
                    report.failed += 1;
                }
            }
        }

        // Deliveries are not guaranteed to be in log order
        raws.sort_by_key(|raw| (raw.address, raw.block_number, raw.log_index));

        for raw in &raws {
            match self.reconciler.process_log(raw).await {
                Ok(ReconcileOutcome::Applied { .. }) => report.applied += 1,
                Ok(ReconcileOutcome::Duplicate) => report.duplicates += 1,
                Ok(ReconcileOutcome::UnknownGroup | ReconcileOutcome::Ignored) => report.ignored += 1,
                Err(e) => {
                    tracing::error!(
                        tx_hash = %raw.tx_hash,
                        log_index = raw.log_index,
                        error = %e,
                        "Error processing webhook activity"
                    );
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            logs = report.logs,
            applied = report.applied,
            duplicates = report.duplicates,
            failed = report.failed,
            "Webhook processed"
        );
        Ok(report)
    }
}
