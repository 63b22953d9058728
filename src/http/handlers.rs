//! Route handlers.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::attestation::AttestationClaim;
use crate::http::request::RequestId;
use crate::http::response::ApiError;
use crate::http::server::AppState;
use crate::observability::metrics;
use crate::payments::ledger::LedgerSummary;
use crate::payments::types::{parse_tx_hash, PaymentProof};
use crate::relay::{AccessOutcome, ContentView, DeliveredContent, IssuedAttestation};

pub const X_ATTESTATION: &str = "x-attestation";
pub const X_PAYMENT: &str = "x-payment";
pub const X_BUYER_ADDRESS: &str = "x-buyer-address";

/// Upper bound on the node probe in `/health`.
const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

type HandlerResult<T> = Result<T, ApiError>;

#[derive(Debug, Default, Deserialize)]
pub struct ProofQuery {
    pub attestation: Option<String>,
    #[serde(rename = "txHash")]
    pub tx_hash: Option<String>,
}

#[derive(Serialize)]
pub struct GrantedBody {
    pub success: bool,
    pub content: ContentView,
    pub payment: AttestationClaim,
}

/// `GET /api/content/{contentId}/x402`
pub async fn get_content_x402(
    State(state): State<AppState>,
    Path(content_id): Path<String>,
    request_id: RequestId,
    headers: HeaderMap,
    Query(query): Query<ProofQuery>,
) -> HandlerResult<Response> {
    let rid = request_id.as_deref();
    let proof = extract_proof(&headers, query).map_err(|e| e.with_request_id(rid))?;

    let outcome = state
        .relay
        .access(&content_id, proof)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(rid))?;

    match outcome {
        AccessOutcome::PaymentRequired(body) => Ok((StatusCode::PAYMENT_REQUIRED, Json(body)).into_response()),
        AccessOutcome::Granted(granted) => {
            let mut response = Json(GrantedBody {
                success: true,
                content: granted.content,
                payment: granted.claim,
            })
            .into_response();
            if let Ok(value) = HeaderValue::from_str(&granted.token) {
                response.headers_mut().insert(X_ATTESTATION, value);
            }
            Ok(response)
        }
    }
}

fn extract_proof(headers: &HeaderMap, query: ProofQuery) -> HandlerResult<Option<PaymentProof>> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    if let Some(token) = header(X_ATTESTATION).or(query.attestation.filter(|t| !t.trim().is_empty())) {
        return Ok(Some(PaymentProof::Attestation(token)));
    }
    match header(X_PAYMENT).or(query.tx_hash.filter(|h| !h.trim().is_empty())) {
        Some(raw) => parse_tx_hash(&raw)
            .map(|hash| Some(PaymentProof::Transaction(hash)))
            .ok_or_else(|| ApiError::bad_request(format!("Invalid transaction hash '{}'", raw))),
        None => Ok(None),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationRequest {
    pub tx_hash: Option<String>,
    pub content_id: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentBreakdown {
    pub total: String,
    pub platform_fee: String,
    pub merchant_amount: String,
    pub merchant_address: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationBody {
    pub success: bool,
    pub attestation: String,
    pub tx_hash: String,
    pub content_id: String,
    pub payment: PaymentBreakdown,
    pub from: String,
    pub confirmations: u32,
    pub expires_at: u64,
}

impl From<IssuedAttestation> for AttestationBody {
    fn from(issued: IssuedAttestation) -> Self {
        let claim = issued.claim;
        Self {
            success: true,
            attestation: issued.token,
            tx_hash: claim.tx_hash,
            content_id: claim.content_id,
            payment: PaymentBreakdown {
                total: claim.amount,
                platform_fee: claim.platform_fee,
                merchant_amount: claim.merchant_amount,
                merchant_address: claim.merchant_address,
            },
            from: claim.from,
            confirmations: issued.confirmations,
            expires_at: claim.exp,
        }
    }
}

/// `POST /api/relayer/attestation`
pub async fn post_attestation(
    State(state): State<AppState>,
    request_id: RequestId,
    body: Result<Json<AttestationRequest>, JsonRejection>,
) -> HandlerResult<Json<AttestationBody>> {
    let rid = request_id.as_deref();
    let Json(body) = body.map_err(|e| ApiError::bad_request(e.body_text()).with_request_id(rid))?;

    let raw_hash = body
        .tx_hash
        .filter(|h| !h.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("Missing transaction hash").with_request_id(rid))?;
    let content_id = body
        .content_id
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("Missing content ID").with_request_id(rid))?;
    let tx_hash = parse_tx_hash(&raw_hash).ok_or_else(|| {
        ApiError::bad_request(format!("Invalid transaction hash '{}'", raw_hash)).with_request_id(rid)
    })?;

    tracing::info!(request_id = ?rid, tx_hash = %tx_hash, content_id = %content_id, "Attestation requested");
    let issued = state
        .relay
        .attest_transaction(&content_id, tx_hash)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(rid))?;
    Ok(Json(AttestationBody::from(issued)))
}

/// `GET /api/relayer/attestation/{txHash}`
pub async fn get_attestation(
    State(state): State<AppState>,
    Path(raw_hash): Path<String>,
    request_id: RequestId,
) -> HandlerResult<Json<AttestationBody>> {
    let rid = request_id.as_deref();
    let tx_hash = parse_tx_hash(&raw_hash).ok_or_else(|| {
        ApiError::bad_request(format!("Invalid transaction hash '{}'", raw_hash)).with_request_id(rid)
    })?;
    state
        .relay
        .attestation_for(&tx_hash)
        .map(|issued| Json(AttestationBody::from(issued)))
        .ok_or_else(|| ApiError::from(crate::relay::RelayError::AttestationNotFound(tx_hash)).with_request_id(rid))
}

#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    #[serde(rename = "buyerAddress")]
    pub buyer_address: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HasPaidBody {
    pub success: bool,
    pub has_paid: bool,
}

/// `GET /api/content/{contentId}/verify?buyerAddress=`
pub async fn verify_access(
    State(state): State<AppState>,
    Path(content_id): Path<String>,
    request_id: RequestId,
    Query(query): Query<VerifyQuery>,
) -> HandlerResult<Json<HasPaidBody>> {
    let rid = request_id.as_deref();
    let buyer = query
        .buyer_address
        .filter(|b| !b.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("Buyer address required").with_request_id(rid))?;
    let has_paid = state
        .relay
        .has_paid(&content_id, &buyer)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(rid))?;
    Ok(Json(HasPaidBody {
        success: true,
        has_paid,
    }))
}

#[derive(Serialize)]
pub struct DeliveryBody {
    pub success: bool,
    pub content: DeliveredContent,
}

/// `GET /api/content/{contentId}/deliver`
pub async fn deliver_content(
    State(state): State<AppState>,
    Path(content_id): Path<String>,
    request_id: RequestId,
    headers: HeaderMap,
) -> HandlerResult<Json<DeliveryBody>> {
    let rid = request_id.as_deref();
    let buyer = headers
        .get(X_BUYER_ADDRESS)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .ok_or_else(|| ApiError::bad_request("Buyer address required").with_request_id(rid))?;
    let content = state
        .relay
        .deliver(&content_id, buyer)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(rid))?;
    Ok(Json(DeliveryBody { success: true, content }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthBody {
    pub status: &'static str,
    pub version: &'static str,
    pub network: String,
    pub relayer: String,
    pub chain_healthy: bool,
    pub block_number: Option<u64>,
    pub forwarding_enabled: bool,
    pub forwards: LedgerSummary,
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthBody>) {
    let block_number = match tokio::time::timeout(HEALTH_PROBE_TIMEOUT, state.chain.block_number()).await {
        Ok(Ok(height)) => Some(height),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Health probe: node error");
            None
        }
        Err(_) => {
            tracing::warn!("Health probe: node timed out");
            None
        }
    };
    let chain_healthy = block_number.is_some();
    metrics::record_chain_health(chain_healthy);

    let body = HealthBody {
        status: if chain_healthy { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        network: state.relay.network().to_string(),
        relayer: state.relay.relayer().to_string().to_lowercase(),
        chain_healthy,
        block_number,
        forwarding_enabled: state.relay.forwarding_enabled(),
        forwards: state.relay.forward_summary(),
    };
    let status = if chain_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}
