use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const ATTESTATION_HEADER: &str = "X-Attestation";
const PAYMENT_HEADER: &str = "X-Payment";
const BUYER_HEADER: &str = "X-Buyer-Address";

#[derive(Debug)]
pub enum SdkError {
    Http(reqwest::Error),
    /// The relay answered with its error envelope.
    Api {
        status: u16,
        code: String,
        message: String,
        retryable: bool,
        details: Option<Value>,
    },
    Decode(String),
}

impl SdkError {
    /// Machine-readable code for relay errors.
    pub fn code(&self) -> Option<&str> {
        match self {
            SdkError::Api { code, .. } => Some(code),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            SdkError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl std::fmt::Display for SdkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SdkError::Http(e) => write!(f, "HTTP error: {}", e),
            SdkError::Api {
                status, code, message, ..
            } => write!(f, "Relay returned {} {}: {}", status, code, message),
            SdkError::Decode(e) => write!(f, "Unexpected response body: {}", e),
        }
    }
}

impl std::error::Error for SdkError {}

impl From<reqwest::Error> for SdkError {
    fn from(err: reqwest::Error) -> Self {
        SdkError::Http(err)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirement {
    pub scheme: String,
    pub network: String,
    pub amount: String,
    pub pay_to: String,
    pub resource: String,
    pub description: String,
    pub content_id: String,
}

/// Body of a 402 answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentChallenge {
    pub x402_version: u32,
    pub error: String,
    pub payment_required: PaymentRequirement,
}

/// Unlocked content plus the attestation that unlocked it.
#[derive(Debug, Clone)]
pub struct ContentGrant {
    pub content: Value,
    pub payment: Value,
    /// Token echoed in the `X-Attestation` response header.
    pub attestation: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AccessResponse {
    PaymentRequired(PaymentChallenge),
    Granted(ContentGrant),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentBreakdown {
    pub total: String,
    pub platform_fee: String,
    pub merchant_amount: String,
    pub merchant_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attestation {
    pub success: bool,
    pub attestation: String,
    pub tx_hash: String,
    pub content_id: String,
    pub payment: PaymentBreakdown,
    pub from: String,
    pub confirmations: u32,
    pub expires_at: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GrantedBody {
    content: Value,
    payment: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HasPaidBody {
    has_paid: bool,
}

#[derive(Deserialize)]
struct DeliveryBody {
    content: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_code: String,
    #[serde(default)]
    retryable: bool,
    details: Option<Value>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AttestationRequest<'a> {
    tx_hash: &'a str,
    content_id: &'a str,
}

pub struct RelayClient {
    client: Client,
    relay_url: String,
}

impl RelayClient {
    pub fn new(relay_url: &str) -> Self {
        Self::with_client(Client::new(), relay_url)
    }

    pub fn with_client(client: Client, relay_url: &str) -> Self {
        Self {
            client,
            relay_url: relay_url.trim_end_matches('/').to_string(),
        }
    }

    fn content_url(&self, content_id: &str, action: &str) -> String {
        format!("{}/api/content/{}/{}", self.relay_url, content_id, action)
    }

    /// Request content without proof; expect a challenge back.
    pub async fn challenge(&self, content_id: &str) -> Result<AccessResponse, SdkError> {
        let resp = self.client.get(self.content_url(content_id, "x402")).send().await?;
        access_response(resp).await
    }

    /// Request content presenting the payment transaction hash.
    pub async fn fetch_with_payment(&self, content_id: &str, tx_hash: &str) -> Result<AccessResponse, SdkError> {
        let resp = self
            .client
            .get(self.content_url(content_id, "x402"))
            .header(PAYMENT_HEADER, tx_hash)
            .send()
            .await?;
        access_response(resp).await
    }

    /// Request content presenting a previously issued attestation.
    pub async fn fetch_with_attestation(&self, content_id: &str, token: &str) -> Result<AccessResponse, SdkError> {
        let resp = self
            .client
            .get(self.content_url(content_id, "x402"))
            .header(ATTESTATION_HEADER, token)
            .send()
            .await?;
        access_response(resp).await
    }

    /// Exchange a payment transaction for an attestation.
    pub async fn attest(&self, tx_hash: &str, content_id: &str) -> Result<Attestation, SdkError> {
        let resp = self
            .client
            .post(format!("{}/api/relayer/attestation", self.relay_url))
            .json(&AttestationRequest { tx_hash, content_id })
            .send()
            .await?;
        decode(resp).await
    }

    /// Look up an attestation already issued for `tx_hash`.
    pub async fn lookup(&self, tx_hash: &str) -> Result<Attestation, SdkError> {
        let resp = self
            .client
            .get(format!("{}/api/relayer/attestation/{}", self.relay_url, tx_hash))
            .send()
            .await?;
        decode(resp).await
    }

    pub async fn has_paid(&self, content_id: &str, buyer: &str) -> Result<bool, SdkError> {
        let resp = self
            .client
            .get(self.content_url(content_id, "verify"))
            .query(&[("buyerAddress", buyer)])
            .send()
            .await?;
        let body: HasPaidBody = decode(resp).await?;
        Ok(body.has_paid)
    }

    pub async fn deliver(&self, content_id: &str, buyer: &str) -> Result<Value, SdkError> {
        let resp = self
            .client
            .get(self.content_url(content_id, "deliver"))
            .header(BUYER_HEADER, buyer)
            .send()
            .await?;
        let body: DeliveryBody = decode(resp).await?;
        Ok(body.content)
    }

    /// Health document. A degraded relay answers 503 with the same shape.
    pub async fn health(&self) -> Result<(u16, Value), SdkError> {
        let resp = self.client.get(format!("{}/health", self.relay_url)).send().await?;
        let status = resp.status().as_u16();
        let body = resp.json::<Value>().await?;
        Ok((status, body))
    }
}

async fn access_response(resp: Response) -> Result<AccessResponse, SdkError> {
    match resp.status() {
        StatusCode::PAYMENT_REQUIRED => {
            let text = resp.text().await?;
            // A failed proof is also a 402, but with the error envelope.
            match serde_json::from_str::<PaymentChallenge>(&text) {
                Ok(challenge) => Ok(AccessResponse::PaymentRequired(challenge)),
                Err(_) => Err(api_error(402, &text)),
            }
        }
        status if status.is_success() => {
            let attestation = resp
                .headers()
                .get(ATTESTATION_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body: GrantedBody = resp.json().await?;
            Ok(AccessResponse::Granted(ContentGrant {
                content: body.content,
                payment: body.payment,
                attestation,
            }))
        }
        status => {
            let text = resp.text().await?;
            Err(api_error(status.as_u16(), &text))
        }
    }
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, SdkError> {
    let status = resp.status();
    let text = resp.text().await?;

    if !status.is_success() {
        return Err(api_error(status.as_u16(), &text));
    }

    serde_json::from_str::<T>(&text).map_err(|e| SdkError::Decode(e.to_string()))
}

fn api_error(status: u16, text: &str) -> SdkError {
    match serde_json::from_str::<ErrorBody>(text) {
        Ok(body) => SdkError::Api {
            status,
            code: body.error_code,
            message: body.error,
            retryable: body.retryable,
            details: body.details,
        },
        Err(_) => SdkError::Api {
            status,
            code: String::new(),
            message: text.to_string(),
            retryable: false,
            details: None,
        },
    }
}
