use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client as HttpClient, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::credentials::{CredentialCache, GatewayCredential};
use super::models::{
    ApiError, CancelRequest, CancelRequestResponse, CardTokenResponse, CreditPaymentRequest,
    CreditPaymentResponse, DebitPaymentRequest, DebitPaymentResponse, FinalizeDebitRequest,
    GatewayErrorBody, PaymentStatusResponse, SaveCardRequest, SavedCardResponse,
    TokenizeCardRequest, VaultCard, VerifyCardRequest, VerifyCardResponse,
};
use crate::utils::ratelimit::rate_limit_gateway_api;
use crate::utils::retry::{retry_with_backoff, RetryConfig};

/// Calls to the card-payment provider.
///
/// Each method is one network call. Card storage and payment calls create
/// records on the provider side and are never retried here.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// POST /v1/tokens/card
    async fn tokenize_card(&self, request: TokenizeCardRequest) -> Result<CardTokenResponse, ApiError>;

    /// POST /v1/cards/verification
    async fn verify_card(&self, request: VerifyCardRequest) -> Result<VerifyCardResponse, ApiError>;

    /// POST /v1/cards
    async fn save_card(&self, request: SaveCardRequest) -> Result<SavedCardResponse, ApiError>;

    /// GET /v1/cards/{card_id}, retried on transient failures
    async fn get_card(&self, card_id: String) -> Result<VaultCard, ApiError>;

    /// DELETE /v1/cards/{card_id}
    async fn remove_card(&self, card_id: String) -> Result<(), ApiError>;

    /// POST /v1/payments/credit
    async fn authorize_credit(&self, request: CreditPaymentRequest) -> Result<CreditPaymentResponse, ApiError>;

    /// POST /v1/payments/credit/{payment_id}/authenticated/finalize
    async fn finalize_credit(&self, payment_id: String) -> Result<PaymentStatusResponse, ApiError>;

    /// POST /v1/payments/debit
    async fn authorize_debit(&self, request: DebitPaymentRequest) -> Result<DebitPaymentResponse, ApiError>;

    /// POST /v1/payments/debit/{payment_id}/authenticated/finalize
    async fn finalize_debit(
        &self,
        payment_id: String,
        request: FinalizeDebitRequest,
    ) -> Result<PaymentStatusResponse, ApiError>;

    /// POST /v1/payments/credit/{payment_id}/cancel (same day only)
    async fn cancel_payment(&self, payment_id: String) -> Result<PaymentStatusResponse, ApiError>;

    /// POST /v1/payments/cancel/request
    async fn request_cancellation(&self, request: CancelRequest) -> Result<CancelRequestResponse, ApiError>;

    /// GET /v1/payments/cancel/request, retried on transient failures
    async fn cancellation_status(&self, cancel_custom_key: String) -> Result<CancelRequestResponse, ApiError>;
}

/// Getnet API client
pub struct GetnetClient {
    http_client: HttpClient,
    base_url: String,
    seller_id: String,
    credentials: Arc<CredentialCache>,
    retry_config: RetryConfig,
}

impl GetnetClient {
    pub const DEFAULT_BASE_URL: &'static str = "https://api-sandbox.getnet.com.br";

    pub fn new(
        base_url: String,
        seller_id: String,
        credentials: Arc<CredentialCache>,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let http_client = HttpClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::RequestError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            seller_id,
            credentials,
            retry_config: RetryConfig::default(),
        })
    }

    pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    pub fn seller_id(&self) -> &str {
        &self.seller_id
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Headers for authenticated calls
    fn create_headers(&self, credential: &GatewayCredential) -> Result<HeaderMap, ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let auth_value = HeaderValue::from_str(&credential.authorization_value())
            .map_err(|e| ApiError::Credential(format!("Failed to create auth header: {}", e)))?;
        headers.insert(AUTHORIZATION, auth_value);

        let seller_value = HeaderValue::from_str(&self.seller_id)
            .map_err(|e| ApiError::RequestError(format!("Invalid seller id header: {}", e)))?;
        headers.insert("seller_id", seller_value);

        Ok(headers)
    }

    async fn current_credential(&self) -> Result<GatewayCredential, ApiError> {
        self.credentials
            .credential()
            .await
            .map_err(|e| ApiError::Credential(e.to_string()))
    }

    /// Send one authenticated request.
    ///
    /// A 401 means the request was not processed, so it is sent once more
    /// with a refreshed token.
    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<reqwest::Response, ApiError> {
        let mut credential = self.current_credential().await?;
        let mut refreshed = false;

        loop {
            rate_limit_gateway_api().await;

            let headers = self.create_headers(&credential)?;
            let mut request = self.http_client.request(method.clone(), url).headers(headers);
            if let Some(body) = body {
                request = request.json(body);
            }

            debug!(%method, url, "Gateway request");
            let response = request.send().await.map_err(request_error)?;
            let status = response.status();

            if status == StatusCode::UNAUTHORIZED && !refreshed {
                warn!("Gateway rejected the access token, logging in again");
                credential = self
                    .credentials
                    .force_refresh(&credential)
                    .await
                    .map_err(|e| ApiError::Credential(e.to_string()))?;
                refreshed = true;
                continue;
            }

            if !status.is_success() {
                return Err(handle_error_response(status, response).await);
            }

            return Ok(response);
        }
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<T, ApiError> {
        self.send(method, url, body)
            .await?
            .json::<T>()
            .await
            .map_err(|e| ApiError::DeserializationError(format!("Failed to parse response: {}", e)))
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T, ApiError> {
        let body = to_body(body)?;
        self.send_json(Method::POST, &self.url(path), Some(&body)).await
    }
}

fn to_body<T: Serialize>(value: &T) -> Result<serde_json::Value, ApiError> {
    serde_json::to_value(value)
        .map_err(|e| ApiError::RequestError(format!("Failed to encode request: {}", e)))
}

/// Gateway identifier placed in a URL path
fn path_id(id: &str) -> Result<&str, ApiError> {
    if !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        Ok(id)
    } else {
        Err(ApiError::BadRequest(format!("Invalid gateway identifier '{}'", id)))
    }
}

pub(crate) fn request_error(e: reqwest::Error) -> ApiError {
    if e.is_timeout() {
        ApiError::Timeout(format!("Request timed out: {}", e))
    } else {
        ApiError::RequestError(format!("Request failed: {}", e))
    }
}

/// Parse error response based on HTTP status code
pub(crate) async fn handle_error_response(status: StatusCode, response: reqwest::Response) -> ApiError {
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<i64>().ok());
    let body_text = response.text().await.unwrap_or_default();

    classify_error(status.as_u16(), retry_after, body_text)
}

fn classify_error(status_code: u16, retry_after_secs: Option<i64>, body_text: String) -> ApiError {
    let message = serde_json::from_str::<GatewayErrorBody>(&body_text)
        .ok()
        .and_then(|body| body.summary())
        .unwrap_or(body_text);

    match status_code {
        400 => ApiError::BadRequest(message),
        401 => ApiError::Unauthorized(message),
        402 => ApiError::Declined(message),
        403 => ApiError::Forbidden(message),
        404 => ApiError::NotFound(message),
        429 => {
            let retry_after = retry_after_secs.map(|secs| secs * 1000).unwrap_or(1000);
            warn!("Rate limited by gateway, retry after {} ms", retry_after);
            ApiError::RateLimited { retry_after }
        }
        500..=599 => {
            warn!("Gateway server error {}: {}", status_code, message);
            ApiError::ServerError(status_code as i32, message)
        }
        _ => ApiError::HttpError(status_code as i32, message),
    }
}

#[async_trait]
impl PaymentGateway for GetnetClient {
    async fn tokenize_card(&self, request: TokenizeCardRequest) -> Result<CardTokenResponse, ApiError> {
        self.post("/v1/tokens/card", &request).await
    }

    async fn verify_card(&self, request: VerifyCardRequest) -> Result<VerifyCardResponse, ApiError> {
        self.post("/v1/cards/verification", &request).await
    }

    async fn save_card(&self, request: SaveCardRequest) -> Result<SavedCardResponse, ApiError> {
        let saved: SavedCardResponse = self.post("/v1/cards", &request).await?;
        info!(card_id = %saved.card_id, customer_id = %request.customer_id, "Card stored in vault");
        Ok(saved)
    }

    async fn get_card(&self, card_id: String) -> Result<VaultCard, ApiError> {
        let url = self.url(&format!("/v1/cards/{}", path_id(&card_id)?));
        retry_with_backoff(
            || self.send_json(Method::GET, &url, None),
            &self.retry_config,
            ApiError::is_retryable,
        )
        .await
    }

    async fn remove_card(&self, card_id: String) -> Result<(), ApiError> {
        let url = self.url(&format!("/v1/cards/{}", path_id(&card_id)?));
        self.send(Method::DELETE, &url, None).await?;
        info!(card_id = %card_id, "Card removed from vault");
        Ok(())
    }

    async fn authorize_credit(&self, request: CreditPaymentRequest) -> Result<CreditPaymentResponse, ApiError> {
        let response: CreditPaymentResponse = self.post("/v1/payments/credit", &request).await?;
        info!(
            payment_id = %response.payment_id,
            order_id = %request.order.order_id,
            amount = request.amount,
            "Credit payment authorized"
        );
        Ok(response)
    }

    async fn finalize_credit(&self, payment_id: String) -> Result<PaymentStatusResponse, ApiError> {
        let path = format!("/v1/payments/credit/{}/authenticated/finalize", path_id(&payment_id)?);
        self.post(&path, &serde_json::json!({})).await
    }

    async fn authorize_debit(&self, request: DebitPaymentRequest) -> Result<DebitPaymentResponse, ApiError> {
        let response: DebitPaymentResponse = self.post("/v1/payments/debit", &request).await?;
        info!(
            payment_id = %response.payment_id,
            order_id = %request.order.order_id,
            "Debit payment awaiting authentication"
        );
        Ok(response)
    }

    async fn finalize_debit(
        &self,
        payment_id: String,
        request: FinalizeDebitRequest,
    ) -> Result<PaymentStatusResponse, ApiError> {
        let path = format!("/v1/payments/debit/{}/authenticated/finalize", path_id(&payment_id)?);
        self.post(&path, &request).await
    }

    async fn cancel_payment(&self, payment_id: String) -> Result<PaymentStatusResponse, ApiError> {
        let path = format!("/v1/payments/credit/{}/cancel", path_id(&payment_id)?);
        let response: PaymentStatusResponse = self.post(&path, &serde_json::json!({})).await?;
        info!(payment_id = %payment_id, status = %response.status, "Payment cancelled");
        Ok(response)
    }

    async fn request_cancellation(&self, request: CancelRequest) -> Result<CancelRequestResponse, ApiError> {
        let response: CancelRequestResponse = self.post("/v1/payments/cancel/request", &request).await?;
        info!(
            payment_id = %request.payment_id,
            cancel_request_id = %response.cancel_request_id,
            "Cancellation requested"
        );
        Ok(response)
    }

    async fn cancellation_status(&self, cancel_custom_key: String) -> Result<CancelRequestResponse, ApiError> {
        let url = reqwest::Url::parse_with_params(
            &self.url("/v1/payments/cancel/request"),
            &[("cancel_custom_key", cancel_custom_key.as_str())],
        )
        .map_err(|e| ApiError::RequestError(format!("Invalid URL: {}", e)))?;
        let url = url.to_string();

        retry_with_backoff(
            || self.send_json(Method::GET, &url, None),
            &self.retry_config,
            ApiError::is_retryable,
        )
        .await
    }
}
