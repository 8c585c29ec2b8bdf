use serde::{Deserialize, Serialize};
use std::fmt;

pub const CURRENCY: &str = "BRL";

/// Response from POST /auth/oauth/v2/token
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: String,
    /// Seconds until the token expires
    pub expires_in: i64,
    #[serde(default)]
    pub scope: Option<String>,
}

/// POST /v1/tokens/card
#[derive(Clone, Serialize)]
pub struct TokenizeCardRequest {
    pub card_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
}

impl fmt::Debug for TokenizeCardRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenizeCardRequest")
            .field("customer_id", &self.customer_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CardTokenResponse {
    pub number_token: String,
}

/// POST /v1/cards/verification
#[derive(Clone, Serialize)]
pub struct VerifyCardRequest {
    pub number_token: String,
    pub brand: String,
    pub cardholder_name: String,
    pub expiration_month: String,
    pub expiration_year: String,
    pub security_code: String,
}

impl fmt::Debug for VerifyCardRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifyCardRequest")
            .field("brand", &self.brand)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerifyCardResponse {
    /// VERIFIED, DENIED or ERROR
    pub status: String,
    #[serde(default)]
    pub verification_id: Option<String>,
    #[serde(default)]
    pub authorization_code: Option<String>,
}

impl VerifyCardResponse {
    pub fn is_verified(&self) -> bool {
        self.status.eq_ignore_ascii_case("VERIFIED")
    }
}

/// POST /v1/cards
#[derive(Clone, Serialize)]
pub struct SaveCardRequest {
    pub number_token: String,
    pub brand: String,
    pub cardholder_name: String,
    pub expiration_month: String,
    pub expiration_year: String,
    pub customer_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cardholder_identification: Option<String>,
    pub verify_card: bool,
    pub security_code: String,
}

impl fmt::Debug for SaveCardRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SaveCardRequest")
            .field("brand", &self.brand)
            .field("customer_id", &self.customer_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SavedCardResponse {
    pub card_id: String,
    pub number_token: String,
}

/// Card kept in the gateway vault, GET /v1/cards/{card_id}
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaultCard {
    pub card_id: String,
    pub last_four_digits: String,
    pub expiration_month: String,
    pub expiration_year: String,
    pub brand: String,
    pub cardholder_name: String,
    pub customer_id: String,
    pub number_token: String,
    #[serde(default)]
    pub used_at: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentOrder {
    pub order_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentCustomer {
    pub customer_id: String,
    pub name: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub document_type: String,
    pub document_number: String,
    pub billing_address: serde_json::Value,
}

#[derive(Clone, Serialize)]
pub struct PaymentCard {
    pub number_token: String,
    pub cardholder_name: String,
    pub expiration_month: String,
    pub expiration_year: String,
    pub brand: String,
    pub security_code: String,
}

impl fmt::Debug for PaymentCard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaymentCard")
            .field("brand", &self.brand)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CreditDetails {
    pub delayed: bool,
    pub save_card_data: bool,
    pub transaction_type: String,
    pub number_installments: u32,
    pub card: PaymentCard,
}

impl CreditDetails {
    /// Immediate capture, single installment
    pub fn immediate(card: PaymentCard) -> Self {
        Self {
            delayed: false,
            save_card_data: false,
            transaction_type: "FULL".to_string(),
            number_installments: 1,
            card,
        }
    }
}

/// POST /v1/payments/credit
#[derive(Debug, Clone, Serialize)]
pub struct CreditPaymentRequest {
    pub seller_id: String,
    /// Amount in cents
    pub amount: i64,
    pub currency: String,
    pub order: PaymentOrder,
    pub customer: PaymentCustomer,
    pub device: serde_json::Value,
    pub credit: CreditDetails,
}

#[derive(Debug, Clone, Serialize)]
pub struct DebitDetails {
    pub cardholder_mobile: Option<String>,
    pub card: PaymentCard,
}

/// POST /v1/payments/debit
#[derive(Debug, Clone, Serialize)]
pub struct DebitPaymentRequest {
    pub seller_id: String,
    pub amount: i64,
    pub currency: String,
    pub order: PaymentOrder,
    pub customer: PaymentCustomer,
    pub device: serde_json::Value,
    pub shippings: Vec<serde_json::Value>,
    pub debit: DebitDetails,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreditPaymentResponse {
    pub payment_id: String,
    #[serde(default)]
    pub seller_id: Option<String>,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub received_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DebitPostData {
    pub issuer_payment_id: String,
    pub payer_authentication_request: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DebitPaymentResponse {
    pub payment_id: String,
    #[serde(default)]
    pub seller_id: Option<String>,
    pub redirect_url: String,
    pub post_data: DebitPostData,
}

/// POST /v1/payments/debit/{payment_id}/authenticated/finalize
#[derive(Debug, Clone, Serialize)]
pub struct FinalizeDebitRequest {
    pub payer_authentication_response: String,
}

/// Payment state returned by finalize and same-day cancel calls
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentStatusResponse {
    pub payment_id: String,
    pub status: String,
    #[serde(default)]
    pub seller_id: Option<String>,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub order_id: Option<String>,
}

/// POST /v1/payments/cancel/request
#[derive(Debug, Clone, Serialize)]
pub struct CancelRequest {
    pub payment_id: String,
    pub cancel_amount: i64,
    pub cancel_custom_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CancelRequestResponse {
    #[serde(default)]
    pub seller_id: Option<String>,
    #[serde(default)]
    pub payment_id: Option<String>,
    #[serde(default)]
    pub cancel_request_at: Option<String>,
    pub cancel_request_id: String,
    pub cancel_custom_key: String,
    pub status: String,
}

/// Body of gateway error responses
#[derive(Debug, Deserialize)]
pub struct GatewayErrorBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub details: Vec<GatewayErrorDetail>,
}

#[derive(Debug, Deserialize)]
pub struct GatewayErrorDetail {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub description_detail: Option<String>,
}

impl GatewayErrorBody {
    /// Most specific message in the body
    pub fn summary(&self) -> Option<String> {
        let detail = self.details.first().and_then(|d| {
            d.description_detail
                .clone()
                .or_else(|| d.description.clone())
                .map(|text| match &d.error_code {
                    Some(code) => format!("{} ({})", text, code),
                    None => text,
                })
        });
        detail.or_else(|| self.message.clone())
    }
}

/// Errors from the gateway API
#[derive(Debug, Clone, PartialEq)]
pub enum ApiError {
    /// 400 Bad Request
    BadRequest(String),
    /// 401 Unauthorized
    Unauthorized(String),
    /// 402 Payment Required (declined)
    Declined(String),
    /// 403 Forbidden
    Forbidden(String),
    /// 404 Not Found
    NotFound(String),
    /// 429 Too Many Requests
    RateLimited { retry_after: i64 },
    /// 5xx Server Error
    ServerError(i32, String),
    /// Other HTTP errors
    HttpError(i32, String),
    /// Request did not finish in time
    Timeout(String),
    /// Network/request error
    RequestError(String),
    /// Deserialization error
    DeserializationError(String),
    /// No usable access token
    Credential(String),
}

impl ApiError {
    /// Transient failures worth retrying for idempotent calls
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiError::RateLimited { .. }
                | ApiError::ServerError(..)
                | ApiError::Timeout(_)
                | ApiError::RequestError(_)
        )
    }

    /// The gateway refused the request content rather than failing to handle it
    pub fn is_rejection(&self) -> bool {
        match self {
            ApiError::BadRequest(_) | ApiError::Declined(_) | ApiError::NotFound(_) => true,
            ApiError::HttpError(status, _) => (400..500).contains(status),
            _ => false,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::BadRequest(msg) => write!(f, "Bad Request: {}", msg),
            ApiError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            ApiError::Declined(msg) => write!(f, "Declined: {}", msg),
            ApiError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            ApiError::NotFound(msg) => write!(f, "Not Found: {}", msg),
            ApiError::RateLimited { retry_after } => {
                write!(f, "Rate Limited. Retry after {} ms", retry_after)
            }
            ApiError::ServerError(code, msg) => write!(f, "Server Error ({}): {}", code, msg),
            ApiError::HttpError(code, msg) => write!(f, "HTTP Error ({}): {}", code, msg),
            ApiError::Timeout(msg) => write!(f, "Timeout: {}", msg),
            ApiError::RequestError(msg) => write!(f, "Request Error: {}", msg),
            ApiError::DeserializationError(msg) => write!(f, "Deserialization Error: {}", msg),
            ApiError::Credential(msg) => write!(f, "Credential Error: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}
