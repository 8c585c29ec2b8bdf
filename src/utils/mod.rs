pub mod encryption;
pub mod errors;
pub mod page;
pub mod ratelimit;
pub mod retry;

pub use encryption::{CryptoError, SecretCipher};
pub use errors::{extract_clean_error, AppError, AppResult, ErrorBody};
pub use page::{skip_from_page, PaginatedResult, PaginationRequest, PAGE_WINDOW};
pub use ratelimit::rate_limit_gateway_api;
pub use retry::{retry_with_backoff, RetryConfig};

/// Keep only ASCII digits ("R$ 1.234,00" -> "123400")
pub fn only_digits(value: &str) -> String {
    value.chars().filter(|c| c.is_ascii_digit()).collect()
}
