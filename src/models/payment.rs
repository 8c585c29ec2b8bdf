//! Card and payment models shared by the gateway client and the payment service

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::utils::errors::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CardBrand {
    Mastercard,
    Visa,
    Amex,
    Elo,
    Hipercard,
}

impl CardBrand {
    pub fn as_str(&self) -> &'static str {
        match self {
            CardBrand::Mastercard => "Mastercard",
            CardBrand::Visa => "Visa",
            CardBrand::Amex => "Amex",
            CardBrand::Elo => "Elo",
            CardBrand::Hipercard => "Hipercard",
        }
    }
}

/// Whether a tokenized card goes through `/v1/cards/verification` before authorization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationStep {
    RequiresVerification,
    SkipVerification,
}

impl From<CardBrand> for VerificationStep {
    fn from(brand: CardBrand) -> Self {
        match brand {
            CardBrand::Visa | CardBrand::Mastercard => VerificationStep::RequiresVerification,
            _ => VerificationStep::SkipVerification,
        }
    }
}

/// Raw card data entered by the customer. Never persisted or logged.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardForm {
    pub brand: CardBrand,
    pub name_on_card: String,
    pub expiration_month: String,
    pub expiration_year: String,
    pub security_code: String,
    pub card_number: String,
}

impl fmt::Debug for CardForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CardForm")
            .field("brand", &self.brand)
            .field("name_on_card", &self.name_on_card)
            .field("last_four", &self.last_four())
            .finish_non_exhaustive()
    }
}

impl CardForm {
    pub fn last_four(&self) -> String {
        let digits: Vec<char> = self.card_number.chars().filter(|c| c.is_ascii_digit()).collect();
        digits[digits.len().saturating_sub(4)..].iter().collect()
    }

    pub fn validate(&self) -> AppResult<()> {
        let all_digits = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());

        if self.name_on_card.trim().is_empty() {
            return Err(AppError::validation("name on card is required"));
        }
        if self.expiration_month.len() != 2 || !all_digits(&self.expiration_month) {
            return Err(AppError::validation("expiration month must have 2 digits"));
        }
        if self.expiration_year.len() != 2 || !all_digits(&self.expiration_year) {
            return Err(AppError::validation("expiration year must have 2 digits"));
        }
        if !(3..=4).contains(&self.security_code.len()) || !all_digits(&self.security_code) {
            return Err(AppError::validation("security code must have 3 or 4 digits"));
        }
        if !all_digits(&self.card_number) {
            return Err(AppError::validation("card number must contain only digits"));
        }
        Ok(())
    }

    pub fn verification_step(&self) -> VerificationStep {
        self.brand.into()
    }
}

/// Buyer data sent along with a payment
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub document_number: String,
    pub document_type: String,
}

/// Result of a credit payment that went through authorization and capture
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizedPayment {
    pub payment_id: String,
    pub status: String,
}

/// First leg of a debit payment; the customer must authenticate at `redirect_url`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingDebit {
    pub payment_id: String,
    pub redirect_url: String,
    pub issuer_payment_id: String,
    pub payer_authentication_request: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PaymentOutcome {
    Finalized(FinalizedPayment),
    AwaitingAuthentication(PendingDebit),
}

/// How an order payment was cancelled
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CancellationOutcome {
    /// Same-day cancellation accepted immediately
    Cancelled { payment_id: String, status: String },
    /// Older payment: an asynchronous cancellation request was filed
    Requested { cancel_request_id: String, custom_key: String, status: String },
}
