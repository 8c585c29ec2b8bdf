//! Card payments through the gateway
//!
//! Every attempt runs tokenize, optional verification (by card brand),
//! authorization and finalization. Each step is one gateway call; a failed
//! verification stops the attempt with a "card rejected" error, any other
//! failure with "payment could not be completed". Nothing here is retried.

use chrono::Local;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::api::getnet::models::{
    ApiError, CancelRequest, CancelRequestResponse, CreditDetails, CreditPaymentRequest, DebitDetails,
    DebitPaymentRequest, FinalizeDebitRequest, PaymentCard, PaymentCustomer, PaymentOrder,
    SaveCardRequest, SavedCardResponse, TokenizeCardRequest, VaultCard, VerifyCardRequest, CURRENCY,
};
use crate::api::getnet::PaymentGateway;
use crate::db::OrderStore;
use crate::models::{
    CancellationOutcome, CardForm, Customer, FinalizedPayment, Order, OrderStatus, OrderType,
    PaymentOutcome, PendingDebit, VerificationStep,
};
use crate::utils::errors::{AppError, AppResult};

pub struct PaymentService {
    gateway: Arc<dyn PaymentGateway>,
    orders: Arc<dyn OrderStore>,
    seller_id: String,
}

impl PaymentService {
    pub fn new(gateway: Arc<dyn PaymentGateway>, orders: Arc<dyn OrderStore>, seller_id: String) -> Self {
        Self {
            gateway,
            orders,
            seller_id,
        }
    }

    /// Exchange the card number for a gateway token
    async fn tokenize(&self, card: &CardForm, customer: &Customer) -> AppResult<String> {
        let request = TokenizeCardRequest {
            card_number: card.card_number.clone(),
            customer_id: Some(customer.id.to_string()),
        };

        self.gateway
            .tokenize_card(request)
            .await
            .map(|token| token.number_token)
            .map_err(|e| {
                warn!(customer_id = customer.id, last_four = %card.last_four(), "Card tokenization failed: {}", e);
                card_call_failed(&e)
            })
    }

    /// Run verification when the brand requires it
    async fn verify(&self, card: &CardForm, number_token: &str) -> AppResult<()> {
        if card.verification_step() == VerificationStep::SkipVerification {
            return Ok(());
        }

        let request = VerifyCardRequest {
            number_token: number_token.to_string(),
            brand: card.brand.as_str().to_string(),
            cardholder_name: card.name_on_card.clone(),
            expiration_month: card.expiration_month.clone(),
            expiration_year: card.expiration_year.clone(),
            security_code: card.security_code.clone(),
        };

        match self.gateway.verify_card(request).await {
            Ok(response) if response.is_verified() => Ok(()),
            Ok(response) => {
                warn!(brand = card.brand.as_str(), status = %response.status, "Card verification denied");
                Err(AppError::card_rejected())
            }
            Err(e) => {
                warn!(brand = card.brand.as_str(), "Card verification failed: {}", e);
                Err(AppError::card_rejected())
            }
        }
    }

    fn payment_card(&self, card: &CardForm, number_token: String) -> PaymentCard {
        PaymentCard {
            number_token,
            cardholder_name: card.name_on_card.clone(),
            expiration_month: card.expiration_month.clone(),
            expiration_year: card.expiration_year.clone(),
            brand: card.brand.as_str().to_string(),
            security_code: card.security_code.clone(),
        }
    }

    fn authorization_failed(order_id: i64, step: &str, e: ApiError) -> AppError {
        error!(order_id, step, "Gateway payment call failed: {}", e);
        AppError::payment_not_completed()
    }

    /// Tokenize and store a card in the gateway vault
    pub async fn save_card(&self, customer: &Customer, card: &CardForm) -> AppResult<SavedCardResponse> {
        card.validate()?;
        let number_token = self.tokenize(card, customer).await?;

        let request = SaveCardRequest {
            number_token,
            brand: card.brand.as_str().to_string(),
            cardholder_name: card.name_on_card.clone(),
            expiration_month: card.expiration_month.clone(),
            expiration_year: card.expiration_year.clone(),
            customer_id: customer.id.to_string(),
            cardholder_identification: Some(customer.document_number.clone()),
            verify_card: true,
            security_code: card.security_code.clone(),
        };

        self.gateway.save_card(request).await.map_err(|e| {
            warn!(customer_id = customer.id, "Saving card failed: {}", e);
            card_call_failed(&e)
        })
    }

    pub async fn get_card_data(&self, card_id: &str) -> AppResult<VaultCard> {
        match self.gateway.get_card(card_id.to_string()).await {
            Ok(card) => Ok(card),
            Err(ApiError::NotFound(_)) => Err(AppError::not_found("Card not found")),
            Err(e) => Err(AppError::Gateway(e)),
        }
    }

    pub async fn remove_card(&self, card_id: &str) -> AppResult<()> {
        match self.gateway.remove_card(card_id.to_string()).await {
            Ok(()) => Ok(()),
            Err(ApiError::NotFound(_)) => Err(AppError::not_found("Card not found")),
            Err(e) => Err(AppError::Gateway(e)),
        }
    }

    /// Credit payment with immediate capture and a single installment
    pub async fn pay_credit(&self, order: &Order, customer: &Customer, card: &CardForm) -> AppResult<FinalizedPayment> {
        card.validate()?;
        let number_token = self.tokenize(card, customer).await?;
        self.verify(card, &number_token).await?;

        let request = CreditPaymentRequest {
            seller_id: self.seller_id.clone(),
            amount: order.total_value_cents,
            currency: CURRENCY.to_string(),
            order: PaymentOrder {
                order_id: order.id.to_string(),
            },
            customer: payment_customer(customer),
            device: serde_json::json!({}),
            credit: CreditDetails::immediate(self.payment_card(card, number_token)),
        };

        let authorized = self
            .gateway
            .authorize_credit(request)
            .await
            .map_err(|e| Self::authorization_failed(order.id, "authorize", e))?;

        let finalized = self
            .gateway
            .finalize_credit(authorized.payment_id.clone())
            .await
            .map_err(|e| Self::authorization_failed(order.id, "finalize", e))?;

        Ok(FinalizedPayment {
            payment_id: finalized.payment_id,
            status: finalized.status,
        })
    }

    /// First leg of a debit payment. The customer then authenticates at the
    /// returned URL and the payment is settled by [`Self::finalize_debit`].
    pub async fn pay_debit(&self, order: &Order, customer: &Customer, card: &CardForm) -> AppResult<PendingDebit> {
        card.validate()?;
        let number_token = self.tokenize(card, customer).await?;
        self.verify(card, &number_token).await?;

        let request = DebitPaymentRequest {
            seller_id: self.seller_id.clone(),
            amount: order.total_value_cents,
            currency: CURRENCY.to_string(),
            order: PaymentOrder {
                order_id: order.id.to_string(),
            },
            customer: payment_customer(customer),
            device: serde_json::json!({}),
            shippings: Vec::new(),
            debit: DebitDetails {
                cardholder_mobile: None,
                card: self.payment_card(card, number_token),
            },
        };

        let pending = self
            .gateway
            .authorize_debit(request)
            .await
            .map_err(|e| Self::authorization_failed(order.id, "authorize", e))?;

        Ok(PendingDebit {
            payment_id: pending.payment_id,
            redirect_url: pending.redirect_url,
            issuer_payment_id: pending.post_data.issuer_payment_id,
            payer_authentication_request: pending.post_data.payer_authentication_request,
        })
    }

    pub async fn finalize_debit(&self, payment_id: &str, payer_authentication_response: &str) -> AppResult<FinalizedPayment> {
        let request = FinalizeDebitRequest {
            payer_authentication_response: payer_authentication_response.to_string(),
        };

        let finalized = self
            .gateway
            .finalize_debit(payment_id.to_string(), request)
            .await
            .map_err(|e| {
                error!(payment_id, "Debit finalization failed: {}", e);
                AppError::payment_not_completed()
            })?;

        info!(payment_id, status = %finalized.status, "Debit payment finalized");
        Ok(FinalizedPayment {
            payment_id: finalized.payment_id,
            status: finalized.status,
        })
    }

    /// Same-day cancellation
    pub async fn cancel_payment(&self, payment_id: &str) -> AppResult<CancellationOutcome> {
        let cancelled = self.gateway.cancel_payment(payment_id.to_string()).await.map_err(|e| {
            error!(payment_id, "Payment cancellation failed: {}", e);
            AppError::payment_not_completed()
        })?;

        Ok(CancellationOutcome::Cancelled {
            payment_id: cancelled.payment_id,
            status: cancelled.status,
        })
    }

    /// File an asynchronous cancellation request for an older payment
    pub async fn request_cancellation(&self, payment_id: &str, amount_cents: i64) -> AppResult<CancellationOutcome> {
        let request = CancelRequest {
            payment_id: payment_id.to_string(),
            cancel_amount: amount_cents,
            cancel_custom_key: uuid::Uuid::new_v4().simple().to_string(),
        };

        let response = self.gateway.request_cancellation(request).await.map_err(|e| {
            error!(payment_id, "Cancellation request failed: {}", e);
            AppError::payment_not_completed()
        })?;

        Ok(requested(response))
    }

    pub async fn cancellation_status(&self, cancel_custom_key: &str) -> AppResult<CancellationOutcome> {
        match self.gateway.cancellation_status(cancel_custom_key.to_string()).await {
            Ok(response) => Ok(requested(response)),
            Err(ApiError::NotFound(_)) => Err(AppError::not_found("Cancellation request not found")),
            Err(e) => Err(AppError::Gateway(e)),
        }
    }

    /// Pay an order by card according to its type and record the gateway payment.
    ///
    /// The order is claimed before the gateway is called, so only one attempt
    /// per order can charge the card.
    pub async fn pay_order(&self, order_id: i64, customer: &Customer, card: &CardForm) -> AppResult<PaymentOutcome> {
        let order = self
            .orders
            .find_order(order_id)
            .await?
            .ok_or_else(|| AppError::not_found("Order not found"))?;

        if order.status == OrderStatus::Canceled {
            return Err(AppError::conflict("The order was cancelled"));
        }
        if order.order_type == OrderType::Money {
            return Err(AppError::validation("Cash orders are paid on delivery"));
        }
        if order.payment_id.is_some() || !self.orders.claim_order_payment(order.id).await? {
            warn!(order_id = order.id, "Order is already paid or being paid");
            return Err(AppError::conflict("The order was already paid"));
        }

        let outcome = match self.charge(&order, customer, card).await {
            Ok(outcome) => outcome,
            Err(e) => {
                if let Err(release) = self.orders.release_order_payment(order.id).await {
                    error!(order_id = order.id, "Failed to release payment claim: {}", release);
                }
                return Err(e);
            }
        };

        let payment_id = match &outcome {
            PaymentOutcome::Finalized(payment) => &payment.payment_id,
            PaymentOutcome::AwaitingAuthentication(pending) => &pending.payment_id,
        };
        if let Err(e) = self.orders.set_order_payment(order.id, payment_id).await {
            error!(order_id = order.id, payment_id = %payment_id, "Card was charged but the payment could not be recorded: {}", e);
            return Err(e);
        }
        info!(order_id = order.id, payment_id = %payment_id, "Order payment recorded");

        Ok(outcome)
    }

    async fn charge(&self, order: &Order, customer: &Customer, card: &CardForm) -> AppResult<PaymentOutcome> {
        match order.order_type {
            OrderType::Credit => Ok(PaymentOutcome::Finalized(self.pay_credit(order, customer, card).await?)),
            OrderType::Debit => Ok(PaymentOutcome::AwaitingAuthentication(
                self.pay_debit(order, customer, card).await?,
            )),
            OrderType::Money => Err(AppError::validation("Cash orders are paid on delivery")),
        }
    }

    /// Cancel the card payment of an order: directly on the day it was
    /// placed, through a cancellation request afterwards
    pub async fn cancel_order_payment(&self, order_id: i64) -> AppResult<CancellationOutcome> {
        let order = self
            .orders
            .find_order(order_id)
            .await?
            .ok_or_else(|| AppError::not_found("Order not found"))?;

        let payment_id = match order.card_payment_id() {
            Some(id) => id,
            None if order.payment_id.is_some() => {
                return Err(AppError::conflict("The order payment is still being processed"));
            }
            None => return Err(AppError::validation("The order has no card payment")),
        };

        let today = Local::now().date_naive();
        if order.creation_date.date() == today {
            self.cancel_payment(payment_id).await
        } else {
            self.request_cancellation(payment_id, order.total_value_cents).await
        }
    }
}

/// Only a refusal of the card data itself counts as a rejected card
fn card_call_failed(e: &ApiError) -> AppError {
    if e.is_rejection() {
        AppError::card_rejected()
    } else {
        AppError::payment_not_completed()
    }
}

fn requested(response: CancelRequestResponse) -> CancellationOutcome {
    CancellationOutcome::Requested {
        cancel_request_id: response.cancel_request_id,
        custom_key: response.cancel_custom_key,
        status: response.status,
    }
}

fn payment_customer(customer: &Customer) -> PaymentCustomer {
    let name = customer.name.trim();
    let (first_name, last_name) = match name.split_once(' ') {
        Some((first, last)) => (first.to_string(), last.trim().to_string()),
        None => (name.to_string(), String::new()),
    };

    PaymentCustomer {
        customer_id: customer.id.to_string(),
        name: name.to_string(),
        first_name,
        last_name,
        email: customer.email.clone(),
        document_type: customer.document_type.clone(),
        document_number: customer.document_number.clone(),
        billing_address: serde_json::json!({}),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::getnet::client::MockPaymentGateway;
    use crate::api::getnet::models::{
        CardTokenResponse, CreditPaymentResponse, DebitPaymentResponse, DebitPostData,
        PaymentStatusResponse, VerifyCardResponse,
    };
    use crate::db::InMemoryStore;
    use crate::models::{CardBrand, NewOrder};
    use crate::services::now;
    use chrono::Duration;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn customer() -> Customer {
        Customer {
            id: 3,
            name: "Ana Maria Souza".into(),
            email: "ana@example.com".into(),
            document_number: "12345678912".into(),
            document_type: "CPF".into(),
        }
    }

    fn card(brand: CardBrand, security_code: &str) -> CardForm {
        CardForm {
            brand,
            name_on_card: "ANA M SOUZA".into(),
            expiration_month: "12".into(),
            expiration_year: "28".into(),
            security_code: security_code.into(),
            card_number: "5155901222280001".into(),
        }
    }

    async fn order(store: &InMemoryStore, order_type: OrderType) -> Order {
        store
            .insert_order(&NewOrder {
                order_type,
                card_code: None,
                total_value_cents: 4990,
                total_product_value_cents: 4490,
                total_freight_value_cents: 500,
                get_on_market: false,
                change_value_cents: None,
                receive_date: None,
                receive_time: None,
                user_id: Some(3),
                creation_date: now(),
                lines: vec![],
            })
            .await
            .unwrap()
    }

    fn service(gateway: MockPaymentGateway, store: &InMemoryStore) -> PaymentService {
        PaymentService::new(Arc::new(gateway), Arc::new(store.clone()), "seller-1".into())
    }

    fn expect_tokenize(gateway: &mut MockPaymentGateway) {
        gateway
            .expect_tokenize_card()
            .times(1)
            .withf(|req| req.card_number == "5155901222280001" && req.customer_id.as_deref() == Some("3"))
            .returning(|_| {
                Ok(CardTokenResponse {
                    number_token: "tok-1".into(),
                })
            });
    }

    fn status(payment_id: &str, status: &str) -> PaymentStatusResponse {
        PaymentStatusResponse {
            payment_id: payment_id.into(),
            status: status.into(),
            seller_id: None,
            amount: None,
            currency: None,
            order_id: None,
        }
    }

    #[tokio::test]
    async fn test_amex_skips_verification_and_finalizes() {
        let store = InMemoryStore::new();
        let order = order(&store, OrderType::Credit).await;

        let mut gateway = MockPaymentGateway::new();
        expect_tokenize(&mut gateway);
        gateway.expect_verify_card().never();
        gateway
            .expect_authorize_credit()
            .times(1)
            .withf(|req| {
                req.amount == 4990
                    && req.seller_id == "seller-1"
                    && req.credit.card.number_token == "tok-1"
                    && !req.credit.delayed
                    && req.credit.number_installments == 1
                    && req.customer.first_name == "Ana"
                    && req.customer.last_name == "Maria Souza"
            })
            .returning(|_| {
                Ok(CreditPaymentResponse {
                    payment_id: "pay-1".into(),
                    seller_id: None,
                    amount: Some(4990),
                    order_id: None,
                    status: Some("AUTHORIZED".into()),
                    received_at: None,
                })
            });
        gateway
            .expect_finalize_credit()
            .times(1)
            .withf(|payment_id| payment_id == "pay-1")
            .returning(|id| Ok(status(&id, "APPROVED")));

        let service = service(gateway, &store);
        let outcome = service
            .pay_order(order.id, &customer(), &card(CardBrand::Amex, "1234"))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            PaymentOutcome::Finalized(FinalizedPayment {
                payment_id: "pay-1".into(),
                status: "APPROVED".into(),
            })
        );
        let stored = store.find_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.payment_id.as_deref(), Some("pay-1"));
    }

    #[tokio::test]
    async fn test_visa_failed_verification_stops_before_authorization() {
        let store = InMemoryStore::new();
        let order = order(&store, OrderType::Credit).await;

        let mut gateway = MockPaymentGateway::new();
        expect_tokenize(&mut gateway);
        gateway
            .expect_verify_card()
            .times(1)
            .returning(|_| Err(ApiError::BadRequest("Invalid security code".into())));
        gateway.expect_authorize_credit().times(0);
        gateway.expect_finalize_credit().times(0);

        let service = service(gateway, &store);
        let err = service
            .pay_order(order.id, &customer(), &card(CardBrand::Visa, "000"))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::GatewayRejected(_)));
        assert_eq!(err.code(), "CARD_REJECTED");
        assert_eq!(err.to_string(), AppError::CARD_REJECTED_MESSAGE);
        assert!(store.find_order(order.id).await.unwrap().unwrap().payment_id.is_none());
    }

    #[tokio::test]
    async fn test_denied_verification_is_rejection() {
        let store = InMemoryStore::new();
        let order = order(&store, OrderType::Credit).await;

        let mut gateway = MockPaymentGateway::new();
        expect_tokenize(&mut gateway);
        gateway.expect_verify_card().times(1).returning(|_| {
            Ok(VerifyCardResponse {
                status: "DENIED".into(),
                verification_id: None,
                authorization_code: None,
            })
        });
        gateway.expect_authorize_credit().never();

        let service = service(gateway, &store);
        let err = service
            .pay_credit(&order, &customer(), &card(CardBrand::Mastercard, "123"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::GatewayRejected(_)));
    }

    #[tokio::test]
    async fn test_declined_authorization_is_payment_error() {
        let store = InMemoryStore::new();
        let order = order(&store, OrderType::Credit).await;

        let mut gateway = MockPaymentGateway::new();
        expect_tokenize(&mut gateway);
        gateway
            .expect_authorize_credit()
            .times(1)
            .returning(|_| Err(ApiError::Declined("NOT APPROVED (PAYMENTS-402)".into())));
        gateway.expect_finalize_credit().never();

        let service = service(gateway, &store);
        let err = service
            .pay_credit(&order, &customer(), &card(CardBrand::Elo, "123"))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::GatewayAuthorization(_)));
        // Provider details never reach the caller
        assert!(!err.body().message.contains("PAYMENTS-402"));
    }

    #[tokio::test]
    async fn test_debit_order_waits_for_authentication() {
        let store = InMemoryStore::new();
        let order = order(&store, OrderType::Debit).await;

        let mut gateway = MockPaymentGateway::new();
        expect_tokenize(&mut gateway);
        gateway
            .expect_verify_card()
            .times(1)
            .returning(|_| {
                Ok(VerifyCardResponse {
                    status: "VERIFIED".into(),
                    verification_id: Some("v-1".into()),
                    authorization_code: None,
                })
            });
        gateway.expect_authorize_debit().times(1).returning(|_| {
            Ok(DebitPaymentResponse {
                payment_id: "deb-1".into(),
                seller_id: None,
                redirect_url: "https://acs.example.com/auth".into(),
                post_data: DebitPostData {
                    issuer_payment_id: "iss-1".into(),
                    payer_authentication_request: "PAREQ".into(),
                },
            })
        });
        gateway
            .expect_finalize_debit()
            .times(1)
            .withf(|id, req| id == "deb-1" && req.payer_authentication_response == "PARES")
            .returning(|id, _| Ok(status(&id, "APPROVED")));

        let service = service(gateway, &store);
        let outcome = service
            .pay_order(order.id, &customer(), &card(CardBrand::Visa, "123"))
            .await
            .unwrap();

        match outcome {
            PaymentOutcome::AwaitingAuthentication(pending) => {
                assert_eq!(pending.redirect_url, "https://acs.example.com/auth");
                assert_eq!(pending.payer_authentication_request, "PAREQ");
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(
            store.find_order(order.id).await.unwrap().unwrap().payment_id.as_deref(),
            Some("deb-1")
        );

        let finalized = service.finalize_debit("deb-1", "PARES").await.unwrap();
        assert_eq!(finalized.status, "APPROVED");
    }

    #[tokio::test]
    async fn test_cash_and_paid_orders_are_refused() {
        let store = InMemoryStore::new();
        let cash = order(&store, OrderType::Money).await;
        let paid = order(&store, OrderType::Credit).await;
        store.set_order_payment(paid.id, "pay-0").await.unwrap();

        let mut gateway = MockPaymentGateway::new();
        gateway.expect_tokenize_card().never();
        let service = service(gateway, &store);

        assert!(matches!(
            service.pay_order(cash.id, &customer(), &card(CardBrand::Amex, "1234")).await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            service.pay_order(paid.id, &customer(), &card(CardBrand::Amex, "1234")).await,
            Err(AppError::Conflict(_))
        ));
        assert!(matches!(
            service.pay_order(999, &customer(), &card(CardBrand::Amex, "1234")).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_same_day_order_is_cancelled_directly() {
        let store = InMemoryStore::new();
        let order = order(&store, OrderType::Credit).await;
        store.set_order_payment(order.id, "pay-1").await.unwrap();

        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_cancel_payment()
            .times(1)
            .withf(|id| id == "pay-1")
            .returning(|id| Ok(status(&id, "CANCELED")));
        gateway.expect_request_cancellation().never();

        let service = service(gateway, &store);
        let outcome = service.cancel_order_payment(order.id).await.unwrap();
        assert_eq!(
            outcome,
            CancellationOutcome::Cancelled {
                payment_id: "pay-1".into(),
                status: "CANCELED".into(),
            }
        );
    }

    #[tokio::test]
    async fn test_older_order_files_cancellation_request() {
        let store = InMemoryStore::new();
        let order = order(&store, OrderType::Credit).await;
        store.set_order_payment(order.id, "pay-1").await.unwrap();
        store.backdate_order(order.id, now() - Duration::days(3)).await;

        let mut gateway = MockPaymentGateway::new();
        gateway.expect_cancel_payment().never();
        gateway
            .expect_request_cancellation()
            .times(1)
            .withf(|req| req.payment_id == "pay-1" && req.cancel_amount == 4990 && !req.cancel_custom_key.is_empty())
            .returning(|req| {
                Ok(CancelRequestResponse {
                    seller_id: None,
                    payment_id: Some(req.payment_id),
                    cancel_request_at: None,
                    cancel_request_id: "req-1".into(),
                    cancel_custom_key: req.cancel_custom_key,
                    status: "ACCEPTED".into(),
                })
            });

        let service = service(gateway, &store);
        match service.cancel_order_payment(order.id).await.unwrap() {
            CancellationOutcome::Requested {
                cancel_request_id,
                custom_key,
                status,
            } => {
                assert_eq!(cancel_request_id, "req-1");
                assert_eq!(custom_key.len(), 32);
                assert_eq!(status, "ACCEPTED");
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancel_without_payment_is_validation_error() {
        let store = InMemoryStore::new();
        let order = order(&store, OrderType::Credit).await;
        let service = service(MockPaymentGateway::new(), &store);

        assert!(matches!(
            service.cancel_order_payment(order.id).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_save_card_verifies_in_vault() {
        let store = InMemoryStore::new();
        let mut gateway = MockPaymentGateway::new();
        expect_tokenize(&mut gateway);
        gateway
            .expect_save_card()
            .times(1)
            .withf(|req| req.verify_card && req.number_token == "tok-1" && req.customer_id == "3")
            .returning(|req| {
                Ok(SavedCardResponse {
                    card_id: "card-1".into(),
                    number_token: req.number_token,
                })
            });

        let service = service(gateway, &store);
        let saved = service
            .save_card(&customer(), &card(CardBrand::Mastercard, "123"))
            .await
            .unwrap();
        assert_eq!(saved.card_id, "card-1");
    }

    #[tokio::test]
    async fn test_card_lookup_errors() {
        let store = InMemoryStore::new();
        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_get_card()
            .returning(|_| Err(ApiError::NotFound("card".into())));
        gateway
            .expect_remove_card()
            .returning(|_| Err(ApiError::ServerError(503, "down".into())));

        let service = service(gateway, &store);
        assert!(matches!(service.get_card_data("c1").await, Err(AppError::NotFound(_))));
        assert!(matches!(service.remove_card("c1").await, Err(AppError::Gateway(_))));
    }

    #[tokio::test]
    async fn test_invalid_card_never_reaches_gateway() {
        let store = InMemoryStore::new();
        let order = order(&store, OrderType::Credit).await;
        let mut gateway = MockPaymentGateway::new();
        gateway.expect_tokenize_card().never();

        let service = service(gateway, &store);
        let mut bad = card(CardBrand::Visa, "123");
        bad.card_number = "5155-9012".into();
        assert!(matches!(
            service.pay_credit(&order, &customer(), &bad).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_unavailable_gateway_is_not_a_card_rejection() {
        let store = InMemoryStore::new();
        let order = order(&store, OrderType::Credit).await;

        for (failure, rejected) in [
            (ApiError::ServerError(503, "unavailable".into()), false),
            (ApiError::Timeout("tokenize".into()), false),
            (ApiError::RequestError("connection reset".into()), false),
            (ApiError::BadRequest("invalid card_number".into()), true),
        ] {
            let mut gateway = MockPaymentGateway::new();
            gateway
                .expect_tokenize_card()
                .times(1)
                .return_once(move |_| Err(failure));
            gateway.expect_authorize_credit().never();

            let err = service(gateway, &store)
                .pay_order(order.id, &customer(), &card(CardBrand::Amex, "1234"))
                .await
                .unwrap_err();

            if rejected {
                assert!(matches!(err, AppError::GatewayRejected(_)));
            } else {
                assert!(matches!(err, AppError::GatewayAuthorization(_)));
            }
            assert!(store.find_order(order.id).await.unwrap().unwrap().payment_id.is_none());
        }
    }

    /// Credit gateway whose tokenization takes a while, counting authorizations
    #[derive(Default)]
    struct SlowGateway {
        authorizations: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl PaymentGateway for SlowGateway {
        async fn tokenize_card(&self, _: TokenizeCardRequest) -> Result<CardTokenResponse, ApiError> {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            Ok(CardTokenResponse {
                number_token: "tok-1".into(),
            })
        }

        async fn verify_card(&self, _: VerifyCardRequest) -> Result<VerifyCardResponse, ApiError> {
            Err(ApiError::NotFound("verify".into()))
        }

        async fn save_card(&self, _: SaveCardRequest) -> Result<SavedCardResponse, ApiError> {
            Err(ApiError::NotFound("save".into()))
        }

        async fn get_card(&self, _: String) -> Result<VaultCard, ApiError> {
            Err(ApiError::NotFound("card".into()))
        }

        async fn remove_card(&self, _: String) -> Result<(), ApiError> {
            Err(ApiError::NotFound("card".into()))
        }

        async fn authorize_credit(&self, _: CreditPaymentRequest) -> Result<CreditPaymentResponse, ApiError> {
            let n = self.authorizations.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(CreditPaymentResponse {
                payment_id: format!("pay-{}", n),
                seller_id: None,
                amount: Some(4990),
                order_id: None,
                status: Some("AUTHORIZED".into()),
                received_at: None,
            })
        }

        async fn finalize_credit(&self, payment_id: String) -> Result<PaymentStatusResponse, ApiError> {
            Ok(status(&payment_id, "APPROVED"))
        }

        async fn authorize_debit(&self, _: DebitPaymentRequest) -> Result<DebitPaymentResponse, ApiError> {
            Err(ApiError::NotFound("debit".into()))
        }

        async fn finalize_debit(&self, _: String, _: FinalizeDebitRequest) -> Result<PaymentStatusResponse, ApiError> {
            Err(ApiError::NotFound("debit".into()))
        }

        async fn cancel_payment(&self, _: String) -> Result<PaymentStatusResponse, ApiError> {
            Err(ApiError::NotFound("payment".into()))
        }

        async fn request_cancellation(&self, _: CancelRequest) -> Result<CancelRequestResponse, ApiError> {
            Err(ApiError::NotFound("payment".into()))
        }

        async fn cancellation_status(&self, _: String) -> Result<CancelRequestResponse, ApiError> {
            Err(ApiError::NotFound("payment".into()))
        }
    }

    #[tokio::test]
    async fn test_concurrent_payments_charge_once() {
        let store = InMemoryStore::new();
        let order = order(&store, OrderType::Credit).await;
        let gateway = Arc::new(SlowGateway::default());
        let service = PaymentService::new(gateway.clone(), Arc::new(store.clone()), "seller-1".into());

        let amex = card(CardBrand::Amex, "1234");
        let buyer = customer();
        let (first, second) = tokio::join!(
            service.pay_order(order.id, &buyer, &amex),
            service.pay_order(order.id, &buyer, &amex),
        );

        let results = [first, second];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            results.iter().filter(|r| matches!(r, Err(AppError::Conflict(_)))).count(),
            1
        );
        assert_eq!(gateway.authorizations.load(Ordering::SeqCst), 1);

        let stored = store.find_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.payment_id.as_deref(), Some("pay-1"));
    }

    #[tokio::test]
    async fn test_payment_in_progress_cannot_be_cancelled() {
        let store = InMemoryStore::new();
        let order = order(&store, OrderType::Credit).await;
        assert!(store.claim_order_payment(order.id).await.unwrap());

        let mut gateway = MockPaymentGateway::new();
        gateway.expect_cancel_payment().never();
        gateway.expect_request_cancellation().never();

        assert!(matches!(
            service(gateway, &store).cancel_order_payment(order.id).await,
            Err(AppError::Conflict(_))
        ));
    }

    #[test]
    fn test_payment_customer_single_name() {
        let mut c = customer();
        c.name = "Ana".into();
        let p = payment_customer(&c);
        assert_eq!(p.first_name, "Ana");
        assert_eq!(p.last_name, "");
    }
}
