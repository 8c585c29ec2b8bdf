//! Order models

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[repr(i32)]
pub enum OrderStatus {
    Made = 0,
    Preparing = 1,
    Sending = 2,
    Sended = 3,
    Canceled = 4,
}

impl OrderStatus {
    /// Statuses a customer may still cancel from
    pub const CLIENT_CANCELLABLE: [OrderStatus; 2] = [OrderStatus::Made, OrderStatus::Preparing];

    /// Customers may cancel only before the order leaves the store
    pub fn client_can_cancel(&self) -> bool {
        !matches!(self, OrderStatus::Sending | OrderStatus::Sended)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[repr(i32)]
pub enum OrderType {
    Money = 0,
    Credit = 1,
    Debit = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[repr(i32)]
pub enum WhoDeleted {
    Client = 0,
    Backoffice = 1,
}

/// Order row. Amounts are in cents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    #[sqlx(rename = "ord_id")]
    pub id: i64,
    #[sqlx(rename = "ord_card_code")]
    pub card_code: Option<String>,
    #[sqlx(rename = "ord_type")]
    pub order_type: OrderType,
    #[sqlx(rename = "ord_status")]
    pub status: OrderStatus,
    #[sqlx(rename = "ord_total_value_cents")]
    pub total_value_cents: i64,
    #[sqlx(rename = "ord_total_product_value_cents")]
    pub total_product_value_cents: i64,
    #[sqlx(rename = "ord_total_freight_value_cents")]
    pub total_freight_value_cents: i64,
    #[sqlx(rename = "ord_get_on_market")]
    pub get_on_market: bool,
    /// Change the courier must bring for cash payments
    #[sqlx(rename = "ord_change_value_cents")]
    pub change_value_cents: Option<i64>,
    #[sqlx(rename = "ord_receive_date")]
    pub receive_date: Option<NaiveDate>,
    #[sqlx(rename = "ord_receive_time")]
    pub receive_time: Option<NaiveTime>,
    #[sqlx(rename = "ord_use_id")]
    pub user_id: Option<i64>,
    #[sqlx(rename = "ord_getnet_payment_id")]
    pub payment_id: Option<String>,
    #[sqlx(rename = "ord_deleted_reason")]
    pub deleted_reason: Option<String>,
    #[sqlx(rename = "ord_user_type_who_deleted")]
    pub who_deleted: Option<WhoDeleted>,
    #[sqlx(rename = "ord_delete_date")]
    pub delete_date: Option<NaiveDateTime>,
    #[sqlx(rename = "ord_creation_date")]
    pub creation_date: NaiveDateTime,
    #[sqlx(rename = "ord_update_date")]
    pub update_date: Option<NaiveDateTime>,
}

/// Stored as the payment id while a card payment for the order is in flight
pub const PAYMENT_IN_PROGRESS: &str = "PENDING";

impl Order {
    /// Gateway payment id, once a payment was recorded
    pub fn card_payment_id(&self) -> Option<&str> {
        self.payment_id.as_deref().filter(|id| *id != PAYMENT_IN_PROGRESS)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    #[sqlx(rename = "orp_id")]
    pub id: i64,
    #[sqlx(rename = "orp_ord_id")]
    pub order_id: i64,
    #[sqlx(rename = "orp_pro_id")]
    pub product_id: i64,
    #[sqlx(rename = "orp_quantity")]
    pub quantity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CartItem {
    pub id: i64,
    pub quantity: f64,
}

/// Checkout request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderForm {
    pub order_type: OrderType,
    #[serde(default)]
    pub card_code: Option<String>,
    #[serde(default)]
    pub get_on_market: bool,
    #[serde(default)]
    pub freight_value_cents: i64,
    #[serde(default)]
    pub change_value_cents: Option<i64>,
    #[serde(default)]
    pub receive_date: Option<NaiveDate>,
    #[serde(default)]
    pub receive_time: Option<NaiveTime>,
    pub products: Vec<CartItem>,
}

/// Fully priced order ready to be persisted with its lines
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub order_type: OrderType,
    pub card_code: Option<String>,
    pub total_value_cents: i64,
    pub total_product_value_cents: i64,
    pub total_freight_value_cents: i64,
    pub get_on_market: bool,
    pub change_value_cents: Option<i64>,
    pub receive_date: Option<NaiveDate>,
    pub receive_time: Option<NaiveTime>,
    pub user_id: Option<i64>,
    pub creation_date: NaiveDateTime,
    /// `(product_id, quantity)`
    pub lines: Vec<(i64, f64)>,
}

/// Status change or cancellation applied to an existing order
#[derive(Debug, Clone, PartialEq)]
pub struct OrderStatusChange {
    pub status: OrderStatus,
    pub deleted_reason: Option<String>,
    pub who_deleted: Option<WhoDeleted>,
    pub at: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusForm {
    pub order_id: i64,
    pub order_status: OrderStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelOrderForm {
    pub order_id: i64,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductRef {
    pub id: i64,
    pub name: String,
}

/// One line of an order as shown to the customer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderProductLine {
    pub quantity: f64,
    pub product: ProductRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeSlot {
    pub time: String,
}

/// Free delivery slots of one day
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveTimes {
    pub date: String,
    pub active_times: Vec<TimeSlot>,
}
