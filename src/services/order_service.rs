use chrono::{Duration, NaiveDate, NaiveTime, Timelike};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::db::filter::{ColumnSet, Comparison, FilterForm, Predicate, PredicateMode, Scalar};
use crate::db::{OrderStore, ProductQuery, ProductStore};
use crate::models::{
    ActiveTimes, CancelOrderForm, Caller, NewOrder, Order, OrderProductLine, OrderStatus,
    OrderStatusChange, PlaceOrderForm, ProductRef, TimeSlot, UpdateStatusForm, WhoDeleted,
};
use crate::services::{build_listing, now};
use crate::utils::errors::{AppError, AppResult};
use crate::utils::page::{PaginatedResult, PaginationRequest};

pub const ORDER_COLUMNS: ColumnSet = ColumnSet {
    like: &[],
    numbers: &["ord_type", "ord_status"],
    equal_strings: &["ord_get_on_market"],
    numbers_array: &[],
    dates: &["ord_creation_date"],
    value_cents: &[
        "ord_total_value_cents",
        "ord_total_product_value_cents",
        "ord_total_freight_value_cents",
        "ord_change_value_cents",
    ],
};

fn order_too_large() -> AppError {
    AppError::validation("The order total is too large")
}

/// Rounded line price, `None` when it does not fit in cents
fn line_total_cents(unit_cents: i64, quantity: f64) -> Option<i64> {
    let total = (unit_cents as f64 * quantity).round();
    // i64::MAX as f64 rounds up to 2^63, which itself does not fit
    if total.is_finite() && total.abs() < i64::MAX as f64 {
        Some(total as i64)
    } else {
        None
    }
}

/// Delivery window and slot size
const OPENING_TIME: (u32, u32) = (8, 0);
const CLOSING_TIME: (u32, u32) = (18, 0);
const SLOT_MINUTES: i64 = 30;

const ORDER_NOT_FOUND: &str = "Order not found";

pub struct OrderService {
    orders: Arc<dyn OrderStore>,
    products: Arc<dyn ProductStore>,
    predicate_mode: PredicateMode,
}

impl OrderService {
    pub fn new(orders: Arc<dyn OrderStore>, products: Arc<dyn ProductStore>) -> Self {
        Self {
            orders,
            products,
            predicate_mode: PredicateMode::default(),
        }
    }

    pub fn with_predicate_mode(mut self, mode: PredicateMode) -> Self {
        self.predicate_mode = mode;
        self
    }

    /// Price the cart and persist the order with its lines
    pub async fn place_order(&self, form: &PlaceOrderForm, caller: &Caller) -> AppResult<Order> {
        if form.products.is_empty() {
            return Err(AppError::validation("The order has no products"));
        }
        if form
            .products
            .iter()
            .any(|item| !item.quantity.is_finite() || item.quantity <= 0.0)
        {
            return Err(AppError::validation("Product quantities must be positive"));
        }
        if form.freight_value_cents < 0 {
            return Err(AppError::validation("Freight cannot be negative"));
        }

        let ids: Vec<i64> = form
            .products
            .iter()
            .map(|item| item.id)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let products = self.products.find_products(&ProductQuery::by_ids(ids.clone())).await?;

        if products.len() != ids.len() {
            return Err(AppError::not_found("One of the products was not found"));
        }

        let mut total_product_value_cents = 0i64;
        for item in &form.products {
            let product = products
                .iter()
                .find(|p| p.id == item.id)
                .ok_or_else(|| AppError::not_found("One of the products was not found"))?;
            total_product_value_cents = line_total_cents(product.actual_value_cents, item.quantity)
                .and_then(|line| total_product_value_cents.checked_add(line))
                .ok_or_else(order_too_large)?;
        }
        let total_value_cents = total_product_value_cents
            .checked_add(form.freight_value_cents)
            .ok_or_else(order_too_large)?;

        let new_order = NewOrder {
            order_type: form.order_type,
            card_code: form.card_code.clone(),
            total_value_cents,
            total_product_value_cents,
            total_freight_value_cents: form.freight_value_cents,
            get_on_market: form.get_on_market,
            change_value_cents: form.change_value_cents,
            receive_date: form.receive_date,
            receive_time: form.receive_time,
            user_id: caller.customer_id(),
            creation_date: now(),
            lines: form.products.iter().map(|item| (item.id, item.quantity)).collect(),
        };

        let order = self.orders.insert_order(&new_order).await?;
        info!(
            order_id = order.id,
            total_value_cents = order.total_value_cents,
            lines = new_order.lines.len(),
            "Order placed"
        );
        Ok(order)
    }

    pub async fn find_by_id(&self, order_id: i64) -> AppResult<Order> {
        self.orders
            .find_order(order_id)
            .await?
            .ok_or_else(|| AppError::not_found(ORDER_NOT_FOUND))
    }

    pub async fn update_status(&self, form: &UpdateStatusForm) -> AppResult<Order> {
        self.find_by_id(form.order_id).await?;

        let change = OrderStatusChange {
            status: form.order_status,
            deleted_reason: None,
            who_deleted: None,
            at: now(),
        };
        self.orders.change_order_status(form.order_id, &change).await?;
        info!(order_id = form.order_id, status = ?form.order_status, "Order status changed");

        self.find_by_id(form.order_id).await
    }

    /// Back-office cancellation, allowed in any status
    pub async fn backoffice_cancel(&self, form: &CancelOrderForm) -> AppResult<Order> {
        self.find_by_id(form.order_id).await?;
        self.cancel(form, WhoDeleted::Backoffice, &[]).await
    }

    /// Customer cancellation, refused once the order is on its way.
    ///
    /// The status guard is applied again by the store, so a concurrent move to
    /// SENDING wins over the cancellation.
    pub async fn client_cancel(&self, form: &CancelOrderForm, caller: &Caller) -> AppResult<Order> {
        let order = self.find_by_id(form.order_id).await?;

        if let Some(user_id) = caller.customer_id() {
            if order.user_id != Some(user_id) {
                return Err(AppError::not_found(ORDER_NOT_FOUND));
            }
        }

        if !order.status.client_can_cancel() {
            warn!(order_id = order.id, status = ?order.status, "Client tried to cancel a shipped order");
            return Err(AppError::conflict(
                "An order can only be cancelled before it is being sent",
            ));
        }

        self.cancel(form, WhoDeleted::Client, &OrderStatus::CLIENT_CANCELLABLE).await
    }

    /// Cancel while the order is in one of `from` (any status when empty)
    async fn cancel(&self, form: &CancelOrderForm, who: WhoDeleted, from: &[OrderStatus]) -> AppResult<Order> {
        let change = OrderStatusChange {
            status: OrderStatus::Canceled,
            deleted_reason: Some(form.reason.clone()),
            who_deleted: Some(who),
            at: now(),
        };
        if !self.orders.change_order_status_from(form.order_id, from, &change).await? {
            warn!(order_id = form.order_id, "Order changed status before it could be cancelled");
            return Err(AppError::conflict(
                "An order can only be cancelled before it is being sent",
            ));
        }
        info!(order_id = form.order_id, who = ?who, "Order cancelled");

        self.find_by_id(form.order_id).await
    }

    /// Ordered quantities with the product they refer to
    pub async fn find_products_from_order(&self, order_id: i64) -> AppResult<Vec<OrderProductLine>> {
        let lines = self.orders.find_order_lines(order_id).await?;
        let ids: Vec<i64> = lines.iter().map(|l| l.product_id).collect();
        let products = if ids.is_empty() {
            Vec::new()
        } else {
            self.products.find_products(&ProductQuery::by_ids(ids)).await?
        };

        Ok(lines
            .into_iter()
            .filter_map(|line| {
                products.iter().find(|p| p.id == line.product_id).map(|p| OrderProductLine {
                    quantity: line.quantity,
                    product: ProductRef {
                        id: p.id,
                        name: p.name.clone(),
                    },
                })
            })
            .collect())
    }

    /// Customers only see their own orders
    pub async fn find_all_filtered_paginated(
        &self,
        pagination: PaginationRequest,
        filters: &[FilterForm],
        caller: &Caller,
    ) -> AppResult<PaginatedResult<Order>> {
        let mut listing = build_listing(pagination, filters, &ORDER_COLUMNS, self.predicate_mode)?;

        if let Some(user_id) = caller.customer_id() {
            listing = listing.with_scope(Predicate::Compare {
                column: "ord_use_id",
                op: Comparison::Eq,
                value: Scalar::Int(user_id),
            });
        }

        let (data, total) = self.orders.list_orders(&listing).await?;
        Ok(PaginatedResult::new(data, total, pagination.page, pagination.take))
    }

    /// Free delivery slots on a `DD/MM/YYYY` date
    pub async fn find_active_dates(&self, date: &str) -> AppResult<ActiveTimes> {
        let day = NaiveDate::parse_from_str(date.trim(), "%d/%m/%Y")
            .map_err(|_| AppError::validation(format!("Invalid date '{}', expected DD/MM/YYYY", date)))?;

        let booked: HashSet<(u32, u32)> = self
            .orders
            .find_receive_times(day)
            .await?
            .into_iter()
            .map(|t| (t.hour(), t.minute()))
            .collect();

        let active_times = delivery_slots()
            .into_iter()
            .filter(|slot| !booked.contains(&(slot.hour(), slot.minute())))
            .map(|slot| TimeSlot {
                time: slot.format("%H:%M").to_string(),
            })
            .collect();

        Ok(ActiveTimes {
            date: date.to_string(),
            active_times,
        })
    }
}

/// Every slot from opening to closing time, both inclusive
fn delivery_slots() -> Vec<NaiveTime> {
    let (open_h, open_m) = OPENING_TIME;
    let (close_h, close_m) = CLOSING_TIME;
    let (Some(mut slot), Some(close)) = (
        NaiveTime::from_hms_opt(open_h, open_m, 0),
        NaiveTime::from_hms_opt(close_h, close_m, 0),
    ) else {
        return Vec::new();
    };

    let mut slots = Vec::new();
    while slot <= close {
        slots.push(slot);
        slot += Duration::minutes(SLOT_MINUTES);
    }
    slots
}
