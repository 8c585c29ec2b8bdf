use chrono::{NaiveDate, NaiveTime};
use sqlx::mysql::MySqlPool;
use sqlx::{MySql, QueryBuilder};

use crate::db::listing::{fetch_page, Listing};
use crate::models::{NewOrder, Order, OrderLine, OrderStatus, OrderStatusChange, PAYMENT_IN_PROGRESS};

pub const ORDER_TABLE: &str = "ord_order";

/// Get an order by ID
pub async fn get_order_by_id(pool: &MySqlPool, order_id: i64) -> Result<Option<Order>, sqlx::Error> {
    sqlx::query_as::<_, Order>("SELECT * FROM ord_order WHERE ord_id = ?")
        .bind(order_id)
        .fetch_optional(pool)
        .await
}

/// Insert an order and all of its lines in one transaction, returns the order ID
pub async fn create_order(pool: &MySqlPool, order: &NewOrder) -> Result<i64, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let result = sqlx::query(
        "INSERT INTO ord_order (ord_card_code, ord_type, ord_status, ord_total_value_cents,
                                ord_total_product_value_cents, ord_total_freight_value_cents,
                                ord_get_on_market, ord_change_value_cents, ord_receive_date,
                                ord_receive_time, ord_use_id, ord_creation_date)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&order.card_code)
    .bind(order.order_type)
    .bind(OrderStatus::Made)
    .bind(order.total_value_cents)
    .bind(order.total_product_value_cents)
    .bind(order.total_freight_value_cents)
    .bind(order.get_on_market)
    .bind(order.change_value_cents)
    .bind(order.receive_date)
    .bind(order.receive_time)
    .bind(order.user_id)
    .bind(order.creation_date)
    .execute(&mut *tx)
    .await?;

    let order_id = result.last_insert_id() as i64;

    if !order.lines.is_empty() {
        let mut qb = QueryBuilder::<MySql>::new(
            "INSERT INTO orp_order_product (orp_ord_id, orp_pro_id, orp_quantity) ",
        );
        qb.push_values(order.lines.iter(), |mut row, (product_id, quantity)| {
            row.push_bind(order_id)
                .push_bind(*product_id)
                .push_bind(*quantity);
        });
        qb.build().execute(&mut *tx).await?;
    }

    tx.commit().await?;

    Ok(order_id)
}

/// `UPDATE` for a status change (and cancellation details when present).
///
/// With a non-empty `from`, the row only matches while its status is one of them.
fn status_update_sql<'a>(order_id: i64, change: &OrderStatusChange, from: &[OrderStatus]) -> QueryBuilder<'a, MySql> {
    let delete_date = change.who_deleted.map(|_| change.at);

    let mut qb = QueryBuilder::<MySql>::new("UPDATE ord_order SET ord_status = ");
    qb.push_bind(change.status)
        .push(", ord_update_date = ")
        .push_bind(change.at)
        .push(", ord_deleted_reason = COALESCE(")
        .push_bind(change.deleted_reason.clone())
        .push(", ord_deleted_reason), ord_user_type_who_deleted = COALESCE(")
        .push_bind(change.who_deleted)
        .push(", ord_user_type_who_deleted), ord_delete_date = COALESCE(")
        .push_bind(delete_date)
        .push(", ord_delete_date) WHERE ord_id = ")
        .push_bind(order_id);

    if !from.is_empty() {
        qb.push(" AND ord_status IN (");
        let mut statuses = qb.separated(", ");
        for status in from {
            statuses.push_bind(*status);
        }
        statuses.push_unseparated(")");
    }

    qb
}

/// Apply a status change; returns whether a row was updated
pub async fn change_status(
    pool: &MySqlPool,
    order_id: i64,
    change: &OrderStatusChange,
    from: &[OrderStatus],
) -> Result<bool, sqlx::Error> {
    let result = status_update_sql(order_id, change, from).build().execute(pool).await?;
    Ok(result.rows_affected() > 0)
}

/// Mark an order as being paid. Fails (returns false) when it already has a payment or a claim.
pub async fn claim_payment(pool: &MySqlPool, order_id: i64) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE ord_order SET ord_getnet_payment_id = ?
         WHERE ord_id = ? AND ord_getnet_payment_id IS NULL",
    )
    .bind(PAYMENT_IN_PROGRESS)
    .bind(order_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Drop an in-flight payment claim
pub async fn release_payment(pool: &MySqlPool, order_id: i64) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE ord_order SET ord_getnet_payment_id = NULL
         WHERE ord_id = ? AND ord_getnet_payment_id = ?",
    )
    .bind(order_id)
    .bind(PAYMENT_IN_PROGRESS)
    .execute(pool)
    .await?;
    Ok(())
}

/// Store the gateway payment ID on an order
pub async fn set_payment_id(pool: &MySqlPool, order_id: i64, payment_id: &str) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE ord_order SET ord_getnet_payment_id = ? WHERE ord_id = ?")
        .bind(payment_id)
        .bind(order_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn get_order_lines(pool: &MySqlPool, order_id: i64) -> Result<Vec<OrderLine>, sqlx::Error> {
    sqlx::query_as::<_, OrderLine>(
        "SELECT * FROM orp_order_product WHERE orp_ord_id = ? ORDER BY orp_id ASC",
    )
    .bind(order_id)
    .fetch_all(pool)
    .await
}

/// Receive times already booked on a day
pub async fn get_receive_times(pool: &MySqlPool, date: NaiveDate) -> Result<Vec<NaiveTime>, sqlx::Error> {
    sqlx::query_scalar::<_, NaiveTime>(
        "SELECT ord_receive_time FROM ord_order
         WHERE ord_receive_date = ? AND ord_receive_time IS NOT NULL AND ord_status <> ?",
    )
    .bind(date)
    .bind(OrderStatus::Canceled)
    .fetch_all(pool)
    .await
}

/// Filtered order page, newest first
pub async fn list_orders(pool: &MySqlPool, listing: &Listing) -> Result<(Vec<Order>, u64), sqlx::Error> {
    fetch_page(pool, ORDER_TABLE, "ord_creation_date DESC", listing).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WhoDeleted;
    use chrono::NaiveDate;

    fn cancellation() -> OrderStatusChange {
        OrderStatusChange {
            status: OrderStatus::Canceled,
            deleted_reason: Some("changed my mind".into()),
            who_deleted: Some(WhoDeleted::Client),
            at: NaiveDate::from_ymd_opt(2024, 5, 10)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap(),
        }
    }

    #[test]
    fn test_guarded_status_update_sql() {
        let qb = status_update_sql(7, &cancellation(), &OrderStatus::CLIENT_CANCELLABLE);
        assert!(qb.sql().ends_with("WHERE ord_id = ? AND ord_status IN (?, ?)"));
    }

    #[test]
    fn test_unguarded_status_update_sql() {
        let qb = status_update_sql(7, &cancellation(), &[]);
        assert!(qb.sql().ends_with("WHERE ord_id = ?"));
        assert!(qb.sql().starts_with("UPDATE ord_order SET ord_status = ?, ord_update_date = ?"));
    }
}
