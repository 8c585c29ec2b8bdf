//! Persistence traits used by the services
//!
//! [`MySqlStore`] backs them with the `db::*` query functions; the in-memory
//! store in `db::memory` implements the same traits for tests and local runs.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use sqlx::mysql::MySqlPool;

use crate::db::listing::Listing;
use crate::db::{category, order, product, promotion};
use crate::models::{
    Category, NewOrder, Order, OrderLine, OrderStatus, OrderStatusChange, Product, ProductForm,
    ProductPromotion, ProductStatus, Promotion, PromotionForm, PromotionStatus,
};
use crate::utils::errors::{AppError, AppResult};

/// Criteria for plain (unpaginated) product lookups. `None` means "any".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductQuery {
    pub ids: Option<Vec<i64>>,
    pub category_ids: Option<Vec<i64>>,
    pub status: Option<ProductStatus>,
}

impl ProductQuery {
    pub fn by_ids(ids: Vec<i64>) -> Self {
        Self {
            ids: Some(ids),
            ..Self::default()
        }
    }

    pub fn by_categories(category_ids: Vec<i64>) -> Self {
        Self {
            category_ids: Some(category_ids),
            ..Self::default()
        }
    }

    pub fn active(mut self) -> Self {
        self.status = Some(ProductStatus::Active);
        self
    }
}

#[async_trait]
pub trait CategoryStore: Send + Sync {
    async fn find_category(&self, category_id: i64) -> AppResult<Option<Category>>;

    async fn find_all_categories(&self) -> AppResult<Vec<Category>>;
}

#[async_trait]
pub trait ProductStore: Send + Sync {
    async fn insert_product(&self, form: &ProductForm, created_at: NaiveDateTime) -> AppResult<Product>;

    async fn update_product(&self, product_id: i64, form: &ProductForm, updated_at: NaiveDateTime) -> AppResult<()>;

    /// Returns whether the product existed
    async fn delete_product(&self, product_id: i64) -> AppResult<bool>;

    async fn find_product(&self, product_id: i64) -> AppResult<Option<Product>>;

    async fn find_products(&self, query: &ProductQuery) -> AppResult<Vec<Product>>;

    async fn set_product_status(&self, product_id: i64, status: ProductStatus) -> AppResult<()>;

    async fn set_product_stock(&self, product_id: i64, quantity_on_stock: i64) -> AppResult<()>;

    async fn set_product_image(&self, product_id: i64, img_url: &str) -> AppResult<()>;

    /// Page ordered by `pro_id ASC`, with the total match count
    async fn list_products(&self, listing: &Listing) -> AppResult<(Vec<Product>, u64)>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persist the order (status MADE) and its lines atomically
    async fn insert_order(&self, order: &NewOrder) -> AppResult<Order>;

    async fn find_order(&self, order_id: i64) -> AppResult<Option<Order>>;

    async fn change_order_status(&self, order_id: i64, change: &OrderStatusChange) -> AppResult<()>;

    /// Apply `change` only while the order is in one of `from`. Returns whether it was applied.
    async fn change_order_status_from(
        &self,
        order_id: i64,
        from: &[OrderStatus],
        change: &OrderStatusChange,
    ) -> AppResult<bool>;

    async fn set_order_payment(&self, order_id: i64, payment_id: &str) -> AppResult<()>;

    /// Atomically mark an order without payment as being paid. `false` when
    /// the order already has a payment or another claim.
    async fn claim_order_payment(&self, order_id: i64) -> AppResult<bool>;

    /// Drop the claim taken by [`Self::claim_order_payment`]; a recorded payment is kept
    async fn release_order_payment(&self, order_id: i64) -> AppResult<()>;

    async fn find_order_lines(&self, order_id: i64) -> AppResult<Vec<OrderLine>>;

    /// Receive times booked on `date` by orders that are not cancelled
    async fn find_receive_times(&self, date: NaiveDate) -> AppResult<Vec<NaiveTime>>;

    /// Page ordered by `ord_creation_date DESC`, with the total match count
    async fn list_orders(&self, listing: &Listing) -> AppResult<(Vec<Order>, u64)>;
}

#[async_trait]
pub trait PromotionStore: Send + Sync {
    /// Persist the promotion and its product links atomically.
    /// Fails with `NotFound` (writing nothing) when a linked product is missing.
    async fn insert_promotion(&self, form: &PromotionForm, created_at: NaiveDateTime) -> AppResult<Promotion>;

    /// Update fields and per-product values atomically
    async fn update_promotion(&self, promotion_id: i64, form: &PromotionForm, updated_at: NaiveDateTime) -> AppResult<()>;

    /// Delete links and promotion atomically. Returns whether the promotion existed.
    async fn delete_promotion(&self, promotion_id: i64) -> AppResult<bool>;

    async fn find_promotion(&self, promotion_id: i64) -> AppResult<Option<Promotion>>;

    async fn set_promotion_status(&self, promotion_id: i64, status: PromotionStatus) -> AppResult<()>;

    async fn set_promotion_image(&self, promotion_id: i64, img_url: &str) -> AppResult<()>;

    /// Promotions whose audience overlaps `roles`, ordered by ID
    async fn find_promotions_for_roles(&self, roles: &[i32], only_active: bool) -> AppResult<Vec<Promotion>>;

    async fn find_product_links(&self, promotion_ids: &[i64]) -> AppResult<Vec<ProductPromotion>>;

    /// Page ordered by `prm_id ASC`, with the total match count
    async fn list_promotions(&self, listing: &Listing) -> AppResult<(Vec<Promotion>, u64)>;
}

/// MySQL-backed store
#[derive(Debug, Clone)]
pub struct MySqlStore {
    pool: MySqlPool,
}

impl MySqlStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }
}

/// Row that must exist right after it was written
fn inserted<T>(row: Option<T>, what: &str, id: i64) -> AppResult<T> {
    row.ok_or_else(|| AppError::Internal(format!("{} {} vanished after insert", what, id)))
}

#[async_trait]
impl CategoryStore for MySqlStore {
    async fn find_category(&self, category_id: i64) -> AppResult<Option<Category>> {
        Ok(category::get_category_by_id(&self.pool, category_id).await?)
    }

    async fn find_all_categories(&self) -> AppResult<Vec<Category>> {
        Ok(category::get_all_categories(&self.pool).await?)
    }
}

#[async_trait]
impl ProductStore for MySqlStore {
    async fn insert_product(&self, form: &ProductForm, created_at: NaiveDateTime) -> AppResult<Product> {
        let product_id = product::create_product(&self.pool, form, created_at).await?;
        inserted(
            product::get_product_by_id(&self.pool, product_id).await?,
            "product",
            product_id,
        )
    }

    async fn update_product(&self, product_id: i64, form: &ProductForm, updated_at: NaiveDateTime) -> AppResult<()> {
        Ok(product::update_product(&self.pool, product_id, form, updated_at).await?)
    }

    async fn delete_product(&self, product_id: i64) -> AppResult<bool> {
        Ok(product::delete_product(&self.pool, product_id).await?)
    }

    async fn find_product(&self, product_id: i64) -> AppResult<Option<Product>> {
        Ok(product::get_product_by_id(&self.pool, product_id).await?)
    }

    async fn find_products(&self, query: &ProductQuery) -> AppResult<Vec<Product>> {
        Ok(product::find_products(&self.pool, query).await?)
    }

    async fn set_product_status(&self, product_id: i64, status: ProductStatus) -> AppResult<()> {
        Ok(product::set_status(&self.pool, product_id, status).await?)
    }

    async fn set_product_stock(&self, product_id: i64, quantity_on_stock: i64) -> AppResult<()> {
        Ok(product::set_stock(&self.pool, product_id, quantity_on_stock).await?)
    }

    async fn set_product_image(&self, product_id: i64, img_url: &str) -> AppResult<()> {
        Ok(product::set_image(&self.pool, product_id, img_url).await?)
    }

    async fn list_products(&self, listing: &Listing) -> AppResult<(Vec<Product>, u64)> {
        Ok(product::list_products(&self.pool, listing).await?)
    }
}

#[async_trait]
impl OrderStore for MySqlStore {
    async fn insert_order(&self, new_order: &NewOrder) -> AppResult<Order> {
        let order_id = order::create_order(&self.pool, new_order).await?;
        inserted(order::get_order_by_id(&self.pool, order_id).await?, "order", order_id)
    }

    async fn find_order(&self, order_id: i64) -> AppResult<Option<Order>> {
        Ok(order::get_order_by_id(&self.pool, order_id).await?)
    }

    async fn change_order_status(&self, order_id: i64, change: &OrderStatusChange) -> AppResult<()> {
        order::change_status(&self.pool, order_id, change, &[]).await?;
        Ok(())
    }

    async fn change_order_status_from(
        &self,
        order_id: i64,
        from: &[OrderStatus],
        change: &OrderStatusChange,
    ) -> AppResult<bool> {
        Ok(order::change_status(&self.pool, order_id, change, from).await?)
    }

    async fn set_order_payment(&self, order_id: i64, payment_id: &str) -> AppResult<()> {
        Ok(order::set_payment_id(&self.pool, order_id, payment_id).await?)
    }

    async fn claim_order_payment(&self, order_id: i64) -> AppResult<bool> {
        Ok(order::claim_payment(&self.pool, order_id).await?)
    }

    async fn release_order_payment(&self, order_id: i64) -> AppResult<()> {
        Ok(order::release_payment(&self.pool, order_id).await?)
    }

    async fn find_order_lines(&self, order_id: i64) -> AppResult<Vec<OrderLine>> {
        Ok(order::get_order_lines(&self.pool, order_id).await?)
    }

    async fn find_receive_times(&self, date: NaiveDate) -> AppResult<Vec<NaiveTime>> {
        Ok(order::get_receive_times(&self.pool, date).await?)
    }

    async fn list_orders(&self, listing: &Listing) -> AppResult<(Vec<Order>, u64)> {
        Ok(order::list_orders(&self.pool, listing).await?)
    }
}

#[async_trait]
impl PromotionStore for MySqlStore {
    async fn insert_promotion(&self, form: &PromotionForm, created_at: NaiveDateTime) -> AppResult<Promotion> {
        let promotion_id = promotion::create_promotion(&self.pool, form, created_at)
            .await?
            .ok_or_else(|| AppError::not_found("One of the products was not found"))?;

        inserted(
            promotion::get_promotion_by_id(&self.pool, promotion_id).await?,
            "promotion",
            promotion_id,
        )
    }

    async fn update_promotion(&self, promotion_id: i64, form: &PromotionForm, updated_at: NaiveDateTime) -> AppResult<()> {
        Ok(promotion::update_promotion(&self.pool, promotion_id, form, updated_at).await?)
    }

    async fn delete_promotion(&self, promotion_id: i64) -> AppResult<bool> {
        Ok(promotion::delete_promotion(&self.pool, promotion_id).await?)
    }

    async fn find_promotion(&self, promotion_id: i64) -> AppResult<Option<Promotion>> {
        Ok(promotion::get_promotion_by_id(&self.pool, promotion_id).await?)
    }

    async fn set_promotion_status(&self, promotion_id: i64, status: PromotionStatus) -> AppResult<()> {
        Ok(promotion::set_status(&self.pool, promotion_id, status).await?)
    }

    async fn set_promotion_image(&self, promotion_id: i64, img_url: &str) -> AppResult<()> {
        Ok(promotion::set_image(&self.pool, promotion_id, img_url).await?)
    }

    async fn find_promotions_for_roles(&self, roles: &[i32], only_active: bool) -> AppResult<Vec<Promotion>> {
        Ok(promotion::find_for_roles(&self.pool, roles, only_active).await?)
    }

    async fn find_product_links(&self, promotion_ids: &[i64]) -> AppResult<Vec<ProductPromotion>> {
        Ok(promotion::find_product_links(&self.pool, promotion_ids).await?)
    }

    async fn list_promotions(&self, listing: &Listing) -> AppResult<(Vec<Promotion>, u64)> {
        Ok(promotion::list_promotions(&self.pool, listing).await?)
    }
}
