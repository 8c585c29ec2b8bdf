use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::db::filter::{ColumnValue, FilterRow};
use crate::db::listing::{paginate, Listing};
use crate::db::store::{CategoryStore, OrderStore, ProductQuery, ProductStore, PromotionStore};
use crate::models::{
    Category, NewOrder, Order, OrderLine, OrderStatus, OrderStatusChange, Product, ProductForm,
    ProductPromotion, ProductStatus, Promotion, PromotionForm, PromotionStatus,
    PAYMENT_IN_PROGRESS,
};
use crate::utils::errors::{AppError, AppResult};

impl FilterRow for Product {
    fn column(&self, name: &str) -> ColumnValue {
        match name {
            "pro_id" => ColumnValue::Int(self.id),
            "pro_name" => ColumnValue::Text(self.name.clone()),
            "pro_description" => ColumnValue::Text(self.description.clone()),
            "pro_type" => ColumnValue::Int(self.product_type.into()),
            "pro_actual_value" => ColumnValue::Int(self.actual_value_cents),
            "pro_last_value" => ColumnValue::Int(self.last_value_cents),
            "pro_status" => ColumnValue::Int(self.status as i64),
            "pro_quantity_on_stock" => ColumnValue::Int(self.quantity_on_stock),
            "pro_cat_id" => ColumnValue::Int(self.category_id),
            "pro_creation_date" => ColumnValue::DateTime(self.creation_date),
            "pro_update_date" => self.update_date.into(),
            _ => ColumnValue::Null,
        }
    }
}

impl FilterRow for Order {
    fn column(&self, name: &str) -> ColumnValue {
        match name {
            "ord_id" => ColumnValue::Int(self.id),
            "ord_type" => ColumnValue::Int(self.order_type as i64),
            "ord_status" => ColumnValue::Int(self.status as i64),
            "ord_use_id" => self.user_id.into(),
            "ord_get_on_market" => ColumnValue::Bool(self.get_on_market),
            "ord_total_value_cents" => ColumnValue::Int(self.total_value_cents),
            "ord_total_product_value_cents" => ColumnValue::Int(self.total_product_value_cents),
            "ord_total_freight_value_cents" => ColumnValue::Int(self.total_freight_value_cents),
            "ord_change_value_cents" => self.change_value_cents.into(),
            "ord_creation_date" => ColumnValue::DateTime(self.creation_date),
            _ => ColumnValue::Null,
        }
    }
}

impl FilterRow for Promotion {
    fn column(&self, name: &str) -> ColumnValue {
        match name {
            "prm_id" => ColumnValue::Int(self.id),
            "prm_title" => ColumnValue::Text(self.title.clone()),
            "prm_description" => ColumnValue::Text(self.description.clone()),
            "prm_status" => ColumnValue::Int(self.status as i64),
            "prm_user_type" => {
                ColumnValue::IntList(self.user_types.iter().map(|t| i64::from(*t)).collect())
            }
            "prm_creation_date" => ColumnValue::DateTime(self.creation_date),
            _ => ColumnValue::Null,
        }
    }
}

#[derive(Debug, Default)]
struct State {
    next_id: i64,
    categories: BTreeMap<i64, Category>,
    products: BTreeMap<i64, Product>,
    orders: BTreeMap<i64, Order>,
    order_lines: Vec<OrderLine>,
    promotions: BTreeMap<i64, Promotion>,
    product_promotions: Vec<ProductPromotion>,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// A thread-safe in-memory store implementing every store trait.
///
/// Each write takes the single lock once, so multi-row writes are atomic.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a category
    pub async fn add_category(&self, name: &str, sub_category_of_id: Option<i64>) -> Category {
        let mut state = self.state.write().await;
        let category = Category {
            id: state.next_id(),
            name: name.to_string(),
            sub_category_of_id,
        };
        state.categories.insert(category.id, category.clone());
        category
    }

    /// Overwrite the creation date of an order
    pub async fn backdate_order(&self, order_id: i64, creation_date: NaiveDateTime) {
        if let Some(order) = self.state.write().await.orders.get_mut(&order_id) {
            order.creation_date = creation_date;
        }
    }
}

#[async_trait]
impl CategoryStore for InMemoryStore {
    async fn find_category(&self, category_id: i64) -> AppResult<Option<Category>> {
        Ok(self.state.read().await.categories.get(&category_id).cloned())
    }

    async fn find_all_categories(&self) -> AppResult<Vec<Category>> {
        Ok(self.state.read().await.categories.values().cloned().collect())
    }
}

#[async_trait]
impl ProductStore for InMemoryStore {
    async fn insert_product(&self, form: &ProductForm, created_at: NaiveDateTime) -> AppResult<Product> {
        let mut state = self.state.write().await;
        let product = Product {
            id: state.next_id(),
            name: form.name.clone(),
            description: form.description.clone(),
            img_url: form.img_url.clone(),
            product_type: form.product_type,
            actual_value_cents: form.actual_value_cents,
            last_value_cents: form.last_value_cents,
            status: ProductStatus::Active,
            quantity_on_stock: form.quantity_on_stock.unwrap_or(0),
            category_id: form.category_id,
            creation_date: created_at,
            update_date: None,
        };
        state.products.insert(product.id, product.clone());
        Ok(product)
    }

    async fn update_product(&self, product_id: i64, form: &ProductForm, updated_at: NaiveDateTime) -> AppResult<()> {
        if let Some(product) = self.state.write().await.products.get_mut(&product_id) {
            product.name = form.name.clone();
            product.description = form.description.clone();
            if form.img_url.is_some() {
                product.img_url = form.img_url.clone();
            }
            product.product_type = form.product_type;
            product.actual_value_cents = form.actual_value_cents;
            product.last_value_cents = form.last_value_cents;
            product.category_id = form.category_id;
            if let Some(quantity) = form.quantity_on_stock {
                product.quantity_on_stock = quantity;
            }
            product.update_date = Some(updated_at);
        }
        Ok(())
    }

    async fn delete_product(&self, product_id: i64) -> AppResult<bool> {
        Ok(self.state.write().await.products.remove(&product_id).is_some())
    }

    async fn find_product(&self, product_id: i64) -> AppResult<Option<Product>> {
        Ok(self.state.read().await.products.get(&product_id).cloned())
    }

    async fn find_products(&self, query: &ProductQuery) -> AppResult<Vec<Product>> {
        let state = self.state.read().await;
        Ok(state
            .products
            .values()
            .filter(|p| query.ids.as_ref().map_or(true, |ids| ids.contains(&p.id)))
            .filter(|p| {
                query
                    .category_ids
                    .as_ref()
                    .map_or(true, |ids| ids.contains(&p.category_id))
            })
            .filter(|p| query.status.map_or(true, |s| p.status == s))
            .cloned()
            .collect())
    }

    async fn set_product_status(&self, product_id: i64, status: ProductStatus) -> AppResult<()> {
        if let Some(product) = self.state.write().await.products.get_mut(&product_id) {
            product.status = status;
        }
        Ok(())
    }

    async fn set_product_stock(&self, product_id: i64, quantity_on_stock: i64) -> AppResult<()> {
        if let Some(product) = self.state.write().await.products.get_mut(&product_id) {
            product.quantity_on_stock = quantity_on_stock;
        }
        Ok(())
    }

    async fn set_product_image(&self, product_id: i64, img_url: &str) -> AppResult<()> {
        if let Some(product) = self.state.write().await.products.get_mut(&product_id) {
            product.img_url = Some(img_url.to_string());
        }
        Ok(())
    }

    async fn list_products(&self, listing: &Listing) -> AppResult<(Vec<Product>, u64)> {
        let state = self.state.read().await;
        Ok(paginate(state.products.values().cloned(), listing))
    }
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn insert_order(&self, new_order: &NewOrder) -> AppResult<Order> {
        let mut state = self.state.write().await;

        let order = Order {
            id: state.next_id(),
            card_code: new_order.card_code.clone(),
            order_type: new_order.order_type,
            status: OrderStatus::Made,
            total_value_cents: new_order.total_value_cents,
            total_product_value_cents: new_order.total_product_value_cents,
            total_freight_value_cents: new_order.total_freight_value_cents,
            get_on_market: new_order.get_on_market,
            change_value_cents: new_order.change_value_cents,
            receive_date: new_order.receive_date,
            receive_time: new_order.receive_time,
            user_id: new_order.user_id,
            payment_id: None,
            deleted_reason: None,
            who_deleted: None,
            delete_date: None,
            creation_date: new_order.creation_date,
            update_date: None,
        };

        for (product_id, quantity) in &new_order.lines {
            let line = OrderLine {
                id: state.next_id(),
                order_id: order.id,
                product_id: *product_id,
                quantity: *quantity,
            };
            state.order_lines.push(line);
        }

        state.orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn find_order(&self, order_id: i64) -> AppResult<Option<Order>> {
        Ok(self.state.read().await.orders.get(&order_id).cloned())
    }

    async fn change_order_status(&self, order_id: i64, change: &OrderStatusChange) -> AppResult<()> {
        self.change_order_status_from(order_id, &[], change).await?;
        Ok(())
    }

    async fn change_order_status_from(
        &self,
        order_id: i64,
        from: &[OrderStatus],
        change: &OrderStatusChange,
    ) -> AppResult<bool> {
        let mut state = self.state.write().await;
        let Some(order) = state.orders.get_mut(&order_id) else {
            return Ok(false);
        };
        if !from.is_empty() && !from.contains(&order.status) {
            return Ok(false);
        }

        order.status = change.status;
        order.update_date = Some(change.at);
        if change.deleted_reason.is_some() {
            order.deleted_reason = change.deleted_reason.clone();
        }
        if change.who_deleted.is_some() {
            order.who_deleted = change.who_deleted;
            order.delete_date = Some(change.at);
        }
        Ok(true)
    }

    async fn set_order_payment(&self, order_id: i64, payment_id: &str) -> AppResult<()> {
        if let Some(order) = self.state.write().await.orders.get_mut(&order_id) {
            order.payment_id = Some(payment_id.to_string());
        }
        Ok(())
    }

    async fn claim_order_payment(&self, order_id: i64) -> AppResult<bool> {
        let mut state = self.state.write().await;
        match state.orders.get_mut(&order_id) {
            Some(order) if order.payment_id.is_none() => {
                order.payment_id = Some(PAYMENT_IN_PROGRESS.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_order_payment(&self, order_id: i64) -> AppResult<()> {
        if let Some(order) = self.state.write().await.orders.get_mut(&order_id) {
            if order.payment_id.as_deref() == Some(PAYMENT_IN_PROGRESS) {
                order.payment_id = None;
            }
        }
        Ok(())
    }

    async fn find_order_lines(&self, order_id: i64) -> AppResult<Vec<OrderLine>> {
        let state = self.state.read().await;
        Ok(state
            .order_lines
            .iter()
            .filter(|line| line.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn find_receive_times(&self, date: NaiveDate) -> AppResult<Vec<NaiveTime>> {
        let state = self.state.read().await;
        Ok(state
            .orders
            .values()
            .filter(|o| o.receive_date == Some(date) && o.status != OrderStatus::Canceled)
            .filter_map(|o| o.receive_time)
            .collect())
    }

    async fn list_orders(&self, listing: &Listing) -> AppResult<(Vec<Order>, u64)> {
        let state = self.state.read().await;
        let mut orders: Vec<Order> = state.orders.values().cloned().collect();
        orders.sort_by(|a, b| b.creation_date.cmp(&a.creation_date));
        Ok(paginate(orders, listing))
    }
}

#[async_trait]
impl PromotionStore for InMemoryStore {
    async fn insert_promotion(&self, form: &PromotionForm, created_at: NaiveDateTime) -> AppResult<Promotion> {
        let mut state = self.state.write().await;

        if form.products.iter().any(|p| !state.products.contains_key(&p.id)) {
            return Err(AppError::not_found("One of the products was not found"));
        }

        let promotion = Promotion {
            id: state.next_id(),
            title: form.title.clone(),
            description: form.description.clone(),
            img_url: form.img_url.clone(),
            status: form.status,
            user_types: form.user_types.clone(),
            creation_date: created_at,
            update_date: None,
        };

        for product in &form.products {
            let link = ProductPromotion {
                id: state.next_id(),
                promotion_id: promotion.id,
                product_id: product.id,
                value_cents: product.value_cents,
            };
            state.product_promotions.push(link);
        }

        state.promotions.insert(promotion.id, promotion.clone());
        Ok(promotion)
    }

    async fn update_promotion(&self, promotion_id: i64, form: &PromotionForm, updated_at: NaiveDateTime) -> AppResult<()> {
        let mut state = self.state.write().await;

        if let Some(promotion) = state.promotions.get_mut(&promotion_id) {
            promotion.title = form.title.clone();
            promotion.description = form.description.clone();
            if form.img_url.is_some() {
                promotion.img_url = form.img_url.clone();
            }
            promotion.status = form.status;
            promotion.user_types = form.user_types.clone();
            promotion.update_date = Some(updated_at);
        }

        for product in &form.products {
            for link in state
                .product_promotions
                .iter_mut()
                .filter(|l| l.promotion_id == promotion_id && l.product_id == product.id)
            {
                link.value_cents = product.value_cents;
            }
        }

        Ok(())
    }

    async fn delete_promotion(&self, promotion_id: i64) -> AppResult<bool> {
        let mut state = self.state.write().await;
        state.product_promotions.retain(|l| l.promotion_id != promotion_id);
        Ok(state.promotions.remove(&promotion_id).is_some())
    }

    async fn find_promotion(&self, promotion_id: i64) -> AppResult<Option<Promotion>> {
        Ok(self.state.read().await.promotions.get(&promotion_id).cloned())
    }

    async fn set_promotion_status(&self, promotion_id: i64, status: PromotionStatus) -> AppResult<()> {
        if let Some(promotion) = self.state.write().await.promotions.get_mut(&promotion_id) {
            promotion.status = status;
        }
        Ok(())
    }

    async fn set_promotion_image(&self, promotion_id: i64, img_url: &str) -> AppResult<()> {
        if let Some(promotion) = self.state.write().await.promotions.get_mut(&promotion_id) {
            promotion.img_url = Some(img_url.to_string());
        }
        Ok(())
    }

    async fn find_promotions_for_roles(&self, roles: &[i32], only_active: bool) -> AppResult<Vec<Promotion>> {
        let state = self.state.read().await;
        Ok(state
            .promotions
            .values()
            .filter(|p| p.visible_to(roles))
            .filter(|p| !only_active || p.status == PromotionStatus::Active)
            .cloned()
            .collect())
    }

    async fn find_product_links(&self, promotion_ids: &[i64]) -> AppResult<Vec<ProductPromotion>> {
        let state = self.state.read().await;
        Ok(state
            .product_promotions
            .iter()
            .filter(|l| promotion_ids.contains(&l.promotion_id))
            .cloned()
            .collect())
    }

    async fn list_promotions(&self, listing: &Listing) -> AppResult<(Vec<Promotion>, u64)> {
        let state = self.state.read().await;
        Ok(paginate(state.promotions.values().cloned(), listing))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PromotionProductForm;
    use chrono::NaiveDate;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 10)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn product_form(category_id: i64) -> ProductForm {
        ProductForm {
            name: "Rice".into(),
            description: "5kg".into(),
            img_url: None,
            product_type: 0,
            actual_value_cents: 2599,
            last_value_cents: 2899,
            category_id,
            quantity_on_stock: None,
        }
    }

    #[tokio::test]
    async fn test_promotion_with_missing_product_writes_nothing() {
        let store = InMemoryStore::new();
        let category = store.add_category("Grains", None).await;
        let product = store.insert_product(&product_form(category.id), now()).await.unwrap();

        let form = PromotionForm {
            title: "Week deals".into(),
            description: String::new(),
            img_url: None,
            status: PromotionStatus::Active,
            user_types: vec![0],
            products: vec![
                PromotionProductForm { id: product.id, value_cents: 1999 },
                PromotionProductForm { id: 9999, value_cents: 100 },
            ],
        };

        let result = store.insert_promotion(&form, now()).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));

        let visible = store.find_promotions_for_roles(&[0], false).await.unwrap();
        assert!(visible.is_empty());
        let state = store.state.read().await;
        assert!(state.product_promotions.is_empty());
    }

    #[tokio::test]
    async fn test_delete_promotion_removes_links() {
        let store = InMemoryStore::new();
        let category = store.add_category("Grains", None).await;
        let product = store.insert_product(&product_form(category.id), now()).await.unwrap();

        let form = PromotionForm {
            title: "Week deals".into(),
            description: String::new(),
            img_url: None,
            status: PromotionStatus::Active,
            user_types: vec![0],
            products: vec![PromotionProductForm { id: product.id, value_cents: 1999 }],
        };
        let promotion = store.insert_promotion(&form, now()).await.unwrap();

        assert!(store.delete_promotion(promotion.id).await.unwrap());
        assert!(store.find_product_links(&[promotion.id]).await.unwrap().is_empty());
        assert!(!store.delete_promotion(promotion.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_insert_order_with_lines() {
        let store = InMemoryStore::new();
        let order = store
            .insert_order(&NewOrder {
                order_type: crate::models::OrderType::Money,
                card_code: None,
                total_value_cents: 1500,
                total_product_value_cents: 1000,
                total_freight_value_cents: 500,
                get_on_market: false,
                change_value_cents: None,
                receive_date: None,
                receive_time: None,
                user_id: Some(7),
                creation_date: now(),
                lines: vec![(1, 2.0), (2, 0.5)],
            })
            .await
            .unwrap();

        assert_eq!(order.status, OrderStatus::Made);
        assert_eq!(store.find_order_lines(order.id).await.unwrap().len(), 2);
    }

    async fn order(store: &InMemoryStore) -> Order {
        store
            .insert_order(&NewOrder {
                order_type: crate::models::OrderType::Credit,
                card_code: None,
                total_value_cents: 1000,
                total_product_value_cents: 1000,
                total_freight_value_cents: 0,
                get_on_market: false,
                change_value_cents: None,
                receive_date: None,
                receive_time: None,
                user_id: Some(7),
                creation_date: now(),
                lines: vec![],
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_payment_claim_is_exclusive() {
        let store = InMemoryStore::new();
        let order = order(&store).await;

        assert!(store.claim_order_payment(order.id).await.unwrap());
        assert!(!store.claim_order_payment(order.id).await.unwrap());
        assert!(!store.claim_order_payment(9999).await.unwrap());

        store.release_order_payment(order.id).await.unwrap();
        assert!(store.find_order(order.id).await.unwrap().unwrap().payment_id.is_none());

        // A recorded payment survives a release
        assert!(store.claim_order_payment(order.id).await.unwrap());
        store.set_order_payment(order.id, "pay-1").await.unwrap();
        store.release_order_payment(order.id).await.unwrap();
        assert!(!store.claim_order_payment(order.id).await.unwrap());
        let stored = store.find_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.card_payment_id(), Some("pay-1"));
    }

    #[tokio::test]
    async fn test_guarded_status_change() {
        let store = InMemoryStore::new();
        let order = order(&store).await;
        let change = |status| OrderStatusChange {
            status,
            deleted_reason: None,
            who_deleted: None,
            at: now(),
        };

        store.change_order_status(order.id, &change(OrderStatus::Sending)).await.unwrap();

        let applied = store
            .change_order_status_from(order.id, &OrderStatus::CLIENT_CANCELLABLE, &change(OrderStatus::Canceled))
            .await
            .unwrap();
        assert!(!applied);
        assert_eq!(store.find_order(order.id).await.unwrap().unwrap().status, OrderStatus::Sending);

        let applied = store
            .change_order_status_from(order.id, &[OrderStatus::Sending], &change(OrderStatus::Sended))
            .await
            .unwrap();
        assert!(applied);
        assert_eq!(store.find_order(order.id).await.unwrap().unwrap().status, OrderStatus::Sended);
    }
}
