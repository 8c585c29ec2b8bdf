use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::db::filter::{ColumnSet, Comparison, FilterForm, Predicate, PredicateMode, Scalar};
use crate::db::{CategoryStore, ProductQuery, ProductStore, PromotionStore};
use crate::models::{
    Caller, CategoryProducts, Product, ProductActivationForm, ProductForm, ProductStatus,
    ProductWithPromotion, SaveImageForm, UpdateProductForm, UpdateStockForm,
};
use crate::services::{build_listing, now};
use crate::utils::errors::{AppError, AppResult};
use crate::utils::page::{PaginatedResult, PaginationRequest};

pub const PRODUCT_COLUMNS: ColumnSet = ColumnSet {
    like: &["pro_name", "pro_description"],
    numbers: &["pro_status", "pro_cat_id", "pro_quantity_on_stock"],
    equal_strings: &[],
    numbers_array: &[],
    dates: &["pro_creation_date"],
    value_cents: &["pro_actual_value", "pro_last_value"],
};

const CATEGORY_NOT_FOUND: &str = "Category not found";
const PRODUCT_NOT_FOUND: &str = "Product not found";

pub struct ProductService {
    products: Arc<dyn ProductStore>,
    categories: Arc<dyn CategoryStore>,
    promotions: Arc<dyn PromotionStore>,
    predicate_mode: PredicateMode,
}

impl ProductService {
    pub fn new(
        products: Arc<dyn ProductStore>,
        categories: Arc<dyn CategoryStore>,
        promotions: Arc<dyn PromotionStore>,
    ) -> Self {
        Self {
            products,
            categories,
            promotions,
            predicate_mode: PredicateMode::default(),
        }
    }

    pub fn with_predicate_mode(mut self, mode: PredicateMode) -> Self {
        self.predicate_mode = mode;
        self
    }

    fn validate_form(form: &ProductForm) -> AppResult<()> {
        if form.name.trim().is_empty() {
            return Err(AppError::validation("Product name is required"));
        }
        if form.actual_value_cents < 0 || form.last_value_cents < 0 {
            return Err(AppError::validation("Product values cannot be negative"));
        }
        if form.quantity_on_stock.is_some_and(|q| q < 0) {
            return Err(AppError::validation("Stock cannot be negative"));
        }
        Ok(())
    }

    async fn require_category(&self, category_id: i64) -> AppResult<()> {
        self.categories
            .find_category(category_id)
            .await?
            .map(|_| ())
            .ok_or_else(|| AppError::not_found(CATEGORY_NOT_FOUND))
    }

    async fn require_product(&self, product_id: i64) -> AppResult<Product> {
        self.products
            .find_product(product_id)
            .await?
            .ok_or_else(|| AppError::not_found(PRODUCT_NOT_FOUND))
    }

    /// Create a product in an existing category. Stock defaults to 0.
    pub async fn save_one(&self, form: &ProductForm) -> AppResult<Product> {
        Self::validate_form(form)?;
        self.require_category(form.category_id).await?;

        let product = self.products.insert_product(form, now()).await?;
        info!(product_id = product.id, category_id = product.category_id, "Product created");
        Ok(product)
    }

    pub async fn update_one(&self, form: &UpdateProductForm) -> AppResult<Product> {
        Self::validate_form(&form.product)?;
        self.require_product(form.id).await?;
        self.require_category(form.product.category_id).await?;

        self.products.update_product(form.id, &form.product, now()).await?;
        info!(product_id = form.id, "Product updated");
        self.require_product(form.id).await
    }

    pub async fn delete(&self, product_id: i64) -> AppResult<()> {
        if !self.products.delete_product(product_id).await? {
            return Err(AppError::not_found(PRODUCT_NOT_FOUND));
        }
        info!(product_id, "Product deleted");
        Ok(())
    }

    pub async fn find_by_id(&self, product_id: i64) -> AppResult<Product> {
        self.require_product(product_id).await
    }

    pub async fn find_many_by_ids(&self, ids: &[i64]) -> AppResult<Vec<Product>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.products.find_products(&ProductQuery::by_ids(ids.to_vec())).await
    }

    pub async fn find_all(&self) -> AppResult<Vec<Product>> {
        self.products.find_products(&ProductQuery::default()).await
    }

    pub async fn find_all_actives(&self) -> AppResult<Vec<Product>> {
        self.products.find_products(&ProductQuery::default().active()).await
    }

    /// Products directly in `category_id`
    pub async fn find_all_by_category_id(&self, category_id: i64) -> AppResult<Vec<Product>> {
        self.products
            .find_products(&ProductQuery::by_categories(vec![category_id]))
            .await
    }

    /// Products in `category_id` or any of its parent categories
    pub async fn find_all_products_by_category_id(&self, category_id: i64) -> AppResult<Vec<Product>> {
        let chain = self.category_chain(category_id).await?;
        if chain.is_empty() {
            return Ok(Vec::new());
        }
        self.products.find_products(&ProductQuery::by_categories(chain)).await
    }

    /// `category_id` followed by its ancestors. Empty if the category does not exist.
    async fn category_chain(&self, category_id: i64) -> AppResult<Vec<i64>> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut next = Some(category_id);

        while let Some(id) = next {
            if !seen.insert(id) {
                debug!(category_id = id, "Category cycle detected");
                break;
            }
            match self.categories.find_category(id).await? {
                Some(category) => {
                    chain.push(category.id);
                    next = category.sub_category_of_id;
                }
                None => break,
            }
        }

        Ok(chain)
    }

    /// Products linked to a promotion with their promotional value
    pub async fn find_all_products_from_promotion(&self, promotion_id: i64) -> AppResult<Vec<ProductWithPromotion>> {
        let links = self.promotions.find_product_links(&[promotion_id]).await?;
        let product_ids: Vec<i64> = links.iter().map(|l| l.product_id).collect();
        let products = self.find_many_by_ids(&product_ids).await?;

        Ok(products
            .into_iter()
            .map(|product| {
                let promotion_value_cents = links
                    .iter()
                    .find(|l| l.product_id == product.id)
                    .map_or(0, |l| l.value_cents);
                ProductWithPromotion {
                    product,
                    promotion_value_cents,
                }
            })
            .collect())
    }

    pub async fn activation(&self, form: &ProductActivationForm) -> AppResult<()> {
        self.require_product(form.id).await?;
        self.products.set_product_status(form.id, form.status).await?;
        info!(product_id = form.id, status = ?form.status, "Product status changed");
        Ok(())
    }

    pub async fn update_stock(&self, form: &UpdateStockForm) -> AppResult<()> {
        if form.quantity_on_stock < 0 {
            return Err(AppError::validation("Stock cannot be negative"));
        }
        self.require_product(form.id).await?;
        self.products.set_product_stock(form.id, form.quantity_on_stock).await
    }

    pub async fn update_image(&self, form: &SaveImageForm) -> AppResult<()> {
        self.require_product(form.id).await?;
        self.products.set_product_image(form.id, &form.img_url).await
    }

    /// Every category with its active products
    pub async fn find_all_products_with_categories(&self) -> AppResult<Vec<CategoryProducts>> {
        let categories = self.categories.find_all_categories().await?;
        let actives = self.find_all_actives().await?;

        Ok(categories
            .into_iter()
            .map(|category| {
                let products = actives
                    .iter()
                    .filter(|p| p.category_id == category.id)
                    .cloned()
                    .collect();
                CategoryProducts { category, products }
            })
            .collect())
    }

    /// Storefront customers only ever see active products
    pub async fn find_all_filtered_paginated(
        &self,
        pagination: PaginationRequest,
        filters: &[FilterForm],
        caller: &Caller,
    ) -> AppResult<PaginatedResult<Product>> {
        let mut listing = build_listing(pagination, filters, &PRODUCT_COLUMNS, self.predicate_mode)?;

        if caller.is_customer() {
            listing = listing.with_scope(Predicate::Compare {
                column: "pro_status",
                op: Comparison::Eq,
                value: Scalar::Int(ProductStatus::Active as i64),
            });
        }

        let (data, total) = self.products.list_products(&listing).await?;
        Ok(PaginatedResult::new(data, total, pagination.page, pagination.take))
    }
}
