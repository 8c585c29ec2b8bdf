use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

use crate::db::filter::{ColumnSet, FilterForm, PredicateMode};
use crate::db::PromotionStore;
use crate::models::{
    Caller, ProductPromotion, Promotion, PromotionActivationForm, PromotionForm,
    PromotionWithProducts, SaveImageForm, UpdatePromotionForm,
};
use crate::services::{build_listing, now};
use crate::utils::errors::{AppError, AppResult};
use crate::utils::page::{PaginatedResult, PaginationRequest};

pub const PROMOTION_COLUMNS: ColumnSet = ColumnSet {
    like: &["prm_title", "prm_description"],
    numbers: &["prm_status"],
    equal_strings: &[],
    numbers_array: &["prm_user_type"],
    dates: &["prm_creation_date"],
    value_cents: &[],
};

const PROMOTION_NOT_FOUND: &str = "Promotion not found";

pub struct PromotionService {
    promotions: Arc<dyn PromotionStore>,
    predicate_mode: PredicateMode,
}

impl PromotionService {
    pub fn new(promotions: Arc<dyn PromotionStore>) -> Self {
        Self {
            promotions,
            predicate_mode: PredicateMode::default(),
        }
    }

    pub fn with_predicate_mode(mut self, mode: PredicateMode) -> Self {
        self.predicate_mode = mode;
        self
    }

    fn validate_form(form: &PromotionForm) -> AppResult<()> {
        if form.title.trim().is_empty() {
            return Err(AppError::validation("Promotion title is required"));
        }
        if form.user_types.is_empty() {
            return Err(AppError::validation("Promotion needs at least one user type"));
        }
        if form.products.iter().any(|p| p.value_cents < 0) {
            return Err(AppError::validation("Promotion values cannot be negative"));
        }
        let mut seen = HashSet::new();
        if !form.products.iter().all(|p| seen.insert(p.id)) {
            return Err(AppError::validation("A product appears twice in the promotion"));
        }
        Ok(())
    }

    async fn require_promotion(&self, promotion_id: i64) -> AppResult<Promotion> {
        self.promotions
            .find_promotion(promotion_id)
            .await?
            .ok_or_else(|| AppError::not_found(PROMOTION_NOT_FOUND))
    }

    /// Create the promotion and its product links in one step
    pub async fn save(&self, form: &PromotionForm) -> AppResult<PromotionWithProducts> {
        Self::validate_form(form)?;

        let promotion = self.promotions.insert_promotion(form, now()).await?;
        info!(promotion_id = promotion.id, products = form.products.len(), "Promotion created");

        let products = self.promotions.find_product_links(&[promotion.id]).await?;
        Ok(PromotionWithProducts { promotion, products })
    }

    pub async fn update(&self, form: &UpdatePromotionForm) -> AppResult<PromotionWithProducts> {
        Self::validate_form(&form.promotion)?;
        self.require_promotion(form.id).await?;

        self.promotions.update_promotion(form.id, &form.promotion, now()).await?;
        info!(promotion_id = form.id, "Promotion updated");

        let promotion = self.require_promotion(form.id).await?;
        let products = self.promotions.find_product_links(&[form.id]).await?;
        Ok(PromotionWithProducts { promotion, products })
    }

    pub async fn delete(&self, promotion_id: i64) -> AppResult<()> {
        if !self.promotions.delete_promotion(promotion_id).await? {
            return Err(AppError::not_found(PROMOTION_NOT_FOUND));
        }
        info!(promotion_id, "Promotion deleted");
        Ok(())
    }

    pub async fn activation(&self, form: &PromotionActivationForm) -> AppResult<()> {
        self.require_promotion(form.promotion_id).await?;
        self.promotions.set_promotion_status(form.promotion_id, form.status).await?;
        info!(promotion_id = form.promotion_id, status = ?form.status, "Promotion status changed");
        Ok(())
    }

    pub async fn save_image(&self, form: &SaveImageForm) -> AppResult<()> {
        self.require_promotion(form.id).await?;
        self.promotions.set_promotion_image(form.id, &form.img_url).await
    }

    /// Promotions the caller may see, each with its product links
    pub async fn find_promotions_for_roles(&self, caller: &Caller) -> AppResult<Vec<PromotionWithProducts>> {
        let promotions = self
            .promotions
            .find_promotions_for_roles(&caller.visible_roles(), false)
            .await?;

        let ids: Vec<i64> = promotions.iter().map(|p| p.id).collect();
        let links = self.find_all_products_by_promotion_ids(&ids).await?;

        Ok(promotions
            .into_iter()
            .map(|promotion| {
                let products = links
                    .iter()
                    .filter(|l| l.promotion_id == promotion.id)
                    .cloned()
                    .collect();
                PromotionWithProducts { promotion, products }
            })
            .collect())
    }

    /// Product links of the active promotions visible to the caller
    pub async fn find_active_promotion_products(&self, caller: &Caller) -> AppResult<Vec<ProductPromotion>> {
        let promotions = self
            .promotions
            .find_promotions_for_roles(&caller.visible_roles(), true)
            .await?;
        let ids: Vec<i64> = promotions.iter().map(|p| p.id).collect();
        self.find_all_products_by_promotion_ids(&ids).await
    }

    pub async fn find_all_products_by_promotion_ids(&self, promotion_ids: &[i64]) -> AppResult<Vec<ProductPromotion>> {
        if promotion_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.promotions.find_product_links(promotion_ids).await
    }

    pub async fn find_all_filtered_paginated(
        &self,
        pagination: PaginationRequest,
        filters: &[FilterForm],
    ) -> AppResult<PaginatedResult<Promotion>> {
        let listing = build_listing(pagination, filters, &PROMOTION_COLUMNS, self.predicate_mode)?;
        let (data, total) = self.promotions.list_promotions(&listing).await?;
        Ok(PaginatedResult::new(data, total, pagination.page, pagination.take))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{InMemoryStore, ProductStore};
    use crate::models::{ProductForm, PromotionProductForm, PromotionStatus};
    use serde_json::json;

    fn service(store: &InMemoryStore) -> PromotionService {
        PromotionService::new(Arc::new(store.clone()))
    }

    async fn seed_products(store: &InMemoryStore, count: usize) -> Vec<i64> {
        let category = store.add_category("Grains", None).await;
        let mut ids = Vec::new();
        for i in 0..count {
            let product = store
                .insert_product(
                    &ProductForm {
                        name: format!("Product {}", i),
                        description: String::new(),
                        img_url: None,
                        product_type: 0,
                        actual_value_cents: 1000,
                        last_value_cents: 1000,
                        category_id: category.id,
                        quantity_on_stock: None,
                    },
                    now(),
                )
                .await
                .unwrap();
            ids.push(product.id);
        }
        ids
    }

    fn form(title: &str, user_types: Vec<i32>, products: &[(i64, i64)]) -> PromotionForm {
        PromotionForm {
            title: title.into(),
            description: format!("{} deals", title),
            img_url: None,
            status: PromotionStatus::Active,
            user_types,
            products: products
                .iter()
                .map(|(id, value_cents)| PromotionProductForm {
                    id: *id,
                    value_cents: *value_cents,
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_save_links_products() {
        let store = InMemoryStore::new();
        let service = service(&store);
        let ids = seed_products(&store, 2).await;

        let saved = service
            .save(&form("Week", vec![0], &[(ids[0], 800), (ids[1], 900)]))
            .await
            .unwrap();
        assert_eq!(saved.products.len(), 2);
        assert_eq!(saved.products[1].value_cents, 900);
    }

    #[tokio::test]
    async fn test_save_with_unknown_product_writes_nothing() {
        let store = InMemoryStore::new();
        let service = service(&store);
        let ids = seed_products(&store, 1).await;

        let err = service
            .save(&form("Week", vec![0], &[(ids[0], 800), (999, 100)]))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        let all = service
            .find_all_filtered_paginated(PaginationRequest::new(1, 10), &[])
            .await
            .unwrap();
        assert_eq!(all.all_results_count, 0);
    }

    #[tokio::test]
    async fn test_save_rejects_duplicate_products() {
        let store = InMemoryStore::new();
        let service = service(&store);
        let ids = seed_products(&store, 1).await;

        assert!(matches!(
            service.save(&form("Week", vec![0], &[(ids[0], 800), (ids[0], 700)])).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_update_changes_values() {
        let store = InMemoryStore::new();
        let service = service(&store);
        let ids = seed_products(&store, 1).await;
        let saved = service.save(&form("Week", vec![0], &[(ids[0], 800)])).await.unwrap();

        let updated = service
            .update(&UpdatePromotionForm {
                id: saved.promotion.id,
                promotion: form("Weekend", vec![0, 2], &[(ids[0], 650)]),
            })
            .await
            .unwrap();
        assert_eq!(updated.promotion.title, "Weekend");
        assert_eq!(updated.promotion.user_types, vec![0, 2]);
        assert_eq!(updated.products[0].value_cents, 650);

        let missing = UpdatePromotionForm {
            id: 999,
            promotion: form("X", vec![0], &[]),
        };
        assert!(matches!(service.update(&missing).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_removes_links() {
        let store = InMemoryStore::new();
        let service = service(&store);
        let ids = seed_products(&store, 1).await;
        let saved = service.save(&form("Week", vec![0], &[(ids[0], 800)])).await.unwrap();

        service.delete(saved.promotion.id).await.unwrap();
        assert!(service
            .find_all_products_by_promotion_ids(&[saved.promotion.id])
            .await
            .unwrap()
            .is_empty());
        assert!(matches!(service.delete(saved.promotion.id).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_visibility_by_role() {
        let store = InMemoryStore::new();
        let service = service(&store);
        let ids = seed_products(&store, 3).await;

        let everyone = service.save(&form("Everyone", vec![0], &[(ids[0], 100)])).await.unwrap();
        let premium = service.save(&form("Premium", vec![2], &[(ids[1], 200)])).await.unwrap();
        let hidden = service.save(&form("Hidden", vec![2], &[(ids[2], 300)])).await.unwrap();
        service
            .activation(&PromotionActivationForm {
                promotion_id: hidden.promotion.id,
                status: PromotionStatus::Inactive,
            })
            .await
            .unwrap();

        let anonymous = service.find_promotions_for_roles(&Caller::Anonymous).await.unwrap();
        assert_eq!(anonymous.len(), 1);
        assert_eq!(anonymous[0].promotion.id, everyone.promotion.id);
        assert_eq!(anonymous[0].products.len(), 1);

        let customer = Caller::Customer { user_id: 1, role: 2 };
        let visible = service.find_promotions_for_roles(&customer).await.unwrap();
        assert_eq!(visible.len(), 3);

        let active_products = service.find_active_promotion_products(&customer).await.unwrap();
        let promotion_ids: HashSet<i64> = active_products.iter().map(|l| l.promotion_id).collect();
        assert_eq!(
            promotion_ids,
            HashSet::from([everyone.promotion.id, premium.promotion.id])
        );
    }

    #[tokio::test]
    async fn test_filter_by_user_type() {
        let store = InMemoryStore::new();
        let service = service(&store);
        service.save(&form("Everyone", vec![0], &[])).await.unwrap();
        service.save(&form("Premium", vec![1, 2], &[])).await.unwrap();

        let filters = vec![FilterForm {
            field: Some("prm_user_type".into()),
            operator: Some("equals".into()),
            value: json!(2),
        }];
        let result = service
            .find_all_filtered_paginated(PaginationRequest::new(1, 10), &filters)
            .await
            .unwrap();
        assert_eq!(result.all_results_count, 1);
        assert_eq!(result.data[0].title, "Premium");
    }

    #[tokio::test]
    async fn test_image_requires_promotion() {
        let store = InMemoryStore::new();
        let service = service(&store);
        let form = SaveImageForm {
            id: 42,
            img_url: "https://cdn.example.com/p.png".into(),
        };
        assert!(matches!(service.save_image(&form).await, Err(AppError::NotFound(_))));
    }
}
