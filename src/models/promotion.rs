//! Promotion models

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[repr(i32)]
pub enum PromotionStatus {
    Inactive = 0,
    Active = 1,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Promotion {
    #[sqlx(rename = "prm_id")]
    pub id: i64,
    #[sqlx(rename = "prm_title")]
    pub title: String,
    #[sqlx(rename = "prm_description")]
    pub description: String,
    #[sqlx(rename = "prm_img_url")]
    pub img_url: Option<String>,
    #[sqlx(rename = "prm_status")]
    pub status: PromotionStatus,
    /// Roles the promotion is shown to; 0 means everyone
    #[sqlx(rename = "prm_user_type", json)]
    pub user_types: Vec<i32>,
    #[sqlx(rename = "prm_creation_date")]
    pub creation_date: NaiveDateTime,
    #[sqlx(rename = "prm_update_date")]
    pub update_date: Option<NaiveDateTime>,
}

impl Promotion {
    pub fn visible_to(&self, roles: &[i32]) -> bool {
        self.user_types.iter().any(|t| roles.contains(t))
    }
}

/// Promotional price of one product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ProductPromotion {
    #[sqlx(rename = "pmo_id")]
    pub id: i64,
    #[sqlx(rename = "pmo_prm_id")]
    pub promotion_id: i64,
    #[sqlx(rename = "pmo_pro_id")]
    pub product_id: i64,
    #[sqlx(rename = "pmo_value_cents")]
    pub value_cents: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionProductForm {
    pub id: i64,
    pub value_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionForm {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub img_url: Option<String>,
    pub status: PromotionStatus,
    pub user_types: Vec<i32>,
    pub products: Vec<PromotionProductForm>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePromotionForm {
    pub id: i64,
    #[serde(flatten)]
    pub promotion: PromotionForm,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionActivationForm {
    pub promotion_id: i64,
    pub status: PromotionStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionWithProducts {
    #[serde(flatten)]
    pub promotion: Promotion,
    pub products: Vec<ProductPromotion>,
}
