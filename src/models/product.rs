//! Product models

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::models::category::Category;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[repr(i32)]
pub enum ProductStatus {
    Inactive = 0,
    Active = 1,
}

/// Product row. Amounts are in cents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    #[sqlx(rename = "pro_id")]
    pub id: i64,
    #[sqlx(rename = "pro_name")]
    pub name: String,
    #[sqlx(rename = "pro_description")]
    pub description: String,
    #[sqlx(rename = "pro_img_url")]
    pub img_url: Option<String>,
    #[sqlx(rename = "pro_type")]
    pub product_type: i32,
    #[sqlx(rename = "pro_actual_value")]
    pub actual_value_cents: i64,
    #[sqlx(rename = "pro_last_value")]
    pub last_value_cents: i64,
    #[sqlx(rename = "pro_status")]
    pub status: ProductStatus,
    #[sqlx(rename = "pro_quantity_on_stock")]
    pub quantity_on_stock: i64,
    #[sqlx(rename = "pro_cat_id")]
    pub category_id: i64,
    #[sqlx(rename = "pro_creation_date")]
    pub creation_date: NaiveDateTime,
    #[sqlx(rename = "pro_update_date")]
    pub update_date: Option<NaiveDateTime>,
}

/// Fields written on create and update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductForm {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub img_url: Option<String>,
    pub product_type: i32,
    pub actual_value_cents: i64,
    pub last_value_cents: i64,
    pub category_id: i64,
    #[serde(default)]
    pub quantity_on_stock: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProductForm {
    pub id: i64,
    #[serde(flatten)]
    pub product: ProductForm,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductActivationForm {
    pub id: i64,
    pub status: ProductStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStockForm {
    pub id: i64,
    pub quantity_on_stock: i64,
}

/// Image update, shared by products and promotions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveImageForm {
    pub id: i64,
    pub img_url: String,
}

/// Product row together with the value it has inside one promotion
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductWithPromotion {
    #[serde(flatten)]
    pub product: Product,
    pub promotion_value_cents: i64,
}

/// Active products of one category
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryProducts {
    pub category: Category,
    pub products: Vec<Product>,
}
