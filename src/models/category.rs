//! Product category models

use serde::{Deserialize, Serialize};

/// Category row. `sub_category_of_id` points at the parent category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    #[sqlx(rename = "cat_id")]
    pub id: i64,
    #[sqlx(rename = "cat_name")]
    pub name: String,
    #[sqlx(rename = "cat_sub_category_of_id")]
    pub sub_category_of_id: Option<i64>,
}
