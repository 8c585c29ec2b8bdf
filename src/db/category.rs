use sqlx::mysql::MySqlPool;

use crate::models::Category;

/// Get a category by ID
pub async fn get_category_by_id(
    pool: &MySqlPool,
    category_id: i64,
) -> Result<Option<Category>, sqlx::Error> {
    sqlx::query_as::<_, Category>("SELECT * FROM cat_category WHERE cat_id = ?")
        .bind(category_id)
        .fetch_optional(pool)
        .await
}

/// Get all categories ordered by ID
pub async fn get_all_categories(pool: &MySqlPool) -> Result<Vec<Category>, sqlx::Error> {
    sqlx::query_as::<_, Category>("SELECT * FROM cat_category ORDER BY cat_id ASC")
        .fetch_all(pool)
        .await
}
