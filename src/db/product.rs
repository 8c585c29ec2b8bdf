use chrono::NaiveDateTime;
use sqlx::mysql::MySqlPool;
use sqlx::{MySql, QueryBuilder};

use crate::db::listing::{fetch_page, Listing};
use crate::db::store::ProductQuery;
use crate::models::{Product, ProductForm, ProductStatus};

pub const PRODUCT_TABLE: &str = "pro_product";

/// Get a product by ID
pub async fn get_product_by_id(
    pool: &MySqlPool,
    product_id: i64,
) -> Result<Option<Product>, sqlx::Error> {
    sqlx::query_as::<_, Product>("SELECT * FROM pro_product WHERE pro_id = ?")
        .bind(product_id)
        .fetch_optional(pool)
        .await
}

/// Products matching every set criterion, ordered by ID
pub async fn find_products(
    pool: &MySqlPool,
    query: &ProductQuery,
) -> Result<Vec<Product>, sqlx::Error> {
    let mut qb = QueryBuilder::<MySql>::new("SELECT * FROM pro_product WHERE 1 = 1");

    for (column, ids) in [("pro_id", &query.ids), ("pro_cat_id", &query.category_ids)] {
        if let Some(ids) = ids {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            qb.push(" AND ").push(column).push(" IN (");
            let mut separated = qb.separated(", ");
            for id in ids {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");
        }
    }

    if let Some(status) = query.status {
        qb.push(" AND pro_status = ").push_bind(status);
    }

    qb.push(" ORDER BY pro_id ASC");
    qb.build_query_as::<Product>().fetch_all(pool).await
}

/// Insert a product and return its ID
pub async fn create_product(
    pool: &MySqlPool,
    form: &ProductForm,
    created_at: NaiveDateTime,
) -> Result<i64, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO pro_product (pro_name, pro_description, pro_img_url, pro_type, pro_actual_value,
                                  pro_last_value, pro_status, pro_quantity_on_stock, pro_cat_id, pro_creation_date)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&form.name)
    .bind(&form.description)
    .bind(&form.img_url)
    .bind(form.product_type)
    .bind(form.actual_value_cents)
    .bind(form.last_value_cents)
    .bind(ProductStatus::Active)
    .bind(form.quantity_on_stock.unwrap_or(0))
    .bind(form.category_id)
    .bind(created_at)
    .execute(pool)
    .await?;

    Ok(result.last_insert_id() as i64)
}

/// Overwrite the editable fields of a product
pub async fn update_product(
    pool: &MySqlPool,
    product_id: i64,
    form: &ProductForm,
    updated_at: NaiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE pro_product
         SET pro_name = ?, pro_description = ?, pro_img_url = COALESCE(?, pro_img_url), pro_type = ?,
             pro_actual_value = ?, pro_last_value = ?, pro_cat_id = ?,
             pro_quantity_on_stock = COALESCE(?, pro_quantity_on_stock), pro_update_date = ?
         WHERE pro_id = ?",
    )
    .bind(&form.name)
    .bind(&form.description)
    .bind(&form.img_url)
    .bind(form.product_type)
    .bind(form.actual_value_cents)
    .bind(form.last_value_cents)
    .bind(form.category_id)
    .bind(form.quantity_on_stock)
    .bind(updated_at)
    .bind(product_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Delete a product, returns whether a row was removed
pub async fn delete_product(pool: &MySqlPool, product_id: i64) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM pro_product WHERE pro_id = ?")
        .bind(product_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn set_status(
    pool: &MySqlPool,
    product_id: i64,
    status: ProductStatus,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE pro_product SET pro_status = ? WHERE pro_id = ?")
        .bind(status)
        .bind(product_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn set_stock(
    pool: &MySqlPool,
    product_id: i64,
    quantity_on_stock: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE pro_product SET pro_quantity_on_stock = ? WHERE pro_id = ?")
        .bind(quantity_on_stock)
        .bind(product_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn set_image(pool: &MySqlPool, product_id: i64, img_url: &str) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE pro_product SET pro_img_url = ? WHERE pro_id = ?")
        .bind(img_url)
        .bind(product_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Filtered product page ordered by ID
pub async fn list_products(
    pool: &MySqlPool,
    listing: &Listing,
) -> Result<(Vec<Product>, u64), sqlx::Error> {
    fetch_page(pool, PRODUCT_TABLE, "pro_id ASC", listing).await
}
