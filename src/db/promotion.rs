use chrono::NaiveDateTime;
use sqlx::mysql::MySqlPool;
use sqlx::types::Json;
use sqlx::{MySql, QueryBuilder};

use crate::db::listing::{fetch_page, Listing};
use crate::models::{ProductPromotion, Promotion, PromotionForm, PromotionStatus};

pub const PROMOTION_TABLE: &str = "prm_promotion";

/// Get a promotion by ID
pub async fn get_promotion_by_id(
    pool: &MySqlPool,
    promotion_id: i64,
) -> Result<Option<Promotion>, sqlx::Error> {
    sqlx::query_as::<_, Promotion>("SELECT * FROM prm_promotion WHERE prm_id = ?")
        .bind(promotion_id)
        .fetch_optional(pool)
        .await
}

/// Count how many of the given product IDs exist
async fn count_existing_products(
    tx: &mut sqlx::Transaction<'_, MySql>,
    product_ids: &[i64],
) -> Result<i64, sqlx::Error> {
    let mut qb = QueryBuilder::<MySql>::new("SELECT COUNT(*) FROM pro_product WHERE pro_id IN (");
    let mut separated = qb.separated(", ");
    for id in product_ids {
        separated.push_bind(*id);
    }
    separated.push_unseparated(")");

    qb.build_query_scalar::<i64>().fetch_one(&mut **tx).await
}

/// Insert a promotion and its product links in one transaction.
///
/// Returns `Ok(None)` (and writes nothing) when any linked product is missing.
pub async fn create_promotion(
    pool: &MySqlPool,
    form: &PromotionForm,
    created_at: NaiveDateTime,
) -> Result<Option<i64>, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let mut product_ids: Vec<i64> = form.products.iter().map(|p| p.id).collect();
    product_ids.sort_unstable();
    product_ids.dedup();

    if !product_ids.is_empty()
        && count_existing_products(&mut tx, &product_ids).await? != product_ids.len() as i64
    {
        tx.rollback().await?;
        return Ok(None);
    }

    let result = sqlx::query(
        "INSERT INTO prm_promotion (prm_title, prm_description, prm_img_url, prm_status, prm_user_type, prm_creation_date)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&form.title)
    .bind(&form.description)
    .bind(&form.img_url)
    .bind(form.status)
    .bind(Json(form.user_types.clone()))
    .bind(created_at)
    .execute(&mut *tx)
    .await?;

    let promotion_id = result.last_insert_id() as i64;

    if !form.products.is_empty() {
        let mut qb = QueryBuilder::<MySql>::new(
            "INSERT INTO pmo_product_promotion (pmo_prm_id, pmo_pro_id, pmo_value_cents) ",
        );
        qb.push_values(form.products.iter(), |mut row, product| {
            row.push_bind(promotion_id)
                .push_bind(product.id)
                .push_bind(product.value_cents);
        });
        qb.build().execute(&mut *tx).await?;
    }

    tx.commit().await?;

    Ok(Some(promotion_id))
}

/// Update promotion fields and the value of each listed product link
pub async fn update_promotion(
    pool: &MySqlPool,
    promotion_id: i64,
    form: &PromotionForm,
    updated_at: NaiveDateTime,
) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "UPDATE prm_promotion
         SET prm_title = ?, prm_description = ?, prm_img_url = COALESCE(?, prm_img_url),
             prm_status = ?, prm_user_type = ?, prm_update_date = ?
         WHERE prm_id = ?",
    )
    .bind(&form.title)
    .bind(&form.description)
    .bind(&form.img_url)
    .bind(form.status)
    .bind(Json(form.user_types.clone()))
    .bind(updated_at)
    .bind(promotion_id)
    .execute(&mut *tx)
    .await?;

    for product in &form.products {
        sqlx::query(
            "UPDATE pmo_product_promotion SET pmo_value_cents = ? WHERE pmo_prm_id = ? AND pmo_pro_id = ?",
        )
        .bind(product.value_cents)
        .bind(promotion_id)
        .bind(product.id)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await
}

/// Delete the product links, then the promotion, in one transaction
pub async fn delete_promotion(pool: &MySqlPool, promotion_id: i64) -> Result<bool, sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM pmo_product_promotion WHERE pmo_prm_id = ?")
        .bind(promotion_id)
        .execute(&mut *tx)
        .await?;

    let result = sqlx::query("DELETE FROM prm_promotion WHERE prm_id = ?")
        .bind(promotion_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(result.rows_affected() > 0)
}

pub async fn set_status(
    pool: &MySqlPool,
    promotion_id: i64,
    status: PromotionStatus,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE prm_promotion SET prm_status = ? WHERE prm_id = ?")
        .bind(status)
        .bind(promotion_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn set_image(pool: &MySqlPool, promotion_id: i64, img_url: &str) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE prm_promotion SET prm_img_url = ? WHERE prm_id = ?")
        .bind(img_url)
        .bind(promotion_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Promotions whose audience overlaps `roles`
pub async fn find_for_roles(
    pool: &MySqlPool,
    roles: &[i32],
    only_active: bool,
) -> Result<Vec<Promotion>, sqlx::Error> {
    let mut qb = QueryBuilder::<MySql>::new("SELECT * FROM prm_promotion WHERE JSON_OVERLAPS(prm_user_type, ");
    qb.push_bind(Json(roles.to_vec()));
    qb.push(")");

    if only_active {
        qb.push(" AND prm_status = ").push_bind(PromotionStatus::Active);
    }

    qb.push(" ORDER BY prm_id ASC");
    qb.build_query_as::<Promotion>().fetch_all(pool).await
}

/// Product links of the given promotions
pub async fn find_product_links(
    pool: &MySqlPool,
    promotion_ids: &[i64],
) -> Result<Vec<ProductPromotion>, sqlx::Error> {
    if promotion_ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut qb = QueryBuilder::<MySql>::new("SELECT * FROM pmo_product_promotion WHERE pmo_prm_id IN (");
    let mut separated = qb.separated(", ");
    for id in promotion_ids {
        separated.push_bind(*id);
    }
    separated.push_unseparated(") ORDER BY pmo_id ASC");

    qb.build_query_as::<ProductPromotion>().fetch_all(pool).await
}

/// Filtered promotion page ordered by ID
pub async fn list_promotions(
    pool: &MySqlPool,
    listing: &Listing,
) -> Result<(Vec<Promotion>, u64), sqlx::Error> {
    fetch_page(pool, PROMOTION_TABLE, "prm_id ASC", listing).await
}
