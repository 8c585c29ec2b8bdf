use sqlx::mysql::MySqlPool;
use tracing::warn;

pub mod category;
pub mod filter;
pub mod listing;
pub mod memory;
pub mod order;
pub mod product;
pub mod promotion;
pub mod store;

pub use listing::Listing;
pub use memory::InMemoryStore;
pub use store::{CategoryStore, MySqlStore, OrderStore, ProductQuery, ProductStore, PromotionStore};

const CREATE_TABLES_SQL: &str = "migrations/create_tables.sql";

/// Initialize the MySQL connection pool and create tables
pub async fn init_db(database_url: &str) -> Result<MySqlPool, sqlx::Error> {
    let pool = MySqlPool::connect(database_url).await?;

    create_tables(&pool).await?;

    Ok(pool)
}

/// Split a SQL file on `//` delimiters into executable statements
fn split_statements(sql_content: &str) -> Vec<&str> {
    sql_content
        .split("//")
        .skip(1)
        .map(str::trim)
        .filter(|s| !s.is_empty() && *s != "DELIMITER ;")
        .collect()
}

/// Read and execute SQL file for creating tables
async fn execute_sql_file(pool: &MySqlPool, file_path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let sql_content = std::fs::read_to_string(file_path)
        .map_err(|e| format!("Failed to read {}: {}", file_path, e))?;

    for statement in split_statements(&sql_content) {
        // Objects that already exist fail here; that is expected on restart
        if let Err(e) = sqlx::raw_sql(statement).execute(pool).await {
            tracing::debug!("Skipping statement: {}", e);
        }
    }

    Ok(())
}

/// Create all database tables
async fn create_tables(pool: &MySqlPool) -> Result<(), sqlx::Error> {
    if let Err(e) = execute_sql_file(pool, CREATE_TABLES_SQL).await {
        warn!("Failed to create tables: {}", e);
    }

    Ok(())
}
