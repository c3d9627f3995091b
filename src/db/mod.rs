pub mod activity_repo;
pub mod position_repo;
pub mod trade_record_repo;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

pub async fn init_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;

    // Verify connectivity
    sqlx::query("SELECT 1").execute(&pool).await?;

    Ok(pool)
}

/// Delete every row owned by a task. Called when the task is removed.
pub async fn purge_task(pool: &PgPool, task_id: uuid::Uuid) -> anyhow::Result<()> {
    activity_repo::delete_for_task(pool, task_id).await?;
    position_repo::delete_for_task(pool, task_id).await?;
    trade_record_repo::delete_for_task(pool, task_id).await?;
    Ok(())
}
