//! Row types and CRUD for the persisted schema.
//! Every query goes through bound parameters via `sqlx::query`/
//! `query_as` — never string concatenation.

use sqlx::{FromRow, SqlitePool};

use crate::tags::tag::INTERVAL_LIMIT_MS;

use super::PersistError;

#[derive(Debug, Clone, FromRow)]
pub struct NodeRow {
    pub name: String,
    pub r#type: String,
    pub state: String,
    pub plugin_name: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct GroupRow {
    pub driver_name: String,
    pub name: String,
    pub interval: i64,
    pub context: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct TagRow {
    pub driver_name: String,
    pub group_name: String,
    pub name: String,
    pub address: String,
    pub attribute: i64,
    pub precision: i64,
    pub r#type: String,
    pub decimal: f64,
    pub bias: f64,
    pub description: Option<String>,
    pub value: Option<String>,
    pub format: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct SubscriptionRow {
    pub app_name: String,
    pub driver_name: String,
    pub group_name: String,
    pub params: Option<String>,
    pub static_tags: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub name: String,
    pub password: String,
}

pub async fn insert_node(pool: &SqlitePool, node: &NodeRow) -> Result<(), PersistError> {
    sqlx::query("INSERT INTO nodes (name, type, state, plugin_name) VALUES (?, ?, ?, ?)")
        .bind(&node.name)
        .bind(&node.r#type)
        .bind(&node.state)
        .bind(&node.plugin_name)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn list_nodes(pool: &SqlitePool) -> Result<Vec<NodeRow>, PersistError> {
    Ok(sqlx::query_as::<_, NodeRow>("SELECT name, type, state, plugin_name FROM nodes")
        .fetch_all(pool)
        .await?)
}

pub async fn delete_node(pool: &SqlitePool, name: &str) -> Result<(), PersistError> {
    sqlx::query("DELETE FROM nodes WHERE name = ?")
        .bind(name)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn insert_group(pool: &SqlitePool, group: &GroupRow) -> Result<(), PersistError> {
    sqlx::query("INSERT INTO groups (driver_name, name, interval, context) VALUES (?, ?, ?, ?)")
        .bind(&group.driver_name)
        .bind(&group.name)
        .bind(group.interval)
        .bind(&group.context)
        .execute(pool)
        .await?;
    Ok(())
}

/// Updates below `INTERVAL_LIMIT_MS` are silently ignored rather than
/// rejected.
pub async fn update_group_interval(
    pool: &SqlitePool,
    driver_name: &str,
    group_name: &str,
    interval_ms: i64,
) -> Result<(), PersistError> {
    if interval_ms < INTERVAL_LIMIT_MS as i64 {
        return Ok(());
    }
    sqlx::query("UPDATE groups SET interval = ? WHERE driver_name = ? AND name = ?")
        .bind(interval_ms)
        .bind(driver_name)
        .bind(group_name)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn list_groups(pool: &SqlitePool, driver_name: &str) -> Result<Vec<GroupRow>, PersistError> {
    Ok(sqlx::query_as::<_, GroupRow>(
        "SELECT driver_name, name, interval, context FROM groups WHERE driver_name = ?",
    )
    .bind(driver_name)
    .fetch_all(pool)
    .await?)
}

pub async fn insert_tag(pool: &SqlitePool, tag: &TagRow) -> Result<(), PersistError> {
    sqlx::query(
        "INSERT INTO tags (driver_name, group_name, name, address, attribute, precision, type,
            decimal, bias, description, value, format)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&tag.driver_name)
    .bind(&tag.group_name)
    .bind(&tag.name)
    .bind(&tag.address)
    .bind(tag.attribute)
    .bind(tag.precision)
    .bind(&tag.r#type)
    .bind(tag.decimal)
    .bind(tag.bias)
    .bind(&tag.description)
    .bind(&tag.value)
    .bind(&tag.format)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn list_tags(
    pool: &SqlitePool,
    driver_name: &str,
    group_name: &str,
) -> Result<Vec<TagRow>, PersistError> {
    Ok(sqlx::query_as::<_, TagRow>(
        "SELECT driver_name, group_name, name, address, attribute, precision, type,
                decimal, bias, description, value, format
         FROM tags WHERE driver_name = ? AND group_name = ?",
    )
    .bind(driver_name)
    .bind(group_name)
    .fetch_all(pool)
    .await?)
}

pub async fn delete_tag(
    pool: &SqlitePool,
    driver_name: &str,
    group_name: &str,
    name: &str,
) -> Result<(), PersistError> {
    sqlx::query("DELETE FROM tags WHERE driver_name = ? AND group_name = ? AND name = ?")
        .bind(driver_name)
        .bind(group_name)
        .bind(name)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn insert_subscription(pool: &SqlitePool, sub: &SubscriptionRow) -> Result<(), PersistError> {
    sqlx::query(
        "INSERT INTO subscriptions (app_name, driver_name, group_name, params, static_tags)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&sub.app_name)
    .bind(&sub.driver_name)
    .bind(&sub.group_name)
    .bind(&sub.params)
    .bind(&sub.static_tags)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn list_subscriptions(
    pool: &SqlitePool,
    driver_name: &str,
    group_name: &str,
) -> Result<Vec<SubscriptionRow>, PersistError> {
    Ok(sqlx::query_as::<_, SubscriptionRow>(
        "SELECT app_name, driver_name, group_name, params, static_tags
         FROM subscriptions WHERE driver_name = ? AND group_name = ?",
    )
    .bind(driver_name)
    .bind(group_name)
    .fetch_all(pool)
    .await?)
}

pub async fn upsert_user(pool: &SqlitePool, name: &str, password_hash: &str) -> Result<(), PersistError> {
    sqlx::query(
        "INSERT INTO users (name, password) VALUES (?, ?)
         ON CONFLICT(name) DO UPDATE SET password = excluded.password",
    )
    .bind(name)
    .bind(password_hash)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn find_user(pool: &SqlitePool, name: &str) -> Result<Option<UserRow>, PersistError> {
    Ok(sqlx::query_as::<_, UserRow>("SELECT name, password FROM users WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::migrator::run_migrations;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn seeded_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("0001_init.sql"),
            std::fs::read_to_string(concat!(env!("CARGO_MANIFEST_DIR"), "/persistence/schemas/0001_init.sql"))
                .unwrap(),
        )
        .unwrap();
        run_migrations(&pool, dir.path()).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn group_interval_below_limit_is_silently_ignored() {
        let pool = seeded_pool().await;
        insert_node(
            &pool,
            &NodeRow {
                name: "driver1".into(),
                r#type: "driver".into(),
                state: "running".into(),
                plugin_name: "opcua".into(),
            },
        )
        .await
        .unwrap();
        insert_group(
            &pool,
            &GroupRow {
                driver_name: "driver1".into(),
                name: "g1".into(),
                interval: 500,
                context: None,
            },
        )
        .await
        .unwrap();

        update_group_interval(&pool, "driver1", "g1", 10).await.unwrap();
        let groups = list_groups(&pool, "driver1").await.unwrap();
        assert_eq!(groups[0].interval, 500);

        update_group_interval(&pool, "driver1", "g1", 1000).await.unwrap();
        let groups = list_groups(&pool, "driver1").await.unwrap();
        assert_eq!(groups[0].interval, 1000);
    }

    #[tokio::test]
    async fn tag_cascade_deletes_with_its_group() {
        let pool = seeded_pool().await;
        insert_node(
            &pool,
            &NodeRow {
                name: "driver1".into(),
                r#type: "driver".into(),
                state: "running".into(),
                plugin_name: "opcua".into(),
            },
        )
        .await
        .unwrap();
        insert_group(
            &pool,
            &GroupRow {
                driver_name: "driver1".into(),
                name: "g1".into(),
                interval: 500,
                context: None,
            },
        )
        .await
        .unwrap();
        insert_tag(
            &pool,
            &TagRow {
                driver_name: "driver1".into(),
                group_name: "g1".into(),
                name: "t1".into(),
                address: "ns=2;i=1".into(),
                attribute: 0,
                precision: 0,
                r#type: "int16".into(),
                decimal: 0.0,
                bias: 0.0,
                description: None,
                value: None,
                format: None,
            },
        )
        .await
        .unwrap();

        delete_node(&pool, "driver1").await.unwrap();
        let tags = list_tags(&pool, "driver1", "g1").await.unwrap();
        assert!(tags.is_empty());
    }
}
