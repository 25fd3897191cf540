//! Tests for on-disk database initialization

use nlm_common::db::init::init_database;

#[tokio::test]
async fn test_database_creation_when_missing() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("nested").join("nlm.db");

    let result = init_database(&db_path).await;

    assert!(result.is_ok(), "Database initialization failed: {:?}", result.err());
    assert!(db_path.exists(), "Database file was not created");
}

#[tokio::test]
async fn test_database_opens_existing() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("nlm.db");

    let pool1 = init_database(&db_path).await.unwrap();
    sqlx::query("INSERT INTO forms (form_key, name) VALUES ('welcome', 'Welcome')")
        .execute(&pool1)
        .await
        .unwrap();
    pool1.close().await;

    // Second open keeps existing rows
    let pool2 = init_database(&db_path).await.unwrap();
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM forms")
        .fetch_one(&pool2)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn test_forms_table_defaults() {
    let pool = nlm_common::db::init_memory_database().await.unwrap();

    sqlx::query("INSERT INTO forms (form_key) VALUES ('f1')")
        .execute(&pool)
        .await
        .unwrap();

    let (views, traffic, revision): (i64, String, i64) =
        sqlx::query_as("SELECT views, traffic, revision FROM forms WHERE form_key = 'f1'")
            .fetch_one(&pool)
            .await
            .unwrap();

    assert_eq!(views, 0);
    assert_eq!(traffic, "{}");
    assert_eq!(revision, 0);
}
