mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, body_to_json, TestApp};
use serde_json::json;

#[tokio::test]
async fn active_categories_are_listed_by_priority_then_name() -> Result<()> {
    let _guard = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("root@example.com", "secret123", "admin")
        .await?;
    let admin_cookie = app.login("root@example.com", "secret123").await?;
    app.insert_user("customer@example.com", "secret123", "customer")
        .await?;
    let cookie = app.login("customer@example.com", "secret123").await?;

    app.insert_category("Technical Support", 3).await?;
    app.insert_category("Billing", 2).await?;
    app.insert_category("Account", 2).await?;
    let hidden = app.insert_category("Internal Only", 9).await?;
    app.patch(
        &format!("/api/admin/categories/{hidden}/toggle-status"),
        Some(&admin_cookie),
    )
    .await?;

    let response = app.get("/api/categories", Some(&cookie)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_json(response.into_body()).await?;

    let names: Vec<&str> = body["categories"]
        .as_array()
        .expect("categories")
        .iter()
        .map(|category| category["name"].as_str().expect("name"))
        .collect();
    // Highest priority first; ties break alphabetically; inactive ones hidden.
    assert_eq!(names, vec!["Technical Support", "Account", "Billing"]);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn category_listing_requires_a_session() -> Result<()> {
    let _guard = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let response = app.get("/api/categories", None).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn health_endpoint_needs_no_auth() -> Result<()> {
    let _guard = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let response = app.get("/api/health", None).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["status"], json!("ok"));

    app.cleanup().await?;
    Ok(())
}
