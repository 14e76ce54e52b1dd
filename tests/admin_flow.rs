mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, body_to_json, TestApp};
use serde_json::json;

#[tokio::test]
async fn admin_routes_reject_non_admin_sessions() -> Result<()> {
    let _guard = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("agent@example.com", "secret123", "agent")
        .await?;
    let agent_cookie = app.login("agent@example.com", "secret123").await?;

    let response = app.get("/api/admin/users", Some(&agent_cookie)).await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app.get("/api/admin/users", None).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn admin_creates_updates_and_deletes_users() -> Result<()> {
    let _guard = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("root@example.com", "secret123", "admin")
        .await?;
    let cookie = app.login("root@example.com", "secret123").await?;

    let response = app
        .post_json(
            "/api/admin/users",
            &json!({
                "first_name": "Sam",
                "last_name": "Support",
                "email": "Sam.Support@Example.com",
                "password": "secret123",
                "role": "agent",
                "employee_id": "AGT777",
                "department": "technical",
            }),
            Some(&cookie),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["user"]["email"], json!("sam.support@example.com"));
    assert_eq!(body["user"]["role"], json!("agent"));
    let user_id = body["user"]["id"].as_str().expect("user id").to_string();

    // Duplicate email is reported as such.
    let response = app
        .post_json(
            "/api/admin/users",
            &json!({
                "first_name": "Sam",
                "last_name": "Again",
                "email": "sam.support@example.com",
                "password": "secret123",
                "role": "agent",
                "employee_id": "AGT778",
            }),
            Some(&cookie),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["error"], json!("duplicate_email"));

    // A colliding employee id on a new email surfaces as duplicate_name.
    let response = app
        .post_json(
            "/api/admin/users",
            &json!({
                "first_name": "Copy",
                "last_name": "Cat",
                "email": "copy.cat@example.com",
                "password": "secret123",
                "role": "agent",
                "employee_id": "AGT777",
            }),
            Some(&cookie),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["error"], json!("duplicate_name"));

    // Update keeps unspecified fields and normalizes email case.
    let response = app
        .put_json(
            &format!("/api/admin/users/{user_id}"),
            &json!({ "department": "billing", "email": "SAM.SUPPORT@example.com" }),
            Some(&cookie),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["user"]["department"], json!("billing"));
    assert_eq!(body["user"]["email"], json!("sam.support@example.com"));
    assert_eq!(body["user"]["first_name"], json!("Sam"));

    // Empty update bodies are a no-op, not an error.
    let response = app
        .put_json(&format!("/api/admin/users/{user_id}"), &json!({}), Some(&cookie))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .delete(&format!("/api/admin/users/{user_id}"), Some(&cookie))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    // Gone means gone.
    let response = app
        .delete(&format!("/api/admin/users/{user_id}"), Some(&cookie))
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn deleting_a_user_with_tickets_is_refused() -> Result<()> {
    let _guard = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("root@example.com", "secret123", "admin")
        .await?;
    let cookie = app.login("root@example.com", "secret123").await?;
    let category = app.insert_category("General", 0).await?;

    let response = app
        .post_multipart(
            "/api/tickets/",
            &[
                ("subject", "Owned ticket"),
                ("description", "keeps its customer alive"),
                ("category", &category.to_string()),
                ("customer_email", "owner@example.com"),
            ],
            &[],
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_to_json(response.into_body()).await?;
    let customer_id = body["ticket"]["customer"]["id"].as_str().expect("id").to_string();

    let response = app
        .delete(&format!("/api/admin/users/{customer_id}"), Some(&cookie))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["error"], json!("validation"));

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn user_listing_filters_and_paginates() -> Result<()> {
    let _guard = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("root@example.com", "secret123", "admin")
        .await?;
    let cookie = app.login("root@example.com", "secret123").await?;

    for i in 0..3 {
        app.insert_user(&format!("agent{i}@example.com"), "secret123", "agent")
            .await?;
    }
    app.insert_user("cust@example.com", "secret123", "customer")
        .await?;

    let response = app
        .get("/api/admin/users?role=agent", Some(&cookie))
        .await?;
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["pagination"]["total"], json!(3));
    assert!(body["users"]
        .as_array()
        .expect("users")
        .iter()
        .all(|user| user["role"] == json!("agent")));

    let response = app
        .get("/api/admin/users?limit=2&page=2", Some(&cookie))
        .await?;
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["pagination"]["current"], json!(2));
    assert_eq!(body["pagination"]["pages"], json!(3));
    assert_eq!(body["pagination"]["total"], json!(5));

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn toggle_status_flips_and_cuts_off_access() -> Result<()> {
    let _guard = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("root@example.com", "secret123", "admin")
        .await?;
    app.insert_user("agent@example.com", "secret123", "agent")
        .await?;
    let admin_cookie = app.login("root@example.com", "secret123").await?;
    let agent_cookie = app.login("agent@example.com", "secret123").await?;

    let response = app
        .get("/api/admin/users?role=agent", Some(&admin_cookie))
        .await?;
    let body = body_to_json(response.into_body()).await?;
    let agent_id = body["users"][0]["id"].as_str().expect("id").to_string();

    let response = app
        .patch(
            &format!("/api/admin/users/{agent_id}/toggle-status"),
            Some(&admin_cookie),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["user"]["is_active"], json!(false));

    // The agent's existing session is dead immediately.
    let response = app.get("/api/tickets/", Some(&agent_cookie)).await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Toggling again reactivates.
    let response = app
        .patch(
            &format!("/api/admin/users/{agent_id}/toggle-status"),
            Some(&admin_cookie),
        )
        .await?;
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["user"]["is_active"], json!(true));

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn admin_manages_categories() -> Result<()> {
    let _guard = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("root@example.com", "secret123", "admin")
        .await?;
    let cookie = app.login("root@example.com", "secret123").await?;

    let response = app
        .post_json(
            "/api/admin/categories",
            &json!({ "name": "Billing", "priority": 2, "color": "#ff0000" }),
            Some(&cookie),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["category"]["color"], json!("#ff0000"));
    assert_eq!(body["category"]["created_by"]["email"], json!("root@example.com"));
    let category_id = body["category"]["id"].as_str().expect("id").to_string();

    // Omitted color falls back to the default.
    let response = app
        .post_json(
            "/api/admin/categories",
            &json!({ "name": "General" }),
            Some(&cookie),
        )
        .await?;
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["category"]["color"], json!("#007bff"));
    assert_eq!(body["category"]["priority"], json!(0));

    // Duplicate names are refused.
    let response = app
        .post_json(
            "/api/admin/categories",
            &json!({ "name": "Billing" }),
            Some(&cookie),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["error"], json!("duplicate_name"));

    let response = app
        .put_json(
            &format!("/api/admin/categories/{category_id}"),
            &json!({ "priority": 5 }),
            Some(&cookie),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["category"]["priority"], json!(5));
    assert_eq!(body["category"]["name"], json!("Billing"));

    let response = app
        .patch(
            &format!("/api/admin/categories/{category_id}/toggle-status"),
            Some(&cookie),
        )
        .await?;
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["category"]["is_active"], json!(false));

    // Inactive filter finds it; active filter does not.
    let response = app
        .get("/api/admin/categories?status=inactive", Some(&cookie))
        .await?;
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["categories"].as_array().map(Vec::len), Some(1));
    let response = app
        .get("/api/admin/categories?status=active", Some(&cookie))
        .await?;
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["categories"].as_array().map(Vec::len), Some(1));

    let response = app
        .delete(&format!("/api/admin/categories/{category_id}"), Some(&cookie))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn deleting_a_category_in_use_is_refused() -> Result<()> {
    let _guard = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("root@example.com", "secret123", "admin")
        .await?;
    let cookie = app.login("root@example.com", "secret123").await?;
    let category = app.insert_category("General", 0).await?;

    let response = app
        .post_multipart(
            "/api/tickets/",
            &[
                ("subject", "Keeps category alive"),
                ("description", "referenced"),
                ("category", &category.to_string()),
                ("customer_email", "someone@example.com"),
            ],
            &[],
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .delete(&format!("/api/admin/categories/{category}"), Some(&cookie))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["error"], json!("validation"));

    app.cleanup().await?;
    Ok(())
}
