//! Session introspection endpoints used by the frontend to decide which
//! shell to render before any page-specific data loads.

use axum::Json;
use serde_json::{json, Value};

use crate::auth::{permissions_for, CurrentUser};

pub async fn me(user: Option<CurrentUser>) -> Json<Value> {
    match user {
        Some(user) => Json(json!({
            "success": true,
            "user": {
                "id": user.user_id,
                "name": user.full_name(),
                "email": user.email,
                "role": user.role,
                "permissions": permissions_for(user.role),
            },
        })),
        None => Json(json!({
            "success": false,
            "message": "No active session",
        })),
    }
}

pub async fn check(user: Option<CurrentUser>) -> Json<Value> {
    Json(json!({
        "success": true,
        "is_authenticated": user.is_some(),
        "role": user.map(|user| user.role),
    }))
}
