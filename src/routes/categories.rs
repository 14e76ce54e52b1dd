//! Active-category listing for the ticket-creation dropdown. The ordering
//! (priority descending, then name) is what the frontend renders verbatim.

use axum::{extract::State, Json};
use diesel::prelude::*;
use serde_json::{json, Value};

use crate::{
    auth::CurrentUser,
    error::AppResult,
    models::Category,
    schema::categories,
    state::AppState,
};

pub async fn list_active(
    State(state): State<AppState>,
    _user: CurrentUser,
) -> AppResult<Json<Value>> {
    let mut conn = state.db()?;

    let rows: Vec<Category> = categories::table
        .filter(categories::is_active.eq(true))
        .order((categories::priority.desc(), categories::name.asc()))
        .load(&mut conn)?;

    let items: Vec<Value> = rows
        .into_iter()
        .map(|category| {
            json!({
                "id": category.id,
                "name": category.name,
                "description": category.description,
                "color": category.color,
                "icon": category.icon,
                "priority": category.priority,
            })
        })
        .collect();

    Ok(Json(json!({ "success": true, "categories": items })))
}
