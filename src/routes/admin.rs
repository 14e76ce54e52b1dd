//! Admin-only user and category management. Every handler takes the
//! `AdminUser` extractor, so a wrong-role session is rejected before any
//! query runs.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use diesel::prelude::*;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    auth::{password, AdminUser, Role},
    error::{AppError, AppResult},
    models::{Category, NewCategory, NewUser, User},
    schema::{categories, users},
    state::AppState,
};

// ---------------------------------------------------------------------------
// Users

#[derive(Deserialize)]
pub struct ListUsersQuery {
    pub role: Option<String>,
    pub status: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

fn user_view(user: &User) -> Value {
    json!({
        "id": user.id,
        "first_name": user.first_name,
        "last_name": user.last_name,
        "name": user.full_name(),
        "email": user.email,
        "role": user.role,
        "phone": user.phone,
        "company": user.company,
        "employee_id": user.employee_id,
        "department": user.department,
        "presence": user.presence,
        "is_active": user.is_active,
        "last_login_at": user.last_login_at,
        "created_at": user.created_at,
    })
}

fn filtered_users(query: &ListUsersQuery) -> crate::schema::users::BoxedQuery<'static, diesel::pg::Pg> {
    let mut filtered = users::table.into_boxed();
    if let Some(role) = &query.role {
        filtered = filtered.filter(users::role.eq(role.clone()));
    }
    match query.status.as_deref() {
        Some("active") => filtered = filtered.filter(users::is_active.eq(true)),
        Some("inactive") => filtered = filtered.filter(users::is_active.eq(false)),
        _ => {}
    }
    filtered
}

pub async fn list_users(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Query(query): Query<ListUsersQuery>,
) -> AppResult<Json<Value>> {
    let mut conn = state.db()?;

    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(20).clamp(1, 100);

    let total: i64 = filtered_users(&query).count().get_result(&mut conn)?;
    let rows: Vec<User> = filtered_users(&query)
        .order(users::created_at.desc())
        .limit(limit)
        .offset((page - 1) * limit)
        .load(&mut conn)?;

    let pages = (total + limit - 1) / limit;
    Ok(Json(json!({
        "success": true,
        "users": rows.iter().map(user_view).collect::<Vec<_>>(),
        "pagination": { "current": page, "pages": pages, "total": total },
    })))
}

#[derive(Deserialize)]
pub struct CreateUserRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
    pub role: String,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub employee_id: Option<String>,
    pub department: Option<String>,
}

pub async fn create_user(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Json(payload): Json<CreateUserRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let role = Role::parse(&payload.role)
        .ok_or_else(|| AppError::validation(format!("invalid role {}", payload.role)))?;
    let email = payload.email.trim().to_lowercase();
    if payload.first_name.trim().is_empty()
        || payload.last_name.trim().is_empty()
        || email.is_empty()
        || payload.password.is_empty()
    {
        return Err(AppError::validation(
            "first_name, last_name, email, password, and role are required",
        ));
    }

    let mut conn = state.db()?;
    let existing: Option<User> = users::table
        .filter(users::email.eq(&email))
        .first(&mut conn)
        .optional()?;
    if existing.is_some() {
        return Err(AppError::duplicate_email());
    }

    let new_user = NewUser {
        id: Uuid::new_v4(),
        first_name: payload.first_name.trim().to_string(),
        last_name: payload.last_name.trim().to_string(),
        email,
        password_hash: password::hash_password(&payload.password)?,
        role: role.as_str().to_string(),
        phone: payload.phone,
        company: payload.company,
        employee_id: payload.employee_id,
        department: payload.department,
        presence: "offline".to_string(),
    };

    match diesel::insert_into(users::table)
        .values(&new_user)
        .execute(&mut conn)
    {
        Ok(_) => {}
        Err(diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            info,
        )) => {
            return Err(match info.constraint_name() {
                Some("users_employee_id_key") => {
                    AppError::duplicate_name("an agent with this employee id already exists")
                }
                _ => AppError::duplicate_email(),
            });
        }
        Err(err) => return Err(AppError::from(err)),
    }

    let user: User = users::table.find(new_user.id).first(&mut conn)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "user": user_view(&user) })),
    ))
}

#[derive(Deserialize, AsChangeset)]
#[diesel(table_name = users)]
pub struct UpdateUserRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub employee_id: Option<String>,
    pub department: Option<String>,
}

pub async fn update_user(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Path(user_id): Path<Uuid>,
    Json(mut payload): Json<UpdateUserRequest>,
) -> AppResult<Json<Value>> {
    // Password and role never change through this route.
    if let Some(email) = payload.email.as_mut() {
        *email = email.trim().to_lowercase();
    }

    let mut conn = state.db()?;
    let existing: Option<User> = users::table.find(user_id).first(&mut conn).optional()?;
    let existing = existing.ok_or_else(|| AppError::not_found("user"))?;

    if payload.first_name.is_none()
        && payload.last_name.is_none()
        && payload.email.is_none()
        && payload.phone.is_none()
        && payload.company.is_none()
        && payload.employee_id.is_none()
        && payload.department.is_none()
    {
        return Ok(Json(json!({ "success": true, "user": user_view(&existing) })));
    }

    match diesel::update(users::table.find(user_id))
        .set((&payload, users::updated_at.eq(Utc::now().naive_utc())))
        .execute(&mut conn)
    {
        Ok(_) => {}
        Err(diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            info,
        )) => {
            return Err(match info.constraint_name() {
                Some("users_employee_id_key") => {
                    AppError::duplicate_name("an agent with this employee id already exists")
                }
                _ => AppError::duplicate_email(),
            });
        }
        Err(err) => return Err(AppError::from(err)),
    }

    let user: User = users::table.find(user_id).first(&mut conn)?;
    Ok(Json(json!({ "success": true, "user": user_view(&user) })))
}

pub async fn toggle_user_status(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    let mut conn = state.db()?;
    let user: Option<User> = users::table.find(user_id).first(&mut conn).optional()?;
    let user = user.ok_or_else(|| AppError::not_found("user"))?;

    diesel::update(users::table.find(user.id))
        .set((
            users::is_active.eq(!user.is_active),
            users::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(&mut conn)?;

    let refreshed: User = users::table.find(user.id).first(&mut conn)?;
    Ok(Json(json!({ "success": true, "user": user_view(&refreshed) })))
}

pub async fn delete_user(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    let mut conn = state.db()?;
    let deleted = match diesel::delete(users::table.find(user_id)).execute(&mut conn) {
        Ok(deleted) => deleted,
        Err(diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::ForeignKeyViolation,
            _,
        )) => {
            return Err(AppError::validation(
                "user still owns tickets; deactivate the account instead",
            ));
        }
        Err(err) => return Err(AppError::from(err)),
    };
    if deleted == 0 {
        return Err(AppError::not_found("user"));
    }
    Ok(Json(json!({ "success": true, "message": "User deleted successfully" })))
}

// ---------------------------------------------------------------------------
// Categories

#[derive(Deserialize)]
pub struct ListCategoriesQuery {
    pub status: Option<String>,
}

fn category_view(category: &Category, creator: Option<&User>) -> Value {
    json!({
        "id": category.id,
        "name": category.name,
        "description": category.description,
        "color": category.color,
        "icon": category.icon,
        "priority": category.priority,
        "is_active": category.is_active,
        "created_by": creator.map(|user| json!({
            "id": user.id,
            "name": user.full_name(),
            "email": user.email,
        })),
        "created_at": category.created_at,
    })
}

pub async fn list_categories(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Query(query): Query<ListCategoriesQuery>,
) -> AppResult<Json<Value>> {
    let mut conn = state.db()?;

    let mut filtered = categories::table.into_boxed();
    match query.status.as_deref() {
        Some("active") => filtered = filtered.filter(categories::is_active.eq(true)),
        Some("inactive") => filtered = filtered.filter(categories::is_active.eq(false)),
        _ => {}
    }

    let rows: Vec<Category> = filtered
        .order((categories::priority.desc(), categories::name.asc()))
        .load(&mut conn)?;

    let creator_ids: Vec<Uuid> = rows.iter().filter_map(|category| category.created_by).collect();
    let creators: Vec<User> = users::table
        .filter(users::id.eq_any(&creator_ids))
        .load(&mut conn)?;

    let items: Vec<Value> = rows
        .iter()
        .map(|category| {
            let creator = category
                .created_by
                .and_then(|id| creators.iter().find(|user| user.id == id));
            category_view(category, creator)
        })
        .collect();

    Ok(Json(json!({ "success": true, "categories": items })))
}

#[derive(Deserialize)]
pub struct CreateCategoryRequest {
    pub name: String,
    pub description: Option<String>,
    pub color: Option<String>,
    pub icon: Option<String>,
    pub priority: Option<i32>,
}

pub async fn create_category(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Json(payload): Json<CreateCategoryRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(AppError::validation("category name is required"));
    }

    let mut conn = state.db()?;
    let new_category = NewCategory {
        id: Uuid::new_v4(),
        name: name.to_string(),
        description: payload.description,
        color: payload.color.unwrap_or_else(|| "#007bff".to_string()),
        icon: payload.icon,
        priority: payload.priority.unwrap_or(0),
        created_by: Some(admin.user_id),
    };

    match diesel::insert_into(categories::table)
        .values(&new_category)
        .execute(&mut conn)
    {
        Ok(_) => {}
        Err(diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            _,
        )) => {
            return Err(AppError::duplicate_name(
                "a category with this name already exists",
            ));
        }
        Err(err) => return Err(AppError::from(err)),
    }

    let category: Category = categories::table.find(new_category.id).first(&mut conn)?;
    let creator: Option<User> = users::table.find(admin.user_id).first(&mut conn).optional()?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "category": category_view(&category, creator.as_ref()) })),
    ))
}

#[derive(Deserialize, AsChangeset)]
#[diesel(table_name = categories)]
pub struct UpdateCategoryRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub color: Option<String>,
    pub icon: Option<String>,
    pub priority: Option<i32>,
}

pub async fn update_category(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Path(category_id): Path<Uuid>,
    Json(payload): Json<UpdateCategoryRequest>,
) -> AppResult<Json<Value>> {
    let mut conn = state.db()?;
    let existing: Option<Category> = categories::table
        .find(category_id)
        .first(&mut conn)
        .optional()?;
    let existing = existing.ok_or_else(|| AppError::not_found("category"))?;

    if payload.name.is_none()
        && payload.description.is_none()
        && payload.color.is_none()
        && payload.icon.is_none()
        && payload.priority.is_none()
    {
        return Ok(Json(json!({ "success": true, "category": category_view(&existing, None) })));
    }

    match diesel::update(categories::table.find(category_id))
        .set((&payload, categories::updated_at.eq(Utc::now().naive_utc())))
        .execute(&mut conn)
    {
        Ok(_) => {}
        Err(diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            _,
        )) => {
            return Err(AppError::duplicate_name(
                "a category with this name already exists",
            ));
        }
        Err(err) => return Err(AppError::from(err)),
    }

    let category: Category = categories::table.find(category_id).first(&mut conn)?;
    Ok(Json(json!({ "success": true, "category": category_view(&category, None) })))
}

pub async fn toggle_category_status(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Path(category_id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    let mut conn = state.db()?;
    let category: Option<Category> = categories::table
        .find(category_id)
        .first(&mut conn)
        .optional()?;
    let category = category.ok_or_else(|| AppError::not_found("category"))?;

    diesel::update(categories::table.find(category.id))
        .set((
            categories::is_active.eq(!category.is_active),
            categories::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(&mut conn)?;

    let refreshed: Category = categories::table.find(category.id).first(&mut conn)?;
    Ok(Json(json!({ "success": true, "category": category_view(&refreshed, None) })))
}

pub async fn delete_category(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Path(category_id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    let mut conn = state.db()?;
    let deleted = match diesel::delete(categories::table.find(category_id)).execute(&mut conn) {
        Ok(deleted) => deleted,
        Err(diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::ForeignKeyViolation,
            _,
        )) => {
            return Err(AppError::validation(
                "category is still referenced by tickets; deactivate it instead",
            ));
        }
        Err(err) => return Err(AppError::from(err)),
    };
    if deleted == 0 {
        return Err(AppError::not_found("category"));
    }
    Ok(Json(json!({ "success": true, "message": "Category deleted successfully" })))
}
