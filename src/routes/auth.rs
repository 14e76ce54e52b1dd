//! Login, logout, and the legacy per-role signup/login endpoints. All of
//! them resolve to the same unified `users` table; the per-role variants
//! only add a role check on top.

use axum::{
    extract::State,
    http::{header::SET_COOKIE, HeaderMap, HeaderValue},
    Json,
};
use axum_extra::{headers::Cookie, typed_header::TypedHeader};
use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    auth::{
        password, permissions_for,
        sessions::{self, SESSION_COOKIE_NAME},
        CurrentUser, Role,
    },
    error::{AppError, AppResult},
    models::{NewUser, User},
    schema::users,
    state::AppState,
};

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct SignupRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub employee_id: Option<String>,
    pub department: Option<String>,
}

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<(HeaderMap, Json<Value>)> {
    let mut conn = state.db()?;
    let user = authenticate(&mut conn, &payload.email, &payload.password)?;
    finish_login(&state, &mut conn, user)
}

pub async fn customer_login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<(HeaderMap, Json<Value>)> {
    login_as(state, payload, Role::Customer)
}

pub async fn agent_login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<(HeaderMap, Json<Value>)> {
    login_as(state, payload, Role::Agent)
}

pub async fn customer_signup(
    State(state): State<AppState>,
    Json(payload): Json<SignupRequest>,
) -> AppResult<(HeaderMap, Json<Value>)> {
    signup(state, payload, Role::Customer)
}

pub async fn agent_signup(
    State(state): State<AppState>,
    Json(payload): Json<SignupRequest>,
) -> AppResult<(HeaderMap, Json<Value>)> {
    signup(state, payload, Role::Agent)
}

pub async fn logout(
    State(state): State<AppState>,
    user: CurrentUser,
    jar: Option<TypedHeader<Cookie>>,
) -> AppResult<(HeaderMap, Json<Value>)> {
    let mut conn = state.db()?;

    if let Some(cookies) = jar {
        if let Some(token) = cookies.get(SESSION_COOKIE_NAME) {
            sessions::revoke_session(&mut conn, token)?;
        }
    }

    if user.role == Role::Agent {
        diesel::update(users::table.find(user.user_id))
            .set((
                users::presence.eq("offline"),
                users::updated_at.eq(Utc::now().naive_utc()),
            ))
            .execute(&mut conn)?;
    }

    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, build_clear_session_cookie(&state));
    Ok((
        headers,
        Json(json!({ "success": true, "message": "Logged out" })),
    ))
}

/// Looks the email up case-insensitively and verifies the password. An
/// unknown email still burns one argon2 verification so the two failure
/// modes are indistinguishable, by timing or by message.
fn authenticate(conn: &mut PgConnection, email: &str, plaintext: &str) -> AppResult<User> {
    let normalized = email.trim().to_lowercase();
    let user: Option<User> = users::table
        .filter(users::email.eq(&normalized))
        .first(conn)
        .optional()?;

    let user = match user {
        Some(user) => user,
        None => {
            password::verify_dummy(plaintext);
            return Err(AppError::invalid_credentials());
        }
    };

    let valid = password::verify_password(plaintext, &user.password_hash)
        .map_err(|_| AppError::invalid_credentials())?;
    if !valid || !user.is_active {
        return Err(AppError::invalid_credentials());
    }

    Ok(user)
}

fn login_as(state: AppState, payload: LoginRequest, role: Role) -> AppResult<(HeaderMap, Json<Value>)> {
    let mut conn = state.db()?;
    let user = authenticate(&mut conn, &payload.email, &payload.password)?;
    if user.role != role.as_str() {
        return Err(AppError::invalid_credentials());
    }
    finish_login(&state, &mut conn, user)
}

fn finish_login(
    state: &AppState,
    conn: &mut PgConnection,
    user: User,
) -> AppResult<(HeaderMap, Json<Value>)> {
    let role =
        Role::parse(&user.role).ok_or_else(|| AppError::internal(format!("unknown role {}", user.role)))?;
    let now = Utc::now().naive_utc();

    if role == Role::Agent {
        diesel::update(users::table.find(user.id))
            .set((
                users::last_login_at.eq(now),
                users::presence.eq("online"),
                users::updated_at.eq(now),
            ))
            .execute(conn)?;
    } else {
        diesel::update(users::table.find(user.id))
            .set((users::last_login_at.eq(now), users::updated_at.eq(now)))
            .execute(conn)?;
    }

    let issued = sessions::issue_session(conn, user.id, state.config.session_ttl_hours)?;

    let mut headers = HeaderMap::new();
    headers.insert(
        SET_COOKIE,
        build_session_cookie(state, &issued.token, issued.expires_at),
    );

    Ok((
        headers,
        Json(json!({
            "success": true,
            "message": "Login successful",
            "redirect_url": role.landing_path(),
            "user": {
                "id": user.id,
                "name": user.full_name(),
                "email": user.email,
                "role": role,
                "permissions": permissions_for(role),
            },
        })),
    ))
}

fn signup(state: AppState, payload: SignupRequest, role: Role) -> AppResult<(HeaderMap, Json<Value>)> {
    let email = payload.email.trim().to_lowercase();
    if payload.first_name.trim().is_empty()
        || payload.last_name.trim().is_empty()
        || email.is_empty()
        || payload.password.is_empty()
    {
        return Err(AppError::validation(
            "first_name, last_name, email, and password are required",
        ));
    }
    if role == Role::Agent && payload.employee_id.as_deref().unwrap_or("").trim().is_empty() {
        return Err(AppError::validation("employee_id is required for agents"));
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
        employee_id: payload.employee_id.map(|value| value.trim().to_string()),
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
    finish_login(&state, &mut conn, user)
}

fn build_session_cookie(state: &AppState, token: &str, expires_at: NaiveDateTime) -> HeaderValue {
    let max_age = state.config.session_ttl_hours * 3600;
    let expires = expires_at.and_utc().to_rfc2822();

    let mut parts = vec![format!("{SESSION_COOKIE_NAME}={token}")];
    parts.push("Path=/".into());
    parts.push("HttpOnly".into());
    parts.push("SameSite=Strict".into());
    parts.push(format!("Max-Age={max_age}"));
    parts.push(format!("Expires={expires}"));
    if state.config.session_cookie_secure {
        parts.push("Secure".into());
    }
    if let Some(domain) = &state.config.session_cookie_domain {
        parts.push(format!("Domain={domain}"));
    }

    HeaderValue::from_str(&parts.join("; ")).expect("valid session cookie")
}

fn build_clear_session_cookie(state: &AppState) -> HeaderValue {
    let mut parts = vec![format!("{SESSION_COOKIE_NAME}=")];
    parts.push("Path=/".into());
    parts.push("HttpOnly".into());
    parts.push("SameSite=Strict".into());
    parts.push("Max-Age=0".into());
    parts.push("Expires=Thu, 01 Jan 1970 00:00:00 GMT".into());
    if state.config.session_cookie_secure {
        parts.push("Secure".into());
    }
    if let Some(domain) = &state.config.session_cookie_domain {
        parts.push(format!("Domain={domain}"));
    }

    HeaderValue::from_str(&parts.join("; ")).expect("valid session cookie")
}
