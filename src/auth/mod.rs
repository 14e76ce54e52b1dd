pub mod password;
pub mod sessions;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::{headers::Cookie, TypedHeader};
use diesel::prelude::*;
use serde::Serialize;
use uuid::Uuid;

use crate::{error::AppError, models::User, state::AppState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Customer,
    Agent,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::Agent => "agent",
            Role::Admin => "admin",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "customer" => Some(Role::Customer),
            "agent" => Some(Role::Agent),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }

    /// Where the frontend sends a freshly logged-in user of this role.
    pub fn landing_path(self) -> &'static str {
        match self {
            Role::Customer => "/customer",
            Role::Agent => "/support_agent",
            Role::Admin => "/admin",
        }
    }
}

/// Permission set derived from the role on demand, never stored, so it can
/// not drift from the role column.
pub fn permissions_for(role: Role) -> &'static [&'static str] {
    match role {
        Role::Admin => &[
            "user_management",
            "category_management",
            "system_settings",
            "reports",
            "all_tickets",
        ],
        Role::Agent => &["ticket_management", "customer_support"],
        Role::Customer => &["create_tickets", "view_own_tickets"],
    }
}

/// Principal resolved from the session cookie. Looked up per request so a
/// deactivated account loses access immediately, however long its cookie
/// would otherwise stay valid.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub role: Role,
}

impl CurrentUser {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let jar = TypedHeader::<Cookie>::from_request_parts(parts, state)
            .await
            .map_err(|_| AppError::unauthorized())?;
        let token = jar
            .get(sessions::SESSION_COOKIE_NAME)
            .ok_or_else(AppError::unauthorized)?;

        let mut conn = state.db()?;
        let session = sessions::find_active_session(&mut conn, token)?
            .ok_or_else(AppError::unauthorized)?;

        let user: User = {
            use crate::schema::users::dsl;
            match dsl::users.find(session.user_id).first(&mut conn) {
                Ok(user) => user,
                Err(diesel::result::Error::NotFound) => return Err(AppError::unauthorized()),
                Err(err) => return Err(AppError::from(err)),
            }
        };

        if !user.is_active {
            return Err(AppError::forbidden("account is deactivated"));
        }

        let role = Role::parse(&user.role)
            .ok_or_else(|| AppError::internal(format!("unknown role {}", user.role)))?;

        Ok(CurrentUser {
            user_id: user.id,
            first_name: user.first_name,
            last_name: user.last_name,
            email: user.email,
            role,
        })
    }
}

/// Extractor admitting only agents.
pub struct AgentUser(pub CurrentUser);

#[async_trait]
impl FromRequestParts<AppState> for AgentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = CurrentUser::from_request_parts(parts, state).await?;
        if user.role != Role::Agent {
            return Err(AppError::forbidden("agent role required"));
        }
        Ok(AgentUser(user))
    }
}

/// Extractor admitting only admins.
pub struct AdminUser(pub CurrentUser);

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = CurrentUser::from_request_parts(parts, state).await?;
        if user.role != Role::Admin {
            return Err(AppError::forbidden("admin role required"));
        }
        Ok(AdminUser(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_parse_and_format() {
        for role in [Role::Customer, Role::Agent, Role::Admin] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("superuser"), None);
    }

    #[test]
    fn permission_sets_follow_role() {
        assert!(permissions_for(Role::Admin).contains(&"user_management"));
        assert!(permissions_for(Role::Agent).contains(&"ticket_management"));
        assert!(permissions_for(Role::Customer).contains(&"create_tickets"));
        assert!(!permissions_for(Role::Customer).contains(&"all_tickets"));
    }
}
