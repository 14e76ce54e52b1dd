//! Server-side session store. The browser carries an opaque random token in
//! an HttpOnly cookie; only its sha-256 hash is persisted, so a leaked
//! database dump cannot be replayed as a cookie.

use chrono::{Duration as ChronoDuration, NaiveDateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::{NewSession, Session};
use crate::schema::sessions::dsl;

pub const SESSION_COOKIE_NAME: &str = "helpdesk_session";

pub struct IssuedSession {
    pub token: String,
    pub expires_at: NaiveDateTime,
}

pub fn issue_session(
    conn: &mut PgConnection,
    user_id: Uuid,
    ttl_hours: i64,
) -> QueryResult<IssuedSession> {
    let token = generate_session_token();
    let expires_at = (Utc::now() + ChronoDuration::hours(ttl_hours)).naive_utc();

    let new_session = NewSession {
        id: Uuid::new_v4(),
        user_id,
        token_hash: hash_session_token(&token),
        expires_at,
    };

    diesel::insert_into(dsl::sessions)
        .values(&new_session)
        .execute(conn)?;

    Ok(IssuedSession { token, expires_at })
}

pub fn find_active_session(conn: &mut PgConnection, token: &str) -> QueryResult<Option<Session>> {
    let hashed = hash_session_token(token);
    dsl::sessions
        .filter(dsl::token_hash.eq(hashed))
        .filter(dsl::revoked_at.is_null())
        .filter(dsl::expires_at.gt(Utc::now().naive_utc()))
        .first::<Session>(conn)
        .optional()
}

pub fn revoke_session(conn: &mut PgConnection, token: &str) -> QueryResult<usize> {
    let hashed = hash_session_token(token);
    diesel::update(
        dsl::sessions
            .filter(dsl::token_hash.eq(hashed))
            .filter(dsl::revoked_at.is_null()),
    )
    .set(dsl::revoked_at.eq(Utc::now().naive_utc()))
    .execute(conn)
}

fn generate_session_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn hash_session_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}
