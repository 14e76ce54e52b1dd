use std::env;
use std::sync::Arc;

use anyhow::{anyhow, ensure, Context, Result};
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::PgConnection;
use helpdesk::config::AppConfig;
use helpdesk::db::{self, PgPool};
use helpdesk::models::{Job, NewCategory, NewUser};
use helpdesk::routes;
use helpdesk::state::AppState;
use helpdesk::storage::LocalDiskStorage;
use http_body_util::BodyExt;
use once_cell::sync::Lazy;
use rand::rngs::OsRng;
use serde::Serialize;
use tempfile::TempDir;
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use uuid::Uuid;

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

pub struct TestApp {
    pub state: AppState,
    router: Router,
    _upload_dir: TempDir,
}

impl TestApp {
    pub async fn new() -> Result<Self> {
        let database_url = env::var("TEST_DATABASE_URL")
            .context("TEST_DATABASE_URL must be set for integration tests")?;

        let upload_dir = TempDir::new().context("failed to create upload tempdir")?;
        let config = AppConfig {
            database_url: database_url.clone(),
            database_max_pool_size: db::DEFAULT_MAX_POOL_SIZE,
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            session_ttl_hours: 24,
            session_cookie_secure: false,
            session_cookie_domain: None,
            cors_allowed_origin: None,
            upload_dir: upload_dir.path().to_string_lossy().into_owned(),
            public_base_url: "http://localhost:3000".to_string(),
            mail_relay_url: None,
            mail_relay_access_key: None,
        };

        let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
        prepare_database(&pool).await?;

        let storage = Arc::new(LocalDiskStorage::new(upload_dir.path().to_path_buf())?);
        let state = AppState::new(pool.clone(), config, storage);
        let router = routes::create_router(state.clone());

        Ok(Self {
            state,
            router,
            _upload_dir: upload_dir,
        })
    }

    pub async fn cleanup(&self) -> Result<()> {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get cleanup connection: {err}"))?;
            truncate_all(&mut conn)?;
            Ok(())
        })
        .await
        .context("cleanup task panicked")?
    }

    /// Inserts a user with an argon2-hashed password. Agents get a unique
    /// employee id so the partial unique index never trips between tests.
    pub async fn insert_user(&self, email: &str, password: &str, role: &str) -> Result<Uuid> {
        let email = email.to_string();
        let password = password.to_string();
        let role = role.to_string();
        self.with_conn(move |conn| {
            let password_hash = hash_password(&password)?;
            let id = Uuid::new_v4();
            let employee_id =
                (role == "agent").then(|| format!("EMP-{}", &id.simple().to_string()[..8]));
            let user = NewUser {
                id,
                first_name: "Test".to_string(),
                last_name: "User".to_string(),
                email: email.to_lowercase(),
                password_hash,
                role,
                phone: None,
                company: None,
                employee_id,
                department: None,
                presence: "offline".to_string(),
            };
            diesel::insert_into(helpdesk::schema::users::table)
                .values(&user)
                .execute(conn)
                .context("failed to insert user")?;
            Ok(user.id)
        })
        .await
    }

    pub async fn insert_category(&self, name: &str, priority: i32) -> Result<Uuid> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            let category = NewCategory {
                id: Uuid::new_v4(),
                name,
                description: None,
                color: "#007bff".to_string(),
                icon: None,
                priority,
                created_by: None,
            };
            diesel::insert_into(helpdesk::schema::categories::table)
                .values(&category)
                .execute(conn)
                .context("failed to insert category")?;
            Ok(category.id)
        })
        .await
    }

    /// Logs in and returns the `Cookie` header value carrying the session
    /// token, ready to be passed to the request helpers.
    pub async fn login(&self, email: &str, password: &str) -> Result<String> {
        #[derive(Serialize)]
        struct LoginPayload<'a> {
            email: &'a str,
            password: &'a str,
        }

        let response = self
            .post_json("/api/auth/login", &LoginPayload { email, password }, None)
            .await?;

        ensure!(
            response.status() == StatusCode::OK,
            "login failed with status {}",
            response.status()
        );

        let set_cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .ok_or_else(|| anyhow!("login response missing set-cookie"))?
            .to_str()?;
        let pair = set_cookie
            .split(';')
            .next()
            .ok_or_else(|| anyhow!("malformed session cookie"))?;
        Ok(pair.to_string())
    }

    #[allow(dead_code)]
    pub async fn clear_jobs(&self) -> Result<()> {
        self.with_conn(|conn| {
            use helpdesk::schema::jobs::dsl::jobs as jobs_table;
            diesel::delete(jobs_table)
                .execute(conn)
                .context("failed to clear jobs")?;
            Ok(())
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn jobs_by_type(&self, ty: &str) -> Result<Vec<Job>> {
        let ty = ty.to_string();
        self.with_conn(move |conn| {
            use helpdesk::schema::jobs::dsl::{job_type as job_type_col, jobs as jobs_table};
            let rows = jobs_table
                .filter(job_type_col.eq(&ty))
                .load::<Job>(conn)
                .context("failed to load jobs")?;
            Ok(rows)
        })
        .await
    }

    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Body,
        content_type: Option<&str>,
        cookie: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(content_type) = content_type {
            builder = builder.header("content-type", content_type);
        }
        if let Some(cookie) = cookie {
            builder = builder.header("cookie", cookie);
        }
        let request = builder.body(body)?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    pub async fn get(&self, path: &str, cookie: Option<&str>) -> Result<hyper::Response<Body>> {
        self.request(Method::GET, path, Body::empty(), None, cookie)
            .await
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        cookie: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        self.request(
            Method::POST,
            path,
            Body::from(body),
            Some("application/json"),
            cookie,
        )
        .await
    }

    #[allow(dead_code)]
    pub async fn put_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        cookie: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        self.request(
            Method::PUT,
            path,
            Body::from(body),
            Some("application/json"),
            cookie,
        )
        .await
    }

    #[allow(dead_code)]
    pub async fn patch(&self, path: &str, cookie: Option<&str>) -> Result<hyper::Response<Body>> {
        self.request(Method::PATCH, path, Body::empty(), None, cookie)
            .await
    }

    #[allow(dead_code)]
    pub async fn delete(&self, path: &str, cookie: Option<&str>) -> Result<hyper::Response<Body>> {
        self.request(Method::DELETE, path, Body::empty(), None, cookie)
            .await
    }

    /// Builds a `multipart/form-data` body from plain fields plus any number
    /// of `attachments` files and posts it.
    #[allow(dead_code)]
    pub async fn post_multipart(
        &self,
        path: &str,
        fields: &[(&str, &str)],
        files: &[(&str, &str, &[u8])],
        cookie: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let boundary = format!("boundary-{}", Uuid::new_v4());
        let mut body = Vec::new();

        for (name, value) in fields {
            body.extend(format!("--{boundary}\r\n").as_bytes());
            body.extend(
                format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
            );
            body.extend(value.as_bytes());
            body.extend(b"\r\n");
        }

        for (filename, content_type, data) in files {
            body.extend(format!("--{boundary}\r\n").as_bytes());
            body.extend(
                format!(
                    "Content-Disposition: form-data; name=\"attachments\"; filename=\"{filename}\"\r\n"
                )
                .as_bytes(),
            );
            body.extend(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
            body.extend(*data);
            body.extend(b"\r\n");
        }

        body.extend(format!("--{boundary}--\r\n").as_bytes());

        self.request(
            Method::POST,
            path,
            Body::from(body),
            Some(&format!("multipart/form-data; boundary={boundary}")),
            cookie,
        )
        .await
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut PgConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get database connection: {err}"))?;
            f(&mut conn)
        })
        .await
        .context("connection task panicked")?
    }
}

pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

pub async fn body_to_json(body: Body) -> Result<serde_json::Value> {
    let bytes = body_to_vec(body).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        db::run_pending_migrations(&mut conn)?;
        truncate_all(&mut conn)?;
        Ok(())
    })
    .await
    .context("migration task panicked")?
}

fn truncate_all(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute(
        "TRUNCATE TABLE ticket_votes, ticket_attachments, ticket_interactions, tickets, \
         sessions, jobs, categories, users RESTART IDENTITY CASCADE;",
    )
    .context("failed to truncate tables")?;
    Ok(())
}

fn hash_password(password: &str) -> Result<String> {
    use argon2::password_hash::{PasswordHasher, SaltString};
    use argon2::Argon2;

    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| anyhow!("failed to hash password: {err}"))?
        .to_string())
}
