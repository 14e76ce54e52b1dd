use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, patch, post, put},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub mod admin;
pub mod auth;
pub mod categories;
pub mod health;
pub mod session;
pub mod tickets;

pub fn create_router(state: AppState) -> Router<()> {
    let cors = if let Some(origins) = state.config.cors_allowed_origin.as_ref() {
        let headers: Vec<HeaderValue> = origins
            .split(',')
            .filter_map(|value| {
                let trimmed = value.trim();
                (!trimmed.is_empty()).then(|| {
                    trimmed
                        .parse::<HeaderValue>()
                        .expect("invalid CORS allowed origin")
                })
            })
            .collect();

        let allow_origin = AllowOrigin::list(headers);

        CorsLayer::new()
            .allow_origin(allow_origin)
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::mirror_request())
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    };

    let auth_routes = Router::new()
        .route("/login", post(auth::login))
        .route("/logout", post(auth::logout))
        .route("/customer/signup", post(auth::customer_signup))
        .route("/customer/login", post(auth::customer_login))
        .route("/agent/signup", post(auth::agent_signup))
        .route("/agent/login", post(auth::agent_login));

    let session_routes = Router::new()
        .route("/me", get(session::me))
        .route("/check", get(session::check));

    let tickets_routes = Router::new()
        .route("/", get(tickets::list_tickets).post(tickets::create_ticket))
        .route("/agent/create", post(tickets::agent_create_ticket))
        .route("/stats/dashboard", get(tickets::dashboard_stats))
        .route("/stats/team", get(tickets::team_stats))
        .route("/:id", get(tickets::get_ticket))
        .route(
            "/:id/assign",
            put(tickets::assign_ticket).post(tickets::assign_ticket_action),
        )
        .route("/:id/status", post(tickets::set_status))
        .route("/:id/reply", post(tickets::agent_reply))
        .route("/:id/customer-reply", post(tickets::customer_reply))
        .route("/:id/vote", post(tickets::vote))
        .route("/:id/escalate", post(tickets::escalate))
        .route("/:id/resolve", post(tickets::resolve));

    let admin_routes = Router::new()
        .route("/users", get(admin::list_users).post(admin::create_user))
        .route("/users/:id", put(admin::update_user).delete(admin::delete_user))
        .route("/users/:id/toggle-status", patch(admin::toggle_user_status))
        .route(
            "/categories",
            get(admin::list_categories).post(admin::create_category),
        )
        .route(
            "/categories/:id",
            put(admin::update_category).delete(admin::delete_category),
        )
        .route(
            "/categories/:id/toggle-status",
            patch(admin::toggle_category_status),
        );

    // Attachment ceilings are 10 MiB x 5 files; the body limit leaves room
    // for an oversize upload to reach the validator and be rejected there
    // with a structured error instead of a bare 413.
    let upload_dir = state.config.upload_dir.clone();
    Router::new()
        .nest("/api/auth", auth_routes)
        .nest("/api/session", session_routes)
        .nest("/api/tickets", tickets_routes)
        // `nest` alone does not match the bare trailing-slash form of the
        // collection URL, which clients use interchangeably with `/api/tickets`.
        .route(
            "/api/tickets/",
            get(tickets::list_tickets).post(tickets::create_ticket),
        )
        .nest("/api/admin", admin_routes)
        .route("/api/categories", get(categories::list_active))
        .route("/api/health", get(health::health_check))
        .nest_service("/uploads", ServeDir::new(upload_dir))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(1024 * 1024 * 64))
}
