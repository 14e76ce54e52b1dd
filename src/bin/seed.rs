//! Idempotent bootstrap: a default admin, a couple of agents and customers,
//! and the stock category set. Existing rows are left alone, so the binary
//! is safe to run against a populated database.

use anyhow::{Context, Result};
use diesel::prelude::*;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use helpdesk::{
    auth::password,
    config::AppConfig,
    db,
    models::{NewCategory, NewUser, User},
    schema::{categories, users},
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "seed",
        database_url = %config.redacted_database_url(),
        "loaded helpdesk configuration"
    );

    let pool = db::init_pool_with_size(&config.database_url, 1)?;
    let mut conn = pool.get().context("failed to acquire database connection")?;
    db::run_pending_migrations(&mut conn)?;

    let default_password =
        std::env::var("SEED_DEFAULT_PASSWORD").unwrap_or_else(|_| "changeme123".to_string());
    let password_hash = password::hash_password(&default_password)?;

    let seed_users = [
        ("System", "Admin", "admin@helpdesk.local", "admin", None, None),
        (
            "Sarah",
            "Johnson",
            "sarah.johnson@helpdesk.local",
            "agent",
            Some("AGT001"),
            Some("technical"),
        ),
        (
            "Mike",
            "Chen",
            "mike.chen@helpdesk.local",
            "agent",
            Some("AGT002"),
            Some("billing"),
        ),
        ("John", "Doe", "john.doe@email.com", "customer", None, None),
        ("Alice", "Smith", "alice.smith@email.com", "customer", None, None),
    ];

    let mut created_users = 0;
    for (first, last, email, role, employee_id, department) in seed_users {
        let user = NewUser {
            id: Uuid::new_v4(),
            first_name: first.to_string(),
            last_name: last.to_string(),
            email: email.to_string(),
            password_hash: password_hash.clone(),
            role: role.to_string(),
            phone: None,
            company: None,
            employee_id: employee_id.map(str::to_string),
            department: department.map(str::to_string),
            presence: "offline".to_string(),
        };
        created_users += diesel::insert_into(users::table)
            .values(&user)
            .on_conflict_do_nothing()
            .execute(&mut conn)?;
    }

    let admin: Option<User> = users::table
        .filter(users::email.eq("admin@helpdesk.local"))
        .first(&mut conn)
        .optional()?;
    let admin_id = admin.map(|user| user.id);

    let seed_categories = [
        ("Technical Support", "#dc3545", "wrench", 3),
        ("Billing", "#ffc107", "credit-card", 2),
        ("Account", "#17a2b8", "user", 1),
        ("General Inquiry", "#007bff", "question-circle", 0),
    ];

    let mut created_categories = 0;
    for (name, color, icon, priority) in seed_categories {
        let category = NewCategory {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: None,
            color: color.to_string(),
            icon: Some(icon.to_string()),
            priority,
            created_by: admin_id,
        };
        created_categories += diesel::insert_into(categories::table)
            .values(&category)
            .on_conflict_do_nothing()
            .execute(&mut conn)?;
    }

    tracing::info!(created_users, created_categories, "seed complete");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
