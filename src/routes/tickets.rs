//! The ticket engine's HTTP surface: listing, detail, creation, assignment,
//! replies, voting, escalation, resolution, and the two stats endpoints.
//!
//! Every mutation locks the ticket row (`SELECT ... FOR UPDATE`) inside a
//! transaction so racing requests against the same ticket cannot lose
//! updates. Attachment blobs are fully written to storage before any row
//! references them; if the transaction fails afterwards the blobs are
//! deleted best-effort.

use std::collections::HashMap;

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, NaiveDateTime, NaiveTime, Utc};
use diesel::{dsl::count_star, pg::Pg, prelude::*, sql_types::BigInt};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;
use uuid::Uuid;

use crate::{
    auth::{password, AgentUser, CurrentUser, Role},
    error::{AppError, AppResult},
    jobs::{self, JOB_SEND_STATUS_EMAIL},
    models::{
        Category, NewTicket, NewTicketAttachment, NewTicketInteraction, NewTicketVote, NewUser,
        Ticket, TicketAttachment, TicketInteraction, TicketVote, User,
    },
    schema::{categories, ticket_attachments, ticket_interactions, ticket_votes, tickets, users},
    state::AppState,
    tickets::{
        age_hours, apply_vote, escalate as escalate_ticket, is_overdue, resolution_minutes,
        ActorKind, InteractionKind, TicketPriority, TicketStatus, VoteKind,
    },
    uploads::{stored_filename, validate_attachments, TicketForm, UploadedFile},
};

// ---------------------------------------------------------------------------
// Listing

#[derive(Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub priority: Option<String>,
    pub category: Option<Uuid>,
    pub assigned_agent: Option<Uuid>,
    pub customer: Option<Uuid>,
    pub customer_email: Option<String>,
    pub limit: Option<i64>,
    pub skip: Option<i64>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

#[derive(Serialize)]
pub struct CustomerRef {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub company: Option<String>,
}

#[derive(Serialize)]
pub struct AgentRef {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub department: Option<String>,
}

#[derive(Serialize)]
pub struct CategoryRef {
    pub id: Uuid,
    pub name: String,
    pub color: String,
    pub icon: Option<String>,
}

#[derive(Serialize)]
pub struct TicketSummary {
    pub id: Uuid,
    pub ticket_id: String,
    pub subject: String,
    pub description: String,
    pub status: String,
    pub priority: String,
    pub category: Option<CategoryRef>,
    pub customer: Option<CustomerRef>,
    pub assigned_agent: Option<AgentRef>,
    pub upvotes: i32,
    pub downvotes: i32,
    pub created_at: NaiveDateTime,
    pub last_updated: NaiveDateTime,
    pub age_in_hours: i64,
    pub is_overdue: bool,
    pub interaction_count: i64,
}

const SORTABLE_FIELDS: &[&str] = &[
    "created_at",
    "last_updated",
    "priority",
    "status",
    "subject",
    "upvotes",
];

fn filtered_tickets(
    query: &ListQuery,
    customer_id: Option<Uuid>,
) -> crate::schema::tickets::BoxedQuery<'static, Pg> {
    let mut filtered = tickets::table.into_boxed();
    if let Some(status) = &query.status {
        filtered = filtered.filter(tickets::status.eq(status.clone()));
    }
    if let Some(priority) = &query.priority {
        filtered = filtered.filter(tickets::priority.eq(priority.clone()));
    }
    if let Some(category) = query.category {
        filtered = filtered.filter(tickets::category_id.eq(category));
    }
    if let Some(agent) = query.assigned_agent {
        filtered = filtered.filter(tickets::assigned_agent_id.eq(agent));
    }
    if let Some(customer) = customer_id {
        filtered = filtered.filter(tickets::customer_id.eq(customer));
    }
    filtered
}

pub async fn list_tickets(
    State(state): State<AppState>,
    _user: CurrentUser,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Value>> {
    if let Some(status) = &query.status {
        if TicketStatus::parse(status).is_none() {
            return Err(AppError::validation(format!("invalid status filter {status}")));
        }
    }
    if let Some(priority) = &query.priority {
        if TicketPriority::parse(priority).is_none() {
            return Err(AppError::validation(format!(
                "invalid priority filter {priority}"
            )));
        }
    }

    let mut conn = state.db()?;

    // A customer_email filter narrows to that customer's tickets; an unknown
    // email is an empty page, not an error.
    let mut customer_id = query.customer;
    if let Some(email) = &query.customer_email {
        let found: Option<User> = users::table
            .filter(users::email.eq(email.trim().to_lowercase()))
            .first(&mut conn)
            .optional()?;
        match found {
            Some(user) => customer_id = Some(user.id),
            None => {
                return Ok(Json(json!({
                    "success": true,
                    "tickets": [],
                    "total": 0,
                    "message": "No customer found with that email",
                })));
            }
        }
    }

    let sort_by = query.sort_by.as_deref().unwrap_or("created_at");
    if !SORTABLE_FIELDS.contains(&sort_by) {
        return Err(AppError::validation(format!("cannot sort by {sort_by}")));
    }
    let descending = query.sort_order.as_deref().unwrap_or("desc") != "asc";

    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let skip = query.skip.unwrap_or(0).max(0);

    let total: i64 = filtered_tickets(&query, customer_id)
        .count()
        .get_result(&mut conn)?;

    let mut page = filtered_tickets(&query, customer_id);
    page = match (sort_by, descending) {
        ("created_at", true) => page.order(tickets::created_at.desc()),
        ("created_at", false) => page.order(tickets::created_at.asc()),
        ("last_updated", true) => page.order(tickets::last_updated.desc()),
        ("last_updated", false) => page.order(tickets::last_updated.asc()),
        ("priority", true) => page.order(tickets::priority.desc()),
        ("priority", false) => page.order(tickets::priority.asc()),
        ("status", true) => page.order(tickets::status.desc()),
        ("status", false) => page.order(tickets::status.asc()),
        ("subject", true) => page.order(tickets::subject.desc()),
        ("subject", false) => page.order(tickets::subject.asc()),
        ("upvotes", false) => page.order(tickets::upvotes.asc()),
        _ => page.order(tickets::upvotes.desc()),
    };

    let rows: Vec<Ticket> = page.limit(limit).offset(skip).load(&mut conn)?;
    let ticket_ids: Vec<Uuid> = rows.iter().map(|ticket| ticket.id).collect();

    let mut user_ids: Vec<Uuid> = rows.iter().map(|ticket| ticket.customer_id).collect();
    user_ids.extend(rows.iter().filter_map(|ticket| ticket.assigned_agent_id));
    let user_map: HashMap<Uuid, User> = users::table
        .filter(users::id.eq_any(&user_ids))
        .load::<User>(&mut conn)?
        .into_iter()
        .map(|user| (user.id, user))
        .collect();

    let category_ids: Vec<Uuid> = rows.iter().map(|ticket| ticket.category_id).collect();
    let category_map: HashMap<Uuid, Category> = categories::table
        .filter(categories::id.eq_any(&category_ids))
        .load::<Category>(&mut conn)?
        .into_iter()
        .map(|category| (category.id, category))
        .collect();

    let interaction_counts: HashMap<Uuid, i64> = ticket_interactions::table
        .filter(ticket_interactions::ticket_id.eq_any(&ticket_ids))
        .group_by(ticket_interactions::ticket_id)
        .select((ticket_interactions::ticket_id, count_star()))
        .load::<(Uuid, i64)>(&mut conn)?
        .into_iter()
        .collect();

    let now = Utc::now().naive_utc();
    let summaries: Vec<TicketSummary> = rows
        .into_iter()
        .map(|ticket| {
            let customer = user_map.get(&ticket.customer_id).map(customer_ref);
            let agent = ticket
                .assigned_agent_id
                .and_then(|id| user_map.get(&id))
                .map(agent_ref);
            let category = category_map.get(&ticket.category_id).map(category_ref);
            TicketSummary {
                age_in_hours: age_hours(ticket.created_at, now),
                is_overdue: is_overdue(ticket.due_date, now),
                interaction_count: *interaction_counts.get(&ticket.id).unwrap_or(&0),
                id: ticket.id,
                ticket_id: ticket.display_code,
                subject: ticket.subject,
                description: ticket.description,
                status: ticket.status,
                priority: ticket.priority,
                category,
                customer,
                assigned_agent: agent,
                upvotes: ticket.upvotes,
                downvotes: ticket.downvotes,
                created_at: ticket.created_at,
                last_updated: ticket.last_updated,
            }
        })
        .collect();

    Ok(Json(json!({
        "success": true,
        "tickets": summaries,
        "total": total,
    })))
}

fn customer_ref(user: &User) -> CustomerRef {
    CustomerRef {
        id: user.id,
        name: user.full_name(),
        email: user.email.clone(),
        company: user.company.clone(),
    }
}

fn agent_ref(user: &User) -> AgentRef {
    AgentRef {
        id: user.id,
        name: user.full_name(),
        email: user.email.clone(),
        department: user.department.clone(),
    }
}

fn category_ref(category: &Category) -> CategoryRef {
    CategoryRef {
        id: category.id,
        name: category.name.clone(),
        color: category.color.clone(),
        icon: category.icon.clone(),
    }
}

// ---------------------------------------------------------------------------
// Detail

#[derive(Serialize)]
pub struct AttachmentView {
    pub id: Uuid,
    pub filename: String,
    pub original_name: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub url: String,
    pub uploader_kind: String,
    pub uploaded_at: NaiveDateTime,
}

#[derive(Serialize)]
pub struct InteractionView {
    pub id: Uuid,
    pub kind: String,
    pub content: String,
    pub author: Option<String>,
    pub author_kind: String,
    pub is_internal: bool,
    pub created_at: NaiveDateTime,
    pub attachments: Vec<AttachmentView>,
}

pub async fn get_ticket(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(ticket_id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    let mut conn = state.db()?;
    let ticket = load_ticket(&mut conn, ticket_id)?;

    let customer: Option<User> = users::table
        .find(ticket.customer_id)
        .first(&mut conn)
        .optional()?;
    let agent: Option<User> = match ticket.assigned_agent_id {
        Some(id) => users::table.find(id).first(&mut conn).optional()?,
        None => None,
    };
    let category: Option<Category> = categories::table
        .find(ticket.category_id)
        .first(&mut conn)
        .optional()?;

    let interactions: Vec<TicketInteraction> = ticket_interactions::table
        .filter(ticket_interactions::ticket_id.eq(ticket.id))
        .order(ticket_interactions::created_at.asc())
        .load(&mut conn)?;

    let attachments: Vec<TicketAttachment> = ticket_attachments::table
        .filter(ticket_attachments::ticket_id.eq(ticket.id))
        .order(ticket_attachments::uploaded_at.asc())
        .load(&mut conn)?;

    let author_ids: Vec<Uuid> = interactions.iter().map(|entry| entry.author_id).collect();
    let author_map: HashMap<Uuid, User> = users::table
        .filter(users::id.eq_any(&author_ids))
        .load::<User>(&mut conn)?
        .into_iter()
        .map(|user| (user.id, user))
        .collect();

    let mut by_interaction: HashMap<Uuid, Vec<AttachmentView>> = HashMap::new();
    let mut ticket_level: Vec<AttachmentView> = Vec::new();
    for attachment in attachments {
        let view = attachment_view(&attachment);
        match attachment.interaction_id {
            Some(id) => by_interaction.entry(id).or_default().push(view),
            None => ticket_level.push(view),
        }
    }

    let thread: Vec<InteractionView> = interactions
        .into_iter()
        .map(|entry| InteractionView {
            attachments: by_interaction.remove(&entry.id).unwrap_or_default(),
            author: author_map.get(&entry.author_id).map(User::full_name),
            id: entry.id,
            kind: entry.kind,
            content: entry.content,
            author_kind: entry.author_kind,
            is_internal: entry.is_internal,
            created_at: entry.created_at,
        })
        .collect();

    let user_vote: Option<TicketVote> = ticket_votes::table
        .find((ticket.id, user.user_id))
        .first(&mut conn)
        .optional()?;

    let now = Utc::now().naive_utc();
    Ok(Json(json!({
        "success": true,
        "ticket": {
            "id": ticket.id,
            "ticket_id": ticket.display_code,
            "subject": ticket.subject,
            "description": ticket.description,
            "status": ticket.status,
            "priority": ticket.priority,
            "category": category.as_ref().map(category_ref),
            "customer": customer.as_ref().map(customer_ref),
            "assigned_agent": agent.as_ref().map(agent_ref),
            "escalation_level": ticket.escalation_level,
            "escalation_reason": ticket.escalation_reason,
            "resolution": ticket.resolution,
            "resolution_minutes": ticket.resolution_minutes,
            "due_date": ticket.due_date,
            "satisfaction_rating": ticket.satisfaction_rating,
            "tags": ticket.tags,
            "upvotes": ticket.upvotes,
            "downvotes": ticket.downvotes,
            "user_vote": user_vote.map(|vote| vote.vote_type),
            "reopen_count": ticket.reopen_count,
            "first_response_at": ticket.first_response_at,
            "interactions": thread,
            "attachments": ticket_level,
            "created_at": ticket.created_at,
            "last_updated": ticket.last_updated,
            "age_in_hours": age_hours(ticket.created_at, now),
            "is_overdue": is_overdue(ticket.due_date, now),
        },
    })))
}

fn attachment_view(attachment: &TicketAttachment) -> AttachmentView {
    AttachmentView {
        id: attachment.id,
        filename: attachment.filename.clone(),
        original_name: attachment.original_name.clone(),
        mime_type: attachment.mime_type.clone(),
        size_bytes: attachment.size_bytes,
        url: attachment.url.clone(),
        uploader_kind: attachment.uploader_kind.clone(),
        uploaded_at: attachment.uploaded_at,
    }
}

// ---------------------------------------------------------------------------
// Creation

pub async fn create_ticket(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<Value>)> {
    let form = TicketForm::from_multipart(&mut multipart).await?;
    let mut conn = state.db()?;

    let customer = match (form.text("customer_id"), form.text("customer_email")) {
        (Some(raw), _) => {
            let id: Uuid = raw
                .parse()
                .map_err(|_| AppError::validation("customer_id must be a uuid"))?;
            users::table
                .find(id)
                .first::<User>(&mut conn)
                .optional()?
                .ok_or_else(|| AppError::not_found("customer"))?
        }
        (None, Some(email)) => find_or_provision_customer(&mut conn, email)?,
        (None, None) => {
            return Err(AppError::validation(
                "either customer_id or customer_email is required",
            ));
        }
    };

    let created = create_ticket_inner(&state, &mut conn, &form, &customer, None).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn agent_create_ticket(
    State(state): State<AppState>,
    AgentUser(agent): AgentUser,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<Value>)> {
    let form = TicketForm::from_multipart(&mut multipart).await?;
    let mut conn = state.db()?;

    let email = form.require("customer_email")?;
    let customer = find_or_provision_customer(&mut conn, email)?;

    let assign_to = form
        .text("assign_to_me")
        .filter(|value| matches!(*value, "on" | "true" | "1"))
        .map(|_| agent.user_id);

    let created = create_ticket_inner(&state, &mut conn, &form, &customer, assign_to).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// Shared create path. The attachment blobs are written to storage before
/// the insert transaction; if that transaction fails they are removed.
async fn create_ticket_inner(
    state: &AppState,
    conn: &mut PgConnection,
    form: &TicketForm,
    customer: &User,
    assigned_agent_id: Option<Uuid>,
) -> AppResult<Value> {
    let subject = form.require("subject")?;
    if subject.len() > 200 {
        return Err(AppError::validation("subject must be at most 200 characters"));
    }
    let description = form.require("description")?;

    let category_id: Uuid = form
        .require("category")?
        .parse()
        .map_err(|_| AppError::validation("category must be a uuid"))?;
    let category: Category = categories::table
        .find(category_id)
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found("category"))?;

    let priority = match form.text("priority") {
        Some(raw) => TicketPriority::parse(raw)
            .ok_or_else(|| AppError::validation(format!("invalid priority {raw}")))?,
        None => TicketPriority::Medium,
    };

    let due_date = match form.text("due_date") {
        Some(raw) => Some(
            DateTime::parse_from_rfc3339(raw)
                .map_err(|_| AppError::validation("due_date must be an RFC 3339 timestamp"))?
                .naive_utc(),
        ),
        None => None,
    };

    let tags: Vec<String> = form
        .text("tags")
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|tag| !tag.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    validate_attachments(&form.files)?;
    let stored = store_files(state, &form.files).await?;

    let uploader_kind = if assigned_agent_id.is_some() {
        ActorKind::Agent
    } else {
        ActorKind::Customer
    };
    let uploader_id = assigned_agent_id.unwrap_or(customer.id);

    let ticket_id = Uuid::new_v4();
    let status = if assigned_agent_id.is_some() {
        TicketStatus::InProgress
    } else {
        TicketStatus::Open
    };

    let result = conn.transaction::<Ticket, AppError, _>(|conn| {
        let display_code = next_display_code(conn)?;
        let new_ticket = NewTicket {
            id: ticket_id,
            display_code,
            subject: subject.to_string(),
            description: description.to_string(),
            status: status.as_str().to_string(),
            priority: priority.as_str().to_string(),
            category_id: category.id,
            customer_id: customer.id,
            assigned_agent_id,
            due_date,
            tags,
        };
        diesel::insert_into(tickets::table)
            .values(&new_ticket)
            .execute(conn)?;

        insert_attachments(conn, ticket_id, None, &stored, uploader_id, uploader_kind)?;

        let ticket: Ticket = tickets::table.find(ticket_id).first(conn)?;
        Ok(ticket)
    });

    let ticket = match result {
        Ok(ticket) => ticket,
        Err(err) => {
            discard_files(state, &stored).await;
            return Err(err);
        }
    };

    Ok(json!({
        "success": true,
        "message": "Ticket created successfully",
        "ticket": {
            "id": ticket.id,
            "ticket_id": ticket.display_code,
            "subject": ticket.subject,
            "description": ticket.description,
            "status": ticket.status,
            "priority": ticket.priority,
            "category": category_ref(&category),
            "customer": customer_ref(customer),
            "attachments": stored.iter().map(|upload| json!({
                "filename": upload.filename,
                "original_name": upload.original_name,
                "url": upload.url,
            })).collect::<Vec<_>>(),
            "created_at": ticket.created_at,
        },
    }))
}

/// Unknown customer emails auto-provision a minimal customer record so a
/// ticket can always be filed against an address. The generated password is
/// random and never disclosed; the customer resets it through support.
fn find_or_provision_customer(conn: &mut PgConnection, email: &str) -> AppResult<User> {
    let normalized = email.trim().to_lowercase();
    if !normalized.contains('@') {
        return Err(AppError::validation("customer_email must be an email address"));
    }

    let existing: Option<User> = users::table
        .filter(users::email.eq(&normalized))
        .first(conn)
        .optional()?;
    if let Some(user) = existing {
        return Ok(user);
    }

    let prefix = normalized.split('@').next().unwrap_or("customer");
    let mut chars = prefix.chars();
    let first_name = match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => "Customer".to_string(),
    };

    let mut random = [0u8; 16];
    OsRng.fill_bytes(&mut random);
    let new_user = NewUser {
        id: Uuid::new_v4(),
        first_name,
        last_name: "Customer".to_string(),
        email: normalized,
        password_hash: password::hash_password(&hex::encode(random))?,
        role: Role::Customer.as_str().to_string(),
        phone: None,
        company: None,
        employee_id: None,
        department: None,
        presence: "offline".to_string(),
    };
    diesel::insert_into(users::table)
        .values(&new_user)
        .execute(conn)?;

    let user: User = users::table.find(new_user.id).first(conn)?;
    Ok(user)
}

// ---------------------------------------------------------------------------
// Assignment

#[derive(Deserialize)]
pub struct AssignRequest {
    pub agent_id: Uuid,
}

#[derive(Deserialize)]
pub struct AssignActionRequest {
    pub action: Option<String>,
    pub agent_id: Option<Uuid>,
}

pub async fn assign_ticket(
    State(state): State<AppState>,
    AgentUser(_agent): AgentUser,
    Path(ticket_id): Path<Uuid>,
    Json(payload): Json<AssignRequest>,
) -> AppResult<Json<Value>> {
    let mut conn = state.db()?;
    let ticket = apply_assignment(&mut conn, ticket_id, payload.agent_id)?;
    Ok(Json(assignment_response(&ticket)))
}

pub async fn assign_ticket_action(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(ticket_id): Path<Uuid>,
    Json(payload): Json<AssignActionRequest>,
) -> AppResult<Json<Value>> {
    let target = match payload.action.as_deref() {
        Some("assign-to-me") => {
            if user.role != Role::Agent {
                return Err(AppError::forbidden(
                    "must be logged in as an agent to assign to yourself",
                ));
            }
            user.user_id
        }
        _ => payload
            .agent_id
            .ok_or_else(|| AppError::validation("agent_id is required"))?,
    };

    let mut conn = state.db()?;
    let ticket = apply_assignment(&mut conn, ticket_id, target)?;
    Ok(Json(assignment_response(&ticket)))
}

fn apply_assignment(conn: &mut PgConnection, ticket_id: Uuid, agent_id: Uuid) -> AppResult<Ticket> {
    let agent: Option<User> = users::table
        .find(agent_id)
        .filter(users::role.eq(Role::Agent.as_str()))
        .first(conn)
        .optional()?;
    if agent.is_none() {
        return Err(AppError::not_found("agent"));
    }

    conn.transaction::<Ticket, AppError, _>(|conn| {
        let ticket = lock_ticket(conn, ticket_id)?;
        // Assignment only advances open tickets; other states keep theirs.
        let status = if ticket.status == TicketStatus::Open.as_str() {
            TicketStatus::InProgress.as_str()
        } else {
            ticket.status.as_str()
        }
        .to_string();

        diesel::update(tickets::table.find(ticket.id))
            .set((
                tickets::assigned_agent_id.eq(agent_id),
                tickets::status.eq(status),
                tickets::last_updated.eq(Utc::now().naive_utc()),
            ))
            .execute(conn)?;

        let refreshed: Ticket = tickets::table.find(ticket.id).first(conn)?;
        Ok(refreshed)
    })
}

fn assignment_response(ticket: &Ticket) -> Value {
    json!({
        "success": true,
        "message": "Ticket assigned successfully",
        "ticket": {
            "id": ticket.id,
            "ticket_id": ticket.display_code,
            "status": ticket.status,
            "assigned_agent_id": ticket.assigned_agent_id,
        },
    })
}

// ---------------------------------------------------------------------------
// Status

#[derive(Deserialize)]
pub struct StatusRequest {
    pub status: String,
}

pub async fn set_status(
    State(state): State<AppState>,
    AgentUser(_agent): AgentUser,
    Path(ticket_id): Path<Uuid>,
    Json(payload): Json<StatusRequest>,
) -> AppResult<Json<Value>> {
    let status = TicketStatus::parse(&payload.status)
        .filter(|status| TicketStatus::DIRECT_TARGETS.contains(status))
        .ok_or_else(|| AppError::validation("invalid status"))?;

    let mut conn = state.db()?;
    let ticket = conn.transaction::<Ticket, AppError, _>(|conn| {
        let ticket = lock_ticket(conn, ticket_id)?;
        diesel::update(tickets::table.find(ticket.id))
            .set((
                tickets::status.eq(status.as_str()),
                tickets::last_updated.eq(Utc::now().naive_utc()),
            ))
            .execute(conn)?;
        let refreshed: Ticket = tickets::table.find(ticket.id).first(conn)?;
        Ok(refreshed)
    })?;

    Ok(Json(json!({
        "success": true,
        "message": "Ticket status updated successfully",
        "ticket": {
            "id": ticket.id,
            "ticket_id": ticket.display_code,
            "status": ticket.status,
        },
    })))
}

// ---------------------------------------------------------------------------
// Replies

struct ReplyOutcome {
    ticket: Ticket,
    old_status: String,
}

pub async fn agent_reply(
    State(state): State<AppState>,
    AgentUser(agent): AgentUser,
    Path(ticket_id): Path<Uuid>,
    mut multipart: Multipart,
) -> AppResult<Json<Value>> {
    let form = TicketForm::from_multipart(&mut multipart).await?;
    let message = form.require("message")?.to_string();
    let requested_status = match form.text("status") {
        Some(raw) => Some(
            TicketStatus::parse(raw)
                .ok_or_else(|| AppError::validation(format!("invalid status {raw}")))?,
        ),
        None => None,
    };

    validate_attachments(&form.files)?;
    let stored = store_files(&state, &form.files).await?;

    let mut conn = state.db()?;
    let result = conn.transaction::<ReplyOutcome, AppError, _>(|conn| {
        let ticket = lock_ticket(conn, ticket_id)?;
        let old_status = ticket.status.clone();
        let now = Utc::now().naive_utc();

        let interaction_id = insert_interaction(
            conn,
            ticket.id,
            InteractionKind::Email,
            &message,
            agent.user_id,
            ActorKind::Agent,
            false,
        )?;
        insert_attachments(
            conn,
            ticket.id,
            Some(interaction_id),
            &stored,
            agent.user_id,
            ActorKind::Agent,
        )?;

        let new_status = requested_status
            .map(|status| status.as_str().to_string())
            .unwrap_or_else(|| old_status.clone());
        let assigned = ticket.assigned_agent_id.unwrap_or(agent.user_id);
        let first_response = ticket.first_response_at.or(Some(now));

        diesel::update(tickets::table.find(ticket.id))
            .set((
                tickets::status.eq(&new_status),
                tickets::assigned_agent_id.eq(assigned),
                tickets::first_response_at.eq(first_response),
                tickets::last_updated.eq(now),
            ))
            .execute(conn)?;

        let refreshed: Ticket = tickets::table.find(ticket.id).first(conn)?;
        Ok(ReplyOutcome {
            ticket: refreshed,
            old_status,
        })
    });

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(err) => {
            discard_files(&state, &stored).await;
            return Err(err);
        }
    };

    // Notification dispatch is best-effort and decoupled from the mutation:
    // the reply has already committed, so an enqueue failure is only logged.
    if outcome.old_status != outcome.ticket.status {
        enqueue_status_notification(&mut conn, &outcome.ticket, &outcome.old_status, &message);
    }

    Ok(Json(json!({
        "success": true,
        "message": "Reply sent successfully",
        "ticket_id": outcome.ticket.id,
        "new_status": outcome.ticket.status,
        "agent_assigned": outcome.ticket.assigned_agent_id.is_some(),
    })))
}

pub async fn customer_reply(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(ticket_id): Path<Uuid>,
    mut multipart: Multipart,
) -> AppResult<Json<Value>> {
    if user.role != Role::Customer {
        return Err(AppError::forbidden("customer role required"));
    }

    let form = TicketForm::from_multipart(&mut multipart).await?;
    let message = form.require("message")?.to_string();

    validate_attachments(&form.files)?;
    let stored = store_files(&state, &form.files).await?;

    let mut conn = state.db()?;
    let result = conn.transaction::<(Ticket, i64), AppError, _>(|conn| {
        let ticket = lock_ticket(conn, ticket_id)?;
        if ticket.customer_id != user.user_id {
            return Err(AppError::forbidden(
                "you can only reply to your own tickets",
            ));
        }

        let now = Utc::now().naive_utc();
        let interaction_id = insert_interaction(
            conn,
            ticket.id,
            InteractionKind::Email,
            &message,
            user.user_id,
            ActorKind::Customer,
            false,
        )?;
        insert_attachments(
            conn,
            ticket.id,
            Some(interaction_id),
            &stored,
            user.user_id,
            ActorKind::Customer,
        )?;

        // A customer reply on a waiting or resolved ticket reopens it.
        let current = TicketStatus::parse(&ticket.status)
            .ok_or_else(|| AppError::internal(format!("unknown status {}", ticket.status)))?;
        let (status, reopen_count) = if current.reopens_on_customer_reply() {
            (TicketStatus::Open.as_str().to_string(), ticket.reopen_count + 1)
        } else {
            (ticket.status.clone(), ticket.reopen_count)
        };

        diesel::update(tickets::table.find(ticket.id))
            .set((
                tickets::status.eq(&status),
                tickets::reopen_count.eq(reopen_count),
                tickets::last_updated.eq(now),
            ))
            .execute(conn)?;

        let refreshed: Ticket = tickets::table.find(ticket.id).first(conn)?;
        let count: i64 = ticket_interactions::table
            .filter(ticket_interactions::ticket_id.eq(ticket.id))
            .count()
            .get_result(conn)?;
        Ok((refreshed, count))
    });

    let (ticket, interaction_count) = match result {
        Ok(pair) => pair,
        Err(err) => {
            discard_files(&state, &stored).await;
            return Err(err);
        }
    };

    Ok(Json(json!({
        "success": true,
        "message": "Reply sent successfully",
        "ticket_id": ticket.id,
        "new_status": ticket.status,
        "interaction_count": interaction_count,
    })))
}

fn enqueue_status_notification(
    conn: &mut PgConnection,
    ticket: &Ticket,
    old_status: &str,
    reply: &str,
) {
    let customer: Option<User> = match users::table.find(ticket.customer_id).first(conn).optional() {
        Ok(customer) => customer,
        Err(err) => {
            warn!(ticket_id = %ticket.id, error = %err, "failed to load customer for notification");
            return;
        }
    };
    let Some(customer) = customer else {
        warn!(ticket_id = %ticket.id, "ticket customer missing; skipping notification");
        return;
    };

    let payload = json!({
        "to": customer.email,
        "ticket_code": ticket.display_code,
        "subject": ticket.subject,
        "old_status": old_status,
        "new_status": ticket.status,
        "reply": reply,
    });
    if let Err(err) = jobs::enqueue_job(conn, JOB_SEND_STATUS_EMAIL, payload, None) {
        warn!(ticket_id = %ticket.id, error = %err, "failed to enqueue status notification");
    }
}

// ---------------------------------------------------------------------------
// Voting

#[derive(Deserialize)]
pub struct VoteRequest {
    pub vote_type: String,
}

pub async fn vote(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(ticket_id): Path<Uuid>,
    Json(payload): Json<VoteRequest>,
) -> AppResult<Json<Value>> {
    let requested = match payload.vote_type.as_str() {
        "upvote" | "up" => VoteKind::Up,
        "downvote" | "down" => VoteKind::Down,
        _ => {
            return Err(AppError::validation(
                "valid vote type (upvote/downvote) required",
            ));
        }
    };

    let mut conn = state.db()?;
    let (ticket, current_vote) = conn.transaction::<(Ticket, Option<VoteKind>), AppError, _>(|conn| {
        let ticket = lock_ticket(conn, ticket_id)?;

        let existing: Option<TicketVote> = ticket_votes::table
            .find((ticket.id, user.user_id))
            .first(conn)
            .optional()?;
        let existing_kind = existing
            .as_ref()
            .and_then(|vote| VoteKind::parse(&vote.vote_type));

        let outcome = apply_vote(existing_kind, requested);
        match (existing_kind, outcome.vote) {
            (None, Some(kind)) => {
                diesel::insert_into(ticket_votes::table)
                    .values(&NewTicketVote {
                        ticket_id: ticket.id,
                        user_id: user.user_id,
                        vote_type: kind.as_str().to_string(),
                    })
                    .execute(conn)?;
            }
            (Some(_), None) => {
                diesel::delete(ticket_votes::table.find((ticket.id, user.user_id)))
                    .execute(conn)?;
            }
            (Some(_), Some(kind)) => {
                diesel::update(ticket_votes::table.find((ticket.id, user.user_id)))
                    .set((
                        ticket_votes::vote_type.eq(kind.as_str()),
                        ticket_votes::created_at.eq(Utc::now().naive_utc()),
                    ))
                    .execute(conn)?;
            }
            (None, None) => {}
        }

        let upvotes = (ticket.upvotes + outcome.upvote_delta).max(0);
        let downvotes = (ticket.downvotes + outcome.downvote_delta).max(0);
        diesel::update(tickets::table.find(ticket.id))
            .set((
                tickets::upvotes.eq(upvotes),
                tickets::downvotes.eq(downvotes),
                tickets::last_updated.eq(Utc::now().naive_utc()),
            ))
            .execute(conn)?;

        let refreshed: Ticket = tickets::table.find(ticket.id).first(conn)?;
        Ok((refreshed, outcome.vote))
    })?;

    let user_vote = current_vote.map(|kind| match kind {
        VoteKind::Up => "upvote",
        VoteKind::Down => "downvote",
    });

    Ok(Json(json!({
        "success": true,
        "message": "Vote recorded successfully",
        "ticket": {
            "id": ticket.id,
            "upvotes": ticket.upvotes,
            "downvotes": ticket.downvotes,
            "user_vote": user_vote,
        },
    })))
}

// ---------------------------------------------------------------------------
// Escalation and resolution

#[derive(Deserialize)]
pub struct EscalateRequest {
    pub reason: Option<String>,
}

pub async fn escalate(
    State(state): State<AppState>,
    AgentUser(_agent): AgentUser,
    Path(ticket_id): Path<Uuid>,
    Json(payload): Json<EscalateRequest>,
) -> AppResult<Json<Value>> {
    let mut conn = state.db()?;
    let ticket = conn.transaction::<Ticket, AppError, _>(|conn| {
        let ticket = lock_ticket(conn, ticket_id)?;
        let priority = TicketPriority::parse(&ticket.priority)
            .ok_or_else(|| AppError::internal(format!("unknown priority {}", ticket.priority)))?;
        let (level, priority) = escalate_ticket(ticket.escalation_level, priority);

        diesel::update(tickets::table.find(ticket.id))
            .set((
                tickets::escalation_level.eq(level),
                tickets::escalation_reason.eq(payload.reason.as_deref()),
                tickets::priority.eq(priority.as_str()),
                tickets::last_updated.eq(Utc::now().naive_utc()),
            ))
            .execute(conn)?;

        let refreshed: Ticket = tickets::table.find(ticket.id).first(conn)?;
        Ok(refreshed)
    })?;

    Ok(Json(json!({
        "success": true,
        "message": "Ticket escalated",
        "ticket": {
            "id": ticket.id,
            "ticket_id": ticket.display_code,
            "status": ticket.status,
            "priority": ticket.priority,
            "escalation_level": ticket.escalation_level,
            "escalation_reason": ticket.escalation_reason,
        },
    })))
}

#[derive(Deserialize)]
pub struct ResolveRequest {
    pub resolution: String,
}

pub async fn resolve(
    State(state): State<AppState>,
    AgentUser(agent): AgentUser,
    Path(ticket_id): Path<Uuid>,
    Json(payload): Json<ResolveRequest>,
) -> AppResult<Json<Value>> {
    let resolution = payload.resolution.trim();
    if resolution.is_empty() {
        return Err(AppError::validation("resolution is required"));
    }

    let mut conn = state.db()?;
    let ticket = conn.transaction::<Ticket, AppError, _>(|conn| {
        let ticket = lock_ticket(conn, ticket_id)?;
        let now = Utc::now().naive_utc();
        let minutes = resolution_minutes(ticket.created_at, now);

        diesel::update(tickets::table.find(ticket.id))
            .set((
                tickets::status.eq(TicketStatus::Resolved.as_str()),
                tickets::resolution.eq(resolution),
                tickets::resolution_minutes.eq(minutes),
                tickets::last_updated.eq(now),
            ))
            .execute(conn)?;

        insert_interaction(
            conn,
            ticket.id,
            InteractionKind::System,
            &format!("Ticket resolved: {resolution}"),
            agent.user_id,
            ActorKind::Agent,
            false,
        )?;

        let refreshed: Ticket = tickets::table.find(ticket.id).first(conn)?;
        Ok(refreshed)
    })?;

    Ok(Json(json!({
        "success": true,
        "message": "Ticket resolved",
        "ticket": {
            "id": ticket.id,
            "ticket_id": ticket.display_code,
            "status": ticket.status,
            "resolution": ticket.resolution,
            "resolution_minutes": ticket.resolution_minutes,
        },
    })))
}

// ---------------------------------------------------------------------------
// Stats

pub async fn dashboard_stats(
    State(state): State<AppState>,
    _user: CurrentUser,
) -> AppResult<Json<Value>> {
    let mut conn = state.db()?;

    let pending: i64 = tickets::table
        .filter(tickets::status.eq_any(["open", "in-progress"]))
        .count()
        .get_result(&mut conn)?;
    let in_progress: i64 = tickets::table
        .filter(tickets::status.eq("in-progress"))
        .count()
        .get_result(&mut conn)?;

    let midnight = Utc::now().date_naive().and_time(NaiveTime::MIN);
    let resolved_today: i64 = tickets::table
        .filter(tickets::status.eq("resolved"))
        .filter(tickets::created_at.ge(midnight))
        .count()
        .get_result(&mut conn)?;

    let minutes: Vec<Option<i32>> = tickets::table
        .filter(tickets::status.eq("resolved"))
        .filter(tickets::resolution_minutes.is_not_null())
        .select(tickets::resolution_minutes)
        .load(&mut conn)?;
    let resolved: Vec<i32> = minutes.into_iter().flatten().collect();
    let avg_minutes = if resolved.is_empty() {
        0.0
    } else {
        resolved.iter().map(|value| *value as f64).sum::<f64>() / resolved.len() as f64
    };

    Ok(Json(json!({
        "success": true,
        "stats": {
            "pending_tickets": pending,
            "in_progress_tickets": in_progress,
            "resolved_today": resolved_today,
            "avg_resolution_time": format!("{:.1}h", avg_minutes / 60.0),
        },
    })))
}

pub async fn team_stats(
    State(state): State<AppState>,
    _user: CurrentUser,
) -> AppResult<Json<Value>> {
    let mut conn = state.db()?;

    let agents: Vec<User> = users::table
        .filter(users::role.eq(Role::Agent.as_str()))
        .order((users::presence.asc(), users::last_name.asc()))
        .load(&mut conn)?;

    let mut grouped: HashMap<&str, Vec<Value>> = HashMap::new();
    for presence in ["online", "away", "busy", "offline"] {
        grouped.insert(presence, Vec::new());
    }
    for agent in &agents {
        let entry = json!({
            "id": agent.id,
            "name": agent.full_name(),
            "email": agent.email,
            "department": agent.department,
            "presence": agent.presence,
        });
        grouped.entry(agent.presence.as_str()).or_default().push(entry);
    }

    let count_of = |presence: &str| grouped.get(presence).map(Vec::len).unwrap_or(0);
    Ok(Json(json!({
        "success": true,
        "team_status": {
            "online": count_of("online"),
            "away": count_of("away"),
            "busy": count_of("busy"),
            "offline": count_of("offline"),
            "total": agents.len(),
        },
        "agents": {
            "online": grouped.get("online").cloned().unwrap_or_default(),
            "away": grouped.get("away").cloned().unwrap_or_default(),
            "busy": grouped.get("busy").cloned().unwrap_or_default(),
            "offline": grouped.get("offline").cloned().unwrap_or_default(),
        },
    })))
}

// ---------------------------------------------------------------------------
// Shared plumbing

fn load_ticket(conn: &mut PgConnection, ticket_id: Uuid) -> AppResult<Ticket> {
    tickets::table
        .find(ticket_id)
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found("ticket"))
}

/// Row-locked read used at the top of every mutation transaction.
fn lock_ticket(conn: &mut PgConnection, ticket_id: Uuid) -> Result<Ticket, AppError> {
    tickets::table
        .find(ticket_id)
        .for_update()
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found("ticket"))
}

/// Display codes come from a dedicated sequence, so two concurrent creators
/// can never be handed the same code.
fn next_display_code(conn: &mut PgConnection) -> Result<String, AppError> {
    let next: i64 = diesel::select(diesel::dsl::sql::<BigInt>(
        "nextval('ticket_display_seq')",
    ))
    .get_result(conn)?;
    Ok(format!("T{next:06}"))
}

fn insert_interaction(
    conn: &mut PgConnection,
    ticket_id: Uuid,
    kind: InteractionKind,
    content: &str,
    author_id: Uuid,
    author_kind: ActorKind,
    is_internal: bool,
) -> Result<Uuid, AppError> {
    let interaction = NewTicketInteraction {
        id: Uuid::new_v4(),
        ticket_id,
        kind: kind.as_str().to_string(),
        content: content.to_string(),
        author_id,
        author_kind: author_kind.as_str().to_string(),
        is_internal,
    };
    diesel::insert_into(ticket_interactions::table)
        .values(&interaction)
        .execute(conn)?;
    Ok(interaction.id)
}

struct StoredUpload {
    filename: String,
    original_name: String,
    mime_type: String,
    size_bytes: i64,
    url: String,
}

async fn store_files(state: &AppState, files: &[UploadedFile]) -> AppResult<Vec<StoredUpload>> {
    let mut stored = Vec::with_capacity(files.len());
    for file in files {
        let filename = stored_filename(&file.original_name);
        if let Err(err) = state.storage.put_file(&filename, file.bytes.clone()).await {
            discard_files(state, &stored).await;
            return Err(AppError::internal(err));
        }
        stored.push(StoredUpload {
            url: state.storage.public_path(&filename),
            filename,
            original_name: file.original_name.clone(),
            mime_type: file.mime_type.clone(),
            size_bytes: file.bytes.len() as i64,
        });
    }
    Ok(stored)
}

async fn discard_files(state: &AppState, stored: &[StoredUpload]) {
    for upload in stored {
        if let Err(err) = state.storage.delete_file(&upload.filename).await {
            warn!(filename = %upload.filename, error = %err, "failed to remove orphaned upload");
        }
    }
}

fn insert_attachments(
    conn: &mut PgConnection,
    ticket_id: Uuid,
    interaction_id: Option<Uuid>,
    stored: &[StoredUpload],
    uploaded_by: Uuid,
    uploader_kind: ActorKind,
) -> Result<(), AppError> {
    for upload in stored {
        let attachment = NewTicketAttachment {
            id: Uuid::new_v4(),
            ticket_id,
            interaction_id,
            filename: upload.filename.clone(),
            original_name: upload.original_name.clone(),
            mime_type: upload.mime_type.clone(),
            size_bytes: upload.size_bytes,
            url: upload.url.clone(),
            uploaded_by,
            uploader_kind: uploader_kind.as_str().to_string(),
        };
        diesel::insert_into(ticket_attachments::table)
            .values(&attachment)
            .execute(conn)?;
    }
    Ok(())
}
