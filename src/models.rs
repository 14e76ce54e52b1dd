use chrono::NaiveDateTime;
use diesel::prelude::*;
use uuid::Uuid;

use crate::schema::*;

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password_hash: String,
    pub role: String,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub employee_id: Option<String>,
    pub department: Option<String>,
    pub presence: String,
    pub is_active: bool,
    pub last_login_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password_hash: String,
    pub role: String,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub employee_id: Option<String>,
    pub department: Option<String>,
    pub presence: String,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = categories)]
pub struct Category {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub color: String,
    pub icon: Option<String>,
    pub priority: i32,
    pub is_active: bool,
    pub created_by: Option<Uuid>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = categories)]
pub struct NewCategory {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub color: String,
    pub icon: Option<String>,
    pub priority: i32,
    pub created_by: Option<Uuid>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = tickets)]
pub struct Ticket {
    pub id: Uuid,
    pub display_code: String,
    pub subject: String,
    pub description: String,
    pub status: String,
    pub priority: String,
    pub category_id: Uuid,
    pub customer_id: Uuid,
    pub assigned_agent_id: Option<Uuid>,
    pub escalation_level: i32,
    pub escalation_reason: Option<String>,
    pub resolution: Option<String>,
    pub resolution_minutes: Option<i32>,
    pub due_date: Option<NaiveDateTime>,
    pub satisfaction_rating: Option<i32>,
    pub tags: Vec<String>,
    pub upvotes: i32,
    pub downvotes: i32,
    pub first_response_at: Option<NaiveDateTime>,
    pub reopen_count: i32,
    pub created_at: NaiveDateTime,
    pub last_updated: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = tickets)]
pub struct NewTicket {
    pub id: Uuid,
    pub display_code: String,
    pub subject: String,
    pub description: String,
    pub status: String,
    pub priority: String,
    pub category_id: Uuid,
    pub customer_id: Uuid,
    pub assigned_agent_id: Option<Uuid>,
    pub due_date: Option<NaiveDateTime>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = ticket_interactions)]
#[diesel(belongs_to(Ticket))]
pub struct TicketInteraction {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub kind: String,
    pub content: String,
    pub author_id: Uuid,
    pub author_kind: String,
    pub is_internal: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = ticket_interactions)]
pub struct NewTicketInteraction {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub kind: String,
    pub content: String,
    pub author_id: Uuid,
    pub author_kind: String,
    pub is_internal: bool,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = ticket_attachments)]
#[diesel(belongs_to(Ticket))]
pub struct TicketAttachment {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub interaction_id: Option<Uuid>,
    pub filename: String,
    pub original_name: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub url: String,
    pub uploaded_by: Uuid,
    pub uploader_kind: String,
    pub uploaded_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = ticket_attachments)]
pub struct NewTicketAttachment {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub interaction_id: Option<Uuid>,
    pub filename: String,
    pub original_name: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub url: String,
    pub uploaded_by: Uuid,
    pub uploader_kind: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = ticket_votes)]
#[diesel(belongs_to(Ticket))]
#[diesel(belongs_to(User))]
#[diesel(primary_key(ticket_id, user_id))]
pub struct TicketVote {
    pub ticket_id: Uuid,
    pub user_id: Uuid,
    pub vote_type: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = ticket_votes)]
pub struct NewTicketVote {
    pub ticket_id: Uuid,
    pub user_id: Uuid,
    pub vote_type: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = sessions)]
#[diesel(belongs_to(User))]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub created_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
    pub revoked_at: Option<NaiveDateTime>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = sessions)]
pub struct NewSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = jobs)]
pub struct Job {
    pub id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub attempts: i32,
    pub run_after: NaiveDateTime,
    pub last_error: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = jobs)]
pub struct NewJob {
    pub id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub run_after: NaiveDateTime,
}
