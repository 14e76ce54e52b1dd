//! Ticket lifecycle rules: status/priority enums, the transition rules for
//! replies and escalation, and the vote bookkeeping. Everything here is pure;
//! the route handlers apply the outcomes inside row-locked transactions.

use chrono::NaiveDateTime;

pub const MAX_ESCALATION_LEVEL: i32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketStatus {
    Open,
    InProgress,
    PendingCustomer,
    Resolved,
    Closed,
}

impl TicketStatus {
    pub const ALL: [TicketStatus; 5] = [
        TicketStatus::Open,
        TicketStatus::InProgress,
        TicketStatus::PendingCustomer,
        TicketStatus::Resolved,
        TicketStatus::Closed,
    ];

    /// Statuses accepted by the direct status endpoint. `pending-customer`
    /// is reachable only through an agent reply.
    pub const DIRECT_TARGETS: [TicketStatus; 4] = [
        TicketStatus::Open,
        TicketStatus::InProgress,
        TicketStatus::Resolved,
        TicketStatus::Closed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TicketStatus::Open => "open",
            TicketStatus::InProgress => "in-progress",
            TicketStatus::PendingCustomer => "pending-customer",
            TicketStatus::Resolved => "resolved",
            TicketStatus::Closed => "closed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == value)
    }

    /// A customer reply reopens tickets that are waiting on the customer or
    /// already resolved; other statuses are left untouched.
    pub fn reopens_on_customer_reply(self) -> bool {
        matches!(self, TicketStatus::PendingCustomer | TicketStatus::Resolved)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TicketPriority {
    Low,
    Medium,
    High,
    Urgent,
}

impl TicketPriority {
    pub const ALL: [TicketPriority; 4] = [
        TicketPriority::Low,
        TicketPriority::Medium,
        TicketPriority::High,
        TicketPriority::Urgent,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TicketPriority::Low => "low",
            TicketPriority::Medium => "medium",
            TicketPriority::High => "high",
            TicketPriority::Urgent => "urgent",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|priority| priority.as_str() == value)
    }

    /// One step up the ladder; urgent never regresses.
    pub fn bumped(self) -> Self {
        match self {
            TicketPriority::Low => TicketPriority::Medium,
            TicketPriority::Medium => TicketPriority::High,
            TicketPriority::High => TicketPriority::Urgent,
            TicketPriority::Urgent => TicketPriority::Urgent,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionKind {
    Note,
    Email,
    Phone,
    Chat,
    System,
}

impl InteractionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            InteractionKind::Note => "note",
            InteractionKind::Email => "email",
            InteractionKind::Phone => "phone",
            InteractionKind::Chat => "chat",
            InteractionKind::System => "system",
        }
    }
}

/// Discriminant of the tagged author/uploader pair stored next to the
/// referenced user id on interactions and attachments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorKind {
    Customer,
    Agent,
}

impl ActorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActorKind::Customer => "customer",
            ActorKind::Agent => "agent",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteKind {
    Up,
    Down,
}

impl VoteKind {
    pub fn as_str(self) -> &'static str {
        match self {
            VoteKind::Up => "up",
            VoteKind::Down => "down",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "up" => Some(VoteKind::Up),
            "down" => Some(VoteKind::Down),
            _ => None,
        }
    }
}

/// Result of applying one vote request against the caller's existing vote.
/// `vote` is the row state afterwards (`None` means the row is removed) and
/// the deltas are applied to the denormalized ticket counters, floored at
/// zero by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteOutcome {
    pub vote: Option<VoteKind>,
    pub upvote_delta: i32,
    pub downvote_delta: i32,
}

pub fn apply_vote(existing: Option<VoteKind>, requested: VoteKind) -> VoteOutcome {
    match existing {
        None => VoteOutcome {
            vote: Some(requested),
            upvote_delta: if requested == VoteKind::Up { 1 } else { 0 },
            downvote_delta: if requested == VoteKind::Down { 1 } else { 0 },
        },
        Some(current) if current == requested => VoteOutcome {
            vote: None,
            upvote_delta: if requested == VoteKind::Up { -1 } else { 0 },
            downvote_delta: if requested == VoteKind::Down { -1 } else { 0 },
        },
        Some(_) => VoteOutcome {
            vote: Some(requested),
            upvote_delta: if requested == VoteKind::Up { 1 } else { -1 },
            downvote_delta: if requested == VoteKind::Down { 1 } else { -1 },
        },
    }
}

/// Escalation bumps priority one step and raises the level, clamped at
/// [`MAX_ESCALATION_LEVEL`]. Status is left unchanged.
pub fn escalate(level: i32, priority: TicketPriority) -> (i32, TicketPriority) {
    ((level + 1).min(MAX_ESCALATION_LEVEL), priority.bumped())
}

pub fn age_hours(created_at: NaiveDateTime, now: NaiveDateTime) -> i64 {
    (now - created_at).num_hours().max(0)
}

pub fn is_overdue(due_date: Option<NaiveDateTime>, now: NaiveDateTime) -> bool {
    due_date.map(|due| now > due).unwrap_or(false)
}

/// Minutes between creation and resolution, recorded on the ticket when an
/// agent resolves it.
pub fn resolution_minutes(created_at: NaiveDateTime, now: NaiveDateTime) -> i32 {
    (now - created_at).num_minutes().clamp(0, i32::MAX as i64) as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn status_roundtrips_through_parse() {
        for status in TicketStatus::ALL {
            assert_eq!(TicketStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TicketStatus::parse("reopened"), None);
    }

    #[test]
    fn direct_targets_exclude_pending_customer() {
        assert!(!TicketStatus::DIRECT_TARGETS.contains(&TicketStatus::PendingCustomer));
    }

    #[test]
    fn customer_reply_reopens_only_pending_and_resolved() {
        assert!(TicketStatus::PendingCustomer.reopens_on_customer_reply());
        assert!(TicketStatus::Resolved.reopens_on_customer_reply());
        assert!(!TicketStatus::Open.reopens_on_customer_reply());
        assert!(!TicketStatus::InProgress.reopens_on_customer_reply());
        assert!(!TicketStatus::Closed.reopens_on_customer_reply());
    }

    #[test]
    fn priority_bumps_one_step_and_never_regresses() {
        assert_eq!(TicketPriority::Low.bumped(), TicketPriority::Medium);
        assert_eq!(TicketPriority::Medium.bumped(), TicketPriority::High);
        assert_eq!(TicketPriority::High.bumped(), TicketPriority::Urgent);
        assert_eq!(TicketPriority::Urgent.bumped(), TicketPriority::Urgent);
    }

    #[test]
    fn escalation_level_clamps_at_cap() {
        let (level, priority) = escalate(0, TicketPriority::Low);
        assert_eq!((level, priority), (1, TicketPriority::Medium));

        let mut level = 0;
        let mut priority = TicketPriority::Low;
        for _ in 0..10 {
            let (next_level, next_priority) = escalate(level, priority);
            level = next_level;
            priority = next_priority;
        }
        assert_eq!(level, MAX_ESCALATION_LEVEL);
        assert_eq!(priority, TicketPriority::Urgent);
    }

    #[test]
    fn first_vote_increments_matching_counter() {
        let outcome = apply_vote(None, VoteKind::Up);
        assert_eq!(outcome.vote, Some(VoteKind::Up));
        assert_eq!((outcome.upvote_delta, outcome.downvote_delta), (1, 0));
    }

    #[test]
    fn repeated_vote_toggles_off() {
        let outcome = apply_vote(Some(VoteKind::Down), VoteKind::Down);
        assert_eq!(outcome.vote, None);
        assert_eq!((outcome.upvote_delta, outcome.downvote_delta), (0, -1));
    }

    #[test]
    fn opposite_vote_flips_both_counters() {
        let outcome = apply_vote(Some(VoteKind::Down), VoteKind::Up);
        assert_eq!(outcome.vote, Some(VoteKind::Up));
        assert_eq!((outcome.upvote_delta, outcome.downvote_delta), (1, -1));
    }

    #[test]
    fn vote_sequence_preserves_counter_invariant() {
        // Simulate a user cycling through every combination; counters must
        // always equal the per-kind count of the (at most one) vote row.
        let mut vote = None;
        let mut ups = 0i32;
        let mut downs = 0i32;
        for requested in [
            VoteKind::Up,
            VoteKind::Up,
            VoteKind::Down,
            VoteKind::Up,
            VoteKind::Down,
            VoteKind::Down,
        ] {
            let outcome = apply_vote(vote, requested);
            vote = outcome.vote;
            ups = (ups + outcome.upvote_delta).max(0);
            downs = (downs + outcome.downvote_delta).max(0);
            let expected_ups = i32::from(vote == Some(VoteKind::Up));
            let expected_downs = i32::from(vote == Some(VoteKind::Down));
            assert_eq!(ups, expected_ups);
            assert_eq!(downs, expected_downs);
        }
    }

    #[test]
    fn overdue_requires_a_due_date() {
        let now = chrono::Utc::now().naive_utc();
        assert!(!is_overdue(None, now));
        assert!(is_overdue(Some(now - Duration::hours(1)), now));
        assert!(!is_overdue(Some(now + Duration::hours(1)), now));
    }

    #[test]
    fn age_and_resolution_are_measured_from_creation() {
        let created = chrono::Utc::now().naive_utc();
        let later = created + Duration::minutes(150);
        assert_eq!(age_hours(created, later), 2);
        assert_eq!(resolution_minutes(created, later), 150);
    }
}
