//! Audit trail seam.
//!
//! The engine emits one event per committed money movement. Persisting the
//! trail is somebody else's job; the default sink writes structured
//! `tracing` events on the `audit` target so any subscriber can route them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    GamePlay,
    Deposit,
    WithdrawalRequest,
    PayoutComplete,
    PayoutReject,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::GamePlay => "GAME_PLAY",
            AuditAction::Deposit => "DEPOSIT",
            AuditAction::WithdrawalRequest => "WITHDRAWAL_REQUEST",
            AuditAction::PayoutComplete => "PAYOUT_COMPLETE",
            AuditAction::PayoutReject => "PAYOUT_REJECT",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub action: AuditAction,
    pub description: String,
    /// Who caused it: the user for their own actions, the admin for payout
    /// decisions.
    pub actor_id: Uuid,
    /// Whose money moved.
    pub subject_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(action: AuditAction, actor_id: Uuid, subject_id: Uuid, description: impl Into<String>) -> Self {
        Self {
            action,
            description: description.into(),
            actor_id,
            subject_id,
            timestamp: Utc::now(),
        }
    }
}

/// Receives audit events after the mutation they describe has committed.
/// Returns nothing: a failing sink cannot undo a committed ledger change.
#[cfg_attr(test, mockall::automock)]
pub trait AuditSink: Send + Sync {
    fn emit(&self, event: AuditEvent);
}

/// Writes every event as a `tracing` record on target `audit`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        info!(
            target: "audit",
            action = %event.action,
            actor_id = %event.actor_id,
            subject_id = %event.subject_id,
            at = %event.timestamp,
            "{}",
            event.description
        );
    }
}
