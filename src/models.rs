use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};

/// Persisted security incident. `created_at`, `raw_log`, `title`, `source` and
/// `severity` never change after insert; only `status` and `resolved_at` do.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct IncidentLog {
    pub id: String,
    pub source: String,
    pub severity: String,
    pub title: String,
    pub raw_log: String,
    pub src_ip: Option<String>,
    pub dst_ip: Option<String>,
    pub port: Option<i32>,
    pub protocol: Option<String>,
    pub mitre_tactic: Option<String>,
    // Stores the technique id (T-code); kept under this column name for
    // compatibility with existing consumers.
    pub mitre_technique: Option<String>,
    pub risk_score: f64,
    pub status: String, // open | resolved | ignored
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Audit row for a proposed remediation action. One row covers the full
/// lifecycle: pending -> approved/rejected -> executed/failed.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ActionLog {
    pub id: String,
    pub incident_id: Option<String>,
    pub session_id: Option<String>,
    pub action_type: String, // block_ip | add_firewall_rule | isolate_host | run_scan | kill_process
    pub command: String,
    pub parameters: Option<String>, // JSON-encoded key/value map
    pub reason: Option<String>,
    pub risk_level: Option<String>, // LOW | MEDIUM | HIGH
    pub status: String,             // pending | approved | rejected | executed | failed
    pub simulated: bool,
    pub execution_output: Option<String>,
    pub reviewed_by: Option<String>,
    pub reject_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub executed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ChatLog {
    pub id: String,
    pub session_id: String,
    pub user_message: String,
    pub bot_reply: String,
    pub created_at: DateTime<Utc>,
}

// ── Immutable audit guard ────────────────────────────────────────────────────
// `created_at`, `command` and `action_type` form the tamper-evident core of
// every action record. The update helper below diffs them before touching the
// database; init_db installs a BEFORE UPDATE trigger for the same columns.

pub fn immutable_violation(original: &ActionLog, updated: &ActionLog) -> Option<&'static str> {
    if original.created_at != updated.created_at {
        return Some("created_at");
    }
    if original.command != updated.command {
        return Some("command");
    }
    if original.action_type != updated.action_type {
        return Some("action_type");
    }
    None
}

#[derive(Debug)]
pub enum ActionUpdateError {
    ImmutableField(&'static str),
    Db(sqlx::Error),
}

impl fmt::Display for ActionUpdateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionUpdateError::ImmutableField(col) => {
                write!(f, "immutable field '{}' cannot be modified after creation", col)
            }
            ActionUpdateError::Db(e) => write!(f, "database error: {}", e),
        }
    }
}

impl std::error::Error for ActionUpdateError {}

/// Apply a review-stage update to an action row. The statement only names the
/// mutable columns and is guarded by `status = 'pending'`, so a row moves
/// through the state machine at most once; the returned row count is 0 when a
/// concurrent reviewer won the transition.
pub async fn update_action_row(
    pool: &PgPool,
    original: &ActionLog,
    updated: &ActionLog,
) -> Result<u64, ActionUpdateError> {
    if let Some(col) = immutable_violation(original, updated) {
        log::error!("[Store] Rejected update of immutable action column '{}'", col);
        return Err(ActionUpdateError::ImmutableField(col));
    }

    let result = sqlx::query(
        "UPDATE action_logs
         SET status = $2, simulated = $3, execution_output = $4,
             reviewed_by = $5, reject_reason = $6, reviewed_at = $7, executed_at = $8
         WHERE id = $1 AND status = 'pending'",
    )
    .bind(&original.id)
    .bind(&updated.status)
    .bind(updated.simulated)
    .bind(&updated.execution_output)
    .bind(&updated.reviewed_by)
    .bind(&updated.reject_reason)
    .bind(updated.reviewed_at)
    .bind(updated.executed_at)
    .execute(pool)
    .await
    .map_err(ActionUpdateError::Db)?;

    Ok(result.rows_affected())
}

pub async fn fetch_action(pool: &PgPool, action_id: &str) -> Result<Option<ActionLog>, sqlx::Error> {
    sqlx::query_as::<_, ActionLog>("SELECT * FROM action_logs WHERE id = $1")
        .bind(action_id)
        .fetch_optional(pool)
        .await
}

pub async fn fetch_incident(
    pool: &PgPool,
    incident_id: &str,
) -> Result<Option<IncidentLog>, sqlx::Error> {
    sqlx::query_as::<_, IncidentLog>("SELECT * FROM incident_logs WHERE id = $1")
        .bind(incident_id)
        .fetch_optional(pool)
        .await
}

pub async fn count_actions(pool: &PgPool, status: Option<&str>) -> Result<i64, sqlx::Error> {
    let row = match status {
        Some(s) => {
            sqlx::query("SELECT COUNT(*) AS total FROM action_logs WHERE status = $1")
                .bind(s)
                .fetch_one(pool)
                .await?
        }
        None => {
            sqlx::query("SELECT COUNT(*) AS total FROM action_logs")
                .fetch_one(pool)
                .await?
        }
    };
    Ok(row.get::<i64, _>("total"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_action() -> ActionLog {
        ActionLog {
            id: "a-1".to_string(),
            incident_id: Some("i-1".to_string()),
            session_id: None,
            action_type: "block_ip".to_string(),
            command: "netsh advfirewall firewall add rule name=\"Argus-Block-1.2.3.4\" dir=in action=block remoteip=1.2.3.4".to_string(),
            parameters: None,
            reason: Some("Block inbound traffic".to_string()),
            risk_level: Some("MEDIUM".to_string()),
            status: "pending".to_string(),
            simulated: true,
            execution_output: None,
            reviewed_by: None,
            reject_reason: None,
            created_at: Utc::now(),
            reviewed_at: None,
            executed_at: None,
        }
    }

    #[test]
    fn review_fields_may_change() {
        let original = sample_action();
        let mut updated = original.clone();
        updated.status = "executed".to_string();
        updated.reviewed_by = Some("admin".to_string());
        updated.execution_output = Some("[SIMULATION] ...".to_string());
        assert!(immutable_violation(&original, &updated).is_none());
    }

    #[test]
    fn command_change_is_rejected() {
        let original = sample_action();
        let mut updated = original.clone();
        updated.command = "rm -rf /".to_string();
        assert_eq!(immutable_violation(&original, &updated), Some("command"));
    }

    #[test]
    fn action_type_change_is_rejected() {
        let original = sample_action();
        let mut updated = original.clone();
        updated.action_type = "run_scan".to_string();
        assert_eq!(immutable_violation(&original, &updated), Some("action_type"));
    }

    #[test]
    fn created_at_change_is_rejected() {
        let original = sample_action();
        let mut updated = original.clone();
        updated.created_at = updated.created_at + chrono::Duration::seconds(1);
        assert_eq!(immutable_violation(&original, &updated), Some("created_at"));
    }
}
