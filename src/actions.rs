use std::net::Ipv4Addr;
use std::sync::Arc;

use actix_web::{get, post, web, HttpResponse, Responder};
use chrono::Utc;
use regex::Regex;
use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::action_generator::generate_actions;
use crate::auth::AuthedAnalyst;
use crate::config::Settings;
use crate::execution_engine::execute_action;
use crate::mitre::MitreClassifier;
use crate::models::{self, ActionLog, ActionUpdateError};

// ── RFC1918 / reserved source guard ──────────────────────────────────────────
// Firewall actions only make sense against publicly routable attacker
// addresses. Private, loopback, link-local, this-network and unparseable
// strings are all rejected before the generator runs.

pub fn is_private_or_reserved(ip: &str) -> bool {
    let addr: Ipv4Addr = match ip.parse() {
        Ok(a) => a,
        Err(_) => return true,
    };
    let octets = addr.octets();
    addr.is_private()          // 10/8, 172.16/12, 192.168/16
        || addr.is_loopback()  // 127/8
        || addr.is_link_local() // 169.254/16
        || octets[0] == 0 // 0/8
}

pub fn extract_ipv4(text: &str) -> Option<String> {
    let re = Regex::new(r"(\d{1,3}(?:\.\d{1,3}){3})").ok()?;
    re.captures(text)?.get(1).map(|m| m.as_str().to_string())
}

// ── POST /actions/propose ────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct ProposeActionsRequest {
    pub incident_id: String,
    pub session_id: Option<String>,
}

#[post("/actions/propose")]
pub async fn propose_actions(
    pool: web::Data<PgPool>,
    classifier: web::Data<Arc<MitreClassifier>>,
    body: web::Json<ProposeActionsRequest>,
) -> impl Responder {
    let incident = match models::fetch_incident(pool.get_ref(), &body.incident_id).await {
        Ok(Some(incident)) => incident,
        Ok(None) => {
            return HttpResponse::NotFound().json(serde_json::json!({
                "error": format!("Incident '{}' not found", body.incident_id)
            }))
        }
        Err(e) => {
            log::error!("[Actions] Incident lookup failed: {}", e);
            return HttpResponse::InternalServerError()
                .json(serde_json::json!({ "error": e.to_string() }));
        }
    };

    // Threat actor address lives in the raw log (or, failing that, the title).
    let src_ip = extract_ipv4(&incident.raw_log).or_else(|| extract_ipv4(&incident.title));

    let src_ip = match src_ip {
        Some(ip) if !is_private_or_reserved(&ip) => ip,
        other => {
            log::warn!(
                "[Actions] Propose blocked: src_ip={:?} is private/reserved (incident {})",
                other,
                body.incident_id
            );
            return HttpResponse::BadRequest().json(serde_json::json!({
                "error": format!(
                    "Cannot generate firewall actions for private/reserved IP '{}'. \
                     Threat actor IPs must be publicly routable addresses.",
                    other.unwrap_or_default()
                )
            }));
        }
    };

    // The incident row stores the technique id; resolve its display name from
    // the loaded corpus.
    let technique_name = incident
        .mitre_technique
        .as_deref()
        .and_then(|tid| classifier.technique_by_id(tid))
        .map(|t| t.name.clone());

    let proposed = generate_actions(
        &src_ip,
        &incident.severity,
        incident.mitre_tactic.as_deref(),
        incident.mitre_technique.as_deref(),
        technique_name.as_deref(),
    );

    if proposed.is_empty() {
        return HttpResponse::Ok().json(Vec::<ActionLog>::new());
    }

    // All-or-nothing persist: a failed insert rolls the batch back.
    let mut tx = match pool.begin().await {
        Ok(tx) => tx,
        Err(e) => {
            log::error!("[Actions] Failed to open transaction: {}", e);
            return HttpResponse::InternalServerError()
                .json(serde_json::json!({ "error": e.to_string() }));
        }
    };

    let mut saved: Vec<ActionLog> = Vec::with_capacity(proposed.len());
    for p in proposed {
        let record = ActionLog {
            id: Uuid::new_v4().to_string(),
            incident_id: Some(body.incident_id.clone()),
            session_id: body.session_id.clone(),
            action_type: p.action_type,
            command: p.command,
            parameters: Some(p.parameters.to_string()),
            reason: Some(p.reason),
            risk_level: Some(p.risk_level),
            status: "pending".to_string(),
            simulated: true,
            execution_output: None,
            reviewed_by: None,
            reject_reason: None,
            created_at: Utc::now(),
            reviewed_at: None,
            executed_at: None,
        };

        let insert = sqlx::query(
            "INSERT INTO action_logs
             (id, incident_id, session_id, action_type, command, parameters, reason,
              risk_level, status, simulated, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(&record.id)
        .bind(&record.incident_id)
        .bind(&record.session_id)
        .bind(&record.action_type)
        .bind(&record.command)
        .bind(&record.parameters)
        .bind(&record.reason)
        .bind(&record.risk_level)
        .bind(&record.status)
        .bind(record.simulated)
        .bind(record.created_at)
        .execute(&mut *tx)
        .await;

        if let Err(e) = insert {
            log::error!("[Actions] Insert failed, rolling back batch: {}", e);
            let _ = tx.rollback().await;
            return HttpResponse::InternalServerError()
                .json(serde_json::json!({ "error": e.to_string() }));
        }
        saved.push(record);
    }

    if let Err(e) = tx.commit().await {
        log::error!("[Actions] Commit failed: {}", e);
        return HttpResponse::InternalServerError()
            .json(serde_json::json!({ "error": e.to_string() }));
    }

    log::info!(
        "[Actions] {} action(s) proposed for incident {}",
        saved.len(),
        body.incident_id
    );
    HttpResponse::Ok().json(saved)
}

// ── GET /actions ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct ActionListQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[get("/actions")]
pub async fn list_actions(
    pool: web::Data<PgPool>,
    query: web::Query<ActionListQuery>,
) -> impl Responder {
    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let offset = query.offset.unwrap_or(0).max(0);

    let total = match models::count_actions(pool.get_ref(), query.status.as_deref()).await {
        Ok(total) => total,
        Err(e) => {
            log::error!("[Actions] Count failed: {}", e);
            return HttpResponse::InternalServerError()
                .json(serde_json::json!({ "error": e.to_string() }));
        }
    };

    let rows = match &query.status {
        Some(status) => {
            sqlx::query_as::<_, ActionLog>(
                "SELECT * FROM action_logs WHERE status = $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3",
            )
            .bind(status)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool.get_ref())
            .await
        }
        None => {
            sqlx::query_as::<_, ActionLog>(
                "SELECT * FROM action_logs ORDER BY created_at DESC LIMIT $1 OFFSET $2",
            )
            .bind(limit)
            .bind(offset)
            .fetch_all(pool.get_ref())
            .await
        }
    };

    match rows {
        Ok(actions) => {
            HttpResponse::Ok().json(serde_json::json!({ "total": total, "actions": actions }))
        }
        Err(e) => HttpResponse::InternalServerError()
            .json(serde_json::json!({ "error": e.to_string() })),
    }
}

// ── POST /actions/{id}/approve ───────────────────────────────────────────────

async fn load_pending_action(pool: &PgPool, action_id: &str) -> Result<ActionLog, HttpResponse> {
    match models::fetch_action(pool, action_id).await {
        Ok(Some(action)) if action.status == "pending" => Ok(action),
        Ok(Some(action)) => Err(HttpResponse::Conflict().json(serde_json::json!({
            "error": format!(
                "Action is already '{}' - only 'pending' actions can be reviewed",
                action.status
            )
        }))),
        Ok(None) => Err(HttpResponse::NotFound()
            .json(serde_json::json!({ "error": "Action not found" }))),
        Err(e) => {
            log::error!("[Actions] Action lookup failed: {}", e);
            Err(HttpResponse::InternalServerError()
                .json(serde_json::json!({ "error": e.to_string() })))
        }
    }
}

fn persist_review_response(
    rows_affected: Result<u64, ActionUpdateError>,
    updated: ActionLog,
) -> HttpResponse {
    match rows_affected {
        Ok(0) => HttpResponse::Conflict().json(serde_json::json!({
            "error": "Action was reviewed concurrently - only 'pending' actions can be reviewed"
        })),
        Ok(_) => HttpResponse::Ok().json(updated),
        Err(e) => {
            log::error!("[Actions] Review update failed: {}", e);
            HttpResponse::InternalServerError().json(serde_json::json!({ "error": e.to_string() }))
        }
    }
}

/// Human approval gate: runs the execution engine (simulation unless real
/// execution is enabled process-wide) and records the terminal state. The
/// reviewer identity comes from the bearer token, never the body.
#[post("/actions/{action_id}/approve")]
pub async fn approve_action(
    pool: web::Data<PgPool>,
    settings: web::Data<Settings>,
    path: web::Path<String>,
    analyst: AuthedAnalyst,
) -> impl Responder {
    let action_id = path.into_inner();
    let action = match load_pending_action(pool.get_ref(), &action_id).await {
        Ok(action) => action,
        Err(resp) => return resp,
    };

    let use_simulation = !settings.allow_real_execution;
    let result = execute_action(&action.command, use_simulation).await;

    let mut updated = action.clone();
    updated.status = if result.success { "executed" } else { "failed" }.to_string();
    updated.reviewed_by = Some(analyst.0.clone());
    updated.reviewed_at = Some(Utc::now());
    updated.executed_at = Some(result.executed_at);
    updated.simulated = result.simulated;
    updated.execution_output = Some(result.output);

    let rows = models::update_action_row(pool.get_ref(), &action, &updated).await;
    log::info!(
        "[Actions] {} approved by {:?} -> status={} simulated={}",
        action_id,
        analyst.0,
        updated.status,
        updated.simulated
    );
    persist_review_response(rows, updated)
}

// ── POST /actions/{id}/reject ────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct RejectActionRequest {
    pub reason: String,
}

#[post("/actions/{action_id}/reject")]
pub async fn reject_action(
    pool: web::Data<PgPool>,
    path: web::Path<String>,
    body: web::Json<RejectActionRequest>,
    analyst: AuthedAnalyst,
) -> impl Responder {
    let action_id = path.into_inner();
    if body.reason.trim().is_empty() {
        return HttpResponse::BadRequest()
            .json(serde_json::json!({ "error": "A rejection reason is required" }));
    }

    let action = match load_pending_action(pool.get_ref(), &action_id).await {
        Ok(action) => action,
        Err(resp) => return resp,
    };

    let mut updated = action.clone();
    updated.status = "rejected".to_string();
    updated.reviewed_by = Some(analyst.0.clone());
    updated.reject_reason = Some(body.reason.clone());
    updated.reviewed_at = Some(Utc::now());

    let rows = models::update_action_row(pool.get_ref(), &action, &updated).await;
    log::info!(
        "[Actions] {} rejected by {:?}: {}",
        action_id,
        analyst.0,
        body.reason.chars().take(60).collect::<String>()
    );
    persist_review_response(rows, updated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_and_reserved_ranges_are_rejected() {
        for ip in [
            "10.0.0.5",
            "172.16.0.1",
            "172.31.255.255",
            "192.168.1.100",
            "127.0.0.1",
            "169.254.10.10",
            "0.0.0.0",
            "0.1.2.3",
        ] {
            assert!(is_private_or_reserved(ip), "{} should be rejected", ip);
        }
    }

    #[test]
    fn public_addresses_pass_the_guard() {
        for ip in ["45.33.32.156", "8.8.8.8", "172.32.0.1", "192.169.0.1"] {
            assert!(!is_private_or_reserved(ip), "{} should pass", ip);
        }
    }

    #[test]
    fn malformed_ip_strings_are_treated_as_reserved() {
        for ip in ["", "not-an-ip", "999.1.1.1", "1.2.3", "::1"] {
            assert!(is_private_or_reserved(ip), "{:?} should be rejected", ip);
        }
    }

    #[test]
    fn first_ipv4_in_text_wins() {
        let raw = "Priority: 2 {TCP} 45.33.32.156 -> 192.168.1.100:22";
        assert_eq!(extract_ipv4(raw).as_deref(), Some("45.33.32.156"));
        assert_eq!(extract_ipv4("no address here"), None);
    }
}
