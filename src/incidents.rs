use actix_web::{get, patch, web, HttpResponse, Responder};
use chrono::Utc;
use serde::Deserialize;
use sqlx::PgPool;

use crate::models::{self, IncidentLog};

#[derive(Deserialize)]
pub struct IncidentListQuery {
    pub limit: Option<i64>,
    pub severity: Option<String>,
    pub status: Option<String>,
}

/// Recent incidents, newest first, optionally filtered by severity and status.
#[get("/incidents")]
pub async fn list_incidents(
    pool: web::Data<PgPool>,
    query: web::Query<IncidentListQuery>,
) -> impl Responder {
    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let severity = query.severity.as_ref().map(|s| s.to_uppercase());
    let status = query.status.as_ref().map(|s| s.to_lowercase());

    let rows = match (&severity, &status) {
        (Some(sev), Some(st)) => {
            sqlx::query_as::<_, IncidentLog>(
                "SELECT * FROM incident_logs WHERE severity = $1 AND status = $2
                 ORDER BY created_at DESC LIMIT $3",
            )
            .bind(sev)
            .bind(st)
            .bind(limit)
            .fetch_all(pool.get_ref())
            .await
        }
        (Some(sev), None) => {
            sqlx::query_as::<_, IncidentLog>(
                "SELECT * FROM incident_logs WHERE severity = $1 ORDER BY created_at DESC LIMIT $2",
            )
            .bind(sev)
            .bind(limit)
            .fetch_all(pool.get_ref())
            .await
        }
        (None, Some(st)) => {
            sqlx::query_as::<_, IncidentLog>(
                "SELECT * FROM incident_logs WHERE status = $1 ORDER BY created_at DESC LIMIT $2",
            )
            .bind(st)
            .bind(limit)
            .fetch_all(pool.get_ref())
            .await
        }
        (None, None) => {
            sqlx::query_as::<_, IncidentLog>(
                "SELECT * FROM incident_logs ORDER BY created_at DESC LIMIT $1",
            )
            .bind(limit)
            .fetch_all(pool.get_ref())
            .await
        }
    };

    match rows {
        Ok(incidents) => HttpResponse::Ok().json(incidents),
        Err(e) => {
            log::error!("[Incidents] List failed: {}", e);
            HttpResponse::InternalServerError().json(serde_json::json!({ "error": e.to_string() }))
        }
    }
}

#[get("/incidents/{incident_id}")]
pub async fn get_incident(pool: web::Data<PgPool>, path: web::Path<String>) -> impl Responder {
    let incident_id = path.into_inner();
    match models::fetch_incident(pool.get_ref(), &incident_id).await {
        Ok(Some(incident)) => HttpResponse::Ok().json(incident),
        Ok(None) => {
            HttpResponse::NotFound().json(serde_json::json!({ "error": "Incident not found" }))
        }
        Err(e) => {
            log::error!("[Incidents] Fetch failed: {}", e);
            HttpResponse::InternalServerError().json(serde_json::json!({ "error": e.to_string() }))
        }
    }
}

/// Analyst action: close out an incident. Only `status` and `resolved_at`
/// ever change on an incident row.
#[patch("/incidents/{incident_id}/resolve")]
pub async fn resolve_incident(pool: web::Data<PgPool>, path: web::Path<String>) -> impl Responder {
    let incident_id = path.into_inner();
    let result = sqlx::query(
        "UPDATE incident_logs SET status = 'resolved', resolved_at = $2 WHERE id = $1",
    )
    .bind(&incident_id)
    .bind(Utc::now())
    .execute(pool.get_ref())
    .await;

    match result {
        Ok(res) if res.rows_affected() == 0 => {
            HttpResponse::NotFound().json(serde_json::json!({ "error": "Incident not found" }))
        }
        Ok(_) => match models::fetch_incident(pool.get_ref(), &incident_id).await {
            Ok(Some(incident)) => HttpResponse::Ok().json(incident),
            Ok(None) => HttpResponse::NotFound()
                .json(serde_json::json!({ "error": "Incident not found" })),
            Err(e) => HttpResponse::InternalServerError()
                .json(serde_json::json!({ "error": e.to_string() })),
        },
        Err(e) => {
            log::error!("[Incidents] Resolve failed: {}", e);
            HttpResponse::InternalServerError().json(serde_json::json!({ "error": e.to_string() }))
        }
    }
}
