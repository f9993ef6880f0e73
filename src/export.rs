use actix_web::{get, web, HttpResponse, Responder};
use chrono::Utc;
use futures::stream;
use sqlx::PgPool;

use crate::models::{ActionLog, IncidentLog};

// Rows are pulled from the store in fixed-size batches and each batch is
// flushed as one CSV chunk, so an export never materialises the full table.
const EXPORT_BATCH_SIZE: i64 = 100;

fn export_filename(prefix: &str) -> String {
    format!("argus_{}_{}.csv", prefix, Utc::now().format("%Y%m%d_%H%M%S"))
}

fn csv_chunk(records: Vec<Vec<String>>) -> Result<web::Bytes, actix_web::Error> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for record in records {
        writer
            .write_record(&record)
            .map_err(actix_web::error::ErrorInternalServerError)?;
    }
    let buf = writer
        .into_inner()
        .map_err(actix_web::error::ErrorInternalServerError)?;
    Ok(web::Bytes::from(buf))
}

fn opt_ts(value: &Option<chrono::DateTime<Utc>>) -> String {
    value.map(|t| t.to_rfc3339()).unwrap_or_default()
}

enum ExportPhase {
    Header,
    Rows(i64),
    Done,
}

#[get("/export/actions.csv")]
pub async fn export_actions_csv(pool: web::Data<PgPool>) -> impl Responder {
    let pool = pool.get_ref().clone();
    log::info!("[Export] Streaming actions CSV (batch={})", EXPORT_BATCH_SIZE);

    let body = stream::unfold(ExportPhase::Header, move |phase| {
        let pool = pool.clone();
        async move {
            match phase {
                ExportPhase::Header => {
                    let header = vec![vec![
                        "id".to_string(),
                        "incident_id".to_string(),
                        "action_type".to_string(),
                        "command".to_string(),
                        "status".to_string(),
                        "simulated".to_string(),
                        "risk_level".to_string(),
                        "reason".to_string(),
                        "reviewed_by".to_string(),
                        "reject_reason".to_string(),
                        "created_at".to_string(),
                        "reviewed_at".to_string(),
                        "executed_at".to_string(),
                    ]];
                    Some((csv_chunk(header), ExportPhase::Rows(0)))
                }
                ExportPhase::Rows(offset) => {
                    let batch = sqlx::query_as::<_, ActionLog>(
                        "SELECT * FROM action_logs ORDER BY created_at ASC LIMIT $1 OFFSET $2",
                    )
                    .bind(EXPORT_BATCH_SIZE)
                    .bind(offset)
                    .fetch_all(&pool)
                    .await;

                    let batch = match batch {
                        Ok(batch) => batch,
                        Err(e) => {
                            log::error!("[Export] Actions batch failed: {}", e);
                            return Some((
                                Err(actix_web::error::ErrorInternalServerError(e)),
                                ExportPhase::Done,
                            ));
                        }
                    };
                    if batch.is_empty() {
                        return None;
                    }

                    let fetched = batch.len() as i64;
                    let records = batch
                        .into_iter()
                        .map(|a| {
                            vec![
                                a.id,
                                a.incident_id.unwrap_or_default(),
                                a.action_type,
                                a.command,
                                a.status,
                                a.simulated.to_string(),
                                a.risk_level.unwrap_or_default(),
                                a.reason.unwrap_or_default(),
                                a.reviewed_by.unwrap_or_default(),
                                a.reject_reason.unwrap_or_default(),
                                a.created_at.to_rfc3339(),
                                opt_ts(&a.reviewed_at),
                                opt_ts(&a.executed_at),
                            ]
                        })
                        .collect();
                    Some((csv_chunk(records), ExportPhase::Rows(offset + fetched)))
                }
                ExportPhase::Done => None,
            }
        }
    });

    HttpResponse::Ok()
        .content_type("text/csv")
        .insert_header((
            "Content-Disposition",
            format!("attachment; filename={}", export_filename("actions")),
        ))
        .streaming(body)
}

#[get("/export/incidents.csv")]
pub async fn export_incidents_csv(pool: web::Data<PgPool>) -> impl Responder {
    let pool = pool.get_ref().clone();
    log::info!("[Export] Streaming incidents CSV (batch={})", EXPORT_BATCH_SIZE);

    let body = stream::unfold(ExportPhase::Header, move |phase| {
        let pool = pool.clone();
        async move {
            match phase {
                ExportPhase::Header => {
                    let header = vec![vec![
                        "id".to_string(),
                        "source".to_string(),
                        "severity".to_string(),
                        "title".to_string(),
                        "src_ip".to_string(),
                        "dst_ip".to_string(),
                        "port".to_string(),
                        "mitre_tactic".to_string(),
                        "mitre_technique".to_string(),
                        "risk_score".to_string(),
                        "status".to_string(),
                        "created_at".to_string(),
                        "resolved_at".to_string(),
                    ]];
                    Some((csv_chunk(header), ExportPhase::Rows(0)))
                }
                ExportPhase::Rows(offset) => {
                    let batch = sqlx::query_as::<_, IncidentLog>(
                        "SELECT * FROM incident_logs ORDER BY created_at ASC LIMIT $1 OFFSET $2",
                    )
                    .bind(EXPORT_BATCH_SIZE)
                    .bind(offset)
                    .fetch_all(&pool)
                    .await;

                    let batch = match batch {
                        Ok(batch) => batch,
                        Err(e) => {
                            log::error!("[Export] Incidents batch failed: {}", e);
                            return Some((
                                Err(actix_web::error::ErrorInternalServerError(e)),
                                ExportPhase::Done,
                            ));
                        }
                    };
                    if batch.is_empty() {
                        return None;
                    }

                    let fetched = batch.len() as i64;
                    let records = batch
                        .into_iter()
                        .map(|i| {
                            vec![
                                i.id,
                                i.source,
                                i.severity,
                                i.title,
                                i.src_ip.unwrap_or_default(),
                                i.dst_ip.unwrap_or_default(),
                                i.port.map(|p| p.to_string()).unwrap_or_default(),
                                i.mitre_tactic.unwrap_or_default(),
                                i.mitre_technique.unwrap_or_default(),
                                format!("{:.2}", i.risk_score),
                                i.status,
                                i.created_at.to_rfc3339(),
                                opt_ts(&i.resolved_at),
                            ]
                        })
                        .collect();
                    Some((csv_chunk(records), ExportPhase::Rows(offset + fetched)))
                }
                ExportPhase::Done => None,
            }
        }
    });

    HttpResponse::Ok()
        .content_type("text/csv")
        .insert_header((
            "Content-Disposition",
            format!("attachment; filename={}", export_filename("incidents")),
        ))
        .streaming(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_chunk_escapes_embedded_commas_and_quotes() {
        let chunk = csv_chunk(vec![vec![
            "a-1".to_string(),
            "netsh advfirewall firewall add rule name=\"Argus-Block-1.2.3.4\"".to_string(),
            "reason, with comma".to_string(),
        ]])
        .unwrap();
        let text = String::from_utf8(chunk.to_vec()).unwrap();
        assert!(text.contains("\"reason, with comma\""));
        assert!(text.starts_with("a-1,"));
    }

    #[test]
    fn export_filenames_are_prefixed_and_stamped() {
        let name = export_filename("actions");
        assert!(name.starts_with("argus_actions_"));
        assert!(name.ends_with(".csv"));
    }
}
