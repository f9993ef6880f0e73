use std::sync::Arc;

use sqlx::PgPool;

use crate::log_parser::{parse_log_line, IncidentEvent};
use crate::mitre::{MitreClassifier, MitreMatch};
use crate::risk_scorer;
use crate::stream::Broadcaster;

/// Orchestrates parse -> classify -> score -> persist -> broadcast for every
/// raw entry pushed by a log source. Single writer for live incident rows.
pub struct IncidentPipeline {
    pool: PgPool,
    classifier: Arc<MitreClassifier>,
    broadcaster: Arc<Broadcaster>,
}

/// Enriched payload sent to every live subscriber. Shape is fixed.
pub fn build_broadcast_payload(
    event: &IncidentEvent,
    mitre_match: Option<&MitreMatch>,
    risk_score: f64,
) -> serde_json::Value {
    serde_json::json!({
        "type": "alert",
        "id": event.id,
        "source": event.source,
        "severity": event.severity,
        "title": event.title,
        "src_ip": event.src_ip,
        "dst_ip": event.dst_ip,
        "port": event.port,
        "protocol": event.protocol,
        "raw_log": event.raw_log,
        "timestamp": event.timestamp.to_rfc3339(),
        "mitre_id": mitre_match.map(|m| m.technique_id.clone()),
        "mitre_tactic": mitre_match.map(|m| m.tactic.clone()),
        "mitre_technique": mitre_match.map(|m| m.technique_name.clone()),
        "mitre_confidence": mitre_match.map(|m| m.confidence),
        "risk_score": risk_score,
    })
}

impl IncidentPipeline {
    pub fn new(pool: PgPool, classifier: Arc<MitreClassifier>, broadcaster: Arc<Broadcaster>) -> Self {
        IncidentPipeline {
            pool,
            classifier,
            broadcaster,
        }
    }

    pub async fn ingest_raw_log(&self, raw_log: &str, source_hint: &str) -> IncidentEvent {
        // 1. Parse
        let event = parse_log_line(raw_log, source_hint);

        // 2. MITRE classification over title + raw text
        let mitre_match = self
            .classifier
            .classify(&format!("{} {}", event.title, event.raw_log));

        // 3. Composite risk score
        let risk_score = risk_scorer::score(&event.severity, &event.source, mitre_match.as_ref());

        // 4. Persist. A write failure must not take down the broadcast path.
        let insert = sqlx::query(
            "INSERT INTO incident_logs
             (id, source, severity, title, raw_log, src_ip, dst_ip, port, protocol,
              mitre_tactic, mitre_technique, risk_score, status, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, 'open', $13)",
        )
        .bind(&event.id)
        .bind(&event.source)
        .bind(&event.severity)
        .bind(&event.title)
        .bind(&event.raw_log)
        .bind(&event.src_ip)
        .bind(&event.dst_ip)
        .bind(event.port.map(|p| p as i32))
        .bind(&event.protocol)
        .bind(mitre_match.as_ref().map(|m| m.tactic.clone()))
        .bind(mitre_match.as_ref().map(|m| m.technique_id.clone()))
        .bind(risk_score)
        .bind(event.timestamp)
        .execute(&self.pool)
        .await;

        match insert {
            Ok(_) => {
                let mitre_str = mitre_match
                    .as_ref()
                    .map(|m| format!("[{}] {}", m.technique_id, m.tactic))
                    .unwrap_or_else(|| "No MITRE match".to_string());
                log::info!(
                    "[Ingest] Saved [{}] {} | Risk={:.1} | {}",
                    event.severity,
                    event.title.chars().take(50).collect::<String>(),
                    risk_score,
                    mitre_str
                );
            }
            Err(e) => log::error!("[Ingest] DB write failed: {}", e),
        }

        // 5. Broadcast to all live subscribers
        let payload = build_broadcast_payload(&event, mitre_match.as_ref(), risk_score);
        self.broadcaster.send_message(&payload.to_string());

        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mitre::MitreMatch;

    #[test]
    fn payload_has_the_fixed_alert_shape() {
        let event = parse_log_line(
            "[**] [1:1:1] Test Alert [**] [Priority: 1] {TCP} 1.1.1.1 -> 2.2.2.2:80",
            "signature_ids",
        );
        let m = MitreMatch {
            technique_id: "T1595".to_string(),
            technique_name: "Active Scanning".to_string(),
            tactic: "Reconnaissance".to_string(),
            description: String::new(),
            confidence: 0.75,
        };
        let payload = build_broadcast_payload(&event, Some(&m), 8.8);

        assert_eq!(payload["type"], "alert");
        assert_eq!(payload["severity"], "CRITICAL");
        assert_eq!(payload["src_ip"], "1.1.1.1");
        assert_eq!(payload["port"], 80);
        assert_eq!(payload["mitre_id"], "T1595");
        assert_eq!(payload["mitre_technique"], "Active Scanning");
        assert_eq!(payload["mitre_confidence"], 0.75);
        assert_eq!(payload["risk_score"], 8.8);
        assert!(payload["timestamp"].is_string());
    }

    #[test]
    fn payload_round_trips_through_json() {
        let event = parse_log_line("Rule: 80792 (level 14) -> 'Multiple trojans detected.'", "host_ids");
        let payload = build_broadcast_payload(&event, None, 6.95);
        let text = payload.to_string();
        let back: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(back, payload);
        assert!(back["mitre_id"].is_null());
        assert!(back["src_ip"].is_null());
    }
}
