use std::sync::Arc;

use actix_web::{post, web, HttpResponse, Responder};
use chrono::Utc;
use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::memory::ConversationMemory;
use crate::mitre::{MitreClassifier, MitreMatch};
use crate::models::ChatLog;
use crate::risk_scorer;

#[derive(Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub session_id: Option<String>,
}

/// Deterministic analyst reply. The LLM integration is an external
/// collaborator of this service; this responder covers the same surface with
/// the local ATT&CK classifier only.
fn build_reply(message: &str, mitre_match: Option<&MitreMatch>) -> String {
    if let Some(m) = mitre_match {
        return format!(
            "**Argus Analysis**\n\n\
             **MITRE ATT&CK Match:** [{}] {}\n\
             **Tactic:** {} | **Confidence:** {:.0}%\n\n\
             **What this means:** {}\n\n\
             **Recommended actions:**\n\
             - Investigate the source IP for additional connections\n\
             - Review authentication logs for related activity\n\
             - APPROVAL REQUIRED: Consider blocking the offending IP at the perimeter firewall",
            m.technique_id,
            m.technique_name,
            m.tactic,
            m.confidence * 100.0,
            m.description,
        );
    }

    let lower = message.to_lowercase();
    if ["alert", "log", "rule", "priority"].iter().any(|k| lower.contains(k)) {
        return "**Log Analysis**\n\n\
                No specific MITRE ATT&CK technique matched this input.\n\n\
                **General steps:**\n\
                - Identify the source and destination IPs involved\n\
                - Check if the alert rule has triggered previously\n\
                - Correlate with authentication and system logs\n\
                - APPROVAL REQUIRED: Isolate the host if compromise is confirmed"
            .to_string();
    }

    "**Argus**\n\n\
     I can classify alerts against MITRE ATT&CK, compute risk scores, and \
     stream live security events to the dashboard. Paste an alert or ask \
     about a technique to get started."
        .to_string()
}

#[post("/chat")]
pub async fn chat(
    pool: web::Data<PgPool>,
    classifier: web::Data<Arc<MitreClassifier>>,
    memory: web::Data<Arc<ConversationMemory>>,
    body: web::Json<ChatRequest>,
) -> impl Responder {
    if body.message.trim().is_empty() {
        return HttpResponse::BadRequest()
            .json(serde_json::json!({ "error": "message must not be empty" }));
    }

    let session_id = body
        .session_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let mitre_match = classifier.classify(&body.message);
    let query_risk = risk_scorer::score("INFO", "manual", mitre_match.as_ref());
    let reply = build_reply(&body.message, mitre_match.as_ref());

    memory.add_turn(&session_id, &body.message, &reply).await;

    // Audit trail; chat history itself lives in memory only.
    let record = ChatLog {
        id: Uuid::new_v4().to_string(),
        session_id: session_id.clone(),
        user_message: body.message.clone(),
        bot_reply: reply.clone(),
        created_at: Utc::now(),
    };
    let insert = sqlx::query(
        "INSERT INTO chat_logs (id, session_id, user_message, bot_reply, created_at)
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(&record.id)
    .bind(&record.session_id)
    .bind(&record.user_message)
    .bind(&record.bot_reply)
    .bind(record.created_at)
    .execute(pool.get_ref())
    .await;
    if let Err(e) = insert {
        log::error!("[Chat] Failed to persist chat log: {}", e);
    }

    HttpResponse::Ok().json(serde_json::json!({
        "reply": reply,
        "session_id": session_id,
        "timestamp": Utc::now().to_rfc3339(),
        "mitre_id": mitre_match.as_ref().map(|m| m.technique_id.clone()),
        "mitre_tactic": mitre_match.as_ref().map(|m| m.tactic.clone()),
        "mitre_technique": mitre_match.as_ref().map(|m| m.technique_name.clone()),
        "confidence": mitre_match.as_ref().map(|m| m.confidence),
        "risk_score": query_risk,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matched_reply_cites_the_technique() {
        let m = MitreMatch {
            technique_id: "T1110".to_string(),
            technique_name: "Brute Force".to_string(),
            tactic: "Credential Access".to_string(),
            description: "Adversaries may use brute force techniques.".to_string(),
            confidence: 0.5,
        };
        let reply = build_reply("ssh brute force from 45.33.32.156", Some(&m));
        assert!(reply.contains("[T1110] Brute Force"));
        assert!(reply.contains("APPROVAL REQUIRED"));
    }

    #[test]
    fn log_shaped_message_gets_triage_steps() {
        let reply = build_reply("what does this alert mean?", None);
        assert!(reply.contains("General steps"));
    }

    #[test]
    fn smalltalk_gets_the_capability_reply() {
        let reply = build_reply("hello there", None);
        assert!(reply.contains("classify alerts"));
    }
}
