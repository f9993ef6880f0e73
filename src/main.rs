use std::sync::Arc;
use std::time::Duration;

use actix_cors::Cors;
use actix_web::{get, web, App, HttpResponse, HttpServer, Responder};
use chrono::Utc;
use dotenv::dotenv;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Pool, Postgres};
use tokio::task::JoinHandle;

mod action_generator;
mod actions;
mod auth;
mod chat;
mod config;
mod execution_engine;
mod export;
mod incidents;
mod ingest;
mod log_parser;
mod log_simulator;
mod log_tailer;
mod memory;
mod mitre;
mod models;
mod risk_scorer;
mod scenario_runner;
mod simulation;
mod stream;

use config::Settings;
use ingest::IncidentPipeline;
use memory::ConversationMemory;
use mitre::MitreClassifier;
use scenario_runner::ScenarioRunner;
use stream::Broadcaster;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[get("/health")]
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "service": config::SERVICE_NAME,
        "version": config::SERVICE_VERSION,
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

async fn init_db(settings: &Settings) -> Pool<Postgres> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&settings.database_url)
        .await
        .expect("Failed to connect to database");

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS incident_logs (
            id TEXT PRIMARY KEY,
            source TEXT NOT NULL DEFAULT 'unknown',
            severity TEXT NOT NULL DEFAULT 'INFO',
            title TEXT NOT NULL,
            raw_log TEXT NOT NULL DEFAULT '',
            src_ip TEXT,
            dst_ip TEXT,
            port INTEGER,
            protocol TEXT,
            mitre_tactic TEXT,
            mitre_technique TEXT,
            risk_score DOUBLE PRECISION NOT NULL DEFAULT 0.0,
            status TEXT NOT NULL DEFAULT 'open',
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            resolved_at TIMESTAMPTZ
        )",
    )
    .execute(&pool)
    .await
    .expect("Failed to create incident_logs table");

    let _ = sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_incident_logs_created_at ON incident_logs (created_at DESC)",
    )
    .execute(&pool)
    .await;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS action_logs (
            id TEXT PRIMARY KEY,
            incident_id TEXT,
            session_id TEXT,
            action_type TEXT NOT NULL,
            command TEXT NOT NULL,
            parameters TEXT,
            reason TEXT,
            risk_level TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            simulated BOOLEAN NOT NULL DEFAULT TRUE,
            execution_output TEXT,
            reviewed_by TEXT,
            reject_reason TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            reviewed_at TIMESTAMPTZ,
            executed_at TIMESTAMPTZ
        )",
    )
    .execute(&pool)
    .await
    .expect("Failed to create action_logs table");

    let _ = sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_action_logs_incident_id ON action_logs (incident_id)",
    )
    .execute(&pool)
    .await;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS chat_logs (
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            user_message TEXT NOT NULL,
            bot_reply TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
    )
    .execute(&pool)
    .await
    .expect("Failed to create chat_logs table");

    let _ = sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chat_logs_session_id ON chat_logs (session_id)",
    )
    .execute(&pool)
    .await;

    // DB-level backstop for the immutable audit columns. The application
    // layer diffs the same three columns before every update.
    sqlx::query(
        "CREATE OR REPLACE FUNCTION action_logs_guard_audit() RETURNS trigger AS $$
         BEGIN
             IF NEW.created_at IS DISTINCT FROM OLD.created_at
                OR NEW.command IS DISTINCT FROM OLD.command
                OR NEW.action_type IS DISTINCT FROM OLD.action_type THEN
                 RAISE EXCEPTION 'action_logs: created_at, command and action_type are immutable';
             END IF;
             RETURN NEW;
         END
         $$ LANGUAGE plpgsql",
    )
    .execute(&pool)
    .await
    .expect("Failed to create audit guard function");

    sqlx::query(
        "DO $$
         BEGIN
             IF NOT EXISTS (
                 SELECT 1 FROM pg_trigger WHERE tgname = 'action_logs_audit_guard'
             ) THEN
                 CREATE TRIGGER action_logs_audit_guard
                 BEFORE UPDATE ON action_logs
                 FOR EACH ROW EXECUTE FUNCTION action_logs_guard_audit();
             END IF;
         END $$",
    )
    .execute(&pool)
    .await
    .expect("Failed to install audit guard trigger");

    log::info!("[Database] Schema ready.");
    pool
}

fn spawn_log_source(settings: &Settings, pipeline: Arc<IncidentPipeline>) -> JoinHandle<()> {
    if !settings.log_file_path.is_empty() {
        log::info!("[Startup] Tailing log file: {}", settings.log_file_path);
        let path = settings.log_file_path.clone();
        tokio::spawn(async move {
            log_tailer::tail_log_file(path, pipeline).await;
        })
    } else {
        log::warn!(
            "[Startup] RUNNING IN SIMULATION MODE - no real log file configured. \
             Set LOG_FILE_PATH in .env to ingest live IDS alerts."
        );
        let min = settings.log_simulate_interval_min;
        let max = settings.log_simulate_interval_max;
        tokio::spawn(async move {
            log_simulator::run_simulator(pipeline, min, max).await;
        })
    }
}

async fn stop_task(name: &str, handle: JoinHandle<()>) {
    handle.abort();
    let _ = tokio::time::timeout(SHUTDOWN_GRACE, handle).await;
    log::info!("[Shutdown] {} task stopped", name);
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::init();

    let settings = Settings::from_env();
    let pool: PgPool = init_db(&settings).await;

    let classifier = Arc::new(MitreClassifier::load(&settings));
    log::info!("[Startup] MITRE classifier ready ({} techniques)", classifier.len());

    let broadcaster = Arc::new(Broadcaster::new());
    let pipeline = Arc::new(IncidentPipeline::new(
        pool.clone(),
        classifier.clone(),
        broadcaster.clone(),
    ));
    let runner = Arc::new(ScenarioRunner::load(&settings.scenario_dataset_path));
    let conversation_memory = Arc::new(ConversationMemory::new());

    // Background tasks: exactly one log source, plus the chat-memory sweep.
    let source_task = spawn_log_source(&settings, pipeline.clone());
    let memory_task = {
        let conversation_memory = conversation_memory.clone();
        tokio::spawn(async move {
            memory::run_cleanup_loop(conversation_memory).await;
        })
    };

    let settings_data = web::Data::new(settings);
    let pool_data = web::Data::new(pool);
    let broadcaster_data = web::Data::new(broadcaster);
    let pipeline_data = web::Data::new(pipeline);
    let runner_data = web::Data::new(runner.clone());
    let classifier_data = web::Data::new(classifier);
    let memory_data = web::Data::new(conversation_memory);

    println!("Starting Argus-Bridge server on 0.0.0.0:8080");

    let server = HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .wrap(actix_web::middleware::Logger::default())
            .wrap(cors)
            .app_data(settings_data.clone())
            .app_data(pool_data.clone())
            .app_data(broadcaster_data.clone())
            .app_data(pipeline_data.clone())
            .app_data(runner_data.clone())
            .app_data(classifier_data.clone())
            .app_data(memory_data.clone())
            .service(health_check)
            .service(auth::login)
            .service(incidents::list_incidents)
            .service(incidents::get_incident)
            .service(incidents::resolve_incident)
            .service(actions::propose_actions)
            .service(actions::list_actions)
            .service(actions::approve_action)
            .service(actions::reject_action)
            .service(simulation::list_scenarios)
            .service(simulation::run_scenario)
            .service(simulation::stop_scenario)
            .service(simulation::simulation_status)
            .service(export::export_actions_csv)
            .service(export::export_incidents_csv)
            .service(chat::chat)
            .route("/ws/logs", web::get().to(stream::ws_logs_route))
    })
    .bind(("0.0.0.0", 8080))?
    .run();

    let result = server.await;

    log::info!("[Shutdown] Stopping all background tasks...");
    runner.stop().await;
    stop_task("log source", source_task).await;
    stop_task("memory cleanup", memory_task).await;
    log::info!("[Shutdown] All tasks stopped cleanly");

    result
}
