use std::sync::Arc;

use actix_web::{get, post, web, HttpResponse, Responder};
use serde::Deserialize;

use crate::ingest::IncidentPipeline;
use crate::scenario_runner::{ScenarioRunner, StartError};

#[derive(Deserialize)]
pub struct RunScenarioRequest {
    pub scenario_id: String,
}

#[get("/simulation/scenarios")]
pub async fn list_scenarios(runner: web::Data<Arc<ScenarioRunner>>) -> impl Responder {
    HttpResponse::Ok().json(runner.list())
}

/// Launch a scenario replay in the background. Alerts flow through the real
/// ingest pipeline, so they land in the store and on the live stream.
#[post("/simulation/run")]
pub async fn run_scenario(
    runner: web::Data<Arc<ScenarioRunner>>,
    pipeline: web::Data<Arc<IncidentPipeline>>,
    body: web::Json<RunScenarioRequest>,
) -> impl Responder {
    match runner
        .start(&body.scenario_id, pipeline.get_ref().clone())
        .await
    {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({
            "running": true,
            "scenario_id": body.scenario_id,
        })),
        Err(StartError::AlreadyRunning(current)) => {
            HttpResponse::Conflict().json(serde_json::json!({
                "error": format!("Scenario '{}' is already running. Stop it first.", current)
            }))
        }
        Err(StartError::UnknownScenario(id)) => HttpResponse::NotFound().json(serde_json::json!({
            "error": format!("Unknown scenario: {}", id)
        })),
    }
}

#[post("/simulation/stop")]
pub async fn stop_scenario(runner: web::Data<Arc<ScenarioRunner>>) -> impl Responder {
    let stopped = runner.stop().await;
    if stopped {
        log::info!("[Simulation] Scenario stopped by user");
    }
    HttpResponse::Ok().json(serde_json::json!({
        "running": false,
        "scenario_id": serde_json::Value::Null,
    }))
}

#[get("/simulation/status")]
pub async fn simulation_status(runner: web::Data<Arc<ScenarioRunner>>) -> impl Responder {
    let (running, scenario_id) = runner.status().await;
    HttpResponse::Ok().json(serde_json::json!({
        "running": running,
        "scenario_id": scenario_id,
    }))
}
