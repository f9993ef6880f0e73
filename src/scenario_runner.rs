use std::fs;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::ingest::IncidentPipeline;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub mitre_tactics: Vec<String>,
    #[serde(default = "default_severity")]
    pub severity: String,
    #[serde(default = "default_duration")]
    pub duration_seconds: u64,
    #[serde(default)]
    pub log_sequence: Vec<String>,
}

fn default_severity() -> String {
    "HIGH".to_string()
}

fn default_duration() -> u64 {
    30
}

/// Lightweight listing entry for the scenarios endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioMeta {
    pub id: String,
    pub name: String,
    pub description: String,
    pub mitre_tactics: Vec<String>,
    pub severity: String,
    pub duration_seconds: u64,
    pub log_count: usize,
}

struct RunningReplay {
    scenario_id: String,
    handle: JoinHandle<()>,
}

#[derive(Debug, PartialEq)]
pub enum StartError {
    AlreadyRunning(String),
    UnknownScenario(String),
}

pub const STOP_GRACE: Duration = Duration::from_secs(2);

/// Owns the scenario catalogue and the single-flight replay slot. Only the
/// runner mutates the slot; status readers tolerate a stale done observation
/// and recheck on the next call.
pub struct ScenarioRunner {
    scenarios: Vec<Scenario>,
    running: Mutex<Option<RunningReplay>>,
}

pub fn source_hint_for_line(line: &str) -> &'static str {
    if line.starts_with("[**]") {
        "signature_ids"
    } else {
        "host_ids"
    }
}

impl ScenarioRunner {
    pub fn load(path: &str) -> Self {
        let scenarios = match fs::read_to_string(path) {
            Ok(text) => match serde_json::from_str::<Vec<Scenario>>(&text) {
                Ok(list) => {
                    log::info!("[Scenario] Loaded {} scenarios from {}", list.len(), path);
                    list
                }
                Err(e) => {
                    log::error!("[Scenario] Failed to parse scenarios: {}", e);
                    Vec::new()
                }
            },
            Err(e) => {
                log::error!("[Scenario] Failed to load scenarios from {}: {}", path, e);
                Vec::new()
            }
        };
        Self::from_scenarios(scenarios)
    }

    pub fn from_scenarios(scenarios: Vec<Scenario>) -> Self {
        ScenarioRunner {
            scenarios,
            running: Mutex::new(None),
        }
    }

    pub fn list(&self) -> Vec<ScenarioMeta> {
        self.scenarios
            .iter()
            .map(|s| ScenarioMeta {
                id: s.id.clone(),
                name: s.name.clone(),
                description: s.description.clone(),
                mitre_tactics: s.mitre_tactics.clone(),
                severity: s.severity.clone(),
                duration_seconds: s.duration_seconds,
                log_count: s.log_sequence.len(),
            })
            .collect()
    }

    pub fn get(&self, scenario_id: &str) -> Option<&Scenario> {
        self.scenarios.iter().find(|s| s.id == scenario_id)
    }

    /// Start a replay. Single-flight: while a registered task is unfinished,
    /// starting another returns AlreadyRunning.
    pub async fn start(
        &self,
        scenario_id: &str,
        pipeline: Arc<IncidentPipeline>,
    ) -> Result<(), StartError> {
        let mut slot = self.running.lock().await;
        if let Some(current) = slot.as_ref() {
            if !current.handle.is_finished() {
                return Err(StartError::AlreadyRunning(current.scenario_id.clone()));
            }
        }

        let scenario = self
            .get(scenario_id)
            .cloned()
            .ok_or_else(|| StartError::UnknownScenario(scenario_id.to_string()))?;

        let handle = tokio::spawn(async move {
            replay_scenario(scenario, pipeline).await;
        });
        *slot = Some(RunningReplay {
            scenario_id: scenario_id.to_string(),
            handle,
        });
        log::info!("[Scenario] Started scenario: {}", scenario_id);
        Ok(())
    }

    /// Cancel the running replay (if any), wait briefly for it to wind down,
    /// then clear the slot.
    pub async fn stop(&self) -> bool {
        let mut slot = self.running.lock().await;
        match slot.take() {
            Some(current) if !current.handle.is_finished() => {
                current.handle.abort();
                let _ = tokio::time::timeout(STOP_GRACE, current.handle).await;
                log::info!("[Scenario] Scenario '{}' stopped", current.scenario_id);
                true
            }
            _ => false,
        }
    }

    /// (running, scenario_id) — id is present only while the replay is live.
    pub async fn status(&self) -> (bool, Option<String>) {
        let slot = self.running.lock().await;
        match slot.as_ref() {
            Some(current) if !current.handle.is_finished() => {
                (true, Some(current.scenario_id.clone()))
            }
            _ => (false, None),
        }
    }
}

async fn replay_scenario(scenario: Scenario, pipeline: Arc<IncidentPipeline>) {
    let logs = &scenario.log_sequence;
    // Spread logs evenly across the scenario duration.
    let interval = scenario.duration_seconds as f64 / logs.len().max(1) as f64;

    log::info!(
        "[Scenario] Starting '{}' ({} logs over ~{}s)",
        scenario.name,
        logs.len(),
        scenario.duration_seconds
    );

    let mut count = 0usize;
    for line in logs {
        let hint = source_hint_for_line(line);
        pipeline.ingest_raw_log(line, hint).await;
        count += 1;

        // +-20% jitter for realism.
        let jitter = {
            let mut rng = rand::thread_rng();
            interval * rng.gen_range(0.8..1.2)
        };
        sleep(Duration::from_secs_f64(jitter)).await;
    }

    log::info!("[Scenario] '{}' complete ({} logs emitted)", scenario.name, count);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner_with_one_scenario() -> ScenarioRunner {
        ScenarioRunner::from_scenarios(vec![Scenario {
            id: "ssh_brute_force".to_string(),
            name: "SSH Brute Force".to_string(),
            description: "Repeated failed SSH logins".to_string(),
            mitre_tactics: vec!["Credential Access".to_string()],
            severity: "HIGH".to_string(),
            duration_seconds: 10,
            log_sequence: vec![
                "Rule: 5716 (level 10) -> 'SSHD brute force trying to get access to the system.'".to_string(),
            ],
        }])
    }

    #[test]
    fn hint_from_line_shape() {
        assert_eq!(
            source_hint_for_line("[**] [1:1:1] Something [**] [Priority: 2] {TCP} 1.2.3.4 -> 5.6.7.8:80"),
            "signature_ids"
        );
        assert_eq!(source_hint_for_line("Rule: 5716 (level 10) -> 'x'"), "host_ids");
    }

    #[test]
    fn listing_carries_log_counts() {
        let runner = runner_with_one_scenario();
        let listed = runner.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "ssh_brute_force");
        assert_eq!(listed[0].log_count, 1);
    }

    #[tokio::test]
    async fn unknown_scenario_is_rejected_before_anything_runs() {
        let runner = runner_with_one_scenario();
        assert!(runner.get("nonexistent_xyz").is_none());
        let (running, id) = runner.status().await;
        assert!(!running);
        assert!(id.is_none());
    }

    #[tokio::test]
    async fn stop_with_nothing_running_is_a_noop() {
        let runner = runner_with_one_scenario();
        assert!(!runner.stop().await);
    }
}
