use std::process::Stdio;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::process::Command;
use tokio::time::timeout;

// Only commands that START WITH one of these prefixes can ever run. The
// action generator only produces commands on this list; the check runs again
// here at execution time, simulation included.
const COMMAND_ALLOWLIST: &[&str] = &[
    "netsh advfirewall firewall", // Windows firewall rules
    "iptables -A",                // Linux iptables append
    "iptables -I",                // Linux iptables insert
    "firewall-cmd",               // RHEL/CentOS firewalld
    "nmap ",                      // Network scanning (read-only)
    "taskkill /pid",              // Windows process termination
];

pub const EXECUTION_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub success: bool,
    pub simulated: bool,
    pub output: String,
    pub executed_at: DateTime<Utc>,
}

pub fn is_allowed(command: &str) -> bool {
    let lower = command.trim().to_lowercase();
    COMMAND_ALLOWLIST
        .iter()
        .any(|prefix| lower.starts_with(&prefix.to_lowercase()))
}

fn truncate(command: &str, max: usize) -> String {
    command.chars().take(max).collect()
}

/// Split a command line into argv, honouring double quotes. The templated
/// firewall rule names carry quoted segments; nothing else is shell syntax.
fn split_command(command: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for ch in command.chars() {
        match ch {
            '"' => in_quotes = !in_quotes,
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    args.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        args.push(current);
    }
    args
}

/// Execute or simulate a remediation command.
///
/// Simulation (the default) never touches the host. Real execution spawns a
/// subprocess with merged stdout/stderr capture and a hard 15-second cap;
/// a command that fails the allow-list is blocked in both modes.
pub async fn execute_action(command: &str, simulated: bool) -> ExecutionResult {
    let now = Utc::now();

    if !is_allowed(command) {
        let output = format!("BLOCKED: command not in allowlist: {}", truncate(command, 80));
        log::error!("[Execution] {}", output);
        return ExecutionResult {
            success: false,
            simulated,
            output,
            executed_at: now,
        };
    }

    if simulated {
        let output = format!(
            "[SIMULATION] Would execute: {}\n\
             [SIMULATION] No changes were made to the host system.\n\
             [SIMULATION] Set ALLOW_REAL_EXECUTION=true in .env to enable real execution.",
            command
        );
        log::info!("[Execution] SIMULATE: {}", truncate(command, 80));
        return ExecutionResult {
            success: true,
            simulated: true,
            output,
            executed_at: now,
        };
    }

    log::warn!("[Execution] REAL EXEC: {}", truncate(command, 80));
    let args = split_command(command);
    if args.is_empty() {
        return ExecutionResult {
            success: false,
            simulated: false,
            output: "ERROR: empty command".to_string(),
            executed_at: now,
        };
    }

    let child = Command::new(&args[0])
        .args(&args[1..])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();

    let child = match child {
        Ok(c) => c,
        Err(e) => {
            let output = format!("ERROR: {}", e);
            log::error!("[Execution] {}", output);
            return ExecutionResult {
                success: false,
                simulated: false,
                output,
                executed_at: now,
            };
        }
    };

    // kill_on_drop reaps the process if the timeout wins the race.
    match timeout(EXECUTION_TIMEOUT, child.wait_with_output()).await {
        Err(_) => {
            let output = format!("TIMEOUT after {}s - process killed.", EXECUTION_TIMEOUT.as_secs());
            log::error!("[Execution] {}", output);
            ExecutionResult {
                success: false,
                simulated: false,
                output,
                executed_at: now,
            }
        }
        Ok(Err(e)) => {
            let output = format!("ERROR: {}", e);
            log::error!("[Execution] {}", output);
            ExecutionResult {
                success: false,
                simulated: false,
                output,
                executed_at: now,
            }
        }
        Ok(Ok(out)) => {
            let mut output = String::from_utf8_lossy(&out.stdout).to_string();
            let stderr = String::from_utf8_lossy(&out.stderr);
            if !stderr.is_empty() {
                if !output.is_empty() {
                    output.push('\n');
                }
                output.push_str(&stderr);
            }
            if output.is_empty() {
                output = "(no output)".to_string();
            }
            let success = out.status.success();
            log::info!(
                "[Execution] EXIT={:?} | output={}",
                out.status.code(),
                truncate(&output, 120)
            );
            ExecutionResult {
                success,
                simulated: false,
                output,
                executed_at: now,
            }
        }
    }
}
