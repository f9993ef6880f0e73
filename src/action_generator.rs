use serde_json::json;

/// Deterministic remediation proposal. No free-form command synthesis: every
/// command comes from a fixed template and must start with an allow-listed
/// prefix before it is ever persisted.
#[derive(Debug, Clone)]
pub struct ProposedAction {
    pub action_type: String, // block_ip | add_firewall_rule | isolate_host | run_scan | kill_process
    pub command: String,
    pub parameters: serde_json::Value,
    pub reason: String,
    pub risk_level: String, // LOW | MEDIUM | HIGH
    pub mitre_context: String,
}

fn block_ip(ip: &str, reason: &str, mitre: &str) -> ProposedAction {
    ProposedAction {
        action_type: "block_ip".to_string(),
        command: format!(
            "netsh advfirewall firewall add rule name=\"Argus-Block-{ip}\" dir=in action=block remoteip={ip}"
        ),
        parameters: json!({ "ip": ip, "direction": "inbound" }),
        reason: format!("Block inbound traffic from attacker IP {}. {}", ip, reason),
        risk_level: "MEDIUM".to_string(),
        mitre_context: mitre.to_string(),
    }
}

fn add_firewall_rule(ip: &str, port: u16, reason: &str, mitre: &str) -> ProposedAction {
    ProposedAction {
        action_type: "add_firewall_rule".to_string(),
        command: format!(
            "netsh advfirewall firewall add rule name=\"Argus-Port-{port}\" dir=in action=block remoteip={ip} localport={port} protocol=TCP"
        ),
        parameters: json!({ "ip": ip, "port": port, "protocol": "TCP" }),
        reason: format!("Block TCP port {} from {}. {}", port, ip, reason),
        risk_level: "MEDIUM".to_string(),
        mitre_context: mitre.to_string(),
    }
}

fn isolate_host(host_ip: &str, reason: &str, mitre: &str) -> ProposedAction {
    ProposedAction {
        action_type: "isolate_host".to_string(),
        command: format!(
            "netsh advfirewall firewall add rule name=\"Argus-Isolate-{host_ip}\" dir=in action=block remoteip=any localip={host_ip}"
        ),
        parameters: json!({ "host_ip": host_ip, "scope": "all_traffic" }),
        reason: format!("Network-isolate host {} pending investigation. {}", host_ip, reason),
        risk_level: "HIGH".to_string(),
        mitre_context: mitre.to_string(),
    }
}

fn run_scan(target_ip: &str, reason: &str, mitre: &str) -> ProposedAction {
    ProposedAction {
        action_type: "run_scan".to_string(),
        command: format!("nmap -sV -O --top-ports 1000 {target_ip}"),
        parameters: json!({ "target": target_ip, "type": "service_os_scan" }),
        reason: format!(
            "Run reconnaissance scan on {} to identify open services. {}",
            target_ip, reason
        ),
        risk_level: "LOW".to_string(),
        mitre_context: mitre.to_string(),
    }
}

// Tactic -> ordered action templates. Tactics outside the table fall back to
// a single generic block.
fn actions_for_tactic(tactic: &str, src_ip: &str, mitre: &str) -> Vec<ProposedAction> {
    match tactic {
        "Reconnaissance" => vec![
            block_ip(src_ip, "Attacker is actively scanning your network.", mitre),
            run_scan(src_ip, "Enumerate attacker's exposed services.", mitre),
        ],
        "Credential Access" => vec![
            block_ip(src_ip, "Stop ongoing brute-force credential attacks.", mitre),
            add_firewall_rule(src_ip, 22, "Block SSH access from attacker.", mitre),
        ],
        "Lateral Movement" => vec![
            isolate_host(src_ip, "Prevent lateral spread across network.", mitre),
            block_ip(src_ip, "Cut off command & control channel.", mitre),
        ],
        "Command and Control" => vec![
            block_ip(src_ip, "Sever the C2 communication channel.", mitre),
            add_firewall_rule(src_ip, 443, "Block HTTPS C2 beaconing.", mitre),
        ],
        "Exfiltration" => vec![
            isolate_host(src_ip, "Prevent further data exfiltration.", mitre),
            block_ip(src_ip, "Block attacker contact with exfiltration endpoint.", mitre),
        ],
        "Impact" => vec![
            isolate_host(src_ip, "Contain ransomware/DoS impact radius.", mitre),
            block_ip(src_ip, "Block attacker's DoS/ransomware traffic.", mitre),
        ],
        "Execution" => vec![
            block_ip(src_ip, "Block host executing malicious payloads.", mitre),
            run_scan(src_ip, "Enumerate attacker services and payload delivery infra.", mitre),
        ],
        "Defense Evasion" => vec![
            run_scan(src_ip, "Map attacker's evasion infrastructure.", mitre),
            block_ip(src_ip, "Block evasive attacker IP.", mitre),
        ],
        _ => vec![block_ip(src_ip, "Generic block for unclassified threat.", mitre)],
    }
}

/// Generate remediation proposals for an incident. Low-value events (INFO/LOW
/// without a tactic) and unusable source addresses yield nothing. CRITICAL
/// incidents always lead with host isolation.
pub fn generate_actions(
    src_ip: &str,
    severity: &str,
    mitre_tactic: Option<&str>,
    mitre_id: Option<&str>,
    mitre_technique: Option<&str>,
) -> Vec<ProposedAction> {
    if matches!(severity, "INFO" | "LOW") && mitre_tactic.is_none() {
        log::debug!("[ActionGen] Skipping low-severity event ({}, no MITRE)", severity);
        return Vec::new();
    }

    if src_ip.is_empty() || matches!(src_ip, "0.0.0.0" | "localhost" | "127.0.0.1") {
        log::debug!("[ActionGen] No usable src_ip ({:?}), skipping", src_ip);
        return Vec::new();
    }

    let mitre_ctx = match mitre_id {
        Some(id) => format!("[{}] {}", id, mitre_technique.unwrap_or("")),
        None => "Unknown technique".to_string(),
    };

    let mut actions = actions_for_tactic(mitre_tactic.unwrap_or(""), src_ip, &mitre_ctx);

    if severity == "CRITICAL" && actions.first().map(|a| a.action_type.as_str()) != Some("isolate_host") {
        actions.insert(
            0,
            isolate_host(
                src_ip,
                "CRITICAL severity - immediate isolation recommended.",
                &mitre_ctx,
            ),
        );
    }

    log::info!(
        "[ActionGen] Generated {} action(s) for {} | severity={} tactic={:?}",
        actions.len(),
        src_ip,
        severity,
        mitre_tactic
    );
    actions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution_engine::is_allowed;

    #[test]
    fn credential_access_proposes_block_ip() {
        let actions = generate_actions(
            "45.33.32.156",
            "HIGH",
            Some("Credential Access"),
            Some("T1110"),
            Some("Brute Force"),
        );
        assert!(!actions.is_empty());
        assert!(actions.iter().any(|a| a.action_type == "block_ip"));
    }

    #[test]
    fn critical_severity_prepends_isolate_host() {
        let actions = generate_actions(
            "45.33.32.156",
            "CRITICAL",
            Some("Credential Access"),
            Some("T1110"),
            Some("Brute Force"),
        );
        assert_eq!(actions[0].action_type, "isolate_host");
    }

    #[test]
    fn critical_impact_does_not_double_isolate() {
        let actions = generate_actions(
            "45.33.32.156",
            "CRITICAL",
            Some("Impact"),
            Some("T1486"),
            Some("Data Encrypted for Impact"),
        );
        assert_eq!(actions[0].action_type, "isolate_host");
        let isolates = actions.iter().filter(|a| a.action_type == "isolate_host").count();
        assert_eq!(isolates, 1);
    }

    #[test]
    fn info_without_tactic_yields_nothing() {
        let actions = generate_actions("45.33.32.156", "INFO", None, None, None);
        assert!(actions.is_empty());
    }

    #[test]
    fn unusable_source_addresses_yield_nothing() {
        for ip in ["", "0.0.0.0", "localhost", "127.0.0.1"] {
            assert!(generate_actions(ip, "HIGH", Some("Impact"), None, None).is_empty());
        }
    }

    #[test]
    fn commands_reference_the_source_ip() {
        let actions = generate_actions(
            "192.0.2.99",
            "HIGH",
            Some("Reconnaissance"),
            Some("T1595"),
            Some("Active Scanning"),
        );
        let block = actions.iter().find(|a| a.action_type == "block_ip").expect("block_ip");
        assert!(block.command.contains("192.0.2.99"));
    }

    #[test]
    fn unknown_tactic_falls_back_to_single_block() {
        let actions = generate_actions("45.33.32.156", "HIGH", Some("Persistence"), None, None);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].action_type, "block_ip");
        assert_eq!(actions[0].mitre_context, "Unknown technique");
    }

    #[test]
    fn every_generated_command_passes_the_allowlist() {
        for tactic in [
            "Reconnaissance",
            "Credential Access",
            "Lateral Movement",
            "Command and Control",
            "Exfiltration",
            "Impact",
            "Execution",
            "Defense Evasion",
            "Somewhere Else",
        ] {
            for action in generate_actions("45.33.32.156", "CRITICAL", Some(tactic), Some("T1110"), Some("Brute Force")) {
                assert!(is_allowed(&action.command), "blocked: {}", action.command);
                assert!(matches!(action.risk_level.as_str(), "LOW" | "MEDIUM" | "HIGH"));
            }
        }
    }

    #[test]
    fn mitre_context_carries_id_and_name() {
        let actions = generate_actions(
            "45.33.32.156",
            "HIGH",
            Some("Credential Access"),
            Some("T1110"),
            Some("Brute Force"),
        );
        assert_eq!(actions[0].mitre_context, "[T1110] Brute Force");
    }
}
