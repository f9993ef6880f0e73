use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;
use tokio::time::sleep;

use crate::ingest::IncidentPipeline;

// Realistic signature-IDS fast-alert templates. Placeholders are filled from
// the pools below; everything else is emitted verbatim so the parser regexes
// exercise real code paths.
const SIGNATURE_TEMPLATES: &[&str] = &[
    "[**] [1:2001219:20] ET SCAN Potential SSH Scan OUTBOUND [**] [Classification: Attempted Information Leak] [Priority: 2] {TCP} {src} -> {dst}:{port}",
    "[**] [1:2010937:3] ET POLICY Suspicious inbound to MSSQL port 1433 [**] [Classification: Potentially Bad Traffic] [Priority: 3] {TCP} {src} -> {dst}:1433",
    "[**] [1:2001831:17] ET SCAN Nmap Scripting Engine User-Agent Detected [**] [Classification: Web Application Attack] [Priority: 1] {TCP} {src} -> {dst}:{port}",
    "[**] [1:2019284:4] ET WEB_SERVER PHP Easter Egg Information Disclosure [**] [Classification: Attempted Information Leak] [Priority: 2] {TCP} {src}:{port} -> {dst}:80",
    "[**] [1:2009358:5] ET EXPLOIT Possible CVE-2014-6271 Attempt Bash RCE via CGI [**] [Classification: Attempted Administrator Privilege Gain] [Priority: 1] {TCP} {src} -> {dst}:80",
    "[**] [1:2406697:3134] ET DOS Excessive Web Requests - Possible DDoS [**] [Classification: Denial of Service Attack] [Priority: 1] {TCP} {src}:{port} -> {dst}:443",
    "[**] [1:2013028:5] ET POLICY GNU/Linux APT User-Agent Outbound likely related to package management [**] [Classification: Potentially Bad Traffic] [Priority: 3] {TCP} {src} -> {dst}:80",
    "[**] [1:2260002:1] ET MALWARE Win32.Ransomware.Sodinokibi CnC Beacon [**] [Classification: Malware Command and Control Activity Detected] [Priority: 1] {TCP} {src}:{port} -> {dst}:443",
    "[**] [1:2016922:3] ET SCAN Nmap OS Detection Probe [**] [Classification: Attempted Information Leak] [Priority: 3] {TCP} {src} -> {dst}:{port}",
    "[**] [1:2012799:2] ET POLICY HTTP Request to a *.onion proxy domain [**] [Classification: Potentially Bad Traffic] [Priority: 2] {TCP} {src}:{port} -> {dst}:80",
];

// Host-IDS rule alerts, some multi-line.
const HOST_TEMPLATES: &[&str] = &[
    "Rule: 5716 (level 10) -> 'SSHD brute force trying to get access to the system.'\nAuthentication failed for user root from Src IP: {src}",
    "Rule: 31101 (level 7) -> 'Web server 500 error code (Internal Error).'\nSrc IP: {src} - request to {dst}",
    "Rule: 1002 (level 2) -> 'Unknown problem somewhere in the system.'\nUnknown entry: error from {src}",
    "Rule: 80792 (level 14) -> 'Multiple trojans, rootkits or suspicious files detected. System may be compromised.'\nFiles changed: /tmp/payload.sh - Src IP: {src}",
    "Rule: 5501 (level 8) -> 'Login session opened.'\nSession opened for user root by {src}",
    "Rule: 30105 (level 6) -> 'Web server client denied access to restricted resource.'\nAttempted access to /admin from Src IP: {src}",
    "Rule: 100100 (level 12) -> 'SQL injection attempt detected in web request.'\nPayload detected via WAF - Src IP: {src} -> Dst: {dst}:80",
    "Rule: 5552 (level 8) -> 'useradd or groupadd used: User added to the system.'\nNew user created from Src IP: {src}",
];

const ATTACKER_IPS: &[&str] = &[
    "45.33.32.156",
    "192.241.173.241",
    "104.236.246.116",
    "178.62.62.190",
    "159.65.67.130",
    "138.197.0.113",
    "206.189.91.155",
    "167.99.150.222",
    "68.183.108.112",
    "10.0.0.55", // internal suspicious host
];

const VICTIM_IPS: &[&str] = &[
    "192.168.1.100",
    "192.168.1.101",
    "192.168.1.200",
    "10.0.0.1",
    "10.0.0.10",
];

const PORTS: &[u16] = &[22, 80, 443, 3306, 5432, 8080, 8443, 4444, 1433, 6379, 9200];

fn fill_template(template: &str) -> String {
    let mut rng = rand::thread_rng();
    let src = ATTACKER_IPS.choose(&mut rng).unwrap_or(&"45.33.32.156");
    let dst = VICTIM_IPS.choose(&mut rng).unwrap_or(&"192.168.1.100");
    let port = PORTS.choose(&mut rng).copied().unwrap_or(443);
    template
        .replace("{src}", src)
        .replace("{dst}", dst)
        .replace("{port}", &port.to_string())
}

/// One synthetic alert: 60% signature-IDS, 40% host-IDS.
pub fn next_alert() -> (String, &'static str) {
    let mut rng = rand::thread_rng();
    if rng.gen_bool(0.6) {
        let template = SIGNATURE_TEMPLATES.choose(&mut rng).unwrap_or(&SIGNATURE_TEMPLATES[0]);
        (fill_template(template), "signature_ids")
    } else {
        let template = HOST_TEMPLATES.choose(&mut rng).unwrap_or(&HOST_TEMPLATES[0]);
        (fill_template(template), "host_ids")
    }
}

/// Emit synthetic alerts through the ingest pipeline at a uniform random
/// interval in [interval_min, interval_max] seconds. Runs until the owning
/// task is aborted; the sleep is the cancellation point.
pub async fn run_simulator(pipeline: Arc<IncidentPipeline>, interval_min: f64, interval_max: f64) {
    log::info!("[Simulator] Log simulator started");
    let (lo, hi) = if interval_min <= interval_max {
        (interval_min.max(0.1), interval_max)
    } else {
        (interval_max.max(0.1), interval_min)
    };

    loop {
        let (raw, hint) = next_alert();
        log::debug!(
            "[Simulator] Emitting: {}...",
            raw.chars().take(80).collect::<String>()
        );
        pipeline.ingest_raw_log(&raw, hint).await;

        let delay = {
            let mut rng = rand::thread_rng();
            rng.gen_range(lo..=hi)
        };
        sleep(Duration::from_secs_f64(delay)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_parser::parse_log_line;

    #[test]
    fn templates_have_no_leftover_placeholders() {
        for template in SIGNATURE_TEMPLATES.iter().chain(HOST_TEMPLATES.iter()) {
            let filled = fill_template(template);
            assert!(!filled.contains("{src}"));
            assert!(!filled.contains("{dst}"));
            assert!(!filled.contains("{port}"));
        }
    }

    #[test]
    fn signature_templates_parse_as_signature_alerts() {
        for template in SIGNATURE_TEMPLATES {
            let event = parse_log_line(&fill_template(template), "signature_ids");
            assert_eq!(event.source, "signature_ids", "template: {}", template);
            assert!(event.src_ip.is_some());
            assert!(event.dst_ip.is_some());
        }
    }

    #[test]
    fn host_templates_parse_as_rule_alerts() {
        for template in HOST_TEMPLATES {
            let event = parse_log_line(&fill_template(template), "host_ids");
            assert_eq!(event.source, "host_ids", "template: {}", template);
        }
    }

    #[test]
    fn next_alert_yields_known_hints() {
        for _ in 0..20 {
            let (raw, hint) = next_alert();
            assert!(!raw.is_empty());
            assert!(hint == "signature_ids" || hint == "host_ids");
        }
    }
}
