use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use uuid::Uuid;

/// Structured event produced by the parser. Immutable after construction;
/// the ingest pipeline enriches a copy of its fields, never the event itself.
#[derive(Debug, Clone, Serialize)]
pub struct IncidentEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub source: String, // signature_ids | host_ids | firewall | synthetic | unknown
    pub severity: String, // CRITICAL | HIGH | MEDIUM | LOW | INFO
    pub title: String,
    pub raw_log: String,
    pub src_ip: Option<String>,
    pub dst_ip: Option<String>,
    pub port: Option<u16>,
    pub protocol: Option<String>,
}

impl IncidentEvent {
    fn new(source: &str, severity: &str, title: String, raw_log: String) -> Self {
        IncidentEvent {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            source: source.to_string(),
            severity: severity.to_string(),
            title,
            raw_log,
            src_ip: None,
            dst_ip: None,
            port: None,
            protocol: None,
        }
    }
}

// Keyword fallback table. Order matters: first hit wins.
const KEYWORD_SEVERITY: &[(&str, &str)] = &[
    ("critical", "CRITICAL"),
    ("exploit", "CRITICAL"),
    ("shellcode", "CRITICAL"),
    ("rootkit", "CRITICAL"),
    ("ransomware", "CRITICAL"),
    ("attack", "HIGH"),
    ("brute", "HIGH"),
    ("scan", "MEDIUM"),
    ("probe", "MEDIUM"),
    ("dos", "HIGH"),
    ("ddos", "HIGH"),
    ("suspicious", "MEDIUM"),
    ("injection", "HIGH"),
    ("overflow", "HIGH"),
    ("recon", "LOW"),
    ("info", "INFO"),
];

fn priority_to_severity(priority: u32) -> &'static str {
    match priority {
        1 => "CRITICAL",
        2 => "HIGH",
        3 => "MEDIUM",
        4 => "LOW",
        _ => "INFO",
    }
}

fn rule_level_to_severity(level: u32) -> &'static str {
    if level >= 12 {
        "CRITICAL"
    } else if level >= 8 {
        "HIGH"
    } else if level >= 5 {
        "MEDIUM"
    } else if level >= 3 {
        "LOW"
    } else {
        "INFO"
    }
}

fn keyword_severity(text: &str) -> &'static str {
    let lower = text.to_lowercase();
    for (keyword, severity) in KEYWORD_SEVERITY {
        if lower.contains(keyword) {
            return severity;
        }
    }
    "INFO"
}

/// Signature-IDS fast alert:
/// `[**] [gid:sid:rev] <title> [**] ... Priority: N ... SRC(:SPORT)? -> DST(:DPORT)?`
fn try_signature_alert(raw: &str) -> Option<IncidentEvent> {
    let re = Regex::new(
        r"(?s)\[\*\*\]\s+\[\d+:\d+:\d+\]\s+(?P<title>.+?)\s+\[\*\*\].*?Priority:\s*(?P<priority>\d).*?(?P<src>[\d.]+)(?::(?P<sport>\d+))?\s+->\s+(?P<dst>[\d.]+)(?::(?P<dport>\d+))?",
    )
    .ok()?;
    let caps = re.captures(raw)?;

    let priority: u32 = caps.name("priority")?.as_str().parse().ok()?;
    let mut event = IncidentEvent::new(
        "signature_ids",
        priority_to_severity(priority),
        caps.name("title")?.as_str().trim().to_string(),
        raw.to_string(),
    );
    event.src_ip = caps.name("src").map(|m| m.as_str().to_string());
    event.dst_ip = caps.name("dst").map(|m| m.as_str().to_string());
    event.port = caps
        .name("dport")
        .and_then(|m| m.as_str().parse::<u16>().ok())
        .filter(|p| *p >= 1);
    Some(event)
}

/// Host-IDS rule alert: `Rule: <num> (level N) -> '<title>'` with optional `Src IP:`.
fn try_rule_alert(raw: &str) -> Option<IncidentEvent> {
    let re = Regex::new(
        r"(?s)Rule:\s*\d+\s+\(level\s+(?P<level>\d+)\)\s+->\s+'(?P<title>[^']+)'(?:.*?Src IP:\s*(?P<src>[\d.]+))?",
    )
    .ok()?;
    let caps = re.captures(raw)?;

    let level: u32 = caps.name("level")?.as_str().parse().ok()?;
    let mut event = IncidentEvent::new(
        "host_ids",
        rule_level_to_severity(level),
        caps.name("title")?.as_str().trim().to_string(),
        raw.to_string(),
    );
    event.src_ip = caps.name("src").map(|m| m.as_str().to_string());
    Some(event)
}

fn extract_ips(text: &str) -> (Option<String>, Option<String>) {
    let re = match Regex::new(r"(\d{1,3}(?:\.\d{1,3}){3})") {
        Ok(re) => re,
        Err(_) => return (None, None),
    };
    let mut found = re.find_iter(text).map(|m| m.as_str().to_string());
    (found.next(), found.next())
}

fn extract_port(text: &str) -> Option<u16> {
    let re = Regex::new(r":(\d{2,5})").ok()?;
    let caps = re.captures(text)?;
    caps.get(1)?.as_str().parse::<u16>().ok()
}

/// Parse a single raw log entry into a structured event. Dispatch order:
/// signature fast alert, host rule alert, keyword fallback. Never fails —
/// unrecognised input becomes an INFO event with whatever could be extracted.
pub fn parse_log_line(raw: &str, source_hint: &str) -> IncidentEvent {
    let raw = raw.trim();

    if let Some(event) = try_signature_alert(raw) {
        return event;
    }
    if let Some(event) = try_rule_alert(raw) {
        return event;
    }

    let (src_ip, dst_ip) = extract_ips(raw);
    let port = extract_port(raw);
    let title: String = raw.lines().next().unwrap_or("").chars().take(120).collect();

    let mut event = IncidentEvent::new(source_hint, keyword_severity(raw), title, raw.to_string());
    event.src_ip = src_ip;
    event.dst_ip = dst_ip;
    event.port = port;
    event
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_signature_fast_alert() {
        let raw = "[**] [1:2001219:20] ET SCAN Potential SSH Scan OUTBOUND [**] \
                   [Classification: Attempted Information Leak] [Priority: 2] \
                   {TCP} 45.33.32.156 -> 192.168.1.100:22";
        let event = parse_log_line(raw, "signature_ids");
        assert_eq!(event.source, "signature_ids");
        assert_eq!(event.severity, "HIGH");
        assert!(event.title.contains("SSH Scan"));
        assert_eq!(event.src_ip.as_deref(), Some("45.33.32.156"));
        assert_eq!(event.dst_ip.as_deref(), Some("192.168.1.100"));
        assert_eq!(event.port, Some(22));
    }

    #[test]
    fn signature_priority_1_is_critical() {
        let raw = "[**] [1:2009358:5] ET EXPLOIT Bash RCE [**] [Priority: 1] {TCP} 1.2.3.4 -> 192.168.0.1:80";
        assert_eq!(parse_log_line(raw, "signature_ids").severity, "CRITICAL");
    }

    #[test]
    fn signature_priority_3_is_medium() {
        let raw = "[**] [1:2016922:3] ET SCAN Nmap OS Detection [**] [Priority: 3] {TCP} 1.2.3.4 -> 192.168.0.1:1234";
        assert_eq!(parse_log_line(raw, "signature_ids").severity, "MEDIUM");
    }

    #[test]
    fn parses_multi_line_rule_alert() {
        let raw = "Rule: 5716 (level 10) -> 'SSHD brute force trying to get access to the system.'\n\
                   Authentication failed for user root from Src IP: 45.33.32.156";
        let event = parse_log_line(raw, "host_ids");
        assert_eq!(event.source, "host_ids");
        assert_eq!(event.severity, "HIGH");
        assert!(event.title.to_lowercase().contains("brute force"));
        assert_eq!(event.src_ip.as_deref(), Some("45.33.32.156"));
    }

    #[test]
    fn rule_level_14_is_critical() {
        let raw = "Rule: 80792 (level 14) -> 'Multiple trojans detected.'";
        let event = parse_log_line(raw, "host_ids");
        assert_eq!(event.source, "host_ids");
        assert_eq!(event.severity, "CRITICAL");
    }

    #[test]
    fn rule_level_2_is_info() {
        let raw = "Rule: 1002 (level 2) -> 'Unknown problem somewhere in the system.'";
        assert_eq!(parse_log_line(raw, "host_ids").severity, "INFO");
    }

    #[test]
    fn fallback_keyword_brute_is_high() {
        let raw = "Brute force login attempt from 10.0.0.5 to SSH on port 22";
        let event = parse_log_line(raw, "synthetic");
        assert_eq!(event.source, "synthetic");
        assert_eq!(event.severity, "HIGH");
    }

    #[test]
    fn fallback_extracts_first_two_ips_and_port() {
        let raw = "Connection from 192.168.1.55 attempted to reach 10.0.0.1:8080";
        let event = parse_log_line(raw, "firewall");
        assert_eq!(event.src_ip.as_deref(), Some("192.168.1.55"));
        assert_eq!(event.dst_ip.as_deref(), Some("10.0.0.1"));
        assert_eq!(event.port, Some(8080));
    }

    #[test]
    fn unrecognised_input_is_info() {
        let event = parse_log_line("hello world", "unknown");
        assert_eq!(event.severity, "INFO");
        assert_eq!(event.source, "unknown");
        assert!(event.src_ip.is_none());
    }

    #[test]
    fn fallback_title_truncates_to_120_chars() {
        let raw = "x".repeat(300);
        let event = parse_log_line(&raw, "unknown");
        assert_eq!(event.title.chars().count(), 120);
    }

    #[test]
    fn every_event_gets_a_fresh_id() {
        let a = parse_log_line("Some log", "synthetic");
        let b = parse_log_line("Some log", "synthetic");
        assert_ne!(a.id, b.id);
    }
}
