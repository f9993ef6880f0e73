use crate::mitre::MitreMatch;

// severity -> base score
fn severity_base(severity: &str) -> f64 {
    match severity.to_uppercase().as_str() {
        "CRITICAL" => 10.0,
        "HIGH" => 7.5,
        "MEDIUM" => 5.0,
        "LOW" => 2.5,
        "INFO" => 0.5,
        _ => 1.0,
    }
}

// source -> reliability weight
fn source_weight(source: &str) -> f64 {
    match source.to_lowercase().as_str() {
        "signature_ids" => 0.90,
        "host_ids" => 0.85,
        "firewall" => 0.75,
        "synthetic" => 0.60,
        "manual" => 0.50,
        _ => 0.40,
    }
}

/// Composite 0-10 risk score:
/// severity_base x 0.50 + mitre_confidence x 10 x 0.30 + source_weight x 10 x 0.20,
/// clamped to [0, 10] and rounded to two decimals.
pub fn score(severity: &str, source: &str, mitre_match: Option<&MitreMatch>) -> f64 {
    let confidence = mitre_match.map(|m| m.confidence).unwrap_or(0.0);
    let raw = severity_base(severity) * 0.50
        + confidence * 10.0 * 0.30
        + source_weight(source) * 10.0 * 0.20;
    (raw.clamp(0.0, 10.0) * 100.0).round() / 100.0
}

/// UI label for a numeric score.
pub fn score_label(score_val: f64) -> &'static str {
    if score_val >= 8.5 {
        "CRITICAL"
    } else if score_val >= 6.5 {
        "HIGH"
    } else if score_val >= 4.0 {
        "MEDIUM"
    } else if score_val >= 2.0 {
        "LOW"
    } else {
        "INFO"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn match_with_confidence(confidence: f64) -> MitreMatch {
        MitreMatch {
            technique_id: "T1110".to_string(),
            technique_name: "Brute Force".to_string(),
            tactic: "Credential Access".to_string(),
            description: String::new(),
            confidence,
        }
    }

    #[test]
    fn critical_signature_alert_with_strong_match() {
        let m = match_with_confidence(0.8);
        let s = score("CRITICAL", "signature_ids", Some(&m));
        // 10*0.5 + 0.8*10*0.3 + 0.9*10*0.2 = 9.2
        assert_eq!(s, 9.2);
        assert_eq!(score_label(s), "CRITICAL");
    }

    #[test]
    fn info_with_no_match_scores_low() {
        let s = score("INFO", "unknown", None);
        // 0.5*0.5 + 0 + 0.4*10*0.2 = 1.05
        assert_eq!(s, 1.05);
        assert_eq!(score_label(s), "INFO");
    }

    #[test]
    fn unknown_severity_uses_fallback_base() {
        let s = score("WEIRD", "unknown", None);
        // 1.0*0.5 + 0.8 = 1.3
        assert_eq!(s, 1.3);
    }

    #[test]
    fn score_never_exceeds_ten() {
        let m = match_with_confidence(1.0);
        let s = score("CRITICAL", "signature_ids", Some(&m));
        assert!(s <= 10.0);
    }

    #[test]
    fn score_has_at_most_two_decimals() {
        let m = match_with_confidence(0.333);
        let s = score("MEDIUM", "host_ids", Some(&m));
        assert_eq!((s * 100.0).round() / 100.0, s);
        assert!((0.0..=10.0).contains(&s));
    }

    #[test]
    fn label_boundaries() {
        assert_eq!(score_label(8.5), "CRITICAL");
        assert_eq!(score_label(6.5), "HIGH");
        assert_eq!(score_label(4.0), "MEDIUM");
        assert_eq!(score_label(2.0), "LOW");
        assert_eq!(score_label(1.99), "INFO");
    }
}
