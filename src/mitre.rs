use std::fs;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::Settings;

/// One ATT&CK technique as held in memory for the process lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MitreTechnique {
    pub id: String,
    pub name: String,
    pub tactic: String,
    pub description: String,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MitreMatch {
    pub technique_id: String,
    pub technique_name: String,
    pub tactic: String,
    pub description: String,
    pub confidence: f64, // 0.0 – 1.0
}

struct IndexedTechnique {
    technique: MitreTechnique,
    // Word-boundary form of each keyword, compiled once at load.
    patterns: Vec<Regex>,
}

pub struct MitreClassifier {
    techniques: Vec<IndexedTechnique>,
}

const MATCH_THRESHOLD: f64 = 0.15;

fn title_case(phrase: &str) -> String {
    phrase
        .split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn alpha_tokens(text: &str, min_len: usize) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        if ch.is_ascii_lowercase() {
            current.push(ch);
        } else {
            if current.len() >= min_len {
                tokens.push(std::mem::take(&mut current));
            }
            current.clear();
        }
    }
    if current.len() >= min_len {
        tokens.push(current);
    }
    tokens
}

/// Keyword list for a STIX technique: alphabetic tokens (len ≥ 3) of the name
/// plus up to 10 tokens (len ≥ 4) of the description's first sentence,
/// deduplicated preserving order.
fn derive_keywords(name: &str, description: &str) -> Vec<String> {
    let mut keywords = alpha_tokens(&name.to_lowercase(), 3);
    let first_sentence = description.split('.').next().unwrap_or("");
    keywords.extend(
        alpha_tokens(&first_sentence.to_lowercase(), 4)
            .into_iter()
            .take(10),
    );

    let mut seen = std::collections::HashSet::new();
    keywords.retain(|k| seen.insert(k.clone()));
    keywords
}

fn load_techniques_stix(path: &str) -> Vec<MitreTechnique> {
    let text = match fs::read_to_string(path) {
        Ok(t) => t,
        Err(_) => {
            log::debug!("[MITRE] STIX bundle not found at {} - using local JSON dataset", path);
            return Vec::new();
        }
    };

    let bundle: serde_json::Value = match serde_json::from_str(&text) {
        Ok(v) => v,
        Err(e) => {
            log::error!("[MITRE] STIX bundle unreadable: {} - falling back to local JSON", e);
            return Vec::new();
        }
    };

    let objects = match bundle.get("objects").and_then(|o| o.as_array()) {
        Some(objs) => objs,
        None => {
            log::error!("[MITRE] STIX bundle has no 'objects' array - falling back to local JSON");
            return Vec::new();
        }
    };

    let mut result = Vec::new();
    for obj in objects {
        if obj.get("type").and_then(|t| t.as_str()) != Some("attack-pattern") {
            continue;
        }
        if obj.get("revoked").and_then(|v| v.as_bool()).unwrap_or(false)
            || obj
                .get("x_mitre_deprecated")
                .and_then(|v| v.as_bool())
                .unwrap_or(false)
        {
            continue;
        }

        let name = obj.get("name").and_then(|n| n.as_str()).unwrap_or("");
        let description = obj.get("description").and_then(|d| d.as_str()).unwrap_or("");

        // Primary kill-chain phase becomes the tactic name.
        let tactic = obj
            .get("kill_chain_phases")
            .and_then(|p| p.as_array())
            .and_then(|phases| phases.first())
            .and_then(|phase| phase.get("phase_name"))
            .and_then(|n| n.as_str())
            .map(|n| title_case(&n.replace('-', " ")))
            .unwrap_or_else(|| "Unknown".to_string());

        // T-code comes from the mitre-attack external reference.
        let tid = obj
            .get("external_references")
            .and_then(|r| r.as_array())
            .and_then(|refs| {
                refs.iter().find(|r| {
                    r.get("source_name").and_then(|s| s.as_str()) == Some("mitre-attack")
                })
            })
            .and_then(|r| r.get("external_id"))
            .and_then(|i| i.as_str())
            .unwrap_or("");
        if tid.is_empty() {
            continue;
        }

        result.push(MitreTechnique {
            id: tid.to_string(),
            name: name.to_string(),
            tactic,
            description: description.chars().take(300).collect(),
            keywords: derive_keywords(name, description),
        });
    }

    log::info!("[MITRE] Loaded {} techniques from STIX bundle", result.len());
    result
}

fn load_techniques_local(path: &str) -> Vec<MitreTechnique> {
    match fs::read_to_string(path) {
        Ok(text) => match serde_json::from_str::<Vec<MitreTechnique>>(&text) {
            Ok(data) => {
                log::info!("[MITRE] Loaded {} techniques from local JSON dataset", data.len());
                data
            }
            Err(e) => {
                log::error!("[MITRE] Failed to parse local techniques: {}", e);
                Vec::new()
            }
        },
        Err(e) => {
            log::error!("[MITRE] Failed to load local techniques: {}", e);
            Vec::new()
        }
    }
}

impl MitreClassifier {
    /// Load the technique corpus with priority: STIX bundle, then the bundled
    /// JSON keyword file. An empty corpus leaves the classifier as a no-op
    /// (every classify returns None) and the service still starts.
    pub fn load(settings: &Settings) -> Self {
        let mut techniques = load_techniques_stix(&settings.stix_bundle_path);
        if techniques.is_empty() {
            techniques = load_techniques_local(&settings.mitre_dataset_path);
        }
        if techniques.is_empty() {
            log::error!("[MITRE] No technique dataset available - classification disabled");
        }
        Self::from_techniques(techniques)
    }

    pub fn from_techniques(techniques: Vec<MitreTechnique>) -> Self {
        let indexed = techniques
            .into_iter()
            .map(|technique| {
                let patterns = technique
                    .keywords
                    .iter()
                    .filter_map(|kw| Regex::new(&format!(r"\b{}\b", regex::escape(kw))).ok())
                    .collect();
                IndexedTechnique { technique, patterns }
            })
            .collect();
        MitreClassifier { techniques: indexed }
    }

    /// Score every technique against the text by word-boundary keyword overlap
    /// and return the single best match above the confidence threshold.
    /// Deterministic: ties keep the first technique encountered.
    pub fn classify(&self, text: &str) -> Option<MitreMatch> {
        if text.is_empty() || self.techniques.is_empty() {
            return None;
        }

        let lower = text.to_lowercase();
        let mut best_score = 0.0f64;
        let mut best: Option<&MitreTechnique> = None;

        for entry in &self.techniques {
            if entry.patterns.is_empty() {
                continue;
            }
            let hits = entry.patterns.iter().filter(|p| p.is_match(&lower)).count();
            if hits == 0 {
                continue;
            }

            let denom = (entry.patterns.len() as f64 * 0.4).max(1.0);
            let score = (hits as f64 / denom).min(1.0);
            if score > best_score {
                best_score = score;
                best = Some(&entry.technique);
            }
        }

        let technique = best?;
        if best_score < MATCH_THRESHOLD {
            return None;
        }
        Some(MitreMatch {
            technique_id: technique.id.clone(),
            technique_name: technique.name.clone(),
            tactic: technique.tactic.clone(),
            description: technique.description.clone(),
            confidence: (best_score * 1000.0).round() / 1000.0,
        })
    }

    pub fn technique_by_id(&self, technique_id: &str) -> Option<&MitreTechnique> {
        self.techniques
            .iter()
            .map(|t| &t.technique)
            .find(|t| t.id.eq_ignore_ascii_case(technique_id))
    }

    pub fn techniques(&self) -> Vec<&MitreTechnique> {
        self.techniques.iter().map(|t| &t.technique).collect()
    }

    pub fn len(&self) -> usize {
        self.techniques.len()
    }

    pub fn is_empty(&self) -> bool {
        self.techniques.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_classifier() -> MitreClassifier {
        MitreClassifier::from_techniques(vec![
            MitreTechnique {
                id: "T1595".to_string(),
                name: "Active Scanning".to_string(),
                tactic: "Reconnaissance".to_string(),
                description: "Adversaries may execute active reconnaissance scans.".to_string(),
                keywords: vec!["scan".into(), "scanning".into(), "nmap".into(), "probe".into()],
            },
            MitreTechnique {
                id: "T1110".to_string(),
                name: "Brute Force".to_string(),
                tactic: "Credential Access".to_string(),
                description: "Adversaries may use brute force techniques.".to_string(),
                keywords: vec!["brute".into(), "force".into(), "password".into(), "login".into()],
            },
        ])
    }

    #[test]
    fn classifies_scan_text() {
        let c = sample_classifier();
        let m = c.classify("ET SCAN Nmap OS Detection Probe").expect("match");
        assert_eq!(m.technique_id, "T1595");
        assert_eq!(m.tactic, "Reconnaissance");
        assert!(m.confidence > 0.5);
    }

    #[test]
    fn classifies_brute_force_text() {
        let c = sample_classifier();
        let m = c.classify("SSHD brute force trying to get access").expect("match");
        assert_eq!(m.technique_id, "T1110");
    }

    #[test]
    fn no_match_below_threshold() {
        let c = sample_classifier();
        assert!(c.classify("routine package update completed").is_none());
    }

    #[test]
    fn keyword_must_sit_on_word_boundary() {
        let c = sample_classifier();
        // "scandinavia" contains "scan" but not as a word.
        assert!(c.classify("scandinavia shipping manifest").is_none());
    }

    #[test]
    fn classify_is_deterministic() {
        let c = sample_classifier();
        let a = c.classify("nmap scan probe detected").unwrap();
        let b = c.classify("nmap scan probe detected").unwrap();
        assert_eq!(a.technique_id, b.technique_id);
        assert_eq!(a.confidence, b.confidence);
    }

    #[test]
    fn empty_corpus_is_a_noop() {
        let c = MitreClassifier::from_techniques(Vec::new());
        assert!(c.classify("nmap scan probe").is_none());
        assert!(c.is_empty());
    }

    #[test]
    fn confidence_is_capped_at_one() {
        let c = MitreClassifier::from_techniques(vec![MitreTechnique {
            id: "T0001".to_string(),
            name: "Test".to_string(),
            tactic: "Impact".to_string(),
            description: String::new(),
            keywords: vec!["alpha".into(), "beta".into()],
        }]);
        let m = c.classify("alpha beta alpha beta").unwrap();
        assert!(m.confidence <= 1.0);
    }

    #[test]
    fn derives_keywords_from_name_and_first_sentence() {
        let kws = derive_keywords(
            "Active Scanning",
            "Adversaries may execute active scans against infrastructure. More detail follows.",
        );
        assert!(kws.contains(&"active".to_string()));
        assert!(kws.contains(&"scanning".to_string()));
        assert!(kws.contains(&"adversaries".to_string()));
        // "may" is below the 4-char description minimum.
        assert!(!kws.contains(&"may".to_string()));
        // Deduplicated: "active" appears in both name and description.
        assert_eq!(kws.iter().filter(|k| *k == "active").count(), 1);
    }

    #[test]
    fn title_cases_kill_chain_phase() {
        assert_eq!(title_case("credential access"), "Credential Access");
        assert_eq!(title_case("impact"), "Impact");
    }

    #[test]
    fn lookup_by_id_is_case_insensitive() {
        let c = sample_classifier();
        assert!(c.technique_by_id("t1110").is_some());
        assert!(c.technique_by_id("T9999").is_none());
    }
}
