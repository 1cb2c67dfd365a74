//! Built-in rule-based field parsers and scoring heuristic. Deliberately
//! simple: these are the swappable leaf functions, not the hard part of the
//! system.

use crate::pipeline::traits::{FieldParser, Scorer};
use crate::pipeline::types::{AiDecision, DocumentType, ParsedFields, ScoreOutcome};

pub struct RuleBasedParser;

impl FieldParser for RuleBasedParser {
    fn parse(&self, document_type: DocumentType, text: &str) -> ParsedFields {
        let mut fields = ParsedFields::new();

        // Generic "Key: Value" lines first.
        for line in text.lines() {
            if let Some((key, value)) = line.split_once(':') {
                let key = normalize_key(key);
                let value = value.trim();
                if !key.is_empty() && !value.is_empty() {
                    fields.insert(key, serde_json::Value::String(value.to_string()));
                }
            }
        }

        match document_type {
            DocumentType::Ktp => {
                if let Some(nik) = first_digit_run(text, 16) {
                    fields.insert("nik".to_string(), serde_json::Value::String(nik));
                }
            }
            DocumentType::Npwp => {
                if let Some(npwp) = first_digit_run(text, 15) {
                    fields.insert("npwp".to_string(), serde_json::Value::String(npwp));
                }
            }
        }

        fields
    }
}

pub struct RuleBasedScorer;

impl Scorer for RuleBasedScorer {
    fn score(
        &self,
        document_type: DocumentType,
        fields: &ParsedFields,
        text: &str,
    ) -> ScoreOutcome {
        let mut score = 100i32;
        let mut reasons = Vec::new();

        let id_field = match document_type {
            DocumentType::Ktp => "nik",
            DocumentType::Npwp => "npwp",
        };
        if !fields.contains_key(id_field) {
            score -= 50;
            reasons.push(format!("missing {id_field}"));
        }
        if !fields.contains_key("nama") && !fields.contains_key("name") {
            score -= 20;
            reasons.push("missing name".to_string());
        }
        if text.trim().len() < 20 {
            score -= 20;
            reasons.push("extracted text too short".to_string());
        }

        let score = score.clamp(0, 100);
        let decision = if score >= 80 {
            AiDecision::Approved
        } else if score >= 50 {
            AiDecision::Review
        } else {
            AiDecision::Rejected
        };

        ScoreOutcome {
            score,
            decision,
            reasons,
        }
    }
}

fn normalize_key(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .collect()
}

/// First run of exactly `len` digits, ignoring separators inside the run.
fn first_digit_run(text: &str, len: usize) -> Option<String> {
    let mut run = String::new();
    for c in text.chars() {
        if c.is_ascii_digit() {
            run.push(c);
            if run.len() == len {
                return Some(run);
            }
        } else if c == '.' || c == '-' {
            // Separator inside a formatted number: keep accumulating.
            if run.is_empty() {
                continue;
            }
        } else {
            run.clear();
        }
    }
    None
}
