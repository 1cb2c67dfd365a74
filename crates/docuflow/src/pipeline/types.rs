use serde::{Deserialize, Serialize};

use crate::errors::ProcessError;

/// The two identity document kinds the system verifies: KTP is the
/// Indonesian national id card, NPWP the tax id card. Exhaustive matching
/// everywhere keeps "unknown type" failures at the string boundary only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DocumentType {
    Ktp,
    Npwp,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Ktp => "KTP",
            DocumentType::Npwp => "NPWP",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, ProcessError> {
        match s.trim().to_uppercase().as_str() {
            "KTP" => Ok(DocumentType::Ktp),
            "NPWP" => Ok(DocumentType::Npwp),
            other => Err(ProcessError::UnknownDocumentType(other.to_string())),
        }
    }
}

/// Verdict of the scoring heuristic for one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiDecision {
    Approved,
    Review,
    Rejected,
}

impl AiDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            AiDecision::Approved => "approved",
            AiDecision::Review => "review",
            AiDecision::Rejected => "rejected",
        }
    }

    /// Low-confidence outcomes are routed to a human reviewer.
    pub fn requires_escalation(&self) -> bool {
        matches!(self, AiDecision::Review)
    }
}

pub type ParsedFields = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreOutcome {
    /// 0..=100
    pub score: i32,
    pub decision: AiDecision,
    pub reasons: Vec<String>,
}
