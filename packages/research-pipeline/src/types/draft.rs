//! Draft records: one per candidate that cleared scoring.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::job::JobId;

/// Attack method, normalized to a fixed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttackMethod {
    Ransomware,
    Phishing,
    #[serde(rename = "Data breach")]
    DataBreach,
    #[serde(rename = "DDoS")]
    Ddos,
    #[serde(rename = "Vulnerability exploitation")]
    VulnerabilityExploitation,
    #[serde(rename = "Supply chain compromise")]
    SupplyChainCompromise,
    #[serde(rename = "Credential stuffing")]
    CredentialStuffing,
    #[serde(rename = "Business email compromise")]
    BusinessEmailCompromise,
    Vishing,
    #[serde(rename = "Malware/Backdoor")]
    MalwareBackdoor,
    Espionage,
}

impl AttackMethod {
    pub const ALL: [AttackMethod; 11] = [
        Self::Ransomware,
        Self::Phishing,
        Self::DataBreach,
        Self::Ddos,
        Self::VulnerabilityExploitation,
        Self::SupplyChainCompromise,
        Self::CredentialStuffing,
        Self::BusinessEmailCompromise,
        Self::Vishing,
        Self::MalwareBackdoor,
        Self::Espionage,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::Ransomware => "Ransomware",
            Self::Phishing => "Phishing",
            Self::DataBreach => "Data breach",
            Self::Ddos => "DDoS",
            Self::VulnerabilityExploitation => "Vulnerability exploitation",
            Self::SupplyChainCompromise => "Supply chain compromise",
            Self::CredentialStuffing => "Credential stuffing",
            Self::BusinessEmailCompromise => "Business email compromise",
            Self::Vishing => "Vishing",
            Self::MalwareBackdoor => "Malware/Backdoor",
            Self::Espionage => "Espionage",
        }
    }

    /// Lenient match of model output onto the enumeration.
    pub fn parse_loose(raw: &str) -> Option<Self> {
        let needle = normalize(raw);
        if needle.is_empty() {
            return None;
        }
        if let Some(exact) = Self::ALL.iter().find(|m| normalize(m.label()) == needle) {
            return Some(*exact);
        }
        let synonyms: &[(&str, AttackMethod)] = &[
            ("bec", Self::BusinessEmailCompromise),
            ("backdoor", Self::MalwareBackdoor),
            ("malware", Self::MalwareBackdoor),
            ("ddos", Self::Ddos),
            ("denialofservice", Self::Ddos),
            ("supplychain", Self::SupplyChainCompromise),
            ("credentialstuffing", Self::CredentialStuffing),
            ("breach", Self::DataBreach),
            ("exploit", Self::VulnerabilityExploitation),
            ("vulnerability", Self::VulnerabilityExploitation),
            ("ransomware", Self::Ransomware),
            ("phishing", Self::Phishing),
            ("vishing", Self::Vishing),
            ("espionage", Self::Espionage),
        ];
        synonyms
            .iter()
            .find(|(key, _)| needle.contains(key))
            .map(|(_, method)| *method)
    }
}

fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

/// QA decision on a draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QaStatus {
    Pending,
    Accepted,
    Rejected,
}

/// Structured fields pulled from an article by the model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IncidentFields {
    pub summary: String,
    pub date: Option<String>,
    pub targets: String,
    pub method: Option<AttackMethod>,
    pub exploit_used: String,
    pub incident: bool,
}

/// One candidate article's extracted, scored, QA-gated record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    pub id: Uuid,
    pub job_id: JobId,
    pub title: String,
    pub date: Option<String>,
    pub source_url: String,
    pub summary: String,
    pub targets: String,
    pub method: Option<AttackMethod>,
    pub exploit_used: String,
    pub incident: bool,
    pub relevance: Option<String>,
    pub score: f64,
    pub qa_status: QaStatus,
    pub qa_message: Option<String>,
    /// Fetch order within the job, used to break score ties
    pub sequence: u64,
    pub canonical_url: String,
    pub title_key: String,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Draft contents before the registry assigns identity and dedup keys.
#[derive(Debug, Clone)]
pub struct NewDraft {
    pub title: String,
    pub source_url: String,
    pub fields: IncidentFields,
    pub relevance: Option<String>,
    pub score: f64,
    pub sequence: u64,
    pub content_hash: String,
}
