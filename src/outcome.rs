//! Classification outcomes and the set of statuses that warrant a warning.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Legitimate,
    Suspicious,
    Phishing,
    Unanalyzable,
    Error,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Legitimate => "legitimate",
            Status::Suspicious => "suspicious",
            Status::Phishing => "phishing",
            Status::Unanalyzable => "unanalyzable",
            Status::Error => "error",
        }
    }

    /// Statuses the analysis service itself may report.  `error` is produced
    /// locally only.
    fn from_service(value: &str) -> Option<Self> {
        match value {
            "legitimate" => Some(Status::Legitimate),
            "suspicious" => Some(Status::Suspicious),
            "phishing" => Some(Status::Phishing),
            "unanalyzable" => Some(Status::Unanalyzable),
            _ => None,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        if lower == "error" {
            return Ok(Status::Error);
        }
        Status::from_service(&lower).ok_or_else(|| format!("unknown status '{}'", s.trim()))
    }
}

/// Result of analysing one URL, either interpreted from the service response
/// or produced locally when the request failed.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AnalysisOutcome {
    pub status: Status,
    pub probability: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
}

impl AnalysisOutcome {
    pub fn error(message: impl Into<String>) -> Self {
        let mut message = message.into();
        if message.trim().is_empty() {
            message = "Analysis request failed".to_string();
        }
        Self {
            status: Status::Error,
            probability: None,
            message: Some(message),
            raw: None,
        }
    }

    /// Interpret a decoded service response.  A missing or unrecognised
    /// `result` yields `unanalyzable`; a `probability` outside `[0, 1]` is
    /// dropped.
    pub fn from_response(body: Value) -> Self {
        let status = body
            .get("result")
            .and_then(Value::as_str)
            .and_then(Status::from_service)
            .unwrap_or(Status::Unanalyzable);
        let probability = body
            .get("probability")
            .and_then(Value::as_f64)
            .filter(|p| p.is_finite() && (0.0..=1.0).contains(p));
        Self {
            status,
            probability,
            message: None,
            raw: Some(body),
        }
    }

    pub fn is_error(&self) -> bool {
        self.status == Status::Error
    }
}

/// Statuses for which the content overlay is shown.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RiskSet(HashSet<Status>);

impl RiskSet {
    pub fn new(statuses: impl IntoIterator<Item = Status>) -> Self {
        Self(statuses.into_iter().collect())
    }

    pub fn contains(&self, status: Status) -> bool {
        self.0.contains(&status)
    }

    /// Parse a comma separated list such as `phishing,suspicious`.
    pub fn parse(raw: &str) -> Result<Self, String> {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Status::from_str)
            .collect::<Result<HashSet<_>, _>>()
            .map(Self)
    }
}

impl Default for RiskSet {
    fn default() -> Self {
        Self::new([Status::Phishing, Status::Suspicious])
    }
}
