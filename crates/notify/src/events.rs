//! Incident notice types rendered into destination messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity levels derived from an incident update's status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational - resolved or post-incident notes
    Info,
    /// Warning - fix applied, being monitored
    Warning,
    /// Critical - ongoing investigation
    Critical,
}

impl Severity {
    /// Map a status-page update status to a severity.
    ///
    /// Unknown statuses are treated as informational.
    #[must_use]
    pub fn from_status(status: &str) -> Self {
        match status.to_ascii_lowercase().as_str() {
            "investigating" | "identified" => Self::Critical,
            "monitoring" | "scheduled" | "in_progress" | "verifying" => Self::Warning,
            _ => Self::Info,
        }
    }

    /// Get the embed color for this severity.
    #[must_use]
    pub const fn color(&self) -> u32 {
        match self {
            Self::Info => 0x0058_65f2,     // Blurple
            Self::Warning => 0x00f3_9c12,  // Orange
            Self::Critical => 0x00e7_4c3c, // Red
        }
    }

    /// Get display name for this severity.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "Info",
            Self::Warning => "Warning",
            Self::Critical => "Critical",
        }
    }
}

/// A single incident update, flattened with the incident context needed to
/// render it. Built once per update and shared across every destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentNotice {
    pub incident_id: String,
    pub incident_name: String,
    /// When the incident was first seen by the status page.
    pub created_at: DateTime<Utc>,
    pub shortlink: String,
    /// Names of affected components, possibly empty.
    #[serde(default)]
    pub components: Vec<String>,
    pub update_id: String,
    /// Raw update status label (`investigating`, `resolved`, ...).
    pub status: String,
    pub body: String,
    pub updated_at: DateTime<Utc>,
}

impl IncidentNotice {
    /// Get the message title: incident name and a readable status.
    #[must_use]
    pub fn title(&self) -> String {
        format!("{} - {}", self.incident_name, display_status(&self.status))
    }

    /// Get the severity for this notice.
    #[must_use]
    pub fn severity(&self) -> Severity {
        Severity::from_status(&self.status)
    }

    /// Comma-separated list of affected components, if any.
    #[must_use]
    pub fn components_line(&self) -> Option<String> {
        if self.components.is_empty() {
            None
        } else {
            Some(self.components.join(", "))
        }
    }

    /// Get the timestamp for this notice.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

/// Turn `in_progress` into `In Progress`.
fn display_status(status: &str) -> String {
    status
        .split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
