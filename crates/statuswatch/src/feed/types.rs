//! Status-page API response types.

use chrono::{DateTime, Utc};
use notify::IncidentNotice;
use serde::{Deserialize, Serialize};

/// `GET /api/v2/incidents.json` body.
#[derive(Debug, Clone, Deserialize)]
pub struct IncidentsResponse {
    pub incidents: Vec<Incident>,
}

/// A status-page incident.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub shortlink: String,
    #[serde(default)]
    pub components: Vec<Component>,
    /// Newest first as served; oldest first once normalized.
    #[serde(default)]
    pub incident_updates: Vec<IncidentUpdate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    pub name: String,
}

/// One posted update on an incident.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentUpdate {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub body: String,
    pub updated_at: DateTime<Utc>,
}

impl Incident {
    pub fn update_ids(&self) -> impl Iterator<Item = &str> {
        self.incident_updates.iter().map(|u| u.id.as_str())
    }

    /// Flatten one of this incident's updates into a renderable notice.
    #[must_use]
    pub fn notice_for(&self, update: &IncidentUpdate) -> IncidentNotice {
        IncidentNotice {
            incident_id: self.id.clone(),
            incident_name: self.name.clone(),
            created_at: self.created_at,
            shortlink: self.shortlink.clone(),
            components: self.components.iter().map(|c| c.name.clone()).collect(),
            update_id: update.id.clone(),
            status: update.status.clone(),
            body: update.body.clone(),
            updated_at: update.updated_at,
        }
    }
}

/// Metrics display body; only the summary is used.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsResponse {
    pub summary: MetricSummary,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricSummary {
    pub mean: f64,
}
