//! Fakes shared by unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use notify::{
    ChannelError, DestinationAccess, DestinationChannel, IncidentNotice, Permissions,
};

use crate::error::FeedError;
use crate::feed::{Incident, IncidentFeed, IncidentUpdate};

/// Incident with updates given oldest first, served newest first like the
/// real feed.
pub fn incident(id: &str, updates_oldest_first: &[&str]) -> Incident {
    Incident {
        id: id.to_string(),
        name: format!("Incident {id}"),
        created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        shortlink: format!("https://stspg.io/{id}"),
        components: Vec::new(),
        incident_updates: updates_oldest_first
            .iter()
            .rev()
            .map(|update_id| IncidentUpdate {
                id: (*update_id).to_string(),
                status: "investigating".to_string(),
                body: format!("body of {update_id}"),
                updated_at: Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap(),
            })
            .collect(),
    }
}

pub fn notice(update_id: &str) -> IncidentNotice {
    let i = incident("inc", &[update_id]);
    i.notice_for(&i.incident_updates[0])
}

/// Feed serving a fixed listing (newest first) until replaced.
#[derive(Default)]
pub struct StaticFeed {
    incidents: Mutex<Vec<Incident>>,
    failure: Mutex<Option<u16>>,
    latency: Mutex<Option<f64>>,
}

impl StaticFeed {
    /// `incidents` are given oldest first for readability.
    pub fn new(incidents_oldest_first: Vec<Incident>) -> Self {
        let feed = Self::default();
        feed.set(incidents_oldest_first);
        feed
    }

    pub fn set(&self, mut incidents_oldest_first: Vec<Incident>) {
        incidents_oldest_first.reverse();
        *self.incidents.lock().unwrap() = incidents_oldest_first;
        *self.failure.lock().unwrap() = None;
    }

    pub fn fail_with(&self, status: u16) {
        *self.failure.lock().unwrap() = Some(status);
    }

    pub fn set_latency(&self, mean: Option<f64>) {
        *self.latency.lock().unwrap() = mean;
    }
}

#[async_trait]
impl IncidentFeed for StaticFeed {
    async fn fetch_incidents(&self) -> Result<Vec<Incident>, FeedError> {
        let failure = *self.failure.lock().unwrap();
        match failure {
            Some(status) => Err(FeedError::Status {
                endpoint: "/api/v2/incidents.json".to_string(),
                status,
            }),
            None => Ok(self.incidents.lock().unwrap().clone()),
        }
    }

    async fn fetch_latency_metric(&self) -> Result<f64, FeedError> {
        let latency = *self.latency.lock().unwrap();
        latency.ok_or(FeedError::Status {
            endpoint: "/metrics".to_string(),
            status: 500,
        })
    }
}

/// Destination channel that records every send.
#[derive(Default)]
pub struct RecordingChannel {
    denied: Mutex<HashSet<u64>>,
    failing: Mutex<HashSet<u64>>,
    vanishing: Mutex<HashSet<u64>>,
    inspections: Mutex<HashMap<u64, usize>>,
    sent: Mutex<Vec<(u64, String)>>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Destination lacks the capability to receive notices.
    pub fn deny(&self, destination_id: u64) {
        self.denied.lock().unwrap().insert(destination_id);
    }

    /// Sends to the destination fail transiently.
    pub fn fail_sends_to(&self, destination_id: u64) {
        self.failing.lock().unwrap().insert(destination_id);
    }

    /// Stop failing sends to the destination.
    pub fn heal(&self, destination_id: u64) {
        self.failing.lock().unwrap().remove(&destination_id);
    }

    /// Destination passes inspection but is gone by the time of sending.
    pub fn vanish_on_send(&self, destination_id: u64) {
        self.vanishing.lock().unwrap().insert(destination_id);
    }

    pub fn inspections(&self, destination_id: u64) -> usize {
        self.inspections
            .lock()
            .unwrap()
            .get(&destination_id)
            .copied()
            .unwrap_or(0)
    }

    /// Update ids sent to a destination, in send order.
    pub fn sent_to(&self, destination_id: u64) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == destination_id)
            .map(|(_, update)| update.clone())
            .collect()
    }

    pub fn total_sends(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl DestinationChannel for RecordingChannel {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn enabled(&self) -> bool {
        true
    }

    async fn inspect(&self, destination_id: u64) -> Result<DestinationAccess, ChannelError> {
        *self
            .inspections
            .lock()
            .unwrap()
            .entry(destination_id)
            .or_default() += 1;
        if self.denied.lock().unwrap().contains(&destination_id) {
            Ok(DestinationAccess::Granted(Permissions::VIEW_CHANNEL))
        } else {
            Ok(DestinationAccess::Granted(Permissions::DELIVERY))
        }
    }

    async fn send(
        &self,
        destination_id: u64,
        notice: &IncidentNotice,
    ) -> Result<(), ChannelError> {
        if self.vanishing.lock().unwrap().contains(&destination_id) {
            return Err(ChannelError::NotFound(destination_id));
        }
        if self.failing.lock().unwrap().contains(&destination_id) {
            return Err(ChannelError::Status {
                status: 502,
                body: "bad gateway".to_string(),
            });
        }
        self.sent
            .lock()
            .unwrap()
            .push((destination_id, notice.update_id.clone()));
        Ok(())
    }
}
