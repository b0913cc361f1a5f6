//! Alert records raised when a scan matches a watch-list identity.

use crate::matcher::MatchDecision;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("alert sink unavailable: {0}")]
    Unavailable(String),
    #[error("alert could not be stored: {0}")]
    Storage(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    New,
    Acknowledged,
    Resolved,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::New => "new",
            AlertStatus::Acknowledged => "acknowledged",
            AlertStatus::Resolved => "resolved",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(AlertStatus::New),
            "acknowledged" => Some(AlertStatus::Acknowledged),
            "resolved" => Some(AlertStatus::Resolved),
            _ => None,
        }
    }
}

/// A positive identification, as handed to an [`AlertSink`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRecord {
    pub id: Uuid,
    pub identity_id: String,
    pub display_name: String,
    pub contact_email: String,
    pub reference_image_ref: String,
    pub distance: f32,
    pub confidence: u8,
    /// Operator who ran the scan.
    pub scanned_by: String,
    pub station: String,
    pub created_at: DateTime<Utc>,
    pub status: AlertStatus,
}

impl AlertRecord {
    /// Shape an alert from a decision. `None` for anything but a match.
    pub fn from_decision(
        decision: &MatchDecision,
        scanned_by: &str,
        station: &str,
        at: DateTime<Utc>,
    ) -> Option<Self> {
        let MatchDecision::Match {
            identity_id,
            display_name,
            contact_email,
            reference_image_ref,
            distance,
            confidence,
        } = decision
        else {
            return None;
        };

        Some(Self {
            id: Uuid::new_v4(),
            identity_id: identity_id.clone(),
            display_name: display_name.clone(),
            contact_email: contact_email.clone(),
            reference_image_ref: reference_image_ref.clone(),
            distance: *distance,
            confidence: *confidence,
            scanned_by: scanned_by.to_string(),
            station: station.to_string(),
            created_at: at,
            status: AlertStatus::New,
        })
    }
}

/// Durable destination for alerts (database, message bus, …).
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn record(&self, alert: &AlertRecord) -> Result<(), SinkError>;
}
