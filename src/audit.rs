// SPDX-License-Identifier: AGPL-3.0-or-later

//! Audit trail for money-moving and administrative operations.
//!
//! Every credit, allocation decision and conversion is appended to a daily
//! JSONL file. The trail is append-only; nothing in the service rewrites or
//! deletes past events.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use utoipa::ToSchema;

/// Types of auditable events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    // Wallet events
    WalletProvisioned,
    WalletStatusChanged,

    // Reference events
    ReferenceGenerated,
    ReferenceConsumed,

    // Deposit events
    DepositCredited,
    DepositUnallocated,
    ScrapeApplied,

    // Allocation events
    AllocationProposed,
    AllocationApproved,
    AllocationRejected,
    AllocationExecuted,

    // Conversion events
    ConversionQuoted,
    ConversionExecuted,

    // Auth events
    PermissionDenied,
    AdminAccess,
}

/// One audit trail entry.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuditEvent {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    /// User who triggered the event (if known).
    pub user_id: Option<String>,
    /// Resource affected (wallet_id, proposal_id, reference, ...).
    pub resource_id: Option<String>,
    /// Resource type (wallet, proposal, reference, ...).
    pub resource_type: Option<String>,
    /// Additional details as JSON.
    #[schema(value_type = Option<Object>)]
    pub details: Option<serde_json::Value>,
    pub success: bool,
    pub error: Option<String>,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type,
            user_id: None,
            resource_id: None,
            resource_type: None,
            details: None,
            success: true,
            error: None,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_resource(
        mut self,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        self.resource_type = Some(resource_type.into());
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Mark as failed with an error message.
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("audit io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("audit serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("invalid audit date: {0}")]
    InvalidDate(String),
}

/// Append-only JSONL audit sink, one file per UTC day.
pub struct AuditSink {
    dir: PathBuf,
}

impl AuditSink {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, AuditError> {
        fs::create_dir_all(dir.as_ref())?;
        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
        })
    }

    fn file_for(&self, date: &str) -> PathBuf {
        self.dir.join(format!("audit-{date}.jsonl"))
    }

    /// Append one event to the day file for its timestamp.
    pub fn log(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let date = event.timestamp.format("%Y-%m-%d").to_string();
        let line = serde_json::to_string(event)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.file_for(&date))?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        Ok(())
    }

    /// Read all events for one date (`YYYY-MM-DD`).
    pub fn read_events(&self, date: &str) -> Result<Vec<AuditEvent>, AuditError> {
        let path = self.file_for(date);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&path)?;
        let mut events = Vec::new();
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            events.push(serde_json::from_str(line)?);
        }
        Ok(events)
    }

    /// Read events across an inclusive date range.
    pub fn read_events_range(
        &self,
        start_date: &str,
        end_date: &str,
    ) -> Result<Vec<AuditEvent>, AuditError> {
        let start = NaiveDate::parse_from_str(start_date, "%Y-%m-%d")
            .map_err(|e| AuditError::InvalidDate(e.to_string()))?;
        let end = NaiveDate::parse_from_str(end_date, "%Y-%m-%d")
            .map_err(|e| AuditError::InvalidDate(e.to_string()))?;

        let mut all_events = Vec::new();
        let mut current = start;
        while current <= end {
            let date_str = current.format("%Y-%m-%d").to_string();
            all_events.extend(self.read_events(&date_str)?);
            current = current
                .succ_opt()
                .ok_or_else(|| AuditError::InvalidDate("date overflow".to_string()))?;
        }
        Ok(all_events)
    }

    /// Filter one day's events by user.
    pub fn search_by_user(&self, user_id: &str, date: &str) -> Result<Vec<AuditEvent>, AuditError> {
        let events = self.read_events(date)?;
        Ok(events
            .into_iter()
            .filter(|e| e.user_id.as_deref() == Some(user_id))
            .collect())
    }
}

/// Log an audit event, swallowing sink failures (the operation itself must
/// not fail because the audit disk is full; the failure is traced instead).
#[macro_export]
macro_rules! audit_log {
    ($sink:expr, $event:expr) => {{
        if let Err(error) = $sink.log(&$event) {
            ::tracing::warn!(error = %error, "failed to write audit event");
        }
    }};
}

/// Non-macro form for call sites that already hold a built event.
pub fn log_best_effort(sink: &AuditSink, event: &AuditEvent) {
    if let Err(error) = sink.log(event) {
        warn!(error = %error, "failed to write audit event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, AuditSink) {
        let temp = TempDir::new().unwrap();
        let sink = AuditSink::new(temp.path()).unwrap();
        (temp, sink)
    }

    #[test]
    fn event_builder_sets_fields() {
        let event = AuditEvent::new(AuditEventType::DepositCredited)
            .with_user("user-1")
            .with_resource("wallet", "wallet-abc")
            .with_details(serde_json::json!({"amount": "150.00"}));

        assert_eq!(event.event_type, AuditEventType::DepositCredited);
        assert_eq!(event.user_id, Some("user-1".to_string()));
        assert_eq!(event.resource_id, Some("wallet-abc".to_string()));
        assert!(event.success);
    }

    #[test]
    fn failed_event_carries_the_error() {
        let event = AuditEvent::new(AuditEventType::PermissionDenied)
            .with_user("user-1")
            .failed("not an approver");
        assert!(!event.success);
        assert_eq!(event.error, Some("not an approver".to_string()));
    }

    #[test]
    fn log_and_read_round_trip() {
        let (_temp, sink) = setup();

        sink.log(
            &AuditEvent::new(AuditEventType::AllocationProposed)
                .with_user("ops-1")
                .with_resource("proposal", "p1"),
        )
        .unwrap();
        sink.log(
            &AuditEvent::new(AuditEventType::AllocationApproved)
                .with_user("ops-2")
                .with_resource("proposal", "p1"),
        )
        .unwrap();

        let today = Utc::now().format("%Y-%m-%d").to_string();
        let events = sink.read_events(&today).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, AuditEventType::AllocationProposed);
        assert_eq!(events[1].event_type, AuditEventType::AllocationApproved);
    }

    #[test]
    fn missing_day_reads_as_empty() {
        let (_temp, sink) = setup();
        assert!(sink.read_events("2020-01-01").unwrap().is_empty());
    }

    #[test]
    fn search_filters_by_user() {
        let (_temp, sink) = setup();
        sink.log(&AuditEvent::new(AuditEventType::DepositCredited).with_user("user-a"))
            .unwrap();
        sink.log(&AuditEvent::new(AuditEventType::DepositCredited).with_user("user-b"))
            .unwrap();

        let today = Utc::now().format("%Y-%m-%d").to_string();
        let events = sink.search_by_user("user-a", &today).unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn range_read_spans_files() {
        let (_temp, sink) = setup();
        let mut yesterday = AuditEvent::new(AuditEventType::ScrapeApplied);
        yesterday.timestamp = Utc::now() - chrono::Duration::days(1);
        sink.log(&yesterday).unwrap();
        sink.log(&AuditEvent::new(AuditEventType::ScrapeApplied))
            .unwrap();

        let start = (Utc::now() - chrono::Duration::days(1))
            .format("%Y-%m-%d")
            .to_string();
        let end = Utc::now().format("%Y-%m-%d").to_string();
        let events = sink.read_events_range(&start, &end).unwrap();
        assert_eq!(events.len(), 2);
    }
}
