//! Persistent state owned by the reconciliation core: lease sync records,
//! ticket forward records, the append-only event log, and billing snapshot
//! history. Single-writer; every mutation is one atomic keyed upsert.

pub mod json;
pub mod memory;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::billing::BillingSnapshot;

/// Tenancy lifecycle. Ended records are never resurrected; a new tenant in
/// the same unit gets a fresh record under the new lease id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaseLifecycle {
    Active,
    Ended,
}

/// Network service status tracked locally, independent of lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Active,
    Suspended,
}

/// Rent standing used by the edge-triggered delinquency check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RentStatus {
    Current,
    Delinquent,
}

/// One tenancy-to-service binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaseRecord {
    pub lease_id: String,
    pub tenant_id: Option<String>,
    pub unit: String,
    pub property: String,
    pub package_code: String,
    pub billing_client_id: Option<String>,
    pub billing_service_id: Option<String>,
    pub recurring_charge_id: Option<String>,
    pub lifecycle: LeaseLifecycle,
    pub service: ServiceStatus,
    pub rent: RentStatus,
    pub synced_at: DateTime<Utc>,
}

/// How a forwarded ticket was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketClassification {
    Support,
    Upgrade,
}

/// Dedup guard for ticket forwarding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketForwardRecord {
    pub ticket_id: String,
    pub forwarded_id: Option<String>,
    pub classification: TicketClassification,
    pub synced_at: DateTime<Utc>,
}

/// Append-only audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncEvent {
    pub kind: String,
    pub detail: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("lease {0} not found")]
    LeaseNotFound(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Storage abstraction so the engine can be exercised in isolation.
pub trait StateStore: Send + Sync {
    fn upsert_lease(&self, record: LeaseRecord) -> Result<(), StoreError>;
    fn lease(&self, lease_id: &str) -> Result<Option<LeaseRecord>, StoreError>;
    fn leases(&self) -> Result<Vec<LeaseRecord>, StoreError>;
    /// The one non-ended record for a unit, if any.
    fn active_lease_for_unit(&self, unit: &str) -> Result<Option<LeaseRecord>, StoreError>;
    fn mark_lease_ended(&self, lease_id: &str) -> Result<(), StoreError>;
    fn set_service_status(&self, lease_id: &str, status: ServiceStatus) -> Result<(), StoreError>;
    fn set_rent_status(&self, lease_id: &str, status: RentStatus) -> Result<(), StoreError>;
    fn set_package(&self, lease_id: &str, package_code: &str) -> Result<(), StoreError>;
    fn set_recurring_charge_id(
        &self,
        lease_id: &str,
        charge_id: Option<String>,
    ) -> Result<(), StoreError>;
    fn is_ticket_forwarded(&self, ticket_id: &str) -> Result<bool, StoreError>;
    fn record_ticket_forward(&self, record: TicketForwardRecord) -> Result<(), StoreError>;
    fn log_event(&self, kind: &str, detail: &str) -> Result<(), StoreError>;
    fn recent_events(&self, limit: usize) -> Result<Vec<SyncEvent>, StoreError>;
    fn record_billing_snapshot(&self, snapshot: BillingSnapshot) -> Result<(), StoreError>;
    fn billing_history(&self, limit: usize) -> Result<Vec<BillingSnapshot>, StoreError>;
}

/// The whole persisted document. Both store implementations mutate this
/// through the same methods so semantics cannot drift between them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct StateDocument {
    pub(crate) leases: BTreeMap<String, LeaseRecord>,
    pub(crate) tickets: BTreeMap<String, TicketForwardRecord>,
    pub(crate) events: Vec<SyncEvent>,
    pub(crate) billing: Vec<BillingSnapshot>,
}

impl StateDocument {
    pub(crate) fn upsert_lease(&mut self, record: LeaseRecord) {
        self.leases.insert(record.lease_id.clone(), record);
    }

    pub(crate) fn active_lease_for_unit(&self, unit: &str) -> Option<LeaseRecord> {
        self.leases
            .values()
            .find(|record| record.lifecycle == LeaseLifecycle::Active && record.unit == unit)
            .cloned()
    }

    pub(crate) fn with_lease<F>(&mut self, lease_id: &str, apply: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut LeaseRecord),
    {
        let record = self
            .leases
            .get_mut(lease_id)
            .ok_or_else(|| StoreError::LeaseNotFound(lease_id.to_string()))?;
        apply(record);
        record.synced_at = Utc::now();
        Ok(())
    }

    pub(crate) fn mark_lease_ended(&mut self, lease_id: &str) -> Result<(), StoreError> {
        self.with_lease(lease_id, |record| {
            record.lifecycle = LeaseLifecycle::Ended;
            record.service = ServiceStatus::Suspended;
        })
    }

    pub(crate) fn log_event(&mut self, kind: &str, detail: &str) {
        self.events.push(SyncEvent {
            kind: kind.to_string(),
            detail: detail.to_string(),
            at: Utc::now(),
        });
    }

    pub(crate) fn recent_events(&self, limit: usize) -> Vec<SyncEvent> {
        self.events.iter().rev().take(limit).cloned().collect()
    }

    pub(crate) fn billing_history(&self, limit: usize) -> Vec<BillingSnapshot> {
        self.billing.iter().rev().take(limit).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(lease_id: &str, unit: &str) -> LeaseRecord {
        LeaseRecord {
            lease_id: lease_id.to_string(),
            tenant_id: None,
            unit: unit.to_string(),
            property: "350 S Harper".to_string(),
            package_code: "500M".to_string(),
            billing_client_id: None,
            billing_service_id: None,
            recurring_charge_id: None,
            lifecycle: LeaseLifecycle::Active,
            service: ServiceStatus::Active,
            rent: RentStatus::Current,
            synced_at: Utc::now(),
        }
    }

    #[test]
    fn upsert_replaces_by_lease_id() {
        let mut doc = StateDocument::default();
        doc.upsert_lease(record("l-1", "4"));
        let mut updated = record("l-1", "4");
        updated.package_code = "1G".to_string();
        doc.upsert_lease(updated);
        assert_eq!(doc.leases.len(), 1);
        assert_eq!(doc.leases["l-1"].package_code, "1G");
    }

    #[test]
    fn ended_lease_is_not_the_units_active_lease() {
        let mut doc = StateDocument::default();
        doc.upsert_lease(record("l-1", "4"));
        doc.mark_lease_ended("l-1").expect("lease exists");
        assert!(doc.active_lease_for_unit("4").is_none());
        // The record itself survives as the audit trail.
        assert_eq!(doc.leases["l-1"].lifecycle, LeaseLifecycle::Ended);
        assert_eq!(doc.leases["l-1"].service, ServiceStatus::Suspended);
    }

    #[test]
    fn events_return_most_recent_first() {
        let mut doc = StateDocument::default();
        doc.log_event("a", "first");
        doc.log_event("b", "second");
        let events = doc.recent_events(1);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, "b");
    }
}
