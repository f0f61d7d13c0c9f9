use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::billing::BillingSnapshot;

use super::{
    LeaseRecord, RentStatus, ServiceStatus, StateDocument, StateStore, StoreError, SyncEvent,
    TicketForwardRecord,
};

/// File-backed state store. The whole document is rewritten on every
/// mutation; the engine is single-flight and nothing else writes the file,
/// so that is as atomic as we need.
pub struct JsonStateStore {
    path: PathBuf,
    document: Mutex<StateDocument>,
}

impl JsonStateStore {
    /// Open the store, creating an empty document if the file is absent.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let document = if path.exists() {
            let raw = fs::read_to_string(&path)
                .map_err(|err| StoreError::Unavailable(err.to_string()))?;
            serde_json::from_str(&raw).map_err(|err| StoreError::Unavailable(err.to_string()))?
        } else {
            StateDocument::default()
        };
        Ok(Self {
            path,
            document: Mutex::new(document),
        })
    }

    fn write<T>(&self, apply: impl FnOnce(&mut StateDocument) -> T) -> Result<T, StoreError> {
        let mut doc = self.document.lock().expect("state mutex poisoned");
        let out = apply(&mut doc);
        let raw = serde_json::to_string_pretty(&*doc)
            .map_err(|err| StoreError::Unavailable(err.to_string()))?;
        fs::write(&self.path, raw).map_err(|err| StoreError::Unavailable(err.to_string()))?;
        Ok(out)
    }

    fn read<T>(&self, view: impl FnOnce(&StateDocument) -> T) -> T {
        let doc = self.document.lock().expect("state mutex poisoned");
        view(&doc)
    }
}

impl StateStore for JsonStateStore {
    fn upsert_lease(&self, record: LeaseRecord) -> Result<(), StoreError> {
        self.write(|doc| doc.upsert_lease(record))
    }

    fn lease(&self, lease_id: &str) -> Result<Option<LeaseRecord>, StoreError> {
        Ok(self.read(|doc| doc.leases.get(lease_id).cloned()))
    }

    fn leases(&self) -> Result<Vec<LeaseRecord>, StoreError> {
        Ok(self.read(|doc| doc.leases.values().cloned().collect()))
    }

    fn active_lease_for_unit(&self, unit: &str) -> Result<Option<LeaseRecord>, StoreError> {
        Ok(self.read(|doc| doc.active_lease_for_unit(unit)))
    }

    fn mark_lease_ended(&self, lease_id: &str) -> Result<(), StoreError> {
        self.write(|doc| doc.mark_lease_ended(lease_id))?
    }

    fn set_service_status(&self, lease_id: &str, status: ServiceStatus) -> Result<(), StoreError> {
        self.write(|doc| doc.with_lease(lease_id, |record| record.service = status))?
    }

    fn set_rent_status(&self, lease_id: &str, status: RentStatus) -> Result<(), StoreError> {
        self.write(|doc| doc.with_lease(lease_id, |record| record.rent = status))?
    }

    fn set_package(&self, lease_id: &str, package_code: &str) -> Result<(), StoreError> {
        self.write(|doc| {
            doc.with_lease(lease_id, |record| {
                record.package_code = package_code.to_string()
            })
        })?
    }

    fn set_recurring_charge_id(
        &self,
        lease_id: &str,
        charge_id: Option<String>,
    ) -> Result<(), StoreError> {
        self.write(|doc| {
            doc.with_lease(lease_id, |record| record.recurring_charge_id = charge_id)
        })?
    }

    fn is_ticket_forwarded(&self, ticket_id: &str) -> Result<bool, StoreError> {
        Ok(self.read(|doc| doc.tickets.contains_key(ticket_id)))
    }

    fn record_ticket_forward(&self, record: TicketForwardRecord) -> Result<(), StoreError> {
        self.write(|doc| {
            doc.tickets.insert(record.ticket_id.clone(), record);
        })
    }

    fn log_event(&self, kind: &str, detail: &str) -> Result<(), StoreError> {
        self.write(|doc| doc.log_event(kind, detail))
    }

    fn recent_events(&self, limit: usize) -> Result<Vec<SyncEvent>, StoreError> {
        Ok(self.read(|doc| doc.recent_events(limit)))
    }

    fn record_billing_snapshot(&self, snapshot: BillingSnapshot) -> Result<(), StoreError> {
        self.write(|doc| doc.billing.push(snapshot))
    }

    fn billing_history(&self, limit: usize) -> Result<Vec<BillingSnapshot>, StoreError> {
        Ok(self.read(|doc| doc.billing_history(limit)))
    }
}
