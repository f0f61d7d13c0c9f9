//! Endpoint registry: one row per physical termination unit, keyed by a name
//! derived from (property, unit). Hardware lifecycle lives here, separate
//! from tenancy lifecycle in the state store.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};

/// Derive the canonical endpoint name: `"350 S Harper"` + `"1"` becomes
/// `"350-s-harper-1"`.
pub fn endpoint_name(property: &str, unit: &str) -> String {
    format!("{}-{unit}", normalize_property(property))
}

fn normalize_property(property: &str) -> String {
    property.trim().to_lowercase().replace(' ', "-")
}

/// Hardware lifecycle of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointStatus {
    /// Inventoried, no serial yet.
    Pending,
    /// Serial on hand, not yet registered with the NMS.
    Unprovisioned,
    Suspended,
    Active,
}

impl EndpointStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Unprovisioned => "unprovisioned",
            Self::Suspended => "suspended",
            Self::Active => "active",
        }
    }
}

/// One inventory row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointRecord {
    pub endpoint_name: String,
    pub serial_number: Option<String>,
    pub mac_address: Option<String>,
    pub property: String,
    pub unit: String,
    pub date_added: Option<NaiveDate>,
    pub status: EndpointStatus,
    pub device_id: Option<String>,
}

impl EndpointRecord {
    pub fn has_serial(&self) -> bool {
        self.serial_number
            .as_deref()
            .is_some_and(|s| !s.trim().is_empty())
    }

    pub fn is_provisioned(&self) -> bool {
        self.device_id.as_deref().is_some_and(|id| !id.is_empty())
    }

    /// Rows eligible for the provisioning sweep.
    pub fn awaiting_provisioning(&self) -> bool {
        self.has_serial()
            && !self.is_provisioned()
            && matches!(
                self.status,
                EndpointStatus::Pending | EndpointStatus::Unprovisioned
            )
    }
}

/// Condensed view for the CLI `status` command.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointSummary {
    pub endpoint_name: String,
    pub property: String,
    pub unit: String,
    pub status: &'static str,
    pub has_serial: bool,
    pub provisioned: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    #[error("failed to read inventory: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid inventory data: {0}")]
    Csv(#[from] csv::Error),
    #[error("endpoint {0} not in inventory")]
    UnknownEndpoint(String),
}

/// CSV-backed registry. Mutations write through to the backing file when one
/// is configured; reader-backed inventories stay in memory for tests.
#[derive(Debug, Default)]
pub struct EndpointInventory {
    rows: Vec<EndpointRecord>,
    path: Option<PathBuf>,
}

impl EndpointInventory {
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, InventoryError> {
        let mut csv_reader = csv::Reader::from_reader(reader);
        let mut rows = Vec::new();
        for row in csv_reader.deserialize() {
            rows.push(row?);
        }
        Ok(Self { rows, path: None })
    }

    /// Load from a CSV file; a missing file is an empty inventory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, InventoryError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Ok(Self {
                rows: Vec::new(),
                path: Some(path),
            });
        }
        let file = fs::File::open(&path)?;
        let mut inventory = Self::from_reader(file)?;
        inventory.path = Some(path);
        Ok(inventory)
    }

    pub fn write_to<W: Write>(&self, writer: W) -> Result<(), InventoryError> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        for row in &self.rows {
            csv_writer.serialize(row)?;
        }
        csv_writer.flush()?;
        Ok(())
    }

    fn save(&self) -> Result<(), InventoryError> {
        if let Some(path) = &self.path {
            let file = fs::File::create(path)?;
            self.write_to(file)?;
        }
        Ok(())
    }

    pub fn push(&mut self, record: EndpointRecord) {
        self.rows.push(record);
    }

    pub fn find_by_name(&self, name: &str) -> Option<&EndpointRecord> {
        self.rows.iter().find(|row| row.endpoint_name == name)
    }

    /// Match by (property, unit) columns or by the derived name directly.
    pub fn find_by_unit(&self, property: &str, unit: &str) -> Option<&EndpointRecord> {
        let normalized = normalize_property(property);
        let expected = endpoint_name(property, unit);
        self.rows.iter().find(|row| {
            (normalize_property(&row.property) == normalized && row.unit == unit)
                || row.endpoint_name == expected
        })
    }

    /// Update status (and optionally the registered device id), stamping
    /// `date_added` the first time the endpoint reaches a registered state.
    pub fn update_status(
        &mut self,
        name: &str,
        status: EndpointStatus,
        device_id: Option<String>,
    ) -> Result<(), InventoryError> {
        let row = self
            .rows
            .iter_mut()
            .find(|row| row.endpoint_name == name)
            .ok_or_else(|| InventoryError::UnknownEndpoint(name.to_string()))?;

        row.status = status;
        if device_id.is_some() {
            row.device_id = device_id;
        }
        if matches!(status, EndpointStatus::Suspended | EndpointStatus::Active)
            && row.date_added.is_none()
        {
            row.date_added = Some(Local::now().date_naive());
        }

        self.save()
    }

    pub fn pending(&self) -> Vec<EndpointRecord> {
        self.rows
            .iter()
            .filter(|row| row.awaiting_provisioning())
            .cloned()
            .collect()
    }

    pub fn summary(&self) -> Vec<EndpointSummary> {
        self.rows
            .iter()
            .map(|row| EndpointSummary {
                endpoint_name: row.endpoint_name.clone(),
                property: row.property.clone(),
                unit: row.unit.clone(),
                status: row.status.label(),
                has_serial: row.has_serial(),
                provisioned: row.is_provisioned(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const SAMPLE: &str = "\
endpoint_name,serial_number,mac_address,property,unit,date_added,status,device_id
350-s-harper-1,UBNT001,aa:bb:cc:00:00:01,350 S Harper,1,2025-02-10,suspended,dev-1
350-s-harper-2,UBNT002,,350 S Harper,2,,pending,
350-s-harper-3,,,350 S Harper,3,,pending,
";

    fn sample() -> EndpointInventory {
        EndpointInventory::from_reader(Cursor::new(SAMPLE)).expect("parse sample inventory")
    }

    #[test]
    fn endpoint_name_normalizes_case_and_whitespace() {
        assert_eq!(endpoint_name("350 S Harper", "1"), "350-s-harper-1");
        assert_eq!(endpoint_name("  350 S Harper ", "12"), "350-s-harper-12");
    }

    #[test]
    fn find_by_unit_matches_columns_and_derived_name() {
        let inventory = sample();
        let row = inventory
            .find_by_unit("350 S Harper", "1")
            .expect("row present");
        assert_eq!(row.endpoint_name, "350-s-harper-1");
        assert!(inventory.find_by_unit("350 S Harper", "9").is_none());
    }

    #[test]
    fn pending_requires_serial_and_no_registration() {
        let inventory = sample();
        let pending = inventory.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].endpoint_name, "350-s-harper-2");
    }

    #[test]
    fn update_status_stamps_date_added_once() {
        let mut inventory = sample();
        inventory
            .update_status(
                "350-s-harper-2",
                EndpointStatus::Suspended,
                Some("dev-2".to_string()),
            )
            .expect("update succeeds");
        let row = inventory.find_by_name("350-s-harper-2").expect("row");
        assert_eq!(row.status, EndpointStatus::Suspended);
        assert_eq!(row.device_id.as_deref(), Some("dev-2"));
        let stamped = row.date_added.expect("date stamped");

        inventory
            .update_status("350-s-harper-2", EndpointStatus::Active, None)
            .expect("update succeeds");
        let row = inventory.find_by_name("350-s-harper-2").expect("row");
        assert_eq!(row.date_added, Some(stamped));
        // Device id survives a status-only update.
        assert_eq!(row.device_id.as_deref(), Some("dev-2"));
    }

    #[test]
    fn update_status_rejects_unknown_endpoint() {
        let mut inventory = sample();
        let err = inventory
            .update_status("nowhere-9", EndpointStatus::Active, None)
            .expect_err("unknown endpoint");
        assert!(matches!(err, InventoryError::UnknownEndpoint(_)));
    }

    #[test]
    fn round_trips_through_csv() {
        let inventory = sample();
        let mut buffer = Vec::new();
        inventory.write_to(&mut buffer).expect("serialize");
        let reloaded =
            EndpointInventory::from_reader(Cursor::new(buffer)).expect("parse serialized");
        assert_eq!(reloaded.len(), 3);
        assert_eq!(
            reloaded.find_by_name("350-s-harper-1").map(|r| r.status),
            Some(EndpointStatus::Suspended)
        );
    }
}
