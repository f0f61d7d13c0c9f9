//! Endpoint activation protocol: the only code that talks to the
//! network-management system. Activation and suspension are idempotent from
//! the caller's side; the local status is checked before any remote call
//! since the remote system's idempotence cannot be assumed.

use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use crate::clients::{ClientError, NetworkApi};
use crate::inventory::{EndpointInventory, EndpointRecord, EndpointStatus, InventoryError};

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("no endpoint inventoried for {property} unit {unit}")]
    EndpointNotFound { property: String, unit: String },
    #[error("endpoint {name} has no registered device")]
    EndpointNotProvisioned { name: String },
    #[error("endpoint {name} not in inventory")]
    UnknownEndpoint { name: String },
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Inventory(#[from] InventoryError),
}

/// Tally for a provisioning sweep over drop-shipped hardware.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProvisionSweep {
    pub provisioned: usize,
    pub failed: usize,
}

pub struct EndpointProvisioner<N> {
    network: Arc<N>,
    inventory: Arc<Mutex<EndpointInventory>>,
    parent_site_id: String,
}

impl<N: NetworkApi> EndpointProvisioner<N> {
    pub fn new(
        network: Arc<N>,
        inventory: Arc<Mutex<EndpointInventory>>,
        parent_site_id: impl Into<String>,
    ) -> Self {
        Self {
            network,
            inventory,
            parent_site_id: parent_site_id.into(),
        }
    }

    pub fn inventory(&self) -> Arc<Mutex<EndpointInventory>> {
        Arc::clone(&self.inventory)
    }

    /// Registered device id for a unit's endpoint, for ticket linking.
    pub fn device_for_unit(&self, property: &str, unit: &str) -> Option<String> {
        let inventory = self.inventory.lock().expect("inventory mutex poisoned");
        inventory
            .find_by_unit(property, unit)
            .and_then(|row| row.device_id.clone())
    }

    /// Activate the endpoint bound to (property, unit) and apply bandwidth
    /// limits. Already-active endpoints are a local no-op.
    pub fn activate(
        &self,
        property: &str,
        unit: &str,
        down_mbps: u32,
        up_mbps: u32,
    ) -> Result<(), ProvisionError> {
        let (name, device_id, status) = self.resolve(property, unit)?;
        if status == EndpointStatus::Active {
            info!(endpoint = %name, "endpoint already active");
            return Ok(());
        }

        self.network.activate_device(&device_id)?;
        self.network
            .set_device_bandwidth(&device_id, down_mbps, up_mbps)?;
        self.update(&name, EndpointStatus::Active, None)?;
        info!(endpoint = %name, down_mbps, up_mbps, "activated endpoint");
        Ok(())
    }

    /// Suspend the endpoint with a human-readable reason. Already-suspended
    /// endpoints are a local no-op.
    pub fn suspend(&self, property: &str, unit: &str, reason: &str) -> Result<(), ProvisionError> {
        let (name, device_id, status) = self.resolve(property, unit)?;
        if status == EndpointStatus::Suspended {
            info!(endpoint = %name, "endpoint already suspended");
            return Ok(());
        }

        self.network.suspend_device(&device_id, reason)?;
        self.update(&name, EndpointStatus::Suspended, None)?;
        info!(endpoint = %name, reason, "suspended endpoint");
        Ok(())
    }

    /// Update bandwidth limits only (package upgrades).
    pub fn set_speed(
        &self,
        property: &str,
        unit: &str,
        down_mbps: u32,
        up_mbps: u32,
    ) -> Result<(), ProvisionError> {
        let (name, device_id, _) = self.resolve(property, unit)?;
        self.network
            .set_device_bandwidth(&device_id, down_mbps, up_mbps)?;
        info!(endpoint = %name, down_mbps, up_mbps, "updated endpoint bandwidth");
        Ok(())
    }

    pub fn activate_by_name(
        &self,
        name: &str,
        down_mbps: u32,
        up_mbps: u32,
    ) -> Result<(), ProvisionError> {
        let row = self.row_by_name(name)?;
        self.activate(&row.property, &row.unit, down_mbps, up_mbps)
    }

    pub fn suspend_by_name(&self, name: &str, reason: &str) -> Result<(), ProvisionError> {
        let row = self.row_by_name(name)?;
        self.suspend(&row.property, &row.unit, reason)
    }

    /// Register a drop-shipped device with the NMS: find by serial, authorize
    /// under the parent site, and leave it suspended awaiting a tenant.
    pub fn provision(&self, name: &str, serial: &str) -> Result<(), ProvisionError> {
        info!(endpoint = %name, serial, "provisioning endpoint");

        let device = self
            .network
            .find_device_by_serial(serial)?
            .ok_or_else(|| ClientError::Remote(format!("no device with serial {serial}")))?;

        self.network
            .authorize_device(&device.id, name, &self.parent_site_id)?;
        self.network
            .suspend_device(&device.id, "Awaiting tenant")?;
        self.update(name, EndpointStatus::Suspended, Some(device.id))?;
        Ok(())
    }

    /// Provision everything with a serial that is not yet registered.
    pub fn provision_all_pending(&self) -> ProvisionSweep {
        let pending = {
            let inventory = self.inventory.lock().expect("inventory mutex poisoned");
            inventory.pending()
        };

        let mut sweep = ProvisionSweep::default();
        for row in pending {
            let serial = row.serial_number.as_deref().unwrap_or_default().to_string();
            match self.provision(&row.endpoint_name, &serial) {
                Ok(()) => sweep.provisioned += 1,
                Err(err) => {
                    warn!(endpoint = %row.endpoint_name, error = %err, "provisioning failed");
                    sweep.failed += 1;
                }
            }
        }
        sweep
    }

    fn resolve(
        &self,
        property: &str,
        unit: &str,
    ) -> Result<(String, String, EndpointStatus), ProvisionError> {
        let inventory = self.inventory.lock().expect("inventory mutex poisoned");
        let row = inventory.find_by_unit(property, unit).ok_or_else(|| {
            ProvisionError::EndpointNotFound {
                property: property.to_string(),
                unit: unit.to_string(),
            }
        })?;
        let device_id = row
            .device_id
            .clone()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ProvisionError::EndpointNotProvisioned {
                name: row.endpoint_name.clone(),
            })?;
        Ok((row.endpoint_name.clone(), device_id, row.status))
    }

    fn row_by_name(&self, name: &str) -> Result<EndpointRecord, ProvisionError> {
        let inventory = self.inventory.lock().expect("inventory mutex poisoned");
        inventory
            .find_by_name(name)
            .cloned()
            .ok_or_else(|| ProvisionError::UnknownEndpoint {
                name: name.to_string(),
            })
    }

    fn update(
        &self,
        name: &str,
        status: EndpointStatus,
        device_id: Option<String>,
    ) -> Result<(), ProvisionError> {
        let mut inventory = self.inventory.lock().expect("inventory mutex poisoned");
        inventory.update_status(name, status, device_id)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::memory::{InMemoryNetworkApi, NetworkCall};
    use crate::clients::Device;
    use std::io::Cursor;

    const INVENTORY: &str = "\
endpoint_name,serial_number,mac_address,property,unit,date_added,status,device_id
350-s-harper-1,UBNT001,,350 S Harper,1,2025-02-10,suspended,dev-1
350-s-harper-2,UBNT002,,350 S Harper,2,,pending,
350-s-harper-3,,,350 S Harper,3,,pending,
";

    fn provisioner() -> (EndpointProvisioner<InMemoryNetworkApi>, Arc<InMemoryNetworkApi>) {
        let network = Arc::new(InMemoryNetworkApi::default());
        let inventory = EndpointInventory::from_reader(Cursor::new(INVENTORY)).expect("inventory");
        let provisioner = EndpointProvisioner::new(
            Arc::clone(&network),
            Arc::new(Mutex::new(inventory)),
            "site-1",
        );
        (provisioner, network)
    }

    #[test]
    fn activate_issues_activate_and_bandwidth_calls() {
        let (provisioner, network) = provisioner();
        provisioner
            .activate("350 S Harper", "1", 500, 500)
            .expect("activation succeeds");
        assert_eq!(
            network.calls(),
            vec![
                NetworkCall::Activate {
                    device_id: "dev-1".to_string()
                },
                NetworkCall::Bandwidth {
                    device_id: "dev-1".to_string(),
                    down_mbps: 500,
                    up_mbps: 500
                },
            ]
        );
    }

    #[test]
    fn activating_active_endpoint_is_a_local_no_op() {
        let (provisioner, network) = provisioner();
        provisioner
            .activate("350 S Harper", "1", 500, 500)
            .expect("first activation");
        let calls_after_first = network.calls().len();
        provisioner
            .activate("350 S Harper", "1", 500, 500)
            .expect("second activation");
        assert_eq!(network.calls().len(), calls_after_first);
    }

    #[test]
    fn suspending_suspended_endpoint_is_a_local_no_op() {
        let (provisioner, network) = provisioner();
        provisioner
            .suspend("350 S Harper", "1", "Lease ended")
            .expect("suspend succeeds");
        assert!(network.calls().is_empty());
    }

    #[test]
    fn unknown_unit_signals_endpoint_not_found() {
        let (provisioner, _) = provisioner();
        let err = provisioner
            .activate("350 S Harper", "99", 500, 500)
            .expect_err("no inventory row");
        assert!(matches!(err, ProvisionError::EndpointNotFound { .. }));
    }

    #[test]
    fn unregistered_device_signals_not_provisioned() {
        let (provisioner, network) = provisioner();
        let err = provisioner
            .activate("350 S Harper", "2", 500, 500)
            .expect_err("no device id");
        assert!(matches!(err, ProvisionError::EndpointNotProvisioned { .. }));
        assert!(network.calls().is_empty());
    }

    #[test]
    fn provision_authorizes_and_parks_device_suspended() {
        let (provisioner, network) = provisioner();
        network.add_device(Device {
            id: "dev-2".to_string(),
            name: None,
            serial: Some("UBNT002".to_string()),
            mac: None,
        });

        let sweep = provisioner.provision_all_pending();
        assert_eq!(sweep.provisioned, 1);
        assert_eq!(sweep.failed, 0);

        assert_eq!(
            network.calls(),
            vec![
                NetworkCall::Authorize {
                    device_id: "dev-2".to_string(),
                    name: "350-s-harper-2".to_string(),
                    site_id: "site-1".to_string()
                },
                NetworkCall::Suspend {
                    device_id: "dev-2".to_string(),
                    reason: "Awaiting tenant".to_string()
                },
            ]
        );

        let inventory = provisioner.inventory();
        let inventory = inventory.lock().expect("inventory mutex poisoned");
        let row = inventory.find_by_name("350-s-harper-2").expect("row");
        assert_eq!(row.status, EndpointStatus::Suspended);
        assert_eq!(row.device_id.as_deref(), Some("dev-2"));
    }

    #[test]
    fn sweep_counts_devices_missing_from_nms_as_failed() {
        let (provisioner, _) = provisioner();
        let sweep = provisioner.provision_all_pending();
        assert_eq!(sweep.provisioned, 0);
        assert_eq!(sweep.failed, 1);
    }
}
