//! In-memory collaborator implementations. They back the test suite and the
//! CLI demo harness, and record every mutating call so idempotence can be
//! asserted from the outside.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;

use super::property::{Lease, LineItem, MaintenanceTicket, PropertyManagementApi, Tenant};
use super::subscriber::{
    BillingApi, BillingService, Device, NetworkApi, NewClient, ServicePatch, ServiceState,
};
use super::ClientError;

/// Recorded mutation against the property-management system.
#[derive(Debug, Clone, PartialEq)]
pub enum ChargeCall {
    Created {
        id: String,
        lease_id: String,
        description: String,
        amount: f64,
    },
    Updated {
        charge_id: String,
        amount: f64,
        description: String,
    },
    Deleted {
        charge_id: String,
    },
}

/// Invoice captured by either collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedInvoice {
    pub account: String,
    pub items: Vec<LineItem>,
}

#[derive(Default, Clone)]
pub struct InMemoryPropertyApi {
    leases: Arc<Mutex<Vec<Lease>>>,
    balances: Arc<Mutex<HashMap<String, f64>>>,
    failing_balances: Arc<Mutex<HashSet<String>>>,
    tenants: Arc<Mutex<HashMap<String, Vec<Tenant>>>>,
    tickets: Arc<Mutex<Vec<MaintenanceTicket>>>,
    charge_calls: Arc<Mutex<Vec<ChargeCall>>>,
    invoices: Arc<Mutex<Vec<RecordedInvoice>>>,
    charge_seq: Arc<AtomicU64>,
}

impl InMemoryPropertyApi {
    pub fn set_leases(&self, leases: Vec<Lease>) {
        *self.leases.lock().expect("lease mutex poisoned") = leases;
    }

    pub fn set_balance(&self, lease_id: &str, balance: f64) {
        self.balances
            .lock()
            .expect("balance mutex poisoned")
            .insert(lease_id.to_string(), balance);
    }

    /// Make balance queries for one lease time out, for isolation tests.
    pub fn fail_balance(&self, lease_id: &str) {
        self.failing_balances
            .lock()
            .expect("balance mutex poisoned")
            .insert(lease_id.to_string());
    }

    pub fn set_tenants(&self, lease_id: &str, tenants: Vec<Tenant>) {
        self.tenants
            .lock()
            .expect("tenant mutex poisoned")
            .insert(lease_id.to_string(), tenants);
    }

    pub fn set_tickets(&self, tickets: Vec<MaintenanceTicket>) {
        *self.tickets.lock().expect("ticket mutex poisoned") = tickets;
    }

    pub fn charge_calls(&self) -> Vec<ChargeCall> {
        self.charge_calls
            .lock()
            .expect("charge mutex poisoned")
            .clone()
    }

    pub fn invoices(&self) -> Vec<RecordedInvoice> {
        self.invoices.lock().expect("invoice mutex poisoned").clone()
    }

    pub fn mutating_calls(&self) -> usize {
        self.charge_calls().len() + self.invoices().len()
    }
}

impl PropertyManagementApi for InMemoryPropertyApi {
    fn active_leases(&self, _property_id: &str) -> Result<Vec<Lease>, ClientError> {
        Ok(self.leases.lock().expect("lease mutex poisoned").clone())
    }

    fn lease_balance(&self, lease_id: &str) -> Result<f64, ClientError> {
        if self
            .failing_balances
            .lock()
            .expect("balance mutex poisoned")
            .contains(lease_id)
        {
            return Err(ClientError::Timeout { seconds: 30 });
        }
        Ok(self
            .balances
            .lock()
            .expect("balance mutex poisoned")
            .get(lease_id)
            .copied()
            .unwrap_or(0.0))
    }

    fn tenants_by_lease(&self, lease_id: &str) -> Result<Vec<Tenant>, ClientError> {
        Ok(self
            .tenants
            .lock()
            .expect("tenant mutex poisoned")
            .get(lease_id)
            .cloned()
            .unwrap_or_default())
    }

    fn maintenance_tickets(
        &self,
        _property_id: &str,
        _status: &str,
    ) -> Result<Vec<MaintenanceTicket>, ClientError> {
        Ok(self.tickets.lock().expect("ticket mutex poisoned").clone())
    }

    fn create_recurring_charge(
        &self,
        lease_id: &str,
        description: &str,
        amount: f64,
    ) -> Result<String, ClientError> {
        let id = format!("chg-{}", self.charge_seq.fetch_add(1, Ordering::Relaxed) + 1);
        self.charge_calls
            .lock()
            .expect("charge mutex poisoned")
            .push(ChargeCall::Created {
                id: id.clone(),
                lease_id: lease_id.to_string(),
                description: description.to_string(),
                amount,
            });
        Ok(id)
    }

    fn update_recurring_charge(
        &self,
        charge_id: &str,
        amount: f64,
        description: &str,
    ) -> Result<(), ClientError> {
        self.charge_calls
            .lock()
            .expect("charge mutex poisoned")
            .push(ChargeCall::Updated {
                charge_id: charge_id.to_string(),
                amount,
                description: description.to_string(),
            });
        Ok(())
    }

    fn delete_recurring_charge(&self, charge_id: &str) -> Result<(), ClientError> {
        self.charge_calls
            .lock()
            .expect("charge mutex poisoned")
            .push(ChargeCall::Deleted {
                charge_id: charge_id.to_string(),
            });
        Ok(())
    }

    fn create_invoice(
        &self,
        tenant_id: &str,
        line_items: &[LineItem],
    ) -> Result<String, ClientError> {
        let mut invoices = self.invoices.lock().expect("invoice mutex poisoned");
        invoices.push(RecordedInvoice {
            account: tenant_id.to_string(),
            items: line_items.to_vec(),
        });
        Ok(format!("inv-{}", invoices.len()))
    }
}

/// Ticket captured by the billing collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedTicket {
    pub client_id: String,
    pub subject: String,
    pub message: String,
    pub device_id: Option<String>,
}

#[derive(Default, Clone)]
pub struct InMemoryBillingApi {
    clients: Arc<Mutex<Vec<NewClient>>>,
    services: Arc<Mutex<Vec<BillingService>>>,
    patches: Arc<Mutex<Vec<(String, ServicePatch)>>>,
    tickets: Arc<Mutex<Vec<RecordedTicket>>>,
    invoices: Arc<Mutex<Vec<RecordedInvoice>>>,
    seq: Arc<AtomicU64>,
}

impl InMemoryBillingApi {
    /// Flip a service's authoritative state, simulating a suspension or
    /// reinstatement enacted directly in the billing platform.
    pub fn set_service_state(&self, service_id: &str, state: ServiceState) {
        let mut services = self.services.lock().expect("service mutex poisoned");
        if let Some(service) = services.iter_mut().find(|s| s.id == service_id) {
            service.state = state;
        }
    }

    pub fn created_tickets(&self) -> Vec<RecordedTicket> {
        self.tickets.lock().expect("ticket mutex poisoned").clone()
    }

    pub fn service_patches(&self) -> Vec<(String, ServicePatch)> {
        self.patches.lock().expect("patch mutex poisoned").clone()
    }

    pub fn invoices(&self) -> Vec<RecordedInvoice> {
        self.invoices.lock().expect("invoice mutex poisoned").clone()
    }

    pub fn mutating_calls(&self) -> usize {
        let clients = self.clients.lock().expect("client mutex poisoned").len();
        let services = self.seq.load(Ordering::Relaxed) as usize;
        clients + services + self.service_patches().len() + self.created_tickets().len()
            + self.invoices().len()
    }
}

impl BillingApi for InMemoryBillingApi {
    fn create_client(&self, client: &NewClient) -> Result<String, ClientError> {
        let mut clients = self.clients.lock().expect("client mutex poisoned");
        clients.push(client.clone());
        Ok(format!("client-{}", clients.len()))
    }

    fn create_service(
        &self,
        client_id: &str,
        plan_id: &str,
        _active_from: NaiveDate,
    ) -> Result<String, ClientError> {
        let id = format!("svc-{}", self.seq.fetch_add(1, Ordering::Relaxed) + 1);
        self.services
            .lock()
            .expect("service mutex poisoned")
            .push(BillingService {
                id: id.clone(),
                client_id: client_id.to_string(),
                plan_id: plan_id.to_string(),
                state: ServiceState::Active,
            });
        Ok(id)
    }

    fn update_service(&self, service_id: &str, patch: &ServicePatch) -> Result<(), ClientError> {
        {
            let mut services = self.services.lock().expect("service mutex poisoned");
            let Some(service) = services.iter_mut().find(|s| s.id == service_id) else {
                return Err(ClientError::Remote(format!("unknown service {service_id}")));
            };
            if let Some(plan_id) = &patch.plan_id {
                service.plan_id = plan_id.clone();
            }
            if let Some(state) = patch.state {
                service.state = state;
            }
        }
        self.patches
            .lock()
            .expect("patch mutex poisoned")
            .push((service_id.to_string(), patch.clone()));
        Ok(())
    }

    fn services(&self, client_id: &str) -> Result<Vec<BillingService>, ClientError> {
        Ok(self
            .services
            .lock()
            .expect("service mutex poisoned")
            .iter()
            .filter(|s| s.client_id == client_id)
            .cloned()
            .collect())
    }

    fn create_ticket(
        &self,
        client_id: &str,
        subject: &str,
        message: &str,
        device_id: Option<&str>,
    ) -> Result<String, ClientError> {
        let mut tickets = self.tickets.lock().expect("ticket mutex poisoned");
        tickets.push(RecordedTicket {
            client_id: client_id.to_string(),
            subject: subject.to_string(),
            message: message.to_string(),
            device_id: device_id.map(str::to_string),
        });
        Ok(format!("tk-{}", tickets.len()))
    }

    fn create_invoice(&self, client_id: &str, items: &[LineItem]) -> Result<String, ClientError> {
        let mut invoices = self.invoices.lock().expect("invoice mutex poisoned");
        invoices.push(RecordedInvoice {
            account: client_id.to_string(),
            items: items.to_vec(),
        });
        Ok(format!("binv-{}", invoices.len()))
    }
}

/// Recorded mutation against the network-management system.
#[derive(Debug, Clone, PartialEq)]
pub enum NetworkCall {
    Authorize {
        device_id: String,
        name: String,
        site_id: String,
    },
    Activate {
        device_id: String,
    },
    Suspend {
        device_id: String,
        reason: String,
    },
    Bandwidth {
        device_id: String,
        down_mbps: u32,
        up_mbps: u32,
    },
}

#[derive(Default, Clone)]
pub struct InMemoryNetworkApi {
    devices: Arc<Mutex<Vec<Device>>>,
    calls: Arc<Mutex<Vec<NetworkCall>>>,
}

impl InMemoryNetworkApi {
    pub fn add_device(&self, device: Device) {
        self.devices
            .lock()
            .expect("device mutex poisoned")
            .push(device);
    }

    pub fn calls(&self) -> Vec<NetworkCall> {
        self.calls.lock().expect("call mutex poisoned").clone()
    }

    pub fn mutating_calls(&self) -> usize {
        self.calls().len()
    }

    fn record(&self, call: NetworkCall) {
        self.calls.lock().expect("call mutex poisoned").push(call);
    }
}

impl NetworkApi for InMemoryNetworkApi {
    fn find_device_by_serial(&self, serial: &str) -> Result<Option<Device>, ClientError> {
        Ok(self
            .devices
            .lock()
            .expect("device mutex poisoned")
            .iter()
            .find(|d| d.matches_serial(serial))
            .cloned())
    }

    fn authorize_device(
        &self,
        device_id: &str,
        name: &str,
        site_id: &str,
    ) -> Result<(), ClientError> {
        self.record(NetworkCall::Authorize {
            device_id: device_id.to_string(),
            name: name.to_string(),
            site_id: site_id.to_string(),
        });
        Ok(())
    }

    fn activate_device(&self, device_id: &str) -> Result<(), ClientError> {
        self.record(NetworkCall::Activate {
            device_id: device_id.to_string(),
        });
        Ok(())
    }

    fn suspend_device(&self, device_id: &str, reason: &str) -> Result<(), ClientError> {
        self.record(NetworkCall::Suspend {
            device_id: device_id.to_string(),
            reason: reason.to_string(),
        });
        Ok(())
    }

    fn set_device_bandwidth(
        &self,
        device_id: &str,
        down_mbps: u32,
        up_mbps: u32,
    ) -> Result<(), ClientError> {
        self.record(NetworkCall::Bandwidth {
            device_id: device_id.to_string(),
            down_mbps,
            up_mbps,
        });
        Ok(())
    }
}
