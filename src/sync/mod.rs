//! The reconciliation engine. One cycle runs four phases in a fixed order:
//! lease lifecycle, delinquency enforcement, billing drift, ticket
//! forwarding. Later phases assume the earlier ones have already run. A
//! phase failure never stops its siblings, and a single lease or ticket
//! failure never stops the rest of its phase.

pub mod tickets;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{Datelike, Local, NaiveDate, Utc};
use tracing::{debug, error, info, warn};

use crate::billing::{compute_prorated_credit, days_in_month};
use crate::clients::{
    BillingApi, ClientError, Lease, LineItem, MaintenanceTicket, NetworkApi,
    PropertyManagementApi, ServicePatch, ServiceState,
};
use crate::config::{AppConfig, BillingConfig, KeywordConfig, PackageCatalog, ServicePackage, SyncConfig};
use crate::inventory::endpoint_name;
use crate::notify::{Notifier, WelcomeNote};
use crate::provision::{EndpointProvisioner, ProvisionError};
use crate::store::{
    LeaseLifecycle, LeaseRecord, RentStatus, ServiceStatus, StateStore, StoreError,
    TicketClassification, TicketForwardRecord,
};
use tickets::TicketRoute;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Provision(#[from] ProvisionError),
}

/// Orchestrates one full reconciliation pass. Invocations must be
/// serialized by the caller; the engine itself never overlaps cycles.
pub struct SyncEngine<P, B, N, S> {
    sync: SyncConfig,
    billing_terms: BillingConfig,
    packages: PackageCatalog,
    keywords: KeywordConfig,
    property: Arc<P>,
    billing: Arc<B>,
    provisioner: EndpointProvisioner<N>,
    store: Arc<S>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl<P, B, N, S> SyncEngine<P, B, N, S>
where
    P: PropertyManagementApi,
    B: BillingApi,
    N: NetworkApi,
    S: StateStore,
{
    pub fn new(
        config: &AppConfig,
        property: Arc<P>,
        billing: Arc<B>,
        provisioner: EndpointProvisioner<N>,
        store: Arc<S>,
    ) -> Self {
        Self {
            sync: config.sync.clone(),
            billing_terms: config.billing.clone(),
            packages: config.packages.clone(),
            keywords: config.keywords.clone(),
            property,
            billing,
            provisioner,
            store,
            notifier: None,
        }
    }

    /// Wire the optional notification capability. Checked once here; every
    /// call site treats absence as a no-op.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn run_sync_cycle(&self) {
        self.run_sync_cycle_on(Local::now().date_naive());
    }

    /// Run one cycle as of the given date. Split out so the delinquency
    /// grace gate and proration are testable.
    pub fn run_sync_cycle_on(&self, today: NaiveDate) {
        info!("starting sync cycle");

        if let Err(err) = self.reconcile_leases(today) {
            self.phase_failed("lease_lifecycle", &err);
        }
        if let Err(err) = self.enforce_delinquency(today) {
            self.phase_failed("delinquency", &err);
        }
        if let Err(err) = self.reconcile_billing_drift(today) {
            self.phase_failed("billing_drift", &err);
        }
        if let Err(err) = self.forward_tickets() {
            self.phase_failed("tickets", &err);
        }

        info!("sync cycle complete");
    }

    fn phase_failed(&self, phase: &str, err: &SyncError) {
        error!(phase, error = %err, "sync phase failed");
        if let Err(log_err) = self
            .store
            .log_event("sync_error", &format!("{phase}: {err}"))
        {
            error!(error = %log_err, "could not record sync error");
        }
    }

    // ------------------------------------------------------------------
    // Phase 1: lease lifecycle
    // ------------------------------------------------------------------

    fn reconcile_leases(&self, today: NaiveDate) -> Result<(), SyncError> {
        info!("reconciling leases");
        let leases = self.property.active_leases(&self.sync.property_id)?;

        let mut active_ids: HashSet<String> = HashSet::new();
        let mut claimed_endpoints: HashMap<String, String> = HashMap::new();

        for lease in &leases {
            let Some(unit) = lease.unit_identifier() else {
                warn!(lease = %lease.id, "could not resolve a unit number; skipping lease");
                continue;
            };
            active_ids.insert(lease.id.clone());

            let Some(property) = lease.property_address.clone() else {
                warn!(lease = %lease.id, unit = %unit, "lease has no property address; skipping");
                continue;
            };

            // Duplicate mapping is a data-quality problem: the most recently
            // processed lease wins, but it must never pass silently.
            let name = endpoint_name(&property, &unit);
            if let Some(previous) = claimed_endpoints.insert(name.clone(), lease.id.clone()) {
                warn!(
                    endpoint = %name,
                    previous_lease = %previous,
                    lease = %lease.id,
                    "duplicate endpoint mapping; most recently processed lease wins"
                );
            }

            match self.store.active_lease_for_unit(&unit)? {
                Some(existing) if existing.lease_id == lease.id => {}
                Some(existing) => {
                    info!(unit = %unit, "new tenant in unit");
                    if let Err(err) = self.activate_lease(lease, &unit, &property, Some(existing), today) {
                        warn!(lease = %lease.id, unit = %unit, error = %err, "activation failed; will retry next cycle");
                    }
                }
                None => {
                    info!(unit = %unit, "new lease detected");
                    if let Err(err) = self.activate_lease(lease, &unit, &property, None, today) {
                        warn!(lease = %lease.id, unit = %unit, error = %err, "activation failed; will retry next cycle");
                    }
                }
            }
        }

        // Units no longer in the active set: retire exactly once.
        for record in self.store.leases()? {
            if record.lifecycle == LeaseLifecycle::Active && !active_ids.contains(&record.lease_id)
            {
                info!(unit = %record.unit, lease = %record.lease_id, "lease ended");
                if let Err(err) = self.retire_lease(&record, true) {
                    warn!(lease = %record.lease_id, error = %err, "retirement failed; will retry next cycle");
                }
            }
        }

        Ok(())
    }

    fn activate_lease(
        &self,
        lease: &Lease,
        unit: &str,
        property: &str,
        prior: Option<LeaseRecord>,
        today: NaiveDate,
    ) -> Result<(), SyncError> {
        // Tenant turnover: the old lease is retired first so the endpoint
        // comes back up with the default package, not the old tenant's.
        if let Some(previous) = prior {
            self.retire_lease(&previous, true)?;
        }

        let pkg = self.packages.default_package();
        self.provisioner
            .activate(property, unit, pkg.down_mbps, pkg.up_mbps)?;

        let billing_service_id = match self.billing.create_service(
            &self.sync.complex_client_id,
            pkg.code,
            today,
        ) {
            Ok(id) => Some(id),
            Err(err) => {
                warn!(lease = %lease.id, error = %err, "billing service registration failed");
                None
            }
        };

        self.store.upsert_lease(LeaseRecord {
            lease_id: lease.id.clone(),
            tenant_id: lease.tenant_id.clone(),
            unit: unit.to_string(),
            property: property.to_string(),
            package_code: pkg.code.to_string(),
            billing_client_id: billing_service_id
                .is_some()
                .then(|| self.sync.complex_client_id.clone()),
            billing_service_id,
            recurring_charge_id: None,
            lifecycle: LeaseLifecycle::Active,
            service: ServiceStatus::Active,
            rent: RentStatus::Current,
            synced_at: Utc::now(),
        })?;
        self.store
            .log_event("unit_activated", &format!("Unit {unit} (lease {})", lease.id))?;

        self.send_welcome(lease, unit, pkg);
        Ok(())
    }

    fn retire_lease(&self, record: &LeaseRecord, suspend_endpoint: bool) -> Result<(), SyncError> {
        if suspend_endpoint {
            self.provisioner
                .suspend(&record.property, &record.unit, "Lease ended")?;
        }
        if let Some(charge_id) = &record.recurring_charge_id {
            self.property.delete_recurring_charge(charge_id)?;
        }
        if let Some(service_id) = &record.billing_service_id {
            let patch = ServicePatch {
                plan_id: None,
                state: Some(ServiceState::Ended),
            };
            if let Err(err) = self.billing.update_service(service_id, &patch) {
                warn!(lease = %record.lease_id, error = %err, "billing service retirement failed");
            }
        }
        self.store.mark_lease_ended(&record.lease_id)?;
        self.store.log_event(
            "lease_ended",
            &format!("Unit {}: lease {}", record.unit, record.lease_id),
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Phase 2: delinquency enforcement
    // ------------------------------------------------------------------

    fn enforce_delinquency(&self, today: NaiveDate) -> Result<(), SyncError> {
        // Hard gate, not a threshold: nothing is even queried before the
        // grace day so the normal billing cycle can't trip suspensions.
        if today.day() < self.sync.grace_period_day {
            info!(
                grace_day = self.sync.grace_period_day,
                "before grace period; skipping delinquency check"
            );
            return Ok(());
        }

        info!("checking rent delinquency");
        for record in self.store.leases()? {
            if record.lifecycle != LeaseLifecycle::Active {
                continue;
            }
            if let Err(err) = self.check_lease_balance(&record) {
                warn!(lease = %record.lease_id, unit = %record.unit, error = %err, "delinquency check failed");
            }
        }
        Ok(())
    }

    fn check_lease_balance(&self, record: &LeaseRecord) -> Result<(), SyncError> {
        let balance = self.property.lease_balance(&record.lease_id)?;

        // Edge-triggered on the delinquent/current boundary: a lease already
        // in the right state causes no remote traffic.
        if balance > 0.0 {
            if record.rent != RentStatus::Delinquent {
                info!(unit = %record.unit, balance, "unit delinquent");
                self.provisioner.suspend(
                    &record.property,
                    &record.unit,
                    &format!("Rent delinquent: ${balance:.2}"),
                )?;
                self.mirror_billing_state(record, ServiceState::Suspended);
                self.store
                    .set_rent_status(&record.lease_id, RentStatus::Delinquent)?;
                self.store
                    .set_service_status(&record.lease_id, ServiceStatus::Suspended)?;
                self.store.log_event(
                    "delinquency_suspend",
                    &format!("Unit {}: ${balance:.2} owed", record.unit),
                )?;
            }
        } else if record.rent == RentStatus::Delinquent {
            info!(unit = %record.unit, "unit paid up; reactivating");
            let pkg = self.package_for(record);
            self.provisioner
                .activate(&record.property, &record.unit, pkg.down_mbps, pkg.up_mbps)?;
            self.mirror_billing_state(record, ServiceState::Active);
            self.store
                .set_rent_status(&record.lease_id, RentStatus::Current)?;
            self.store
                .set_service_status(&record.lease_id, ServiceStatus::Active)?;
            self.store.log_event(
                "delinquency_cleared",
                &format!("Unit {} paid - reactivated", record.unit),
            )?;
        }
        Ok(())
    }

    /// Mirror a local suspend/restore decision into the billing platform so
    /// the drift check doesn't read our own enforcement as drift.
    fn mirror_billing_state(&self, record: &LeaseRecord, state: ServiceState) {
        if let Some(service_id) = &record.billing_service_id {
            let patch = ServicePatch {
                plan_id: None,
                state: Some(state),
            };
            if let Err(err) = self.billing.update_service(service_id, &patch) {
                warn!(service = %service_id, error = %err, "billing service state update failed");
            }
        }
    }

    // ------------------------------------------------------------------
    // Phase 3: billing drift
    // ------------------------------------------------------------------

    fn reconcile_billing_drift(&self, today: NaiveDate) -> Result<(), SyncError> {
        info!("reconciling billing drift");
        for record in self.store.leases()? {
            if record.lifecycle != LeaseLifecycle::Active {
                continue;
            }
            let (Some(client_id), Some(service_id)) =
                (record.billing_client_id.clone(), record.billing_service_id.clone())
            else {
                continue;
            };
            if let Err(err) = self.check_drift(&record, &client_id, &service_id, today) {
                warn!(lease = %record.lease_id, unit = %record.unit, error = %err, "drift check failed");
            }
        }
        Ok(())
    }

    fn check_drift(
        &self,
        record: &LeaseRecord,
        client_id: &str,
        service_id: &str,
        today: NaiveDate,
    ) -> Result<(), SyncError> {
        let services = self.billing.services(client_id)?;
        let Some(service) = services.iter().find(|s| s.id == service_id) else {
            warn!(lease = %record.lease_id, service = %service_id, "billing service missing");
            return Ok(());
        };

        match (service.state, record.service) {
            // The billing platform is authoritative for suspensions enacted
            // there: suspend, credit the unused days, then record it.
            (ServiceState::Suspended, ServiceStatus::Active) => {
                info!(unit = %record.unit, "billing reports suspended; following");
                self.provisioner.suspend(
                    &record.property,
                    &record.unit,
                    "Suspended in billing platform",
                )?;
                self.apply_prorated_credit(record, today);
                self.store
                    .set_service_status(&record.lease_id, ServiceStatus::Suspended)?;
                self.store.log_event(
                    "drift_suspend",
                    &format!("Unit {}: billing reports suspended", record.unit),
                )?;
            }
            (ServiceState::Active, ServiceStatus::Suspended) => {
                if record.rent == RentStatus::Delinquent {
                    // Our own delinquency hold; billing has no say over it.
                    debug!(unit = %record.unit, "suspended locally for delinquency; not reactivating");
                    return Ok(());
                }
                info!(unit = %record.unit, "billing reports active; reactivating");
                let pkg = self.package_for(record);
                self.provisioner
                    .activate(&record.property, &record.unit, pkg.down_mbps, pkg.up_mbps)?;
                self.store
                    .set_service_status(&record.lease_id, ServiceStatus::Active)?;
                self.store.log_event(
                    "drift_reactivate",
                    &format!("Unit {}: billing reports active", record.unit),
                )?;
            }
            _ => {}
        }
        Ok(())
    }

    fn apply_prorated_credit(&self, record: &LeaseRecord, today: NaiveDate) {
        let monthly_rate = self.monthly_rate(record);
        let credit = compute_prorated_credit(monthly_rate, today.day(), days_in_month(today));
        if credit <= 0.0 {
            return;
        }
        let Some(tenant_id) = &record.tenant_id else {
            warn!(lease = %record.lease_id, "no tenant on record; prorated credit not applied");
            return;
        };
        let item = LineItem {
            description: format!("Service credit - suspended {}", today.format("%Y-%m-%d")),
            quantity: 1,
            amount: -credit,
        };
        if let Err(err) = self.property.create_invoice(tenant_id, &[item]) {
            warn!(lease = %record.lease_id, error = %err, "prorated credit invoice failed");
        }
    }

    // ------------------------------------------------------------------
    // Phase 4: tickets
    // ------------------------------------------------------------------

    fn forward_tickets(&self) -> Result<(), SyncError> {
        info!("checking maintenance tickets");
        let open = self
            .property
            .maintenance_tickets(&self.sync.property_id, "open")?;

        for ticket in &open {
            if let Err(err) = self.process_ticket(ticket) {
                warn!(ticket = %ticket.id, error = %err, "ticket processing failed; will retry next cycle");
            }
        }
        Ok(())
    }

    fn process_ticket(&self, ticket: &MaintenanceTicket) -> Result<(), SyncError> {
        if self.store.is_ticket_forwarded(&ticket.id)? {
            return Ok(());
        }

        let text = format!("{} {}", ticket.subject, ticket.description);
        match tickets::classify(&text, &self.keywords, &self.packages) {
            TicketRoute::Upgrade(pkg) => self.handle_upgrade(ticket, pkg),
            TicketRoute::Support => self.forward_support(ticket),
            // Not marked synced: re-evaluated every cycle until classified
            // or the keyword lists are extended.
            TicketRoute::Unmatched => {
                debug!(ticket = %ticket.id, "ticket unclassified; skipping");
                Ok(())
            }
        }
    }

    fn handle_upgrade(
        &self,
        ticket: &MaintenanceTicket,
        pkg: &ServicePackage,
    ) -> Result<(), SyncError> {
        let Some(unit) = ticket.unit_hint() else {
            warn!(ticket = %ticket.id, "upgrade ticket without a resolvable unit; skipping");
            return Ok(());
        };
        let Some(record) = self.store.active_lease_for_unit(&unit)? else {
            warn!(ticket = %ticket.id, unit = %unit, "no active lease for upgrade ticket; skipping");
            return Ok(());
        };

        info!(unit = %unit, package = pkg.code, "applying package upgrade");
        self.provisioner
            .set_speed(&record.property, &record.unit, pkg.down_mbps, pkg.up_mbps)?;

        let description = format!("{} Internet Upgrade", pkg.name);
        let charge_id = match &record.recurring_charge_id {
            Some(id) => {
                self.property
                    .update_recurring_charge(id, pkg.addon_price, &description)?;
                id.clone()
            }
            None => {
                self.property
                    .create_recurring_charge(&record.lease_id, &description, pkg.addon_price)?
            }
        };

        if let Some(service_id) = &record.billing_service_id {
            let patch = ServicePatch {
                plan_id: Some(pkg.code.to_string()),
                state: None,
            };
            if let Err(err) = self.billing.update_service(service_id, &patch) {
                warn!(service = %service_id, error = %err, "billing plan update failed");
            }
        }

        self.store.set_package(&record.lease_id, pkg.code)?;
        self.store
            .set_recurring_charge_id(&record.lease_id, Some(charge_id))?;
        self.store.record_ticket_forward(TicketForwardRecord {
            ticket_id: ticket.id.clone(),
            forwarded_id: None,
            classification: TicketClassification::Upgrade,
            synced_at: Utc::now(),
        })?;
        self.store.log_event(
            "ticket_upgrade",
            &format!("Unit {unit} upgraded to {}", pkg.name),
        )?;
        Ok(())
    }

    fn forward_support(&self, ticket: &MaintenanceTicket) -> Result<(), SyncError> {
        let unit = ticket.unit_hint();
        // The device link is best-effort: the ticket still goes out without
        // one, but a failed lookup is worth a log line.
        let device_id = unit.as_deref().and_then(|u| {
            let record = match self.store.active_lease_for_unit(u) {
                Ok(record) => record,
                Err(err) => {
                    warn!(ticket = %ticket.id, unit = %u, error = %err, "device lookup for ticket failed");
                    None
                }
            };
            record.and_then(|record| self.provisioner.device_for_unit(&record.property, u))
        });

        let unit_label = unit.as_deref().unwrap_or("Unknown");
        let subject = if ticket.subject.is_empty() {
            format!("[Unit {unit_label}] Internet Issue")
        } else {
            format!("[Unit {unit_label}] {}", ticket.subject)
        };
        let message = format!(
            "Forwarded from property management (ticket #{id})\n\n\
Unit: {unit_label}\nSubject: {subject}\n\nDescription:\n{description}\n\n\
---\nReply here or contact the tenant directly.\n",
            id = ticket.id,
            subject = ticket.subject,
            description = if ticket.description.is_empty() {
                "No description"
            } else {
                &ticket.description
            },
        );

        info!(ticket = %ticket.id, unit = %unit_label, "forwarding support ticket");
        let forwarded_id = self.billing.create_ticket(
            &self.sync.complex_client_id,
            &subject,
            &message,
            device_id.as_deref(),
        )?;

        self.store.record_ticket_forward(TicketForwardRecord {
            ticket_id: ticket.id.clone(),
            forwarded_id: Some(forwarded_id),
            classification: TicketClassification::Support,
            synced_at: Utc::now(),
        })?;
        self.store.log_event(
            "ticket_forwarded",
            &format!("#{}: {}", ticket.id, ticket.subject),
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn package_for(&self, record: &LeaseRecord) -> &ServicePackage {
        self.packages
            .by_code(&record.package_code)
            .unwrap_or_else(|| self.packages.default_package())
    }

    /// What the unit's service costs per month: base rate plus the add-on.
    fn monthly_rate(&self, record: &LeaseRecord) -> f64 {
        self.billing_terms.base_rate + self.package_for(record).addon_price
    }

    fn send_welcome(&self, lease: &Lease, unit: &str, pkg: &ServicePackage) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        let tenants = match self.property.tenants_by_lease(&lease.id) {
            Ok(tenants) => tenants,
            Err(err) => {
                warn!(lease = %lease.id, error = %err, "tenant lookup for welcome note failed");
                return;
            }
        };
        let Some(tenant) = tenants.into_iter().find(|t| t.email.is_some()) else {
            debug!(lease = %lease.id, "no tenant email on file; skipping welcome note");
            return;
        };
        let note = WelcomeNote {
            tenant_name: tenant.name,
            email: tenant.email.unwrap_or_default(),
            unit: unit.to_string(),
            package_name: pkg.name.to_string(),
            down_mbps: pkg.down_mbps,
        };
        if let Err(err) = notifier.welcome(&note) {
            warn!(lease = %lease.id, error = %err, "welcome note failed");
        }
    }
}
