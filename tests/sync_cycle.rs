use std::io::Cursor;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;

use fiber_sync::clients::memory::{
    ChargeCall, InMemoryBillingApi, InMemoryNetworkApi, InMemoryPropertyApi, NetworkCall,
};
use fiber_sync::clients::{Lease, MaintenanceTicket, ServiceState, Tenant};
use fiber_sync::config::{
    AppConfig, AppEnvironment, BillingConfig, KeywordConfig, PackageCatalog, SyncConfig,
    TelemetryConfig,
};
use fiber_sync::inventory::EndpointInventory;
use fiber_sync::notify::RecordingNotifier;
use fiber_sync::provision::EndpointProvisioner;
use fiber_sync::store::memory::InMemoryStateStore;
use fiber_sync::store::{LeaseLifecycle, RentStatus, ServiceStatus, StateStore};
use fiber_sync::sync::SyncEngine;

const INVENTORY_CSV: &str = "\
endpoint_name,serial_number,mac_address,property,unit,date_added,status,device_id
350-s-harper-1,UBNT001,,350 S Harper,1,2025-02-10,suspended,dev-1
350-s-harper-2,UBNT002,,350 S Harper,2,2025-02-10,suspended,dev-2
";

fn day(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 6, day).expect("valid june date")
}

fn test_config() -> AppConfig {
    AppConfig {
        environment: AppEnvironment::Test,
        telemetry: TelemetryConfig {
            log_level: "info".to_string(),
        },
        sync: SyncConfig {
            property_id: "prop-1".to_string(),
            parent_site_id: "site-1".to_string(),
            complex_client_id: "client-9".to_string(),
            grace_period_day: 5,
            polling_interval_minutes: 5,
            state_path: PathBuf::from("unused.json"),
            inventory_path: PathBuf::from("unused.csv"),
        },
        billing: BillingConfig {
            base_rate: 45.0,
            total_units: 118,
        },
        packages: PackageCatalog::standard(),
        keywords: KeywordConfig {
            upgrade: vec![
                "upgrade".to_string(),
                "1g".to_string(),
                "2g".to_string(),
                "gigabit".to_string(),
            ],
            support: vec![
                "internet".to_string(),
                "wifi".to_string(),
                "slow".to_string(),
            ],
        },
    }
}

struct Harness {
    engine: SyncEngine<InMemoryPropertyApi, InMemoryBillingApi, InMemoryNetworkApi, InMemoryStateStore>,
    property: Arc<InMemoryPropertyApi>,
    billing: Arc<InMemoryBillingApi>,
    network: Arc<InMemoryNetworkApi>,
    store: Arc<InMemoryStateStore>,
}

fn harness() -> Harness {
    let property = Arc::new(InMemoryPropertyApi::default());
    let billing = Arc::new(InMemoryBillingApi::default());
    let network = Arc::new(InMemoryNetworkApi::default());
    let store = Arc::new(InMemoryStateStore::default());
    let inventory =
        EndpointInventory::from_reader(Cursor::new(INVENTORY_CSV)).expect("valid inventory csv");
    let provisioner = EndpointProvisioner::new(
        Arc::clone(&network),
        Arc::new(Mutex::new(inventory)),
        "site-1",
    );
    let engine = SyncEngine::new(
        &test_config(),
        Arc::clone(&property),
        Arc::clone(&billing),
        provisioner,
        Arc::clone(&store),
    );
    Harness {
        engine,
        property,
        billing,
        network,
        store,
    }
}

fn lease(id: &str, unit: &str) -> Lease {
    Lease {
        id: id.to_string(),
        tenant_id: Some(format!("tenant-{id}")),
        unit_number: Some(unit.to_string()),
        unit_name: format!("Unit {unit}"),
        property_address: Some("350 S Harper".to_string()),
    }
}

fn ticket(id: &str, subject: &str, unit: Option<&str>) -> MaintenanceTicket {
    MaintenanceTicket {
        id: id.to_string(),
        subject: subject.to_string(),
        description: String::new(),
        unit_number: unit.map(str::to_string),
    }
}

fn mutation_count(h: &Harness) -> usize {
    h.property.mutating_calls() + h.billing.mutating_calls() + h.network.mutating_calls()
}

#[test]
fn new_leases_are_activated_and_the_next_cycle_is_quiet() {
    let h = harness();
    h.property.set_leases(vec![lease("l-1", "1"), lease("l-2", "2")]);

    h.engine.run_sync_cycle_on(day(10));

    let records = h.store.leases().expect("store readable");
    assert_eq!(records.len(), 2);
    for record in &records {
        assert_eq!(record.lifecycle, LeaseLifecycle::Active);
        assert_eq!(record.service, ServiceStatus::Active);
        assert_eq!(record.rent, RentStatus::Current);
        assert_eq!(record.package_code, "500M");
        assert!(record.billing_service_id.is_some());
    }
    assert!(h.network.calls().contains(&NetworkCall::Activate {
        device_id: "dev-1".to_string()
    }));
    assert!(h.network.calls().contains(&NetworkCall::Bandwidth {
        device_id: "dev-2".to_string(),
        down_mbps: 500,
        up_mbps: 500
    }));

    let events = h.store.recent_events(10).expect("events readable");
    assert_eq!(
        events.iter().filter(|e| e.kind == "unit_activated").count(),
        2
    );

    // A second cycle over the same world must make zero mutating calls.
    let before = mutation_count(&h);
    h.engine.run_sync_cycle_on(day(11));
    assert_eq!(mutation_count(&h), before);
}

#[test]
fn ended_lease_is_suspended_exactly_once() {
    let h = harness();
    h.property.set_leases(vec![lease("l-1", "1")]);
    h.engine.run_sync_cycle_on(day(10));

    h.property.set_leases(vec![]);
    h.engine.run_sync_cycle_on(day(11));

    let record = h.store.lease("l-1").expect("store readable").expect("record kept");
    assert_eq!(record.lifecycle, LeaseLifecycle::Ended);
    assert_eq!(record.service, ServiceStatus::Suspended);
    assert!(h.network.calls().contains(&NetworkCall::Suspend {
        device_id: "dev-1".to_string(),
        reason: "Lease ended".to_string()
    }));

    let before = mutation_count(&h);
    h.engine.run_sync_cycle_on(day(12));
    assert_eq!(mutation_count(&h), before, "ended lease must not be retired twice");
}

#[test]
fn tenant_turnover_retires_the_old_lease_and_activates_the_new_one() {
    let h = harness();
    h.property.set_leases(vec![lease("l-1", "1")]);
    h.engine.run_sync_cycle_on(day(10));

    h.property.set_leases(vec![lease("l-2", "1")]);
    h.engine.run_sync_cycle_on(day(11));

    let old = h.store.lease("l-1").expect("store readable").expect("old record kept");
    assert_eq!(old.lifecycle, LeaseLifecycle::Ended);
    let new = h.store.lease("l-2").expect("store readable").expect("new record");
    assert_eq!(new.lifecycle, LeaseLifecycle::Active);
    assert_eq!(new.package_code, "500M");

    // The endpoint cycled through suspension so the new tenant starts on
    // the default package, not the old tenant's.
    let calls = h.network.calls();
    let suspend_at = calls
        .iter()
        .position(|c| matches!(c, NetworkCall::Suspend { reason, .. } if reason == "Lease ended"))
        .expect("turnover suspends old service");
    let reactivate_at = calls
        .iter()
        .rposition(|c| matches!(c, NetworkCall::Activate { device_id } if device_id == "dev-1"))
        .expect("turnover reactivates endpoint");
    assert!(suspend_at < reactivate_at);
}

#[test]
fn duplicate_unit_mapping_lets_the_later_lease_win() {
    let h = harness();
    // Same physical unit claimed twice: one lease with the structured unit
    // number, one resolving to it through the free-text fallback.
    let mut fallback = lease("l-2", "1");
    fallback.unit_number = None;
    fallback.unit_name = "Apartment Unit 1".to_string();
    h.property.set_leases(vec![lease("l-1", "1"), fallback]);

    h.engine.run_sync_cycle_on(day(10));

    let old = h.store.lease("l-1").expect("store readable").expect("record kept");
    assert_eq!(old.lifecycle, LeaseLifecycle::Ended);
    let winner = h
        .store
        .active_lease_for_unit("1")
        .expect("store readable")
        .expect("unit still occupied");
    assert_eq!(winner.lease_id, "l-2");
    assert_eq!(winner.lifecycle, LeaseLifecycle::Active);
}

#[test]
fn delinquency_is_edge_triggered() {
    let h = harness();
    h.property.set_leases(vec![lease("l-1", "1")]);
    h.engine.run_sync_cycle_on(day(10));

    h.property.set_balance("l-1", 150.0);
    h.engine.run_sync_cycle_on(day(11));

    let record = h.store.lease("l-1").expect("store readable").expect("record");
    assert_eq!(record.rent, RentStatus::Delinquent);
    assert_eq!(record.service, ServiceStatus::Suspended);
    assert!(h.network.calls().iter().any(|c| matches!(
        c,
        NetworkCall::Suspend { reason, .. } if reason.contains("150.00")
    )));

    // Still delinquent: no repeat suspension.
    let before = mutation_count(&h);
    h.engine.run_sync_cycle_on(day(12));
    assert_eq!(mutation_count(&h), before);

    // Paid up: exactly one reactivation.
    h.property.set_balance("l-1", 0.0);
    h.engine.run_sync_cycle_on(day(13));
    let record = h.store.lease("l-1").expect("store readable").expect("record");
    assert_eq!(record.rent, RentStatus::Current);
    assert_eq!(record.service, ServiceStatus::Active);
    let events = h.store.recent_events(20).expect("events readable");
    assert_eq!(
        events.iter().filter(|e| e.kind == "delinquency_cleared").count(),
        1
    );
}

#[test]
fn delinquency_is_not_enforced_before_the_grace_day() {
    let h = harness();
    h.property.set_leases(vec![lease("l-1", "1")]);
    h.engine.run_sync_cycle_on(day(1));

    h.property.set_balance("l-1", 150.0);
    h.engine.run_sync_cycle_on(day(3));

    let record = h.store.lease("l-1").expect("store readable").expect("record");
    assert_eq!(record.rent, RentStatus::Current);
    assert_eq!(record.service, ServiceStatus::Active);

    // Day five is the first day enforcement runs.
    h.engine.run_sync_cycle_on(day(5));
    let record = h.store.lease("l-1").expect("store readable").expect("record");
    assert_eq!(record.rent, RentStatus::Delinquent);
}

#[test]
fn billing_suspension_drifts_back_with_a_prorated_credit() {
    let h = harness();
    h.property.set_leases(vec![lease("l-1", "1")]);
    h.engine.run_sync_cycle_on(day(10));

    let record = h.store.lease("l-1").expect("store readable").expect("record");
    let service_id = record.billing_service_id.expect("billing service created");
    h.billing.set_service_state(&service_id, ServiceState::Suspended);

    h.engine.run_sync_cycle_on(day(20));

    let record = h.store.lease("l-1").expect("store readable").expect("record");
    assert_eq!(record.service, ServiceStatus::Suspended);
    assert_eq!(record.rent, RentStatus::Current);

    // 10 of June's 30 days unused at $45/month: a $15.00 credit.
    let invoices = h.property.invoices();
    assert_eq!(invoices.len(), 1);
    assert_eq!(invoices[0].account, "tenant-l-1");
    assert_eq!(invoices[0].items.len(), 1);
    assert_eq!(invoices[0].items[0].amount, -15.0);

    // Converged: the next cycle does nothing.
    let before = mutation_count(&h);
    h.engine.run_sync_cycle_on(day(21));
    assert_eq!(mutation_count(&h), before);

    // Reinstated in billing: service comes back without touching rent state.
    h.billing.set_service_state(&service_id, ServiceState::Active);
    h.engine.run_sync_cycle_on(day(22));
    let record = h.store.lease("l-1").expect("store readable").expect("record");
    assert_eq!(record.service, ServiceStatus::Active);
    assert_eq!(h.property.invoices().len(), 1, "no second credit");
}

#[test]
fn drift_reactivation_defers_to_a_local_delinquency_hold() {
    let h = harness();
    h.property.set_leases(vec![lease("l-1", "1")]);
    h.engine.run_sync_cycle_on(day(10));

    h.property.set_balance("l-1", 80.0);
    h.engine.run_sync_cycle_on(day(11));

    // Someone flips the billing service back on while rent is still owed.
    let record = h.store.lease("l-1").expect("store readable").expect("record");
    let service_id = record.billing_service_id.expect("billing service created");
    h.billing.set_service_state(&service_id, ServiceState::Active);

    h.engine.run_sync_cycle_on(day(12));
    let record = h.store.lease("l-1").expect("store readable").expect("record");
    assert_eq!(record.service, ServiceStatus::Suspended);
    assert_eq!(record.rent, RentStatus::Delinquent);
}

#[test]
fn support_tickets_are_forwarded_once_with_the_unit_device() {
    let h = harness();
    h.property.set_leases(vec![lease("l-1", "1")]);
    h.property
        .set_tickets(vec![ticket("tk-1", "WiFi down", Some("1"))]);
    h.engine.run_sync_cycle_on(day(10));

    let forwarded = h.billing.created_tickets();
    assert_eq!(forwarded.len(), 1);
    assert_eq!(forwarded[0].client_id, "client-9");
    assert_eq!(forwarded[0].subject, "[Unit 1] WiFi down");
    assert_eq!(forwarded[0].device_id.as_deref(), Some("dev-1"));
    assert!(h
        .store
        .is_ticket_forwarded("tk-1")
        .expect("store readable"));

    // Still open upstream next cycle, but already forwarded.
    h.engine.run_sync_cycle_on(day(11));
    assert_eq!(h.billing.created_tickets().len(), 1);
}

#[test]
fn upgrade_tickets_change_package_speed_and_charges() {
    let h = harness();
    h.property.set_leases(vec![lease("l-1", "1")]);
    h.engine.run_sync_cycle_on(day(10));

    h.property
        .set_tickets(vec![ticket("tk-2", "Upgrade to 1G please", Some("1"))]);
    h.engine.run_sync_cycle_on(day(11));

    let record = h.store.lease("l-1").expect("store readable").expect("record");
    assert_eq!(record.package_code, "1G");
    assert!(record.recurring_charge_id.is_some());

    assert!(h.network.calls().contains(&NetworkCall::Bandwidth {
        device_id: "dev-1".to_string(),
        down_mbps: 1000,
        up_mbps: 1000
    }));
    assert!(h.property.charge_calls().iter().any(|c| matches!(
        c,
        ChargeCall::Created { lease_id, amount, .. }
            if lease_id == "l-1" && *amount == 10.0
    )));
    assert!(h
        .store
        .is_ticket_forwarded("tk-2")
        .expect("store readable"));

    // The upgrade is applied once, not every cycle.
    let charges_before = h.property.charge_calls().len();
    h.engine.run_sync_cycle_on(day(12));
    assert_eq!(h.property.charge_calls().len(), charges_before);
}

#[test]
fn unmatched_tickets_are_left_for_reclassification() {
    let h = harness();
    h.property.set_leases(vec![lease("l-1", "1")]);
    h.property
        .set_tickets(vec![ticket("tk-3", "Garbage disposal broken", Some("1"))]);

    h.engine.run_sync_cycle_on(day(10));
    h.engine.run_sync_cycle_on(day(11));

    assert!(h.billing.created_tickets().is_empty());
    assert!(!h
        .store
        .is_ticket_forwarded("tk-3")
        .expect("store readable"));
}

#[test]
fn one_failing_lease_does_not_block_the_rest_of_the_phase() {
    let h = harness();
    h.property.set_leases(vec![lease("l-1", "1"), lease("l-2", "2")]);
    h.engine.run_sync_cycle_on(day(10));

    h.property.fail_balance("l-1");
    h.property.set_balance("l-2", 200.0);
    h.engine.run_sync_cycle_on(day(11));

    let untouched = h.store.lease("l-1").expect("store readable").expect("record");
    assert_eq!(untouched.service, ServiceStatus::Active);
    let suspended = h.store.lease("l-2").expect("store readable").expect("record");
    assert_eq!(suspended.service, ServiceStatus::Suspended);
    assert_eq!(suspended.rent, RentStatus::Delinquent);
}

#[test]
fn lease_without_inventory_is_skipped_and_retried() {
    let h = harness();
    h.property.set_leases(vec![lease("l-1", "1"), lease("l-9", "99")]);
    h.engine.run_sync_cycle_on(day(10));

    assert!(h
        .store
        .lease("l-9")
        .expect("store readable")
        .is_none(), "unprovisionable lease is not tracked");
    assert!(h
        .store
        .active_lease_for_unit("1")
        .expect("store readable")
        .is_some());

    // Still untracked next cycle; it will land once inventory catches up.
    h.engine.run_sync_cycle_on(day(11));
    assert!(h.store.lease("l-9").expect("store readable").is_none());
}

#[test]
fn welcome_note_goes_to_the_first_tenant_with_an_email() {
    let property = Arc::new(InMemoryPropertyApi::default());
    let billing = Arc::new(InMemoryBillingApi::default());
    let network = Arc::new(InMemoryNetworkApi::default());
    let store = Arc::new(InMemoryStateStore::default());
    let inventory =
        EndpointInventory::from_reader(Cursor::new(INVENTORY_CSV)).expect("valid inventory csv");
    let provisioner = EndpointProvisioner::new(
        Arc::clone(&network),
        Arc::new(Mutex::new(inventory)),
        "site-1",
    );
    let notifier = RecordingNotifier::default();
    let engine = SyncEngine::new(
        &test_config(),
        Arc::clone(&property),
        billing,
        provisioner,
        store,
    )
    .with_notifier(Arc::new(notifier.clone()));

    property.set_leases(vec![lease("l-1", "1")]);
    property.set_tenants(
        "l-1",
        vec![
            Tenant {
                id: "t-0".to_string(),
                name: "No Email".to_string(),
                email: None,
            },
            Tenant {
                id: "t-1".to_string(),
                name: "Jordan Diaz".to_string(),
                email: Some("jordan@example.com".to_string()),
            },
        ],
    );

    engine.run_sync_cycle_on(day(10));

    let notes = notifier.notes();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].email, "jordan@example.com");
    assert_eq!(notes[0].unit, "1");
    assert_eq!(notes[0].down_mbps, 500);

    // No repeat welcome on the second cycle.
    engine.run_sync_cycle_on(day(11));
    assert_eq!(notifier.notes().len(), 1);
}
