use chrono::{Datelike, Local, NaiveDate};
use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use fiber_sync::billing::{build_snapshot, create_monthly_invoice, invoice_items, render_report};
use fiber_sync::clients::memory::{InMemoryBillingApi, InMemoryNetworkApi, InMemoryPropertyApi};
use fiber_sync::clients::{Device, Lease, MaintenanceTicket, Tenant};
use fiber_sync::config::AppConfig;
use fiber_sync::error::AppError;
use fiber_sync::inventory::EndpointInventory;
use fiber_sync::provision::EndpointProvisioner;
use fiber_sync::store::json::JsonStateStore;
use fiber_sync::store::{LeaseLifecycle, StateStore};
use fiber_sync::sync::SyncEngine;
use fiber_sync::telemetry;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(
    name = "fiber-sync",
    about = "Reconcile tenant occupancy with fiber provisioning and billing",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one reconciliation cycle (default command)
    SyncOnce(SyncArgs),
    /// Run reconciliation cycles on the configured polling interval
    SyncLoop(SyncArgs),
    /// Render the monthly billing report for the complex
    BillingReport(BillingArgs),
    /// Show tracked leases, inventory, and recent sync activity
    Status,
    /// Register drop-shipped devices that have serials but no NMS record
    Provision,
    /// Manually activate an inventoried endpoint
    Activate(ActivateArgs),
    /// Manually suspend an inventoried endpoint
    Suspend(SuspendArgs),
}

#[derive(Args, Debug, Default)]
struct SyncArgs {
    /// Evaluation date for the cycle (defaults to today)
    #[arg(long, value_parser = parse_date)]
    today: Option<NaiveDate>,
    /// JSON file of collaborator payloads to hydrate the demo harness
    #[arg(long)]
    fixtures: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct BillingArgs {
    /// Billing month 1-12 (defaults to the current month)
    #[arg(long)]
    month: Option<u32>,
    /// Billing year (defaults to the current year)
    #[arg(long)]
    year: Option<i32>,
    /// Also post the invoice for the complex account to the billing platform
    #[arg(long)]
    create_invoice: bool,
}

#[derive(Args, Debug)]
struct ActivateArgs {
    /// Endpoint name, e.g. 350-s-harper-12
    endpoint: String,
    /// Package code to apply (defaults to the standard tier)
    #[arg(long)]
    package: Option<String>,
}

#[derive(Args, Debug)]
struct SuspendArgs {
    /// Endpoint name, e.g. 350-s-harper-12
    endpoint: String,
    #[arg(long, default_value = "Manual suspension")]
    reason: String,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("application error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    // Only startup failures surface as a non-zero exit; operational
    // failures are logged and left for the next cycle or invocation.
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;

    let command = cli
        .command
        .unwrap_or_else(|| Command::SyncOnce(SyncArgs::default()));
    let outcome = match command {
        Command::SyncOnce(args) => run_sync(&config, args, false),
        Command::SyncLoop(args) => run_sync(&config, args, true),
        Command::BillingReport(args) => run_billing(&config, args),
        Command::Status => run_status(&config),
        Command::Provision => run_provision(&config),
        Command::Activate(args) => run_activate(&config, args),
        Command::Suspend(args) => run_suspend(&config, args),
    };
    if let Err(err) = outcome {
        error!(error = %err, "command failed");
    }
    Ok(())
}

fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}

/// Collaborator payloads for the demo harness, in each system's wire shape.
#[derive(Debug, Default, Deserialize)]
struct FixtureFile {
    #[serde(default)]
    leases: Vec<Value>,
    #[serde(default)]
    balances: HashMap<String, f64>,
    #[serde(default)]
    tenants: HashMap<String, Vec<TenantFixture>>,
    #[serde(default)]
    tickets: Vec<Value>,
    #[serde(default)]
    devices: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct TenantFixture {
    id: String,
    name: String,
    #[serde(default)]
    email: Option<String>,
}

fn load_fixtures(
    path: &PathBuf,
    property: &InMemoryPropertyApi,
    network: &InMemoryNetworkApi,
) -> Result<(), AppError> {
    let raw = fs::read_to_string(path)?;
    let fixture: FixtureFile = serde_json::from_str(&raw)
        .map_err(|err| AppError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, err)))?;

    let mut leases = Vec::new();
    for payload in &fixture.leases {
        leases.push(Lease::from_payload(payload)?);
    }
    property.set_leases(leases);

    for (lease_id, balance) in &fixture.balances {
        property.set_balance(lease_id, *balance);
    }
    for (lease_id, tenants) in fixture.tenants {
        let tenants = tenants
            .into_iter()
            .map(|t| Tenant {
                id: t.id,
                name: t.name,
                email: t.email,
            })
            .collect();
        property.set_tenants(&lease_id, tenants);
    }

    let mut tickets = Vec::new();
    for payload in &fixture.tickets {
        tickets.push(MaintenanceTicket::from_payload(payload)?);
    }
    property.set_tickets(tickets);

    for payload in &fixture.devices {
        network.add_device(Device::from_payload(payload)?);
    }

    info!(path = %path.display(), "loaded collaborator fixtures");
    Ok(())
}

fn open_store(config: &AppConfig) -> Result<Arc<JsonStateStore>, AppError> {
    Ok(Arc::new(JsonStateStore::open(&config.sync.state_path)?))
}

fn open_inventory(config: &AppConfig) -> Result<Arc<Mutex<EndpointInventory>>, AppError> {
    Ok(Arc::new(Mutex::new(EndpointInventory::load(
        &config.sync.inventory_path,
    )?)))
}

fn build_provisioner(
    config: &AppConfig,
    network: Arc<InMemoryNetworkApi>,
) -> Result<EndpointProvisioner<InMemoryNetworkApi>, AppError> {
    Ok(EndpointProvisioner::new(
        network,
        open_inventory(config)?,
        config.sync.parent_site_id.clone(),
    ))
}

fn run_sync(config: &AppConfig, args: SyncArgs, watch: bool) -> Result<(), AppError> {
    let property = Arc::new(InMemoryPropertyApi::default());
    let billing = Arc::new(InMemoryBillingApi::default());
    let network = Arc::new(InMemoryNetworkApi::default());

    if let Some(path) = &args.fixtures {
        load_fixtures(path, &property, &network)?;
    }

    let provisioner = build_provisioner(config, Arc::clone(&network))?;
    let store = open_store(config)?;
    let engine = SyncEngine::new(config, property, billing, provisioner, store);

    if watch {
        let interval = Duration::from_secs(config.sync.polling_interval_minutes * 60);
        info!(
            minutes = config.sync.polling_interval_minutes,
            "watching on polling interval"
        );
        loop {
            engine.run_sync_cycle();
            thread::sleep(interval);
        }
    }

    match args.today {
        Some(today) => engine.run_sync_cycle_on(today),
        None => engine.run_sync_cycle(),
    }
    Ok(())
}

fn run_billing(config: &AppConfig, args: BillingArgs) -> Result<(), AppError> {
    let today = Local::now().date_naive();
    let month = args.month.unwrap_or_else(|| today.month());
    let year = args.year.unwrap_or_else(|| today.year());

    let store = open_store(config)?;
    let snapshot = build_snapshot(
        store.as_ref(),
        &config.billing,
        &config.packages,
        &config.sync.property_id,
        month,
        year,
    )?;
    store.record_billing_snapshot(snapshot.clone())?;
    println!("{}", render_report(&snapshot));

    if args.create_invoice {
        let billing = InMemoryBillingApi::default();
        let invoice_id = create_monthly_invoice(
            &billing,
            &config.sync.complex_client_id,
            &snapshot,
            &config.packages,
        )?;
        println!(
            "Created invoice {invoice_id} for client {}:",
            config.sync.complex_client_id
        );
        for item in invoice_items(&snapshot, &config.packages) {
            println!(
                "  {} x{} @ ${:.2}",
                item.description, item.quantity, item.amount
            );
        }
    }
    Ok(())
}

fn run_status(config: &AppConfig) -> Result<(), AppError> {
    let store = open_store(config)?;
    let leases = store.leases()?;
    let active = leases
        .iter()
        .filter(|l| l.lifecycle == LeaseLifecycle::Active)
        .count();
    println!(
        "Leases: {active} active, {} total tracked",
        leases.len()
    );

    let inventory = open_inventory(config)?;
    let inventory = inventory.lock().expect("inventory mutex poisoned");
    for entry in inventory.summary() {
        println!(
            "  {:<24} unit {:<4} {}{}",
            entry.endpoint_name,
            entry.unit,
            entry.status,
            if entry.provisioned { "" } else { " (unregistered)" }
        );
    }

    println!("Recent activity:");
    for event in store.recent_events(10)? {
        println!("  {} {:<20} {}", event.at.format("%Y-%m-%d %H:%M"), event.kind, event.detail);
    }
    Ok(())
}

fn run_provision(config: &AppConfig) -> Result<(), AppError> {
    let network = Arc::new(InMemoryNetworkApi::default());
    let provisioner = build_provisioner(config, network)?;
    let sweep = provisioner.provision_all_pending();
    println!(
        "Provisioned {} endpoint(s), {} failed",
        sweep.provisioned, sweep.failed
    );
    Ok(())
}

fn run_activate(config: &AppConfig, args: ActivateArgs) -> Result<(), AppError> {
    let pkg = match &args.package {
        Some(code) => match config.packages.by_code(code) {
            Some(pkg) => pkg,
            None => {
                error!(package = %code, "unknown package code");
                return Ok(());
            }
        },
        None => config.packages.default_package(),
    };
    let network = Arc::new(InMemoryNetworkApi::default());
    let provisioner = build_provisioner(config, network)?;
    provisioner.activate_by_name(&args.endpoint, pkg.down_mbps, pkg.up_mbps)?;
    println!("Activated {} on {}", args.endpoint, pkg.name);
    Ok(())
}

fn run_suspend(config: &AppConfig, args: SuspendArgs) -> Result<(), AppError> {
    let network = Arc::new(InMemoryNetworkApi::default());
    let provisioner = build_provisioner(config, network)?;
    provisioner.suspend_by_name(&args.endpoint, &args.reason)?;
    println!("Suspended {}: {}", args.endpoint, args.reason);
    Ok(())
}
