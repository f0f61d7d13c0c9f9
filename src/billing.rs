//! Complex-level billing: pure charge arithmetic plus the monthly snapshot
//! assembled from the current lease set. Snapshots are derived data; they are
//! appended to history for audit and never mutated.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::clients::{BillingApi, ClientError, LineItem};
use crate::config::{BillingConfig, PackageCatalog};
use crate::store::{LeaseLifecycle, StateStore, StoreError};

/// Credits below this are not worth the administrative overhead.
const CREDIT_FLOOR: f64 = 1.0;

/// Computed monthly charges for the complex.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MonthlyBill {
    pub base_total: f64,
    pub upgrade_total: f64,
    pub grand_total: f64,
}

/// Base charge per occupied unit plus configured add-ons per upgraded
/// package. Unknown package codes contribute nothing.
pub fn compute_monthly_bill(
    occupied_units: u32,
    base_rate: f64,
    upgrade_counts: &BTreeMap<String, u32>,
    catalog: &PackageCatalog,
) -> MonthlyBill {
    let base_total = round_cents(f64::from(occupied_units) * base_rate);
    let upgrade_total = round_cents(
        upgrade_counts
            .iter()
            .filter_map(|(code, count)| {
                catalog
                    .by_code(code)
                    .map(|pkg| pkg.addon_price * f64::from(*count))
            })
            .sum(),
    );
    MonthlyBill {
        base_total,
        upgrade_total,
        grand_total: round_cents(base_total + upgrade_total),
    }
}

/// Partial-month credit for a mid-cycle suspension. Zero when the month is
/// already over or the credit falls under the floor; never negative.
pub fn compute_prorated_credit(
    monthly_rate: f64,
    suspension_day_of_month: u32,
    days_in_month: u32,
) -> f64 {
    if days_in_month == 0 || suspension_day_of_month >= days_in_month {
        return 0.0;
    }
    let daily_rate = monthly_rate / f64::from(days_in_month);
    let days_remaining = days_in_month - suspension_day_of_month;
    let credit = round_cents(daily_rate * f64::from(days_remaining));
    if credit < CREDIT_FLOOR {
        0.0
    } else {
        credit
    }
}

pub fn days_in_month(date: NaiveDate) -> u32 {
    let (next_year, next_month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(30)
}

fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

/// One month's derived billing picture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingSnapshot {
    pub month: u32,
    pub year: i32,
    pub property: String,
    pub occupied_units: u32,
    pub total_units: u32,
    pub vacancy_count: u32,
    pub base_rate: f64,
    pub upgrade_counts: BTreeMap<String, u32>,
    pub bill: MonthlyBill,
    pub generated_at: DateTime<Utc>,
}

/// Build the snapshot for a month from the current lease records.
pub fn build_snapshot<S: StateStore + ?Sized>(
    store: &S,
    billing: &BillingConfig,
    catalog: &PackageCatalog,
    property: &str,
    month: u32,
    year: i32,
) -> Result<BillingSnapshot, StoreError> {
    let leases = store.leases()?;
    let active: Vec<_> = leases
        .iter()
        .filter(|record| record.lifecycle == LeaseLifecycle::Active)
        .collect();

    let mut upgrade_counts: BTreeMap<String, u32> = BTreeMap::new();
    for record in &active {
        let upgraded = catalog
            .by_code(&record.package_code)
            .is_some_and(|pkg| pkg.addon_price > 0.0);
        if upgraded {
            *upgrade_counts.entry(record.package_code.clone()).or_insert(0) += 1;
        }
    }

    let occupied_units = active.len() as u32;
    let bill = compute_monthly_bill(occupied_units, billing.base_rate, &upgrade_counts, catalog);

    Ok(BillingSnapshot {
        month,
        year,
        property: property.to_string(),
        occupied_units,
        total_units: billing.total_units,
        vacancy_count: billing.total_units.saturating_sub(occupied_units),
        base_rate: billing.base_rate,
        upgrade_counts,
        bill,
        generated_at: Utc::now(),
    })
}

/// Invoice lines matching the snapshot, for the optional complex invoice.
pub fn invoice_items(snapshot: &BillingSnapshot, catalog: &PackageCatalog) -> Vec<LineItem> {
    let mut items = vec![LineItem {
        description: format!(
            "Internet Service - {} occupied units @ ${:.2}/unit",
            snapshot.occupied_units, snapshot.base_rate
        ),
        quantity: snapshot.occupied_units,
        amount: snapshot.base_rate,
    }];

    for (code, count) in &snapshot.upgrade_counts {
        if let Some(pkg) = catalog.by_code(code) {
            if *count > 0 && pkg.addon_price > 0.0 {
                items.push(LineItem {
                    description: format!("{} Upgrade Add-on", pkg.name),
                    quantity: *count,
                    amount: pkg.addon_price,
                });
            }
        }
    }
    items
}

/// Post the complex-level invoice drafted from a snapshot to the billing
/// collaborator. Returns the remote invoice id.
pub fn create_monthly_invoice<B: BillingApi + ?Sized>(
    billing: &B,
    client_id: &str,
    snapshot: &BillingSnapshot,
    catalog: &PackageCatalog,
) -> Result<String, ClientError> {
    billing.create_invoice(client_id, &invoice_items(snapshot, catalog))
}

/// Plain-text report for the CLI.
pub fn render_report(snapshot: &BillingSnapshot) -> String {
    let rule = "=".repeat(50);
    let mut out = format!(
        "\n{property} - {month}/{year}\n{rule}\n\
Occupied Units:    {occupied} / {total}\n\
Vacant Units:      {vacant}\n\n\
Base Rate:         ${rate:.2}/unit\n\
Base Total:        ${base:.2}\n",
        property = snapshot.property,
        month = snapshot.month,
        year = snapshot.year,
        occupied = snapshot.occupied_units,
        total = snapshot.total_units,
        vacant = snapshot.vacancy_count,
        rate = snapshot.base_rate,
        base = snapshot.bill.base_total,
    );
    if snapshot.bill.upgrade_total > 0.0 {
        out.push_str(&format!(
            "Upgrade Add-ons:   ${:.2}\n",
            snapshot.bill.upgrade_total
        ));
    }
    out.push_str(&format!(
        "{rule}\nTOTAL DUE:         ${total:.2}\n{rule}\n\nGenerated: {at}\n",
        total = snapshot.bill.grand_total,
        at = snapshot.generated_at.to_rfc3339(),
    ));
    out
}
