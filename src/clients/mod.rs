//! Typed boundaries for the two remote collaborators: the property-management
//! API and the subscriber/billing platform (billing + network sub-interfaces).
//! Payloads are parsed eagerly into records here; nothing dynamic crosses
//! into the engine.

pub mod memory;
mod property;
mod subscriber;

pub use property::{Lease, LineItem, MaintenanceTicket, PropertyManagementApi, Tenant};
pub use subscriber::{
    BillingApi, BillingService, Device, NetworkApi, NewClient, ServicePatch, ServiceState,
};

/// Failure of a single remote call. Always contained to the item being
/// processed; the next cycle retries naturally.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("remote call failed: {0}")]
    Remote(String),
    #[error("malformed payload: {0}")]
    Payload(String),
    /// Deadline overrun. Every transport carries a bounded timeout and maps
    /// overruns here; treated like any other contained remote failure.
    #[error("remote call timed out after {seconds}s")]
    Timeout { seconds: u64 },
}
