//! Keeps tenant occupancy at a fiber-served apartment complex in step with
//! network provisioning and subscriber billing. The [`sync::SyncEngine`]
//! runs the reconciliation cycle; everything else supports it.

pub mod billing;
pub mod clients;
pub mod config;
pub mod error;
pub mod inventory;
pub mod notify;
pub mod provision;
pub mod store;
pub mod sync;
pub mod telemetry;
