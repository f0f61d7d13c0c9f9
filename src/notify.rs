//! Optional notification capability. The engine holds `Option<Arc<dyn
//! Notifier>>` resolved once at construction; absence is a no-op at every
//! call site. Transport (SMTP or otherwise) is an external collaborator.

use std::sync::{Arc, Mutex};

/// Welcome message for a newly activated tenant.
#[derive(Debug, Clone, PartialEq)]
pub struct WelcomeNote {
    pub tenant_name: String,
    pub email: String,
    pub unit: String,
    pub package_name: String,
    pub down_mbps: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
}

pub trait Notifier: Send + Sync {
    fn welcome(&self, note: &WelcomeNote) -> Result<(), NotifyError>;
}

/// Captures notes instead of sending them; used by tests and the demo shell.
#[derive(Default, Clone)]
pub struct RecordingNotifier {
    notes: Arc<Mutex<Vec<WelcomeNote>>>,
}

impl RecordingNotifier {
    pub fn notes(&self) -> Vec<WelcomeNote> {
        self.notes.lock().expect("note mutex poisoned").clone()
    }
}

impl Notifier for RecordingNotifier {
    fn welcome(&self, note: &WelcomeNote) -> Result<(), NotifyError> {
        self.notes
            .lock()
            .expect("note mutex poisoned")
            .push(note.clone());
        Ok(())
    }
}
