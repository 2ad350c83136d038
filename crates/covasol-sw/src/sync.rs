//! Background sync registrations.
//!
//! The only tag the site registers is [`CONTACT_FORM_SYNC`]. Replaying queued
//! contact-form submissions is not implemented: the queue format and retry
//! policy are not defined anywhere yet, so the handler only records the event.

use hashbrown::HashSet;
use tracing::info;

/// Tag registered by the contact form when a submission fails offline.
pub const CONTACT_FORM_SYNC: &str = "contact-form-sync";

/// Result of a sync event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Known tag; the handler ran but had nothing to replay.
    NoOp,
    /// Tag was never registered or has no handler.
    Ignored,
}

/// Pending sync registrations.
#[derive(Debug, Default)]
pub struct SyncManager {
    registered: HashSet<String>,
}

impl SyncManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tag. Registering twice keeps one registration.
    pub fn register(&mut self, tag: &str) {
        self.registered.insert(tag.to_string());
    }

    /// Deliver a sync event. A handled registration is consumed.
    pub fn fire(&mut self, tag: &str) -> SyncOutcome {
        if !self.registered.remove(tag) {
            return SyncOutcome::Ignored;
        }

        match tag {
            CONTACT_FORM_SYNC => {
                info!(tag, "Background sync fired; no queued contact forms to replay");
                SyncOutcome::NoOp
            }
            _ => SyncOutcome::Ignored,
        }
    }
}
