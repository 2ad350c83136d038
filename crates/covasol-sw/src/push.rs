//! Push payloads and the notifications they produce.

use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::NotificationDefaults;

/// Payload schema: `{ title?, body?, url? }`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PushPayload {
    pub title: Option<String>,
    pub body: Option<String>,
    pub url: Option<String>,
}

impl PushPayload {
    /// Parse push data. Absent or malformed data yields `None`.
    pub fn parse(data: Option<&[u8]>) -> Option<Self> {
        let data = data?;
        match serde_json::from_slice(data) {
            Ok(payload) => Some(payload),
            Err(e) => {
                debug!(error = %e, len = data.len(), "Ignoring malformed push payload");
                None
            }
        }
    }
}

/// What to show for one push message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationIntent {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub url: String,
}

impl NotificationIntent {
    /// Fill the fields the payload leaves out from `defaults`.
    pub fn from_payload(payload: PushPayload, defaults: &NotificationDefaults) -> Self {
        Self {
            title: payload.title.unwrap_or_else(|| defaults.title.clone()),
            body: payload.body.unwrap_or_else(|| defaults.body.clone()),
            icon: defaults.icon.clone(),
            badge: defaults.badge.clone(),
            url: payload.url.unwrap_or_else(|| defaults.url.clone()),
        }
    }
}

/// Unique identifier for a shown notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NotificationId(u64);

impl NotificationId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Data attached to a notification, read back on click.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationData {
    pub url: String,
}

/// A notification on screen.
#[derive(Debug, Clone)]
pub struct Notification {
    pub id: NotificationId,
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub data: NotificationData,
}

/// Notifications currently shown by the worker.
#[derive(Debug, Default)]
pub struct Notifications {
    shown: HashMap<NotificationId, Notification>,
}

impl Notifications {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn show(&mut self, intent: NotificationIntent) -> NotificationId {
        let id = NotificationId::new();
        let notification = Notification {
            id,
            title: intent.title,
            body: intent.body,
            icon: intent.icon,
            badge: intent.badge,
            data: NotificationData { url: intent.url },
        };
        self.shown.insert(id, notification);
        id
    }

    pub fn get(&self, id: NotificationId) -> Option<&Notification> {
        self.shown.get(&id)
    }

    /// Dismiss a notification, returning it.
    pub fn close(&mut self, id: NotificationId) -> Option<Notification> {
        self.shown.remove(&id)
    }

    pub fn active(&self) -> Vec<&Notification> {
        let mut active: Vec<&Notification> = self.shown.values().collect();
        active.sort_by_key(|n| n.id.0);
        active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_absent_and_malformed() {
        assert_eq!(PushPayload::parse(None), None);
        assert_eq!(PushPayload::parse(Some(&b"not json"[..])), None);
        assert_eq!(PushPayload::parse(Some(&b"[1, 2]"[..])), None);
    }

    #[test]
    fn test_parse_partial_payload() {
        let payload = PushPayload::parse(Some(r#"{"title":"Khuyến mãi","url":"/promo"}"#.as_bytes()))
            .unwrap();
        assert_eq!(payload.title.as_deref(), Some("Khuyến mãi"));
        assert_eq!(payload.body, None);
        assert_eq!(payload.url.as_deref(), Some("/promo"));
    }

    #[test]
    fn test_intent_fills_defaults() {
        let defaults = NotificationDefaults::default();
        let intent = NotificationIntent::from_payload(PushPayload::default(), &defaults);

        assert_eq!(intent.title, "COVASOL");
        assert_eq!(intent.body, defaults.body);
        assert_eq!(intent.url, "/");
        assert_eq!(intent.icon, "/icons/icon-192x192.png");
    }

    #[test]
    fn test_show_and_close() {
        let mut notifications = Notifications::new();
        let intent = NotificationIntent::from_payload(
            PushPayload {
                url: Some("/promo".to_string()),
                ..Default::default()
            },
            &NotificationDefaults::default(),
        );

        let id = notifications.show(intent);
        assert_eq!(notifications.get(id).unwrap().data.url, "/promo");
        assert_eq!(notifications.active().len(), 1);

        assert!(notifications.close(id).is_some());
        assert!(notifications.close(id).is_none());
        assert!(notifications.active().is_empty());
    }
}
