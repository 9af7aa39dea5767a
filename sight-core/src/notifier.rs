//! Notification mixin for services that pop user-facing toasts.
//!
//! Grounded in `INotifier.hpp`: a `notified(Notification)` signal, a
//! `notification_closed(channel)` signal, and a `channel -> uid` map parsed
//! from a `<notification>` block. Rust has no service inheritance, so this
//! is a field services compose in rather than a base class they derive
//! from; `ServiceHooks` implementations hold a `Notifier` and delegate to it.

use std::{collections::HashMap, time::Duration};

use parking_lot::RwLock;

use crate::{config_node::ConfigNode, signal::Signal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationType {
    Info,
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationPosition {
    TopRight,
    TopLeft,
    BottomRight,
    BottomLeft,
    Centered,
    CenteredTop,
    CenteredBottom,
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub kind: NotificationType,
    pub position: NotificationPosition,
    pub message: String,
    pub duration: Option<Duration>,
    pub channel: String,
    pub closable: Option<bool>,
    pub size: (u32, u32),
}

impl Notification {
    pub fn new(kind: NotificationType, message: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            kind,
            position: NotificationPosition::TopRight,
            message: message.into(),
            duration: Some(Duration::from_secs(3)),
            channel: channel.into(),
            closable: None,
            size: (200, 60),
        }
    }
}

/// Signals plus the channel-key-to-uid map, owned by a concrete service.
pub struct Notifier {
    pub notified: Signal<Notification>,
    pub notification_closed: Signal<String>,
    channels: RwLock<HashMap<String, String>>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self {
            notified: Signal::new(),
            notification_closed: Signal::new(),
            channels: RwLock::new(HashMap::from([(String::new(), String::new())])),
        }
    }
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a `<notification><channel key="..." uid="..."/></notification>`
    /// block, if present.
    pub fn initialize(&self, config: &ConfigNode) {
        let Some(notification) = config.child_named("notification") else {
            return;
        };
        let mut channels = self.channels.write();
        for channel in notification.children_named("channel") {
            let (Some(key), Some(uid)) = (channel.attr("key"), channel.attr("uid")) else {
                continue;
            };
            channels.insert(key.to_owned(), uid.to_owned());
        }
    }

    /// Mirrors `INotifier.cpp`'s `SIGHT_FATAL_IF(..., !m_channels.contains(...))`:
    /// notifying on a channel key with no configured `uid` mapping is a
    /// programming error, not something to paper over with the raw key.
    fn resolve_channel(&self, channel: &str) -> String {
        self.channels
            .read()
            .get(channel)
            .cloned()
            .unwrap_or_else(|| panic!("notifier: channel `{channel}` has no configured uid mapping"))
    }

    pub fn notify(&self, mut notification: Notification) {
        notification.channel = self.resolve_channel(&notification.channel);
        self.notified.emit(notification);
    }

    pub fn info(&self, message: impl Into<String>, channel: impl Into<String>) {
        self.notify(Notification::new(NotificationType::Info, message, channel));
    }

    pub fn success(&self, message: impl Into<String>, channel: impl Into<String>) {
        self.notify(Notification::new(NotificationType::Success, message, channel));
    }

    pub fn failure(&self, message: impl Into<String>, channel: impl Into<String>) {
        self.notify(Notification::new(NotificationType::Failure, message, channel));
    }

    pub fn close_notification(&self, channel: impl Into<String>) {
        self.notification_closed.emit(self.resolve_channel(&channel.into()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialize_parses_channel_map_and_notify_resolves_it() {
        let mut cfg = ConfigNode::new("service");
        let mut notification = ConfigNode::new("notification");
        let mut channel = ConfigNode::new("channel");
        channel.attributes.insert("key".into(), "key1".into());
        channel.attributes.insert("uid".into(), "ERROR_CHANNEL".into());
        notification.children.push(channel);
        cfg.children.push(notification);

        let notifier = Notifier::new();
        notifier.initialize(&cfg);

        let seen = std::sync::Arc::new(parking_lot::Mutex::new(None));
        let seen2 = seen.clone();
        let _conn = notifier
            .notified
            .connect(crate::signal::Slot::new(move |n: Notification| {
                *seen2.lock() = Some(n.channel);
            }));
        notifier.info("hello", "key1");
        assert_eq!(seen.lock().as_deref(), Some("ERROR_CHANNEL"));
    }

    #[test]
    #[should_panic(expected = "no configured uid mapping")]
    fn unmapped_channel_is_fatal() {
        let notifier = Notifier::new();
        notifier.failure("oops", "unmapped");
    }

    #[test]
    fn default_empty_channel_is_preseeded() {
        let notifier = Notifier::new();
        let seen = std::sync::Arc::new(parking_lot::Mutex::new(None));
        let seen2 = seen.clone();
        let _conn = notifier
            .notified
            .connect(crate::signal::Slot::new(move |n: Notification| {
                *seen2.lock() = Some(n.channel);
            }));
        notifier.info("hi", "");
        assert_eq!(seen.lock().as_deref(), Some(""));
    }
}
