//! Push-notification channel.
//!
//! The daemon never talks to observers directly; it hands named events to
//! a `NotificationChannel`. Delivery failures are the channel's problem:
//! callers log them and move on, a dropped broadcast is never fatal.

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use tracing::info;

/// Live-throughput event; payload is the serialized speed snapshot.
pub const EVENT_SPEED_UPDATE: &str = "speed_update";
/// Signal that observers should reload their transfer lists. No payload.
pub const EVENT_REFRESH_TRANSFERS: &str = "refresh_transfers";

/// One outbound event.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub event: &'static str,
    pub payload: Option<Value>,
}

impl Notification {
    #[must_use]
    pub fn speed_update(payload: Value) -> Self {
        Self {
            event: EVENT_SPEED_UPDATE,
            payload: Some(payload),
        }
    }

    #[must_use]
    pub fn refresh_transfers() -> Self {
        Self {
            event: EVENT_REFRESH_TRANSFERS,
            payload: None,
        }
    }
}

/// Whether a delivery reached the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub channel: &'static str,
    pub success: bool,
    pub error: Option<String>,
}

/// Async notification channel interface.
pub trait NotificationChannel: Send + Sync {
    /// Channel identifier used in logs.
    fn name(&self) -> &'static str;

    /// Deliver one event.
    fn send<'a>(&'a self, notification: &'a Notification) -> NotificationFuture<'a>;
}

/// Notification future type.
pub type NotificationFuture<'a> = Pin<Box<dyn Future<Output = Delivery> + Send + 'a>>;

/// Default channel: writes events to the log stream. Stands in until an
/// outward-facing transport is wired up.
pub struct LogChannel;

impl NotificationChannel for LogChannel {
    fn name(&self) -> &'static str {
        "log"
    }

    fn send<'a>(&'a self, notification: &'a Notification) -> NotificationFuture<'a> {
        Box::pin(async move {
            info!(
                event = notification.event,
                payload = notification
                    .payload
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default(),
                "Notification dispatched"
            );
            Delivery {
                channel: self.name(),
                success: true,
                error: None,
            }
        })
    }
}
