//! Real-time change-notification channel.
//!
//! Modeled as a bounded-wait receiver rather than a specific backend
//! (inotify, ReadDirectoryChangesW, kqueue, ...): the scheduler only needs
//! to know it can wait up to a timeout and drain whatever arrived.

use std::path::PathBuf;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RealtimeNotification {
    pub path: PathBuf,
}

pub struct RealtimeChannel {
    receiver: Receiver<RealtimeNotification>,
}

impl RealtimeChannel {
    pub fn new(receiver: Receiver<RealtimeNotification>) -> Self {
        RealtimeChannel { receiver }
    }

    /// Waits up to `timeout` for at least one notification, then drains
    /// whatever else is already queued without blocking further.
    pub fn wait_and_drain(&self, timeout: Duration) -> Vec<RealtimeNotification> {
        let mut notifications = Vec::new();
        match self.receiver.recv_timeout(timeout) {
            Ok(first) => notifications.push(first),
            Err(RecvTimeoutError::Timeout) => return notifications,
            Err(RecvTimeoutError::Disconnected) => return notifications,
        }
        while let Ok(next) = self.receiver.try_recv() {
            notifications.push(next);
        }
        notifications
    }
}
