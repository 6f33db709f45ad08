use std::sync::Mutex;

use crate::engine::ChangeHandler;

/// One delivered change notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub prefix: String,
    pub changes: Vec<String>,
    pub tag: Option<String>,
    pub is_writability: bool,
    pub origin_tag: Option<u64>,
}

/// A [`ChangeHandler`] that records everything it is given.
#[derive(Default)]
pub struct RecordingHandler {
    notifications: Mutex<Vec<Notification>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drains the notifications recorded so far.
    pub fn take(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.notifications.lock().unwrap())
    }

    pub fn count(&self) -> usize {
        self.notifications.lock().unwrap().len()
    }
}

impl ChangeHandler for RecordingHandler {
    fn change_notify(
        &self,
        prefix: &str,
        changes: &[String],
        tag: Option<&str>,
        is_writability: bool,
        origin_tag: Option<u64>,
    ) {
        self.notifications.lock().unwrap().push(Notification {
            prefix: prefix.to_owned(),
            changes: changes.to_vec(),
            tag: tag.map(str::to_owned),
            is_writability,
            origin_tag,
        });
    }
}
