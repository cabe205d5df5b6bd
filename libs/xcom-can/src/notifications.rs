//! Unsolicited message notifications
//!
//! Records are kept in arrival order for the lifetime of the node; callers
//! decide what to keep.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::addresses::Address;
use crate::codec::MessageNotification;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub source: Address,
    pub notification: MessageNotification,
    pub received_at: DateTime<Utc>,
}

impl NotificationRecord {
    pub fn new(source: Address, notification: MessageNotification) -> Self {
        Self {
            source,
            notification,
            received_at: Utc::now(),
        }
    }
}

impl fmt::Display for NotificationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} from {}: message {} value {}",
            self.received_at.format("%Y-%m-%d %H:%M:%S%.3f"),
            self.source,
            self.notification.message_id,
            self.notification.value
        )
    }
}

/// Append-only notification log
#[derive(Debug, Default)]
pub struct NotificationSink {
    records: RwLock<Vec<NotificationRecord>>,
}

impl NotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, record: NotificationRecord) {
        self.records.write().push(record);
    }

    /// Copy of every record received so far
    pub fn snapshot(&self) -> Vec<NotificationRecord> {
        self.records.read().clone()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use std::sync::Arc;

    fn record(message_id: u16) -> NotificationRecord {
        NotificationRecord::new(
            Address::new(101).unwrap(),
            MessageNotification {
                message_id,
                value: u32::from(message_id) * 10,
            },
        )
    }

    #[test]
    fn test_append_keeps_order() {
        let sink = NotificationSink::new();
        assert!(sink.is_empty());
        for id in 1..=5 {
            sink.append(record(id));
        }

        let ids: Vec<u16> = sink
            .snapshot()
            .iter()
            .map(|r| r.notification.message_id)
            .collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        assert_eq!(sink.len(), 5);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let sink = NotificationSink::new();
        sink.append(record(1));
        let snapshot = sink.snapshot();
        sink.append(record(2));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(sink.len(), 2);
    }

    #[test]
    fn test_concurrent_append_and_snapshot() {
        let sink = Arc::new(NotificationSink::new());
        let writer = {
            let sink = Arc::clone(&sink);
            std::thread::spawn(move || {
                for id in 0..1000 {
                    sink.append(record(id));
                }
            })
        };

        let mut last_len = 0;
        while last_len < 1000 {
            let snapshot = sink.snapshot();
            assert!(snapshot.len() >= last_len);
            for (index, r) in snapshot.iter().enumerate() {
                assert_eq!(r.notification.message_id as usize, index);
            }
            last_len = snapshot.len();
        }
        writer.join().unwrap();
    }

    #[test]
    fn test_record_display() {
        let text = record(7).to_string();
        assert!(text.ends_with("from 101: message 7 value 70"), "{text}");
    }
}
