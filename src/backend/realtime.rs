//! Row-level change notifications pushed by the backend.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

use crate::error::AppResult;

/// Channel the Postgres trigger publishes on.
pub const CHANGE_CHANNEL: &str = "crm_changes";

/// Buffered events per change feed before a slow reader starts lagging.
pub const SUBSCRIPTION_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Customers,
    Marketplaces,
    Conversations,
    Messages,
    Orders,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Customers => "customers",
            Table::Marketplaces => "marketplaces",
            Table::Conversations => "conversations",
            Table::Messages => "messages",
            Table::Orders => "orders",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    Insert,
    Update,
    Delete,
}

/// Which events a subscription wants; `All` is the `*` filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFilter {
    All,
    Only(EventType),
}

impl EventFilter {
    pub fn matches(&self, event_type: EventType) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Only(wanted) => *wanted == event_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent<T = Value> {
    pub table: Table,
    #[serde(rename = "eventType")]
    pub event_type: EventType,
    #[serde(default)]
    pub new: Option<T>,
    #[serde(default)]
    pub old: Option<T>,
    /// Row images were too large to publish and carry only `id`.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
}

impl ChangeEvent<Value> {
    pub fn insert(table: Table, new: Value) -> Self {
        Self {
            table,
            event_type: EventType::Insert,
            new: Some(new),
            old: None,
            truncated: false,
        }
    }

    pub fn update(table: Table, old: Value, new: Value) -> Self {
        Self {
            table,
            event_type: EventType::Update,
            new: Some(new),
            old: Some(old),
            truncated: false,
        }
    }

    pub fn delete(table: Table, old: Value) -> Self {
        Self {
            table,
            event_type: EventType::Delete,
            new: None,
            old: Some(old),
            truncated: false,
        }
    }

    /// Parses a notification payload as published by `notify_row_change`.
    pub fn from_payload(payload: &str) -> AppResult<Self> {
        Ok(serde_json::from_str(payload)?)
    }

    /// Converts the row images into a typed row.
    pub fn decode<T: DeserializeOwned>(&self) -> AppResult<ChangeEvent<T>> {
        let decode_row = |row: &Option<Value>| -> AppResult<Option<T>> {
            match row {
                Some(Value::Null) | None => Ok(None),
                Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            }
        };
        Ok(ChangeEvent {
            table: self.table,
            event_type: self.event_type,
            new: decode_row(&self.new)?,
            old: decode_row(&self.old)?,
            truncated: self.truncated,
        })
    }

    /// Primary key of the row the event refers to. Delete events may carry
    /// only the key columns in `old`.
    pub fn row_id(&self) -> Option<i64> {
        let row = match self.event_type {
            EventType::Delete => self.old.as_ref(),
            EventType::Insert | EventType::Update => self.new.as_ref(),
        }?;
        row.get("id").and_then(Value::as_i64)
    }
}

/// Open realtime channel scoped to one table and event filter, reading
/// from a change feed shared with every other subscription on the backend.
pub struct Subscription {
    table: Table,
    filter: EventFilter,
    rx: broadcast::Receiver<ChangeEvent>,
}

impl Subscription {
    pub fn new(table: Table, filter: EventFilter, rx: broadcast::Receiver<ChangeEvent>) -> Self {
        Self { table, filter, rx }
    }

    pub fn table(&self) -> Table {
        self.table
    }

    fn accepts(&self, event: &ChangeEvent) -> bool {
        event.table == self.table && self.filter.matches(event.event_type)
    }

    /// Waits for the next matching event. `None` once the feed is closed.
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.accepts(&event) => return Some(event),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(table = self.table.as_str(), skipped, "realtime subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Returns an already-delivered matching event without waiting.
    pub fn try_next(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if self.accepts(&event) => return Some(event),
                Ok(_) => continue,
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(table = self.table.as_str(), skipped, "realtime subscriber lagged");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Detaches from the change feed. Dropping the subscription does the
    /// same; the feed itself keeps running for other subscribers.
    pub fn unsubscribe(self) {
        let Self { table, rx, .. } = self;
        drop(rx);
        tracing::debug!(table = table.as_str(), "realtime subscription closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_trigger_payload() {
        let payload = r#"{"table":"customers","eventType":"DELETE","new":null,"old":{"id":7,"full_name":"Ali"}}"#;
        let event = ChangeEvent::from_payload(payload).expect("payload");
        assert_eq!(event.table, Table::Customers);
        assert_eq!(event.event_type, EventType::Delete);
        assert!(event.new.is_none());
        assert_eq!(event.row_id(), Some(7));
    }

    #[test]
    fn parses_truncated_payload_down_to_the_row_id() {
        let payload = r#"{"table":"messages","eventType":"INSERT","new":{"id":42},"old":null,"truncated":true}"#;
        let event = ChangeEvent::from_payload(payload).expect("payload");
        assert!(event.truncated);
        assert_eq!(event.row_id(), Some(42));

        let full = ChangeEvent::from_payload(r#"{"table":"messages","eventType":"INSERT","new":{"id":1}}"#)
            .expect("payload");
        assert!(!full.truncated);
    }

    #[test]
    fn unsubscribing_releases_the_receiver() {
        let (tx, rx) = broadcast::channel(SUBSCRIPTION_CAPACITY);
        let sub = Subscription::new(Table::Customers, EventFilter::All, rx);
        assert_eq!(tx.receiver_count(), 1);
        sub.unsubscribe();
        assert_eq!(tx.receiver_count(), 0);
    }

    #[test]
    fn decode_rejects_malformed_rows() {
        #[derive(Debug, Deserialize)]
        #[allow(dead_code)]
        struct Row {
            id: i64,
        }
        let event = ChangeEvent::insert(Table::Customers, json!({ "id": "not-a-number" }));
        assert!(event.decode::<Row>().is_err());
    }

    #[test]
    fn filter_matches_single_event_type() {
        assert!(EventFilter::All.matches(EventType::Update));
        assert!(EventFilter::Only(EventType::Insert).matches(EventType::Insert));
        assert!(!EventFilter::Only(EventType::Insert).matches(EventType::Delete));
    }

    #[tokio::test]
    async fn subscription_skips_other_tables_and_events() {
        let (tx, rx) = broadcast::channel(SUBSCRIPTION_CAPACITY);
        let mut sub = Subscription::new(Table::Customers, EventFilter::Only(EventType::Insert), rx);

        tx.send(ChangeEvent::insert(Table::Messages, json!({ "id": 1 })))
            .unwrap();
        tx.send(ChangeEvent::delete(Table::Customers, json!({ "id": 2 })))
            .unwrap();
        tx.send(ChangeEvent::insert(Table::Customers, json!({ "id": 3 })))
            .unwrap();

        let event = sub.try_next().expect("matching event");
        assert_eq!(event.row_id(), Some(3));
        assert!(sub.try_next().is_none());
    }
}
