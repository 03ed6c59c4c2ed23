use chrono::{DateTime, Utc};
use core_types::{AccountSnapshot, Order, Position, Trade};
use serde::{Deserialize, Serialize};

/// A change notification pushed to downstream consumers after a pipeline cycle.
///
/// Each variant carries the entities one cycle persisted, in the order the
/// exchange reported them. Serialized as `{"type": "...", "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum FluxEvent {
    Accounts(Changed<AccountSnapshot>),
    Orders(Changed<Order>),
    Trades(Changed<Trade>),
    Positions(Changed<Position>),
}

/// The entities of one cycle together with when they were observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Changed<T> {
    pub observed_at: DateTime<Utc>,
    pub items: Vec<T>,
}

impl<T> Changed<T> {
    pub fn now(items: Vec<T>) -> Self {
        Self {
            observed_at: Utc::now(),
            items,
        }
    }
}

impl FluxEvent {
    /// Number of entities carried by the event.
    pub fn len(&self) -> usize {
        match self {
            FluxEvent::Accounts(c) => c.items.len(),
            FluxEvent::Orders(c) => c.items.len(),
            FluxEvent::Trades(c) => c.items.len(),
            FluxEvent::Positions(c) => c.items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The serialized form handed to out-of-process consumers.
    pub fn to_json(&self) -> Result<String, crate::EventsError> {
        serde_json::to_string(self).map_err(|e| crate::EventsError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_type_tag() {
        let event = FluxEvent::Accounts(Changed::now(vec![AccountSnapshot {
            account_id: "A".to_string(),
            name: "main".to_string(),
            balances: Vec::new(),
            positions: Vec::new(),
        }]));

        let json = event.to_json().unwrap();
        assert!(json.starts_with(r#"{"type":"Accounts","payload":"#));
        assert_eq!(event.len(), 1);
    }
}
