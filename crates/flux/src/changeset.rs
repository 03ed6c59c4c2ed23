//! The change-set engine: remembered state per business key and the
//! insertion-ordered delta computed against it.

use core_types::{AccountSnapshot, Order, Position, Trade};
use dashmap::DashMap;
use std::collections::HashMap;

/// An entity that can be correlated between the exchange and local storage.
pub trait Keyed {
    fn business_key(&self) -> String;
}

impl Keyed for AccountSnapshot {
    fn business_key(&self) -> String {
        self.account_id.clone()
    }
}

impl Keyed for Order {
    fn business_key(&self) -> String {
        self.order_id.clone()
    }
}

impl Keyed for Trade {
    fn business_key(&self) -> String {
        self.trade_id.clone()
    }
}

impl Keyed for Position {
    fn business_key(&self) -> String {
        self.position_id.to_string()
    }
}

/// Changed-or-new entities in the order the source reported them.
///
/// Holds at most one entity per business key. Inserting a key that is already
/// present replaces the value but keeps its original position.
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaSet<T> {
    items: Vec<T>,
    index: HashMap<String, usize>,
}

impl<T> Default for DeltaSet<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<T: Keyed> DeltaSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, item: T) {
        let key = item.business_key();
        match self.index.get(&key) {
            Some(&slot) => self.items[slot] = item,
            None => {
                self.index.insert(key, self.items.len());
                self.items.push(item);
            }
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Business keys in insertion order.
    pub fn keys(&self) -> Vec<String> {
        self.items.iter().map(Keyed::business_key).collect()
    }
}

impl<T> DeltaSet<T> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn into_vec(self) -> Vec<T> {
        self.items
    }
}

impl<T: Keyed> FromIterator<T> for DeltaSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut delta = DeltaSet::new();
        for item in iter {
            delta.insert(item);
        }
        delta
    }
}

impl<T> IntoIterator for DeltaSet<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a DeltaSet<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// The latest externally observed value per business key.
///
/// One instance is owned per pipeline and shared through an `Arc`, so other
/// tasks (a strategy asking for the last known balance) can read it while
/// cycles run. Every observation replaces the remembered value whether or
/// not it produced a delta. The one exception: a key whose element was in
/// the delta but did not come back from persistence is evicted by the
/// pipeline, so the element is detected again on the next cycle instead of
/// being lost.
#[derive(Debug)]
pub struct Remembered<T> {
    values: DashMap<String, T>,
}

impl<T> Default for Remembered<T> {
    fn default() -> Self {
        Self {
            values: DashMap::new(),
        }
    }
}

impl<T: Clone + PartialEq> Remembered<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<T> {
        self.values.get(key).map(|entry| entry.value().clone())
    }

    pub fn record(&self, key: String, value: T) {
        self.values.insert(key, value);
    }

    pub fn forget(&self, key: &str) {
        self.values.remove(key);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Computes the delta of `current` against `remembered` without recording
/// anything.
///
/// Later elements of `current` are compared against earlier elements with
/// the same key, exactly as [`diff`] would see them.
pub fn preview<T>(remembered: &Remembered<T>, current: &[T]) -> DeltaSet<T>
where
    T: Keyed + Clone + PartialEq,
{
    let mut seen: HashMap<String, &T> = HashMap::new();
    let mut delta = DeltaSet::new();

    for item in current {
        let key = item.business_key();
        let changed = match seen.get(&key) {
            Some(previous) => *previous != item,
            None => remembered
                .values
                .get(&key)
                .map_or(true, |previous| previous.value() != item),
        };
        if changed {
            delta.insert(item.clone());
        }
        seen.insert(key, item);
    }
    delta
}

/// Computes the delta of `current` against `remembered`, then records every
/// element of `current` as the latest observation for its key.
pub fn diff<T>(remembered: &Remembered<T>, current: Vec<T>) -> DeltaSet<T>
where
    T: Keyed + Clone + PartialEq,
{
    let delta = preview(remembered, &current);
    for item in current {
        remembered.record(item.business_key(), item);
    }
    delta
}

/// Records every element of `current` as the latest observation and returns
/// all of them as the delta.
pub fn record<T>(remembered: &Remembered<T>, current: Vec<T>) -> DeltaSet<T>
where
    T: Keyed + Clone + PartialEq,
{
    for item in &current {
        remembered.record(item.business_key(), item.clone());
    }
    current.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::Balance;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn account(id: &str, btc: Decimal) -> AccountSnapshot {
        AccountSnapshot {
            account_id: id.to_string(),
            name: format!("account {}", id),
            balances: vec![Balance {
                asset: "BTC".to_string(),
                wallet_balance: btc,
                available_balance: btc,
                unrealized_pnl: Decimal::ZERO,
            }],
            positions: Vec::new(),
        }
    }

    #[test]
    fn unchanged_snapshot_yields_empty_delta() {
        let remembered = Remembered::new();
        diff(&remembered, vec![account("A", dec!(1))]);

        let delta = diff(&remembered, vec![account("A", dec!(1))]);
        assert!(delta.is_empty());
    }

    #[test]
    fn changed_balance_is_reported() {
        let remembered = Remembered::new();
        diff(&remembered, vec![account("A", dec!(1))]);

        let delta = diff(&remembered, vec![account("A", dec!(2))]);
        assert_eq!(delta.into_vec(), vec![account("A", dec!(2))]);
        assert_eq!(remembered.get("A"), Some(account("A", dec!(2))));
    }

    #[test]
    fn preview_is_repeatable_and_diff_then_converges() {
        let remembered = Remembered::new();
        diff(&remembered, vec![account("A", dec!(1))]);
        let current = vec![account("A", dec!(3)), account("B", dec!(5))];

        let first = preview(&remembered, &current);
        let second = preview(&remembered, &current);
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);

        diff(&remembered, current.clone());
        assert!(preview(&remembered, &current).is_empty());
    }

    #[test]
    fn delta_keeps_source_order() {
        let remembered = Remembered::new();
        let delta = diff(
            &remembered,
            vec![account("C", dec!(1)), account("A", dec!(1)), account("B", dec!(1))],
        );
        assert_eq!(delta.keys(), vec!["C", "A", "B"]);
    }

    #[test]
    fn repeated_key_keeps_first_slot_with_latest_value() {
        let remembered = Remembered::new();
        let delta = diff(
            &remembered,
            vec![account("A", dec!(1)), account("B", dec!(1)), account("A", dec!(2))],
        );

        assert_eq!(delta.keys(), vec!["A", "B"]);
        assert_eq!(delta.iter().next(), Some(&account("A", dec!(2))));
        assert_eq!(remembered.get("A"), Some(account("A", dec!(2))));
    }

    #[test]
    fn forgotten_key_is_reported_again() {
        let remembered = Remembered::new();
        diff(&remembered, vec![account("A", dec!(1))]);
        remembered.forget("A");

        let delta = diff(&remembered, vec![account("A", dec!(1))]);
        assert_eq!(delta.len(), 1);
    }
}
