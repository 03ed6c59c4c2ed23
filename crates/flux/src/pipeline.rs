use crate::changeset::{self, DeltaSet, Keyed, Remembered};
use crate::error::FluxError;
use async_trait::async_trait;
use core_types::{AccountSnapshot, Order, Position, Trade};
use events::{Changed, FluxEvent};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, Instrument};

/// How a pipeline decides which fetched elements are changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detection {
    /// Compare each element with the remembered value for its key.
    Remembered,
    /// The fetch already compared against the local store and returns only
    /// candidates. They are all persisted and recorded as the latest
    /// observation, but the remembered value never vetoes one.
    Fetched,
    /// Every element is persisted and nothing is remembered.
    Unrecorded,
}

/// Pulls the authoritative external view of one entity type.
///
/// Implementations may read the local store but never write to it.
#[async_trait]
pub trait Fetch: Send + Sync {
    type Item: Keyed + Clone + PartialEq + Send + Sync + 'static;

    const DETECTION: Detection = Detection::Remembered;

    async fn fetch_current(&self) -> Result<Vec<Self::Item>, FluxError>;
}

/// Applies a delta and returns the canonical post-persistence values.
///
/// Elements left out of the returned set count as not persisted.
#[async_trait]
pub trait Persist: Send + Sync {
    type Item: Send + 'static;

    async fn persist(
        &self,
        delta: DeltaSet<Self::Item>,
    ) -> Result<DeltaSet<Self::Item>, FluxError>;
}

/// Persistence for entities that are only observed, never stored.
pub struct Passthrough<T>(PhantomData<fn() -> T>);

impl<T> Default for Passthrough<T> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

#[async_trait]
impl<T: Send + 'static> Persist for Passthrough<T> {
    type Item = T;

    async fn persist(&self, delta: DeltaSet<T>) -> Result<DeltaSet<T>, FluxError> {
        Ok(delta)
    }
}

/// Wraps one cycle's persisted entities into the downstream message.
pub trait IntoEvent: Sized {
    fn into_event(items: Vec<Self>) -> FluxEvent;
}

impl IntoEvent for AccountSnapshot {
    fn into_event(items: Vec<Self>) -> FluxEvent {
        FluxEvent::Accounts(Changed::now(items))
    }
}

impl IntoEvent for Order {
    fn into_event(items: Vec<Self>) -> FluxEvent {
        FluxEvent::Orders(Changed::now(items))
    }
}

impl IntoEvent for Trade {
    fn into_event(items: Vec<Self>) -> FluxEvent {
        FluxEvent::Trades(Changed::now(items))
    }
}

impl IntoEvent for Position {
    fn into_event(items: Vec<Self>) -> FluxEvent {
        FluxEvent::Positions(Changed::now(items))
    }
}

/// Counters for one pipeline instance.
#[derive(Debug, Default)]
pub struct FluxMetrics {
    cycles: AtomicU64,
    failed_cycles: AtomicU64,
    published: AtomicU64,
}

impl FluxMetrics {
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    pub fn failed_cycles(&self) -> u64 {
        self.failed_cycles.load(Ordering::Relaxed)
    }

    /// Entities handed to the downstream channel.
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

/// The generic reconciliation pipeline: fetch, diff against remembered
/// state, persist, publish.
///
/// Callers must not run two cycles of the same instance concurrently; the
/// [`scheduler`](crate::scheduler) guarantees this.
pub struct Flux<F: Fetch, P> {
    name: &'static str,
    fetch: F,
    persist: P,
    remembered: Arc<Remembered<F::Item>>,
    events: Option<broadcast::Sender<FluxEvent>>,
    metrics: Arc<FluxMetrics>,
}

impl<F, P> Flux<F, P>
where
    F: Fetch,
    P: Persist<Item = F::Item>,
    F::Item: IntoEvent,
{
    pub fn new(
        name: &'static str,
        fetch: F,
        persist: P,
        remembered: Arc<Remembered<F::Item>>,
    ) -> Self {
        Self {
            name,
            fetch,
            persist,
            remembered,
            events: None,
            metrics: Arc::new(FluxMetrics::default()),
        }
    }

    /// Publishes every non-empty cycle result on `events`.
    pub fn with_events(mut self, events: broadcast::Sender<FluxEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn fetcher(&self) -> &F {
        &self.fetch
    }

    pub fn persister(&self) -> &P {
        &self.persist
    }

    pub fn remembered(&self) -> &Arc<Remembered<F::Item>> {
        &self.remembered
    }

    pub fn metrics(&self) -> Arc<FluxMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Fetches and computes the delta the next cycle would persist, without
    /// recording the observation.
    pub async fn preview(&self) -> Result<DeltaSet<F::Item>, FluxError> {
        let current = self.fetch.fetch_current().await?;
        Ok(match F::DETECTION {
            Detection::Remembered => changeset::preview(&self.remembered, &current),
            Detection::Fetched | Detection::Unrecorded => current.into_iter().collect(),
        })
    }

    /// Runs one fetch-diff-persist-publish cycle and returns what was persisted.
    pub async fn cycle(&self) -> Result<DeltaSet<F::Item>, FluxError> {
        let span = tracing::info_span!("flux_cycle", flux = self.name);
        self.metrics.cycles.fetch_add(1, Ordering::Relaxed);

        let result = self.run_cycle().instrument(span).await;
        if result.is_err() {
            self.metrics.failed_cycles.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    async fn run_cycle(&self) -> Result<DeltaSet<F::Item>, FluxError> {
        let current = self.fetch.fetch_current().await?;
        let fetched = current.len();

        let delta = match F::DETECTION {
            Detection::Remembered => changeset::diff(&self.remembered, current),
            Detection::Fetched => changeset::record(&self.remembered, current),
            Detection::Unrecorded => current.into_iter().collect(),
        };
        let keys = delta.keys();
        let remembers = F::DETECTION != Detection::Unrecorded;

        let persisted = match self.persist.persist(delta).await {
            Ok(persisted) => persisted,
            Err(e) => {
                if remembers {
                    for key in &keys {
                        self.remembered.forget(key);
                    }
                }
                return Err(e);
            }
        };

        if remembers {
            for key in keys.iter().filter(|key| !persisted.contains_key(key)) {
                debug!(key = %key, "Evicting unpersisted element from remembered state");
                self.remembered.forget(key);
            }
        }

        debug!(
            fetched,
            delta = keys.len(),
            persisted = persisted.len(),
            "Cycle complete"
        );

        if !persisted.is_empty() {
            self.publish(&persisted);
        }
        Ok(persisted)
    }

    fn publish(&self, persisted: &DeltaSet<F::Item>) {
        let Some(events) = &self.events else {
            return;
        };
        let count = persisted.len() as u64;
        let event = <F::Item as IntoEvent>::into_event(persisted.iter().cloned().collect());
        // A send error only means there is no subscriber right now.
        if events.send(event).is_err() {
            debug!("No downstream subscribers");
        }
        self.metrics.published.fetch_add(count, Ordering::Relaxed);
    }
}

/// Object-safe view of a pipeline for the scheduler.
#[async_trait]
pub trait Cycle: Send + Sync {
    fn name(&self) -> &'static str;

    /// Runs one cycle and returns the number of persisted entities.
    async fn run_once(&self) -> Result<usize, FluxError>;
}

#[async_trait]
impl<F, P> Cycle for Flux<F, P>
where
    F: Fetch,
    P: Persist<Item = F::Item>,
    F::Item: IntoEvent,
{
    fn name(&self) -> &'static str {
        self.name
    }

    async fn run_once(&self) -> Result<usize, FluxError> {
        self.cycle().await.map(|persisted| persisted.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::Balance;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    fn account(id: &str, btc: Decimal) -> AccountSnapshot {
        AccountSnapshot {
            account_id: id.to_string(),
            name: id.to_string(),
            balances: vec![Balance {
                asset: "BTC".to_string(),
                wallet_balance: btc,
                available_balance: btc,
                unrealized_pnl: Decimal::ZERO,
            }],
            positions: Vec::new(),
        }
    }

    /// Hands out one scripted response per call; an empty script fails.
    struct ScriptedFetch {
        script: Mutex<Vec<Vec<AccountSnapshot>>>,
    }

    impl ScriptedFetch {
        fn new(mut script: Vec<Vec<AccountSnapshot>>) -> Self {
            script.reverse();
            Self {
                script: Mutex::new(script),
            }
        }
    }

    #[async_trait]
    impl Fetch for ScriptedFetch {
        type Item = AccountSnapshot;

        async fn fetch_current(&self) -> Result<Vec<AccountSnapshot>, FluxError> {
            self.script
                .lock()
                .unwrap()
                .pop()
                .ok_or(FluxError::InboxClosed)
        }
    }

    /// Persists everything except the ids it is told to reject.
    struct Rejecting {
        reject: Vec<String>,
        fail_all: bool,
    }

    #[async_trait]
    impl Persist for Rejecting {
        type Item = AccountSnapshot;

        async fn persist(
            &self,
            delta: DeltaSet<AccountSnapshot>,
        ) -> Result<DeltaSet<AccountSnapshot>, FluxError> {
            if self.fail_all {
                return Err(FluxError::InboxClosed);
            }
            Ok(delta
                .into_iter()
                .filter(|a| !self.reject.contains(&a.account_id))
                .collect())
        }
    }

    #[tokio::test]
    async fn unchanged_fetch_publishes_nothing() {
        let (tx, mut rx) = broadcast::channel(8);
        let flux = Flux::new(
            "account",
            ScriptedFetch::new(vec![
                vec![account("A", dec!(1))],
                vec![account("A", dec!(1))],
            ]),
            Passthrough::default(),
            Arc::new(Remembered::new()),
        )
        .with_events(tx);

        assert_eq!(flux.cycle().await.unwrap().len(), 1);
        assert!(flux.cycle().await.unwrap().is_empty());

        assert!(matches!(rx.recv().await.unwrap(), FluxEvent::Accounts(c) if c.items.len() == 1));
        assert!(rx.try_recv().is_err());
        assert_eq!(flux.metrics().published(), 1);
        assert_eq!(flux.metrics().cycles(), 2);
    }

    #[tokio::test]
    async fn fetch_failure_is_counted_and_propagated() {
        let flux = Flux::new(
            "account",
            ScriptedFetch::new(Vec::new()),
            Passthrough::default(),
            Arc::new(Remembered::new()),
        );

        assert!(flux.cycle().await.is_err());
        assert_eq!(flux.metrics().failed_cycles(), 1);
    }

    #[tokio::test]
    async fn unpersisted_element_is_detected_again() {
        let snapshot = vec![account("A", dec!(1)), account("B", dec!(1))];
        let flux = Flux::new(
            "account",
            ScriptedFetch::new(vec![snapshot.clone(), snapshot]),
            Rejecting {
                reject: vec!["B".to_string()],
                fail_all: false,
            },
            Arc::new(Remembered::new()),
        );

        let first = flux.cycle().await.unwrap();
        assert_eq!(first.keys(), vec!["A"]);
        assert!(flux.remembered().get("B").is_none());

        assert_eq!(flux.preview().await.unwrap().keys(), vec!["B"]);
    }

    #[tokio::test]
    async fn failed_persist_evicts_the_whole_delta() {
        let remembered = Arc::new(Remembered::new());
        let flux = Flux::new(
            "account",
            ScriptedFetch::new(vec![vec![account("A", dec!(1))]]),
            Rejecting {
                reject: Vec::new(),
                fail_all: true,
            },
            Arc::clone(&remembered),
        );

        assert!(flux.cycle().await.is_err());
        assert!(remembered.is_empty());
    }

    #[tokio::test]
    async fn preview_leaves_remembered_state_alone() {
        let flux = Flux::new(
            "account",
            ScriptedFetch::new(vec![
                vec![account("A", dec!(1))],
                vec![account("A", dec!(1))],
            ]),
            Passthrough::default(),
            Arc::new(Remembered::new()),
        );

        assert_eq!(flux.preview().await.unwrap().len(), 1);
        assert!(flux.remembered().is_empty());
        assert_eq!(flux.cycle().await.unwrap().len(), 1);
    }

    /// A fetch that already filtered against local storage.
    struct Precompared(ScriptedFetch);

    #[async_trait]
    impl Fetch for Precompared {
        type Item = AccountSnapshot;

        const DETECTION: Detection = Detection::Fetched;

        async fn fetch_current(&self) -> Result<Vec<AccountSnapshot>, FluxError> {
            self.0.fetch_current().await
        }
    }

    #[tokio::test]
    async fn precompared_candidate_is_persisted_even_when_remembered() {
        let flux = Flux::new(
            "account",
            Precompared(ScriptedFetch::new(vec![
                vec![account("A", dec!(1))],
                vec![account("A", dec!(1))],
            ])),
            Passthrough::default(),
            Arc::new(Remembered::new()),
        );

        assert_eq!(flux.cycle().await.unwrap().len(), 1);
        assert_eq!(flux.cycle().await.unwrap().len(), 1);
        assert_eq!(flux.remembered().get("A"), Some(account("A", dec!(1))));
    }
}
