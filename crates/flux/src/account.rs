use crate::changeset::Remembered;
use crate::error::FluxError;
use crate::pipeline::{Fetch, Flux, Passthrough};
use api_client::AccountSource;
use async_trait::async_trait;
use core_types::AccountSnapshot;
use std::sync::Arc;

/// Polls account snapshots. Accounts are observed only, never stored.
pub struct AccountFetch {
    source: Arc<dyn AccountSource>,
}

impl AccountFetch {
    pub fn new(source: Arc<dyn AccountSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Fetch for AccountFetch {
    type Item = AccountSnapshot;

    async fn fetch_current(&self) -> Result<Vec<AccountSnapshot>, FluxError> {
        Ok(self.source.fetch_accounts().await?)
    }
}

pub type AccountFlux = Flux<AccountFetch, Passthrough<AccountSnapshot>>;

/// Builds the account pipeline over a remembered map the caller may share
/// with readers of [`AccountFlux::last_known`].
pub fn account_flux(
    source: Arc<dyn AccountSource>,
    remembered: Arc<Remembered<AccountSnapshot>>,
) -> AccountFlux {
    Flux::new(
        "account",
        AccountFetch::new(source),
        Passthrough::default(),
        remembered,
    )
}

impl Flux<AccountFetch, Passthrough<AccountSnapshot>> {
    /// The most recent snapshot observed for `account_id`.
    pub fn last_known(&self, account_id: &str) -> Option<AccountSnapshot> {
        self.remembered().get(account_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use api_client::error::ApiError;
    use core_types::Balance;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    struct FakeAccounts {
        btc: Mutex<Decimal>,
    }

    #[async_trait]
    impl AccountSource for FakeAccounts {
        async fn fetch_accounts(&self) -> Result<Vec<AccountSnapshot>, ApiError> {
            let btc = *self.btc.lock().unwrap();
            Ok(vec![AccountSnapshot {
                account_id: "A".to_string(),
                name: "main".to_string(),
                balances: vec![Balance {
                    asset: "BTC".to_string(),
                    wallet_balance: btc,
                    available_balance: btc,
                    unrealized_pnl: Decimal::ZERO,
                }],
                positions: Vec::new(),
            }])
        }
    }

    #[tokio::test]
    async fn balance_change_is_the_only_delta() {
        let source = Arc::new(FakeAccounts {
            btc: Mutex::new(dec!(1)),
        });
        let flux = account_flux(source.clone(), Arc::new(Remembered::new()));

        assert_eq!(flux.cycle().await.unwrap().len(), 1);
        assert!(flux.cycle().await.unwrap().is_empty());

        *source.btc.lock().unwrap() = dec!(2);
        let delta = flux.cycle().await.unwrap();
        assert_eq!(delta.keys(), vec!["A"]);

        let last = flux.last_known("A").unwrap();
        assert_eq!(last.balance("BTC").unwrap().wallet_balance, dec!(2));
    }

    #[tokio::test]
    async fn shared_remembered_map_is_readable_outside_the_pipeline() {
        let remembered = Arc::new(Remembered::new());
        let flux = account_flux(
            Arc::new(FakeAccounts {
                btc: Mutex::new(dec!(1)),
            }),
            Arc::clone(&remembered),
        );

        assert!(remembered.get("A").is_none());
        flux.cycle().await.unwrap();
        assert!(remembered.get("A").is_some());
    }
}
