//! Composition root: the store, catalog, configuration and notifier, wired once.

use std::sync::Arc;

use creditforge_catalog::Catalog;
use creditforge_core::EngineConfig;
use creditforge_events::EventBus;
use creditforge_ledger::CreditEvent;

use crate::lifecycle::{ChargeLifecycle, SubscriptionLifecycle};
use crate::notifier::{LowBalanceAlert, Notifier};
use crate::processor::FulfillmentProcessor;
use crate::store::CreditStore;
use crate::wallet_service::WalletService;

/// Everything a credit operation needs, shared by the services it hands out.
///
/// Services borrow the engine; wrap it in an `Arc` to share across threads
/// (the scheduler does).
#[derive(Debug)]
pub struct CreditEngine<S, B> {
    store: S,
    catalog: Catalog,
    config: Arc<EngineConfig>,
    notifier: Notifier<B>,
}

impl<S, B> CreditEngine<S, B>
where
    S: CreditStore,
    B: EventBus<CreditEvent>,
{
    pub fn new(store: S, catalog: Catalog, config: EngineConfig, bus: B) -> Self {
        let config = Arc::new(config);
        Self {
            store,
            catalog,
            notifier: Notifier::new(bus, config.clone()),
            config,
        }
    }

    /// Invoke `hook` whenever a wallet crosses into low balance.
    pub fn with_low_balance_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&LowBalanceAlert) + Send + Sync + 'static,
    {
        self.notifier = self.notifier.with_low_balance_hook(Arc::new(hook));
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn notifier(&self) -> &Notifier<B> {
        &self.notifier
    }

    pub fn wallets(&self) -> WalletService<'_, S, B> {
        WalletService::new(self)
    }

    pub fn fulfillments(&self) -> FulfillmentProcessor<'_, S, B> {
        FulfillmentProcessor::new(self)
    }

    pub fn subscriptions(&self) -> SubscriptionLifecycle<'_, S, B> {
        SubscriptionLifecycle::new(self)
    }

    pub fn charges(&self) -> ChargeLifecycle<'_, S, B> {
        ChargeLifecycle::new(self)
    }
}
