//! Application State

use std::sync::Arc;

use commerce_core::{
    DbPool, InventoryLedger, OrderStore, SettlementCoordinator, TransactionLog,
};
use commerce_payments::GatewayRegistry;

use crate::config::AppConfig;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,

    pub pool: DbPool,

    /// Stock ledger with the configured oversell policy
    pub ledger: InventoryLedger,

    pub orders: OrderStore,

    pub transactions: TransactionLog,

    pub settlement: SettlementCoordinator,

    /// Configured payment providers
    pub gateways: Arc<GatewayRegistry>,
}

impl AppState {
    pub fn new(config: AppConfig, pool: DbPool, gateways: GatewayRegistry) -> Self {
        let ledger = InventoryLedger::new(config.allow_oversell);
        Self {
            orders: OrderStore::new(pool.clone(), ledger),
            transactions: TransactionLog::new(pool.clone()),
            settlement: SettlementCoordinator::new(pool.clone(), ledger),
            ledger,
            pool,
            config: Arc::new(config),
            gateways: Arc::new(gateways),
        }
    }
}
