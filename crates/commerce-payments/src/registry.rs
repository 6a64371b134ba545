//! Provider name -> gateway binding

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::PaymentsConfig;
use crate::error::{PaymentError, Result};
use crate::gateway::{
    ConektaGateway, MercadoPagoGateway, MockGateway, PayPalGateway, PaymentGateway, Provider,
    StripeGateway,
};

/// Configured gateways, shared across requests
#[derive(Clone, Default)]
pub struct GatewayRegistry {
    gateways: HashMap<Provider, Arc<dyn PaymentGateway>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every provider that has credentials
    pub fn from_config(config: &PaymentsConfig) -> Result<Self> {
        let mut registry = Self::new();

        if let Some(stripe) = &config.stripe {
            registry.register(Arc::new(StripeGateway::new(stripe)?));
        }
        if let Some(mercadopago) = &config.mercadopago {
            registry.register(Arc::new(MercadoPagoGateway::new(mercadopago.clone())?));
        }
        if let Some(paypal) = &config.paypal {
            registry.register(Arc::new(PayPalGateway::new(paypal.clone())?));
        }
        if let Some(conekta) = &config.conekta {
            registry.register(Arc::new(ConektaGateway::new(conekta.clone())?));
        }
        if let Some(mock) = &config.mock {
            tracing::warn!("Mock payment gateway enabled");
            registry.register(Arc::new(MockGateway::new(mock.clone())?));
        }

        tracing::info!(providers = ?registry.providers(), "Payment gateways configured");
        Ok(registry)
    }

    /// Add or replace the binding for the gateway's provider
    pub fn register(&mut self, gateway: Arc<dyn PaymentGateway>) {
        self.gateways.insert(gateway.provider(), gateway);
    }

    pub fn get(&self, provider: Provider) -> Result<Arc<dyn PaymentGateway>> {
        self.gateways
            .get(&provider)
            .cloned()
            .ok_or_else(|| PaymentError::NotConfigured(provider.to_string()))
    }

    /// Look up by path segment (`/payments/{provider}/...`)
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn PaymentGateway>> {
        self.get(name.parse()?)
    }

    pub fn providers(&self) -> Vec<Provider> {
        let mut providers: Vec<_> = self.gateways.keys().copied().collect();
        providers.sort();
        providers
    }
}
