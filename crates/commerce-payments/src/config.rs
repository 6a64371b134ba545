//! Provider credentials from the environment

use crate::gateway::{ConektaConfig, MercadoPagoConfig, MockConfig, PayPalConfig, StripeConfig};

/// Non-empty, trimmed environment variable
pub(crate) fn env_opt(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Which providers this deployment can talk to
///
/// A provider whose credentials are absent stays `None` and is simply not
/// registered; requests naming it fail with `NotConfigured`.
#[derive(Clone, Default)]
pub struct PaymentsConfig {
    pub stripe: Option<StripeConfig>,
    pub mercadopago: Option<MercadoPagoConfig>,
    pub paypal: Option<PayPalConfig>,
    pub conekta: Option<ConektaConfig>,
    pub mock: Option<MockConfig>,
}

impl PaymentsConfig {
    pub fn from_env() -> Self {
        Self {
            stripe: StripeConfig::from_env(),
            mercadopago: MercadoPagoConfig::from_env(),
            paypal: PayPalConfig::from_env(),
            conekta: ConektaConfig::from_env(),
            mock: MockConfig::from_env(),
        }
    }

    /// Only the in-process mock, for local runs and tests
    pub fn mock_only() -> Self {
        Self {
            mock: Some(MockConfig::default()),
            ..Self::default()
        }
    }
}
