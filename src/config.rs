use crate::domain::commission::CommissionPolicy;
use chrono::Duration;

pub const DEFAULT_CURRENCY: &str = "EGP";
pub const DEFAULT_AUTO_RELEASE_HOURS: i64 = 72;
pub const PAYMOB_API_BASE: &str = "https://accept.paymob.com/api";

/// Business settings applied by the marketplace engine.
#[derive(Debug, Clone)]
pub struct MarketplaceConfig {
    pub commission: CommissionPolicy,
    /// How long after acceptance or job completion funds auto-release.
    pub auto_release_after: Duration,
    pub currency: String,
}

impl Default for MarketplaceConfig {
    fn default() -> Self {
        Self {
            commission: CommissionPolicy::default(),
            auto_release_after: Duration::hours(DEFAULT_AUTO_RELEASE_HOURS),
            currency: DEFAULT_CURRENCY.to_string(),
        }
    }
}

/// Credentials for the Paymob gateway. Unset values disable the calls that need them.
#[derive(Debug, Clone)]
pub struct PaymobConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    pub integration_id: Option<String>,
    pub iframe_id: Option<String>,
    pub hmac_secret: Option<String>,
}

impl Default for PaymobConfig {
    fn default() -> Self {
        Self {
            api_base: PAYMOB_API_BASE.to_string(),
            api_key: None,
            integration_id: None,
            iframe_id: None,
            hmac_secret: None,
        }
    }
}
