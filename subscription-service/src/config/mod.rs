//! Configuration for subscription-service.

use secrecy::Secret;
use serde::Deserialize;
use service_core::config::{self as core_config, get_env, is_production};
use service_core::error::AppError;

const DEFAULT_PRO_PRICE: i64 = 3_900;
const DEFAULT_ORDER_NAME: &str = "Pro 구독 (월 3,900원)";

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub toss: TossPaymentsConfig,
    pub plan: PlanConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TossPaymentsConfig {
    pub secret_key: Secret<String>,
    /// Handed to the browser widget; not used server side.
    pub client_key: String,
    pub webhook_secret: Secret<String>,
    pub api_base_url: String,
    pub request_timeout_secs: u64,
}

/// Fixed plan catalogue: one free tier and one paid tier.
#[derive(Debug, Clone, Deserialize)]
pub struct PlanConfig {
    pub pro_price: i64,
    pub pro_order_name: String,
    pub free_limit: i64,
    pub pro_limit: i64,
    pub pro_model: String,
    pub free_model: String,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            pro_price: DEFAULT_PRO_PRICE,
            pro_order_name: DEFAULT_ORDER_NAME.to_string(),
            free_limit: 1,
            pro_limit: 10,
            pro_model: "gemini-2.5-pro".to_string(),
            free_model: "gemini-2.5-flash".to_string(),
        }
    }
}

impl SubscriptionConfig {
    pub fn load() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        let is_prod = is_production();
        let defaults = PlanConfig::default();

        Ok(SubscriptionConfig {
            common,
            service_name: get_env("SERVICE_NAME", Some("subscription-service"), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: std::env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            database: DatabaseConfig {
                url: Secret::new(get_env("SUBSCRIPTION_DATABASE_URL", None, is_prod)?),
                max_connections: parse_env("SUBSCRIPTION_DB_MAX_CONNECTIONS", "10", is_prod)?,
                min_connections: parse_env("SUBSCRIPTION_DB_MIN_CONNECTIONS", "1", is_prod)?,
            },
            toss: TossPaymentsConfig {
                secret_key: Secret::new(get_env("TOSS_SECRET_KEY", None, is_prod)?),
                client_key: get_env("TOSS_CLIENT_KEY", None, is_prod)?,
                webhook_secret: Secret::new(get_env("TOSS_WEBHOOK_SECRET", None, is_prod)?),
                api_base_url: get_env(
                    "TOSS_API_BASE_URL",
                    Some("https://api.tosspayments.com/v1"),
                    is_prod,
                )?,
                request_timeout_secs: parse_env("TOSS_REQUEST_TIMEOUT_SECS", "10", is_prod)?,
            },
            plan: PlanConfig {
                pro_price: parse_env("PRO_PLAN_PRICE", &defaults.pro_price.to_string(), is_prod)?,
                pro_order_name: get_env(
                    "PRO_PLAN_ORDER_NAME",
                    Some(&defaults.pro_order_name),
                    is_prod,
                )?,
                free_limit: parse_env("FREE_TIER_LIMIT", &defaults.free_limit.to_string(), is_prod)?,
                pro_limit: parse_env("PRO_TIER_LIMIT", &defaults.pro_limit.to_string(), is_prod)?,
                pro_model: get_env("PRO_ANALYSIS_MODEL", Some(&defaults.pro_model), is_prod)?,
                free_model: get_env("FREE_ANALYSIS_MODEL", Some(&defaults.free_model), is_prod)?,
            },
        })
    }
}

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .parse()
        .map_err(|e| AppError::ConfigError(anyhow::anyhow!("{} is not valid: {}", key, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_defaults_match_the_catalogue() {
        let plan = PlanConfig::default();
        assert_eq!(plan.pro_price, 3_900);
        assert_eq!(plan.free_limit, 1);
        assert_eq!(plan.pro_limit, 10);
        assert_eq!(plan.pro_model, "gemini-2.5-pro");
        assert_eq!(plan.free_model, "gemini-2.5-flash");
    }

    #[test]
    fn parse_env_rejects_garbage() {
        std::env::set_var("SUBSCRIPTION_TEST_BAD_NUMBER", "ten");
        let result: Result<u32, _> = parse_env("SUBSCRIPTION_TEST_BAD_NUMBER", "10", false);
        assert!(result.is_err());
        std::env::remove_var("SUBSCRIPTION_TEST_BAD_NUMBER");
    }

    #[test]
    fn parse_env_falls_back_to_default() {
        let value: u64 = parse_env("SUBSCRIPTION_TEST_UNSET_NUMBER", "10", false).unwrap();
        assert_eq!(value, 10);
    }
}
