//! Configuration loading from environment.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

use checkout_gateways::Route;
use checkout_types::Currency;
use checkout_gateways::providers::{
    BcaConfig, BriConfig, DanaConfig, LinkquConfig, MidtransConfig, PakailinkConfig, XenditConfig,
};

/// Which provider environment the clients talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayMode {
    Sandbox,
    Production,
}

impl FromStr for GatewayMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sandbox" => Ok(GatewayMode::Sandbox),
            "production" => Ok(GatewayMode::Production),
            other => anyhow::bail!("GATEWAY_MODE must be sandbox or production, got {}", other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Where paid orders are handed off.
#[derive(Debug, Clone)]
pub struct FulfillmentConfig {
    pub url: String,
    pub secret: Option<String>,
}

/// Provider sections; `None` when the provider's credentials are not set.
#[derive(Debug, Clone, Default)]
pub struct ProviderConfigs {
    pub bri: Option<BriConfig>,
    pub bca: Option<BcaConfig>,
    pub dana: Option<DanaConfig>,
    pub pakailink: Option<PakailinkConfig>,
    pub xendit: Option<XenditConfig>,
    pub midtrans: Option<MidtransConfig>,
    pub linkqu: Option<LinkquConfig>,
}

/// Application configuration.
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub public_base_url: Option<String>,
    pub gateway_mode: GatewayMode,
    pub health_check_interval: Duration,
    pub expiry_sweep_interval: Duration,
    pub expiry_grace: Duration,
    pub payment_expiry: Duration,
    pub wallet_currency: Currency,
    pub order_rate_limit_per_minute: u32,
    pub fulfillment: Option<FulfillmentConfig>,
    pub log_format: LogFormat,
    pub otlp_endpoint: Option<String>,
    pub providers: ProviderConfigs,
    /// `ROUTE_<CHANNEL>` overrides, applied over the default routing table.
    pub routes: Vec<(String, Route)>,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        let vars: Vec<(String, String)> = env::vars().collect();
        Self::from_lookup(|key| env::var(key).ok(), &vars)
    }

    /// Builds the configuration from `lookup`; `vars` is scanned for
    /// `ROUTE_` prefixed entries.
    pub fn from_lookup<F>(lookup: F, vars: &[(String, String)]) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let port = get("PORT")
            .unwrap_or_else(|| "3000".to_string())
            .parse::<u16>()
            .context("PORT must be a port number")?;
        let database_url =
            get("DATABASE_URL").unwrap_or_else(|| "sqlite://checkout.db?mode=rwc".to_string());
        let gateway_mode = get("GATEWAY_MODE")
            .map(|m| m.parse::<GatewayMode>())
            .transpose()?
            .unwrap_or(GatewayMode::Sandbox);
        let public_base_url = get("PUBLIC_BASE_URL").map(|u| u.trim_end_matches('/').to_string());

        let fulfillment = get("FULFILLMENT_URL").map(|url| FulfillmentConfig {
            url,
            secret: get("FULFILLMENT_SECRET"),
        });
        let log_format = match get("LOG_FORMAT").as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        let wallet_currency = get("WALLET_CURRENCY")
            .map(|c| c.parse::<Currency>())
            .transpose()
            .context("WALLET_CURRENCY must be a supported currency code")?
            .unwrap_or(Currency::IDR);

        let providers = ProviderConfigs::from_lookup(&get, gateway_mode, public_base_url.as_deref());
        let routes = route_overrides(vars)?;

        Ok(Self {
            port,
            database_url,
            public_base_url,
            gateway_mode,
            health_check_interval: secs(&get, "HEALTH_CHECK_INTERVAL_SECS", 60)?,
            expiry_sweep_interval: secs(&get, "EXPIRY_SWEEP_INTERVAL_SECS", 30)?,
            expiry_grace: secs(&get, "EXPIRY_GRACE_SECS", 3600)?,
            payment_expiry: secs(&get, "DEFAULT_PAYMENT_EXPIRY_MINS", 60)? * 60,
            wallet_currency,
            order_rate_limit_per_minute: get("ORDER_RATE_LIMIT_PER_MINUTE")
                .map(|v| v.parse::<u32>())
                .transpose()
                .context("ORDER_RATE_LIMIT_PER_MINUTE must be a number")?
                .unwrap_or(60),
            fulfillment,
            log_format,
            otlp_endpoint: get("OTEL_EXPORTER_OTLP_ENDPOINT"),
            providers,
            routes,
        })
    }
}

fn secs<F>(get: &F, key: &str, default: u64) -> anyhow::Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    let value = match get(key) {
        Some(v) => v
            .parse::<u64>()
            .with_context(|| format!("{} must be a whole number", key))?,
        None => default,
    };
    Ok(Duration::from_secs(value))
}

/// `ROUTE_VA_BRI=BRI_DIRECT,XENDIT` routes VA_BRI to BRI_DIRECT with XENDIT
/// as fallback.
fn route_overrides(vars: &[(String, String)]) -> anyhow::Result<Vec<(String, Route)>> {
    let mut routes = Vec::new();
    for (key, value) in vars {
        let Some(channel) = key.strip_prefix("ROUTE_") else {
            continue;
        };
        let mut parts = value.split(',').map(str::trim).filter(|p| !p.is_empty());
        let primary = parts
            .next()
            .with_context(|| format!("{} needs a gateway name", key))?;
        let fallback = parts.next().map(str::to_ascii_uppercase);
        routes.push((
            channel.to_ascii_uppercase(),
            Route::new(primary.to_ascii_uppercase(), fallback.as_deref()),
        ));
    }
    routes.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(routes)
}

// ─────────────────────────────────────────────────────────────────────────────
// Provider sections
// ─────────────────────────────────────────────────────────────────────────────

/// Production endpoints; sandbox endpoints are the clients' own defaults.
const PRODUCTION_URLS: [(&str, &str); 6] = [
    ("BRI", "https://partner.api.bri.co.id"),
    ("BCA", "https://api.bca.co.id"),
    ("DANA", "https://api.saas.dana.id"),
    ("PAKAILINK", "https://api.pakailink.id"),
    ("MIDTRANS", "https://api.midtrans.com"),
    ("LINKQU", "https://api.linkqu.id"),
];

impl ProviderConfigs {
    fn from_lookup<F>(get: &F, mode: GatewayMode, public_base_url: Option<&str>) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_url = |prefix: &str| {
            get(&format!("{}_BASE_URL", prefix)).unwrap_or_else(|| match mode {
                GatewayMode::Sandbox => String::new(),
                GatewayMode::Production => PRODUCTION_URLS
                    .iter()
                    .find(|(p, _)| *p == prefix)
                    .map(|(_, url)| url.to_string())
                    .unwrap_or_default(),
            })
        };
        let statuses = |prefix: &str| get(&format!("{}_STATUS_MAP", prefix));
        let path = |key: &str| get(key).map(PathBuf::from);
        let callback = |prefix: &str, gateway: &str| {
            get(&format!("{}_CALLBACK_URL", prefix))
                .or_else(|| public_base_url.map(|base| format!("{}/webhooks/{}", base, gateway)))
        };

        let bri = match (get("BRI_CLIENT_ID"), get("BRI_CLIENT_SECRET"), get("BRI_PARTNER_ID")) {
            (Some(client_id), Some(client_secret), Some(partner_id)) => Some(BriConfig {
                base_url: base_url("BRI"),
                client_id,
                client_secret,
                partner_id,
                private_key_pem: get("BRI_PRIVATE_KEY"),
                private_key_path: path("BRI_PRIVATE_KEY_PATH"),
                status_overrides: statuses("BRI"),
            }),
            _ => None,
        };

        let bca = match (get("BCA_CLIENT_ID"), get("BCA_CLIENT_SECRET")) {
            (Some(client_id), Some(client_secret)) => Some(BcaConfig {
                base_url: base_url("BCA"),
                client_id,
                client_secret,
                api_key: get("BCA_API_KEY").unwrap_or_default(),
                api_secret: get("BCA_API_SECRET").unwrap_or_default(),
                company_code: get("BCA_COMPANY_CODE").unwrap_or_default(),
                status_overrides: statuses("BCA"),
            }),
            _ => None,
        };

        let dana = match (get("DANA_PARTNER_ID"), get("DANA_MERCHANT_ID")) {
            (Some(partner_id), Some(merchant_id)) => Some(DanaConfig {
                base_url: base_url("DANA"),
                partner_id,
                merchant_id,
                shop_id: get("DANA_SHOP_ID"),
                channel_id: get("DANA_CHANNEL_ID").unwrap_or_else(|| "95221".to_string()),
                origin: get("DANA_ORIGIN").or_else(|| public_base_url.map(String::from)),
                private_key_pem: get("DANA_PRIVATE_KEY"),
                private_key_path: path("DANA_PRIVATE_KEY_PATH"),
                public_key_pem: get("DANA_PUBLIC_KEY"),
                public_key_path: path("DANA_PUBLIC_KEY_PATH"),
                callback_url: callback("DANA", "DANA_DIRECT"),
                return_url: get("DANA_RETURN_URL"),
                mcc: get("DANA_MCC").unwrap_or_else(|| "6012".to_string()),
                status_overrides: statuses("DANA"),
            }),
            _ => None,
        };

        let pakailink = match (
            get("PAKAILINK_CLIENT_KEY"),
            get("PAKAILINK_CLIENT_SECRET"),
            get("PAKAILINK_PARTNER_ID"),
        ) {
            (Some(client_key), Some(client_secret), Some(partner_id)) => Some(PakailinkConfig {
                base_url: base_url("PAKAILINK"),
                client_key,
                client_secret,
                partner_id,
                private_key_pem: get("PAKAILINK_PRIVATE_KEY"),
                private_key_path: path("PAKAILINK_PRIVATE_KEY_PATH"),
                callback_url: callback("PAKAILINK", "PAKAILINK"),
                status_overrides: statuses("PAKAILINK"),
            }),
            _ => None,
        };

        let xendit = get("XENDIT_SECRET_KEY").map(|secret_key| XenditConfig {
            base_url: get("XENDIT_BASE_URL").unwrap_or_default(),
            secret_key,
            callback_token: get("XENDIT_CALLBACK_TOKEN").unwrap_or_default(),
            status_overrides: statuses("XENDIT"),
        });

        let midtrans = get("MIDTRANS_SERVER_KEY").map(|server_key| MidtransConfig {
            base_url: base_url("MIDTRANS"),
            server_key,
            status_overrides: statuses("MIDTRANS"),
        });

        let linkqu = match (get("LINKQU_CLIENT_ID"), get("LINKQU_CLIENT_SECRET")) {
            (Some(client_id), Some(client_secret)) => Some(LinkquConfig {
                base_url: base_url("LINKQU"),
                client_id,
                client_secret,
                username: get("LINKQU_USERNAME").unwrap_or_default(),
                pin: get("LINKQU_PIN").unwrap_or_default(),
                status_overrides: statuses("LINKQU"),
            }),
            _ => None,
        };

        Self {
            bri,
            bca,
            dana,
            pakailink,
            xendit,
            midtrans,
            linkqu,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let map: HashMap<String, String> = vars.iter().cloned().collect();
        Config::from_lookup(|key| map.get(key).cloned(), &vars)
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.database_url, "sqlite://checkout.db?mode=rwc");
        assert_eq!(config.gateway_mode, GatewayMode::Sandbox);
        assert_eq!(config.expiry_sweep_interval, Duration::from_secs(30));
        assert_eq!(config.payment_expiry, Duration::from_secs(3600));
        assert_eq!(config.wallet_currency, Currency::IDR);
        assert_eq!(config.order_rate_limit_per_minute, 60);
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(config.fulfillment.is_none());
        assert!(config.providers.xendit.is_none());
        assert!(config.routes.is_empty());
    }

    #[test]
    fn test_wallet_currency() {
        let config = load(&[("WALLET_CURRENCY", "sgd")]).unwrap();
        assert_eq!(config.wallet_currency, Currency::SGD);
        assert!(load(&[("WALLET_CURRENCY", "XYZ")]).is_err());
    }

    #[test]
    fn test_provider_section_requires_credentials() {
        let config = load(&[("BRI_CLIENT_ID", "id"), ("MIDTRANS_SERVER_KEY", "SB-key")]).unwrap();
        assert!(config.providers.bri.is_none());
        let midtrans = config.providers.midtrans.unwrap();
        assert_eq!(midtrans.server_key, "SB-key");
        assert!(midtrans.base_url.is_empty());
    }

    #[test]
    fn test_production_mode_picks_production_urls() {
        let config = load(&[
            ("GATEWAY_MODE", "production"),
            ("MIDTRANS_SERVER_KEY", "key"),
            ("LINKQU_CLIENT_ID", "id"),
            ("LINKQU_CLIENT_SECRET", "secret"),
            ("LINKQU_BASE_URL", "https://linkqu.internal"),
        ])
        .unwrap();
        assert_eq!(
            config.providers.midtrans.unwrap().base_url,
            "https://api.midtrans.com"
        );
        assert_eq!(
            config.providers.linkqu.unwrap().base_url,
            "https://linkqu.internal"
        );
    }

    #[test]
    fn test_callback_url_derived_from_public_base() {
        let config = load(&[
            ("PUBLIC_BASE_URL", "https://shop.example.com/"),
            ("PAKAILINK_CLIENT_KEY", "k"),
            ("PAKAILINK_CLIENT_SECRET", "s"),
            ("PAKAILINK_PARTNER_ID", "p"),
        ])
        .unwrap();
        assert_eq!(
            config.providers.pakailink.unwrap().callback_url.as_deref(),
            Some("https://shop.example.com/webhooks/PAKAILINK")
        );
    }

    #[test]
    fn test_route_overrides() {
        let config = load(&[
            ("ROUTE_qris", "linkqu"),
            ("ROUTE_VA_BRI", "XENDIT, BRI_DIRECT"),
        ])
        .unwrap();
        assert_eq!(
            config.routes,
            vec![
                ("QRIS".to_string(), Route::new("LINKQU", None)),
                ("VA_BRI".to_string(), Route::new("XENDIT", Some("BRI_DIRECT"))),
            ]
        );
        assert!(load(&[("ROUTE_QRIS", " , ")]).is_err());
    }

    #[test]
    fn test_invalid_values_are_errors() {
        assert!(load(&[("GATEWAY_MODE", "staging")]).is_err());
        assert!(load(&[("EXPIRY_GRACE_SECS", "soon")]).is_err());
        assert!(load(&[("PORT", "http")]).is_err());
    }

    #[test]
    fn test_fulfillment_and_log_format() {
        let config = load(&[
            ("FULFILLMENT_URL", "https://fulfil.example.com/events"),
            ("FULFILLMENT_SECRET", "s3cret"),
            ("LOG_FORMAT", "json"),
        ])
        .unwrap();
        let fulfillment = config.fulfillment.unwrap();
        assert_eq!(fulfillment.secret.as_deref(), Some("s3cret"));
        assert_eq!(config.log_format, LogFormat::Json);
    }
}
