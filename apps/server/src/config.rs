use anyhow::Context;
use chrono_tz::Tz;
use std::time::Duration;

use crate::time::DEFAULT_BUSINESS_TZ;

/// Email delivery through the Resend HTTP API.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub api_key: String,
    pub from: String,
}

/// WhatsApp delivery through the Meta Cloud API.
#[derive(Debug, Clone)]
pub struct WhatsAppConfig {
    pub token: String,
    pub phone_number_id: String,
}

/// Runtime configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: String,
    /// Base URL used for cancellation links and provider callbacks.
    pub public_base_url: String,
    /// Frontend origin allowed by CORS. `None` allows any origin.
    pub webapp_url: Option<String>,
    /// Secret used to sign deposit callback URLs.
    pub webhook_secret: Option<String>,
    /// Platform account token, used for subscription billing webhooks.
    pub mp_platform_access_token: Option<String>,
    pub mp_api_base: String,
    pub currency: String,
    pub business_tz: Tz,
    pub past_slot_buffer_min: u32,
    pub slot_step_min: u32,
    pub provider_timeout: Duration,
    pub email: Option<EmailConfig>,
    pub whatsapp: Option<WhatsAppConfig>,
    pub ops_alert_webhook_url: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from any key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let business_tz = match get("BUSINESS_TIMEZONE") {
            Some(name) => name
                .parse::<Tz>()
                .map_err(|e| anyhow::anyhow!("BUSINESS_TIMEZONE {name:?} is invalid: {e}"))?,
            None => DEFAULT_BUSINESS_TZ,
        };

        let past_slot_buffer_min = parse_or(get("PAST_SLOT_BUFFER_MIN"), 0, "PAST_SLOT_BUFFER_MIN")?;
        let slot_step_min = parse_or(get("SLOT_STEP_MIN"), 30, "SLOT_STEP_MIN")?;
        if slot_step_min == 0 {
            anyhow::bail!("SLOT_STEP_MIN must be greater than zero");
        }
        let timeout_secs: u64 = parse_or(get("PROVIDER_TIMEOUT_SECS"), 15, "PROVIDER_TIMEOUT_SECS")?;

        let email = match (get("RESEND_API_KEY"), get("EMAIL_FROM")) {
            (Some(api_key), Some(from)) => Some(EmailConfig { api_key, from }),
            _ => None,
        };
        let whatsapp = match (get("WHATSAPP_TOKEN"), get("WHATSAPP_PHONE_ID")) {
            (Some(token), Some(phone_number_id)) => Some(WhatsAppConfig {
                token,
                phone_number_id,
            }),
            _ => None,
        };

        Ok(Self {
            database_url: get("DATABASE_URL").unwrap_or_else(|| "sqlite:turnera.db?mode=rwc".into()),
            host: get("HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: get("PORT").unwrap_or_else(|| "3000".into()),
            public_base_url: get("PUBLIC_BASE_URL")
                .unwrap_or_else(|| "http://localhost:3000".into())
                .trim_end_matches('/')
                .to_string(),
            webapp_url: get("WEBAPP_URL"),
            webhook_secret: get("WEBHOOK_SECRET"),
            mp_platform_access_token: get("MP_PLATFORM_ACCESS_TOKEN"),
            mp_api_base: get("MP_API_BASE")
                .unwrap_or_else(|| "https://api.mercadopago.com".into())
                .trim_end_matches('/')
                .to_string(),
            currency: get("CURRENCY").unwrap_or_else(|| "ARS".into()),
            business_tz,
            past_slot_buffer_min,
            slot_step_min,
            provider_timeout: Duration::from_secs(timeout_secs),
            email,
            whatsapp,
            ops_alert_webhook_url: get("OPS_ALERT_WEBHOOK_URL"),
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_or<T>(value: Option<String>, default: T, key: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match value {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} must be a number, got {raw:?}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> anyhow::Result<Config> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.bind_addr(), "0.0.0.0:3000");
        assert_eq!(config.business_tz, DEFAULT_BUSINESS_TZ);
        assert_eq!(config.past_slot_buffer_min, 0);
        assert_eq!(config.slot_step_min, 30);
        assert!(config.webhook_secret.is_none());
        assert!(config.email.is_none());
        assert_eq!(config.currency, "ARS");
    }

    #[test]
    fn test_empty_values_are_unset() {
        let config = config_from(&[("WEBHOOK_SECRET", "  "), ("WEBAPP_URL", "")]).unwrap();
        assert!(config.webhook_secret.is_none());
        assert!(config.webapp_url.is_none());
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let config = config_from(&[("PUBLIC_BASE_URL", "https://turnos.example.com/")]).unwrap();
        assert_eq!(config.public_base_url, "https://turnos.example.com");
    }

    #[test]
    fn test_timezone_parsed() {
        let config = config_from(&[("BUSINESS_TIMEZONE", "America/Montevideo")]).unwrap();
        assert_eq!(config.business_tz, chrono_tz::America::Montevideo);
    }

    #[test]
    fn test_invalid_timezone_rejected() {
        assert!(config_from(&[("BUSINESS_TIMEZONE", "Mars/Olympus")]).is_err());
    }

    #[test]
    fn test_invalid_number_rejected() {
        assert!(config_from(&[("PAST_SLOT_BUFFER_MIN", "soon")]).is_err());
        assert!(config_from(&[("SLOT_STEP_MIN", "0")]).is_err());
    }

    #[test]
    fn test_channels_need_both_values() {
        let config = config_from(&[("RESEND_API_KEY", "re_123")]).unwrap();
        assert!(config.email.is_none());

        let config = config_from(&[
            ("WHATSAPP_TOKEN", "tok"),
            ("WHATSAPP_PHONE_ID", "555"),
        ])
        .unwrap();
        assert_eq!(config.whatsapp.unwrap().phone_number_id, "555");
    }
}
