use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::time::Duration;
use url::Url;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: String,
    /// Externally reachable base URL; callback URLs are built from it.
    pub public_base_url: String,
    pub gateway_production_url: String,
    pub gateway_sandbox_url: String,
    pub gateway_timeout_secs: u64,
    pub form_deadline_secs: u64,
    pub capture_max_attempts: u32,
    pub capture_sweep_interval_secs: u64,
    pub api_key: Option<String>,
    pub log_format: LogFormat,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok(); // Load .env file if present

        let config = Config {
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()?,
            database_url: env::var("DATABASE_URL")?,
            public_base_url: env::var("PUBLIC_BASE_URL")?,
            gateway_production_url: env::var("GATEWAY_PRODUCTION_URL")?,
            gateway_sandbox_url: env::var("GATEWAY_SANDBOX_URL")?,
            gateway_timeout_secs: env::var("GATEWAY_TIMEOUT_SECS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()?,
            form_deadline_secs: env::var("FORM_DEADLINE_SECS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()?,
            capture_max_attempts: env::var("CAPTURE_MAX_ATTEMPTS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()?,
            capture_sweep_interval_secs: env::var("CAPTURE_SWEEP_INTERVAL_SECS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()?,
            api_key: env::var("API_KEY").ok().filter(|key| !key.trim().is_empty()),
            log_format: parse_log_format(env::var("LOG_FORMAT").ok().as_deref())?,
        };

        config.public_base_url()?;
        Ok(config)
    }

    pub fn public_base_url(&self) -> anyhow::Result<Url> {
        let url = Url::parse(&self.public_base_url)
            .map_err(|e| anyhow::anyhow!("PUBLIC_BASE_URL is not a valid URL: {}", e))?;
        if url.cannot_be_a_base() {
            anyhow::bail!("PUBLIC_BASE_URL must be an absolute http(s) URL");
        }
        Ok(url)
    }

    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway_timeout_secs)
    }

    pub fn form_deadline(&self) -> Duration {
        Duration::from_secs(self.form_deadline_secs)
    }

    pub fn capture_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.capture_sweep_interval_secs)
    }
}

fn parse_log_format(raw: Option<&str>) -> anyhow::Result<LogFormat> {
    match raw.map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(LogFormat::Text),
        Some(v) if v.is_empty() || v == "text" || v == "pretty" => Ok(LogFormat::Text),
        Some(v) if v == "json" => Ok(LogFormat::Json),
        Some(other) => anyhow::bail!("LOG_FORMAT must be 'text' or 'json', got '{}'", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(public_base_url: &str) -> Config {
        Config {
            server_port: 3000,
            database_url: "postgres://pay:pw@localhost/pay".to_string(),
            public_base_url: public_base_url.to_string(),
            gateway_production_url: "https://gw.example.com".to_string(),
            gateway_sandbox_url: "https://sandbox.gw.example.com".to_string(),
            gateway_timeout_secs: 5,
            form_deadline_secs: 10,
            capture_max_attempts: 5,
            capture_sweep_interval_secs: 300,
            api_key: None,
            log_format: LogFormat::Text,
        }
    }

    #[test]
    fn test_parse_log_format() {
        assert_eq!(parse_log_format(None).unwrap(), LogFormat::Text);
        assert_eq!(parse_log_format(Some("JSON")).unwrap(), LogFormat::Json);
        assert_eq!(parse_log_format(Some("")).unwrap(), LogFormat::Text);
        assert!(parse_log_format(Some("xml")).is_err());
    }

    #[test]
    fn test_public_base_url_must_be_absolute() {
        assert!(config("https://pay.example.com").public_base_url().is_ok());
        assert!(config("pay.example.com/callback").public_base_url().is_err());
        assert!(config("mailto:ops@example.com").public_base_url().is_err());
    }

    #[test]
    fn test_durations() {
        let config = config("https://pay.example.com");
        assert_eq!(config.gateway_timeout(), Duration::from_secs(5));
        assert_eq!(config.form_deadline(), Duration::from_secs(10));
    }
}
