use anyhow::{Context, Result};
use reqwest::Url;
use std::collections::HashMap;
use std::env;

/// Configuration key holding the base URL of the greeting service.
pub const GREETING_SERVICE_URL_KEY: &str = "GREETING_SERVICE_URL";
pub const DEFAULT_GREETING_SERVICE_URL: &str = "http://localhost:8080/";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub greeting_service_url: Url,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`AppConfig::from_env`], but keys present in `overrides` win
    /// over the process environment.
    pub fn from_env_with_overrides(overrides: &HashMap<String, String>) -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| overrides.get(key).cloned().or_else(|| env::var(key).ok()))
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("APP_HOST").unwrap_or_else(|| "0.0.0.0".to_string());

        let port = lookup("APP_PORT")
            .unwrap_or_else(|| "8080".to_string())
            .parse::<u16>()
            .context("APP_PORT must be a valid u16")?;

        let raw_url = lookup(GREETING_SERVICE_URL_KEY)
            .unwrap_or_else(|| DEFAULT_GREETING_SERVICE_URL.to_string());
        let greeting_service_url = parse_base_url(&raw_url)
            .with_context(|| format!("{GREETING_SERVICE_URL_KEY} must be an absolute URL"))?;

        Ok(Self {
            host,
            port,
            greeting_service_url,
        })
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Parses a base URL and makes sure it ends with `/`, so that relative
/// joins append to its path instead of replacing the last segment.
pub fn parse_base_url(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw.trim()).with_context(|| format!("invalid URL `{raw}`"))?;
    if url.cannot_be_a_base() {
        anyhow::bail!("`{raw}` cannot be used as a base URL");
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = AppConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8080);
        assert_eq!(
            config.greeting_service_url.as_str(),
            DEFAULT_GREETING_SERVICE_URL
        );
        assert_eq!(config.address(), "0.0.0.0:8080");
    }

    #[test]
    fn greeting_url_is_overridable() {
        let config = AppConfig::from_lookup(lookup_from(&[
            (GREETING_SERVICE_URL_KEY, "http://127.0.0.1:41234"),
            ("APP_PORT", "9090"),
        ]))
        .unwrap();

        assert_eq!(config.port, 9090);
        assert_eq!(
            config.greeting_service_url.as_str(),
            "http://127.0.0.1:41234/"
        );
    }

    #[test]
    fn invalid_port_is_rejected() {
        let err = AppConfig::from_lookup(lookup_from(&[("APP_PORT", "eighty")])).unwrap_err();
        assert!(err.to_string().contains("APP_PORT"));
    }

    #[test]
    fn invalid_greeting_url_is_rejected() {
        let err = AppConfig::from_lookup(lookup_from(&[(GREETING_SERVICE_URL_KEY, "not a url")]))
            .unwrap_err();
        assert!(err.to_string().contains(GREETING_SERVICE_URL_KEY));
    }

    #[test]
    fn base_url_keeps_nested_path() {
        let url = parse_base_url("http://example.test/api/v1").unwrap();
        assert_eq!(url.join("helloext").unwrap().as_str(), "http://example.test/api/v1/helloext");
    }

    #[test]
    fn explicit_overrides_win_over_environment() {
        let mut overrides = HashMap::new();
        overrides.insert(
            GREETING_SERVICE_URL_KEY.to_string(),
            "http://127.0.0.1:5555/".to_string(),
        );
        let config = AppConfig::from_env_with_overrides(&overrides).unwrap();
        assert_eq!(config.greeting_service_url.as_str(), "http://127.0.0.1:5555/");
    }
}
