use std::env;

use anyhow::{anyhow, Context, Result};

use crate::analysis::{
    HttpAnalysisConfig, DEFAULT_ANALYZE_PATH, DEFAULT_API_BASE_URL, DEFAULT_REQUEST_TIMEOUT_MS,
};
use crate::cache::{DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL_MS};
use crate::notify::DEFAULT_OUTBOX_CAPACITY;
use crate::outcome::RiskSet;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub analysis: HttpAnalysisConfig,
    pub cache_ttl_ms: u64,
    pub cache_capacity: usize,
    pub risk_statuses: RiskSet,
    pub outbox_capacity: usize,
    pub max_request_bytes: Option<usize>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            analysis: HttpAnalysisConfig::default(),
            cache_ttl_ms: DEFAULT_CACHE_TTL_MS,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            risk_statuses: RiskSet::default(),
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
            max_request_bytes: None,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let base_url = env::var("SAFESURF_API_BASE_URL")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());
        let parsed = url::Url::parse(&base_url)
            .with_context(|| format!("SAFESURF_API_BASE_URL '{}' is not a valid URL", base_url))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(anyhow!("SAFESURF_API_BASE_URL must use http or https"));
        }

        let analyze_path = env::var("SAFESURF_ANALYZE_PATH")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_ANALYZE_PATH.to_string());

        let bearer_token = env::var("SAFESURF_API_TOKEN")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let timeout_ms = parse_positive_u64("SAFESURF_REQUEST_TIMEOUT_MS")?
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS);
        let cache_ttl_ms = parse_optional_u64("SAFESURF_CACHE_TTL_MS")?.unwrap_or(DEFAULT_CACHE_TTL_MS);
        let cache_capacity = parse_positive_u64("SAFESURF_CACHE_CAPACITY")?
            .map(|v| v as usize)
            .unwrap_or(DEFAULT_CACHE_CAPACITY);
        let outbox_capacity = parse_positive_u64("SAFESURF_OUTBOX_CAPACITY")?
            .map(|v| v as usize)
            .unwrap_or(DEFAULT_OUTBOX_CAPACITY);
        let max_request_bytes =
            parse_positive_u64("SAFESURF_MAX_REQUEST_BYTES")?.map(|v| v as usize);

        let risk_statuses = match env::var("SAFESURF_RISK_STATUSES") {
            Ok(raw) if !raw.trim().is_empty() => RiskSet::parse(&raw)
                .map_err(|e| anyhow!("SAFESURF_RISK_STATUSES: {}", e))?,
            Ok(_) => RiskSet::default(),
            Err(env::VarError::NotPresent) => RiskSet::default(),
            Err(err) => return Err(err.into()),
        };

        Ok(Self {
            analysis: HttpAnalysisConfig {
                base_url,
                analyze_path,
                timeout_ms,
                bearer_token,
            },
            cache_ttl_ms,
            cache_capacity,
            risk_statuses,
            outbox_capacity,
            max_request_bytes,
        })
    }
}

fn parse_optional_u64(var: &str) -> Result<Option<u64>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a non-negative integer", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse_positive_u64(var: &str) -> Result<Option<u64>> {
    match parse_optional_u64(var)? {
        Some(0) => Err(anyhow!("{} must be greater than zero", var)),
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::Status;
    use once_cell::sync::Lazy;
    use std::sync::Mutex;

    static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    const VARS: &[&str] = &[
        "SAFESURF_API_BASE_URL",
        "SAFESURF_ANALYZE_PATH",
        "SAFESURF_API_TOKEN",
        "SAFESURF_REQUEST_TIMEOUT_MS",
        "SAFESURF_CACHE_TTL_MS",
        "SAFESURF_CACHE_CAPACITY",
        "SAFESURF_OUTBOX_CAPACITY",
        "SAFESURF_MAX_REQUEST_BYTES",
        "SAFESURF_RISK_STATUSES",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn parses_environment_defaults() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();

        let cfg = AppConfig::from_env().unwrap();
        assert_eq!(cfg.analysis.endpoint(), "http://localhost:8000/api/analyze");
        assert_eq!(cfg.analysis.timeout_ms, 4_000);
        assert!(cfg.analysis.bearer_token.is_none());
        assert_eq!(cfg.cache_ttl_ms, 300_000);
        assert_eq!(cfg.cache_capacity, 100);
        assert_eq!(cfg.risk_statuses, RiskSet::default());
        assert!(cfg.max_request_bytes.is_none());
    }

    #[test]
    fn parses_full_configuration() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();
        std::env::set_var("SAFESURF_API_BASE_URL", "https://safesurf.local/");
        std::env::set_var("SAFESURF_ANALYZE_PATH", "/v2/analyze");
        std::env::set_var("SAFESURF_API_TOKEN", "secret");
        std::env::set_var("SAFESURF_REQUEST_TIMEOUT_MS", "1500");
        std::env::set_var("SAFESURF_CACHE_TTL_MS", "60000");
        std::env::set_var("SAFESURF_CACHE_CAPACITY", "10");
        std::env::set_var("SAFESURF_OUTBOX_CAPACITY", "4");
        std::env::set_var("SAFESURF_MAX_REQUEST_BYTES", "2048");
        std::env::set_var("SAFESURF_RISK_STATUSES", "phishing");

        let cfg = AppConfig::from_env().unwrap();
        assert_eq!(cfg.analysis.endpoint(), "https://safesurf.local/v2/analyze");
        assert_eq!(cfg.analysis.bearer_token.as_deref(), Some("secret"));
        assert_eq!(cfg.analysis.timeout_ms, 1_500);
        assert_eq!(cfg.cache_ttl_ms, 60_000);
        assert_eq!(cfg.cache_capacity, 10);
        assert_eq!(cfg.outbox_capacity, 4);
        assert_eq!(cfg.max_request_bytes, Some(2048));
        assert!(cfg.risk_statuses.contains(Status::Phishing));
        assert!(!cfg.risk_statuses.contains(Status::Suspicious));

        clear_env();
    }

    #[test]
    fn rejects_invalid_values() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();

        std::env::set_var("SAFESURF_CACHE_CAPACITY", "0");
        let err = AppConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("SAFESURF_CACHE_CAPACITY"));
        clear_env();

        std::env::set_var("SAFESURF_REQUEST_TIMEOUT_MS", "soon");
        let err = AppConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("SAFESURF_REQUEST_TIMEOUT_MS"));
        clear_env();

        std::env::set_var("SAFESURF_RISK_STATUSES", "phishing,scary");
        let err = AppConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("SAFESURF_RISK_STATUSES"));
        clear_env();

        for bad in ["localhost:8000", "://nope"] {
            std::env::set_var("SAFESURF_API_BASE_URL", bad);
            let err = AppConfig::from_env().unwrap_err();
            assert!(err.to_string().contains("SAFESURF_API_BASE_URL"), "{bad}");
        }
        clear_env();
    }
}
