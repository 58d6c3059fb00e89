use anyhow::Context;
use serde::{Deserialize, Serialize};

pub const ENV_POOL_FETCH_MAX: &str = "UREGEX_POOL_FETCH_MAX";
pub const ENV_PANIC_ON_LEAK: &str = "UREGEX_PANIC_ON_LEAK";

pub const DEFAULT_FETCH_MAX: u64 = 128;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    /// Acquisitions served by one group before a fresh group takes over.
    pub fetch_max: u64,
    /// Panic when a context is dropped without being returned.
    pub panic_on_leak: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            fetch_max: DEFAULT_FETCH_MAX,
            panic_on_leak: cfg!(debug_assertions),
        }
    }
}

fn parse_bool_env(name: &str, raw: &str) -> anyhow::Result<bool> {
    match raw.trim() {
        "1" | "true" | "TRUE" | "yes" | "YES" => Ok(true),
        "0" | "false" | "FALSE" | "no" | "NO" => Ok(false),
        other => anyhow::bail!(
            "invalid environment variable {name}={other:?} (expected one of: 1, 0, true, false, yes, no)"
        ),
    }
}

fn parse_fetch_max_env(raw: &str) -> anyhow::Result<u64> {
    let v = raw
        .trim()
        .parse::<u64>()
        .with_context(|| format!("invalid environment variable {ENV_POOL_FETCH_MAX}={raw:?}"))?;
    if v == 0 {
        anyhow::bail!("invalid environment variable {ENV_POOL_FETCH_MAX}={raw:?} (must be >= 1)");
    }
    Ok(v)
}

impl PoolConfig {
    pub fn from_env() -> anyhow::Result<PoolConfig> {
        let fetch_max = std::env::var(ENV_POOL_FETCH_MAX).ok();
        let panic_on_leak = std::env::var(ENV_PANIC_ON_LEAK).ok();
        Self::from_env_values(fetch_max.as_deref(), panic_on_leak.as_deref())
    }

    fn from_env_values(
        fetch_max: Option<&str>,
        panic_on_leak: Option<&str>,
    ) -> anyhow::Result<PoolConfig> {
        let mut cfg = PoolConfig::default();
        if let Some(raw) = fetch_max {
            cfg.fetch_max = parse_fetch_max_env(raw)?;
        }
        if let Some(raw) = panic_on_leak {
            cfg.panic_on_leak = parse_bool_env(ENV_PANIC_ON_LEAK, raw)?;
        }
        Ok(cfg)
    }

    pub fn from_json(text: &str) -> anyhow::Result<PoolConfig> {
        let cfg: PoolConfig = serde_json::from_str(text).context("parse pool config JSON")?;
        if cfg.fetch_max == 0 {
            anyhow::bail!("pool config: fetch_max must be >= 1");
        }
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_values_override_defaults() {
        let cfg = PoolConfig::from_env_values(None, None).unwrap();
        assert_eq!(cfg, PoolConfig::default());

        let cfg = PoolConfig::from_env_values(Some(" 7 "), Some("no")).unwrap();
        assert_eq!(cfg.fetch_max, 7);
        assert!(!cfg.panic_on_leak);

        let cfg = PoolConfig::from_env_values(None, Some("YES")).unwrap();
        assert!(cfg.panic_on_leak);
    }

    #[test]
    fn env_values_are_validated() {
        let err = PoolConfig::from_env_values(Some("0"), None).unwrap_err();
        assert!(format!("{err:#}").contains(ENV_POOL_FETCH_MAX));
        let err = PoolConfig::from_env_values(Some("lots"), None).unwrap_err();
        assert!(format!("{err:#}").contains(ENV_POOL_FETCH_MAX));
        let err = PoolConfig::from_env_values(None, Some("maybe")).unwrap_err();
        assert!(format!("{err:#}").contains(ENV_PANIC_ON_LEAK));
    }

    #[test]
    fn json_uses_defaults_and_rejects_unknown_fields() {
        let cfg = PoolConfig::from_json(r#"{"fetch_max": 4}"#).unwrap();
        assert_eq!(cfg.fetch_max, 4);
        assert_eq!(cfg.panic_on_leak, cfg!(debug_assertions));

        assert!(PoolConfig::from_json(r#"{"fetch_max": 4, "extra": 1}"#).is_err());
        assert!(PoolConfig::from_json(r#"{"fetch_max": 0}"#).is_err());
    }
}
