use crate::{Error, ErrorKind, Result, truncate_long};
use std::{env, time::Duration};

pub const ENV_MAX_OPEN_CONNS: &str = "FRAMELESS_DB_MAX_OPEN_CONNS";
pub const ENV_MAX_IDLE_CONNS: &str = "FRAMELESS_DB_MAX_IDLE_CONNS";
pub const ENV_CONN_MAX_LIFETIME: &str = "FRAMELESS_DB_CONN_MAX_LIFETIME";

/// Connection pool sizing, handed to [`crate::Driver::connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_open: usize,
    pub max_idle: usize,
    pub max_lifetime: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_open: 10,
            max_idle: 10,
            max_lifetime: Duration::from_secs(180),
        }
    }
}

impl PoolConfig {
    /// Defaults overridden by the `FRAMELESS_DB_*` environment variables that are set.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(v) = lookup(ENV_MAX_OPEN_CONNS) {
            config.max_open = parse_count(ENV_MAX_OPEN_CONNS, &v)?;
        }
        if let Some(v) = lookup(ENV_MAX_IDLE_CONNS) {
            config.max_idle = parse_count(ENV_MAX_IDLE_CONNS, &v)?;
        }
        if let Some(v) = lookup(ENV_CONN_MAX_LIFETIME) {
            config.max_lifetime = parse_duration(&v).map_err(|e| {
                e.context(format!("Invalid value for {ENV_CONN_MAX_LIFETIME}"))
            })?;
        }
        if config.max_open == 0 {
            return Err(Error::msg(format!("{ENV_MAX_OPEN_CONNS} must be positive")));
        }
        config.max_idle = config.max_idle.min(config.max_open);
        Ok(config)
    }
}

fn parse_count(name: &str, value: &str) -> Result<usize> {
    value
        .trim()
        .parse()
        .map_err(|e| Error::new(e).context(format!("Invalid value `{value}` for {name}")))
}

/// Parse durations written like `90s`, `5m`, `1h 30m`, `250ms` or a plain number of seconds.
pub fn parse_duration(value: &str) -> Result<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Ok(Duration::from_secs(seconds));
    }
    humantime::parse_duration(value).map_err(|e| {
        Error::new(e)
            .context(ErrorKind::Validation)
            .context(format!("Cannot parse duration `{}`", truncate_long!(value)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorExt;
    use std::collections::HashMap;

    #[test]
    fn defaults() {
        let config = PoolConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, PoolConfig::default());
        assert_eq!(config.max_lifetime, Duration::from_secs(180));
    }

    #[test]
    fn overrides() {
        let vars = HashMap::from([
            (ENV_MAX_OPEN_CONNS, "4"),
            (ENV_MAX_IDLE_CONNS, "8"),
            (ENV_CONN_MAX_LIFETIME, "1m 30s"),
        ]);
        let config = PoolConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.max_open, 4);
        assert_eq!(config.max_idle, 4);
        assert_eq!(config.max_lifetime, Duration::from_secs(90));
    }

    #[test]
    fn invalid_values() {
        assert!(PoolConfig::from_lookup(|k| (k == ENV_MAX_OPEN_CONNS).then(|| "x".into())).is_err());
        assert!(PoolConfig::from_lookup(|k| (k == ENV_MAX_OPEN_CONNS).then(|| "0".into())).is_err());
        assert!(parse_duration("10parsecs").is_err());
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration(" 45 ").unwrap(), Duration::from_secs(45));
    }

    #[test]
    fn oversized_durations_are_errors() {
        let result = parse_duration("99999999999999999999999h");
        assert!(result.is_kind(ErrorKind::Validation));
        assert!(parse_duration("").is_kind(ErrorKind::Validation));
        assert!(
            PoolConfig::from_lookup(|k| {
                (k == ENV_CONN_MAX_LIFETIME).then(|| "99999999999999999999999h".into())
            })
            .is_kind(ErrorKind::Validation)
        );
    }
}
