use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Process configuration, read once at startup from `SLOTGUARD_*` variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    /// JSON staff/service directory. Empty directory when unset.
    pub directory: Option<PathBuf>,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub booking_timeout: Duration,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 7450,
            data_dir: PathBuf::from("./data"),
            directory: None,
            max_connections: 256,
            compact_threshold: 1000,
            booking_timeout: Duration::from_millis(5000),
            metrics_port: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unset keys fall back to defaults; set but
    /// unparseable keys are an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let defaults = Self::default();
        let timeout_ms: u64 = parse(&lookup, "SLOTGUARD_BOOKING_TIMEOUT_MS")?
            .unwrap_or(defaults.booking_timeout.as_millis() as u64);
        let max_connections =
            parse(&lookup, "SLOTGUARD_MAX_CONNECTIONS")?.unwrap_or(defaults.max_connections);
        if max_connections == 0 {
            return Err("SLOTGUARD_MAX_CONNECTIONS must be at least 1".into());
        }

        Ok(Self {
            bind: lookup("SLOTGUARD_BIND").unwrap_or(defaults.bind),
            port: parse(&lookup, "SLOTGUARD_PORT")?.unwrap_or(defaults.port),
            data_dir: lookup("SLOTGUARD_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            directory: lookup("SLOTGUARD_DIRECTORY").map(PathBuf::from),
            max_connections,
            compact_threshold: parse(&lookup, "SLOTGUARD_COMPACT_THRESHOLD")?
                .unwrap_or(defaults.compact_threshold),
            booking_timeout: Duration::from_millis(timeout_ms),
            metrics_port: parse(&lookup, "SLOTGUARD_METRICS_PORT")?,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>, String>
where
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| format!("{key}={raw}: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.addr(), "0.0.0.0:7450");
    }

    #[test]
    fn overrides_are_applied() {
        let config = Config::from_lookup(lookup(&[
            ("SLOTGUARD_BIND", "127.0.0.1"),
            ("SLOTGUARD_PORT", "9000"),
            ("SLOTGUARD_DIRECTORY", "/etc/salon.json"),
            ("SLOTGUARD_BOOKING_TIMEOUT_MS", "250"),
            ("SLOTGUARD_METRICS_PORT", "9100"),
        ]))
        .unwrap();
        assert_eq!(config.addr(), "127.0.0.1:9000");
        assert_eq!(config.directory, Some(PathBuf::from("/etc/salon.json")));
        assert_eq!(config.booking_timeout, Duration::from_millis(250));
        assert_eq!(config.metrics_port, Some(9100));
        assert_eq!(config.max_connections, 256);
    }

    #[test]
    fn bad_values_are_rejected() {
        let err = Config::from_lookup(lookup(&[("SLOTGUARD_PORT", "http")])).unwrap_err();
        assert!(err.contains("SLOTGUARD_PORT"));
        assert!(Config::from_lookup(lookup(&[("SLOTGUARD_MAX_CONNECTIONS", "0")])).is_err());
    }
}
