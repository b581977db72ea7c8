//! Runtime configuration from the process environment, optionally seeded
//! from a `.env` file.

use log::debug;
use rand::Rng;
use std::path::Path;
use std::time::Duration;

use crate::hub::{DEFAULT_QUICK_VETO_DURATION_MINS, HubConfig};

pub const DEFAULT_SCAN_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct Config {
    pub username: String,
    pub password: String,
    /// Identifies this client towards the API; random per run when unset.
    pub smartphone_id: String,
    /// Facility to control. The first facility of the account when unset.
    pub serial_number: Option<String>,
    /// Refresh throttle window and poll cadence.
    pub scan_interval: Duration,
    /// Default quick veto duration in minutes.
    pub quick_veto_duration: u32,
    pub http_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let username = non_empty("MULTIMATIC_USERNAME").ok_or("Missing MULTIMATIC_USERNAME")?;
        let password = lookup("MULTIMATIC_PASSWORD")
            .filter(|v| !v.is_empty())
            .ok_or("Missing MULTIMATIC_PASSWORD")?;

        let smartphone_id = match non_empty("MULTIMATIC_SMARTPHONE_ID") {
            Some(id) => id,
            None => {
                let id = random_smartphone_id();
                debug!("No MULTIMATIC_SMARTPHONE_ID set, using {}", id);
                id
            }
        };

        let scan_secs = parse_number(&non_empty, "SCAN_INTERVAL_SECS", DEFAULT_SCAN_INTERVAL_SECS)?;
        if scan_secs == 0 {
            return Err("SCAN_INTERVAL_SECS must be greater than 0".to_string());
        }
        let quick_veto_duration = parse_number(&non_empty, "QUICK_VETO_DURATION_MINS", DEFAULT_QUICK_VETO_DURATION_MINS)?;
        if quick_veto_duration == 0 {
            return Err("QUICK_VETO_DURATION_MINS must be greater than 0".to_string());
        }
        let timeout_secs = parse_number(&non_empty, "HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS)?;

        Ok(Config {
            username,
            password,
            smartphone_id,
            serial_number: non_empty("MULTIMATIC_SERIAL_NUMBER"),
            scan_interval: Duration::from_secs(scan_secs),
            quick_veto_duration,
            http_timeout: Duration::from_secs(timeout_secs),
        })
    }

    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            scan_interval: self.scan_interval,
            quick_veto_duration: self.quick_veto_duration,
        }
    }
}

fn parse_number<T, F>(non_empty: &F, key: &str, default: T) -> Result<T, String>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match non_empty(key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|_| format!("{} must be a non-negative integer, got {:?}", key, raw)),
        None => Ok(default),
    }
}

fn random_smartphone_id() -> String {
    let n: u64 = rand::rng().random();
    format!("multimatic-hub-{:016x}", n)
}

// =====================
// .env loading
// =====================

/// Loads `KEY=value` lines from `path` into the process environment.
/// Variables already present in the environment win.
pub fn load_env_file(path: &Path) -> Result<(), String> {
    let content = std::fs::read_to_string(path).map_err(|e| format!("failed to read {}: {}", path.display(), e))?;

    for (index, line) in content.lines().enumerate() {
        match parse_env_assignment(line) {
            Ok(Some((key, value))) => {
                if std::env::var_os(&key).is_none() {
                    // Mutating the environment is unsafe once threads exist; this runs before any are spawned.
                    unsafe {
                        std::env::set_var(key, value);
                    }
                }
            }
            Ok(None) => {}
            Err(e) => return Err(format!("{}:{}: {}", path.display(), index + 1, e)),
        }
    }
    Ok(())
}

fn parse_env_assignment(line: &str) -> Result<Option<(String, String)>, String> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }

    let without_export = trimmed
        .strip_prefix("export ")
        .map(str::trim_start)
        .unwrap_or(trimmed);

    let (key, value_part) = without_export
        .split_once('=')
        .ok_or_else(|| "missing '=' in assignment".to_string())?;
    let key = key.trim();
    if key.is_empty() {
        return Err("environment variable name cannot be empty".to_string());
    }
    if key.chars().any(char::is_whitespace) {
        return Err(format!("environment variable name contains whitespace: {}", key));
    }

    Ok(Some((key.to_string(), parse_env_value(value_part)?)))
}

fn parse_env_value(raw: &str) -> Result<String, String> {
    let trimmed = raw.trim();
    if let Some(rest) = trimmed.strip_prefix('"') {
        parse_quoted(rest, '"', true)
    } else if let Some(rest) = trimmed.strip_prefix('\'') {
        parse_quoted(rest, '\'', false)
    } else {
        let value = trimmed.split('#').next().unwrap_or_default().trim_end();
        Ok(value.to_string())
    }
}

fn parse_quoted(input: &str, quote: char, escapes: bool) -> Result<String, String> {
    let mut result = String::new();
    let mut chars = input.chars();
    let mut escape = false;

    while let Some(ch) = chars.next() {
        if escape {
            result.push(match ch {
                'n' => '\n',
                'r' => '\r',
                't' => '\t',
                other => other,
            });
            escape = false;
        } else if escapes && ch == '\\' {
            escape = true;
        } else if ch == quote {
            let remainder = chars.as_str().trim();
            if remainder.is_empty() || remainder.starts_with('#') {
                return Ok(result);
            }
            return Err(format!("unexpected characters after closing {} quote", quote));
        } else {
            result.push(ch);
        }
    }
    Err(format!("unterminated {}-quoted value", quote))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    const CREDS: [(&str, &str); 2] = [("MULTIMATIC_USERNAME", "user"), ("MULTIMATIC_PASSWORD", "secret")];

    #[test]
    fn defaults_apply() {
        let cfg = Config::from_lookup(lookup(&CREDS)).unwrap();
        assert_eq!(cfg.username, "user");
        assert_eq!(cfg.scan_interval, Duration::from_secs(60));
        assert_eq!(cfg.quick_veto_duration, 180);
        assert_eq!(cfg.http_timeout, Duration::from_secs(30));
        assert!(cfg.serial_number.is_none());
        assert!(cfg.smartphone_id.starts_with("multimatic-hub-"));
    }

    #[test]
    fn overrides_and_validation() {
        let mut pairs = CREDS.to_vec();
        pairs.extend([
            ("SCAN_INTERVAL_SECS", "120"),
            ("QUICK_VETO_DURATION_MINS", "45"),
            ("MULTIMATIC_SERIAL_NUMBER", " 21223300202609620938071939N6 "),
            ("MULTIMATIC_SMARTPHONE_ID", "phone"),
        ]);
        let cfg = Config::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(cfg.hub_config().scan_interval, Duration::from_secs(120));
        assert_eq!(cfg.hub_config().quick_veto_duration, 45);
        assert_eq!(cfg.serial_number.as_deref(), Some("21223300202609620938071939N6"));
        assert_eq!(cfg.smartphone_id, "phone");

        let mut bad = CREDS.to_vec();
        bad.push(("SCAN_INTERVAL_SECS", "soon"));
        assert!(Config::from_lookup(lookup(&bad)).unwrap_err().contains("SCAN_INTERVAL_SECS"));

        let mut zero = CREDS.to_vec();
        zero.push(("QUICK_VETO_DURATION_MINS", "0"));
        assert!(Config::from_lookup(lookup(&zero)).is_err());
    }

    #[test]
    fn credentials_required() {
        let err = Config::from_lookup(lookup(&[("MULTIMATIC_PASSWORD", "x")])).unwrap_err();
        assert!(err.contains("MULTIMATIC_USERNAME"));
        let err = Config::from_lookup(lookup(&[("MULTIMATIC_USERNAME", "x")])).unwrap_err();
        assert!(err.contains("MULTIMATIC_PASSWORD"));
    }

    #[test]
    fn env_lines() {
        assert_eq!(parse_env_assignment("# comment").unwrap(), None);
        assert_eq!(parse_env_assignment("   ").unwrap(), None);
        assert_eq!(
            parse_env_assignment("export A=b # trailing").unwrap(),
            Some(("A".into(), "b".into()))
        );
        assert_eq!(
            parse_env_assignment(r#"B="line\nnext" # c"#).unwrap(),
            Some(("B".into(), "line\nnext".into()))
        );
        assert_eq!(
            parse_env_assignment(r"C='raw\n#x'").unwrap(),
            Some(("C".into(), r"raw\n#x".into()))
        );
        assert_eq!(parse_env_assignment("D=").unwrap(), Some(("D".into(), String::new())));
        assert!(parse_env_assignment("NOEQUALS").is_err());
        assert!(parse_env_assignment("BAD KEY=1").is_err());
        assert!(parse_env_assignment(r#"E="open"#).is_err());
        assert!(parse_env_assignment(r#"F="x" y"#).is_err());
    }
}
