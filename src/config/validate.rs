// src/config/validate.rs

use std::path::PathBuf;
use std::time::Duration;

use crate::config::model::{ProcessConfig, RawJobFile, DEFAULT_POLL_INTERVAL};
use crate::errors::{ProcrunError, Result};
use crate::types::parse_duration;

impl TryFrom<RawJobFile> for ProcessConfig {
    type Error = ProcrunError;

    fn try_from(raw: RawJobFile) -> std::result::Result<Self, Self::Error> {
        let timeout = raw
            .timeout
            .as_deref()
            .map(|s| parse_field("timeout", s))
            .transpose()?;

        let poll_interval = raw
            .poll_interval
            .as_deref()
            .map(|s| parse_field("poll_interval", s))
            .transpose()?
            .unwrap_or(DEFAULT_POLL_INTERVAL);

        let config = ProcessConfig {
            command: raw.command,
            working_directory: raw.working_directory.unwrap_or_else(|| PathBuf::from(".")),
            timeout,
            default_error_code: raw.default_error_code,
            force_utf8: raw.force_utf8,
            env: raw.env,
            input: raw.input.map(String::into_bytes),
            poll_interval,
        };

        validate_config(&config)?;
        Ok(config)
    }
}

/// Semantic checks shared by job files and configs assembled on the CLI.
///
/// The working directory is deliberately not checked here: that happens
/// right before spawn so the error surfaces as `InvalidWorkingDirectory`.
pub fn validate_config(config: &ProcessConfig) -> Result<()> {
    if config.command.is_empty() {
        return Err(ProcrunError::ConfigError(
            "`command` must name a program or a non-empty shell line".to_string(),
        ));
    }

    if config.poll_interval.is_zero() {
        return Err(ProcrunError::ConfigError(
            "poll_interval must be > 0".to_string(),
        ));
    }

    if let Some(key) = config.env.keys().find(|k| k.is_empty() || k.contains('=')) {
        return Err(ProcrunError::ConfigError(format!(
            "invalid environment variable name '{}'",
            key
        )));
    }

    Ok(())
}

fn parse_field(field: &str, value: &str) -> Result<Duration> {
    parse_duration(value)
        .map_err(|e| ProcrunError::ConfigError(format!("invalid `{}` value '{}': {}", field, value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::CommandLine;

    fn raw(toml_src: &str) -> RawJobFile {
        toml::from_str(toml_src).unwrap()
    }

    #[test]
    fn applies_defaults() {
        let cfg = ProcessConfig::try_from(raw(r#"command = "echo hi""#)).unwrap();
        assert_eq!(cfg.command, CommandLine::shell("echo hi"));
        assert_eq!(cfg.timeout, None);
        assert_eq!(cfg.default_error_code, -1);
        assert!(cfg.force_utf8);
        assert_eq!(cfg.poll_interval, DEFAULT_POLL_INTERVAL);
        assert_eq!(cfg.input, None);
    }

    #[test]
    fn parses_durations_and_input() {
        let cfg = ProcessConfig::try_from(raw(
            r#"
command = ["cat"]
timeout = "5s"
poll_interval = "20ms"
input = "abc"
default_error_code = 99
"#,
        ))
        .unwrap();
        assert_eq!(cfg.timeout, Some(Duration::from_secs(5)));
        assert_eq!(cfg.poll_interval, Duration::from_millis(20));
        assert_eq!(cfg.input.as_deref(), Some(&b"abc"[..]));
        assert_eq!(cfg.default_error_code, 99);
    }

    #[test]
    fn rejects_bad_values() {
        let err = ProcessConfig::try_from(raw(
            r#"
command = "sleep 1"
timeout = "forever"
"#,
        ))
        .unwrap_err();
        match err {
            ProcrunError::ConfigError(msg) => assert!(msg.contains("timeout")),
            other => panic!("expected ConfigError, got {:?}", other),
        }

        let err = ProcessConfig::try_from(raw(
            r#"
command = "sleep 1"
poll_interval = "0ms"
"#,
        ))
        .unwrap_err();
        assert!(matches!(err, ProcrunError::ConfigError(_)));

        let err = ProcessConfig::try_from(raw(r#"command = []"#)).unwrap_err();
        assert!(matches!(err, ProcrunError::ConfigError(_)));
    }

    #[test]
    fn rejects_malformed_env_names() {
        let cfg = ProcessConfig::shell("true").with_env("A=B", "x");
        assert!(matches!(
            validate_config(&cfg),
            Err(ProcrunError::ConfigError(_))
        ));
    }
}
