//! Configuration loading from disk.

use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::config::schema::{CredentialConfig, DispatchConfig};
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<DispatchConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content, |name| std::env::var(name).ok())
}

/// Parse TOML, resolve environment credentials and validate.
///
/// `lookup_env` resolves the variable named by `credentials_env`.
pub fn parse_config<F>(content: &str, lookup_env: F) -> Result<DispatchConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config: DispatchConfig = toml::from_str(content)?;
    resolve_env_credentials(&mut config, lookup_env);
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Append secrets from the `credentials_env` variable, skipping ones already listed.
pub fn resolve_env_credentials<F>(config: &mut DispatchConfig, lookup_env: F)
where
    F: Fn(&str) -> Option<String>,
{
    let Some(var) = config.credentials_env.as_deref() else {
        return;
    };
    let Some(value) = lookup_env(var) else {
        tracing::warn!(variable = %var, "Credential environment variable not set");
        return;
    };

    let mut added = 0;
    for secret in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if config.credentials.iter().any(|c| c.secret == secret) {
            continue;
        }
        config.credentials.push(CredentialConfig {
            secret: secret.to_string(),
            label: None,
        });
        added += 1;
    }
    tracing::debug!(variable = %var, added, "Loaded credentials from environment");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [[credentials]]
            secret = "sk-file-secret-1"
            label = "primary"

            [pool]
            rate_limit_cooldown_secs = 90
            "#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.credentials.len(), 1);
        assert_eq!(config.pool.rate_limit_cooldown_secs, 90);
    }

    #[test]
    fn test_missing_file() {
        let err = load_config(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn test_parse_error() {
        let err = parse_config("credentials = 3", |_| None).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_env_credentials_merged_and_deduplicated() {
        let toml = r#"
            credentials_env = "UPSTREAM_KEYS"

            [[credentials]]
            secret = "sk-inline"
        "#;
        let config = parse_config(toml, |name| {
            assert_eq!(name, "UPSTREAM_KEYS");
            Some("sk-env-1, sk-inline,,sk-env-2 ".to_string())
        })
        .unwrap();

        let secrets: Vec<&str> = config.credentials.iter().map(|c| c.secret.as_str()).collect();
        assert_eq!(secrets, ["sk-inline", "sk-env-1", "sk-env-2"]);
    }

    #[test]
    fn test_validation_error_lists_fields() {
        let err = parse_config("credentials_env = \"MISSING\"", |_| None).unwrap_err();
        match &err {
            ConfigError::Validation(errors) => assert_eq!(errors[0].field, "credentials"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().starts_with("Validation failed: credentials:"));
    }
}
