//! Configuration loading from disk and the environment.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::GatewayConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {name}: '{value}'")]
    Env { name: &'static str, value: String },

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ValidationError::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load configuration: optional TOML file, then process environment, then validation.
pub fn load_config(path: Option<&Path>) -> Result<GatewayConfig, ConfigError> {
    let mut config = match path {
        Some(path) => parse_file(path)?,
        None => GatewayConfig::default(),
    };

    apply_env(&mut config, |name| std::env::var(name).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Parse a TOML file without validating it.
pub fn parse_file(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    toml::from_str(&content).map_err(ConfigError::Parse)
}

/// Overlay environment variables onto `config`.
///
/// `lookup` returns the raw value of a variable; empty values count as unset.
pub fn apply_env<F>(config: &mut GatewayConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let var = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(uri) = var("NATS_URI") {
        config.backbone.uri = uri;
    }
    if let Some(user) = var("NATS_USER") {
        config.backbone.user = Some(user);
    }
    if let Some(pass) = var("NATS_PASS") {
        config.backbone.pass = Some(pass);
    }

    if let Some(list) = var("NATS_AUTH_SUBJECTS") {
        config.auth.subjects = split_list(&list);
    }
    if let Some(list) = var("NATS_NON_AUTHORIZED_SUBJECTS") {
        config.auth.non_authorized_subjects = split_list(&list);
    }
    if let Some(list) = var("NATS_NAMESPACE_SUBJECTS") {
        config.auth.namespace_subjects = split_list(&list);
    }
    if let Some(subject) = var("NATS_GET_NAMESPACE_SUBJECT") {
        config.auth.namespace_subject = Some(subject);
    }

    if let Some(port) = var("SERVER_PORT") {
        let port: u16 = port.trim().parse().map_err(|_| ConfigError::Env {
            name: "SERVER_PORT",
            value: port.clone(),
        })?;
        config.listener.bind_address = with_port(&config.listener.bind_address, port);
    }
    if let Some(path) = var("SERVER_HTTP_PATH") {
        config.http.path = path;
    }
    if let Some(path) = var("SERVER_WS_PATH") {
        config.websocket.path = path;
    }
    if let Some(list) = var("SERVER_ORIGIN") {
        let mut origins = vec!["*".to_string()];
        origins.extend(split_list(&list));
        config.cors.origins = origins;
    }
    if let Some(flag) = var("SERVER_CREDENTIALS") {
        config.cors.credentials = !matches!(flag.trim().to_ascii_lowercase().as_str(), "false" | "0");
    }

    Ok(())
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn with_port(bind_address: &str, port: u16) -> String {
    let host = bind_address
        .rsplit_once(':')
        .map(|(host, _)| host)
        .unwrap_or(bind_address);
    format!("{}:{}", host, port)
}
