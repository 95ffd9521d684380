//! Configuration validation.
//!
//! Serde handles syntax; this module checks semantics. Every problem is
//! reported, not just the first one. Unknown stage names are not errors;
//! the pipeline warns about them when it is built.

use std::fmt;
use std::time::Duration;

use crate::config::schema::ServerConfig;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("directory {0:?} does not exist")]
    MissingDirectory(String),
    #[error("{0:?} is not a directory")]
    NotADirectory(String),
    #[error("{0} timeout must be greater than zero")]
    ZeroTimeout(&'static str),
    #[error("max_connections must be greater than zero")]
    ZeroConnections,
    #[error("health path {0:?} must start with '/'")]
    HealthPath(String),
}

/// All validation errors found in one config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationErrors(pub Vec<ValidationError>);

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

pub fn validate_config(config: &ServerConfig) -> Result<(), ValidationErrors> {
    let mut errors = Vec::new();

    let directory = config.directory.display().to_string();
    match std::fs::metadata(&config.directory) {
        Ok(meta) if !meta.is_dir() => errors.push(ValidationError::NotADirectory(directory)),
        Ok(_) => {}
        Err(_) => errors.push(ValidationError::MissingDirectory(directory)),
    }

    for (name, timeout) in [
        ("read", config.timeouts.read),
        ("write", config.timeouts.write),
        ("idle", config.timeouts.idle),
    ] {
        if timeout == Duration::ZERO {
            errors.push(ValidationError::ZeroTimeout(name));
        }
    }

    if config.listener.max_connections == 0 {
        errors.push(ValidationError::ZeroConnections);
    }

    if let Some(path) = &config.health_path {
        if !path.starts_with('/') {
            errors.push(ValidationError::HealthPath(path.clone()));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationErrors(errors))
    }
}
