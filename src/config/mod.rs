//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! defaults
//!     → loader.rs (optional TOML file)
//!     → schema.rs apply_settings (HH_* environment)
//!     → command line flags
//!     → validation.rs (semantic checks)
//!     → ServerConfig (immutable for the life of the server)
//!
//! Per request:
//!     stage → settings.rs (fresh lookup, default on miss)
//! ```
//!
//! # Design Decisions
//! - Server-level config is fixed at startup; stage parameters are read per request
//! - Settings lookups never fail, they fall back to documented defaults
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod settings;
pub mod validation;

pub use loader::{load_config, read_config, ConfigError};
pub use schema::{ListenerConfig, ServerConfig, TimeoutConfig};
pub use settings::Settings;
pub use validation::{validate_config, ValidationError, ValidationErrors};
