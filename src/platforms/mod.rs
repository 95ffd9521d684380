//! Emulated server platforms.
//!
//! # Data Flow
//! ```text
//! --platform / config
//!     → Platform (default pipeline, terminal handler flavor)
//!     → python.rs (wire details of `python -m http.server`)
//!
//! hh presign METHOD OBJECT
//!     → s3.rs (SigV4 query-signed object URL)
//! ```

pub mod python;
pub mod s3;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::http::pipeline::Stage;

const GENERIC_STAGES: &[Stage] = &[
    Stage::Logger,
    Stage::Error,
    Stage::RequestId,
    Stage::Bandwidth,
    Stage::Ttfb,
    Stage::Cors,
    Stage::Mime,
    Stage::Etag,
];

const PYTHON_STAGES: &[Stage] = &[
    Stage::CommonLogger,
    Stage::Error,
    Stage::Bandwidth,
    Stage::Ttfb,
    Stage::Cors,
];

/// Which server the terminal handler and default pipeline imitate.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Plain static file server.
    #[default]
    Generic,
    /// Python's `http.server` module.
    Python,
}

impl Platform {
    /// Stages used when no pipeline is configured, outermost first.
    pub fn default_stages(&self) -> &'static [Stage] {
        match self {
            Platform::Generic => GENERIC_STAGES,
            Platform::Python => PYTHON_STAGES,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Platform::Generic => "generic",
            Platform::Python => "python",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
