//! Terminal handlers.
//!
//! # Data Flow
//! ```text
//! pipeline (innermost stage)
//!     → file.rs (resolve under root, file bytes or listing)
//!
//! health path (outside the pipeline)
//!     → health.rs
//! ```

pub mod file;
pub mod health;

pub use file::FileHandler;
