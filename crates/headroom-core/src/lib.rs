//! headroom-core: shared configuration and domain types.
//!
//! Everything that is decided once at startup lives here: the
//! `HeadroomConfig` tree (TOML file + environment overrides), the metric
//! rules that drive evaluation, and small time/duration helpers shared by
//! the other crates.

pub mod config;
pub mod duration;
pub mod error;
pub mod types;

pub use config::HeadroomConfig;
pub use duration::{format_duration, parse_duration};
pub use error::{ConfigError, ConfigResult};
pub use types::*;
