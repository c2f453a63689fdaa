//! Application Configuration Module
//!
//! Provides the runtime configuration loaded from TOML, with environment
//! overrides for the tunables operators change most often.
//!
//! ## Loading Order
//!
//! 1. `WINDOPS_CONFIG` environment variable (path to TOML file)
//! 2. `windops.toml` in the current working directory
//! 3. Built-in defaults (see [`defaults`])
//!
//! After the file is read, `WINDOPS_*` environment variables are applied on
//! top and the result is validated.
//!
//! ```ignore
//! let config = AppConfig::load()?;
//! let settings = WindowSettings::from_config(&config.window);
//! ```

mod app_config;
pub mod defaults;

pub use app_config::*;
