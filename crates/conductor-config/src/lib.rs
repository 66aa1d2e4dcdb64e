//! # Conductor Configuration
//!
//! Typed configuration for the conductor observability layer.
//!
//! Values are resolved with precedence defaults < TOML file < environment,
//! and command-line flags are applied on top by the binary.
//!
//! ```rust,no_run
//! use conductor_config::ConfigLoader;
//!
//! let config = ConfigLoader::new().with_file("conductor.toml").load()?;
//! println!("sessions in {}", config.sessions_dir().display());
//! # Ok::<(), conductor_config::ConfigError>(())
//! ```

#![warn(clippy::all)]

pub mod components;
mod error;
mod loader;

pub use components::*;
pub use error::ConfigError;
pub use loader::*;
