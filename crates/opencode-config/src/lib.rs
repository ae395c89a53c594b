//! Configuration for the OpenCode client SDK.
//!
//! Provides a flat TOML-based configuration with:
//! - Server location and request timeouts (quick vs. generation calls)
//! - Retry policy (attempts, exponential base delay, jitter)
//! - Circuit breaker (failure threshold, open duration)
//! - Per-attempt operation timeout
//!
//! Every option is optional; missing keys fall back to the documented
//! defaults. Files are discovered under the XDG config directory and
//! selected values can be overridden from the environment.

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    load_config, load_config_file, load_config_from_dir, save_config, xdg_config_dir,
    xdg_config_path,
};
pub use error::{ConfigError, Result};
pub use types::*;
