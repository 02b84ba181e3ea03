//! Run Configuration Module
//!
//! Site identity, footprint projection, classifier gateway, batch policy
//! and input column mapping, loaded from TOML.
//!
//! ## Loading Order
//!
//! 1. `--config <path>` on the command line
//! 2. `FLUXFETCH_CONFIG` environment variable (path to TOML file)
//! 3. `fluxfetch.toml` in the current working directory
//! 4. Built-in defaults
//!
//! ## Usage
//!
//! Call `config::init()` once at startup, then `config::get()` anywhere:
//!
//! ```ignore
//! config::init(FetchConfig::load());
//!
//! let distance = config::get().projection.distance_m;
//! ```

mod fetch_config;
pub mod defaults;
pub mod validation;

pub use fetch_config::*;

use std::sync::OnceLock;

/// Global run configuration, initialized once at startup.
static FETCH_CONFIG: OnceLock<FetchConfig> = OnceLock::new();

/// Initialize the global run configuration.
///
/// Returns `false` (and keeps the existing value) if a config was already set.
pub fn init(config: FetchConfig) -> bool {
    if FETCH_CONFIG.set(config).is_err() {
        tracing::warn!("config::init() called more than once, ignoring");
        return false;
    }
    true
}

/// Get a reference to the global run configuration.
///
/// Falls back to built-in defaults when `init()` has not been called.
pub fn get() -> &'static FetchConfig {
    FETCH_CONFIG.get_or_init(|| {
        tracing::debug!("config::get() before config::init(), using defaults");
        FetchConfig::default()
    })
}

/// Check whether the config has been initialized.
pub fn is_initialized() -> bool {
    FETCH_CONFIG.get().is_some()
}
