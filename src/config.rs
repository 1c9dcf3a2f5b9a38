use std::env;

use log::{info, warn};
use once_cell::sync::Lazy;

/// Upper bound for the number of devices returned by a single enumeration.
pub const MAX_DEVICES_ENV: &str = "RUST_CL_HANDLES_MAX_DEVICES";
/// Upper bound for the number of platforms returned by a single enumeration.
pub const MAX_PLATFORMS_ENV: &str = "RUST_CL_HANDLES_MAX_PLATFORMS";

const DEFAULT_MAX_DEVICES: usize = 64;
const DEFAULT_MAX_PLATFORMS: usize = 16;

static CONFIG: Lazy<Config> = Lazy::new(Config::from_env);

/// Process wide settings, read from the environment once.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Config {
    /// The maximum number of devices an enumeration returns.
    pub max_devices: usize,
    /// The maximum number of platforms an enumeration returns.
    pub max_platforms: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_devices: DEFAULT_MAX_DEVICES,
            max_platforms: DEFAULT_MAX_PLATFORMS,
        }
    }
}

impl Config {
    /// The configuration of this process, the environment is only read on first use.
    pub fn get() -> &'static Config {
        &CONFIG
    }

    /// Reads the configuration from the environment, bypassing the cache.
    pub fn from_env() -> Self {
        Self {
            max_devices: limit(MAX_DEVICES_ENV, DEFAULT_MAX_DEVICES),
            max_platforms: limit(MAX_PLATFORMS_ENV, DEFAULT_MAX_PLATFORMS),
        }
    }
}

fn limit(name: &str, default: usize) -> usize {
    let var = match env::var(name) {
        Ok(var) => var,
        Err(_) => return default,
    };
    match var.trim().parse() {
        Ok(0) | Err(_) => {
            warn!(
                "Invalid {}={:?}, expected a positive number, using {}.",
                name, var, default
            );
            default
        }
        Ok(value) => {
            info!("Using {}={}.", name, value);
            value
        }
    }
}
