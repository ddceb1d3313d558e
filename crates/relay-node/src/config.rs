use anyhow::{bail, Result};
use std::env;

/// Control-plane coordinates, resolved once at startup and handed to the
/// client by value. No globals.
#[derive(Clone, Debug)]
pub struct Config {
    pub base_uri: String,
    pub bearer: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let base_uri = require("BASE_URI")?;
        let bearer = require("BEARER")?;
        Ok(Config { base_uri, bearer })
    }
}

// Unset and empty are both rejected; a placeholder value must never reach
// the control plane as a credential.
fn require(key: &str) -> Result<String> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => bail!("{key} must be set in the environment"),
    }
}
