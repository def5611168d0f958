use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

const DEFAULT_BOUNDARY: &str = "q1w2e3r4t5y6u7i8o9p0zaxscdvfbgnhmjklkl";

/// Tunables for a [`RangeEngine`](crate::RangeEngine).
///
/// Every field has a default, so a TOML document only needs the keys it
/// wants to override.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RangeConfig {
    /// Bytes read from the source and written to the body per iteration.
    pub buffer_size: usize,
    /// Number of buffer iterations between two peer liveness probes.
    pub check_interval: u32,
    /// Boundary token for `multipart/byteranges` bodies.
    pub boundary: String,
    /// Upper bound on ranges in one request. `None` leaves it unbounded.
    pub max_ranges: Option<usize>,
    /// When false, responses advertise `Accept-Ranges: none` and `Range` is ignored.
    pub accept_ranges: bool,
    /// Lifetime advertised through `Expires` on full responses.
    pub expires_after_secs: u64,
}

impl Default for RangeConfig {
    fn default() -> Self {
        Self {
            buffer_size: 4096,
            check_interval: 30,
            boundary: DEFAULT_BOUNDARY.to_string(),
            max_ranges: None,
            accept_ranges: true,
            expires_after_secs: 24 * 60 * 60,
        }
    }
}

impl RangeConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: RangeConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let s = fs::read_to_string(path)?;
        Self::from_toml_str(&s)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_size == 0 {
            return Err(ConfigError::Invalid("buffer_size must be non-zero".to_string()));
        }
        if self.check_interval == 0 {
            return Err(ConfigError::Invalid("check_interval must be non-zero".to_string()));
        }
        if self.max_ranges == Some(0) {
            return Err(ConfigError::Invalid("max_ranges must be non-zero when set".to_string()));
        }
        validate_boundary(&self.boundary)
    }
}

// RFC 2046 bchars, without the trailing-space allowance
fn validate_boundary(boundary: &str) -> Result<(), ConfigError> {
    if boundary.is_empty() || boundary.len() > 70 {
        return Err(ConfigError::Invalid(format!(
            "boundary must be 1 to 70 characters, got {}",
            boundary.len()
        )));
    }
    let allowed = |c: char| c.is_ascii_alphanumeric() || "'()+_,-./:=?".contains(c);
    match boundary.chars().find(|c| !allowed(*c)) {
        Some(c) => Err(ConfigError::Invalid(format!("boundary contains {c:?}"))),
        None => Ok(()),
    }
}
