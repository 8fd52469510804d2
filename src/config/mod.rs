//! Configuration for the acceleration layer
//!
//! Settings come from an optional TOML file and the `AXIOM_ACCEL_DEBUG`
//! environment variable. The screen section maps onto the init flags; the
//! cache section tunes the FBO free pool.

use crate::screen::InitFlags;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Environment variable holding the debug level.
pub const DEBUG_ENV: &str = "AXIOM_ACCEL_DEBUG";

/// Upper bound accepted for `expire_ticks`.
const MAX_EXPIRE_TICKS: u64 = 1_000_000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AccelConfig {
    /// 0 is quiet, 1 logs pool activity, 2 and above trace every FBO.
    #[serde(default)]
    pub debug_level: u32,

    #[serde(default)]
    pub fbo_cache: FboCacheConfig,

    #[serde(default)]
    pub screen: ScreenConfig,
}

/// FBO free-pool tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FboCacheConfig {
    /// Released FBOs are pooled instead of deleted.
    pub enabled: bool,

    /// Block-handler ticks a pooled FBO survives.
    pub expire_ticks: u64,

    /// Pooled FBOs kept per size and format.
    pub max_per_size: usize,
}

impl Default for FboCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            expire_ticks: 100,
            max_per_size: 16,
        }
    }
}

/// Which hooks to install.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScreenConfig {
    /// Framebuffer origin is at the top.
    pub inverted_y: bool,

    /// Install the screen strategy and block handler.
    pub use_screen: bool,

    /// Install the picture strategy.
    pub use_picture_screen: bool,
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            inverted_y: false,
            use_screen: true,
            use_picture_screen: true,
        }
    }
}

impl ScreenConfig {
    pub fn init_flags(&self) -> InitFlags {
        let mut flags = InitFlags::empty();
        flags.set(InitFlags::INVERTED_Y_AXIS, self.inverted_y);
        flags.set(InitFlags::USE_SCREEN, self.use_screen);
        flags.set(InitFlags::USE_PICTURE_SCREEN, self.use_picture_screen);
        flags
    }
}

/// Reads a leading decimal integer the way `%d` does: leading whitespace
/// and a sign are accepted, parsing stops at the first non-digit, and
/// anything unparsable is 0. Negative levels clamp to 0.
pub fn parse_debug_level(value: &str) -> u32 {
    let trimmed = value.trim_start();
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    if negative {
        return 0;
    }
    digits[..end].parse::<u64>().map_or(0, |level| level.min(u32::MAX as u64) as u32)
}

/// Debug level from `AXIOM_ACCEL_DEBUG`, 0 when unset.
pub fn debug_level_from_env() -> u32 {
    std::env::var(DEBUG_ENV)
        .map(|value| parse_debug_level(&value))
        .unwrap_or(0)
}

impl AccelConfig {
    /// Defaults with the environment applied.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Applies `AXIOM_ACCEL_DEBUG` when it is set.
    pub fn with_env_overrides(mut self) -> Self {
        if std::env::var_os(DEBUG_ENV).is_some() {
            self.debug_level = debug_level_from_env();
        }
        self
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        // Expand ~ to home directory
        let expanded_path = if path.to_string_lossy().starts_with('~') {
            let home = std::env::var("HOME").context("Failed to get HOME environment variable")?;
            Path::new(&home).join(path.strip_prefix("~").unwrap_or(path))
        } else {
            path.to_path_buf()
        };

        let contents = fs::read_to_string(&expanded_path)
            .with_context(|| format!("Failed to read config file: {}", expanded_path.display()))?;

        let config: AccelConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", expanded_path.display()))?;

        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.fbo_cache.expire_ticks == 0 || self.fbo_cache.expire_ticks > MAX_EXPIRE_TICKS {
            anyhow::bail!(
                "Invalid expire_ticks: must be between 1 and {}",
                MAX_EXPIRE_TICKS
            );
        }

        if self.fbo_cache.max_per_size == 0 {
            anyhow::bail!("Invalid max_per_size: must be at least 1");
        }

        if self.screen.use_picture_screen && !self.screen.use_screen {
            log::warn!("use_picture_screen without use_screen: no block handler will flush");
        }

        Ok(())
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        fs::write(path, contents).context("Failed to write configuration file")?;

        Ok(())
    }
}


#[cfg(test)]
mod property_tests;
