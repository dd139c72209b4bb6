//! Fiber configuration
//!
//! Compile-time defaults with runtime environment overrides.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Environment variables (runtime)
//! 2. User's config file named by `SF_CONFIG_RS` (compile-time)
//! 3. Library defaults
//!
//! Each thread's registry reads its config once, on first use.
//! `registry::configure_thread` replaces it; fibers created afterwards
//! use the new values.
//!
//! # Example
//!
//! ```rust,ignore
//! use stackfiber_runtime::config::FiberConfig;
//!
//! let config = FiberConfig::from_env()
//!     .stack_size(256 * 1024)
//!     .debug_logging(true);
//! ```

pub mod defaults;

use stackfiber_core::env::{env_get, env_get_bool};
use stackfiber_core::error::FiberError;

/// Per-thread fiber configuration with builder pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiberConfig {
    /// Stack size used when a fiber is created with size 0
    pub stack_size: usize,
    /// Requests below this are raised to it
    pub min_stack_size: usize,
    /// PROT_NONE pages below each stack
    pub guard_pages: usize,
    /// Log create/resume/yield/reset/drop at debug level
    pub debug_logging: bool,
}

impl Default for FiberConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl FiberConfig {
    /// Create config from compile-time defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `SF_STACK_SIZE` - Default stack size in bytes
    /// - `SF_MIN_STACK_SIZE` - Minimum stack size in bytes
    /// - `SF_GUARD_PAGES` - Guard pages per stack
    /// - `SF_DEBUG` - Enable debug logging (0/1)
    pub fn from_env() -> Self {
        let base = Self::new();
        Self {
            stack_size: env_get("SF_STACK_SIZE", base.stack_size),
            min_stack_size: env_get("SF_MIN_STACK_SIZE", base.min_stack_size),
            guard_pages: env_get("SF_GUARD_PAGES", base.guard_pages),
            debug_logging: env_get_bool("SF_DEBUG", base.debug_logging),
        }
    }

    /// Create config with compile-time defaults only (no env override).
    pub fn new() -> Self {
        Self {
            stack_size: defaults::STACK_SIZE,
            min_stack_size: defaults::MIN_STACK_SIZE,
            guard_pages: defaults::GUARD_PAGES,
            debug_logging: cfg!(feature = "debug-logging") || defaults::DEBUG_LOGGING,
        }
    }

    // Builder methods

    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = size;
        self
    }

    pub fn min_stack_size(mut self, size: usize) -> Self {
        self.min_stack_size = size;
        self
    }

    pub fn guard_pages(mut self, pages: usize) -> Self {
        self.guard_pages = pages;
        self
    }

    pub fn debug_logging(mut self, enable: bool) -> Self {
        self.debug_logging = enable;
        self
    }

    /// Stack size to allocate for a request (0 = default)
    pub fn effective_stack_size(&self, requested: usize) -> usize {
        let size = if requested == 0 { self.stack_size } else { requested };
        size.max(self.min_stack_size)
    }

    /// Validate configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_stack_size < stackfiber_core::constants::MIN_STACK_SIZE {
            return Err(ConfigError::InvalidValue("min_stack_size must be >= 16KB"));
        }
        if self.stack_size < self.min_stack_size {
            return Err(ConfigError::InvalidValue("stack_size must be >= min_stack_size"));
        }
        if self.guard_pages == 0 {
            return Err(ConfigError::InvalidValue("guard_pages must be > 0"));
        }
        Ok(())
    }

    /// Print configuration (for debugging)
    pub fn print(&self) {
        eprintln!("stackfiber configuration:");
        eprintln!("  stack_size:      {}", self.stack_size);
        eprintln!("  min_stack_size:  {}", self.min_stack_size);
        eprintln!("  guard_pages:     {}", self.guard_pages);
        eprintln!("  debug_logging:   {}", self.debug_logging);
    }
}

/// Configuration error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidValue(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for FiberError {
    fn from(e: ConfigError) -> Self {
        match e {
            ConfigError::InvalidValue(msg) => FiberError::InvalidConfig(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = FiberConfig::new();
        assert_eq!(config.stack_size, defaults::STACK_SIZE);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = FiberConfig::new()
            .stack_size(512 * 1024)
            .guard_pages(2)
            .debug_logging(true);

        assert_eq!(config.stack_size, 512 * 1024);
        assert_eq!(config.guard_pages, 2);
        assert!(config.debug_logging);
    }

    #[test]
    fn test_effective_stack_size() {
        let config = FiberConfig::new().stack_size(64 * 1024).min_stack_size(32 * 1024);
        assert_eq!(config.effective_stack_size(0), 64 * 1024);
        assert_eq!(config.effective_stack_size(1024), 32 * 1024);
        assert_eq!(config.effective_stack_size(1 << 20), 1 << 20);
    }

    #[test]
    fn test_validation() {
        assert!(FiberConfig::new().guard_pages(0).validate().is_err());
        assert!(FiberConfig::new().min_stack_size(4096).validate().is_err());

        let err = FiberConfig::new()
            .stack_size(16 * 1024)
            .min_stack_size(32 * 1024)
            .validate()
            .unwrap_err();
        let err: FiberError = err.into();
        assert_eq!(err, FiberError::InvalidConfig("stack_size must be >= min_stack_size"));
    }
}
