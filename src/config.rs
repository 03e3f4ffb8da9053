//! Configuration for civicgate
//!
//! Environment variable and CLI handling using clap.

use clap::Parser;

/// Civicgate - trust-scored caching and rate limiting core
#[derive(Parser, Debug, Clone)]
#[command(name = "civicgate")]
#[command(about = "Trust-scored caching and rate limiting for civic platforms")]
pub struct Args {
    /// Key-value store URL. Unset means the cache runs unconfigured and
    /// every read degrades to a miss (graceful degradation).
    #[arg(long, env = "KV_URL")]
    pub kv_url: Option<String>,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "civicgate")]
    pub mongodb_db: String,

    /// Enable development mode (unconfigured cache writes report success)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// Decimal places for geographic cache key rounding (3 ~= 111m)
    #[arg(long, env = "GEO_KEY_PRECISION", default_value = "3")]
    pub geo_key_precision: u32,

    /// Default cache TTL in seconds when no category applies
    #[arg(long, env = "DEFAULT_TTL_SECS", default_value = "300")]
    pub default_ttl_secs: u64,

    /// Maximum pending background refresh tasks (drop-oldest beyond this)
    #[arg(long, env = "REFRESH_QUEUE_DEPTH", default_value = "256")]
    pub refresh_queue_depth: usize,

    /// Per-operation cache timeout in milliseconds, distinct from the
    /// overall request timeout so cache trouble degrades instead of stalling
    #[arg(long, env = "CACHE_TIMEOUT_MS", default_value = "250")]
    pub cache_timeout_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Args {
    /// Whether a key-value store has been configured
    pub fn kv_configured(&self) -> bool {
        self.kv_url.is_some()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.geo_key_precision > 6 {
            return Err("GEO_KEY_PRECISION must be at most 6 decimal places".to_string());
        }
        if self.refresh_queue_depth == 0 {
            return Err("REFRESH_QUEUE_DEPTH must be at least 1".to_string());
        }
        if self.default_ttl_secs == 0 {
            return Err("DEFAULT_TTL_SECS must be at least 1".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> Args {
        Args::parse_from(["civicgate"])
    }

    #[test]
    fn test_defaults_valid() {
        let args = base_args();
        assert!(args.validate().is_ok());
        assert!(!args.kv_configured());
        assert_eq!(args.geo_key_precision, 3);
    }

    #[test]
    fn test_precision_bound() {
        let mut args = base_args();
        args.geo_key_precision = 7;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_zero_queue_depth_rejected() {
        let mut args = base_args();
        args.refresh_queue_depth = 0;
        assert!(args.validate().is_err());
    }
}
