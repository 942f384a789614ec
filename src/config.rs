use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Largest width or height accepted from the query string. Anything above is ignored.
pub const MAX_DIM: u32 = 2000;
pub const DEFAULT_QUALITY: u8 = 94;
pub const DEFAULT_PORT: u16 = 3000;

pub const IMAGE_CACHE_CONTROL: &str = "public, max-age=31536000";
pub const GREETING_CACHE_CONTROL: &str = "public, max-age=3600";

const DEFAULT_MAX_CACHE_SIZE: u64 = 500 * 1024 * 1024;
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60 * 60 * 24 * 365);
const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_MAX_INPUT_SIZE: usize = 8 * 1024 * 1024;

/// Encodings the proxy can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Jpeg,
    Png,
}

impl OutputFormat {
    /// Lenient parse used for the `output` query parameter: `png` selects PNG,
    /// every other value (including `jpg`) falls back to JPEG.
    pub fn from_param(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.trim().eq_ignore_ascii_case("png") => OutputFormat::Png,
            _ => OutputFormat::Jpeg,
        }
    }

    pub fn mime(&self) -> mime::Mime {
        match self {
            OutputFormat::Jpeg => mime::IMAGE_JPEG,
            OutputFormat::Png => mime::IMAGE_PNG,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Png => "image/png",
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Jpeg => write!(f, "jpeg"),
            OutputFormat::Png => write!(f, "png"),
        }
    }
}

/// Which storage engine backs the transformed-image cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheBackend {
    /// Sharded, gzip-compressed files under `cache_dir`.
    #[default]
    Disk,
    /// Embedded sled database under `cache_dir`.
    Sled,
}

impl FromStr for CacheBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "disk" | "fs" => Ok(CacheBackend::Disk),
            "sled" => Ok(CacheBackend::Sled),
            other => Err(format!("unknown cache backend: {}", other)),
        }
    }
}

/// Token-bucket settings for the optional per-IP rate limiter on the image route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    /// Sustained requests per second per client IP
    pub per_second: u64,
    /// Requests a client may send back to back before the rate applies
    pub burst: u32,
}

impl RateLimit {
    /// Time for one spent request slot to refill, at least 1ms.
    pub fn replenish_interval(&self) -> Duration {
        Duration::from_millis((1000 / self.per_second.max(1)).max(1))
    }
}

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub port: u16,
    pub cache_backend: CacheBackend,
    pub cache_dir: PathBuf,
    pub max_cache_size: u64, // bytes
    pub cache_ttl: Duration,
    pub fetch_timeout: Duration,
    pub max_input_size: usize, // bytes
    /// Collapse concurrent misses for the same key into one fetch+transform.
    pub coalesce_requests: bool,
    pub rate_limit: Option<RateLimit>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            cache_backend: CacheBackend::Disk,
            cache_dir: PathBuf::from("diskcache"),
            max_cache_size: DEFAULT_MAX_CACHE_SIZE,
            cache_ttl: DEFAULT_CACHE_TTL,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            max_input_size: DEFAULT_MAX_INPUT_SIZE,
            coalesce_requests: true,
            rate_limit: None,
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value:?}")]
    InvalidVar { name: &'static str, value: String },
    #[error("Cache size must be > 0")]
    InvalidCacheSize,
    #[error("Max input size must be > 0")]
    InvalidMaxInput,
    #[error("Fetch timeout must be > 0")]
    InvalidTimeout,
    #[error("Rate limit must allow at least one request")]
    InvalidRateLimit,
}

impl ProxyConfig {
    /// Builds a configuration from process environment variables.
    ///
    /// Unset variables keep their defaults; set-but-unparseable ones are an error
    /// rather than being silently ignored.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `SERVER_PORT`, then `PORT` | `3000` |
    /// | `CACHE_BACKEND` (`disk` / `sled`) | `disk` |
    /// | `CACHE_DIR` | `diskcache` |
    /// | `CACHE_MAX_BYTES` | 500 MiB |
    /// | `CACHE_TTL_SECS` | one year |
    /// | `FETCH_TIMEOUT_SECS` | `10` |
    /// | `MAX_INPUT_BYTES` | 8 MiB |
    /// | `COALESCE_REQUESTS` | `true` |
    /// | `RATE_LIMIT_PER_SECOND`, `RATE_LIMIT_BURST` | disabled |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`ProxyConfig::from_env`] but reads variables through `lookup`,
    /// which keeps tests away from the real process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        let port = lookup("SERVER_PORT")
            .map(|v| ("SERVER_PORT", v))
            .or_else(|| lookup("PORT").map(|v| ("PORT", v)));
        if let Some((name, value)) = port {
            cfg.port = parse_var(name, &value)?;
        }
        if let Some(value) = lookup("CACHE_BACKEND") {
            cfg.cache_backend = value.parse().map_err(|_| ConfigError::InvalidVar {
                name: "CACHE_BACKEND",
                value: value.clone(),
            })?;
        }
        if let Some(value) = lookup("CACHE_DIR") {
            cfg.cache_dir = PathBuf::from(value);
        }
        if let Some(value) = lookup("CACHE_MAX_BYTES") {
            cfg.max_cache_size = parse_var("CACHE_MAX_BYTES", &value)?;
        }
        if let Some(value) = lookup("CACHE_TTL_SECS") {
            cfg.cache_ttl = Duration::from_secs(parse_var("CACHE_TTL_SECS", &value)?);
        }
        if let Some(value) = lookup("FETCH_TIMEOUT_SECS") {
            cfg.fetch_timeout = Duration::from_secs(parse_var("FETCH_TIMEOUT_SECS", &value)?);
        }
        if let Some(value) = lookup("MAX_INPUT_BYTES") {
            cfg.max_input_size = parse_var("MAX_INPUT_BYTES", &value)?;
        }
        if let Some(value) = lookup("COALESCE_REQUESTS") {
            cfg.coalesce_requests = parse_var("COALESCE_REQUESTS", &value)?;
        }
        if let Some(value) = lookup("RATE_LIMIT_PER_SECOND") {
            let per_second = parse_var("RATE_LIMIT_PER_SECOND", &value)?;
            let burst = match lookup("RATE_LIMIT_BURST") {
                Some(b) => parse_var("RATE_LIMIT_BURST", &b)?,
                None => 30,
            };
            cfg.rate_limit = Some(RateLimit { per_second, burst });
        }

        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_cache_size == 0 {
            return Err(ConfigError::InvalidCacheSize);
        }
        if self.max_input_size == 0 {
            return Err(ConfigError::InvalidMaxInput);
        }
        if self.fetch_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout);
        }
        if let Some(limit) = self.rate_limit {
            if limit.per_second == 0 || limit.burst == 0 {
                return Err(ConfigError::InvalidRateLimit);
            }
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidVar {
        name,
        value: value.to_string(),
    })
}
