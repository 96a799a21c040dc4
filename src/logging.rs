//! Structured logging setup.
//!
//! Configured from `COAP_LOG_*` environment variables:
//!
//! | Variable | Values | Default |
//! |---|---|---|
//! | `COAP_LOG_LEVEL` | trace/debug/info/warn/error | `info` |
//! | `COAP_LOG_FORMAT` | json/pretty | `json` |
//! | `COAP_LOG_SAMPLING_MODE` | all/error-only/sampled | `all` |
//! | `COAP_LOG_SAMPLING_RATE` | 0.0-1.0 | `0.1` |
//! | `COAP_LOG_ASYNC` | true/false | `true` |
//! | `COAP_LOG_TARGET_FILTER` | comma-separated directives | none |
//! | `COAP_LOG_INCLUDE_LOCATION` | true/false | `false` |
//!
//! `RUST_LOG`, when set, takes precedence over `COAP_LOG_LEVEL`. WARN and ERROR events
//! pass every sampling mode.

use anyhow::{Context, Result};
use std::env;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{warn, Level, Metadata, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::{Context as LayerContext, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Log format: JSON for production, pretty-print for development
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            _ => LogFormat::Json,
        }
    }
}

/// Which events to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingMode {
    All,
    /// WARN and ERROR only
    ErrorOnly,
    /// Every Nth event below WARN, all WARN and ERROR
    Sampled,
}

impl SamplingMode {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "error-only" | "error_only" => SamplingMode::ErrorOnly,
            "sampled" => SamplingMode::Sampled,
            _ => SamplingMode::All,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Base level; `RUST_LOG` replaces it entirely when set
    pub level: Level,
    pub format: LogFormat,
    pub sampling_mode: SamplingMode,
    /// Fraction of sub-WARN events kept in `Sampled` mode
    pub sampling_rate: f64,
    /// Write through a background worker
    pub async_logging: bool,
    /// Extra filter directives (comma-separated)
    pub target_filter: Option<String>,
    /// Include file:line in output
    pub include_location: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Json,
            sampling_mode: SamplingMode::All,
            sampling_rate: 0.1,
            async_logging: true,
            target_filter: None,
            include_location: false,
        }
    }
}

impl LogConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| env::var(k).ok())
    }

    /// Parse configuration from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let flag = |key: &str, default: bool| {
            lookup(key)
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(default)
        };
        Self {
            level: lookup("COAP_LOG_LEVEL")
                .map(|s| parse_level(&s))
                .unwrap_or(defaults.level),
            format: lookup("COAP_LOG_FORMAT")
                .map(|s| LogFormat::parse(&s))
                .unwrap_or(defaults.format),
            sampling_mode: lookup("COAP_LOG_SAMPLING_MODE")
                .map(|s| SamplingMode::parse(&s))
                .unwrap_or(defaults.sampling_mode),
            sampling_rate: lookup("COAP_LOG_SAMPLING_RATE")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(defaults.sampling_rate),
            async_logging: flag("COAP_LOG_ASYNC", defaults.async_logging),
            target_filter: lookup("COAP_LOG_TARGET_FILTER").filter(|s| !s.trim().is_empty()),
            include_location: flag("COAP_LOG_INCLUDE_LOCATION", defaults.include_location),
        }
    }

    /// Base filter plus the extra target directives.
    ///
    /// Returns the directives that failed to parse so they can be reported once the
    /// subscriber is up.
    fn env_filter(&self) -> (EnvFilter, Vec<String>) {
        let mut filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.level.as_str()));
        let mut rejected = Vec::new();
        let directives = self
            .target_filter
            .iter()
            .flat_map(|f| f.split(','))
            .map(str::trim)
            .filter(|d| !d.is_empty());
        for directive in directives {
            match directive.parse() {
                Ok(parsed) => filter = filter.add_directive(parsed),
                Err(_) => rejected.push(directive.to_owned()),
            }
        }
        (filter, rejected)
    }
}

/// How [`SamplingLayer`] treats events below WARN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BelowWarn {
    Keep,
    Drop,
    /// Keep one in every N
    EveryNth(u64),
}

/// Drops events according to a [`SamplingMode`]. WARN, ERROR and spans always pass.
pub struct SamplingLayer {
    below_warn: BelowWarn,
    counter: AtomicU64,
}

impl SamplingLayer {
    pub fn new(mode: SamplingMode, sampling_rate: f64) -> Self {
        let below_warn = match mode {
            SamplingMode::All => BelowWarn::Keep,
            SamplingMode::ErrorOnly => BelowWarn::Drop,
            SamplingMode::Sampled => {
                let rate = sampling_rate.clamp(0.0, 1.0);
                if rate > 0.0 {
                    BelowWarn::EveryNth(((1.0 / rate) as u64).max(1))
                } else {
                    BelowWarn::Drop
                }
            }
        };
        Self {
            below_warn,
            counter: AtomicU64::new(0),
        }
    }

    fn should_sample(&self, metadata: &Metadata<'_>) -> bool {
        if *metadata.level() <= Level::WARN {
            return true;
        }
        match self.below_warn {
            BelowWarn::Keep => true,
            BelowWarn::Drop => false,
            BelowWarn::EveryNth(_) if metadata.is_span() => true,
            BelowWarn::EveryNth(n) => self.counter.fetch_add(1, Ordering::Relaxed) % n == 0,
        }
    }
}

impl<S> Layer<S> for SamplingLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn enabled(&self, metadata: &Metadata<'_>, _ctx: LayerContext<'_, S>) -> bool {
        self.should_sample(metadata)
    }
}

/// Keeps the background log writer alive; drop it to flush before exit.
#[must_use = "dropping the guard stops the background log writer"]
pub struct LoggingGuard {
    _worker: Option<WorkerGuard>,
}

/// Level name to [`Level`], case-insensitive; anything unknown is INFO.
pub fn parse_level(s: &str) -> Level {
    s.trim().parse().unwrap_or(Level::INFO)
}

type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync + 'static>;

/// stdout formatter in the configured format.
fn output_layer<S>(config: &LogConfig, writer: BoxMakeWriter) -> BoxedLayer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let base = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .with_writer(writer);
    match config.format {
        LogFormat::Json => base
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .boxed(),
        LogFormat::Pretty => base.pretty().boxed(),
    }
}

/// Install the global subscriber.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_logging(config: &LogConfig) -> Result<LoggingGuard> {
    let (env_filter, rejected) = config.env_filter();

    let (writer, worker) = if config.async_logging {
        let (nb, guard) = tracing_appender::non_blocking(std::io::stdout());
        (BoxMakeWriter::new(nb), Some(guard))
    } else {
        (BoxMakeWriter::new(std::io::stdout), None)
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(SamplingLayer::new(config.sampling_mode, config.sampling_rate))
        .with(output_layer(config, writer))
        .try_init()
        .context("Failed to initialize logging")?;

    for directive in rejected {
        warn!(directive = %directive, "Ignoring invalid log filter directive");
    }
    Ok(LoggingGuard { _worker: worker })
}
