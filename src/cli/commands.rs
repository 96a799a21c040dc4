use crate::error::{GatewayError, GatewayResult};
use crate::forwarder::{HttpSink, LogSink, ReadingSink};
use crate::metrics::GatewayMetrics;
use crate::registry::{DeviceCatalog, DeviceRegistry};
use crate::router::ResourceRouter;
use crate::runtime_config::{DriverConfig, GatewayConfig, RuntimeConfig};
use crate::server::{run_server, HandlerContext};
use clap::error::{ContextKind, ContextValue, ErrorKind};
use clap::Parser;
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Command-line interface for the CoAP ingestion gateway
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "device-coap")]
#[command(about = "CoAP push-ingestion gateway", long_about = None)]
pub struct Cli {
    /// Configuration file (YAML or JSON)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log level: trace, debug, info, warn or error
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,
}

/// What the binary should do after argument parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgsOutcome {
    Run(Cli),
    /// Print `message` to stdout and exit with `code`.
    Exit { message: String, code: i32 },
}

/// Parse process arguments, folding help and option errors into an early exit.
///
/// Help prints usage; an unknown flag prints `<prog>: Unrecognized option <flag>`. Both exit
/// with status 0.
pub fn parse_args<I, T>(args: I) -> ArgsOutcome
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let args: Vec<OsString> = args.into_iter().map(Into::into).collect();
    let prog = args
        .first()
        .map(|a| a.to_string_lossy().into_owned())
        .unwrap_or_else(|| "device-coap".to_owned());

    match Cli::try_parse_from(&args) {
        Ok(cli) => ArgsOutcome::Run(cli),
        Err(err) => match err.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ArgsOutcome::Exit {
                message: err.render().to_string(),
                code: 0,
            },
            ErrorKind::UnknownArgument => {
                let flag = match err.get(ContextKind::InvalidArg) {
                    Some(ContextValue::String(s)) => s.clone(),
                    _ => String::from("?"),
                };
                ArgsOutcome::Exit {
                    message: format!("{prog}: Unrecognized option {flag}"),
                    code: 0,
                }
            }
            _ => ArgsOutcome::Exit {
                message: err.render().to_string(),
                code: 0,
            },
        },
    }
}

/// Load the configuration named on the command line, or the built-in defaults.
fn load_config(cli: &Cli) -> GatewayResult<GatewayConfig> {
    match &cli.config {
        Some(path) => GatewayConfig::load(path).map_err(|e| GatewayError::config(format!("{e:#}"))),
        None => {
            info!("No configuration file given, using defaults");
            Ok(GatewayConfig::default())
        }
    }
}

/// Build the handler context (registry, sink, metrics) from a loaded configuration.
///
/// # Errors
///
/// [`GatewayError::Config`] if the upstream sink cannot be created.
pub fn build_context(config: &GatewayConfig) -> GatewayResult<HandlerContext> {
    let registry: Arc<dyn DeviceRegistry> =
        Arc::new(DeviceCatalog::from_devices(config.devices.iter().cloned()));
    let sink: Arc<dyn ReadingSink> = match &config.upstream {
        Some(upstream) => Arc::new(
            HttpSink::new(upstream.url.as_str(), upstream.timeout_ms)
                .map_err(|e| GatewayError::config(format!("upstream sink: {e}")))?,
        ),
        None => Arc::new(LogSink),
    };
    Ok(HandlerContext::new(
        ResourceRouter::new(registry),
        sink,
        Arc::new(GatewayMetrics::new()),
    ))
}

/// Run the gateway until shutdown.
///
/// # Errors
///
/// The first fatal [`GatewayError`].
pub fn run_cli(cli: &Cli) -> GatewayResult<()> {
    let config = load_config(cli)?;
    let driver = DriverConfig::from_map(&config.driver_map())?;
    let runtime = RuntimeConfig::from_env();
    info!(?driver, ?runtime, "Starting CoAP gateway");
    let context = build_context(&config)?;
    run_server(driver, runtime, context)
}
