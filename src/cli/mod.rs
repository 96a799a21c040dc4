//! # CLI Module
//!
//! Command-line entry for the `device-coap` binary.
//!
//! ## Usage
//!
//! ```bash
//! device-coap --config gateway.yaml --log-level debug
//! ```
//!
//! Options:
//! - `-c, --config <FILE>` - Gateway configuration (YAML or JSON); defaults apply without it
//! - `--log-level <LEVEL>` - Overrides `COAP_LOG_LEVEL`
//! - `-h, --help` - Print usage and exit 0
//!
//! An unrecognized option prints `<prog>: Unrecognized option <flag>` and also exits 0.

mod commands;

pub use commands::{build_context, parse_args, run_cli, ArgsOutcome, Cli};
