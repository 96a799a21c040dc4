use coap_ingest::cli::{parse_args, run_cli, ArgsOutcome};
use coap_ingest::logging::{init_logging, parse_level, LogConfig};
use std::process::ExitCode;

fn main() -> ExitCode {
    let args: Vec<std::ffi::OsString> = std::env::args_os().collect();
    let prog = args
        .first()
        .map(|a| a.to_string_lossy().into_owned())
        .unwrap_or_else(|| "device-coap".to_owned());

    let cli = match parse_args(args) {
        ArgsOutcome::Run(cli) => cli,
        ArgsOutcome::Exit { message, code } => {
            println!("{}", message.trim_end());
            return exit_code(code);
        }
    };

    let mut log_config = LogConfig::from_env();
    if let Some(level) = &cli.log_level {
        log_config.level = parse_level(level);
    }
    let guard = match init_logging(&log_config) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("{prog}: {e:#}");
            None
        }
    };

    let code = match run_cli(&cli) {
        Ok(()) => {
            println!("Exiting gracefully");
            0
        }
        Err(e) => {
            eprintln!("{prog}: {e}");
            e.exit_code()
        }
    };
    // Flush buffered log lines before exiting.
    drop(guard);
    exit_code(code)
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}
