//! Dual-mode entry point.
//!
//! Invoked as [`SHIM_PATH`] (argv[0]) we are inside the container and act as
//! the init-process supervisor for the user command. Invoked under any other
//! name we are standing in for the low-level runtime and rewrite the bundle
//! before handing off to it. The process exit status is the selected role's
//! status.

use dagger_shim::{SHIM_PATH, bundle, supervisor};
use std::env;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr: in supervisor mode our stdout must carry exactly
    // the child's stdout bytes.
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();

    if args.first().map(String::as_str) == Some(SHIM_PATH) {
        ExitCode::from(run_supervisor(&args[1..]).await as u8)
    } else {
        match bundle::setup_bundle(&args) {
            Ok(never) => match never {},
            Err(e) => {
                eprintln!("err: {}", e);
                ExitCode::from(1)
            }
        }
    }
}

async fn run_supervisor(args: &[String]) -> i32 {
    if args.is_empty() {
        eprintln!("usage: {} <path> [<args>]", SHIM_PATH);
        return 1;
    }

    let config = match supervisor::SupervisorConfig::from_env().await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("err: {}", e);
            return 1;
        }
    };

    match supervisor::run(args, config).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("err: {}", e);
            1
        }
    }
}
