use native_host::driver::serve;
use native_host::error::NativeHostError;
use native_host::logger::initialize as LoggerInitialize;
use native_host::startup::{resolve_config_dir, start_host};

use host_core::HostConfig;

use std::fs::create_dir_all;
use std::path::PathBuf;
use std::process::ExitCode;

use log::info;
use tokio::io::{BufReader, stdin, stdout};

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("native-host: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), NativeHostError> {
    let config_dir = resolve_config_dir(std::env::args_os().nth(1).map(PathBuf::from))?;

    create_dir_all(&config_dir).map_err(|e| {
        NativeHostError::native_host(format!(
            "Failed to create config directory {}: {e}",
            config_dir.display()
        ))
    })?;

    // Initialize logger FIRST
    LoggerInitialize(&config_dir)?;

    info!("Native host starting");
    info!("Config directory: {}", config_dir.display());

    let config = HostConfig::load(&config_dir)?;
    let host = start_host(&config);

    serve(host.clone(), BufReader::new(stdin()), stdout()).await?;

    host.stop().await?;
    info!("Native host stopped");
    Ok(())
}
