//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! ICS gateway daemon
//!
//! Usage:
//!   icsgate [CONFIG]
//!
//! Exit codes: 0 after SIGINT/SIGTERM, 1 configuration or listener failure,
//! 2 runtime failure, 3 persistence failure, 4 panic.

use clap::Parser;
use icsgate_server::{Gateway, GatewayConfig, MemoryPersistence, StartupError};
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const EXIT_PANIC: u8 = 4;

#[derive(Parser, Debug)]
#[command(name = "icsgate")]
#[command(about = "ICS terminal gateway")]
#[command(version)]
struct Args {
    /// Path to the configuration file
    #[arg(default_value = "/etc/icsconf.toml")]
    config: PathBuf,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let config = GatewayConfig::load(&args.config);
    init_logging(config.as_ref().map_or("info", |c| c.logging.level.as_str()));

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!(path = %args.config.display(), error = %e, "configuration not loaded");
            return ExitCode::from(StartupError::from(e).exit_code());
        }
    };
    info!(path = %args.config.display(), mode = %config.server.mode, "starting");

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            let err = StartupError::Runtime(e.to_string());
            error!(error = %err, "runtime not started");
            return ExitCode::from(err.exit_code());
        }
    };

    match std::panic::catch_unwind(AssertUnwindSafe(|| runtime.block_on(serve(config)))) {
        Ok(Ok(())) => {
            info!("stopped");
            ExitCode::SUCCESS
        }
        Ok(Err(e)) => {
            error!(error = %e, "gateway failed");
            ExitCode::from(e.exit_code())
        }
        Err(_) => {
            error!("gateway panicked");
            ExitCode::from(EXIT_PANIC)
        }
    }
}

fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn serve(config: GatewayConfig) -> Result<(), StartupError> {
    let persistence = MemoryPersistence::from_config(&config)
        .map_err(|e| StartupError::Persistence(e.to_string()))?;
    let gateway = Gateway::start(config, Arc::new(persistence)).await?;
    info!(bound = ?gateway.bound(), "listening");

    shutdown_signal()
        .await
        .map_err(|e| StartupError::Runtime(e.to_string()))?;
    info!("shutdown signal received");
    gateway.shutdown().await
}

#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        interrupted = tokio::signal::ctrl_c() => interrupted,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
