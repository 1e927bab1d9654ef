// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use harnessd::{Supervisor, SupervisorConfig};

#[tokio::main]
async fn main() {
    let config = SupervisorConfig::parse();
    init_tracing(&config);

    let supervisor = match Supervisor::bind(&config).await {
        Ok(supervisor) => supervisor,
        Err(e) => {
            error!("fatal: failed to bind: {e}");
            std::process::exit(1);
        }
    };

    let shutdown = supervisor.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.cancel();
        }
    });

    supervisor.run().await;
}

fn init_tracing(config: &SupervisorConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_level.clone()));

    if config.log_format == "json" {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
