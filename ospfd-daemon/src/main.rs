//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

mod config;
mod notification;
mod rib;

use clap::{App, Arg};
use config::{Config, LoggingFileRotation, LoggingFmtStyle};
use ospfd_engine::config::ConfigMsg;
use ospfd_engine::instance::Instance;
use ospfd_protocol::{InstanceHandle, spawn_protocol_task};
use ospfd_utils::southbound::SouthboundMsg;
use rib::Rib;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tracing::level_filters::LevelFilter;
use tracing::{error, info, trace};
use tracing_appender::rolling;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer};

fn init_tracing(config: &config::Logging) {
    // Enable logging to a file.
    let file = config.file.enabled.then(|| {
        let file_appender = match config.file.rotation {
            LoggingFileRotation::Never => {
                rolling::never(&config.file.dir, &config.file.name)
            }
            LoggingFileRotation::Hourly => {
                rolling::hourly(&config.file.dir, &config.file.name)
            }
            LoggingFileRotation::Daily => {
                rolling::daily(&config.file.dir, &config.file.name)
            }
        };

        let log_level_filter = LevelFilter::from_level(tracing::Level::TRACE);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(false)
            .with_thread_ids(config.file.fmt.show_thread_id)
            .with_file(config.file.fmt.show_source)
            .with_line_number(config.file.fmt.show_source)
            .with_ansi(config.file.fmt.colors);
        let layer = match config.file.fmt.style {
            LoggingFmtStyle::Compact => layer.compact().boxed(),
            LoggingFmtStyle::Full => layer.boxed(),
            LoggingFmtStyle::Json => layer.json().boxed(),
            LoggingFmtStyle::Pretty => layer.pretty().boxed(),
        };
        layer.with_filter(log_level_filter)
    });

    // Enable logging to stdout.
    let stdout = config.stdout.enabled.then(|| {
        let log_level_filter = LevelFilter::from_level(tracing::Level::TRACE);
        let layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(config.stdout.fmt.show_thread_id)
            .with_file(config.stdout.fmt.show_source)
            .with_line_number(config.stdout.fmt.show_source)
            .with_ansi(config.stdout.fmt.colors);
        let layer = match config.stdout.fmt.style {
            LoggingFmtStyle::Compact => layer.compact().boxed(),
            LoggingFmtStyle::Full => layer.boxed(),
            LoggingFmtStyle::Json => layer.json().boxed(),
            LoggingFmtStyle::Pretty => layer.pretty().boxed(),
        };
        layer.with_filter(log_level_filter)
    });

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("ospfd=debug"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(file)
        .with(stdout)
        .init();
}

fn signal_listener() -> mpsc::Receiver<()> {
    let (signal_tx, signal_rx) = mpsc::channel(1);

    tokio::task::spawn(async move {
        let (mut sigint, mut sigterm) = match (
            signal(SignalKind::interrupt()),
            signal(SignalKind::terminate()),
        ) {
            (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
            (Err(error), _) | (_, Err(error)) => {
                error!(%error, "failed to install signal handlers");
                return;
            }
        };

        tokio::select! {
            _ = sigint.recv() => {
                info!("received SIGINT");
                let _ = signal_tx.send(()).await;
            },
            _ = sigterm.recv() => {
                info!("received SIGTERM");
                let _ = signal_tx.send(()).await;
            }
        }
    });

    signal_rx
}

async fn run(config: Config) {
    let mut rib = Rib::default();

    // Spawn signal listener.
    let mut signal_rx = signal_listener();

    // Spawn the OSPF instance.
    let (rib_tx, mut rib_rx) = mpsc::unbounded_channel();
    let (net_tx, mut net_rx) = mpsc::unbounded_channel();
    let instance = spawn_protocol_task::<Instance>(
        "default".to_owned(),
        &rib_tx,
        &net_tx,
    );
    if instance
        .config_tx
        .send(ConfigMsg::Load(config.ospf))
        .await
        .is_err()
    {
        error!("failed to configure OSPF instance");
        return;
    }

    // Start listening to interface notifications.
    let (_notif_task, mut notif_rx) = match config.notifications.enabled {
        true => {
            let (task, rx) = notification::start(&config.notifications);
            (Some(task), rx)
        }
        false => (None, mpsc::channel(1).1),
    };

    loop {
        tokio::select! {
            Some(msg) = rib_rx.recv() => {
                rib.process_route_msg(msg);
            }
            Some(msg) = notif_rx.recv() => {
                let link_state = rib.process_notification(&msg);
                let _ = instance
                    .southbound_tx
                    .send(SouthboundMsg::Asic(msg))
                    .await;
                if let Some(link_state) = link_state {
                    let _ = instance
                        .southbound_tx
                        .send(SouthboundMsg::LinkState(link_state))
                        .await;
                }
            }
            Some(msg) = net_rx.recv() => {
                // Frame transmission is handled by the packet transport.
                trace!(
                    ifname = %msg.ifname,
                    ifindex = msg.ifindex,
                    length = msg.frame.len(),
                    "frame ready for transmission"
                );
            }
            Some(_) = signal_rx.recv() => {
                break;
            }
            else => break,
        }
    }

    // Closing the configuration channel stops the instance, which then
    // flushes its self-originated LSAs.
    info!("shutting down");
    let InstanceHandle {
        config_tx,
        southbound_tx,
        task,
    } = instance;
    drop(config_tx);
    drop(southbound_tx);
    if let Err(error) = task.await {
        error!(%error, "OSPF instance terminated abnormally");
    }
}

// ===== main =====

fn main() {
    // Parse command-line parameters.
    let matches = App::new("OSPFv2 routing daemon")
        .version(env!("CARGO_PKG_VERSION"))
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("file")
                .help("Specify an alternative configuration file."),
        )
        .get_matches();

    // Read configuration file.
    let config_file = matches.value_of("config");
    let config = match Config::load(config_file) {
        Ok(config) => config,
        Err(error) => {
            match std::error::Error::source(&error) {
                Some(source) => eprintln!("{error}: {source}"),
                None => eprintln!("{error}"),
            }
            std::process::exit(1);
        }
    };

    // Initialize tracing.
    init_tracing(&config.logging);

    // We're ready to go!
    info!("starting up");

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(error) => {
            error!(%error, "failed to create async runtime");
            std::process::exit(1);
        }
    };
    runtime.block_on(run(config));
}
