//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::time::Duration;

use ospfd_engine::southbound::decode_notification;
use ospfd_utils::Sender;
use ospfd_utils::southbound::AsicNotification;
use ospfd_utils::task::Task;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tracing::{Instrument, debug, debug_span, warn};

use crate::config::Notifications;

// ===== global functions =====

// Starts the task that reads notifications from the ASIC driver.
//
// The driver publishes one JSON-encoded notification per line. The
// connection is re-established whenever it's lost.
pub(crate) fn start(
    config: &Notifications,
) -> (Task<()>, mpsc::Receiver<AsicNotification>) {
    let (notif_tx, notif_rx) = mpsc::channel(64);
    let path = config.path.clone();
    let interval = Duration::from_secs(config.reconnect_interval.into());

    let span = debug_span!("notifications");
    let task = Task::spawn_supervised(move || {
        let path = path.clone();
        let notif_tx = notif_tx.clone();
        async move {
            loop {
                match UnixStream::connect(&path).await {
                    Ok(stream) => {
                        debug!(%path, "connected to ASIC driver");
                        read_loop(stream, &notif_tx).await;
                        if notif_tx.is_closed() {
                            return;
                        }
                    }
                    Err(error) => {
                        warn!(%path, %error, "ASIC driver unreachable");
                    }
                }
                tokio::time::sleep(interval).await;
            }
        }
        .instrument(span.clone())
    });

    (task, notif_rx)
}

// ===== helper functions =====

async fn read_loop(stream: UnixStream, notif_tx: &Sender<AsicNotification>) {
    let mut lines = BufReader::new(stream).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                warn!("ASIC driver disconnected");
                return;
            }
            Err(error) => {
                warn!(%error, "failed to read notification");
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        // Log but otherwise ignore malformed notifications.
        match decode_notification(&line) {
            Ok(msg) => {
                if notif_tx.send(msg).await.is_err() {
                    return;
                }
            }
            Err(error) => error.log(),
        }
    }
}
