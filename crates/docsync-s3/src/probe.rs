use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};

/// Upper bound for a single reachability check.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Periodically probe `addr` and publish reachability.
///
/// The signal starts as `false` and only changes on transitions, so
/// subscribers never see duplicate values. The task exits once every
/// receiver is dropped.
pub fn spawn(addr: String, interval: Duration) -> (watch::Receiver<bool>, JoinHandle<()>) {
    let (tx, rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tx.closed() => break,
                _ = ticker.tick() => {
                    let online = is_reachable(&addr, CONNECT_TIMEOUT).await;
                    let changed = tx.send_if_modified(|current| {
                        if *current == online {
                            false
                        } else {
                            *current = online;
                            true
                        }
                    });
                    if changed {
                        info!("Network {} ({})", if online { "reachable" } else { "unreachable" }, addr);
                    }
                }
            }
        }

        debug!("Connectivity probe for {} stopped", addr);
    });

    (rx, task)
}

/// Whether a TCP connection to `addr` succeeds within `timeout`.
pub async fn is_reachable(addr: &str, timeout: Duration) -> bool {
    matches!(time::timeout(timeout, TcpStream::connect(addr)).await, Ok(Ok(_)))
}
