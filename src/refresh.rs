use std::time::Duration;

use log::{debug, warn};
use rocket::tokio::{self, select};
use rocket::tokio::sync::{broadcast, mpsc};
use rocket::tokio::time::{self, MissedTickBehavior};

use crate::selection::SelectionChange;

/// Why a view is being re-rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Timer,
    SelectionChanged,
}

/// Merges the periodic timer and the selection-change feed for `key` into one
/// channel. The first timer tick fires immediately. Both producers stop once
/// the receiver is dropped.
pub fn spawn_triggers(
    period: Duration,
    changes: broadcast::Receiver<SelectionChange>,
    key: String,
) -> mpsc::Receiver<Trigger> {
    let (tx, rx) = mpsc::channel(8);
    tokio::spawn(run_timer(period, tx.clone()));
    tokio::spawn(forward_changes(changes, key, tx));
    rx
}

async fn run_timer(period: Duration, tx: mpsc::Sender<Trigger>) {
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        select! {
            _ = ticker.tick() => {
                if tx.send(Trigger::Timer).await.is_err() {
                    break;
                }
            }
            _ = tx.closed() => break,
        }
    }
}

async fn forward_changes(
    mut changes: broadcast::Receiver<SelectionChange>,
    key: String,
    tx: mpsc::Sender<Trigger>,
) {
    loop {
        let change = select! {
            change = changes.recv() => change,
            _ = tx.closed() => break,
        };
        match change {
            Ok(change) if change.key != key => continue,
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("selection feed for {key} skipped {skipped} notifications");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
        if tx.send(Trigger::SelectionChanged).await.is_err() {
            break;
        }
    }
    debug!("stopped watching {key}");
}
