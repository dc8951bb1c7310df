//! ReadyPoller - 実行可能になったタスクの定期スキャン
//!
//! `after` を過ぎたタスクと、lease が期限切れになったタスクは、誰かが
//! 書き込むまで通知されない。poller は一定間隔で store を走査して
//! ready を再送する（取りこぼした購読者の回復にもなる）。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::orchestrator::Orchestrator;

pub struct ReadyPoller {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl ReadyPoller {
    /// 走査ループを起動する。`interval` は 0 より大きいこと
    pub fn spawn(orchestrator: Arc<Orchestrator>, interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(poll_loop(orchestrator, interval, shutdown_rx));
        Self { shutdown_tx, join }
    }

    pub fn request_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        if let Err(err) = self.join.await {
            tracing::error!(error = %err, "ready poller panicked");
        }
    }
}

async fn poll_loop(
    orchestrator: Arc<Orchestrator>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                match orchestrator.notify_ready_tasks().await {
                    Ok(0) => {}
                    Ok(count) => tracing::debug!(count, "ready tasks announced"),
                    Err(err) => tracing::error!(error = %err, "ready scan failed"),
                }
            }
        }
    }
    tracing::debug!("ready poller stopped");
}
