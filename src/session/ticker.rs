//! Cancellable scheduled task
//!
//! Fires a command onto the session queue at a fixed rate. Each start gets
//! a fresh generation; ticks carry it, and the session only honours ticks
//! whose generation is still current. `stop` bumps the generation and aborts
//! the task, so a tick that was already queued is ignored when processed.

use std::time::Duration;

use tokio::sync::mpsc::WeakUnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use super::Command;

#[derive(Debug, Default)]
pub(crate) struct Ticker {
    generation: u64,
    task: Option<JoinHandle<()>>,
}

impl Ticker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Whether a tick with this generation should still be honoured
    pub(crate) fn accepts(&self, generation: u64) -> bool {
        self.is_running() && generation == self.generation
    }

    /// Start ticking; no-op if already running. First tick fires immediately.
    pub(crate) fn start<F>(&mut self, period: Duration, tx: WeakUnboundedSender<Command>, make: F)
    where
        F: Fn(u64) -> Command + Send + 'static,
    {
        if self.is_running() {
            return;
        }
        self.generation += 1;
        let generation = self.generation;

        self.task = Some(tokio::spawn(async move {
            let mut ticks = interval(period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                let Some(tx) = tx.upgrade() else { break };
                if tx.send(make(generation)).is_err() {
                    break;
                }
            }
        }));
    }

    /// Cancel; no tick of the previous run is honoured after this returns
    pub(crate) fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            self.generation += 1;
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn tick_generation(cmd: Command) -> u64 {
        match cmd {
            Command::ProgressTick(generation) => generation,
            _ => panic!("unexpected command"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_at_fixed_rate() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut ticker = Ticker::new();
        ticker.start(Duration::from_millis(250), tx.downgrade(), Command::ProgressTick);

        tokio::time::sleep(Duration::from_millis(600)).await;
        ticker.stop();

        let mut count = 0;
        while rx.try_recv().is_ok() {
            count += 1;
        }
        // ticks at 0, 250, 500
        assert_eq!(count, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_tick_rejected_after_stop() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut ticker = Ticker::new();
        ticker.start(Duration::from_millis(100), tx.downgrade(), Command::ProgressTick);
        tokio::task::yield_now().await;

        let queued = tick_generation(rx.recv().await.unwrap());
        assert!(ticker.accepts(queued));

        ticker.stop();
        assert!(!ticker.accepts(queued));
        assert!(!ticker.is_running());

        // a restart never revives the old generation
        ticker.start(Duration::from_millis(100), tx.downgrade(), Command::ProgressTick);
        assert!(!ticker.accepts(queued));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_idempotent() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut ticker = Ticker::new();
        ticker.start(Duration::from_millis(100), tx.downgrade(), Command::ProgressTick);
        let generation = ticker.generation;
        ticker.start(Duration::from_millis(100), tx.downgrade(), Command::ProgressTick);
        assert_eq!(ticker.generation, generation);

        ticker.stop();
        ticker.stop();
        assert!(!ticker.is_running());
    }
}
