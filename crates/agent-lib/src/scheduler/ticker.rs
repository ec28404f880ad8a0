//! Tick sources for the scheduler

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

/// Source of scheduling ticks
#[async_trait]
pub trait Ticker: Send {
    /// Wait for the next tick; returns `false` once no more ticks will come
    async fn tick(&mut self) -> bool;
}

/// Wall-clock ticker firing every `period`, starting one period from creation
///
/// Ticks missed while a pass overruns are skipped rather than replayed.
pub struct IntervalTicker {
    interval: Interval,
}

impl IntervalTicker {
    /// Must be called from within a tokio runtime
    pub fn new(period: Duration) -> Self {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { interval }
    }

    pub fn period(&self) -> Duration {
        self.interval.period()
    }
}

#[async_trait]
impl Ticker for IntervalTicker {
    async fn tick(&mut self) -> bool {
        self.interval.tick().await;
        true
    }
}

/// Ticker driven by hand through a [`TickHandle`]
///
/// Exhausted once every handle has been dropped and queued ticks are consumed.
pub struct ManualTicker {
    rx: mpsc::UnboundedReceiver<()>,
}

/// Sending side of a [`ManualTicker`]
#[derive(Clone)]
pub struct TickHandle {
    tx: mpsc::UnboundedSender<()>,
}

impl ManualTicker {
    pub fn new() -> (TickHandle, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (TickHandle { tx }, Self { rx })
    }
}

impl TickHandle {
    /// Queue one tick; returns `false` if the ticker is gone
    pub fn tick(&self) -> bool {
        self.tx.send(()).is_ok()
    }
}

#[async_trait]
impl Ticker for ManualTicker {
    async fn tick(&mut self) -> bool {
        self.rx.recv().await.is_some()
    }
}
