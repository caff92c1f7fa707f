use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::interval;

use practice_core::model::ChatMessage;
use practice_core::timer::{SessionTimer, TimerStatus, TimerThreshold};

/// Drives a `SessionTimer` from a 1 Hz tokio interval.
///
/// The driver stays idle until the first non-system message. Elapsed seconds
/// are published on a `watch` channel; the threshold is signalled once.
pub struct TimerDriver {
    timer: SessionTimer,
    elapsed_tx: watch::Sender<u64>,
    elapsed_rx: watch::Receiver<u64>,
    threshold_rx: Option<oneshot::Receiver<u64>>,
    task: Option<JoinHandle<()>>,
}

impl TimerDriver {
    #[must_use]
    pub fn new(threshold: TimerThreshold) -> Self {
        let (elapsed_tx, elapsed_rx) = watch::channel(0);
        Self {
            timer: SessionTimer::new(threshold),
            elapsed_tx,
            elapsed_rx,
            threshold_rx: None,
            task: None,
        }
    }

    #[must_use]
    pub fn threshold(&self) -> TimerThreshold {
        self.timer.threshold()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Seconds counted so far.
    #[must_use]
    pub fn elapsed_secs(&self) -> u64 {
        *self.elapsed_rx.borrow()
    }

    /// Receiver that follows the elapsed seconds.
    #[must_use]
    pub fn elapsed(&self) -> watch::Receiver<u64> {
        self.elapsed_rx.clone()
    }

    /// Start ticking if `message` is the first one sent by a participant.
    ///
    /// Must be called inside a tokio runtime. Returns true if the driver
    /// started on this message.
    pub fn start_on(&mut self, message: &ChatMessage) -> bool {
        if self.task.is_some() || !self.timer.start_on(message) {
            return false;
        }
        self.spawn();
        true
    }

    /// Start ticking regardless of the conversation.
    pub fn start(&mut self) {
        if self.task.is_some() {
            return;
        }
        self.timer.start();
        self.spawn();
    }

    /// Take the one-shot threshold signal. Resolves with the elapsed seconds
    /// on the tick that crosses the threshold.
    pub fn take_threshold(&mut self) -> Option<oneshot::Receiver<u64>> {
        self.threshold_rx.take()
    }

    /// Stop ticking and return the seconds counted.
    pub fn stop(&mut self) -> u64 {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.elapsed_secs()
    }

    fn spawn(&mut self) {
        let (threshold_tx, threshold_rx) = oneshot::channel();
        self.threshold_rx = Some(threshold_rx);

        let mut timer = self.timer.clone();
        let elapsed_tx = self.elapsed_tx.clone();
        self.task = Some(tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(1));
            // The first tick of an interval completes immediately.
            ticker.tick().await;
            let mut threshold_tx = Some(threshold_tx);
            loop {
                ticker.tick().await;
                match timer.tick() {
                    TimerStatus::Idle => {}
                    TimerStatus::Running { elapsed } => {
                        elapsed_tx.send_replace(elapsed);
                    }
                    TimerStatus::ThresholdReached { elapsed } => {
                        elapsed_tx.send_replace(elapsed);
                        if let Some(tx) = threshold_tx.take() {
                            let _ = tx.send(elapsed);
                        }
                    }
                }
            }
        }));
    }
}

impl Drop for TimerDriver {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use practice_core::time::fixed_now;

    #[tokio::test(start_paused = true)]
    async fn threshold_fires_once_after_the_configured_seconds() {
        let mut driver = TimerDriver::new(TimerThreshold::from_secs(3));
        assert!(!driver.start_on(&ChatMessage::system("Lesson intro", fixed_now())));
        assert!(!driver.is_running());

        assert!(driver.start_on(&ChatMessage::user("Hola", fixed_now())));
        assert!(!driver.start_on(&ChatMessage::user("Otra vez", fixed_now())));

        let threshold = driver.take_threshold().expect("signal");
        assert_eq!(threshold.await.unwrap(), 3);

        tokio::time::sleep(Duration::from_secs(2)).await;
        let elapsed = driver.stop();
        assert!(elapsed >= 4);
        assert!(!driver.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_freezes_the_elapsed_value() {
        let mut driver = TimerDriver::new(TimerThreshold::LESSON_CHAT);
        let mut rx = driver.elapsed();
        driver.start();

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), 1);

        let stopped = driver.stop();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(driver.elapsed_secs(), stopped);
    }
}
