use serde::{Deserialize, Serialize};

use crate::model::ChatMessage;

/// Seconds after which a running session counts as complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimerThreshold(u64);

impl TimerThreshold {
    /// Lesson chat: fifteen minutes.
    pub const LESSON_CHAT: Self = Self(15 * 60);

    /// Voice and free-conversation practice.
    ///
    /// 25 hours, carried over as found in the voice screens; in practice the
    /// threshold never fires and those sessions end through an explicit exit.
    pub const VOICE_PRACTICE: Self = Self(90_000);

    #[must_use]
    pub fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    #[must_use]
    pub fn secs(&self) -> u64 {
        self.0
    }
}

/// Result of one timer tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerStatus {
    /// No user message yet.
    Idle,
    Running { elapsed: u64 },
    /// Reported once, on the tick that crosses the threshold.
    ThresholdReached { elapsed: u64 },
}

/// Wall-clock session counter advanced one second per tick.
///
/// There is no pause; once started the timer only stops with its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTimer {
    threshold: TimerThreshold,
    running: bool,
    elapsed: u64,
    fired: bool,
}

impl SessionTimer {
    #[must_use]
    pub fn new(threshold: TimerThreshold) -> Self {
        Self {
            threshold,
            running: false,
            elapsed: 0,
            fired: false,
        }
    }

    #[must_use]
    pub fn threshold(&self) -> TimerThreshold {
        self.threshold
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
    }

    #[must_use]
    pub fn elapsed_secs(&self) -> u64 {
        self.elapsed
    }

    #[must_use]
    pub fn threshold_reached(&self) -> bool {
        self.fired
    }

    /// Starts counting. Calling it again has no effect.
    pub fn start(&mut self) {
        self.running = true;
    }

    /// Starts the timer on the first message that was not injected by the system.
    ///
    /// Returns true if this message started the timer.
    pub fn start_on(&mut self, message: &ChatMessage) -> bool {
        if self.running || message.is_system() {
            return false;
        }
        self.start();
        true
    }

    /// Advances the counter by one second.
    pub fn tick(&mut self) -> TimerStatus {
        if !self.running {
            return TimerStatus::Idle;
        }
        self.elapsed = self.elapsed.saturating_add(1);
        if !self.fired && self.elapsed >= self.threshold.0 {
            self.fired = true;
            return TimerStatus::ThresholdReached {
                elapsed: self.elapsed,
            };
        }
        TimerStatus::Running {
            elapsed: self.elapsed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    #[test]
    fn idle_until_first_user_message() {
        let mut timer = SessionTimer::new(TimerThreshold::LESSON_CHAT);
        assert_eq!(timer.tick(), TimerStatus::Idle);

        assert!(!timer.start_on(&ChatMessage::system("Welcome to the market", fixed_now())));
        assert_eq!(timer.tick(), TimerStatus::Idle);

        assert!(timer.start_on(&ChatMessage::user("Hola", fixed_now())));
        assert!(!timer.start_on(&ChatMessage::user("otra vez", fixed_now())));
        assert_eq!(timer.tick(), TimerStatus::Running { elapsed: 1 });
    }

    #[test]
    fn threshold_fires_once() {
        let mut timer = SessionTimer::new(TimerThreshold::from_secs(3));
        timer.start();
        assert_eq!(timer.tick(), TimerStatus::Running { elapsed: 1 });
        assert_eq!(timer.tick(), TimerStatus::Running { elapsed: 2 });
        assert_eq!(timer.tick(), TimerStatus::ThresholdReached { elapsed: 3 });
        assert_eq!(timer.tick(), TimerStatus::Running { elapsed: 4 });
        assert!(timer.threshold_reached());
    }

    #[test]
    fn lesson_threshold_is_fifteen_minutes() {
        let mut timer = SessionTimer::new(TimerThreshold::LESSON_CHAT);
        timer.start();
        let mut fired_at = None;
        for _ in 0..1000 {
            if let TimerStatus::ThresholdReached { elapsed } = timer.tick() {
                fired_at = Some(elapsed);
            }
        }
        assert_eq!(fired_at, Some(900));
        assert_eq!(TimerThreshold::VOICE_PRACTICE.secs(), 90_000);
    }
}
