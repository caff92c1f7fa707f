use thiserror::Error;

use crate::model::roadmap::{Roadmap, RoadmapError};
use crate::timer::TimerThreshold;

/// Tunables for progress tracking.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackerSettings {
    lesson_threshold: TimerThreshold,
    voice_threshold: TimerThreshold,
    roadmap: Roadmap,
}

#[derive(Clone, Debug, Default)]
pub struct TrackerSettingsDraft {
    pub lesson_threshold_secs: Option<u64>,
    pub voice_threshold_secs: Option<u64>,
    pub chapter_lesson_counts: Option<Vec<u32>>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SettingsError {
    #[error("timer threshold must be > 0")]
    ZeroThreshold,
    #[error(transparent)]
    Roadmap(#[from] RoadmapError),
}

impl TrackerSettingsDraft {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the draft, filling unset values with defaults.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` if a threshold is zero or the roadmap is invalid.
    pub fn validate(self) -> Result<TrackerSettings, SettingsError> {
        let lesson_threshold = threshold_or(self.lesson_threshold_secs, TimerThreshold::LESSON_CHAT)?;
        let voice_threshold = threshold_or(self.voice_threshold_secs, TimerThreshold::VOICE_PRACTICE)?;
        let roadmap = match self.chapter_lesson_counts {
            Some(counts) if !counts.is_empty() => Roadmap::new(counts)?,
            _ => Roadmap::unbounded(),
        };

        Ok(TrackerSettings {
            lesson_threshold,
            voice_threshold,
            roadmap,
        })
    }
}

impl TrackerSettings {
    #[must_use]
    pub fn lesson_threshold(&self) -> TimerThreshold {
        self.lesson_threshold
    }

    #[must_use]
    pub fn voice_threshold(&self) -> TimerThreshold {
        self.voice_threshold
    }

    #[must_use]
    pub fn roadmap(&self) -> &Roadmap {
        &self.roadmap
    }

    #[must_use]
    pub fn with_roadmap(mut self, roadmap: Roadmap) -> Self {
        self.roadmap = roadmap;
        self
    }
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            lesson_threshold: TimerThreshold::LESSON_CHAT,
            voice_threshold: TimerThreshold::VOICE_PRACTICE,
            roadmap: Roadmap::unbounded(),
        }
    }
}

fn threshold_or(value: Option<u64>, default: TimerThreshold) -> Result<TimerThreshold, SettingsError> {
    match value {
        None => Ok(default),
        Some(0) => Err(SettingsError::ZeroThreshold),
        Some(secs) => Ok(TimerThreshold::from_secs(secs)),
    }
}
