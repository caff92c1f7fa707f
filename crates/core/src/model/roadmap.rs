use thiserror::Error;

use crate::model::ids::{ChapterId, LessonId, LessonKey};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RoadmapError {
    #[error("chapter {0} has no lessons")]
    EmptyChapter(u32),
}

/// Shape of the curriculum: chapters numbered from 1, each holding lessons
/// numbered from 1.
///
/// An unbounded roadmap has no known chapter sizes; every chapter is treated
/// as open-ended, the next lesson is always `lesson + 1` in the same chapter,
/// and the first lesson of every chapter starts unlocked.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Roadmap {
    lesson_counts: Vec<u32>,
}

impl Roadmap {
    #[must_use]
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Builds a roadmap from per-chapter lesson counts, chapter 1 first.
    ///
    /// # Errors
    ///
    /// Returns `RoadmapError::EmptyChapter` if any chapter has zero lessons.
    pub fn new(lesson_counts: Vec<u32>) -> Result<Self, RoadmapError> {
        if let Some(pos) = lesson_counts.iter().position(|&n| n == 0) {
            let chapter = u32::try_from(pos + 1).unwrap_or(u32::MAX);
            return Err(RoadmapError::EmptyChapter(chapter));
        }
        Ok(Self { lesson_counts })
    }

    #[must_use]
    pub fn is_unbounded(&self) -> bool {
        self.lesson_counts.is_empty()
    }

    /// Number of lessons in a chapter, when known.
    #[must_use]
    pub fn lessons_in(&self, chapter: ChapterId) -> Option<u32> {
        let idx = usize::try_from(chapter.value()).ok()?.checked_sub(1)?;
        self.lesson_counts.get(idx).copied()
    }

    #[must_use]
    pub fn first(&self) -> LessonKey {
        LessonKey::from_raw(1, 1)
    }

    /// True for lessons that need no completed predecessor to open.
    #[must_use]
    pub fn starts_unlocked(&self, key: LessonKey) -> bool {
        if self.is_unbounded() {
            key.lesson.value() == 1
        } else {
            key == self.first()
        }
    }

    /// Lesson unlocked by completing `key`.
    ///
    /// Crosses into the next chapter after the last lesson of a bounded
    /// chapter; `None` after the very last lesson of the roadmap.
    #[must_use]
    pub fn next_after(&self, key: LessonKey) -> Option<LessonKey> {
        let lesson = key.lesson.value().checked_add(1)?;
        if self.is_unbounded() {
            return Some(LessonKey::new(key.chapter, LessonId::new(lesson)));
        }

        let count = self.lessons_in(key.chapter)?;
        if lesson <= count {
            return Some(LessonKey::new(key.chapter, LessonId::new(lesson)));
        }

        let next_chapter = ChapterId::new(key.chapter.value().checked_add(1)?);
        self.lessons_in(next_chapter)
            .map(|_| LessonKey::new(next_chapter, LessonId::new(1)))
    }

    /// Lesson that has to be completed before `key` unlocks.
    #[must_use]
    pub fn previous(&self, key: LessonKey) -> Option<LessonKey> {
        if key.lesson.value() > 1 {
            return Some(LessonKey::new(
                key.chapter,
                LessonId::new(key.lesson.value() - 1),
            ));
        }
        let prev_chapter = ChapterId::new(key.chapter.value().checked_sub(1)?);
        let count = self.lessons_in(prev_chapter)?;
        Some(LessonKey::new(prev_chapter, LessonId::new(count)))
    }

    /// All lesson keys of a chapter, when its size is known.
    #[must_use]
    pub fn chapter_lessons(&self, chapter: ChapterId) -> Vec<LessonKey> {
        self.lessons_in(chapter)
            .map(|count| {
                (1..=count)
                    .map(|lesson| LessonKey::new(chapter, LessonId::new(lesson)))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbounded_roadmap_stays_in_chapter() {
        let roadmap = Roadmap::unbounded();
        assert_eq!(
            roadmap.next_after(LessonKey::from_raw(2, 9)),
            Some(LessonKey::from_raw(2, 10))
        );
        assert_eq!(
            roadmap.previous(LessonKey::from_raw(2, 1)),
            None,
            "chapter sizes are unknown"
        );
    }

    #[test]
    fn unbounded_roadmap_opens_every_chapter() {
        let roadmap = Roadmap::unbounded();
        assert!(roadmap.starts_unlocked(LessonKey::from_raw(1, 1)));
        assert!(roadmap.starts_unlocked(LessonKey::from_raw(2, 1)));
        assert!(!roadmap.starts_unlocked(LessonKey::from_raw(2, 2)));
    }

    #[test]
    fn bounded_roadmap_crosses_chapters() {
        let roadmap = Roadmap::new(vec![3, 2]).unwrap();
        assert_eq!(
            roadmap.next_after(LessonKey::from_raw(1, 3)),
            Some(LessonKey::from_raw(2, 1))
        );
        assert_eq!(
            roadmap.previous(LessonKey::from_raw(2, 1)),
            Some(LessonKey::from_raw(1, 3))
        );
        assert_eq!(roadmap.next_after(LessonKey::from_raw(2, 2)), None);
        assert_eq!(roadmap.chapter_lessons(ChapterId::new(2)).len(), 2);
        assert!(roadmap.chapter_lessons(ChapterId::new(7)).is_empty());
    }

    #[test]
    fn first_lesson_has_no_predecessor() {
        let roadmap = Roadmap::new(vec![4, 2]).unwrap();
        assert!(roadmap.starts_unlocked(LessonKey::from_raw(1, 1)));
        assert!(!roadmap.starts_unlocked(LessonKey::from_raw(2, 1)));
        assert_eq!(roadmap.previous(LessonKey::from_raw(1, 1)), None);
    }

    #[test]
    fn rejects_empty_chapters() {
        assert_eq!(Roadmap::new(vec![3, 0]), Err(RoadmapError::EmptyChapter(2)));
    }
}
