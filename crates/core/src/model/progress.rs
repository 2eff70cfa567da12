use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::ids::ProfileId;
use crate::model::percent::Percent;

//
// ─── LESSON PROGRESS ──────────────────────────────────────────────────────────
//

/// Progress of one profile through one lesson.
///
/// `owner_profile_id` and `last_updated` are stamped by the writer and are never
/// taken from the caller; see [`LessonProgressPatch::apply`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonProgress {
    pub video_completed: bool,
    pub interactive_completed: bool,
    pub lesson_completed: bool,
    pub current_progress: Percent,
    #[serde(default)]
    pub completed_tests: BTreeSet<String>,
    pub last_updated: DateTime<Utc>,
    pub owner_profile_id: ProfileId,
}

impl LessonProgress {
    /// A fresh record for a lesson that has not been touched yet.
    #[must_use]
    pub fn empty(owner: ProfileId, now: DateTime<Utc>) -> Self {
        Self {
            video_completed: false,
            interactive_completed: false,
            lesson_completed: false,
            current_progress: Percent::ZERO,
            completed_tests: BTreeSet::new(),
            last_updated: now,
            owner_profile_id: owner,
        }
    }

    #[must_use]
    pub fn is_owned_by(&self, profile: &ProfileId) -> bool {
        &self.owner_profile_id == profile
    }

    #[must_use]
    pub fn has_completed_test(&self, test_id: &str) -> bool {
        self.completed_tests.contains(test_id)
    }
}

/// Caller-supplied fields for a lesson progress write.
///
/// Unset fields keep the value of the record being merged into.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LessonProgressPatch {
    pub video_completed: Option<bool>,
    pub interactive_completed: Option<bool>,
    pub lesson_completed: Option<bool>,
    pub current_progress: Option<Percent>,
    /// Replaces the whole set when present.
    pub completed_tests: Option<BTreeSet<String>>,
    /// Unioned into the set after any replacement.
    pub add_completed_tests: Vec<String>,
}

impl LessonProgressPatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn video_completed(mut self, value: bool) -> Self {
        self.video_completed = Some(value);
        self
    }

    #[must_use]
    pub fn interactive_completed(mut self, value: bool) -> Self {
        self.interactive_completed = Some(value);
        self
    }

    #[must_use]
    pub fn lesson_completed(mut self, value: bool) -> Self {
        self.lesson_completed = Some(value);
        self
    }

    #[must_use]
    pub fn current_progress(mut self, value: Percent) -> Self {
        self.current_progress = Some(value);
        self
    }

    #[must_use]
    pub fn completed_tests<I, S>(mut self, tests: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.completed_tests = Some(tests.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn add_completed_test(mut self, test_id: impl Into<String>) -> Self {
        self.add_completed_tests.push(test_id.into());
        self
    }

    /// Merge this patch into `base`, stamping `owner` and `now`.
    ///
    /// A `base` written under another profile is discarded rather than merged.
    #[must_use]
    pub fn apply(
        self,
        base: Option<LessonProgress>,
        owner: &ProfileId,
        now: DateTime<Utc>,
    ) -> LessonProgress {
        let mut record = base
            .filter(|existing| existing.is_owned_by(owner))
            .unwrap_or_else(|| LessonProgress::empty(owner.clone(), now));

        if let Some(value) = self.video_completed {
            record.video_completed = value;
        }
        if let Some(value) = self.interactive_completed {
            record.interactive_completed = value;
        }
        if let Some(value) = self.lesson_completed {
            record.lesson_completed = value;
        }
        if let Some(value) = self.current_progress {
            record.current_progress = value;
        }
        if let Some(tests) = self.completed_tests {
            record.completed_tests = tests;
        }
        record.completed_tests.extend(self.add_completed_tests);

        record.owner_profile_id = owner.clone();
        record.last_updated = now;
        record
    }
}
