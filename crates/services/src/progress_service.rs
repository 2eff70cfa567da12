use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use progress_core::Clock;
use progress_core::keys::{self, DataKind, KeySpace};
use progress_core::model::{
    AwardDraft, CourseAward, CourseId, LessonId, LessonProgress, LessonProgressPatch, Percent,
    ProfileId,
};
use storage::repository::KeyValueStore;

use crate::error::ProgressError;

/// Records that carry the profile they were written under.
trait OwnedRecord: DeserializeOwned {
    fn owner(&self) -> &ProfileId;
}

impl OwnedRecord for LessonProgress {
    fn owner(&self) -> &ProfileId {
        &self.owner_profile_id
    }
}

impl OwnedRecord for CourseAward {
    fn owner(&self) -> &ProfileId {
        &self.owner_profile_id
    }
}

/// Parse `raw` and enforce the ownership guard.
///
/// Unparsable values and values owned by another profile both read as absent.
fn decode_owned<T: OwnedRecord>(profile: &ProfileId, key: &str, raw: &str) -> Option<T> {
    let record: T = match serde_json::from_str(raw) {
        Ok(record) => record,
        Err(err) => {
            debug!(key, error = %err, "stored record is unparsable; treating as absent");
            return None;
        }
    };
    if record.owner() != profile {
        warn!(
            key,
            requested = %profile,
            owner = %record.owner(),
            "record belongs to another profile; treating as absent"
        );
        return None;
    }
    Some(record)
}

/// Whether a stored JSON value explicitly names an owner other than `profile`.
fn names_other_owner(profile: &ProfileId, raw: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(raw)
        .ok()
        .and_then(|value| {
            value
                .get("ownerProfileId")
                .and_then(serde_json::Value::as_str)
                .map(|owner| owner != profile.as_str())
        })
        .unwrap_or(false)
}

/// Reads and writes per-profile progress records.
///
/// Every key is derived from the profile id, and every typed read checks the
/// record's `ownerProfileId`, so one profile never sees another's progress.
#[derive(Clone)]
pub struct ProgressService {
    clock: Clock,
    kv: Arc<dyn KeyValueStore>,
    keys: KeySpace,
}

impl ProgressService {
    #[must_use]
    pub fn new(clock: Clock, kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            clock,
            kv,
            keys: KeySpace::new(),
        }
    }

    /// Recognise the custom data kinds in `keys` when enumerating a profile.
    #[must_use]
    pub fn with_key_space(mut self, keys: KeySpace) -> Self {
        self.keys = keys;
        self
    }

    async fn write(&self, key: &str, value: &str) -> Result<(), ProgressError> {
        self.kv.set(key, value).await.map_err(|err| {
            warn!(key, error = %err, "progress write rejected by store");
            ProgressError::from(err)
        })
    }

    //
    // ─── LESSONS ──────────────────────────────────────────────────────────────
    //

    /// Fetch the lesson record for `profile`.
    ///
    /// Returns `Ok(None)` when the record is missing, unparsable, or owned by
    /// another profile.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::Storage` if the store cannot be read.
    pub async fn get_lesson_progress(
        &self,
        profile: &ProfileId,
        lesson: &LessonId,
    ) -> Result<Option<LessonProgress>, ProgressError> {
        let key = keys::lesson_progress_key(profile, lesson);
        let Some(raw) = self.kv.get(&key).await? else {
            return Ok(None);
        };
        Ok(decode_owned(profile, &key, &raw))
    }

    /// Merge `patch` into the stored lesson record and write it back.
    ///
    /// `ownerProfileId` and `lastUpdated` are always stamped here.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::Storage` if the store rejects the write (for
    /// example when its quota is exceeded). The failure is logged; callers may
    /// ignore it and retry on the next change.
    pub async fn set_lesson_progress(
        &self,
        profile: &ProfileId,
        lesson: &LessonId,
        patch: LessonProgressPatch,
    ) -> Result<LessonProgress, ProgressError> {
        let existing = match self.get_lesson_progress(profile, lesson).await {
            Ok(existing) => existing,
            Err(err) => {
                warn!(
                    profile = %profile,
                    lesson = %lesson,
                    error = %err,
                    "could not read lesson before write"
                );
                None
            }
        };
        let record = patch.apply(existing, profile, self.clock.now());
        let encoded = serde_json::to_string(&record)?;
        self.write(&keys::lesson_progress_key(profile, lesson), &encoded)
            .await?;
        Ok(record)
    }

    /// Record one passed test on a lesson.
    ///
    /// # Errors
    ///
    /// See [`ProgressService::set_lesson_progress`].
    pub async fn complete_test(
        &self,
        profile: &ProfileId,
        lesson: &LessonId,
        test_id: &str,
    ) -> Result<LessonProgress, ProgressError> {
        self.set_lesson_progress(
            profile,
            lesson,
            LessonProgressPatch::new().add_completed_test(test_id),
        )
        .await
    }

    /// Every readable lesson record owned by `profile`, ordered by lesson id.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::Storage` if the store cannot be enumerated or read.
    pub async fn list_lesson_progress(
        &self,
        profile: &ProfileId,
    ) -> Result<Vec<(LessonId, LessonProgress)>, ProgressError> {
        let mut lessons: Vec<(LessonId, LessonProgress)> = Vec::new();
        for key in self.kv.keys().await? {
            let Some(matched) = self.keys.classify(profile, &key) else {
                continue;
            };
            if matched.kind != DataKind::LessonProgress {
                continue;
            }
            let Some(lesson) = matched
                .identifier
                .and_then(|identifier| LessonId::new(identifier).ok())
            else {
                continue;
            };
            let Some(raw) = self.kv.get(&key).await? else {
                continue;
            };
            if let Some(record) = decode_owned(profile, &key, &raw) {
                lessons.push((lesson, record));
            }
        }
        lessons.sort_by(|(a, _), (b, _)| a.cmp(b));
        Ok(lessons)
    }

    //
    // ─── COURSES ──────────────────────────────────────────────────────────────
    //

    /// Overall course progress; zero when absent or unparsable.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::Storage` if the store cannot be read.
    pub async fn get_course_overall_progress(
        &self,
        profile: &ProfileId,
        course: &CourseId,
    ) -> Result<Percent, ProgressError> {
        let key = keys::course_overall_progress_key(profile, course);
        let Some(raw) = self.kv.get(&key).await? else {
            return Ok(Percent::ZERO);
        };
        Ok(parse_percent(&raw).unwrap_or_else(|| {
            debug!(key = %key, raw = %raw, "stored course progress is unparsable; using 0");
            Percent::ZERO
        }))
    }

    /// Overwrite the overall course progress.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::Storage` if the store rejects the write.
    pub async fn set_course_overall_progress(
        &self,
        profile: &ProfileId,
        course: &CourseId,
        value: Percent,
    ) -> Result<(), ProgressError> {
        self.write(
            &keys::course_overall_progress_key(profile, course),
            &value.to_string(),
        )
        .await
    }

    /// Store and return the share of `lessons` marked complete.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::Storage` if a read or the final write fails.
    pub async fn recompute_course_progress(
        &self,
        profile: &ProfileId,
        course: &CourseId,
        lessons: &[LessonId],
    ) -> Result<Percent, ProgressError> {
        let mut completed = 0;
        for lesson in lessons {
            if self
                .get_lesson_progress(profile, lesson)
                .await?
                .is_some_and(|record| record.lesson_completed)
            {
                completed += 1;
            }
        }
        let value = Percent::ratio(completed, lessons.len());
        self.set_course_overall_progress(profile, course, value)
            .await?;
        Ok(value)
    }

    //
    // ─── AWARDS ───────────────────────────────────────────────────────────────
    //

    /// True iff anything is stored at the award key, whatever its content.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::Storage` if the store cannot be read.
    pub async fn has_points_been_awarded(
        &self,
        profile: &ProfileId,
        course: &CourseId,
    ) -> Result<bool, ProgressError> {
        let key = keys::course_points_awarded_key(profile, course);
        Ok(self.kv.get(&key).await?.is_some())
    }

    /// Write the award record unconditionally.
    ///
    /// This does not check for an existing award: callers pair it with
    /// [`ProgressService::has_points_been_awarded`], and two writers can both pass
    /// that check. Use [`ProgressService::award_points_once`] when that matters.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::Storage` if the store rejects the write.
    pub async fn mark_points_awarded(
        &self,
        profile: &ProfileId,
        course: &CourseId,
        draft: AwardDraft,
    ) -> Result<CourseAward, ProgressError> {
        let award = draft.stamp(profile, self.clock.now());
        let encoded = serde_json::to_string(&award)?;
        self.write(&keys::course_points_awarded_key(profile, course), &encoded)
            .await?;
        Ok(award)
    }

    /// Write the award record only if none exists yet.
    ///
    /// Returns `Ok(None)` when points were already credited for this course.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::Storage` if the store rejects the write.
    pub async fn award_points_once(
        &self,
        profile: &ProfileId,
        course: &CourseId,
        draft: AwardDraft,
    ) -> Result<Option<CourseAward>, ProgressError> {
        let key = keys::course_points_awarded_key(profile, course);
        let award = draft.stamp(profile, self.clock.now());
        let encoded = serde_json::to_string(&award)?;
        let written = self.kv.set_if_absent(&key, &encoded).await.map_err(|err| {
            warn!(key = %key, error = %err, "award write rejected by store");
            ProgressError::from(err)
        })?;
        if !written {
            debug!(key = %key, "points already awarded");
        }
        Ok(written.then_some(award))
    }

    /// Fetch the award record for `profile`.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::Storage` if the store cannot be read.
    pub async fn get_points_award_data(
        &self,
        profile: &ProfileId,
        course: &CourseId,
    ) -> Result<Option<CourseAward>, ProgressError> {
        let key = keys::course_points_awarded_key(profile, course);
        let Some(raw) = self.kv.get(&key).await? else {
            return Ok(None);
        };
        Ok(decode_owned(profile, &key, &raw))
    }

    //
    // ─── PROFILE ──────────────────────────────────────────────────────────────
    //

    /// Opaque profile summary stored at `kid_<profile>_data`.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::Storage` if the store cannot be read.
    pub async fn get_profile_data(
        &self,
        profile: &ProfileId,
    ) -> Result<Option<serde_json::Value>, ProgressError> {
        let key = keys::profile_data_key(profile);
        let Some(raw) = self.kv.get(&key).await? else {
            return Ok(None);
        };
        Ok(serde_json::from_str(&raw).ok())
    }

    /// # Errors
    ///
    /// Returns `ProgressError::Storage` if the store rejects the write.
    pub async fn set_profile_data(
        &self,
        profile: &ProfileId,
        data: &serde_json::Value,
    ) -> Result<(), ProgressError> {
        self.write(&keys::profile_data_key(profile), &data.to_string())
            .await
    }

    /// Delete every key in `profile`'s namespace, whatever its kind. Irreversible.
    ///
    /// A key that is also well formed under a longer profile id (`kid_a_b_..` for
    /// profile `a`) is removed only if it parses as `profile`'s own key and its
    /// value does not name a different `ownerProfileId`. Returns the number of
    /// keys removed.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::Storage` if the store cannot be enumerated or a
    /// removal fails.
    pub async fn clear_profile_data(&self, profile: &ProfileId) -> Result<usize, ProgressError> {
        let prefix = keys::namespace_prefix(profile);
        let mut removed = 0;
        for key in self.kv.keys().await? {
            if !key.starts_with(prefix.as_str()) {
                continue;
            }
            if let Some(nested) = self.keys.nested_profile(profile, &key) {
                if self.keys.classify(profile, &key).is_none() {
                    debug!(key = %key, nested = %nested, "skipping key of a nested profile");
                    continue;
                }
                if let Some(raw) = self.kv.get(&key).await? {
                    if names_other_owner(profile, &raw) {
                        debug!(key = %key, nested = %nested, "skipping key owned by another profile");
                        continue;
                    }
                }
            }
            self.kv.remove(&key).await?;
            removed += 1;
        }
        debug!(profile = %profile, removed, "cleared profile data");
        Ok(removed)
    }
}

/// Decimal integer within `0..=100`.
pub(crate) fn parse_percent(raw: &str) -> Option<Percent> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .and_then(|value| Percent::new(value).ok())
}
