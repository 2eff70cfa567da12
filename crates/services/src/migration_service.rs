use std::sync::Arc;

use tracing::{debug, info, warn};

use progress_core::Clock;
use progress_core::keys::{DataKind, KeyLayout, KeySpace, MatchedKey};
use progress_core::model::{CourseAward, LessonProgress, ProfileId};
use storage::repository::{KeyValueStore, StorageError};

use crate::error::MigrationError;
use crate::progress_service::parse_percent;

/// What one pass over a profile's keys did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Keys recognised as belonging to the profile, in either layout.
    pub scanned: usize,
    /// Keys deleted because their value could not be parsed.
    pub invalid_removed: usize,
    /// Legacy keys copied to the current layout and deleted.
    pub migrated: usize,
    /// Legacy keys deleted because the current-layout key already held data.
    pub superseded: usize,
    /// Keys skipped because a store operation failed.
    pub failures: usize,
}

impl MigrationReport {
    /// Whether the pass changed anything in the store.
    #[must_use]
    pub fn changed(&self) -> bool {
        self.invalid_removed + self.migrated + self.superseded > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyOutcome {
    Kept,
    Removed,
    Migrated,
    Superseded,
}

/// Whether `raw` is a well-formed value for `kind`.
fn is_valid(kind: &DataKind, raw: &str) -> bool {
    match kind {
        DataKind::LessonProgress => serde_json::from_str::<LessonProgress>(raw).is_ok(),
        DataKind::CoursePointsAwarded => serde_json::from_str::<CourseAward>(raw).is_ok(),
        DataKind::CourseOverallProgress => parse_percent(raw).is_some(),
        DataKind::ProfileData | DataKind::Custom(_) => {
            serde_json::from_str::<serde_json::Value>(raw).is_ok()
        }
    }
}

/// Discards corrupted records and rewrites legacy-layout keys.
///
/// There is no persisted "migrated" flag: each run rescans the whole store, and a
/// second run over the same store changes nothing.
#[derive(Clone)]
pub struct MigrationService {
    clock: Clock,
    kv: Arc<dyn KeyValueStore>,
    keys: KeySpace,
}

impl MigrationService {
    #[must_use]
    pub fn new(clock: Clock, kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            clock,
            kv,
            keys: KeySpace::new(),
        }
    }

    #[must_use]
    pub fn with_key_space(mut self, keys: KeySpace) -> Self {
        self.keys = keys;
        self
    }

    /// Validate and migrate every key belonging to `profile`.
    ///
    /// A failing key is logged and counted; the pass moves on to the next one.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::Enumerate` only if the store's keys cannot be listed.
    pub async fn run(&self, profile: &ProfileId) -> Result<MigrationReport, MigrationError> {
        let mut report = MigrationReport::default();

        for key in self.kv.keys().await? {
            let Some(matched) = self.keys.match_key(profile, &key) else {
                continue;
            };
            report.scanned += 1;

            let outcome = match matched.layout {
                KeyLayout::Current => self.validate(&key, &matched).await,
                KeyLayout::Legacy => self.rewrite(profile, &key, &matched).await,
            };
            match outcome {
                Ok(KeyOutcome::Kept) => {}
                Ok(KeyOutcome::Removed) => report.invalid_removed += 1,
                Ok(KeyOutcome::Migrated) => report.migrated += 1,
                Ok(KeyOutcome::Superseded) => report.superseded += 1,
                Err(err) => {
                    warn!(key = %key, error = %err, "skipping key after store failure");
                    report.failures += 1;
                }
            }
        }

        info!(
            profile = %profile,
            scanned = report.scanned,
            invalid_removed = report.invalid_removed,
            migrated = report.migrated,
            superseded = report.superseded,
            failures = report.failures,
            "migration pass finished"
        );
        Ok(report)
    }

    async fn validate(&self, key: &str, matched: &MatchedKey) -> Result<KeyOutcome, StorageError> {
        let Some(raw) = self.kv.get(key).await? else {
            return Ok(KeyOutcome::Kept);
        };
        if is_valid(&matched.kind, &raw) {
            return Ok(KeyOutcome::Kept);
        }
        debug!(key, kind = %matched.kind, "discarding unparsable value");
        self.kv.remove(key).await?;
        Ok(KeyOutcome::Removed)
    }

    async fn rewrite(
        &self,
        profile: &ProfileId,
        legacy_key: &str,
        matched: &MatchedKey,
    ) -> Result<KeyOutcome, StorageError> {
        let Some(raw) = self.kv.get(legacy_key).await? else {
            return Ok(KeyOutcome::Kept);
        };

        let value = match self.stamp_legacy(profile, &matched.kind, &raw) {
            Stamped::Value(value) => value,
            Stamped::ForeignOwner => {
                debug!(key = legacy_key, "legacy value names another owner; leaving it");
                return Ok(KeyOutcome::Kept);
            }
        };
        if !is_valid(&matched.kind, &value) {
            debug!(key = legacy_key, kind = %matched.kind, "discarding unparsable legacy value");
            self.kv.remove(legacy_key).await?;
            return Ok(KeyOutcome::Removed);
        }

        let current_key = matched.current_key(profile);
        if self.kv.get(&current_key).await?.is_some() {
            self.kv.remove(legacy_key).await?;
            return Ok(KeyOutcome::Superseded);
        }

        self.kv.set(&current_key, &value).await?;
        self.kv.remove(legacy_key).await?;
        debug!(from = legacy_key, to = %current_key, "migrated legacy key");
        Ok(KeyOutcome::Migrated)
    }

    /// Legacy JSON records may lack the fields newer readers require; fill them in
    /// so the copied record passes the ownership guard.
    fn stamp_legacy(&self, profile: &ProfileId, kind: &DataKind, raw: &str) -> Stamped {
        let stamps_owner = matches!(
            kind,
            DataKind::LessonProgress | DataKind::CoursePointsAwarded
        );
        if !stamps_owner {
            return Stamped::Value(raw.to_owned());
        }
        let Ok(serde_json::Value::Object(mut fields)) =
            serde_json::from_str::<serde_json::Value>(raw)
        else {
            return Stamped::Value(raw.to_owned());
        };

        let owner = fields
            .get("ownerProfileId")
            .and_then(serde_json::Value::as_str)
            .map(str::to_owned);
        match owner {
            Some(owner) if owner != profile.as_str() => return Stamped::ForeignOwner,
            Some(_) => {}
            None => {
                fields.insert("ownerProfileId".into(), profile.as_str().into());
            }
        }

        let time_field = match kind {
            DataKind::CoursePointsAwarded => "timestamp",
            _ => "lastUpdated",
        };
        if !fields.contains_key(time_field) {
            fields.insert(
                time_field.into(),
                serde_json::Value::String(self.clock.now().to_rfc3339()),
            );
        }

        Stamped::Value(serde_json::Value::Object(fields).to_string())
    }
}

enum Stamped {
    Value(String),
    ForeignOwner,
}

#[cfg(test)]
mod tests {
    use super::*;
    use progress_core::time::fixed_now;
    use storage::repository::InMemoryStore;

    fn kid() -> ProfileId {
        ProfileId::new("kid_42").unwrap()
    }

    fn service(store: &InMemoryStore) -> MigrationService {
        MigrationService::new(Clock::fixed(fixed_now()), Arc::new(store.clone()))
    }

    #[test]
    fn validity_is_kind_specific() {
        assert!(is_valid(&DataKind::CourseOverallProgress, "40"));
        assert!(!is_valid(&DataKind::CourseOverallProgress, "{}"));
        assert!(is_valid(&DataKind::ProfileData, r#"{"name":"Ada"}"#));
        assert!(!is_valid(&DataKind::LessonProgress, r#"{"name":"Ada"}"#));
        assert!(!is_valid(&DataKind::Custom("streak".into()), "{not valid json"));
    }

    #[test]
    fn stamp_fills_missing_owner_and_time() {
        let store = InMemoryStore::new();
        let svc = service(&store);
        let raw = r#"{"videoCompleted":true,"interactiveCompleted":false,"lessonCompleted":false,"currentProgress":10,"completedTests":[]}"#;

        let Stamped::Value(stamped) = svc.stamp_legacy(&kid(), &DataKind::LessonProgress, raw)
        else {
            panic!("expected stamped value");
        };
        let record: LessonProgress = serde_json::from_str(&stamped).unwrap();
        assert_eq!(record.owner_profile_id, kid());
        assert_eq!(record.last_updated, fixed_now());
    }

    #[test]
    fn stamp_refuses_foreign_owner() {
        let store = InMemoryStore::new();
        let svc = service(&store);
        let raw = r#"{"ownerProfileId":"kid_7","pointsAwarded":5}"#;
        assert!(matches!(
            svc.stamp_legacy(&kid(), &DataKind::CoursePointsAwarded, raw),
            Stamped::ForeignOwner
        ));
    }

    #[tokio::test]
    async fn current_data_wins_over_legacy_copy() {
        let store = InMemoryStore::new();
        store
            .set("kid_kid_42_course_overall_progress_math", "80")
            .await
            .unwrap();
        store
            .set("course_overall_progress_kid_42_math", "20")
            .await
            .unwrap();

        let report = service(&store).run(&kid()).await.unwrap();

        assert_eq!(report.superseded, 1);
        assert_eq!(
            store.keys().await.unwrap(),
            vec!["kid_kid_42_course_overall_progress_math".to_string()]
        );
        assert_eq!(
            store
                .get("kid_kid_42_course_overall_progress_math")
                .await
                .unwrap()
                .as_deref(),
            Some("80")
        );
    }

    #[tokio::test]
    async fn enumeration_failure_aborts_the_pass() {
        let store = InMemoryStore::new();
        store.set_disabled(true);
        let err = service(&store).run(&kid()).await.unwrap_err();
        assert!(matches!(err, MigrationError::Enumerate(_)));
    }
}
