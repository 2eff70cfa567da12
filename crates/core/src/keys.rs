//! Storage key layout.
//!
//! Every record lives under `kid_<profile>_<kind>[_<identifier>]`. The profile id is the
//! outermost segment, so two profiles can never produce the same key for the same kind
//! and identifier.
//!
//! Older builds wrote three kinds as `<kind>_<profile>_<identifier>`. Those keys are
//! recognised here as [`KeyLayout::Legacy`] so a migration pass can rewrite them.

use std::fmt;

use crate::model::{CourseId, LessonId, ProfileId};

/// Leading segment of every namespaced key.
pub const NAMESPACE_PREFIX: &str = "kid";

const SEPARATOR: char = '_';

/// What a stored value represents.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DataKind {
    LessonProgress,
    CourseOverallProgress,
    CoursePointsAwarded,
    ProfileData,
    Custom(String),
}

impl DataKind {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            DataKind::LessonProgress => "lesson_progress",
            DataKind::CourseOverallProgress => "course_overall_progress",
            DataKind::CoursePointsAwarded => "course_points_awarded",
            DataKind::ProfileData => "data",
            DataKind::Custom(kind) => kind.as_str(),
        }
    }

    /// Whether keys of this kind carry an identifier segment.
    ///
    /// `None` means either form is accepted, which is the case for custom kinds.
    #[must_use]
    pub fn takes_identifier(&self) -> Option<bool> {
        match self {
            DataKind::LessonProgress
            | DataKind::CourseOverallProgress
            | DataKind::CoursePointsAwarded => Some(true),
            DataKind::ProfileData => Some(false),
            DataKind::Custom(_) => None,
        }
    }

    /// Kinds that were written under the pre-namespacing layout.
    #[must_use]
    pub fn legacy_kinds() -> [DataKind; 3] {
        [
            DataKind::LessonProgress,
            DataKind::CourseOverallProgress,
            DataKind::CoursePointsAwarded,
        ]
    }

    fn builtin() -> [DataKind; 4] {
        [
            DataKind::LessonProgress,
            DataKind::CourseOverallProgress,
            DataKind::CoursePointsAwarded,
            DataKind::ProfileData,
        ]
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `kid_<profile>_`: every key owned by `profile` starts with this.
#[must_use]
pub fn namespace_prefix(profile: &ProfileId) -> String {
    format!("{NAMESPACE_PREFIX}{SEPARATOR}{profile}{SEPARATOR}")
}

/// Derive the storage key for `(profile, kind, identifier)`.
///
/// Pure and infallible; the caller is responsible for passing sensible ids.
#[must_use]
pub fn namespaced_key(profile: &ProfileId, kind: &DataKind, identifier: Option<&str>) -> String {
    let mut key = namespace_prefix(profile);
    key.push_str(kind.as_str());
    if let Some(identifier) = identifier {
        key.push(SEPARATOR);
        key.push_str(identifier);
    }
    key
}

#[must_use]
pub fn lesson_progress_key(profile: &ProfileId, lesson: &LessonId) -> String {
    namespaced_key(profile, &DataKind::LessonProgress, Some(lesson.as_str()))
}

#[must_use]
pub fn course_overall_progress_key(profile: &ProfileId, course: &CourseId) -> String {
    namespaced_key(profile, &DataKind::CourseOverallProgress, Some(course.as_str()))
}

#[must_use]
pub fn course_points_awarded_key(profile: &ProfileId, course: &CourseId) -> String {
    namespaced_key(profile, &DataKind::CoursePointsAwarded, Some(course.as_str()))
}

#[must_use]
pub fn profile_data_key(profile: &ProfileId) -> String {
    namespaced_key(profile, &DataKind::ProfileData, None)
}

//
// ─── MATCHING ─────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyLayout {
    /// `kid_<profile>_<kind>[_<identifier>]`
    Current,
    /// `<kind>_<profile>_<identifier>`
    Legacy,
}

/// A stored key recognised as belonging to one profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedKey {
    pub layout: KeyLayout,
    pub kind: DataKind,
    pub identifier: Option<String>,
}

impl MatchedKey {
    /// The current-layout key for the same record.
    #[must_use]
    pub fn current_key(&self, profile: &ProfileId) -> String {
        namespaced_key(profile, &self.kind, self.identifier.as_deref())
    }
}

/// The set of data kinds a deployment stores, used to recognise keys.
///
/// Built-in kinds are always known; extra kinds are registered with
/// [`KeySpace::with_custom_kind`].
#[derive(Debug, Clone)]
pub struct KeySpace {
    kinds: Vec<DataKind>,
}

impl Default for KeySpace {
    fn default() -> Self {
        Self::new()
    }
}

impl KeySpace {
    #[must_use]
    pub fn new() -> Self {
        let mut space = Self {
            kinds: DataKind::builtin().to_vec(),
        };
        space.sort_kinds();
        space
    }

    #[must_use]
    pub fn with_custom_kind(mut self, kind: impl Into<String>) -> Self {
        let kind = kind.into();
        if !kind.is_empty() && !self.kinds.iter().any(|known| known.as_str() == kind) {
            self.kinds.push(DataKind::Custom(kind));
            self.sort_kinds();
        }
        self
    }

    #[must_use]
    pub fn kinds(&self) -> &[DataKind] {
        &self.kinds
    }

    // Longest first, so `course_overall_progress` wins over a custom `course`.
    fn sort_kinds(&mut self) {
        self.kinds.sort_by(|a, b| {
            b.as_str()
                .len()
                .cmp(&a.as_str().len())
                .then_with(|| a.as_str().cmp(b.as_str()))
        });
    }

    /// Recognise `key` as a current-layout key of `profile`.
    #[must_use]
    pub fn classify(&self, profile: &ProfileId, key: &str) -> Option<MatchedKey> {
        let rest = key.strip_prefix(namespace_prefix(profile).as_str())?;
        self.kinds.iter().find_map(|kind| {
            let identifier = match rest.strip_prefix(kind.as_str())? {
                "" => None,
                tail => Some(non_empty(tail.strip_prefix(SEPARATOR)?)?.to_owned()),
            };
            if kind
                .takes_identifier()
                .is_some_and(|takes| takes != identifier.is_some())
            {
                return None;
            }
            Some(MatchedKey {
                layout: KeyLayout::Current,
                kind: kind.clone(),
                identifier,
            })
        })
    }

    /// A longer profile id whose namespace also contains `key`.
    ///
    /// Profile ids may contain the separator, so `kid_a_b_data` sits under both
    /// `kid_a_` and `kid_a_b_`. Returns the first id `<profile>_<segment..>` for which
    /// `key` is a well-formed current-layout key.
    #[must_use]
    pub fn nested_profile(&self, profile: &ProfileId, key: &str) -> Option<ProfileId> {
        let prefix = namespace_prefix(profile);
        let rest = key.strip_prefix(prefix.as_str())?;
        rest.match_indices(SEPARATOR)
            .filter(|(at, _)| *at > 0)
            .find_map(|(at, _)| {
                let nested = format!("{profile}{SEPARATOR}{}", &rest[..at]);
                let candidate = ProfileId::new(nested).ok()?;
                self.classify(&candidate, key).map(|_| candidate)
            })
    }

    /// Recognise `key` as a legacy-layout key of `profile`.
    #[must_use]
    pub fn classify_legacy(&self, profile: &ProfileId, key: &str) -> Option<MatchedKey> {
        DataKind::legacy_kinds().into_iter().find_map(|kind| {
            let identifier = key
                .strip_prefix(kind.as_str())?
                .strip_prefix(SEPARATOR)?
                .strip_prefix(profile.as_str())?
                .strip_prefix(SEPARATOR)
                .and_then(non_empty)?;
            Some(MatchedKey {
                layout: KeyLayout::Legacy,
                kind,
                identifier: Some(identifier.to_owned()),
            })
        })
    }

    /// Recognise `key` in either layout.
    #[must_use]
    pub fn match_key(&self, profile: &ProfileId, key: &str) -> Option<MatchedKey> {
        self.classify(profile, key)
            .or_else(|| self.classify_legacy(profile, key))
    }
}

fn non_empty(s: &str) -> Option<&str> {
    (!s.is_empty()).then_some(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(id: &str) -> ProfileId {
        ProfileId::new(id).unwrap()
    }

    #[test]
    fn builds_documented_layout() {
        let kid = profile("kid_42");
        assert_eq!(
            lesson_progress_key(&kid, &LessonId::new("lesson_7").unwrap()),
            "kid_kid_42_lesson_progress_lesson_7"
        );
        assert_eq!(
            course_overall_progress_key(&kid, &CourseId::new("c1").unwrap()),
            "kid_kid_42_course_overall_progress_c1"
        );
        assert_eq!(
            course_points_awarded_key(&kid, &CourseId::new("c1").unwrap()),
            "kid_kid_42_course_points_awarded_c1"
        );
        assert_eq!(profile_data_key(&kid), "kid_kid_42_data");
    }

    #[test]
    fn different_profiles_never_collide() {
        let kinds = [
            DataKind::LessonProgress,
            DataKind::ProfileData,
            DataKind::Custom("streak".into()),
        ];
        let profiles = ["a", "a_b", "kid_4", "kid_42", "b"];
        for kind in &kinds {
            for identifier in [None, Some("x"), Some("lesson_7")] {
                for (i, p1) in profiles.iter().enumerate() {
                    for p2 in &profiles[i + 1..] {
                        assert_ne!(
                            namespaced_key(&profile(p1), kind, identifier),
                            namespaced_key(&profile(p2), kind, identifier)
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn classify_recognises_own_keys_only() {
        let space = KeySpace::new();
        let a = profile("a");

        let matched = space.classify(&a, "kid_a_lesson_progress_l1").unwrap();
        assert_eq!(matched.kind, DataKind::LessonProgress);
        assert_eq!(matched.identifier.as_deref(), Some("l1"));

        let data = space.classify(&a, "kid_a_data").unwrap();
        assert_eq!(data.kind, DataKind::ProfileData);
        assert_eq!(data.identifier, None);

        // belongs to profile "a_b"
        assert!(space.classify(&a, "kid_a_b_lesson_progress_l1").is_none());
        assert!(space.classify(&a, "kid_a_lesson_progress_").is_none());
        assert!(space.classify(&a, "kid_a_lesson_progress").is_none());
        // belongs to profile "a_data"
        assert!(space.classify(&a, "kid_a_data_course_overall_progress_c1").is_none());
        assert!(space.classify(&a, "kid_a_data_x").is_none());
        assert!(space.classify(&a, "lesson_progress_a_l1").is_none());
    }

    #[test]
    fn nested_profiles_are_detected() {
        let space = KeySpace::new();
        let a = profile("a");

        assert_eq!(
            space.nested_profile(&a, "kid_a_data_course_overall_progress_c1"),
            Some(profile("a_data"))
        );
        assert_eq!(
            space.nested_profile(&a, "kid_a_b_lesson_progress_l1"),
            Some(profile("a_b"))
        );
        assert_eq!(space.nested_profile(&a, "kid_a_lesson_progress_l1"), None);
        assert_eq!(space.nested_profile(&a, "kid_a_streak_w1"), None);
        assert_eq!(space.nested_profile(&a, "kid_b_data"), None);
    }

    #[test]
    fn custom_kinds_must_be_registered() {
        let a = profile("a");
        assert!(KeySpace::new().classify(&a, "kid_a_streak_week1").is_none());

        let space = KeySpace::new().with_custom_kind("streak").with_custom_kind("course");
        let matched = space.classify(&a, "kid_a_streak_week1").unwrap();
        assert_eq!(matched.kind, DataKind::Custom("streak".into()));

        let longest = space.classify(&a, "kid_a_course_overall_progress_c1").unwrap();
        assert_eq!(longest.kind, DataKind::CourseOverallProgress);
    }

    #[test]
    fn legacy_keys_rewrite_to_current_layout() {
        let space = KeySpace::new();
        let kid = profile("kid_42");

        let matched = space
            .match_key(&kid, "course_points_awarded_kid_42_math")
            .unwrap();
        assert_eq!(matched.layout, KeyLayout::Legacy);
        assert_eq!(matched.current_key(&kid), "kid_kid_42_course_points_awarded_math");

        let lesson = space.match_key(&kid, "lesson_progress_kid_42_lesson_7").unwrap();
        assert_eq!(lesson.current_key(&kid), "kid_kid_42_lesson_progress_lesson_7");

        assert!(space.match_key(&kid, "lesson_progress_kid_99_lesson_7").is_none());
        assert!(space.match_key(&kid, "lesson_progress_kid_42_").is_none());
    }
}
