use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::ids::ProfileId;

/// Points credited to a profile for finishing a course.
///
/// The presence of this record is the only signal that the credit happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseAward {
    pub points_awarded: u32,
    pub timestamp: DateTime<Utc>,
    pub course_name: String,
    pub owner_profile_id: ProfileId,
}

/// Caller-supplied part of a [`CourseAward`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwardDraft {
    pub points: u32,
    pub course_name: String,
}

impl AwardDraft {
    #[must_use]
    pub fn new(points: u32, course_name: impl Into<String>) -> Self {
        Self {
            points,
            course_name: course_name.into(),
        }
    }

    #[must_use]
    pub fn stamp(self, owner: &ProfileId, now: DateTime<Utc>) -> CourseAward {
        CourseAward {
            points_awarded: self.points,
            timestamp: now,
            course_name: self.course_name,
            owner_profile_id: owner.clone(),
        }
    }
}
