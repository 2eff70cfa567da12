mod award;
mod ids;
mod percent;
mod progress;

pub use award::{AwardDraft, CourseAward};
pub use ids::{CourseId, IdError, LessonId, ProfileId};
pub use percent::{Percent, PercentError};
pub use progress::{LessonProgress, LessonProgressPatch};
