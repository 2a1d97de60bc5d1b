use anyhow::Result;
use courseforge_config::Config;
use courseforge_store::{Store, User};
use thiserror::Error;

/// Typed quota violations surfaced as HTTP 429 with a structured body.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QuotaError {
    #[error("You have reached the maximum number of courses you can create.")]
    MaxCourseCreations { limit: i64 },
    #[error("You have reached the maximum number of courses you can have present at the same time.")]
    MaxPresentCourses { limit: i64 },
}

impl QuotaError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::MaxCourseCreations { .. } => "MAX_COURSE_CREATIONS_REACHED",
            Self::MaxPresentCourses { .. } => "MAX_PRESENT_COURSES_REACHED",
        }
    }

    pub fn limit(&self) -> i64 {
        match self {
            Self::MaxCourseCreations { limit } => *limit,
            Self::MaxPresentCourses { limit } => *limit,
        }
    }
}

/// Quota gate run before any course row is inserted or task scheduled.
/// Creation count comes from the append-only ledger, so deleting courses
/// does not refund creations; the present-courses limit counts live rows.
/// Admin accounts bypass both limits.
pub async fn check_course_quota(
    store: &Store,
    user: &User,
    config: &Config,
) -> Result<Option<QuotaError>> {
    if user.is_admin {
        return Ok(None);
    }

    let created = store.count_created_courses(&user.id).await?;
    if created >= config.max_course_creations {
        return Ok(Some(QuotaError::MaxCourseCreations {
            limit: config.max_course_creations,
        }));
    }

    let present = store.count_courses_by_user(&user.id).await?;
    if present >= config.max_present_courses {
        return Ok(Some(QuotaError::MaxPresentCourses {
            limit: config.max_present_courses,
        }));
    }

    Ok(None)
}
