//! Generation pipeline: drives one course from CREATING to FINISHED or
//! FAILED in a background task, with per-chapter fan-out and the grading
//! subpath on the same runtime.

pub mod agents;
pub mod orchestrator;
pub mod quota;

pub use agents::AgentSuite;
pub use orchestrator::Orchestrator;
pub use quota::{check_course_quota, QuotaError};
