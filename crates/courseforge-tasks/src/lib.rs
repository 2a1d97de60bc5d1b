//! Background task registry and the stuck-course sweep. Tasks live in
//! memory only; the course row is the durable record, the task is the
//! observable progress handle.

pub mod registry;
pub mod sweep;

pub use registry::TaskRegistry;
pub use sweep::{spawn_stuck_course_sweep, sweep_once, STUCK_COURSE_MAX_AGE, SWEEP_INTERVAL};
