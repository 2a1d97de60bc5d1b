//! Agent runtime: a uniform call/retry/parse layer over the LLM provider.
//! Three flavors share one contract: fresh session per call carrying the
//! working-state snapshot, transient failures retried with a fixed delay,
//! exhaustion surfaced as a typed error instead of a panic or a raw
//! transport error.

pub mod image;
pub mod queries;
pub mod review;
pub mod runtime;
pub mod session;
pub mod state;
pub mod validator;

use thiserror::Error;

pub use image::{enforce_image_url, extract_https_url, ImageAgent, UnsplashClient, FALLBACK_IMAGE_URL};
pub use review::{code_review_loop, repair_question_source};
pub use runtime::{ChatAgent, StandardAgent, StructuredAgent};
pub use session::{SessionRecord, SessionService};
pub use state::{CourseState, StateService};
pub use validator::{
    clean_up_response, is_component_source, EslintValidator, LintError, SyntaxValidator, Validation,
};

#[derive(Debug, Error)]
pub enum AgentError {
    /// Every transient failure (transport error, empty response, JSON parse
    /// failure) ends up here once the retry budget is spent.
    #[error("max retries exceeded after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },
}
