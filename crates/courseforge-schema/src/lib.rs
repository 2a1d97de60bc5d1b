use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a course row. Only the generation pipeline moves a course
/// out of `Creating`; `Finished` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CourseStatus {
    Creating,
    Updating,
    Finished,
    Failed,
}

impl CourseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Creating => "creating",
            Self::Updating => "updating",
            Self::Finished => "finished",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "creating" => Some(Self::Creating),
            "updating" => Some(Self::Updating),
            "finished" => Some(Self::Finished),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }
}

/// Lifecycle of a background generation task as tracked by the registry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Analyzing,
    Extracting,
    Generating,
    Packaging,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Analyzing => "analyzing",
            Self::Extracting => "extracting",
            Self::Generating => "generating",
            Self::Packaging => "packaging",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Incoming course creation request, as posted to the API and handed to the
/// generation pipeline unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseRequest {
    pub query: String,
    pub time_hours: u32,
    #[serde(default)]
    pub document_ids: Vec<i64>,
    #[serde(default)]
    pub picture_ids: Vec<i64>,
    pub language: String,
    pub difficulty: String,
}

/// Output of the info agent: a short title and description for the course.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseInfo {
    pub title: String,
    pub description: String,
}

/// One chapter of the learning path as planned by the planner agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterPlan {
    /// Short caption, optimally 1-5 words.
    pub caption: String,
    /// One bullet point / sentence per element.
    pub content: Vec<String>,
    /// Time budget in minutes.
    pub time: u32,
    /// Overflow field for anything that did not fit caption or content.
    #[serde(default)]
    pub note: Option<String>,
}

/// Planner agent output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningPath {
    pub chapters: Vec<ChapterPlan>,
}

/// A generated practice question. The variant is decided by the presence of
/// the four option fields, never by inspecting the question text.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GeneratedQuestion {
    MultipleChoice {
        question: String,
        answer_a: String,
        answer_b: String,
        answer_c: String,
        answer_d: String,
        /// Letter of the correct option, one of a/b/c/d.
        correct_answer: String,
        explanation: String,
    },
    OpenText {
        question: String,
        correct_answer: String,
    },
}

impl GeneratedQuestion {
    pub fn question(&self) -> &str {
        match self {
            Self::MultipleChoice { question, .. } => question,
            Self::OpenText { question, .. } => question,
        }
    }

    pub fn set_question(&mut self, text: String) {
        match self {
            Self::MultipleChoice { question, .. } => *question = text,
            Self::OpenText { question, .. } => *question = text,
        }
    }
}

/// Tester agent initial output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionSet {
    pub questions: Vec<GeneratedQuestion>,
}

/// Grader agent output for one open-text answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradeResult {
    /// 0 (wrong), 1 (partially right) or 2 (right).
    pub points: u8,
    pub explanation: String,
}

/// Closed vocabulary of ledger actions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UsageAction {
    Login,
    Logout,
    Refresh,
    AdminLoginAs,
    CreateCourse,
    CompleteChapter,
    Chat,
    GradeQuestion,
    Search,
    SiteVisible,
    SiteHidden,
}

impl UsageAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Logout => "logout",
            Self::Refresh => "refresh",
            Self::AdminLoginAs => "admin_login_as",
            Self::CreateCourse => "create_course",
            Self::CompleteChapter => "complete_chapter",
            Self::Chat => "chat",
            Self::GradeQuestion => "grade_question",
            Self::Search => "search",
            Self::SiteVisible => "site_visible",
            Self::SiteHidden => "site_hidden",
        }
    }
}

/// Question kind as stored, decided at persistence time from the generated
/// variant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QuestionKind {
    Mc,
    Ot,
}

impl QuestionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mc => "mc",
            Self::Ot => "ot",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "mc" => Some(Self::Mc),
            "ot" => Some(Self::Ot),
            _ => None,
        }
    }
}

/// Snapshot of a background task for API consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskView {
    pub task_id: String,
    pub course_id: i64,
    pub user_id: String,
    pub status: TaskStatus,
    pub progress: u8,
    pub step: String,
    pub activity: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
