use chrono::{DateTime, Utc};
use courseforge_schema::{CourseStatus, QuestionKind};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub hashed_password: String,
    pub is_active: bool,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
    pub login_streak: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Course {
    pub id: i64,
    pub user_id: String,
    pub query: String,
    pub total_time_hours: i64,
    pub language: String,
    pub difficulty: String,
    pub status: CourseStatus,
    pub session_id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub chapter_count: Option<i64>,
    pub error_msg: Option<String>,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chapter {
    pub id: i64,
    pub course_id: i64,
    pub idx: i64,
    pub caption: String,
    pub summary: Option<String>,
    pub content: String,
    pub time_minutes: i64,
    pub is_completed: bool,
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PracticeQuestion {
    pub id: i64,
    pub chapter_id: i64,
    pub kind: QuestionKind,
    pub question: String,
    pub answer_a: Option<String>,
    pub answer_b: Option<String>,
    pub answer_c: Option<String>,
    pub answer_d: Option<String>,
    pub correct_answer: String,
    pub explanation: Option<String>,
    pub users_answer: Option<String>,
    pub points_received: Option<i64>,
    pub feedback: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StoredFile {
    pub id: i64,
    pub user_id: String,
    pub course_id: Option<i64>,
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    pub id: i64,
    pub course_id: i64,
    pub chapter_id: i64,
    pub user_id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    pub course_id: i64,
    pub user_id: String,
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageEvent {
    pub id: i64,
    pub user_id: String,
    pub course_id: Option<i64>,
    pub chapter_id: Option<i64>,
    pub action: String,
    pub details: Option<String>,
    pub created_at: DateTime<Utc>,
}
