//! Process-wide configuration. Read once from the environment at startup and
//! frozen behind a `OnceLock`; nothing re-reads the environment afterwards.

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum JwtAlgorithm {
    HS256,
    RS256,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    pub algorithm: JwtAlgorithm,
    /// Shared secret for HS256.
    pub secret_key: String,
    /// PEM keypair for RS256.
    pub public_key_pem: String,
    pub private_key_pem: String,
    pub access_ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
    pub secure_cookie: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthClient {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub require_uppercase: bool,
    pub require_lowercase: bool,
    pub require_digit: bool,
    pub require_special: bool,
}

impl PasswordPolicy {
    /// Returns the first violated rule, if any.
    pub fn check(&self, password: &str) -> Option<&'static str> {
        if password.chars().count() < self.min_length {
            return Some("password too short");
        }
        if self.require_uppercase && !password.chars().any(|c| c.is_ascii_uppercase()) {
            return Some("password needs an uppercase letter");
        }
        if self.require_lowercase && !password.chars().any(|c| c.is_ascii_lowercase()) {
            return Some("password needs a lowercase letter");
        }
        if self.require_digit && !password.chars().any(|c| c.is_ascii_digit()) {
            return Some("password needs a digit");
        }
        if self.require_special && password.chars().all(|c| c.is_alphanumeric()) {
            return Some("password needs a special character");
        }
        None
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    /// Model for the heavyweight explainer calls.
    pub model: String,
    /// Model for everything else (info, planner, tester, grader, chat).
    pub fast_model: String,
    pub max_retries: u32,
    pub retry_delay_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// HTTP embeddings endpoint; when absent a deterministic hash embedder
    /// takes over (tests, offline development).
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub model: String,
    pub dimensions: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub bind_addr: String,
    pub database_path: String,
    pub frontend_base_url: String,
    pub jwt: JwtConfig,
    pub google_oauth: Option<OAuthClient>,
    pub github_oauth: Option<OAuthClient>,
    pub discord_oauth: Option<OAuthClient>,
    pub image_search_key: Option<String>,
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub collection_prefix: String,
    pub password_policy: PasswordPolicy,
    pub max_course_creations: i64,
    pub max_present_courses: i64,
    pub max_chat_message_len: usize,
    pub explainer_review_iterations: u32,
    pub tester_review_iterations: u32,
    pub chapter_concurrency: usize,
    pub question_concurrency: usize,
    /// Command line for the out-of-process syntax validator, e.g.
    /// `node lint/check.js`. Empty disables validation (everything passes).
    pub lint_command: Vec<String>,
}

static GLOBAL: OnceLock<Config> = OnceLock::new();

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(get: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let string = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());
        let optional = |key: &str| get(key).filter(|v| !v.is_empty());
        let flag = |key: &str, default: bool| {
            get(key)
                .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                .unwrap_or(default)
        };

        fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
            value.and_then(|v| v.parse().ok()).unwrap_or(default)
        }

        let oauth = |prefix: &str| -> Option<OAuthClient> {
            let client_id = optional(&format!("{prefix}_CLIENT_ID"))?;
            let client_secret = optional(&format!("{prefix}_CLIENT_SECRET"))?;
            let redirect_uri = optional(&format!("{prefix}_REDIRECT_URI"))?;
            Some(OAuthClient {
                client_id,
                client_secret,
                redirect_uri,
            })
        };

        let algorithm = match string("JWT_ALGORITHM", "HS256").as_str() {
            "RS256" => JwtAlgorithm::RS256,
            _ => JwtAlgorithm::HS256,
        };

        Self {
            bind_addr: string("BIND_ADDR", "0.0.0.0:8080"),
            database_path: string("DB_PATH", "courseforge.db"),
            frontend_base_url: string("FRONTEND_BASE_URL", "http://localhost:3000"),
            jwt: JwtConfig {
                algorithm,
                secret_key: string("SECRET_KEY", "a_very_secret_key_please_change_me"),
                public_key_pem: string("JWT_PUBLIC_KEY", ""),
                private_key_pem: string("JWT_PRIVATE_KEY", ""),
                access_ttl_minutes: parse_or(get("ACCESS_TOKEN_EXPIRE_MINUTES"), 20),
                refresh_ttl_minutes: parse_or(get("REFRESH_TOKEN_EXPIRE_MINUTES"), 6_000),
                secure_cookie: flag("SECURE_COOKIE", true),
            },
            google_oauth: oauth("GOOGLE"),
            github_oauth: oauth("GITHUB"),
            discord_oauth: oauth("DISCORD"),
            image_search_key: optional("UNSPLASH_ACCESS_KEY"),
            llm: LlmConfig {
                api_key: optional("LLM_API_KEY"),
                base_url: string("LLM_BASE_URL", "https://generativelanguage.googleapis.com"),
                model: string("LLM_MODEL", "gemini-2.5-pro"),
                fast_model: string("LLM_FAST_MODEL", "gemini-2.5-flash"),
                max_retries: parse_or(get("AGENT_MAX_RETRIES"), 1),
                retry_delay_secs: parse_or(get("AGENT_RETRY_DELAY_SECS"), 2),
            },
            embedding: EmbeddingConfig {
                endpoint: optional("EMBEDDING_ENDPOINT"),
                api_key: optional("EMBEDDING_API_KEY"),
                model: string("EMBEDDING_MODEL", "all-MiniLM-L6-v2"),
                dimensions: parse_or(get("EMBEDDING_DIMENSIONS"), 384),
            },
            collection_prefix: string("COLLECTION_PREFIX", "course_"),
            password_policy: PasswordPolicy {
                min_length: parse_or(get("MIN_PASSWORD_LENGTH"), 3),
                require_uppercase: flag("REQUIRE_UPPERCASE", false),
                require_lowercase: flag("REQUIRE_LOWERCASE", false),
                require_digit: flag("REQUIRE_DIGIT", false),
                require_special: flag("REQUIRE_SPECIAL_CHAR", false),
            },
            max_course_creations: parse_or(get("MAX_COURSE_CREATIONS"), 999_999),
            max_present_courses: parse_or(get("MAX_PRESENT_COURSES"), 999_999),
            max_chat_message_len: parse_or(get("MAX_CHAT_MESSAGE_LENGTH"), 2_000),
            explainer_review_iterations: parse_or(get("EXPLAINER_REVIEW_ITERATIONS"), 5),
            tester_review_iterations: parse_or(get("TESTER_REVIEW_ITERATIONS"), 2),
            chapter_concurrency: parse_or(get("CHAPTER_CONCURRENCY"), 4),
            question_concurrency: parse_or(get("QUESTION_CONCURRENCY"), 4),
            lint_command: get("LINT_COMMAND")
                .map(|cmd| cmd.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
        }
    }

    /// Installs `config` as the process-wide configuration. Later calls keep
    /// the first value.
    pub fn init_global(config: Config) -> &'static Config {
        GLOBAL.get_or_init(|| config)
    }

    /// The frozen process configuration; loads from the environment on first
    /// access if nothing was installed.
    pub fn global() -> &'static Config {
        GLOBAL.get_or_init(|| {
            tracing::info!("loading configuration from environment");
            Config::from_env()
        })
    }
}
