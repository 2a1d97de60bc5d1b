pub mod auth;
pub mod chat;
pub mod courses;
pub mod files;
pub mod notes;
pub mod oauth;
pub mod questions;
pub mod search;
pub mod statistics;
pub mod tasks;
pub mod users;

use axum::Router;

use crate::state::AppState;

pub fn api_router() -> Router<AppState> {
    Router::new()
        .nest("/auth", auth::router().merge(oauth::router()))
        .nest("/users", users::router())
        .nest("/courses", courses::router())
        .nest("/chapters", questions::router())
        .nest("/chat", chat::router())
        .nest("/files", files::router())
        .nest("/notes", notes::router())
        .nest("/statistics", statistics::router())
        .nest("/tasks", tasks::router())
        .merge(search::router())
}
