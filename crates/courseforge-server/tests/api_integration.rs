use std::sync::Arc;

use axum::body::Body;
use axum::http::header::{CONTENT_TYPE, COOKIE, RANGE, SET_COOKIE};
use axum::http::{Request, StatusCode};
use axum::Router;
use courseforge_agent::{EslintValidator, SessionService, StateService};
use courseforge_config::Config;
use courseforge_memory::{HashEmbeddingProvider, RetrievalService, VectorIndex};
use courseforge_pipeline::{AgentSuite, Orchestrator};
use courseforge_provider::StubProvider;
use courseforge_server::state::AppState;
use courseforge_store::{CourseUpdate, NewChapter, Store};
use courseforge_tasks::TaskRegistry;
use http_body_util::BodyExt;
use tower::ServiceExt;

fn test_config(limits: Option<(i64, i64)>) -> &'static Config {
    let mut config = Config::from_lookup(|key| match key {
        "SECRET_KEY" => Some("integration-test-secret".to_string()),
        "SECURE_COOKIE" => Some("false".to_string()),
        "AGENT_RETRY_DELAY_SECS" => Some("0".to_string()),
        _ => None,
    });
    if let Some((creations, present)) = limits {
        config.max_course_creations = creations;
        config.max_present_courses = present;
    }
    Box::leak(Box::new(config))
}

fn build_app(config: &'static Config) -> (Router, Store) {
    let store = Store::open_in_memory().unwrap();
    let sessions = SessionService::new();
    let index = VectorIndex::open_in_memory(Arc::new(HashEmbeddingProvider::new(8))).unwrap();
    let agents = AgentSuite::from_config(config, Arc::new(StubProvider), sessions.clone());
    let tasks = TaskRegistry::new();
    let orchestrator = Orchestrator::new(
        store.clone(),
        RetrievalService::new(index, "course_"),
        StateService::new(),
        sessions,
        tasks.clone(),
        Arc::new(EslintValidator::new(vec![])),
        agents,
        config,
    );
    let state = AppState {
        store: store.clone(),
        orchestrator,
        tasks,
        config,
    };
    (courseforge_server::create_router(state), store)
}

fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn signup_and_login(app: &Router, username: &str, password: &str) -> String {
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/auth/signup",
            serde_json::json!({
                "username": username,
                "email": format!("{username}@example.com"),
                "password": password,
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/auth/login",
            serde_json::json!({ "username": username, "password": password }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let cookies: Vec<String> = response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect();
    assert!(cookies.iter().any(|c| c.starts_with("access_token=")));
    assert!(cookies.iter().any(|c| c.starts_with("refresh_token=")));

    // Just the access cookie pair for subsequent requests.
    cookies
        .iter()
        .find(|c| c.starts_with("access_token="))
        .and_then(|c| c.split(';').next())
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn signup_then_login_by_username_and_email() {
    let (app, _store) = build_app(test_config(None));
    signup_and_login(&app, "alice", "password123").await;

    // Email also works as the login identifier.
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/auth/login",
            serde_json::json!({ "username": "alice@example.com", "password": "password123" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Wrong password is rejected.
    let response = app
        .oneshot(json_request(
            "POST",
            "/api/auth/login",
            serde_json::json!({ "username": "alice", "password": "wrong" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unauthenticated_requests_are_rejected() {
    let (app, _store) = build_app(test_config(None));
    let response = app
        .oneshot(Request::builder().uri("/api/users/me").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn quota_trip_returns_429_and_creates_no_row() {
    let (app, store) = build_app(test_config(Some((0, 100))));
    let cookie = signup_and_login(&app, "bob", "password123").await;

    let mut request = json_request(
        "POST",
        "/api/courses/create",
        serde_json::json!({
            "query": "x",
            "time_hours": 1,
            "language": "en",
            "difficulty": "easy",
        }),
    );
    request.headers_mut().insert(COOKIE, cookie.parse().unwrap());

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = body_json(response).await;
    assert_eq!(body["error"], "LIMIT_REACHED");
    assert_eq!(body["code"], "MAX_COURSE_CREATIONS_REACHED");
    assert_eq!(body["limit"], 0);

    let user = store.get_user_by_username("bob").await.unwrap().unwrap();
    assert_eq!(store.count_courses_by_user(&user.id).await.unwrap(), 0);
}

#[tokio::test]
async fn search_is_scoped_and_ranks_title_matches_first() {
    let (app, store) = build_app(test_config(None));
    let cookie = signup_and_login(&app, "carol", "password123").await;
    let user = store.get_user_by_username("carol").await.unwrap().unwrap();

    let course = store
        .create_course(&user.id, "learn rust", 2, "English", "Easy")
        .await
        .unwrap();
    store
        .update_course(
            course.id,
            CourseUpdate {
                title: Some("Rust Basics".into()),
                description: Some("intro".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let other_course = store
        .create_course(&user.id, "cooking", 2, "English", "Easy")
        .await
        .unwrap();
    store
        .update_course(
            other_course.id,
            CourseUpdate {
                title: Some("Cooking".into()),
                description: Some("has rust in the description".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let mut request = Request::builder()
        .uri("/api/search?query=rust")
        .body(Body::empty())
        .unwrap();
    request.headers_mut().insert(COOKIE, cookie.parse().unwrap());
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let hits = body_json(response).await;
    let hits = hits.as_array().unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0]["title"], "Rust Basics");

    // Searches land in the ledger.
    let events = store.list_usage(&user.id, 10).await.unwrap();
    assert!(events.iter().any(|e| e.action == "search"));

    // Queries under two characters return nothing.
    let mut request = Request::builder()
        .uri("/api/search?query=r")
        .body(Body::empty())
        .unwrap();
    request.headers_mut().insert(COOKIE, cookie.parse().unwrap());
    let response = app.oneshot(request).await.unwrap();
    let hits = body_json(response).await;
    assert!(hits.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn range_download_returns_partial_content() {
    let (app, store) = build_app(test_config(None));
    let cookie = signup_and_login(&app, "dave", "password123").await;
    let user = store.get_user_by_username("dave").await.unwrap().unwrap();

    let payload: Vec<u8> = (0..100u8).collect();
    let document = store
        .insert_document(&user.id, "data.pdf", "application/pdf", payload)
        .await
        .unwrap();

    let mut request = Request::builder()
        .uri(format!("/api/files/documents/{}", document.id))
        .header(RANGE, "bytes=0-15")
        .body(Body::empty())
        .unwrap();
    request.headers_mut().insert(COOKIE, cookie.parse().unwrap());

    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        response.headers().get("content-range").unwrap(),
        "bytes 0-15/100"
    );
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(bytes.len(), 16);
    assert_eq!(bytes[0], 0);
    assert_eq!(bytes[15], 15);

    // An unsatisfiable range is a 416.
    let mut request = Request::builder()
        .uri(format!("/api/files/documents/{}", document.id))
        .header(RANGE, "bytes=500-600")
        .body(Body::empty())
        .unwrap();
    request.headers_mut().insert(COOKIE, cookie.parse().unwrap());
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
}

#[tokio::test]
async fn chat_stream_emits_content_frames_and_done() {
    let (app, store) = build_app(test_config(None));
    let cookie = signup_and_login(&app, "erin", "password123").await;
    let user = store.get_user_by_username("erin").await.unwrap().unwrap();

    let course = store
        .create_course(&user.id, "learn rust", 2, "English", "Easy")
        .await
        .unwrap();
    let chapter = store
        .create_chapter(NewChapter {
            course_id: course.id,
            idx: 1,
            caption: "Intro".into(),
            summary: None,
            content: "() => { return <p>intro</p>; }".into(),
            time_minutes: 10,
            image_url: None,
        })
        .await
        .unwrap();

    let mut request = json_request(
        "POST",
        &format!("/api/chat/{}", chapter.id),
        serde_json::json!({ "message": "explain ownership" }),
    );
    request.headers_mut().insert(COOKIE, cookie.parse().unwrap());

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .get(CONTENT_TYPE)
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));
    assert_eq!(response.headers().get("cache-control").unwrap(), "no-cache");
    assert_eq!(response.headers().get("x-accel-buffering").unwrap(), "no");

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8_lossy(&bytes);
    assert!(text.contains("data: {\"content\":"));
    assert!(text.trim_end().ends_with("data: [DONE]"));

    // Both turns were persisted.
    let history = store
        .list_chat_messages(course.id, &user.id, 10)
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, "user");
    assert_eq!(history[1].role, "assistant");

    // And the chat shows up in the ledger.
    assert_eq!(store.count_chat(&user.id).await.unwrap(), 1);
}

#[tokio::test]
async fn statistics_usage_feeds_learn_time() {
    let (app, store) = build_app(test_config(None));
    let cookie = signup_and_login(&app, "frank", "password123").await;
    let user = store.get_user_by_username("frank").await.unwrap().unwrap();

    for chapter_id in [1, 2] {
        let mut request = json_request(
            "POST",
            "/api/statistics/usage",
            serde_json::json!({
                "user_id": user.id,
                "url": "/courses/1",
                "course_id": 1,
                "chapter_id": chapter_id,
                "visible": true,
            }),
        );
        request.headers_mut().insert(COOKIE, cookie.parse().unwrap());
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let mut request = Request::builder()
        .uri(format!("/api/statistics/{}/total_learn_time", user.id))
        .body(Body::empty())
        .unwrap();
    request.headers_mut().insert(COOKIE, cookie.parse().unwrap());
    let response = app.oneshot(request).await.unwrap();
    let minutes = body_json(response).await;
    assert_eq!(minutes, serde_json::json!(20));
}
