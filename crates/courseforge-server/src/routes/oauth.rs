//! OAuth login for Google, GitHub and Discord: redirect out, exchange the
//! callback code for an access token, fetch the remote identity, then mint
//! the same session cookies password login uses. First-time OAuth users get
//! a generated unique username and a random opaque password hash.

use anyhow::{anyhow, Context, Result};
use axum::extract::{Path, Query, State};
use axum::http::header::SET_COOKIE;
use axum::response::{AppendHeaders, IntoResponse, Redirect};
use axum::routing::get;
use axum::Router;
use courseforge_config::OAuthClient;
use courseforge_schema::UsageAction;
use courseforge_store::{NewUser, Store, User};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::{access_cookie, create_token, hash_password, refresh_cookie};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login/{provider}", get(oauth_redirect))
        .route("/{provider}/callback", get(oauth_callback))
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    code: String,
}

struct RemoteIdentity {
    email: String,
    name: String,
}

fn client_for<'a>(state: &'a AppState, provider: &str) -> ApiResult<&'a OAuthClient> {
    let client = match provider {
        "google" => state.config.google_oauth.as_ref(),
        "github" => state.config.github_oauth.as_ref(),
        "discord" => state.config.discord_oauth.as_ref(),
        _ => return Err(ApiError::NotFound(format!("unknown oauth provider: {provider}"))),
    };
    client.ok_or_else(|| ApiError::Validation(format!("{provider} login is not configured")))
}

fn authorize_url(provider: &str, client: &OAuthClient) -> String {
    let redirect = urlencoding::encode(&client.redirect_uri);
    match provider {
        "google" => format!(
            "https://accounts.google.com/o/oauth2/v2/auth?client_id={}&redirect_uri={redirect}&response_type=code&scope=openid%20email%20profile",
            client.client_id
        ),
        "github" => format!(
            "https://github.com/login/oauth/authorize?client_id={}&redirect_uri={redirect}&scope=user:email",
            client.client_id
        ),
        _ => format!(
            "https://discord.com/oauth2/authorize?client_id={}&redirect_uri={redirect}&response_type=code&scope=identify%20email",
            client.client_id
        ),
    }
}

async fn oauth_redirect(
    State(state): State<AppState>,
    Path(provider): Path<String>,
) -> ApiResult<Redirect> {
    let client = client_for(&state, &provider)?;
    Ok(Redirect::temporary(&authorize_url(&provider, client)))
}

async fn oauth_callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<CallbackQuery>,
) -> ApiResult<impl IntoResponse> {
    let client = client_for(&state, &provider)?.clone();
    let identity = fetch_identity(&provider, &client, &query.code)
        .await
        .map_err(|e| ApiError::Unauthorized(format!("oauth login failed: {e}")))?;

    let user = find_or_create_oauth_user(&state.store, &identity).await?;
    let user = state
        .store
        .record_login(&user.id)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("user no longer exists".into()))?;
    state
        .store
        .log_usage(&user.id, UsageAction::Login, None, None, Some(format!("oauth:{provider}")))
        .await?;

    let access = create_token(state.config, &user.id, "access", state.config.jwt.access_ttl_minutes)?;
    let refresh = create_token(state.config, &user.id, "refresh", state.config.jwt.refresh_ttl_minutes)?;

    Ok((
        AppendHeaders([
            (SET_COOKIE, access_cookie(state.config, &access)),
            (SET_COOKIE, refresh_cookie(state.config, &refresh)),
        ]),
        Redirect::to(&state.config.frontend_base_url),
    ))
}

async fn fetch_identity(provider: &str, client: &OAuthClient, code: &str) -> Result<RemoteIdentity> {
    let http = reqwest::Client::new();
    match provider {
        "google" => {
            let token: serde_json::Value = http
                .post("https://oauth2.googleapis.com/token")
                .form(&[
                    ("client_id", client.client_id.as_str()),
                    ("client_secret", client.client_secret.as_str()),
                    ("code", code),
                    ("grant_type", "authorization_code"),
                    ("redirect_uri", client.redirect_uri.as_str()),
                ])
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            let access_token = bearer(&token)?;

            let info: serde_json::Value = http
                .get("https://openidconnect.googleapis.com/v1/userinfo")
                .bearer_auth(access_token)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            Ok(RemoteIdentity {
                email: str_field(&info, "email")?,
                name: info["name"].as_str().unwrap_or("user").to_string(),
            })
        }
        "github" => {
            let token: serde_json::Value = http
                .post("https://github.com/login/oauth/access_token")
                .header("accept", "application/json")
                .form(&[
                    ("client_id", client.client_id.as_str()),
                    ("client_secret", client.client_secret.as_str()),
                    ("code", code),
                    ("redirect_uri", client.redirect_uri.as_str()),
                ])
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            let access_token = bearer(&token)?;

            let info: serde_json::Value = http
                .get("https://api.github.com/user")
                .header("user-agent", "courseforge")
                .bearer_auth(access_token)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            let email = match info["email"].as_str() {
                Some(email) if !email.is_empty() => email.to_string(),
                _ => {
                    let emails: serde_json::Value = http
                        .get("https://api.github.com/user/emails")
                        .header("user-agent", "courseforge")
                        .bearer_auth(bearer(&token)?)
                        .send()
                        .await?
                        .error_for_status()?
                        .json()
                        .await?;
                    emails
                        .as_array()
                        .and_then(|list| {
                            list.iter()
                                .find(|e| e["primary"].as_bool().unwrap_or(false))
                                .or_else(|| list.first())
                        })
                        .and_then(|e| e["email"].as_str())
                        .map(str::to_string)
                        .ok_or_else(|| anyhow!("github account has no usable email"))?
                }
            };
            Ok(RemoteIdentity {
                email,
                name: info["login"].as_str().unwrap_or("user").to_string(),
            })
        }
        "discord" => {
            let token: serde_json::Value = http
                .post("https://discord.com/api/oauth2/token")
                .form(&[
                    ("client_id", client.client_id.as_str()),
                    ("client_secret", client.client_secret.as_str()),
                    ("code", code),
                    ("grant_type", "authorization_code"),
                    ("redirect_uri", client.redirect_uri.as_str()),
                ])
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            let access_token = bearer(&token)?;

            let info: serde_json::Value = http
                .get("https://discord.com/api/users/@me")
                .bearer_auth(access_token)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            Ok(RemoteIdentity {
                email: str_field(&info, "email")?,
                name: info["username"].as_str().unwrap_or("user").to_string(),
            })
        }
        other => Err(anyhow!("unknown oauth provider: {other}")),
    }
}

fn bearer(token_response: &serde_json::Value) -> Result<&str> {
    token_response["access_token"]
        .as_str()
        .context("token response carried no access_token")
}

fn str_field(value: &serde_json::Value, field: &str) -> Result<String> {
    value[field]
        .as_str()
        .map(str::to_string)
        .with_context(|| format!("identity response missing {field}"))
}

async fn find_or_create_oauth_user(store: &Store, identity: &RemoteIdentity) -> Result<User> {
    if let Some(user) = store.get_user_by_email(&identity.email).await? {
        return Ok(user);
    }

    let username = generate_unique_username(store, &identity.name).await?;
    // Opaque random secret: OAuth accounts never log in by password.
    let random_password: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect();

    let user = store
        .create_user(NewUser {
            id: Uuid::new_v4().to_string(),
            username,
            email: identity.email.clone(),
            hashed_password: hash_password(&random_password)?,
            is_admin: false,
        })
        .await?;
    Ok(user)
}

/// Slugged remote name, suffixed until unique.
async fn generate_unique_username(store: &Store, name: &str) -> Result<String> {
    let base: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect::<String>()
        .to_lowercase();
    let base = if base.is_empty() { "user".to_string() } else { base };

    if store.get_user_by_username(&base).await?.is_none() {
        return Ok(base);
    }
    loop {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(6)
            .map(char::from)
            .collect::<String>()
            .to_lowercase();
        let candidate = format!("{base}_{suffix}");
        if store.get_user_by_username(&candidate).await?.is_none() {
            return Ok(candidate);
        }
    }
}
