//! Token and cookie plumbing: bcrypt password hashes, HS256/RS256 JWTs, the
//! two HttpOnly session cookies, and the authenticated-user extractors.

use anyhow::{anyhow, Context, Result};
use axum::extract::FromRequestParts;
use axum::http::header::COOKIE;
use axum::http::request::Parts;
use chrono::Utc;
use courseforge_config::{Config, JwtAlgorithm};
use courseforge_store::User;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::AppState;

pub const ACCESS_COOKIE: &str = "access_token";
pub const REFRESH_COOKIE: &str = "refresh_token";

pub fn hash_password(password: &str) -> Result<String> {
    bcrypt::hash(password, bcrypt::DEFAULT_COST).context("failed to hash password")
}

pub fn verify_password(password: &str, hashed: &str) -> bool {
    bcrypt::verify(password, hashed).unwrap_or(false)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    pub token_type: String,
}

fn algorithm(config: &Config) -> Algorithm {
    match config.jwt.algorithm {
        JwtAlgorithm::HS256 => Algorithm::HS256,
        JwtAlgorithm::RS256 => Algorithm::RS256,
    }
}

fn encoding_key(config: &Config) -> Result<EncodingKey> {
    match config.jwt.algorithm {
        JwtAlgorithm::HS256 => Ok(EncodingKey::from_secret(config.jwt.secret_key.as_bytes())),
        JwtAlgorithm::RS256 => {
            EncodingKey::from_rsa_pem(config.jwt.private_key_pem.as_bytes())
                .context("invalid RSA private key")
        }
    }
}

fn decoding_key(config: &Config) -> Result<DecodingKey> {
    match config.jwt.algorithm {
        JwtAlgorithm::HS256 => Ok(DecodingKey::from_secret(config.jwt.secret_key.as_bytes())),
        JwtAlgorithm::RS256 => DecodingKey::from_rsa_pem(config.jwt.public_key_pem.as_bytes())
            .context("invalid RSA public key"),
    }
}

pub fn create_token(config: &Config, user_id: &str, token_type: &str, ttl_minutes: i64) -> Result<String> {
    let claims = Claims {
        sub: user_id.to_owned(),
        exp: (Utc::now() + chrono::Duration::minutes(ttl_minutes)).timestamp(),
        token_type: token_type.to_owned(),
    };
    jsonwebtoken::encode(&Header::new(algorithm(config)), &claims, &encoding_key(config)?)
        .context("failed to sign token")
}

pub fn decode_token(config: &Config, token: &str, expected_type: &str) -> Result<Claims> {
    let data = jsonwebtoken::decode::<Claims>(
        token,
        &decoding_key(config)?,
        &Validation::new(algorithm(config)),
    )
    .context("invalid or expired token")?;
    if data.claims.token_type != expected_type {
        return Err(anyhow!("wrong token type"));
    }
    Ok(data.claims)
}

fn secure_flag(config: &Config) -> &'static str {
    if config.jwt.secure_cookie {
        "; Secure"
    } else {
        ""
    }
}

pub fn access_cookie(config: &Config, token: &str) -> String {
    format!(
        "{ACCESS_COOKIE}={token}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax{}",
        config.jwt.access_ttl_minutes * 60,
        secure_flag(config)
    )
}

pub fn refresh_cookie(config: &Config, token: &str) -> String {
    format!(
        "{REFRESH_COOKIE}={token}; Path=/api/auth/refresh; Max-Age={}; HttpOnly; SameSite=Lax{}",
        config.jwt.refresh_ttl_minutes * 60,
        secure_flag(config)
    )
}

pub fn clear_access_cookie(config: &Config) -> String {
    format!("{ACCESS_COOKIE}=; Path=/; Max-Age=0; HttpOnly; SameSite=Lax{}", secure_flag(config))
}

pub fn clear_refresh_cookie(config: &Config) -> String {
    format!(
        "{REFRESH_COOKIE}=; Path=/api/auth/refresh; Max-Age=0; HttpOnly; SameSite=Lax{}",
        secure_flag(config)
    )
}

/// Value of a named cookie from the request headers.
pub fn cookie_value(parts: &Parts, name: &str) -> Option<String> {
    let header = parts.headers.get(COOKIE)?.to_str().ok()?;
    for pair in header.split(';') {
        let mut split = pair.trim().splitn(2, '=');
        if split.next() == Some(name) {
            return split.next().map(str::to_string);
        }
    }
    None
}

/// The authenticated active user, resolved from the access cookie.
pub struct AuthUser(pub User);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = cookie_value(parts, ACCESS_COOKIE)
            .ok_or_else(|| ApiError::Unauthorized("not authenticated".into()))?;
        let claims = decode_token(state.config, &token, "access")
            .map_err(|e| ApiError::Unauthorized(e.to_string()))?;
        let user = state
            .store
            .get_user(&claims.sub)
            .await?
            .ok_or_else(|| ApiError::Unauthorized("user no longer exists".into()))?;
        if !user.is_active {
            return Err(ApiError::Unauthorized("inactive user".into()));
        }
        Ok(AuthUser(user))
    }
}

/// Admin-only extractor.
pub struct AdminUser(pub User);

impl FromRequestParts<AppState> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let AuthUser(user) = AuthUser::from_request_parts(parts, state).await?;
        if !user.is_admin {
            return Err(ApiError::Forbidden("admin access required".into()));
        }
        Ok(AdminUser(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn test_config() -> Config {
        Config::from_lookup(|key| match key {
            "SECRET_KEY" => Some("unit-test-secret".to_string()),
            "SECURE_COOKIE" => Some("false".to_string()),
            _ => None,
        })
    }

    #[test]
    fn password_hash_round_trip() {
        let hashed = hash_password("hunter2").unwrap();
        assert!(verify_password("hunter2", &hashed));
        assert!(!verify_password("hunter3", &hashed));
    }

    #[test]
    fn token_round_trip_and_type_check() {
        let config = test_config();
        let token = create_token(&config, "user-1", "access", 20).unwrap();
        let claims = decode_token(&config, &token, "access").unwrap();
        assert_eq!(claims.sub, "user-1");

        // A refresh check against an access token fails.
        assert!(decode_token(&config, &token, "refresh").is_err());
        assert!(decode_token(&config, "garbage", "access").is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let config = test_config();
        let token = create_token(&config, "user-1", "access", -5).unwrap();
        assert!(decode_token(&config, &token, "access").is_err());
    }

    #[test]
    fn cookies_carry_the_required_attributes() {
        let mut config = test_config();
        let access = access_cookie(&config, "tok");
        assert!(access.starts_with("access_token=tok; Path=/;"));
        assert!(access.contains("HttpOnly"));
        assert!(access.contains("SameSite=Lax"));
        assert!(!access.contains("Secure"));

        config.jwt.secure_cookie = true;
        let refresh = refresh_cookie(&config, "tok");
        assert!(refresh.contains("Path=/api/auth/refresh"));
        assert!(refresh.contains("Secure"));

        assert!(clear_access_cookie(&config).contains("Max-Age=0"));
        assert!(clear_refresh_cookie(&config).contains("Max-Age=0"));
    }

    #[test]
    fn cookie_value_parses_multiple_cookies() {
        let request = Request::builder()
            .header(COOKIE, "foo=1; access_token=abc.def; bar=2")
            .body(())
            .unwrap();
        let (parts, _) = request.into_parts();
        assert_eq!(cookie_value(&parts, "access_token").as_deref(), Some("abc.def"));
        assert_eq!(cookie_value(&parts, "bar").as_deref(), Some("2"));
        assert!(cookie_value(&parts, "missing").is_none());
    }
}
