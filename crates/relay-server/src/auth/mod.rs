//! Authentication: token issuance/validation and the request extractor.
//!
//! A bearer credential is accepted either from the `Authorization` header
//! or from the `auth_token` cookie set at login.

pub mod jwt;
pub mod password;

use crate::error::ApiError;
use crate::routes::AppState;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};
use std::sync::Arc;

/// Name of the cookie carrying the token.
pub const AUTH_COOKIE: &str = "auth_token";

/// The authenticated caller, resolved from a validated token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// User id (token subject).
    pub id: i64,
    /// Display name used as the chat sender identity.
    pub name: String,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)
            .or_else(|| cookie_token(&parts.headers))
            .ok_or(ApiError::Unauthorized)?;

        let claims = state
            .jwt
            .validate_token(&token)
            .map_err(|_| ApiError::InvalidToken)?;

        Ok(Self {
            id: claims.sub,
            name: claims.name,
        })
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return None;
    }
    Some(token.to_string())
}

fn cookie_token(headers: &HeaderMap) -> Option<String> {
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == AUTH_COOKIE && !value.is_empty()).then(|| value.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_token_extraction() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer abc.def.ghi"),
        );
        assert_eq!(bearer_token(&headers).as_deref(), Some("abc.def.ghi"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic xyz"));
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn test_cookie_token_extraction() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; auth_token=tok123; lang=en"),
        );
        assert_eq!(cookie_token(&headers).as_deref(), Some("tok123"));

        headers.insert(header::COOKIE, HeaderValue::from_static("theme=dark"));
        assert_eq!(cookie_token(&headers), None);
    }
}
