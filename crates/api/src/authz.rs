//! Caller resolution for endpoints that accept either the worker API key or
//! a user session.
//!
//! Authorization of the operation itself stays in the engine, registry and
//! dispatcher: handlers only decide *who* is calling.

use axum::http::{HeaderMap, StatusCode};

use printforge_auth::AuthContext;
use printforge_infra::notifications::Caller;

use crate::app::errors;

pub const API_KEY_HEADER: &str = "x-api-key";
pub const CSRF_HEADER: &str = "x-csrf-token";

pub fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Owned form of [`Caller`], movable into a blocking task.
#[derive(Debug, Clone)]
pub enum CallerIdentity {
    Worker { api_key: String },
    User {
        auth: AuthContext,
        csrf_token: Option<String>,
    },
}

impl CallerIdentity {
    /// `X-API-Key` takes precedence; without it the bearer session must be
    /// present and the CSRF token is checked downstream.
    pub fn resolve(
        headers: &HeaderMap,
        auth: Option<AuthContext>,
    ) -> Result<Self, axum::response::Response> {
        if let Some(api_key) = header_str(headers, API_KEY_HEADER) {
            return Ok(CallerIdentity::Worker {
                api_key: api_key.to_string(),
            });
        }
        match auth {
            Some(auth) => Ok(CallerIdentity::User {
                auth,
                csrf_token: header_str(headers, CSRF_HEADER).map(str::to_string),
            }),
            None => Err(errors::json_error(
                StatusCode::UNAUTHORIZED,
                "unauthenticated",
                "API key or user session required",
            )),
        }
    }

    pub fn caller(&self) -> Caller<'_> {
        match self {
            CallerIdentity::Worker { api_key } => Caller::Worker { api_key: api_key.as_str() },
            CallerIdentity::User { auth, csrf_token } => Caller::User {
                auth,
                csrf_token: csrf_token.as_deref(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use printforge_core::UserId;

    #[test]
    fn api_key_wins_over_session() {
        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, HeaderValue::from_static("k3y"));
        let auth = AuthContext::for_user(UserId::new(), vec![]);

        let Ok(identity) = CallerIdentity::resolve(&headers, Some(auth)) else {
            panic!("Expected a caller");
        };
        match identity.caller() {
            Caller::Worker { api_key } => assert_eq!(api_key, "k3y"),
            _ => panic!("Expected Worker caller"),
        }
    }

    #[test]
    fn session_carries_csrf_header() {
        let mut headers = HeaderMap::new();
        headers.insert(CSRF_HEADER, HeaderValue::from_static("tok"));
        let auth = AuthContext::for_user(UserId::new(), vec![]);

        let Ok(identity) = CallerIdentity::resolve(&headers, Some(auth)) else {
            panic!("Expected a caller");
        };
        match identity.caller() {
            Caller::User { csrf_token, .. } => assert_eq!(csrf_token, Some("tok")),
            _ => panic!("Expected User caller"),
        }
    }

    #[test]
    fn neither_is_unauthorized() {
        match CallerIdentity::resolve(&HeaderMap::new(), None) {
            Err(res) => assert_eq!(res.status(), StatusCode::UNAUTHORIZED),
            Ok(_) => panic!("Expected 401 without credentials"),
        }
    }
}
