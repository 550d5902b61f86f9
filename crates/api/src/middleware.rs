use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use chrono::Utc;

use printforge_auth::JwtValidator;

use crate::context::{ClientKey, PrincipalContext};

#[derive(Clone)]
pub struct AuthState {
    pub jwt: Arc<dyn JwtValidator>,
}

/// Requires a valid bearer token.
pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = extract_bearer(req.headers())?;
    let principal = validate(&state, token)?;

    let client = client_key(req.headers(), Some(&principal));
    req.extensions_mut().insert(client);
    req.extensions_mut().insert(principal);

    Ok(next.run(req).await)
}

/// For routes that also accept the worker API key: a bearer token is
/// validated when present, and its absence is left to the handler.
pub async fn optional_auth_middleware(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let principal = if req.headers().contains_key(axum::http::header::AUTHORIZATION) {
        let token = extract_bearer(req.headers())?;
        Some(validate(&state, token)?)
    } else {
        None
    };

    let client = client_key(req.headers(), principal.as_ref());
    req.extensions_mut().insert(client);
    if let Some(principal) = principal {
        req.extensions_mut().insert(principal);
    }

    Ok(next.run(req).await)
}

fn validate(state: &AuthState, token: &str) -> Result<PrincipalContext, StatusCode> {
    let claims = state.jwt.validate(token, Utc::now()).map_err(|e| {
        tracing::debug!(error = %e, "bearer token rejected");
        StatusCode::UNAUTHORIZED
    })?;
    Ok(PrincipalContext::new(claims.sub, claims.roles))
}

fn extract_bearer(headers: &HeaderMap) -> Result<&str, StatusCode> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let header = header.to_str().map_err(|_| StatusCode::UNAUTHORIZED)?;

    let header = header
        .strip_prefix("Bearer ")
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let token = header.trim();
    if token.is_empty() {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(token)
}

/// Rate-limit identity. Authenticated callers are keyed on their user id so
/// forwarding headers cannot open fresh windows; anonymous callers fall back
/// to the first `X-Forwarded-For` hop, then `X-Real-IP`, then `anonymous`.
pub fn client_key(headers: &HeaderMap, principal: Option<&PrincipalContext>) -> ClientKey {
    if let Some(p) = principal {
        return ClientKey(format!("user:{}", p.user_id()));
    }

    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    let forwarded = header("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    let key = forwarded
        .or_else(|| header("x-real-ip"))
        .unwrap_or("anonymous");
    ClientKey(key.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use printforge_core::UserId;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_static(v));
        }
        map
    }

    #[test]
    fn first_forwarded_hop_wins() {
        let h = headers(&[
            ("x-forwarded-for", "203.0.113.9, 10.0.0.1"),
            ("x-real-ip", "10.0.0.2"),
        ]);
        assert_eq!(client_key(&h, None).as_str(), "203.0.113.9");
    }

    #[test]
    fn real_ip_then_anonymous() {
        assert_eq!(
            client_key(&headers(&[("x-real-ip", "10.0.0.2")]), None).as_str(),
            "10.0.0.2"
        );
        assert_eq!(client_key(&HeaderMap::new(), None).as_str(), "anonymous");
    }

    #[test]
    fn authenticated_user_ignores_forwarding_headers() {
        let user = UserId::new();
        let principal = PrincipalContext::new(user, vec![]);

        let a = client_key(&headers(&[("x-forwarded-for", "1.1.1.1")]), Some(&principal));
        let b = client_key(
            &headers(&[("x-forwarded-for", "2.2.2.2"), ("x-real-ip", "3.3.3.3")]),
            Some(&principal),
        );
        assert_eq!(a, b);
        assert_eq!(a.as_str(), format!("user:{user}"));
    }

    #[test]
    fn blank_forwarded_header_is_ignored() {
        let h = headers(&[("x-forwarded-for", " "), ("x-real-ip", "10.0.0.2")]);
        assert_eq!(client_key(&h, None).as_str(), "10.0.0.2");
    }
}
