//! `printforge-auth`: authentication/authorization boundary.
//!
//! Decoupled from HTTP and storage: the API layer turns headers into an
//! [`AuthContext`] and every engine/gateway call receives it explicitly.

pub mod api_key;
pub mod authorize;
pub mod claims;
pub mod csrf;
pub mod jwt;
pub mod permissions;
pub mod roles;

pub use api_key::ApiKeyVerifier;
pub use authorize::{AuthContext, AuthzError, authorize};
pub use claims::{JwtClaims, TokenValidationError, validate_claims};
pub use csrf::{CsrfError, CsrfValidator, HmacCsrfTokens};
pub use jwt::{Hs256JwtValidator, JwtValidator};
pub use permissions::Permission;
pub use roles::{Role, permissions_for_roles};
