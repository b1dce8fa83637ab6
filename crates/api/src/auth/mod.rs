//! Authentication module for Supportdesk

pub mod jwt;
pub mod middleware;

pub use jwt::{JwtError, JwtManager, SessionClaims};
pub use middleware::{authenticate_token, bearer_token, require_auth, AuthState, AuthUser};
