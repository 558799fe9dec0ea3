//! Caller identity, injected by the upstream gateway.
//!
//! Authentication, sessions and CSRF live in front of this service; by the
//! time a request lands here the gateway has already resolved the caller and
//! stamped the identity headers. Webhook routes skip this extractor.

use axum::async_trait;
use axum::extract::FromRequestParts;
use http::request::Parts;

use crate::error::AppError;
use crate::store::Visibility;

pub const USER_HEADER: &str = "x-auth-user";
pub const ROLE_HEADER: &str = "x-auth-role";

#[derive(Debug, Clone)]
pub struct Actor {
    pub username: String,
    /// Elevated actors see every transaction, not only their own.
    pub elevated: bool,
}

impl Actor {
    pub fn visibility(&self) -> Visibility {
        if self.elevated {
            Visibility::All
        } else {
            Visibility::Actor(self.username.clone())
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let username = parts
            .headers
            .get(USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or(AppError::Unauthenticated)?
            .to_string();

        let elevated = parts
            .headers
            .get(ROLE_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(|role| role.eq_ignore_ascii_case("admin"))
            .unwrap_or(false);

        Ok(Actor { username, elevated })
    }
}
