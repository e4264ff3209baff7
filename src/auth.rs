//! Session identity lookup.
//!
//! OAuth and session issuance live in front of this service; by the time a
//! request reaches us the authenticated user id is carried in a header.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use std::convert::Infallible;

/// Header carrying the authenticated user's id.
pub const USER_HEADER: &str = "x-user-id";

/// The requesting user, if the request is authenticated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Viewer(pub Option<String>);

impl Viewer {
    pub fn id(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Viewer
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user = parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        Ok(Viewer(user))
    }
}
