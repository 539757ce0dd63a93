use actix_web::dev::Payload;
use actix_web::{Error as ActixError, FromRequest, HttpMessage, HttpRequest};
use std::future::{ready, Ready};

use crate::error::AppError;

/// The id of the caller, as established by `AuthMiddleware`.
///
/// Handlers that take this extractor reject anonymous requests with
/// `401 Unauthorized`. The middleware only inserts it after the bearer token
/// has been verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUserId(pub i32);

impl FromRequest for AuthenticatedUserId {
    type Error = ActixError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        match req.extensions().get::<AuthenticatedUserId>().copied() {
            Some(user) => ready(Ok(user)),
            None => {
                let err = AppError::Unauthorized("Authentication required".to_string());
                ready(Err(err.into()))
            }
        }
    }
}

/// Like `AuthenticatedUserId`, but anonymous callers are allowed. Used by
/// public reads that personalise the response (e.g. `isLiked`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionalUserId(pub Option<i32>);

impl FromRequest for OptionalUserId {
    type Error = ActixError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let user = req
            .extensions()
            .get::<AuthenticatedUserId>()
            .map(|user| user.0);
        ready(Ok(OptionalUserId(user)))
    }
}
