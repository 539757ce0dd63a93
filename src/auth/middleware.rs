use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header,
    Error, HttpMessage,
};
use futures::future::{ready, LocalBoxFuture, Ready};
use std::rc::Rc;

use crate::auth::extractors::AuthenticatedUserId;
use crate::auth::token::{verify_token, TokenKind};
use crate::config::JwtSettings;
use crate::error::AppError;

/// Verifies `Authorization: Bearer <access token>` when present.
///
/// A valid token puts an `AuthenticatedUserId` into the request extensions;
/// a present but invalid token is rejected with 401. Requests without the
/// header pass through untouched and the extractors decide whether the route
/// needs a caller.
pub struct AuthMiddleware {
    settings: Rc<JwtSettings>,
}

impl AuthMiddleware {
    pub fn new(settings: JwtSettings) -> Self {
        Self {
            settings: Rc::new(settings),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for AuthMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = AuthMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AuthMiddlewareService {
            service,
            settings: Rc::clone(&self.settings),
        }))
    }
}

pub struct AuthMiddlewareService<S> {
    service: S,
    settings: Rc<JwtSettings>,
}

impl<S, B> Service<ServiceRequest> for AuthMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let header_value = req
            .headers()
            .get(header::AUTHORIZATION)
            .map(|value| value.to_str().unwrap_or_default().to_string());

        let Some(header_value) = header_value else {
            return Box::pin(self.service.call(req));
        };

        let token = match header_value.strip_prefix("Bearer ") {
            Some(token) if !token.trim().is_empty() => token.trim(),
            _ => {
                let err = AppError::Unauthorized("Malformed Authorization header".into());
                return Box::pin(async move { Err(err.into()) });
            }
        };

        match verify_token(token, TokenKind::Access, &self.settings) {
            Ok(claims) => {
                req.extensions_mut().insert(AuthenticatedUserId(claims.sub));
                Box::pin(self.service.call(req))
            }
            Err(err) => {
                log::debug!("Rejected bearer token on {}: {}", req.path(), err);
                Box::pin(async move { Err(err.into()) })
            }
        }
    }
}
