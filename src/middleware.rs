// src/middleware.rs

//! Tower integration: put a [`RateLimiter`] in front of any HTTP service.
//!
//! Gate failures (resolver errors, an unreachable store) surface as the
//! service's error, a [`tower::BoxError`] wrapping a
//! [`RateLimiterError`](crate::RateLimiterError). In an axum router pair the
//! layer with `HandleErrorLayer` and [`handle_error`] to turn them into
//! responses.

use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::future::BoxFuture;
use std::task::{Context, Poll};
use tower::{BoxError, Layer, Service};

use crate::error::RateLimiterError;
use crate::limiter::{Admission, RateLimiter};

/// Rate limiting layer for Tower
#[derive(Debug, Clone)]
pub struct RateLimitLayer {
    limiter: RateLimiter,
}

impl RateLimitLayer {
    pub fn new(limiter: RateLimiter) -> Self {
        Self { limiter }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: self.limiter.clone(),
        }
    }
}

/// Rate limiting service
#[derive(Debug, Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: RateLimiter,
}

impl<S> RateLimitService<S> {
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }
}

impl<S, ReqBody> Service<Request<ReqBody>> for RateLimitService<S>
where
    S: Service<Request<ReqBody>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: Into<BoxError>,
    ReqBody: Send + 'static,
{
    type Response = Response;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        let limiter = self.limiter.clone();
        // the clone is not ready, keep the instance poll_ready was called on
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let (mut parts, body) = request.into_parts();

            match limiter.admit(&mut parts).await? {
                Admission::Proceed(pending) => {
                    let result = inner
                        .call(Request::from_parts(parts, body))
                        .await
                        .map_err(Into::<BoxError>::into);
                    match result {
                        Ok(response) => Ok(limiter.complete(pending, response).await),
                        Err(e) => {
                            limiter.abandon(pending).await;
                            Err(e)
                        }
                    }
                }
                Admission::Reject(pending, response) => {
                    Ok(limiter.complete(pending, response).await)
                }
            }
        })
    }
}

/// Error handler for `HandleErrorLayer` in front of [`RateLimitLayer`]
pub async fn handle_error(err: BoxError) -> Response {
    match err.downcast::<RateLimiterError>() {
        Ok(err) => (*err).into_response(),
        Err(err) => {
            tracing::error!(error = %err, "Unhandled service error");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}
