// src/limiter/skip.rs

use async_trait::async_trait;
use axum::http::request::Parts;

use super::ResponseState;
use crate::error::Result;

/// Decides whether a request bypasses the gate entirely.
///
/// A skipped request is never counted and gets no rate limit headers.
#[async_trait]
pub trait SkipPredicate: Send + Sync {
    async fn should_skip(&self, request: &Parts, response: &ResponseState) -> Result<bool>;
}

/// Counts every request
#[derive(Debug, Clone, Copy, Default)]
pub struct Never;

#[async_trait]
impl SkipPredicate for Never {
    async fn should_skip(&self, _request: &Parts, _response: &ResponseState) -> Result<bool> {
        Ok(false)
    }
}

/// Adapts a plain function into a [`SkipPredicate`]
pub struct SkipFn<F>(pub F);

#[async_trait]
impl<F> SkipPredicate for SkipFn<F>
where
    F: Fn(&Parts, &ResponseState) -> Result<bool> + Send + Sync,
{
    async fn should_skip(&self, request: &Parts, response: &ResponseState) -> Result<bool> {
        (self.0)(request, response)
    }
}
