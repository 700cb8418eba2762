// src/limiter/threshold.rs

use async_trait::async_trait;
use axum::http::request::Parts;
use std::future::Future;

use super::ResponseState;
use crate::error::Result;

/// Produces the request cap for the current request.
///
/// Resolvers may return any integer; the gate clamps negatives to zero, and
/// a cap of zero denies every request.
#[async_trait]
pub trait ThresholdResolver: Send + Sync {
    async fn resolve(&self, request: &Parts, response: &ResponseState) -> Result<i64>;
}

/// The same cap for every request
#[derive(Debug, Clone, Copy)]
pub struct Fixed(pub u64);

#[async_trait]
impl ThresholdResolver for Fixed {
    async fn resolve(&self, _request: &Parts, _response: &ResponseState) -> Result<i64> {
        Ok(i64::try_from(self.0).unwrap_or(i64::MAX))
    }
}

/// A cap computed synchronously from the request
pub struct ThresholdFn<F>(pub F);

#[async_trait]
impl<F> ThresholdResolver for ThresholdFn<F>
where
    F: Fn(&Parts, &ResponseState) -> Result<i64> + Send + Sync,
{
    async fn resolve(&self, request: &Parts, response: &ResponseState) -> Result<i64> {
        (self.0)(request, response)
    }
}

/// A cap that has to be awaited, e.g. looked up in a plan database.
///
/// The function reads what it needs from the request and hands back an
/// owned future.
pub struct AsyncThresholdFn<F>(pub F);

#[async_trait]
impl<F, Fut> ThresholdResolver for AsyncThresholdFn<F>
where
    F: Fn(&Parts, &ResponseState) -> Fut + Send + Sync,
    Fut: Future<Output = Result<i64>> + Send + 'static,
{
    async fn resolve(&self, request: &Parts, response: &ResponseState) -> Result<i64> {
        (self.0)(request, response).await
    }
}

/// Clamps a resolved threshold to a usable cap
pub(crate) fn coerce(raw: i64) -> u64 {
    u64::try_from(raw).unwrap_or(0)
}
