// src/limiter/engine.rs

use axum::http::header::RETRY_AFTER;
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::response::Response;
use chrono::Utc;
use std::sync::atomic::Ordering;
use std::sync::PoisonError;

use super::{threshold, HandlerOutcome, RateLimitInfo, RateLimiter, ResponseState};
use crate::admission_event;
use crate::error::{RateLimiterError, Result};

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

/// What the gate decided for one request
pub enum Admission {
    /// Pass the request downstream, then hand the response to
    /// [`RateLimiter::complete`]
    Proceed(Pending),
    /// Send this response instead of calling downstream
    Reject(Pending, Response),
}

/// Bookkeeping for a request the gate has decided on but not yet finished
#[derive(Debug)]
pub struct Pending {
    state: ResponseState,
    key: Option<String>,
    info: Option<RateLimitInfo>,
}

impl Pending {
    fn skipped(state: ResponseState) -> Self {
        Self {
            state,
            key: None,
            info: None,
        }
    }

    fn counted(state: ResponseState, key: String, info: RateLimitInfo) -> Self {
        Self {
            state,
            key: Some(key),
            info: Some(info),
        }
    }

    /// The key the request was counted against; `None` when skipped
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn info(&self) -> Option<&RateLimitInfo> {
        self.info.as_ref()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.state.headers
    }
}

impl RateLimiter {
    /// Decides whether `request` may proceed.
    ///
    /// Skip check, then key and threshold (resolved concurrently), then one
    /// store increment. A counted request gets its [`RateLimitInfo`] inserted
    /// into `request.extensions` before either branch runs. Any failure along
    /// the way is returned as an error, never turned into an allow or a deny.
    pub async fn admit(&self, request: &mut Parts) -> Result<Admission> {
        let inner = &self.inner;
        let mut state = ResponseState::default();

        if inner.skip.should_skip(request, &state).await? {
            tracing::trace!(uri = %request.uri, "Request skipped by rate limiter");
            return Ok(Admission::Proceed(Pending::skipped(state)));
        }

        let (key, raw_limit) = futures::try_join!(
            self.resolve_key(request, &state),
            inner.threshold.resolve(request, &state)
        )?;
        let limit = threshold::coerce(raw_limit);

        let hit = inner.store.increment(&key).await.inspect_err(|e| {
            tracing::error!(key = key.as_str(), error = %e, "Store increment failed");
        })?;

        let info = RateLimitInfo::new(limit, hit.count, hit.reset_time);
        let allowed = !info.is_over_limit();
        admission_event!(key.as_str(), allowed, limit, info.current);

        if inner.headers {
            state.headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(limit));
            state
                .headers
                .insert(X_RATELIMIT_REMAINING, HeaderValue::from(info.remaining));
            if !allowed {
                let retry_after = info.retry_after_secs(Utc::now());
                state.headers.insert(RETRY_AFTER, HeaderValue::from(retry_after));
            }
        }

        request.extensions.insert(info);

        if allowed {
            return Ok(Admission::Proceed(Pending::counted(state, key, info)));
        }

        if let Some(on_limit_reached) = &inner.on_limit_reached {
            if self.first_denial_in_window(&key, &info) {
                on_limit_reached(request, &info);
            }
        }

        match inner.handler.handle(request, state, &info).await? {
            HandlerOutcome::Continue(state) => {
                Ok(Admission::Proceed(Pending::counted(state, key, info)))
            }
            HandlerOutcome::Respond(response) => Ok(Admission::Reject(
                Pending::counted(ResponseState::default(), key, info),
                response,
            )),
        }
    }

    /// Finishes a request with its final response.
    ///
    /// Copies the gate's headers onto `response` where the downstream did not
    /// set them itself, then gives the hit back if the skip-after-response
    /// options say this outcome should not count. A hit over the limit is
    /// never given back.
    pub async fn complete(&self, pending: Pending, mut response: Response) -> Response {
        let Pending { state, key, info } = pending;

        merge_headers(response.headers_mut(), &state.headers);
        response.extensions_mut().extend(state.extensions);

        if let Some(key) = settleable(key, info) {
            let succeeded = (self.inner.request_was_successful)(response.status());
            self.settle(&key, succeeded).await;
        }

        response
    }

    /// Finishes a request whose downstream failed without a response
    pub async fn abandon(&self, pending: Pending) {
        if let Some(key) = settleable(pending.key, pending.info) {
            self.settle(&key, false).await;
        }
    }

    async fn settle(&self, key: &str, succeeded: bool) {
        let inner = &self.inner;
        let give_back = if succeeded {
            inner.skip_successful_requests
        } else {
            inner.skip_failed_requests
        };

        if !give_back {
            return;
        }

        // best-effort: the response is already decided
        if let Err(e) = inner.store.decrement(key).await {
            tracing::warn!(key, error = %e, "Failed to give back rate limit hit");
        }
    }

    // True once per key and window, however often the count passes the limit
    fn first_denial_in_window(&self, key: &str, info: &RateLimitInfo) -> bool {
        let now = Utc::now();
        let mut reported = self
            .inner
            .limit_reported
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if reported.get(key).is_some_and(|reset_time| *reset_time > now) {
            return false;
        }

        reported.retain(|_, reset_time| *reset_time > now);
        reported.insert(key.to_string(), info.reset_time);
        true
    }

    async fn resolve_key(&self, request: &Parts, state: &ResponseState) -> Result<String> {
        let key = self.inner.key_resolver.resolve(request, state).await?;
        if !key.is_empty() {
            return Ok(key);
        }

        if !self.inner.empty_key_reported.swap(true, Ordering::Relaxed) {
            tracing::error!(
                uri = %request.uri,
                "Key generator returned an empty key; requests cannot be counted"
            );
        }
        Err(RateLimiterError::Config(
            "key generator returned an empty key".to_string(),
        ))
    }
}

// Over-limit hits stay counted whatever the response turns out to be
fn settleable(key: Option<String>, info: Option<RateLimitInfo>) -> Option<String> {
    match info {
        Some(info) if info.is_over_limit() => None,
        _ => key,
    }
}

fn merge_headers(target: &mut HeaderMap, source: &HeaderMap) {
    for name in source.keys() {
        if target.contains_key(name) {
            continue;
        }
        for value in source.get_all(name) {
            target.append(name.clone(), value.clone());
        }
    }
}
