// src/limiter/response.rs

use async_trait::async_trait;
use axum::body::Body;
use axum::http::header::{ACCEPT, CONTENT_TYPE};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::Response;
use serde_json::Value;
use std::fmt;

use super::{RateLimitInfo, ResponseState};
use crate::error::Result;

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
const APPLICATION_JSON: &str = "application/json";

/// Body of a rejection
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Always sent as plain text
    Text(String),
    /// Sent as JSON when the client accepts it, as text otherwise
    Json(Value),
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Message::Text(text.to_string())
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Message::Text(text)
    }
}

impl From<Value> for Message {
    fn from(value: Value) -> Self {
        Message::Json(value)
    }
}

type MessageFn = dyn Fn(&Parts, &ResponseState) -> Message + Send + Sync;

/// Where the default handler gets its message from
pub(crate) enum MessageSource {
    Fixed(Message),
    Computed(Box<MessageFn>),
}

impl MessageSource {
    fn message(&self, request: &Parts, response: &ResponseState) -> Message {
        match self {
            MessageSource::Fixed(message) => message.clone(),
            MessageSource::Computed(compute) => compute(request, response),
        }
    }
}

impl fmt::Debug for MessageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageSource::Fixed(message) => f.debug_tuple("Fixed").field(message).finish(),
            MessageSource::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

/// What a limit handler decided to do with a denied request
pub enum HandlerOutcome {
    /// Let the request through after all, with the given response state
    Continue(ResponseState),
    /// End the exchange with this response
    Respond(Response),
}

/// Handles requests that went over the limit.
///
/// By the time it runs the rate limit headers are already in `response`.
/// A custom handler owns the rest of the exchange: the gate adds nothing to
/// whatever it returns.
#[async_trait]
pub trait LimitHandler: Send + Sync {
    async fn handle(
        &self,
        request: &Parts,
        response: ResponseState,
        info: &RateLimitInfo,
    ) -> Result<HandlerOutcome>;
}

/// Built-in rejection: configured status code and message
#[derive(Debug)]
pub struct DefaultHandler {
    status: StatusCode,
    message: MessageSource,
}

impl DefaultHandler {
    pub(crate) fn new(status: StatusCode, message: MessageSource) -> Self {
        Self { status, message }
    }
}

#[async_trait]
impl LimitHandler for DefaultHandler {
    async fn handle(
        &self,
        request: &Parts,
        response: ResponseState,
        _info: &RateLimitInfo,
    ) -> Result<HandlerOutcome> {
        let message = self.message.message(request, &response);
        Ok(HandlerOutcome::Respond(render(
            message,
            &request.headers,
            self.status,
            response,
        )))
    }
}

/// Adapts a plain function into a [`LimitHandler`]
pub struct HandlerFn<F>(pub F);

#[async_trait]
impl<F> LimitHandler for HandlerFn<F>
where
    F: Fn(&Parts, ResponseState, &RateLimitInfo) -> Result<HandlerOutcome> + Send + Sync,
{
    async fn handle(
        &self,
        request: &Parts,
        response: ResponseState,
        info: &RateLimitInfo,
    ) -> Result<HandlerOutcome> {
        (self.0)(request, response, info)
    }
}

/// Builds a response carrying `message`, negotiated against the request's
/// `Accept` header.
pub fn render(
    message: Message,
    request_headers: &HeaderMap,
    status: StatusCode,
    state: ResponseState,
) -> Response {
    let (content_type, body) = match message {
        Message::Text(text) => (TEXT_PLAIN, text),
        Message::Json(value) if accepts_json(request_headers) => {
            (APPLICATION_JSON, value.to_string())
        }
        Message::Json(Value::String(text)) => (TEXT_PLAIN, text),
        Message::Json(value) => (TEXT_PLAIN, value.to_string()),
    };

    let ResponseState {
        headers,
        extensions,
    } = state;

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response.extensions_mut().extend(extensions);
    response
}

/// True when the client takes JSON, or states no preference at all
pub fn accepts_json(headers: &HeaderMap) -> bool {
    let mut ranges = headers
        .get_all(ACCEPT)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|range| {
            range
                .split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase()
        })
        .filter(|range| !range.is_empty())
        .peekable();

    if ranges.peek().is_none() {
        return true;
    }

    ranges.any(|range| {
        range == APPLICATION_JSON || range == "application/*" || range == "*/*" || range.ends_with("+json")
    })
}
