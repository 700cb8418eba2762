// src/limiter/key.rs

use async_trait::async_trait;
use axum::extract::ConnectInfo;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use std::net::{IpAddr, SocketAddr};

use super::ResponseState;
use crate::error::{RateLimiterError, Result};

/// Derives the identity a request is counted against
#[async_trait]
pub trait KeyResolver: Send + Sync {
    async fn resolve(&self, request: &Parts, response: &ResponseState) -> Result<String>;
}

/// Counts requests per client network address.
///
/// The address comes from the `ConnectInfo<SocketAddr>` extension that
/// `into_make_service_with_connect_info` installs. Behind a reverse proxy,
/// [`ClientAddress::trusting_forwarded_headers`] reads the first hop of
/// `X-Forwarded-For` (then `X-Real-IP`) before falling back to the socket.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientAddress {
    trust_forwarded: bool,
}

impl ClientAddress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trusting_forwarded_headers() -> Self {
        Self {
            trust_forwarded: true,
        }
    }

    /// The address this resolver would count `request` against
    pub fn client_ip(&self, request: &Parts) -> Option<IpAddr> {
        if self.trust_forwarded {
            if let Some(ip) = forwarded_ip(&request.headers) {
                return Some(ip);
            }
        }

        request
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
    }
}

fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    for name in ["x-forwarded-for", "x-real-ip"] {
        let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) else {
            continue;
        };
        // X-Forwarded-For lists hops client first
        if let Some(Ok(ip)) = value.split(',').next().map(|hop| hop.trim().parse::<IpAddr>()) {
            return Some(ip);
        }
    }
    None
}

#[async_trait]
impl KeyResolver for ClientAddress {
    async fn resolve(&self, request: &Parts, _response: &ResponseState) -> Result<String> {
        self.client_ip(request)
            .map(|ip| ip.to_string())
            .ok_or_else(|| {
                RateLimiterError::Config(
                    "no client address on the request; serve with ConnectInfo<SocketAddr> \
                     or configure a key generator"
                        .to_string(),
                )
            })
    }
}

/// Adapts a plain function into a [`KeyResolver`]
pub struct KeyFn<F>(pub F);

#[async_trait]
impl<F> KeyResolver for KeyFn<F>
where
    F: Fn(&Parts, &ResponseState) -> Result<String> + Send + Sync,
{
    async fn resolve(&self, request: &Parts, response: &ResponseState) -> Result<String> {
        (self.0)(request, response)
    }
}
