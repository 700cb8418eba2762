// src/limiter/tests/mod.rs


// Shared helpers for driving the engine directly
pub(crate) mod common {
    use axum::body::Body;
    use axum::http::request::Parts;
    use axum::response::Response;

    use crate::limiter::{Admission, Pending, RateLimiter};

    pub fn expect_proceed(admission: Admission) -> Pending {
        match admission {
            Admission::Proceed(pending) => pending,
            Admission::Reject(_, response) => {
                panic!("Expected request to proceed, got {}", response.status())
            }
        }
    }

    pub fn expect_reject(admission: Admission) -> (Pending, Response) {
        match admission {
            Admission::Reject(pending, response) => (pending, response),
            Admission::Proceed(pending) => {
                panic!("Expected request to be rejected, got {:?}", pending.info())
            }
        }
    }

    pub fn header<'a>(headers: &'a axum::http::HeaderMap, name: &str) -> Option<&'a str> {
        headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    /// Runs one request through the gate and returns whether it was allowed
    pub async fn hit(limiter: &RateLimiter, parts: &mut Parts) -> bool {
        matches!(limiter.admit(parts).await.unwrap(), Admission::Proceed(_))
    }

    pub fn empty_response() -> Response {
        Response::new(Body::empty())
    }
}
