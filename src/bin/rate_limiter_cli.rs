// src/bin/rate_limiter_cli.rs

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use rand::Rng;
use std::convert::Infallible;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};
use structopt::StructOpt;
use tokio::time;
use tower::{service_fn, BoxError, Layer, ServiceExt};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use rate_limiter::{RateLimitLayer, RateLimiter};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "rate_limiter_cli",
    about = "Sends simulated client traffic through a rate limiting gate"
)]
struct Opt {
    /// Maximum number of requests per client and window
    #[structopt(short, long, default_value = "5")]
    max: u64,

    /// Window duration in milliseconds
    #[structopt(short, long, default_value = "60000")]
    window_ms: u64,

    /// Number of requests to simulate
    #[structopt(short = "n", long, default_value = "20")]
    requests: usize,

    /// Number of distinct client addresses to pick from
    #[structopt(short, long, default_value = "1")]
    clients: u8,

    /// Time between requests in milliseconds, 0 for a burst
    #[structopt(short = "t", long, default_value = "0")]
    interval_ms: u64,

    /// Verbosity level
    #[structopt(short, long, parse(from_occurrences))]
    verbose: usize,

    /// Disable logs
    #[structopt(long)]
    disable_logs: bool,
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let opt = Opt::from_args();

    let filter = if opt.disable_logs {
        EnvFilter::new("rate_limiter_cli=error,rate_limiter=error")
    } else {
        let log_level = match opt.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        EnvFilter::new(format!(
            "rate_limiter_cli={},rate_limiter={}",
            log_level, log_level
        ))
    };
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if opt.clients == 0 {
        return Err("at least one client is required".into());
    }

    let limiter = RateLimiter::builder()
        .max(opt.max)
        .window_ms(opt.window_ms)
        .build()?;
    info!(
        "Configuration: max={}, window={}ms, clients={}",
        opt.max, opt.window_ms, opt.clients
    );

    let service = RateLimitLayer::new(limiter).layer(service_fn(|_: Request<Body>| async {
        Ok::<Response, Infallible>("ok".into_response())
    }));

    let interval = Duration::from_millis(opt.interval_ms);
    let mut allowed_count = 0;
    let mut denied_count = 0;
    let start_time = Instant::now();

    for i in 0..opt.requests {
        let request_time = Instant::now();
        let client = rand::rng().random_range(1..=opt.clients);
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, client)), 40000);

        let request = Request::builder()
            .uri("/")
            .extension(ConnectInfo(addr))
            .body(Body::empty())?;
        let response = service.clone().oneshot(request).await?;

        let remaining = response
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|value| value.to_str().ok())
            .unwrap_or("-")
            .to_string();

        if response.status() == StatusCode::OK {
            allowed_count += 1;
            info!(
                "Request {} from {}: {} (remaining: {})",
                i + 1,
                addr.ip(),
                response.status(),
                remaining
            );
        } else {
            denied_count += 1;
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|value| value.to_str().ok())
                .unwrap_or("-");
            warn!(
                "Request {} from {}: {} (retry after: {}s)",
                i + 1,
                addr.ip(),
                response.status(),
                retry_after
            );
        }

        let elapsed = request_time.elapsed();
        if elapsed < interval {
            time::sleep(interval - elapsed).await;
        }
    }

    let elapsed = start_time.elapsed();

    println!("\nSimulation Results:");
    println!("-------------------");
    println!("Total requests: {}", opt.requests);
    println!("Allowed: {}", allowed_count);
    println!("Denied: {}", denied_count);
    println!("Time elapsed: {:?}", elapsed);

    Ok(())
}
