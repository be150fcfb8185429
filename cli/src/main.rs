//! pledge demo - session renewal walkthrough.
//!
//! Simulates a client whose session token has gone stale:
//!
//! ```text
//! N requests -> 401 -> one renewal -> on_renewed installs token -> N replays
//!                           |
//!                           +-- renewal fails -> every request rejected
//! ```
//!
//! followed by a flaky ping retried with backoff, then prints one summary line.
//!
//! # Environment
//!
//! - `PLEDGE_DEMO_REQUESTS`: concurrent requests to issue (default 4)
//! - `PLEDGE_DEMO_FAIL_RENEWAL`: `1`/`true` makes the renewal fail
//! - `PLEDGE_CONFIG`: config file location (default `~/.pledge/config.toml`)
//! - `RUST_LOG`: log filter (default `info`), written to stderr

use std::env;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use pledge_config::PledgeConfig;
use pledge_core::{CriticalSection, Error, Promise, PromiseState, background, init_background};
use pledge_retry::{RenewalCoordinator, RetryPolicy, retry_with};

const DEFAULT_REQUESTS: usize = 4;
const UNAUTHORIZED: &str = "401 unauthorized";

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DemoOptions {
    requests: usize,
    fail_renewal: bool,
}

impl DemoOptions {
    fn from_env() -> Self {
        Self::parse(
            env::var("PLEDGE_DEMO_REQUESTS").ok().as_deref(),
            env::var("PLEDGE_DEMO_FAIL_RENEWAL").ok().as_deref(),
        )
    }

    fn parse(requests: Option<&str>, fail_renewal: Option<&str>) -> Self {
        let requests = match requests.map(str::trim) {
            None | Some("") => DEFAULT_REQUESTS,
            Some(raw) => match raw.parse::<usize>() {
                Ok(count) if count > 0 => count,
                _ => {
                    tracing::warn!("Invalid PLEDGE_DEMO_REQUESTS value: {}", raw);
                    DEFAULT_REQUESTS
                }
            },
        };
        let fail_renewal = fail_renewal.is_some_and(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes"
            )
        });
        Self {
            requests,
            fail_renewal,
        }
    }
}

/// Server side of the simulation: accepts exactly one token at a time.
#[derive(Clone)]
struct Server {
    valid: Arc<CriticalSection<u32>>,
}

impl Server {
    fn new() -> Self {
        Self {
            valid: Arc::new(CriticalSection::new(1)),
        }
    }

    fn accepts(&self, token: u32) -> bool {
        self.valid.synchronized(|valid| *valid == token)
    }

    /// Issue a new token, invalidating the previous one.
    fn rotate(&self) -> u32 {
        self.valid.synchronized(|valid| {
            *valid += 1;
            *valid
        })
    }
}

/// Client side: the token it currently sends.
#[derive(Clone)]
struct Client {
    token: Arc<CriticalSection<u32>>,
    server: Server,
}

impl Client {
    fn fetch(&self, item: usize) -> Promise<String> {
        let client = self.clone();
        Promise::new(move |resolver| {
            thread::sleep(Duration::from_millis(10));
            let token = client.token.synchronized(|token| *token);
            if !client.server.accepts(token) {
                return Err(Error::message(UNAUTHORIZED));
            }
            resolver.resolve(format!("item {item} (token {token})"));
            Ok(())
        })
    }

    fn renew(&self, fail: bool) -> Promise<u32> {
        let server = self.server.clone();
        Promise::new(move |resolver| {
            thread::sleep(Duration::from_millis(100));
            if fail {
                return Err(Error::RenewalFailed(Box::new(Error::message(
                    "credentials rejected",
                ))));
            }
            resolver.resolve(server.rotate());
            Ok(())
        })
    }
}

#[derive(Debug, Default)]
struct Summary {
    fulfilled: usize,
    rejected: usize,
    timed_out: usize,
}

impl Summary {
    fn record<T>(&mut self, state: &PromiseState<T, Error>) {
        match state {
            PromiseState::Fulfilled(_) => self.fulfilled += 1,
            PromiseState::Rejected(_) => self.rejected += 1,
            PromiseState::Pending => self.timed_out += 1,
        }
    }
}

fn run_renewal(options: DemoOptions, wait: Option<Duration>) -> (Summary, u64) {
    let client = Client {
        token: Arc::new(CriticalSection::new(0)),
        server: Server::new(),
    };

    let renewing = client.clone();
    let installing = client.clone();
    let coordinator: RenewalCoordinator<u32> = RenewalCoordinator::builder(
        move || renewing.renew(options.fail_renewal),
        |error: &Error| *error == Error::message(UNAUTHORIZED),
    )
    .on_renewed(move |outcome| match outcome {
        Ok(token) => {
            installing.token.synchronized(|current| *current = *token);
            tracing::info!(token, "Installed renewed session token");
        }
        Err(error) => tracing::warn!(%error, "Session renewal failed"),
    })
    .build();

    let futures: Vec<_> = (0..options.requests)
        .map(|item| {
            let client = client.clone();
            coordinator.execute(move || client.fetch(item)).future()
        })
        .collect();

    let mut summary = Summary::default();
    for (item, future) in futures.iter().enumerate() {
        let state = future.wait_for(wait);
        match &state {
            PromiseState::Fulfilled(body) => tracing::info!(item, %body, "Request fulfilled"),
            PromiseState::Rejected(error) => tracing::info!(item, %error, "Request rejected"),
            PromiseState::Pending => tracing::warn!(item, "Request timed out"),
        }
        summary.record(&state);
    }
    (summary, coordinator.renewals())
}

fn run_ping(policy: &RetryPolicy, wait: Option<Duration>) -> PromiseState<u32, Error> {
    let calls = Arc::new(AtomicU32::new(0));
    let attempts = policy.attempts();
    let ping = move || {
        let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call < 3 {
            Promise::rejected(Error::message(format!("ping {call} dropped")))
        } else {
            Promise::resolved(call)
        }
    };

    retry_with(policy, background(), |_| true, ping)
        .or_else(move |last| {
            Promise::rejected(Error::RetriesExhausted {
                attempts,
                last: Box::new(last),
            })
        })
        .future()
        .wait_for(wait)
}

fn main() -> Result<()> {
    init_tracing();

    let config = PledgeConfig::load().ok().flatten().unwrap_or_default();
    init_background(&config.pool()).context("failed to start worker pool")?;

    let options = DemoOptions::from_env();
    let wait = config.wait().default_timeout();
    tracing::info!(
        requests = options.requests,
        fail_renewal = options.fail_renewal,
        "Starting session renewal demo"
    );

    let (summary, renewals) = run_renewal(options, wait);
    let ping = match run_ping(&RetryPolicy::from_config(&config.retry()), wait) {
        PromiseState::Fulfilled(attempt) => format!("ok after {attempt} attempts"),
        PromiseState::Rejected(error) => format!("failed ({error})"),
        PromiseState::Pending => "timed out".to_string(),
    };

    println!(
        "requests: {} fulfilled, {} rejected, {} timed out; renewals: {}; ping: {}",
        summary.fulfilled, summary.rejected, summary.timed_out, renewals, ping
    );
    Ok(())
}
