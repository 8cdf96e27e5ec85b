//! Per-node call throttling with randomized delays
//!
//! A [`RateLimiter`] guards a node that calls an externally rate-limited
//! service. Before each call it samples a delay uniformly from
//! `[min_delay, max_delay]` and, if less than that has elapsed since the
//! previous call finished, waits for the remainder. Jitter keeps independent
//! nodes from falling into lock-step bursts.
//!
//! ```text
//!  call 1          call 2 (sampled delay 6.2s)
//!  ├──────┤ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ┤├──────┤
//!         ▲ end                 ▲ start = end + 6.2s
//!
//!  if 8s already passed:        no wait, call starts immediately
//! ```
//!
//! Each limiter owns its own `last_call` timestamp behind an async mutex that
//! is held for the wait, the call and the timestamp update. Concurrent callers
//! of the same limiter therefore queue behind each other, while different
//! limiters, and nodes without one, never wait on it. Waiting uses
//! `tokio::time::sleep`, so only the calling task is suspended.
//!
//! # Example
//!
//! ```rust,no_run
//! use stategraph_core::RateLimiter;
//! use std::sync::Arc;
//!
//! # async fn search(q: &str) -> String { q.to_string() }
//! # #[tokio::main]
//! # async fn main() -> stategraph_core::Result<()> {
//! let limiter = Arc::new(RateLimiter::from_secs(5.0, 7.0)?);
//!
//! let first = limiter.run(search("rust")).await;
//! let second = limiter.run(search("tokio")).await; // starts >= 5s after `first` returned
//! # Ok(())
//! # }
//! ```

use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::{GraphError, Result};
use crate::graph::{NodeFn, NodeFuture};
use crate::interrupt::NodeContext;

/// Randomized minimum-delay throttle for one node
#[derive(Debug)]
pub struct RateLimiter {
    min_delay: Duration,
    max_delay: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Create a limiter; `min_delay` must not exceed `max_delay`
    pub fn new(min_delay: Duration, max_delay: Duration) -> Result<Self> {
        if min_delay > max_delay {
            return Err(GraphError::Configuration(format!(
                "rate limit min_delay ({:?}) exceeds max_delay ({:?})",
                min_delay, max_delay
            )));
        }
        Ok(Self {
            min_delay,
            max_delay,
            last_call: Mutex::new(None),
        })
    }

    /// Create a limiter from delays in seconds
    pub fn from_secs(min_delay: f64, max_delay: f64) -> Result<Self> {
        let to_duration = |secs: f64, name: &str| {
            Duration::try_from_secs_f64(secs).map_err(|_| {
                GraphError::Configuration(format!(
                    "rate limit {} must be a finite, non-negative number of seconds, got {}",
                    name, secs
                ))
            })
        };
        Self::new(to_duration(min_delay, "min_delay")?, to_duration(max_delay, "max_delay")?)
    }

    pub fn min_delay(&self) -> Duration {
        self.min_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    fn sample_delay(&self) -> Duration {
        if self.min_delay == self.max_delay {
            self.min_delay
        } else {
            rand::thread_rng().gen_range(self.min_delay..=self.max_delay)
        }
    }

    /// Run `call` once the sampled delay since the previous call has elapsed
    pub async fn run<F>(&self, call: F) -> F::Output
    where
        F: Future,
    {
        self.run_with(|| call).await
    }

    /// Like [`run`](Self::run), but the call is only built once the wait is over
    pub async fn run_with<F, Fut>(&self, make_call: F) -> Fut::Output
    where
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        let mut last_call = self.last_call.lock().await;

        if let Some(previous) = *last_call {
            let delay = self.sample_delay();
            let elapsed = previous.elapsed();
            if elapsed < delay {
                let wait = delay - elapsed;
                tracing::info!(
                    wait_secs = wait.as_secs_f64(),
                    delay_secs = delay.as_secs_f64(),
                    "Rate limiting: waiting before next call"
                );
                tokio::time::sleep(wait).await;
            }
        }

        let output = make_call().await;
        *last_call = Some(Instant::now());
        output
    }

    /// Wrap a node function so every invocation goes through this limiter
    pub fn wrap(self: &Arc<Self>, node: NodeFn) -> NodeFn {
        let limiter = Arc::clone(self);
        Arc::new(move |ctx: NodeContext| -> NodeFuture {
            let limiter = Arc::clone(&limiter);
            let node = Arc::clone(&node);
            Box::pin(async move { limiter.run_with(move || node(ctx)).await })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node_result::NodeResult;
    use serde_json::json;

    #[test]
    fn test_rejects_inverted_or_invalid_bounds() {
        assert!(matches!(RateLimiter::from_secs(7.0, 5.0), Err(GraphError::Configuration(_))));
        assert!(matches!(RateLimiter::from_secs(-1.0, 5.0), Err(GraphError::Configuration(_))));
        assert!(matches!(RateLimiter::from_secs(1.0, f64::NAN), Err(GraphError::Configuration(_))));
        assert!(RateLimiter::from_secs(0.0, 0.0).is_ok());
    }

    #[test]
    fn test_sampled_delay_within_bounds() {
        let limiter = RateLimiter::from_secs(5.0, 7.0).unwrap();
        for _ in 0..100 {
            let delay = limiter.sample_delay();
            assert!(delay >= Duration::from_secs(5) && delay <= Duration::from_secs(7));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_back_to_back_calls_are_spaced() {
        let limiter = RateLimiter::from_secs(5.0, 7.0).unwrap();

        let first = limiter.run(async { Instant::now() }).await;
        let second = limiter.run(async { Instant::now() }).await;

        let gap = second - first;
        assert!(gap >= Duration::from_secs(5), "gap was {:?}", gap);
        assert!(gap <= Duration::from_secs(7), "gap was {:?}", gap);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_wait_when_enough_time_passed() {
        let limiter = RateLimiter::from_secs(5.0, 7.0).unwrap();
        limiter.run(async {}).await;

        tokio::time::sleep(Duration::from_secs(8)).await;
        let before = Instant::now();
        let started = limiter.run(async { Instant::now() }).await;
        assert_eq!(started, before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_limiters_are_independent() {
        let a = RateLimiter::from_secs(5.0, 7.0).unwrap();
        let b = RateLimiter::from_secs(5.0, 7.0).unwrap();
        a.run(async {}).await;

        let t0 = Instant::now();
        let (a_start, b_start) = tokio::join!(
            a.run(async { Instant::now() }),
            b.run(async { Instant::now() }),
        );
        assert_eq!(b_start, t0);
        assert!(a_start - t0 >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrap_node() {
        let limiter = Arc::new(RateLimiter::from_secs(2.0, 2.0).unwrap());
        let node: NodeFn = Arc::new(|ctx: NodeContext| -> NodeFuture {
            Box::pin(async move { Ok(NodeResult::Update(json!({"seen": ctx.step}))) })
        });
        let wrapped = limiter.wrap(node);

        let t0 = Instant::now();
        wrapped(NodeContext::new(json!({}), "search", "t", 1)).await.unwrap();
        let result = wrapped(NodeContext::new(json!({}), "search", "t", 2)).await.unwrap();

        assert_eq!(result, NodeResult::Update(json!({"seen": 2})));
        assert_eq!(Instant::now() - t0, Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrapped_node_is_not_invoked_before_wait() {
        let limiter = Arc::new(RateLimiter::from_secs(3.0, 3.0).unwrap());
        let invoked = Arc::new(std::sync::Mutex::new(Vec::new()));
        let node: NodeFn = {
            let invoked = Arc::clone(&invoked);
            Arc::new(move |_ctx: NodeContext| -> NodeFuture {
                // Runs when the node function is called, outside its future.
                invoked.lock().unwrap().push(Instant::now());
                Box::pin(async { Ok(NodeResult::Update(json!({}))) })
            })
        };
        let wrapped = limiter.wrap(node);

        let t0 = Instant::now();
        wrapped(NodeContext::new(json!({}), "search", "t", 1)).await.unwrap();
        let second = wrapped(NodeContext::new(json!({}), "search", "t", 2));
        assert_eq!(invoked.lock().unwrap().len(), 1);
        second.await.unwrap();

        let invoked = invoked.lock().unwrap().clone();
        assert_eq!(invoked, vec![t0, t0 + Duration::from_secs(3)]);
    }
}
