//! Restart-on-failure supervision for channel sources.
//!
//! Each source runs on its own task. When it returns an error or panics, the
//! supervisor waits out a backoff delay and starts a fresh instance built by
//! the factory it was given. Only that source's state is reset; the bus and
//! the distributor are untouched.

use std::{future::Future, time::Duration};

use rand::Rng;
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Delay between restarts.
///
/// Attempt `n` waits `first × factor^n`, clamped to `max`. With `jitter`
/// set, the delay is drawn from the upper half of that value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    pub first: Duration,
    pub max: Duration,
    pub factor: f64,
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            first: Duration::from_millis(100),
            max: Duration::from_secs(10),
            factor: 2.0,
            jitter: false,
        }
    }
}

impl BackoffPolicy {
    /// Delay before restart number `attempt` (0-indexed).
    pub fn next(&self, attempt: u32) -> Duration {
        let exp = attempt.min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);
        let base = if !secs.is_finite() || secs < 0.0 || secs > self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        };
        if !self.jitter {
            return base;
        }
        let ms = base.as_millis() as u64;
        let half = ms / 2;
        let extra = if half == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=half)
        };
        Duration::from_millis(ms - half + extra)
    }
}

/// Keep the task produced by `make` running until `token` is cancelled.
///
/// A run that ends with `Ok` is final; errors and panics trigger a restart
/// after the backoff delay. The attempt count starts over once a run has
/// outlived `backoff.max`.
pub async fn supervise<F, Fut, E>(
    name: String,
    backoff: BackoffPolicy,
    token: CancellationToken,
    mut make: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let mut attempt: u32 = 0;
    loop {
        if token.is_cancelled() {
            break;
        }
        let started = time::Instant::now();
        let mut handle = tokio::spawn(make());
        let res = select! {
            res = &mut handle => res,
            _ = token.cancelled() => {
                handle.abort();
                break;
            }
        };
        match res {
            Ok(Ok(())) => {
                info!(task = %name, "finished");
                break;
            }
            Ok(Err(e)) => warn!(task = %name, "failed: {e}"),
            Err(e) if e.is_panic() => error!(task = %name, "panicked"),
            Err(_) => break,
        }

        if started.elapsed() > backoff.max {
            attempt = 0;
        }
        let delay = backoff.next(attempt);
        attempt = attempt.saturating_add(1);
        info!(task = %name, attempt, ?delay, "restarting");

        select! {
            _ = time::sleep(delay) => {}
            _ = token.cancelled() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    };
    use tokio::time::timeout;

    fn quick() -> BackoffPolicy {
        BackoffPolicy {
            first: Duration::from_millis(1),
            max: Duration::from_millis(5),
            factor: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn exponential_growth_clamped_to_max() {
        let p = BackoffPolicy {
            first: Duration::from_millis(100),
            max: Duration::from_secs(1),
            factor: 2.0,
            jitter: false,
        };
        assert_eq!(p.next(0), Duration::from_millis(100));
        assert_eq!(p.next(1), Duration::from_millis(200));
        assert_eq!(p.next(3), Duration::from_millis(800));
        assert_eq!(p.next(4), Duration::from_secs(1));
        assert_eq!(p.next(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn jitter_stays_in_upper_half() {
        let p = BackoffPolicy {
            first: Duration::from_millis(1000),
            max: Duration::from_secs(30),
            factor: 1.0,
            jitter: true,
        };
        for attempt in 0..50 {
            let d = p.next(attempt);
            assert!(d >= Duration::from_millis(500) && d <= Duration::from_millis(1000));
        }
    }

    #[tokio::test]
    async fn failing_task_is_restarted() {
        let runs = Arc::new(AtomicU32::new(0));
        let counter = runs.clone();
        let token = CancellationToken::new();
        let sup = supervise("flaky".into(), quick(), token, move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 3 {
                    Err("boom")
                } else {
                    Ok(())
                }
            }
        });
        timeout(Duration::from_secs(2), sup).await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn panicking_task_is_restarted() {
        let runs = Arc::new(AtomicU32::new(0));
        let counter = runs.clone();
        let token = CancellationToken::new();
        let sup = supervise("panicky".into(), quick(), token, move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    panic!("source crashed");
                }
                Ok::<(), String>(())
            }
        });
        timeout(Duration::from_secs(2), sup).await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cancellation_stops_running_task() {
        let token = CancellationToken::new();
        let sup = tokio::spawn(supervise(
            "forever".into(),
            quick(),
            token.clone(),
            || async {
                std::future::pending::<()>().await;
                Ok::<(), String>(())
            },
        ));
        time::sleep(Duration::from_millis(10)).await;
        token.cancel();
        timeout(Duration::from_secs(1), sup).await.unwrap().unwrap();
    }
}
