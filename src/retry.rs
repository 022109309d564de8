//! Declarative retry for leaf actions.
//!
//! A [`RetryPolicy`] describes how often and how patiently to retry; a
//! [`RetryHandler`] turns the policy into an on-error hook that re-invokes
//! the failed leaf body with exponential backoff and uniform jitter. The
//! handler recovers the context on success and leaves the final failure in
//! place otherwise, so the normal error path reports it.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::context::{ExecutionContext, Invocation};
use crate::hooks::{Hook, HookError};
use crate::runtime::{Clock, TokioClock};

/// Retry configuration. `backoff` multiplies the delay after each failed
/// attempt and must be at least 1; `jitter` widens each sleep by a uniform
/// offset in `[-jitter, +jitter]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub enabled: bool,
    pub max_retries: u32,
    pub delay: Duration,
    pub backoff: f64,
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            max_retries: 3,
            delay: Duration::from_secs(1),
            backoff: 2.0,
            jitter: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration, backoff: f64, jitter: Duration) -> Self {
        Self {
            enabled: false,
            max_retries,
            delay,
            backoff: backoff.max(1.0),
            jitter,
        }
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Whether the policy will actually perform retries.
    pub fn is_active(&self) -> bool {
        self.enabled && self.max_retries > 0
    }
}

/// On-error hook that retries the failed leaf body per a shared policy.
#[derive(Clone)]
pub struct RetryHandler {
    policy: Arc<RwLock<RetryPolicy>>,
    clock: Arc<dyn Clock>,
}

impl RetryHandler {
    pub fn new(policy: Arc<RwLock<RetryPolicy>>) -> Self {
        Self {
            policy,
            clock: Arc::new(TokioClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Wrap the handler as a [`Hook`] for the on-error slot.
    pub fn into_hook(self) -> Hook {
        Arc::new(
            move |ctx: &mut ExecutionContext| -> futures::future::BoxFuture<'_, Result<(), HookError>> {
                let handler = self.clone();
                Box::pin(async move { handler.retry_on_error(ctx).await })
            },
        )
    }

    async fn retry_on_error(&self, ctx: &mut ExecutionContext) -> Result<(), HookError> {
        let name = ctx.name.clone();
        let Some(target) = ctx.retry_target.clone() else {
            warn!(action = %name, "no retry target on context; cannot retry");
            return Ok(());
        };
        if !target.retryable {
            warn!(action = %name, "action is not retryable");
            return Ok(());
        }
        let policy = self
            .policy
            .read()
            .expect("retry policy lock poisoned")
            .clone();
        if !policy.enabled {
            warn!(action = %name, "retry policy is disabled");
            return Ok(());
        }

        let mut attempt = 0u32;
        let mut delay = policy.delay;
        let mut last_error = ctx.error.clone();

        while attempt < policy.max_retries {
            attempt += 1;
            let sleep_for = jittered(delay, policy.jitter);
            info!(
                action = %name,
                attempt,
                max = policy.max_retries,
                delay_s = sleep_for.as_secs_f64(),
                error = %last_error.as_ref().map(ToString::to_string).unwrap_or_default(),
                "retrying",
            );
            self.clock.sleep(sleep_for).await;

            let invocation = Invocation {
                args: ctx.args.clone(),
                kwargs: ctx.kwargs.clone(),
            };
            match (target.body)(invocation).await {
                Ok(result) => {
                    ctx.result = Some(result);
                    ctx.error = None;
                    info!(action = %name, attempt, "retry succeeded");
                    return Ok(());
                }
                Err(retry_error) => {
                    warn!(action = %name, attempt, error = %retry_error, "retry attempt failed");
                    last_error = Some(retry_error);
                    delay = delay.mul_f64(policy.backoff);
                }
            }
        }

        ctx.error = last_error;
        error!(action = %name, retries = policy.max_retries, "all retries failed");
        Ok(())
    }
}

fn jittered(delay: Duration, jitter: Duration) -> Duration {
    if jitter.is_zero() {
        return delay;
    }
    let spread = jitter.as_secs_f64();
    let offset = rand::thread_rng().gen_range(-spread..=spread);
    let total = delay.as_secs_f64() + offset;
    debug!(base_s = delay.as_secs_f64(), offset_s = offset, "applying retry jitter");
    Duration::from_secs_f64(total.max(0.0))
}
