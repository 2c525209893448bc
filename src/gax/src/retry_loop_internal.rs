// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use super::Result;
use super::backoff_policy::BackoffPolicy;
use super::error::Error;
use super::retry_policy::RetryPolicy;
use super::retry_result::RetryResult;
use std::sync::Arc;
use std::time::Duration;

enum RetryLoopAttempt {
    // The first attempt
    Initial,
    // (Attempt count, backoff delay, previous error)
    Retry(u32, Duration, Error),
}

impl RetryLoopAttempt {
    fn count(&self) -> u32 {
        match self {
            RetryLoopAttempt::Initial => 0,
            RetryLoopAttempt::Retry(count, _, _) => *count,
        }
    }
}

/// Runs the retry loop for a given function.
///
/// This functions calls an inner function as long as (1) the retry policy
/// allows more attempts, (2) the inner function has not returned a successful
/// request, and (3) the total time budget, if any, has time for another
/// attempt.
///
/// In between calls the function waits the amount of time prescribed by the
/// backoff policy, using `sleep` to implement any sleep.
pub async fn retry_loop<F, S, Response>(
    inner: F,
    sleep: S,
    idempotent: bool,
    retry_policy: Arc<dyn RetryPolicy>,
    backoff_policy: Arc<dyn BackoffPolicy>,
    total_budget: Option<Duration>,
) -> Result<Response>
where
    F: AsyncFnMut(Option<Duration>) -> Result<Response> + Send,
    S: AsyncFn(Duration) -> () + Send,
{
    retry_loop_with_callback(
        inner,
        sleep,
        idempotent,
        retry_policy,
        backoff_policy,
        total_budget,
        |_, _, _| {},
    )
    .await
}

/// Runs the retry loop for a given function with a callback for retries.
///
/// The `on_retry` callback is called before sleeping, with the attempt count,
/// the error, and the delay.
///
/// The inner function receives the time remaining in the loop, the smaller of
/// the retry policy remaining time and the remaining total budget. Callers
/// combine this value with the per-attempt timeout, see [effective_timeout].
///
/// When there is not enough time left to sleep and make another attempt, the
/// loop stops with an error where [Error::is_deadline_exceeded] is `true`. The
/// source of that error is the error from the last attempt.
pub async fn retry_loop_with_callback<F, S, OnRetry, Response>(
    mut inner: F,
    sleep: S,
    idempotent: bool,
    retry_policy: Arc<dyn RetryPolicy>,
    backoff_policy: Arc<dyn BackoffPolicy>,
    total_budget: Option<Duration>,
    mut on_retry: OnRetry,
) -> Result<Response>
where
    F: AsyncFnMut(Option<Duration>) -> Result<Response> + Send,
    S: AsyncFn(Duration) -> () + Send,
    OnRetry: FnMut(u32, &Error, Duration) + Send,
{
    let start = tokio::time::Instant::now();
    let loop_start = start.into_std();
    let budget_left = || total_budget.map(|b| b.saturating_sub(start.elapsed()));
    let mut attempt_state = RetryLoopAttempt::Initial;
    loop {
        let mut attempt_count = attempt_state.count();
        let policy_remaining = retry_policy.remaining_time(loop_start, attempt_count);
        let remaining_time = min_remaining(policy_remaining, budget_left());

        if let RetryLoopAttempt::Retry(attempt_count, delay, prev_error) = attempt_state {
            if remaining_time.is_some_and(|remaining| remaining <= delay) {
                tracing::warn!(
                    attempt_count,
                    ?delay,
                    "not enough time left for another attempt: {prev_error}"
                );
                return Err(Error::deadline_exceeded(prev_error));
            }
            tracing::debug!(attempt_count, ?delay, "retrying after error: {prev_error}");
            on_retry(attempt_count, &prev_error, delay);
            sleep(delay).await;
        }
        attempt_count += 1;
        // The budget is re-evaluated after the backoff sleep.
        let remaining_time = min_remaining(policy_remaining, budget_left());
        match inner(remaining_time).await {
            Ok(r) => return Ok(r),
            Err(e) if e.is_timeout() && budget_left().is_some_and(|b| b.is_zero()) => {
                tracing::warn!(attempt_count, "total time budget exhausted: {e}");
                return Err(Error::deadline_exceeded(e));
            }
            Err(e) => {
                let flow = retry_policy.on_error(loop_start, attempt_count, idempotent, e);
                match flow {
                    RetryResult::Permanent(e) => return Err(e),
                    RetryResult::Exhausted(e) => {
                        tracing::warn!(attempt_count, "retry policy stopped the loop: {e}");
                        return Err(e);
                    }
                    RetryResult::Continue(e) => {
                        let delay = backoff_policy.on_failure(loop_start, attempt_count);
                        attempt_state = RetryLoopAttempt::Retry(attempt_count, delay, e);
                        continue;
                    }
                }
            }
        };
    }
}

fn min_remaining(a: Option<Duration>, b: Option<Duration>) -> Option<Duration> {
    match (a, b) {
        (None, None) => None,
        (Some(t), None) | (None, Some(t)) => Some(t),
        (Some(a), Some(b)) => Some(std::cmp::min(a, b)),
    }
}

/// A helper to compute the time remaining in a retry loop, given the attempt
/// timeout and the overall timeout.
pub fn effective_timeout(
    attempt_timeout: Option<Duration>,
    remaining_time: Option<Duration>,
) -> Option<Duration> {
    min_remaining(attempt_timeout, remaining_time)
}
