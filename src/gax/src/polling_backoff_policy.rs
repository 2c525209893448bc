// Copyright 2025 Google LLC
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

//! Defines the trait for polling backoff policies.
//!
//! Long-running operations are polled until completion. The poller waits
//! between polls to avoid overloading the service. These policies are not
//! retry backoff policies: polling delays never use jitter.
//!
//! The default polling backoff starts at 10 seconds, grows by a factor of 1.3
//! and is capped at 5 minutes, see [default_lro_backoff].
//!
//! # Example
//! ```
//! # use gax::exponential_backoff::Error;
//! # use gax::exponential_backoff::ExponentialBackoffBuilder;
//! use std::time::Duration;
//!
//! let policy = ExponentialBackoffBuilder::new()
//!     .with_initial_delay(Duration::from_millis(100))
//!     .with_maximum_delay(Duration::from_secs(5))
//!     .with_scaling(4.0)
//!     .build()?;
//! // `policy` implements the `PollingBackoffPolicy` trait.
//! # Ok::<(), Error>(())
//! ```

use crate::exponential_backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use std::sync::Arc;
use std::time::Duration;

/// Defines the trait implemented by all polling backoff strategies.
pub trait PollingBackoffPolicy: Send + Sync + std::fmt::Debug {
    /// Returns the delay before the next poll.
    ///
    /// # Parameters
    /// * `loop_start` - when the polling loop started.
    /// * `attempt_count` - the number of poll queries. This method is always
    ///   called after the first attempt.
    fn wait_period(&self, loop_start: std::time::Instant, attempt_count: u32) -> Duration;
}

/// A helper type to use [PollingBackoffPolicy] in client and request options.
#[derive(Clone, Debug)]
pub struct PollingBackoffPolicyArg(pub(crate) Arc<dyn PollingBackoffPolicy>);

impl<T: PollingBackoffPolicy + 'static> std::convert::From<T> for PollingBackoffPolicyArg {
    fn from(value: T) -> Self {
        Self(Arc::new(value))
    }
}

impl std::convert::From<Arc<dyn PollingBackoffPolicy>> for PollingBackoffPolicyArg {
    fn from(value: Arc<dyn PollingBackoffPolicy>) -> Self {
        Self(value)
    }
}

impl From<PollingBackoffPolicyArg> for Arc<dyn PollingBackoffPolicy> {
    fn from(value: PollingBackoffPolicyArg) -> Arc<dyn PollingBackoffPolicy> {
        value.0
    }
}

pub(crate) const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(10);
pub(crate) const DEFAULT_MULTIPLIER: f64 = 1.3;
pub(crate) const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(300);

/// The default polling backoff for long-running operations.
///
/// # Example
/// ```
/// # use gax::polling_backoff_policy::*;
/// use std::time::{Duration, Instant};
/// let policy = default_lro_backoff();
/// assert_eq!(policy.wait_period(Instant::now(), 1), Duration::from_secs(10));
/// assert_eq!(policy.wait_period(Instant::now(), 2), Duration::from_secs(13));
/// ```
pub fn default_lro_backoff() -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_initial_delay(DEFAULT_INITIAL_DELAY)
        .with_maximum_delay(DEFAULT_MAX_DELAY)
        .with_scaling(DEFAULT_MULTIPLIER)
        .clamp()
}
