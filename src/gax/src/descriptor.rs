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

//! Static, per-method call metadata.
//!
//! Each generated method has a [MethodDescriptor]. The descriptor holds the
//! method name, its default timeout, the retry settings, and (for list and
//! long-running methods) the names of the fields used to drive pagination or
//! to unpack the operation result.
//!
//! Descriptors are built once, typically from a
//! [ServiceConfig][crate::client_config::ServiceConfig] table, and then shared
//! (via `Arc`) by all the calls to the method. They are never mutated.
//!
//! # Example
//! ```
//! # use gax::descriptor::*;
//! # use gax::error::rpc::Code;
//! use std::time::Duration;
//! let descriptor = MethodDescriptor::builder("library.v1.Library/GetBook")
//!     .with_timeout(Duration::from_secs(60))
//!     .with_idempotent(true)
//!     .with_retry(
//!         RetrySettings::default()
//!             .set_retry_codes([Code::Unavailable, Code::DeadlineExceeded])
//!             .set_initial_delay(Duration::from_millis(100))
//!             .set_max_delay(Duration::from_secs(60))
//!             .set_multiplier(1.3),
//!     )
//!     .build()?;
//! assert_eq!(descriptor.name(), "library.v1.Library/GetBook");
//! # Ok::<(), gax::client_config::ConfigError>(())
//! ```

use crate::client_config::ConfigError;
use crate::error::rpc::Code;
use crate::exponential_backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use crate::retry_policy::RetryCodes;
use std::collections::HashSet;
use std::time::Duration;

/// The retry configuration for a method.
///
/// The delay before attempt `N` (for `N >= 2`) is
/// `min(initial_delay * multiplier^(N-2), max_delay)`.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct RetrySettings {
    /// The status codes considered retryable.
    pub retry_codes: HashSet<Code>,
    /// The delay before the second attempt.
    pub initial_delay: Duration,
    /// The maximum delay between attempts.
    pub max_delay: Duration,
    /// The growth factor between consecutive delays.
    pub multiplier: f64,
    /// The budget for all the attempts and delays, if any.
    pub max_total_duration: Option<Duration>,
    /// If `true`, each delay is randomized in `[0, delay]`.
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            retry_codes: HashSet::new(),
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(60),
            multiplier: 1.3,
            max_total_duration: None,
            jitter: false,
        }
    }
}

impl RetrySettings {
    pub fn set_retry_codes<I: IntoIterator<Item = Code>>(mut self, v: I) -> Self {
        self.retry_codes = v.into_iter().collect();
        self
    }

    pub fn set_initial_delay<V: Into<Duration>>(mut self, v: V) -> Self {
        self.initial_delay = v.into();
        self
    }

    pub fn set_max_delay<V: Into<Duration>>(mut self, v: V) -> Self {
        self.max_delay = v.into();
        self
    }

    pub fn set_multiplier<V: Into<f64>>(mut self, v: V) -> Self {
        self.multiplier = v.into();
        self
    }

    pub fn set_max_total_duration<V: Into<Option<Duration>>>(mut self, v: V) -> Self {
        self.max_total_duration = v.into();
        self
    }

    pub fn set_jitter(mut self, v: bool) -> Self {
        self.jitter = v;
        self
    }

    fn backoff(&self) -> Result<ExponentialBackoff, crate::exponential_backoff::Error> {
        ExponentialBackoffBuilder::new()
            .with_initial_delay(self.initial_delay)
            .with_maximum_delay(self.max_delay)
            .with_scaling(self.multiplier)
            .with_full_jitter(self.jitter)
            .build()
    }
}

/// The field names used to paginate a list method.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub struct PageDescriptor {
    /// The request field with the maximum page size.
    pub request_page_size_field: String,
    /// The request field with the page token.
    pub request_page_token_field: String,
    /// The response field with the token for the next page.
    pub response_page_token_field: String,
    /// The response field with the items.
    pub response_items_field: String,
}

impl PageDescriptor {
    /// Creates a descriptor using the conventional `page_size`, `page_token`,
    /// and `next_page_token` fields.
    pub fn new<T: Into<String>>(items_field: T) -> Self {
        Self {
            request_page_size_field: "page_size".into(),
            request_page_token_field: "page_token".into(),
            response_page_token_field: "next_page_token".into(),
            response_items_field: items_field.into(),
        }
    }

    pub fn set_request_page_size_field<T: Into<String>>(mut self, v: T) -> Self {
        self.request_page_size_field = v.into();
        self
    }

    pub fn set_request_page_token_field<T: Into<String>>(mut self, v: T) -> Self {
        self.request_page_token_field = v.into();
        self
    }

    pub fn set_response_page_token_field<T: Into<String>>(mut self, v: T) -> Self {
        self.response_page_token_field = v.into();
        self
    }
}

/// The expected result types of a long-running method.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub struct OperationDescriptor {
    /// The type URL of the operation response.
    pub response_type: String,
    /// The type URL of the operation metadata.
    pub metadata_type: String,
}

impl OperationDescriptor {
    pub fn new<R: Into<String>, M: Into<String>>(response_type: R, metadata_type: M) -> Self {
        Self {
            response_type: response_type.into(),
            metadata_type: metadata_type.into(),
        }
    }
}

/// Immutable metadata for a single method.
#[derive(Clone, Debug)]
pub struct MethodDescriptor {
    name: String,
    timeout: Option<Duration>,
    retry: RetrySettings,
    idempotent: bool,
    backoff: ExponentialBackoff,
    page: Option<PageDescriptor>,
    operation: Option<OperationDescriptor>,
}

impl MethodDescriptor {
    /// Starts building a descriptor for the method `name`.
    pub fn builder<T: Into<String>>(name: T) -> MethodDescriptorBuilder {
        MethodDescriptorBuilder {
            name: name.into(),
            timeout: None,
            retry: RetrySettings::default(),
            idempotent: None,
            page: None,
            operation: None,
        }
    }

    /// The method identifier.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The default per-attempt timeout.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn retry_settings(&self) -> &RetrySettings {
        &self.retry
    }

    /// If `true`, the method is safe to retry after the request is sent.
    pub fn idempotent(&self) -> bool {
        self.idempotent
    }

    pub fn page(&self) -> Option<&PageDescriptor> {
        self.page.as_ref()
    }

    pub fn operation(&self) -> Option<&OperationDescriptor> {
        self.operation.as_ref()
    }

    /// The default retry policy, retrying the configured codes.
    pub fn retry_policy(&self) -> RetryCodes {
        RetryCodes::new(self.retry.retry_codes.iter().copied())
    }

    /// The default backoff policy.
    pub fn backoff_policy(&self) -> ExponentialBackoff {
        self.backoff.clone()
    }
}

/// Builds a [MethodDescriptor], validating the retry settings.
#[derive(Clone, Debug)]
pub struct MethodDescriptorBuilder {
    name: String,
    timeout: Option<Duration>,
    retry: RetrySettings,
    idempotent: Option<bool>,
    page: Option<PageDescriptor>,
    operation: Option<OperationDescriptor>,
}

impl MethodDescriptorBuilder {
    pub fn with_timeout<V: Into<Duration>>(mut self, v: V) -> Self {
        self.timeout = Some(v.into());
        self
    }

    pub fn with_retry(mut self, v: RetrySettings) -> Self {
        self.retry = v;
        self
    }

    /// Sets the idempotency.
    ///
    /// If not set, methods with retryable codes are idempotent.
    pub fn with_idempotent(mut self, v: bool) -> Self {
        self.idempotent = Some(v);
        self
    }

    pub fn with_page(mut self, v: PageDescriptor) -> Self {
        self.page = Some(v);
        self
    }

    pub fn with_operation(mut self, v: OperationDescriptor) -> Self {
        self.operation = Some(v);
        self
    }

    pub fn build(self) -> Result<MethodDescriptor, ConfigError> {
        let backoff = self
            .retry
            .backoff()
            .map_err(|source| ConfigError::InvalidBackoff {
                method: self.name.clone(),
                source,
            })?;
        let idempotent = self
            .idempotent
            .unwrap_or(!self.retry.retry_codes.is_empty());
        Ok(MethodDescriptor {
            name: self.name,
            timeout: self.timeout,
            retry: self.retry,
            idempotent,
            backoff,
            page: self.page,
            operation: self.operation,
        })
    }
}
