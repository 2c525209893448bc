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

//! Per request options.
//!
//! Each generated method has a static [MethodDescriptor] with its default
//! timeout, retry codes, and backoff parameters. Applications may need to
//! customize the behavior of some calls: change the timeout for a specific
//! call, change the retry configuration, add metadata, or cancel the call.
//! The `*Builder` returned by each client method implements the
//! [RequestOptionsBuilder] trait where applications can override these
//! defaults.
//!
//! Options set here take precedence over the client configuration, which in
//! turn takes precedence over the method descriptor.
//!
//! [MethodDescriptor]: crate::descriptor::MethodDescriptor

use crate::backoff_policy::{BackoffPolicy, BackoffPolicyArg};
use crate::error::rpc::Code;
use crate::polling_backoff_policy::{PollingBackoffPolicy, PollingBackoffPolicyArg};
use crate::polling_error_policy::{PollingErrorPolicy, PollingErrorPolicyArg};
use crate::retry_policy::{RetryPolicy, RetryPolicyArg};
use http::HeaderMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A set of options configuring a single request.
///
/// Application only use this class directly in mocks, where they may want to
/// verify their application has configured all the right request parameters and
/// options.
///
/// All other code uses this type indirectly, via the per-request builders.
#[derive(Clone, Debug, Default)]
pub struct RequestOptions {
    idempotent: Option<bool>,
    user_agent: Option<String>,
    attempt_timeout: Option<Duration>,
    retry_codes: Option<HashSet<Code>>,
    retry_policy: Option<Arc<dyn RetryPolicy>>,
    backoff_policy: Option<Arc<dyn BackoffPolicy>>,
    max_total_duration: Option<Duration>,
    metadata: HeaderMap,
    routing_params: Vec<(String, String)>,
    cancellation_token: Option<CancellationToken>,
    polling_error_policy: Option<Arc<dyn PollingErrorPolicy>>,
    polling_backoff_policy: Option<Arc<dyn PollingBackoffPolicy>>,
}

impl RequestOptions {
    /// Gets the idempotency
    pub fn idempotent(&self) -> Option<bool> {
        self.idempotent
    }

    /// Treat the method as idempotent.
    ///
    /// Retry policies examine the idempotency and the error details to decide
    /// if the error is retryable. [Idempotent] methods are safe to retry
    /// under more error conditions than non-idempotent methods.
    ///
    /// The method descriptor provides a default.
    ///
    /// [idempotent]: https://en.wikipedia.org/wiki/Idempotence
    pub fn set_idempotency(&mut self, value: bool) {
        self.idempotent = Some(value);
    }

    /// Set the idempotency unless it is already set.
    pub(crate) fn set_default_idempotency(&mut self, default: bool) {
        self.idempotent.get_or_insert(default);
    }

    /// Prepends this prefix to the user agent header value.
    pub fn set_user_agent<T: Into<String>>(&mut self, v: T) {
        self.user_agent = Some(v.into());
    }

    /// Gets the current user-agent prefix
    pub fn user_agent(&self) -> &Option<String> {
        &self.user_agent
    }

    /// Sets the per-attempt timeout.
    ///
    /// This overrides the `timeout` in the method descriptor. Each attempt in
    /// the retry loop is limited by this timeout and by the time remaining in
    /// the total budget.
    pub fn set_attempt_timeout<T: Into<Duration>>(&mut self, v: T) {
        self.attempt_timeout = Some(v.into());
    }

    /// Gets the current per-attempt timeout.
    pub fn attempt_timeout(&self) -> &Option<Duration> {
        &self.attempt_timeout
    }

    /// Overrides the set of retryable status codes.
    ///
    /// This has no effect if a retry policy is also set.
    pub fn set_retry_codes<I: IntoIterator<Item = Code>>(&mut self, v: I) {
        self.retry_codes = Some(v.into_iter().collect());
    }

    /// Gets the retry codes override, if any.
    pub fn retry_codes(&self) -> &Option<HashSet<Code>> {
        &self.retry_codes
    }

    /// Get the current retry policy override, if any.
    pub fn retry_policy(&self) -> &Option<Arc<dyn RetryPolicy>> {
        &self.retry_policy
    }

    /// Sets the retry policy configuration.
    pub fn set_retry_policy<V: Into<RetryPolicyArg>>(&mut self, v: V) {
        self.retry_policy = Some(v.into().into());
    }

    /// Get the current backoff policy override, if any.
    pub fn backoff_policy(&self) -> &Option<Arc<dyn BackoffPolicy>> {
        &self.backoff_policy
    }

    /// Sets the backoff policy configuration.
    pub fn set_backoff_policy<V: Into<BackoffPolicyArg>>(&mut self, v: V) {
        self.backoff_policy = Some(v.into().into());
    }

    /// Sets the total time budget for the call, including all retry attempts
    /// and backoff delays.
    pub fn set_max_total_duration<T: Into<Duration>>(&mut self, v: T) {
        self.max_total_duration = Some(v.into());
    }

    /// Gets the total time budget override, if any.
    pub fn max_total_duration(&self) -> &Option<Duration> {
        &self.max_total_duration
    }

    /// Sets additional metadata (headers) sent with each attempt.
    pub fn set_metadata(&mut self, v: HeaderMap) {
        self.metadata = v;
    }

    /// Gets the additional metadata.
    pub fn metadata(&self) -> &HeaderMap {
        &self.metadata
    }

    /// Adds a routing parameter, sent in the `x-goog-request-params` header.
    pub fn add_routing_param<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) {
        self.routing_params.push((key.into(), value.into()));
    }

    /// Gets the routing parameters, in insertion order.
    pub fn routing_params(&self) -> &[(String, String)] {
        &self.routing_params
    }

    /// Sets a token to cancel the call.
    ///
    /// Cancelling the token stops the retry loop (or the polling loop)
    /// promptly, including during a backoff delay. The call returns an error
    /// where [is_cancelled][crate::error::Error::is_cancelled] is `true`.
    pub fn set_cancellation_token(&mut self, v: CancellationToken) {
        self.cancellation_token = Some(v);
    }

    /// Gets the cancellation token, if any.
    pub fn cancellation_token(&self) -> &Option<CancellationToken> {
        &self.cancellation_token
    }

    /// Get the current polling policy override, if any.
    pub fn polling_error_policy(&self) -> &Option<Arc<dyn PollingErrorPolicy>> {
        &self.polling_error_policy
    }

    /// Sets the polling policy configuration.
    pub fn set_polling_error_policy<V: Into<PollingErrorPolicyArg>>(&mut self, v: V) {
        self.polling_error_policy = Some(v.into().0);
    }

    /// Get the current polling backoff policy override, if any.
    pub fn polling_backoff_policy(&self) -> &Option<Arc<dyn PollingBackoffPolicy>> {
        &self.polling_backoff_policy
    }

    /// Sets the backoff policy configuration.
    pub fn set_polling_backoff_policy<V: Into<PollingBackoffPolicyArg>>(&mut self, v: V) {
        self.polling_backoff_policy = Some(v.into().0);
    }
}

/// Implementations of this trait provide setters to configure request options.
///
/// Generated clients provide a builder for each method. These builders can be
/// used to set the request fields, as well as any options affecting the
/// request, such as additional headers or timeouts.
pub trait RequestOptionsBuilder: internal::RequestBuilder {
    /// If `v` is `true`, treat the method as idempotent.
    fn with_idempotency(self, v: bool) -> Self;

    /// Set the user agent header.
    fn with_user_agent<V: Into<String>>(self, v: V) -> Self;

    /// Sets the per-attempt timeout.
    fn with_attempt_timeout<V: Into<Duration>>(self, v: V) -> Self;

    /// Sets the retryable status codes.
    fn with_retry_codes<I: IntoIterator<Item = Code>>(self, v: I) -> Self;

    /// Sets the retry policy configuration.
    fn with_retry_policy<V: Into<RetryPolicyArg>>(self, v: V) -> Self;

    /// Sets the backoff policy configuration.
    fn with_backoff_policy<V: Into<BackoffPolicyArg>>(self, v: V) -> Self;

    /// Sets the total time budget for the call.
    fn with_max_total_duration<V: Into<Duration>>(self, v: V) -> Self;

    /// Sets additional metadata.
    fn with_metadata(self, v: HeaderMap) -> Self;

    /// Sets the cancellation token.
    fn with_cancellation_token(self, v: CancellationToken) -> Self;

    /// Sets the polling error policy configuration.
    fn with_polling_error_policy<V: Into<PollingErrorPolicyArg>>(self, v: V) -> Self;

    /// Sets the polling backoff policy configuration.
    fn with_polling_backoff_policy<V: Into<PollingBackoffPolicyArg>>(self, v: V) -> Self;
}

#[doc(hidden)]
pub mod internal {
    //! This module contains implementation details. It is not part of the
    //! public API. Types and functions in this module may be changed or removed
    //! without warnings. Applications should not use any types contained
    //! within.
    use super::RequestOptions;

    /// Simplify implementation of the [super::RequestOptionsBuilder] trait in
    /// generated code.
    pub trait RequestBuilder {
        fn request_options(&mut self) -> &mut RequestOptions;
    }

    pub fn set_default_idempotency(mut options: RequestOptions, default: bool) -> RequestOptions {
        options.set_default_idempotency(default);
        options
    }
}

/// Implements the sealed [RequestOptionsBuilder] trait.
impl<T> RequestOptionsBuilder for T
where
    T: internal::RequestBuilder,
{
    fn with_idempotency(mut self, v: bool) -> Self {
        self.request_options().set_idempotency(v);
        self
    }

    fn with_user_agent<V: Into<String>>(mut self, v: V) -> Self {
        self.request_options().set_user_agent(v);
        self
    }

    fn with_attempt_timeout<V: Into<Duration>>(mut self, v: V) -> Self {
        self.request_options().set_attempt_timeout(v);
        self
    }

    fn with_retry_codes<I: IntoIterator<Item = Code>>(mut self, v: I) -> Self {
        self.request_options().set_retry_codes(v);
        self
    }

    fn with_retry_policy<V: Into<RetryPolicyArg>>(mut self, v: V) -> Self {
        self.request_options().set_retry_policy(v);
        self
    }

    fn with_backoff_policy<V: Into<BackoffPolicyArg>>(mut self, v: V) -> Self {
        self.request_options().set_backoff_policy(v);
        self
    }

    fn with_max_total_duration<V: Into<Duration>>(mut self, v: V) -> Self {
        self.request_options().set_max_total_duration(v);
        self
    }

    fn with_metadata(mut self, v: HeaderMap) -> Self {
        self.request_options().set_metadata(v);
        self
    }

    fn with_cancellation_token(mut self, v: CancellationToken) -> Self {
        self.request_options().set_cancellation_token(v);
        self
    }

    fn with_polling_error_policy<V: Into<PollingErrorPolicyArg>>(mut self, v: V) -> Self {
        self.request_options().set_polling_error_policy(v);
        self
    }

    fn with_polling_backoff_policy<V: Into<PollingBackoffPolicyArg>>(mut self, v: V) -> Self {
        self.request_options().set_polling_backoff_policy(v);
        self
    }
}
