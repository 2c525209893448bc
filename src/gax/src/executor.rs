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

//! Executes a single call of a generated method.
//!
//! The [CallExecutor] combines the static [MethodDescriptor], the client
//! configuration, and the per-call [RequestOptions] to decide how to retry
//! the call, how long to wait between attempts, and how long each attempt and
//! the full call may take. The transport is a closure, supplied by the
//! generated code, that performs exactly one attempt.
//!
//! Settings are resolved in this order: per-call options, client
//! configuration, method descriptor.

use crate::Result;
use crate::api_header::{X_GOOG_API_CLIENT, X_GOOG_REQUEST_PARAMS, XGoogApiClient, request_params};
use crate::backoff_policy::BackoffPolicy;
use crate::client_config::ClientConfig;
use crate::descriptor::MethodDescriptor;
use crate::error::Error;
use crate::options::RequestOptions;
use crate::response::Response;
use crate::retry_loop_internal::{effective_timeout, retry_loop};
use crate::retry_policy::{RetryCodes, RetryPolicy};
use http::{HeaderMap, HeaderValue};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

/// The inputs for a single attempt, passed to the transport closure.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct AttemptContext {
    /// The method name, from the descriptor.
    pub method: String,
    /// The attempt number, starting at 1.
    pub attempt_count: u32,
    /// The time the transport may spend on this attempt, if limited.
    ///
    /// The executor enforces this timeout. Transports may also forward it to
    /// the service, e.g., as a `grpc-timeout` header.
    pub timeout: Option<Duration>,
    /// The headers to send: telemetry, routing, metadata, and the
    /// authentication headers.
    pub headers: HeaderMap,
}

/// Runs calls for one method.
///
/// Executors are stateless. They are cheap to clone, and may be shared by
/// concurrent calls.
#[derive(Clone, Debug)]
pub struct CallExecutor {
    descriptor: Arc<MethodDescriptor>,
    config: Arc<ClientConfig>,
    api_client: Option<HeaderValue>,
    tracing: bool,
}

impl CallExecutor {
    pub fn new(descriptor: Arc<MethodDescriptor>, config: Arc<ClientConfig>) -> Self {
        let tracing = config.tracing_enabled();
        Self {
            descriptor,
            config,
            api_client: None,
            tracing,
        }
    }

    /// Sends the `x-goog-api-client` header with each attempt.
    pub fn with_api_client(mut self, v: &XGoogApiClient) -> Self {
        self.api_client = HeaderValue::from_str(&v.header_value()).ok();
        self
    }

    pub fn descriptor(&self) -> &MethodDescriptor {
        &self.descriptor
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Runs the call, returning the decoded response body.
    ///
    /// The `transport` closure performs one attempt. It receives a copy of
    /// the request and the [AttemptContext].
    ///
    /// # Example
    /// ```
    /// # use gax::client_config::ClientConfig;
    /// # use gax::descriptor::MethodDescriptor;
    /// # use gax::executor::CallExecutor;
    /// # use gax::options::RequestOptions;
    /// # use gax::response::Response;
    /// # use std::sync::Arc;
    /// # tokio_test::block_on(async {
    /// let descriptor = Arc::new(MethodDescriptor::builder("test.v1.Echo/Echo").build()?);
    /// let executor = CallExecutor::new(descriptor, Arc::new(ClientConfig::new()));
    /// let response = executor
    ///     .execute("hello".to_string(), RequestOptions::default(), |request: String, _ctx| async move {
    ///         Ok::<_, gax::error::Error>(Response::from(request.len()))
    ///     })
    ///     .await?;
    /// assert_eq!(response, 5);
    /// # Ok::<(), anyhow::Error>(()) });
    /// ```
    pub async fn execute<Req, Resp, F, Fut>(
        &self,
        request: Req,
        options: RequestOptions,
        transport: F,
    ) -> Result<Resp>
    where
        Req: Clone + Send + Sync,
        F: Fn(Req, AttemptContext) -> Fut + Send + Sync,
        Fut: Future<Output = Result<Response<Resp>>> + Send,
    {
        self.execute_with_callback(request, options, transport, |_| {})
            .await
    }

    /// Runs the call, invoking `on_response` with the full response before
    /// returning the body.
    ///
    /// The callback receives the response headers and the body, it runs at
    /// most once, and only if the call succeeds.
    pub async fn execute_with_callback<Req, Resp, F, Fut, C>(
        &self,
        request: Req,
        options: RequestOptions,
        transport: F,
        on_response: C,
    ) -> Result<Resp>
    where
        Req: Clone + Send + Sync,
        F: Fn(Req, AttemptContext) -> Fut + Send + Sync,
        Fut: Future<Output = Result<Response<Resp>>> + Send,
        C: FnOnce(&Response<Resp>),
    {
        let response = self.execute_response(request, options, transport).await?;
        on_response(&response);
        Ok(response.into_body())
    }

    /// Runs the call, returning the full response.
    pub async fn execute_response<Req, Resp, F, Fut>(
        &self,
        request: Req,
        options: RequestOptions,
        transport: F,
    ) -> Result<Response<Resp>>
    where
        Req: Clone + Send + Sync,
        F: Fn(Req, AttemptContext) -> Fut + Send + Sync,
        Fut: Future<Output = Result<Response<Resp>>> + Send,
    {
        let span = if self.tracing {
            tracing::info_span!("gapic_call", method = %self.descriptor.name())
        } else {
            tracing::Span::none()
        };
        let call = self.retry_call(&request, &options, &transport);
        let call = async {
            match options.cancellation_token() {
                None => call.await,
                Some(token) => tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(Error::cancelled("the call was cancelled")),
                    r = call => r,
                },
            }
        };
        call.instrument(span).await
    }

    async fn retry_call<Req, Resp, F, Fut>(
        &self,
        request: &Req,
        options: &RequestOptions,
        transport: &F,
    ) -> Result<Response<Resp>>
    where
        Req: Clone + Send + Sync,
        F: Fn(Req, AttemptContext) -> Fut + Send + Sync,
        Fut: Future<Output = Result<Response<Resp>>> + Send,
    {
        let idempotent = options
            .idempotent()
            .unwrap_or(self.descriptor.idempotent());
        let retry_policy = self.get_retry_policy(options);
        let backoff_policy = self.get_backoff_policy(options);
        let attempt_timeout = options.attempt_timeout().or(self.descriptor.timeout());
        let total_budget = options
            .max_total_duration()
            .or(self.descriptor.retry_settings().max_total_duration);
        let headers = self.make_headers(options)?;
        let credentials = self.config.credentials();
        let method = self.descriptor.name();

        let mut attempt_count = 0_u32;
        let inner = async |remaining_time: Option<Duration>| -> Result<Response<Resp>> {
            attempt_count += 1;
            let timeout = effective_timeout(attempt_timeout, remaining_time);
            let mut headers = headers.clone();
            if let Some(c) = credentials {
                let auth_headers = c.headers().await.map_err(Error::authentication)?;
                headers.extend(auth_headers);
            }
            let context = AttemptContext {
                method: method.to_string(),
                attempt_count,
                timeout,
                headers,
            };
            let attempt = transport(request.clone(), context);
            match timeout {
                None => attempt.await,
                Some(t) => match tokio::time::timeout(t, attempt).await {
                    Ok(r) => r,
                    Err(e) => Err(Error::timeout(e)),
                },
            }
        };
        let sleep = async |d| tokio::time::sleep(d).await;
        retry_loop(
            inner,
            sleep,
            idempotent,
            retry_policy,
            backoff_policy,
            total_budget,
        )
        .await
    }

    fn get_retry_policy(&self, options: &RequestOptions) -> Arc<dyn RetryPolicy> {
        options
            .retry_policy()
            .clone()
            .or_else(|| {
                options
                    .retry_codes()
                    .as_ref()
                    .map(|c| Arc::new(RetryCodes::new(c.iter().copied())) as Arc<dyn RetryPolicy>)
            })
            .or_else(|| self.config.retry_policy.clone())
            .unwrap_or_else(|| Arc::new(self.descriptor.retry_policy()))
    }

    fn get_backoff_policy(&self, options: &RequestOptions) -> Arc<dyn BackoffPolicy> {
        options
            .backoff_policy()
            .clone()
            .or_else(|| self.config.backoff_policy.clone())
            .unwrap_or_else(|| Arc::new(self.descriptor.backoff_policy()))
    }

    fn make_headers(&self, options: &RequestOptions) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(v) = &self.api_client {
            headers.insert(X_GOOG_API_CLIENT, v.clone());
        }
        let user_agent = options
            .user_agent()
            .as_deref()
            .or(self.config.user_agent());
        if let Some(ua) = user_agent {
            headers.insert(
                http::header::USER_AGENT,
                HeaderValue::from_str(ua).map_err(Error::other)?,
            );
        }
        headers.extend(self.config.metadata().clone());
        headers.extend(options.metadata().clone());
        if let Some(v) = request_params(options.routing_params()) {
            headers.insert(X_GOOG_REQUEST_PARAMS, v);
        }
        Ok(headers)
    }
}
