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

//! The seam between generated clients and the authentication library.
//!
//! This crate does not create, refresh, or interpret credentials. The
//! application configures a provider, and the [CallExecutor] asks the
//! provider for the authentication headers before each attempt. The headers
//! are forwarded unmodified to the transport.
//!
//! [CallExecutor]: crate::executor::CallExecutor

use crate::error::CredentialsError;
use http::HeaderMap;
use std::future::Future;
use std::sync::Arc;

/// The result type for credential providers.
pub type Result<T> = std::result::Result<T, CredentialsError>;

/// An opaque source of authentication headers.
///
/// Applications rarely implement this trait. The authentication library used
/// by the application provides an implementation, or the application wraps an
/// async function with [Credentials::from_fn].
///
/// Because the request is not sent when a provider fails, the retry loop
/// retries [transient][CredentialsError::is_transient] errors even for
/// non-idempotent methods.
pub trait CredentialsProvider: std::fmt::Debug {
    /// Asynchronously constructs the auth headers.
    ///
    /// The underlying implementation refreshes any tokens as needed.
    fn headers(&self) -> impl Future<Output = Result<HeaderMap>> + Send;
}

/// A cheap to clone handle to a [CredentialsProvider].
#[derive(Clone, Debug)]
pub struct Credentials {
    // Credentials are shared across threads and cloned into each executor.
    inner: Arc<dyn dynamic::CredentialsProvider>,
}

impl<T> std::convert::From<T> for Credentials
where
    T: CredentialsProvider + Send + Sync + 'static,
{
    fn from(value: T) -> Self {
        Self {
            inner: Arc::new(value),
        }
    }
}

impl Credentials {
    /// Creates credentials from an async function.
    ///
    /// # Example
    /// ```
    /// # use gax::credentials::Credentials;
    /// use http::{HeaderMap, HeaderValue};
    /// let credentials = Credentials::from_fn(|| async {
    ///     let mut headers = HeaderMap::new();
    ///     headers.insert("authorization", HeaderValue::from_static("Bearer test-only"));
    ///     Ok::<_, gax::error::CredentialsError>(headers)
    /// });
    /// # tokio_test::block_on(async {
    /// let headers = credentials.headers().await?;
    /// assert_eq!(headers.len(), 1);
    /// # Ok::<(), gax::error::CredentialsError>(()) });
    /// ```
    pub fn from_fn<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HeaderMap>> + Send + 'static,
    {
        Self::from(FnProvider(f))
    }

    /// Credentials that produce no headers.
    ///
    /// Useful in tests and with emulators.
    pub fn anonymous() -> Self {
        Self::from(Anonymous)
    }

    /// Returns the headers to send with the next attempt.
    pub async fn headers(&self) -> Result<HeaderMap> {
        self.inner.headers().await
    }
}

struct FnProvider<F>(F);

impl<F> std::fmt::Debug for FnProvider<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnProvider").finish_non_exhaustive()
    }
}

impl<F, Fut> CredentialsProvider for FnProvider<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<HeaderMap>> + Send,
{
    fn headers(&self) -> impl Future<Output = Result<HeaderMap>> + Send {
        (self.0)()
    }
}

#[derive(Debug)]
struct Anonymous;

impl CredentialsProvider for Anonymous {
    async fn headers(&self) -> Result<HeaderMap> {
        Ok(HeaderMap::new())
    }
}

pub mod dynamic {
    use super::{HeaderMap, Result};

    /// A dyn-compatible version of [super::CredentialsProvider].
    #[async_trait::async_trait]
    pub trait CredentialsProvider: Send + Sync + std::fmt::Debug {
        /// Asynchronously constructs the auth headers.
        async fn headers(&self) -> Result<HeaderMap>;
    }

    /// The public trait implements the dyn-compatible trait.
    #[async_trait::async_trait]
    impl<T> CredentialsProvider for T
    where
        T: super::CredentialsProvider + Send + Sync,
    {
        async fn headers(&self) -> Result<HeaderMap> {
            T::headers(self).await
        }
    }
}
