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

//! Configuration tables and client-wide overrides.
//!
//! A [ServiceConfig] holds the [MethodDescriptor] for every method in a
//! service. Generated clients build it once, when the client is created, and
//! thread it through the constructors of each method stub. There is no global
//! registry.
//!
//! A [ClientConfig] holds the overrides an application configures for a
//! client: credentials, retry and polling policies, extra metadata, and the
//! user agent. These override the method descriptor defaults, and are
//! themselves overridden by the per-call [RequestOptions].
//!
//! [RequestOptions]: crate::options::RequestOptions

use crate::backoff_policy::{BackoffPolicy, BackoffPolicyArg};
use crate::credentials::Credentials;
use crate::descriptor::{MethodDescriptor, OperationDescriptor, PageDescriptor, RetrySettings};
use crate::error::rpc::Code;
use crate::polling_backoff_policy::{PollingBackoffPolicy, PollingBackoffPolicyArg};
use crate::polling_error_policy::{PollingErrorPolicy, PollingErrorPolicyArg};
use crate::retry_policy::{RetryPolicy, RetryPolicyArg};
use http::HeaderMap;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// The default timeout for methods without an explicit timeout in the legacy
/// configuration format.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Problems loading a configuration table.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("cannot parse the configuration table: {0}")]
    Parse(#[source] serde_json::Error),
    #[error("service {0} is not present in the configuration table")]
    MissingService(String),
    #[error("method {method} references unknown {kind} {name}")]
    MissingReference {
        method: String,
        kind: &'static str,
        name: String,
    },
    #[error("unknown status code {0}")]
    UnknownCode(String),
    #[error("invalid value for {field} in method {method}: {value}")]
    InvalidDuration {
        method: String,
        field: &'static str,
        value: f64,
    },
    #[error("invalid backoff settings for method {method}: {source}")]
    InvalidBackoff {
        method: String,
        #[source]
        source: crate::exponential_backoff::Error,
    },
}

/// The descriptors for all the methods in a service.
///
/// # Example
/// ```
/// # use gax::client_config::ServiceConfig;
/// let config = ServiceConfig::from_json(r#"{
///     "library.v1.Library/GetBook": {
///         "timeout": 60.0,
///         "retry_codes": ["UNAVAILABLE", "DEADLINE_EXCEEDED"],
///         "initial_delay": 0.1,
///         "max_delay": 60.0,
///         "multiplier": 1.3,
///         "max_total_duration": 600.0
///     }
/// }"#)?;
/// let method = config.method("library.v1.Library/GetBook").expect("method is present");
/// assert!(method.idempotent());
/// # Ok::<(), gax::client_config::ConfigError>(())
/// ```
#[derive(Clone, Debug, Default)]
pub struct ServiceConfig {
    methods: HashMap<String, Arc<MethodDescriptor>>,
}

impl ServiceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) a method descriptor.
    pub fn with_method(mut self, descriptor: MethodDescriptor) -> Self {
        self.methods
            .insert(descriptor.name().to_string(), Arc::new(descriptor));
        self
    }

    /// Returns the descriptor for `name`, if present.
    pub fn method(&self, name: &str) -> Option<Arc<MethodDescriptor>> {
        self.methods.get(name).cloned()
    }

    /// The names of all the methods in the table.
    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    /// Loads a table keyed by method name.
    ///
    /// Durations are expressed in seconds. All fields are optional.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let table = serde_json::from_str::<HashMap<String, MethodEntry>>(json)
            .map_err(ConfigError::Parse)?;
        table
            .into_iter()
            .try_fold(Self::new(), |config, (name, entry)| {
                Ok(config.with_method(entry.into_descriptor(name)?))
            })
    }

    /// Loads a table in the legacy `client_config` format.
    ///
    /// The `overrides` are merged, field by field, on top of the `defaults`.
    /// Methods without a `timeout_millis` use the `initial_rpc_timeout_millis`
    /// of their retry params, or [DEFAULT_TIMEOUT] if that is also missing.
    /// Each attempt gets the same timeout, `rpc_timeout_multiplier` and
    /// `max_rpc_timeout_millis` are accepted and ignored. Methods whose retry
    /// codes set is empty are not idempotent.
    ///
    /// # Example
    /// ```
    /// # use gax::client_config::ServiceConfig;
    /// # use gax::descriptor::PageDescriptor;
    /// use serde_json::json;
    /// let defaults = json!({"interfaces": {"library.v1.Library": {
    ///     "retry_codes": {"idempotent": ["UNAVAILABLE"], "non_idempotent": []},
    ///     "retry_params": {"default": {
    ///         "initial_retry_delay_millis": 100,
    ///         "retry_delay_multiplier": 1.3,
    ///         "max_retry_delay_millis": 60000,
    ///         "total_timeout_millis": 600000
    ///     }},
    ///     "methods": {
    ///         "ListBooks": {"timeout_millis": 60000, "retry_codes_name": "idempotent", "retry_params_name": "default"},
    ///         "CreateBook": {"retry_codes_name": "non_idempotent", "retry_params_name": "default"}
    ///     }
    /// }}});
    /// let config = ServiceConfig::from_client_config(
    ///     "library.v1.Library",
    ///     defaults,
    ///     json!({}),
    ///     [("ListBooks", PageDescriptor::new("books"))],
    /// )?;
    /// let create = config.method("CreateBook").expect("method is present");
    /// assert!(!create.idempotent());
    /// # Ok::<(), gax::client_config::ConfigError>(())
    /// ```
    pub fn from_client_config<I, K>(
        service: &str,
        mut defaults: serde_json::Value,
        overrides: serde_json::Value,
        pages: I,
    ) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, PageDescriptor)>,
        K: Into<String>,
    {
        merge(&mut defaults, overrides);
        let mut legacy =
            serde_json::from_value::<LegacyConfig>(defaults).map_err(ConfigError::Parse)?;
        let interface = legacy
            .interfaces
            .remove(service)
            .ok_or_else(|| ConfigError::MissingService(service.to_string()))?;
        let mut pages = pages
            .into_iter()
            .map(|(k, v)| (k.into(), v))
            .collect::<HashMap<String, _>>();

        let mut config = Self::new();
        for (name, method) in interface.methods {
            let codes = match &method.retry_codes_name {
                None => Vec::new(),
                Some(n) => interface
                    .retry_codes
                    .get(n)
                    .ok_or_else(|| ConfigError::MissingReference {
                        method: name.clone(),
                        kind: "retry codes",
                        name: n.clone(),
                    })?
                    .iter()
                    .map(|c| parse_code(c))
                    .collect::<Result<Vec<_>, _>>()?,
            };
            let params = match &method.retry_params_name {
                None => None,
                Some(n) => Some(interface.retry_params.get(n).ok_or_else(|| {
                    ConfigError::MissingReference {
                        method: name.clone(),
                        kind: "retry params",
                        name: n.clone(),
                    }
                })?),
            };
            let mut retry = RetrySettings::default().set_retry_codes(codes);
            if let Some(p) = params {
                retry = p.apply(&name, retry)?;
            }
            let initial_rpc_timeout = params.and_then(|p| p.initial_rpc_timeout_millis);
            let timeout = match (method.timeout_millis, initial_rpc_timeout) {
                (Some(ms), _) => millis(&name, "timeout_millis", ms)?,
                (None, Some(ms)) => millis(&name, "initial_rpc_timeout_millis", ms)?,
                (None, None) => DEFAULT_TIMEOUT,
            };
            let mut builder = MethodDescriptor::builder(&name)
                .with_timeout(timeout)
                .with_retry(retry);
            if let Some(page) = pages.remove(&name) {
                builder = builder.with_page(page);
            }
            config = config.with_method(builder.build()?);
        }
        Ok(config)
    }
}

fn parse_code(name: &str) -> Result<Code, ConfigError> {
    Code::try_from(name).map_err(|_| ConfigError::UnknownCode(name.to_string()))
}

fn seconds(method: &str, field: &'static str, value: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(value).map_err(|_| ConfigError::InvalidDuration {
        method: method.to_string(),
        field,
        value,
    })
}

fn millis(method: &str, field: &'static str, value: f64) -> Result<Duration, ConfigError> {
    seconds(method, field, value / 1000.0)
}

/// Recursively merges `overrides` into `base`. Objects are merged key by key,
/// any other value replaces the base value.
fn merge(base: &mut serde_json::Value, overrides: serde_json::Value) {
    use serde_json::Value;
    match (base, overrides) {
        (Value::Object(base), Value::Object(overrides)) => {
            for (k, v) in overrides {
                match base.get_mut(&k) {
                    Some(b) => merge(b, v),
                    None => {
                        base.insert(k, v);
                    }
                }
            }
        }
        (base, overrides) => *base = overrides,
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MethodEntry {
    timeout: Option<f64>,
    retry_codes: Vec<String>,
    initial_delay: Option<f64>,
    max_delay: Option<f64>,
    multiplier: Option<f64>,
    max_total_duration: Option<f64>,
    jitter: bool,
    idempotent: Option<bool>,
    page: Option<PageEntry>,
    operation: Option<OperationEntry>,
}

impl MethodEntry {
    fn into_descriptor(self, name: String) -> Result<MethodDescriptor, ConfigError> {
        let codes = self
            .retry_codes
            .iter()
            .map(|c| parse_code(c))
            .collect::<Result<Vec<_>, _>>()?;
        let mut retry = RetrySettings::default()
            .set_retry_codes(codes)
            .set_jitter(self.jitter);
        if let Some(v) = self.initial_delay {
            retry = retry.set_initial_delay(seconds(&name, "initial_delay", v)?);
        }
        if let Some(v) = self.max_delay {
            retry = retry.set_max_delay(seconds(&name, "max_delay", v)?);
        }
        if let Some(v) = self.multiplier {
            retry = retry.set_multiplier(v);
        }
        if let Some(v) = self.max_total_duration {
            retry = retry.set_max_total_duration(seconds(&name, "max_total_duration", v)?);
        }
        let mut builder = MethodDescriptor::builder(&name).with_retry(retry);
        if let Some(v) = self.timeout {
            builder = builder.with_timeout(seconds(&name, "timeout", v)?);
        }
        if let Some(v) = self.idempotent {
            builder = builder.with_idempotent(v);
        }
        if let Some(p) = self.page {
            builder = builder.with_page(p.into());
        }
        if let Some(o) = self.operation {
            builder = builder.with_operation(OperationDescriptor::new(
                o.response_type,
                o.metadata_type,
            ));
        }
        builder.build()
    }
}

#[derive(Debug, Deserialize)]
struct PageEntry {
    items_field: String,
    page_size_field: Option<String>,
    page_token_field: Option<String>,
    next_page_token_field: Option<String>,
}

impl From<PageEntry> for PageDescriptor {
    fn from(value: PageEntry) -> Self {
        let mut page = PageDescriptor::new(value.items_field);
        if let Some(v) = value.page_size_field {
            page = page.set_request_page_size_field(v);
        }
        if let Some(v) = value.page_token_field {
            page = page.set_request_page_token_field(v);
        }
        if let Some(v) = value.next_page_token_field {
            page = page.set_response_page_token_field(v);
        }
        page
    }
}

#[derive(Debug, Deserialize)]
struct OperationEntry {
    response_type: String,
    metadata_type: String,
}

#[derive(Debug, Deserialize)]
struct LegacyConfig {
    interfaces: HashMap<String, LegacyInterface>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LegacyInterface {
    retry_codes: HashMap<String, Vec<String>>,
    retry_params: HashMap<String, LegacyRetryParams>,
    methods: HashMap<String, LegacyMethod>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LegacyRetryParams {
    initial_retry_delay_millis: Option<f64>,
    retry_delay_multiplier: Option<f64>,
    max_retry_delay_millis: Option<f64>,
    total_timeout_millis: Option<f64>,
    initial_rpc_timeout_millis: Option<f64>,
}

impl LegacyRetryParams {
    fn apply(&self, method: &str, retry: RetrySettings) -> Result<RetrySettings, ConfigError> {
        let mut retry = retry;
        if let Some(v) = self.initial_retry_delay_millis {
            retry = retry.set_initial_delay(millis(method, "initial_retry_delay_millis", v)?);
        }
        if let Some(v) = self.retry_delay_multiplier {
            retry = retry.set_multiplier(v);
        }
        if let Some(v) = self.max_retry_delay_millis {
            retry = retry.set_max_delay(millis(method, "max_retry_delay_millis", v)?);
        }
        if let Some(v) = self.total_timeout_millis {
            retry = retry.set_max_total_duration(millis(method, "total_timeout_millis", v)?);
        }
        Ok(retry)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LegacyMethod {
    timeout_millis: Option<f64>,
    retry_codes_name: Option<String>,
    retry_params_name: Option<String>,
}

/// Configure a client.
///
/// A client represents a connection to a Google Cloud Service. Each service
/// has one or more client types. The default configuration for each client
/// should work for most applications. But some applications may need to
/// override the authentication credentials, the retry policies, and/or other
/// behaviors of the client.
#[derive(Clone, Debug, Default)]
pub struct ClientConfig {
    pub(crate) credentials: Option<Credentials>,
    pub(crate) tracing: bool,
    pub(crate) user_agent: Option<String>,
    pub(crate) metadata: HeaderMap,
    pub(crate) retry_policy: Option<Arc<dyn RetryPolicy>>,
    pub(crate) backoff_policy: Option<Arc<dyn BackoffPolicy>>,
    pub(crate) polling_error_policy: Option<Arc<dyn PollingErrorPolicy>>,
    pub(crate) polling_backoff_policy: Option<Arc<dyn PollingBackoffPolicy>>,
}

const LOGGING_VAR: &str = "GAPIC_LOGGING";

impl ClientConfig {
    /// Returns a default [ClientConfig].
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tracing_enabled(&self) -> bool {
        if self.tracing {
            return true;
        }
        std::env::var(LOGGING_VAR)
            .map(|v| v == "true")
            .unwrap_or(false)
    }

    /// Enables tracing.
    pub fn enable_tracing(mut self) -> Self {
        self.tracing = true;
        self
    }

    /// Disables tracing.
    pub fn disable_tracing(mut self) -> Self {
        self.tracing = false;
        self
    }

    /// Configure the authentication credentials.
    pub fn set_credentials<T: Into<Option<Credentials>>>(mut self, v: T) -> Self {
        self.credentials = v.into();
        self
    }

    /// Prepends this prefix to the user agent header value.
    pub fn set_user_agent<T: Into<String>>(mut self, v: T) -> Self {
        self.user_agent = Some(v.into());
        self
    }

    /// Metadata sent with every call made by the client.
    pub fn set_metadata(mut self, v: HeaderMap) -> Self {
        self.metadata = v;
        self
    }

    /// Configure the retry policy.
    pub fn set_retry_policy<V: Into<RetryPolicyArg>>(mut self, v: V) -> Self {
        self.retry_policy = Some(v.into().into());
        self
    }

    /// Configure the retry backoff policy.
    pub fn set_backoff_policy<V: Into<BackoffPolicyArg>>(mut self, v: V) -> Self {
        self.backoff_policy = Some(v.into().into());
        self
    }

    /// Configure the polling error policy.
    pub fn set_polling_error_policy<V: Into<PollingErrorPolicyArg>>(mut self, v: V) -> Self {
        self.polling_error_policy = Some(v.into().into());
        self
    }

    /// Configure the polling backoff policy.
    pub fn set_polling_backoff_policy<V: Into<PollingBackoffPolicyArg>>(mut self, v: V) -> Self {
        self.polling_backoff_policy = Some(v.into().into());
        self
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    pub fn metadata(&self) -> &HeaderMap {
        &self.metadata
    }

    pub fn polling_error_policy(&self) -> Option<&Arc<dyn PollingErrorPolicy>> {
        self.polling_error_policy.as_ref()
    }

    pub fn polling_backoff_policy(&self) -> Option<&Arc<dyn PollingBackoffPolicy>> {
        self.polling_backoff_policy.as_ref()
    }
}
