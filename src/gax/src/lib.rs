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

//! Generated API client helpers.
//!
//! This crate contains the policy layer shared by every generated client
//! method: static per-method call descriptors, the retry loop that wraps each
//! transport call, per-call option overrides, and the adapters that turn list
//! RPCs into lazy sequences of items.
//!
//! Generated code builds a [MethodDescriptor][descriptor::MethodDescriptor]
//! table once, when the client is constructed, and then routes every call
//! through a [CallExecutor][executor::CallExecutor].

/// An alias of [std::result::Result] where the error is always [crate::error::Error].
///
/// This is the result type used by all functions wrapping RPCs.
pub type Result<T> = std::result::Result<T, crate::error::Error>;

/// The core error types used by generated clients.
pub mod error;

/// Self-describing payloads, used by long-running operations and error
/// details.
pub mod any;

/// Define traits required of all messages.
pub mod message;

/// Implements helpers to create telemetry and routing headers.
pub mod api_header;

pub mod client_config;
pub mod credentials;
pub mod descriptor;
pub mod executor;
pub mod options;
pub mod paginator;
pub mod response;

pub mod backoff_policy;
pub mod exponential_backoff;
pub mod polling_backoff_policy;
pub mod polling_error_policy;
pub mod retry_policy;
pub mod retry_result;

#[doc(hidden)]
pub mod retry_loop_internal;

#[cfg(test)]
pub(crate) mod mock_rng;
