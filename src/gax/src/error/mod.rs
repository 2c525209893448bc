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

mod core_error;
pub use core_error::*;
mod credentials;
pub use credentials::CredentialsError;

/// Errors and error details returned by Service RPCs.
///
/// The client libraries distinguish between errors detected while trying to
/// send a RPC (e.g. cannot open a connection), errors trying to receive a
/// response (e.g. the connection is dropped before the full response), and
/// errors returned by the service itself.
///
/// The types in this module represent the status reported by the service.
///
/// # Examples
///
/// ```
/// use gax::error::Error;
/// use gax::error::rpc::Code;
/// fn handle_error(e: Error) {
///     match e.status() {
///         Some(status) if status.code == Code::NotFound => println!("missing: {}", status.message),
///         Some(status) => println!("the service reported {status:?}"),
///         None => println!("not a service error: {e}"),
///     }
/// }
/// ```
pub mod rpc;
