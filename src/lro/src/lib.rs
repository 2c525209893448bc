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

//! Types and functions to make long-running operations easier to use.
//!
//! Some methods start an operation that runs for a long time on the service.
//! These methods return an [Operation] envelope right away. Wrap the envelope
//! in a [Poller] to query its progress, wait for its completion, or cancel
//! it.
//!
//! # Example
//! ```
//! # use lro::{Operation, Poller};
//! # use lro::stub::OperationsStub;
//! # use gax::any::Any;
//! # use gax::message::Empty;
//! # use gax::options::RequestOptions;
//! # use std::sync::Arc;
//! #[derive(Debug)]
//! struct AlwaysDone;
//! impl OperationsStub for AlwaysDone {
//!     async fn get_operation(&self, name: &str, _: RequestOptions) -> gax::Result<Operation> {
//!         let response = Any::from_msg(&Empty::default()).map_err(gax::error::Error::deser)?;
//!         Ok(Operation::new(name).set_response(response))
//!     }
//! }
//!
//! # tokio_test::block_on(async {
//! let mut poller = Poller::<Empty, Empty>::new(Operation::new("operations/123"), Arc::new(AlwaysDone));
//! assert!(poller.results().is_none());
//! poller.poll_once().await?;
//! let response = poller.results().transpose()?;
//! assert_eq!(response, Some(Empty::default()));
//! # gax::Result::<()>::Ok(()) });
//! ```

mod operation;
pub use operation::{InvalidOperation, Operation, OperationResult};

mod poller;
pub use poller::{DEFAULT_TOTAL_TIMEOUT, Poller, PollingResult};

pub mod stub;
