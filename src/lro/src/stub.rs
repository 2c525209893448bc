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

//! The seam between the poller and the operations service.
//!
//! Generated clients implement [OperationsStub] by routing each call through
//! a [CallExecutor][gax::executor::CallExecutor], so polls get the same
//! retry, timeout, and header handling as any other call. Tests implement
//! it with in-memory fakes.

use crate::Operation;
use gax::Result;
use gax::error::Error;
use gax::options::RequestOptions;
use std::future::Future;

/// The operations service used to poll, cancel, and delete operations.
///
/// Only `get_operation` is required. Services that do not support
/// cancellation or deletion may rely on the default implementations, which
/// return an error.
pub trait OperationsStub: std::fmt::Debug + Send + Sync {
    /// Fetches the latest state of the operation called `name`.
    fn get_operation(
        &self,
        name: &str,
        options: RequestOptions,
    ) -> impl Future<Output = Result<Operation>> + Send;

    /// Requests the cancellation of the operation called `name`.
    fn cancel_operation(
        &self,
        _name: &str,
        _options: RequestOptions,
    ) -> impl Future<Output = Result<()>> + Send {
        std::future::ready::<Result<()>>(Err(Error::other("cancel_operation is not supported")))
    }

    /// Deletes the operation called `name`.
    fn delete_operation(
        &self,
        _name: &str,
        _options: RequestOptions,
    ) -> impl Future<Output = Result<()>> + Send {
        std::future::ready::<Result<()>>(Err(Error::other("delete_operation is not supported")))
    }
}

pub mod dynamic {
    use super::{Operation, RequestOptions, Result};

    /// A dyn-compatible version of [super::OperationsStub].
    #[async_trait::async_trait]
    pub trait OperationsStub: std::fmt::Debug + Send + Sync {
        async fn get_operation(&self, name: &str, options: RequestOptions) -> Result<Operation>;
        async fn cancel_operation(&self, name: &str, options: RequestOptions) -> Result<()>;
        async fn delete_operation(&self, name: &str, options: RequestOptions) -> Result<()>;
    }

    /// All implementations of [super::OperationsStub] implement this trait.
    #[async_trait::async_trait]
    impl<T: super::OperationsStub> OperationsStub for T {
        async fn get_operation(&self, name: &str, options: RequestOptions) -> Result<Operation> {
            T::get_operation(self, name, options).await
        }

        async fn cancel_operation(&self, name: &str, options: RequestOptions) -> Result<()> {
            T::cancel_operation(self, name, options).await
        }

        async fn delete_operation(&self, name: &str, options: RequestOptions) -> Result<()> {
            T::delete_operation(self, name, options).await
        }
    }
}
