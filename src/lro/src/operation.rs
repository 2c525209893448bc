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

use gax::Result;
use gax::any::{Any, AnyError};
use gax::error::Error;
use gax::error::rpc::Status;
use gax::message::Message;
use serde::{Deserialize, Serialize};

/// The envelope returned by methods that start a long-running operation.
///
/// An operation that is not done has neither a response nor an error. An
/// operation that is done has exactly one of them. Envelopes received from a
/// service that break this rule are rejected when they are deserialized.
///
/// # Example
/// ```
/// # use lro::Operation;
/// let operation = Operation::from_json(serde_json::json!({
///     "name": "operations/123",
///     "done": true,
///     "error": {"code": 5, "message": "the shelf is gone"}
/// }))?;
/// assert!(operation.done());
/// assert_eq!(operation.error().map(|s| s.message.as_str()), Some("the shelf is gone"));
/// # gax::Result::<()>::Ok(())
/// ```
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(try_from = "OperationRepr", into = "OperationRepr")]
pub struct Operation {
    name: String,
    done: bool,
    metadata: Option<Any>,
    result: Option<OperationResult>,
}

/// The final state of a completed operation.
#[derive(Clone, Debug, PartialEq)]
pub enum OperationResult {
    Response(Any),
    Error(Status),
}

impl Operation {
    /// Creates a pending operation.
    pub fn new<T: Into<String>>(name: T) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Parses an operation envelope received from a service.
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value).map_err(Error::deser)
    }

    pub fn set_metadata(mut self, v: Any) -> Self {
        self.metadata = Some(v);
        self
    }

    /// Completes the operation with a response.
    pub fn set_response(mut self, v: Any) -> Self {
        self.done = true;
        self.result = Some(OperationResult::Response(v));
        self
    }

    /// Completes the operation with an error.
    pub fn set_error(mut self, v: Status) -> Self {
        self.done = true;
        self.result = Some(OperationResult::Error(v));
        self
    }

    /// The server-assigned name, used to poll the operation.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn done(&self) -> bool {
        self.done
    }

    pub fn metadata(&self) -> Option<&Any> {
        self.metadata.as_ref()
    }

    pub fn result(&self) -> Option<&OperationResult> {
        self.result.as_ref()
    }

    pub fn response(&self) -> Option<&Any> {
        match &self.result {
            Some(OperationResult::Response(any)) => Some(any),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&Status> {
        match &self.result {
            Some(OperationResult::Error(status)) => Some(status),
            _ => None,
        }
    }
}

/// Extracts a message, distinguishing type mismatches from malformed payloads.
pub(crate) fn unpack<T: Message>(any: &Any) -> Result<T> {
    any.to_msg::<T>().map_err(|e| match e {
        e @ AnyError::TypeMismatch { .. } => Error::unexpected_result_type(e),
        e => Error::deser(e),
    })
}

/// An envelope that breaks the operation invariants.
#[derive(Debug, thiserror::Error, PartialEq)]
#[non_exhaustive]
pub enum InvalidOperation {
    #[error("operation `{0}` is not done, but it has a response or an error")]
    ResultWhilePending(String),
    #[error("operation `{0}` is done, but it has neither a response nor an error")]
    MissingResult(String),
    #[error("operation `{0}` has both a response and an error")]
    ConflictingResult(String),
}

#[derive(Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
struct OperationRepr {
    #[serde(skip_serializing_if = "String::is_empty")]
    name: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    done: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<Any>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response: Option<Any>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<Status>,
}

impl TryFrom<OperationRepr> for Operation {
    type Error = InvalidOperation;

    fn try_from(value: OperationRepr) -> std::result::Result<Self, Self::Error> {
        let result = match (value.done, value.response, value.error) {
            (_, Some(_), Some(_)) => return Err(InvalidOperation::ConflictingResult(value.name)),
            (false, None, None) => None,
            (false, _, _) => return Err(InvalidOperation::ResultWhilePending(value.name)),
            (true, None, None) => return Err(InvalidOperation::MissingResult(value.name)),
            (true, Some(r), None) => Some(OperationResult::Response(r)),
            (true, None, Some(e)) => Some(OperationResult::Error(e)),
        };
        Ok(Self {
            name: value.name,
            done: value.done,
            metadata: value.metadata,
            result,
        })
    }
}

impl From<Operation> for OperationRepr {
    fn from(value: Operation) -> Self {
        let (response, error) = match value.result {
            None => (None, None),
            Some(OperationResult::Response(r)) => (Some(r), None),
            Some(OperationResult::Error(e)) => (None, Some(e)),
        };
        Self {
            name: value.name,
            done: value.done,
            metadata: value.metadata,
            response,
            error,
        }
    }
}
