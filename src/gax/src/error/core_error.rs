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

use super::CredentialsError;
use super::rpc::Status;
use http::HeaderMap;
use std::error::Error as StdError;

type BoxError = Box<dyn StdError + Send + Sync>;

/// The core error returned by all generated client methods.
///
/// Generated methods report errors from multiple sources. For example, the
/// service may return an error, the transport may be unable to create the
/// necessary connection to make a request, a single attempt may time out, the
/// total time budget for the call may elapse while retrying, or a long-running
/// operation may complete with an error.
///
/// Most applications will just return the error or log it, without any further
/// action. However, some applications may need to interrogate the error
/// details. This type offers a series of predicates to determine the error
/// kind, and accessors to query the most common error details. Applications
/// can query the error [source][std::error::Error::source] for the root cause,
/// for example, the error reported by the last attempt in a retry loop.
///
/// # Example
/// ```
/// use gax::error::Error;
/// match example_function() {
///     Err(e) if matches!(e.status(), Some(_)) => {
///         println!("service error {e}, debug using {:?}", e.status().unwrap());
///     },
///     Err(e) if e.is_deadline_exceeded() => { println!("not enough time {e}"); },
///     Err(e) => { println!("some other error {e}"); },
///     Ok(_) => { println!("success, how boring"); },
/// }
///
/// fn example_function() -> Result<String, Error> {
///     // ... details omitted ...
///     # use gax::error::rpc::{Code, Status};
///     # Err(Error::service(Status::default().set_code(Code::NotFound).set_message("NOT FOUND")))
/// }
/// ```
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    source: Option<BoxError>,
}

impl Error {
    /// Creates an error with the status returned by the service.
    ///
    /// # Example
    /// ```
    /// use gax::error::Error;
    /// use gax::error::rpc::{Code, Status};
    /// let status = Status::default().set_code(Code::NotFound).set_message("NOT FOUND");
    /// let error = Error::service(status.clone());
    /// assert_eq!(error.status(), Some(&status));
    /// ```
    pub fn service(status: Status) -> Self {
        let details = ServiceDetails {
            status,
            headers: None,
        };
        Self {
            kind: ErrorKind::Service(Box::new(details)),
            source: None,
        }
    }

    /// Creates a service error including the response metadata.
    pub fn service_with_headers(status: Status, headers: HeaderMap) -> Self {
        let details = ServiceDetails {
            status,
            headers: Some(headers),
        };
        Self {
            kind: ErrorKind::Service(Box::new(details)),
            source: None,
        }
    }

    /// Creates an error representing a long-running operation that completed
    /// with an error.
    ///
    /// # Example
    /// ```
    /// use gax::error::Error;
    /// use gax::error::rpc::{Code, Status};
    /// let status = Status::default().set_code(Code::Aborted).set_message("job failed");
    /// let error = Error::operation(status.clone());
    /// assert!(error.is_operation_error());
    /// assert_eq!(error.status(), Some(&status));
    /// ```
    pub fn operation(status: Status) -> Self {
        Self {
            kind: ErrorKind::Operation(Box::new(status)),
            source: None,
        }
    }

    /// The long-running operation completed, and the service reports that it
    /// failed.
    ///
    /// The request to start the operation and all the polling requests
    /// succeeded. The service-supplied error detail is available via
    /// [status()][Error::status].
    pub fn is_operation_error(&self) -> bool {
        matches!(self.kind, ErrorKind::Operation(_))
    }

    /// Creates an error representing a timeout in a single attempt.
    ///
    /// # Example
    /// ```
    /// use std::error::Error as _;
    /// use gax::error::Error;
    /// let error = Error::timeout("simulated timeout");
    /// assert!(error.is_timeout());
    /// assert!(error.source().is_some());
    /// ```
    pub fn timeout<T: Into<BoxError>>(source: T) -> Self {
        Self {
            kind: ErrorKind::Timeout,
            source: Some(source.into()),
        }
    }

    /// A single attempt could not be completed before its timeout.
    ///
    /// This is always a client-side generated error. Note that the request may
    /// or may not have started, and it may or may not complete in the service.
    ///
    /// Retry loops usually treat this condition as a `DEADLINE_EXCEEDED`
    /// status. When the total time budget for the call elapses, the loop
    /// reports [is_deadline_exceeded][Error::is_deadline_exceeded] instead.
    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::Timeout)
    }

    /// Creates an error representing an elapsed time budget.
    ///
    /// The `source` is the error that triggered the last retry attempt, or a
    /// description of the budget when there was no such error.
    ///
    /// # Example
    /// ```
    /// use std::error::Error as _;
    /// use gax::error::Error;
    /// let error = Error::deadline_exceeded("retry budget is exhausted");
    /// assert!(error.is_deadline_exceeded());
    /// assert!(error.source().is_some());
    /// ```
    pub fn deadline_exceeded<T: Into<BoxError>>(source: T) -> Self {
        Self {
            kind: ErrorKind::DeadlineExceeded,
            source: Some(source.into()),
        }
    }

    /// The total time budget for the call, or for a polling loop, elapsed
    /// before the call succeeded.
    ///
    /// This is distinct from a timeout in a single attempt. The error
    /// [source][std::error::Error::source] contains the last error observed
    /// by the retry loop, if any.
    ///
    /// # Troubleshooting
    ///
    /// The most common cause of this problem is a transient problem that lasts
    /// longer than the time budget. If your application can tolerate longer
    /// recovery times then extend the `max_total_duration` for the method.
    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self.kind, ErrorKind::DeadlineExceeded)
    }

    /// Creates an error representing an exhausted policy.
    ///
    /// # Example
    /// ```
    /// use std::error::Error as _;
    /// use gax::error::Error;
    /// let error = Error::exhausted("too many retry attempts");
    /// assert!(error.is_exhausted());
    /// assert!(error.source().is_some());
    /// ```
    pub fn exhausted<T: Into<BoxError>>(source: T) -> Self {
        Self {
            kind: ErrorKind::Exhausted,
            source: Some(source.into()),
        }
    }

    /// The request could not complete before the retry policy stopped the
    /// retry loop, for reasons other than the time budget.
    ///
    /// This is always a client-side generated error, but it may be the result
    /// of multiple errors received from the service. The most common cause is
    /// a limit on the number of attempts.
    pub fn is_exhausted(&self) -> bool {
        matches!(self.kind, ErrorKind::Exhausted)
    }

    /// Creates an error representing a cancelled call.
    ///
    /// # Example
    /// ```
    /// use gax::error::Error;
    /// let error = Error::cancelled("the application is shutting down");
    /// assert!(error.is_cancelled());
    /// ```
    pub fn cancelled<T: Into<BoxError>>(source: T) -> Self {
        Self {
            kind: ErrorKind::Cancelled,
            source: Some(source.into()),
        }
    }

    /// The application cancelled the call, or the polling loop, before it
    /// completed.
    ///
    /// No further attempts or polls are made after the cancellation is
    /// observed.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }

    /// Creates an error representing a long-running operation payload of an
    /// unexpected type.
    pub fn unexpected_result_type<T: Into<BoxError>>(source: T) -> Self {
        Self {
            kind: ErrorKind::UnexpectedResultType,
            source: Some(source.into()),
        }
    }

    /// The payload of a long-running operation could not be unpacked into
    /// the expected type.
    ///
    /// The service completed the operation, but the response (or metadata)
    /// carries a different message type than the one expected by the
    /// application. This is not a transport error: the operation state is
    /// still available.
    pub fn is_unexpected_result_type(&self) -> bool {
        matches!(self.kind, ErrorKind::UnexpectedResultType)
    }

    /// Creates an error representing a deserialization problem.
    ///
    /// # Example
    /// ```
    /// use std::error::Error as _;
    /// use gax::error::Error;
    /// let error = Error::deser("simulated problem");
    /// assert!(error.is_deserialization());
    /// assert!(error.source().is_some());
    /// ```
    pub fn deser<T: Into<BoxError>>(source: T) -> Self {
        Self {
            kind: ErrorKind::Deserialization,
            source: Some(source.into()),
        }
    }

    /// The response could not be deserialized.
    ///
    /// This is always a client-side generated error. Note that the request may
    /// or may not have started, and it may or may not complete in the service.
    ///
    /// # Troubleshooting
    ///
    /// The most common cause for deserialization problems are bugs in the
    /// client library and (rarely) bugs in the service. Responses that
    /// violate the invariants of long-running operations (e.g. an operation
    /// that is not done, but includes a result) are also reported as
    /// deserialization errors.
    pub fn is_deserialization(&self) -> bool {
        matches!(self.kind, ErrorKind::Deserialization)
    }

    /// Creates an error representing a serialization problem.
    ///
    /// # Example
    /// ```
    /// use std::error::Error as _;
    /// use gax::error::Error;
    /// let error = Error::ser("simulated problem");
    /// assert!(error.is_serialization());
    /// assert!(error.source().is_some());
    /// ```
    pub fn ser<T: Into<BoxError>>(source: T) -> Self {
        Self {
            kind: ErrorKind::Serialization,
            source: Some(source.into()),
        }
    }

    /// The request could not be serialized.
    ///
    /// This is always a client-side generated error, generated before the
    /// request is made. This error is never transient: the serialization is
    /// deterministic, and will fail on future attempts with the same input
    /// data.
    pub fn is_serialization(&self) -> bool {
        matches!(self.kind, ErrorKind::Serialization)
    }

    /// The [Status] payload associated with this error.
    ///
    /// # Examples
    /// ```
    /// use gax::error::{Error, rpc::{Code, Status}};
    /// let error = Error::service(Status::default().set_code(Code::NotFound));
    /// if let Some(status) = error.status() {
    ///     if status.code == Code::NotFound {
    ///         println!("cannot find the thing, more details in {:?}", status.details);
    ///     }
    /// }
    /// ```
    ///
    /// Services return a detailed `Status` message including a numeric code
    /// for the error type, a human-readable message, and a sequence of
    /// details. Both service errors and long-running operations that
    /// completed with an error include a status. The status is reported
    /// unchanged, this crate never reinterprets the code.
    ///
    /// When a retry loop stops, because the policy is exhausted or the time
    /// budget runs out, the status is the one returned by the last attempt.
    pub fn status(&self) -> Option<&Status> {
        match &self.kind {
            ErrorKind::Service(d) => Some(&d.as_ref().status),
            ErrorKind::Operation(s) => Some(s.as_ref()),
            ErrorKind::DeadlineExceeded | ErrorKind::Exhausted => self.last_attempt_status(),
            _ => None,
        }
    }

    fn last_attempt_status(&self) -> Option<&Status> {
        let mut next = self
            .source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static));
        while let Some(e) = next {
            if let Some(last) = e.downcast_ref::<Error>() {
                return last.status();
            }
            next = e.source();
        }
        None
    }

    /// The headers, if any, associated with this error.
    ///
    /// Over gRPC these are called `metadata`, the client libraries normalize
    /// them to a [http::HeaderMap].
    pub fn http_headers(&self) -> Option<&http::HeaderMap> {
        match &self.kind {
            ErrorKind::Transport(d) => d.as_ref().headers.as_ref(),
            ErrorKind::Service(d) => d.as_ref().headers.as_ref(),
            _ => None,
        }
    }

    /// Cannot create the authentication headers.
    pub fn authentication(source: CredentialsError) -> Self {
        Self {
            kind: ErrorKind::Authentication,
            source: Some(source.into()),
        }
    }

    /// Could not create the authentication headers before sending the request.
    ///
    /// # Troubleshooting
    ///
    /// Typically this indicates a misconfigured authentication environment for
    /// your application. Very rarely, this may indicate a failure to contact
    /// the services used to create access tokens. Such failures are
    /// transient, and they are retried even for non-idempotent methods.
    pub fn is_authentication(&self) -> bool {
        matches!(self.kind, ErrorKind::Authentication)
    }

    /// A problem establishing a connection, detected before any part of the
    /// request was sent.
    ///
    /// # Example
    /// ```
    /// use gax::error::Error;
    /// let error = Error::connect("connection refused");
    /// assert!(error.is_connect());
    /// assert!(error.is_transport());
    /// ```
    pub fn connect<T: Into<BoxError>>(source: T) -> Self {
        let details = TransportDetails {
            headers: None,
            before_send: true,
        };
        Self {
            kind: ErrorKind::Transport(Box::new(details)),
            source: Some(source.into()),
        }
    }

    /// The transport could not establish a connection, and no part of the
    /// request was sent.
    ///
    /// These errors are safe to retry, even for non-idempotent methods.
    pub fn is_connect(&self) -> bool {
        matches!(&self.kind, ErrorKind::Transport(d) if d.before_send)
    }

    /// A problem in the transport layer without a full response.
    ///
    /// Examples include: a broken connection after the request is sent, or
    /// any error that did not include headers.
    pub fn io<T: Into<BoxError>>(source: T) -> Self {
        let details = TransportDetails {
            headers: None,
            before_send: false,
        };
        Self {
            kind: ErrorKind::Transport(Box::new(details)),
            source: Some(source.into()),
        }
    }

    /// A problem in the transport layer after the request was (maybe) sent,
    /// without a full response.
    ///
    /// # Troubleshooting
    ///
    /// This indicates a problem completing the request. This type of error is
    /// rare, but includes crashes and restarts on proxies and load balancers.
    ///
    /// These errors are only retried for idempotent methods, as the service
    /// may have received and processed the request.
    pub fn is_io(&self) -> bool {
        matches!(
            &self.kind,
            ErrorKind::Transport(d) if matches!(**d, TransportDetails {
                headers: None,
                before_send: false,
            })
        )
    }

    /// A problem reported by the transport layer, including response metadata.
    pub fn transport<T: Into<BoxError>>(headers: HeaderMap, source: T) -> Self {
        let details = TransportDetails {
            headers: Some(headers),
            before_send: false,
        };
        Self {
            kind: ErrorKind::Transport(Box::new(details)),
            source: Some(source.into()),
        }
    }

    /// A problem in the transport layer.
    ///
    /// Examples include errors in a proxy, load balancer, or other network
    /// element generated before the service is able to send a full response,
    /// and failures to establish a connection.
    pub fn is_transport(&self) -> bool {
        matches!(&self.kind, ErrorKind::Transport { .. })
    }

    /// An uncategorized error.
    pub fn other<T: Into<BoxError>>(source: T) -> Self {
        Self {
            kind: ErrorKind::Other,
            source: Some(source.into()),
        }
    }

    /// The error was generated before the RPC started and is transient.
    pub(crate) fn is_transient_and_before_rpc(&self) -> bool {
        if self.is_connect() {
            return true;
        }
        if !matches!(&self.kind, ErrorKind::Authentication) {
            return false;
        }
        self.source
            .as_ref()
            .and_then(|e| e.downcast_ref::<CredentialsError>())
            .map(|e| e.is_transient())
            .unwrap_or(false)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.kind, &self.source) {
            (ErrorKind::Serialization, Some(e)) => write!(f, "cannot serialize the request {e}"),
            (ErrorKind::Deserialization, Some(e)) => {
                write!(f, "cannot deserialize the response {e}")
            }
            (ErrorKind::Authentication, Some(e)) => {
                write!(f, "cannot create the authentication headers {e}")
            }
            (ErrorKind::Timeout, Some(e)) => {
                write!(f, "the attempt exceeded its timeout {e}")
            }
            (ErrorKind::DeadlineExceeded, Some(e)) => {
                write!(f, "the total time budget for the request elapsed, last error: {e}")
            }
            (ErrorKind::Exhausted, Some(e)) => {
                write!(f, "{e}")
            }
            (ErrorKind::Cancelled, Some(e)) => {
                write!(f, "the request was cancelled {e}")
            }
            (ErrorKind::UnexpectedResultType, Some(e)) => {
                write!(f, "unexpected operation result type {e}")
            }
            (ErrorKind::Transport(d), Some(e)) if d.before_send => {
                write!(f, "the transport cannot establish a connection: {e}")
            }
            (ErrorKind::Transport(_), Some(e)) => {
                write!(f, "the transport reports an error: {e}")
            }
            (ErrorKind::Service(d), _) => {
                write!(
                    f,
                    "the service reports an error with code {} described as: {}",
                    d.status.code, d.status.message
                )
            }
            (ErrorKind::Operation(s), _) => {
                write!(
                    f,
                    "the long-running operation completed with code {} described as: {}",
                    s.code, s.message
                )
            }
            (ErrorKind::Other, Some(e)) => {
                write!(f, "an unclassified problem making a request: {e}")
            }
            (_, None) => write!(f, "{:?}", self.kind),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error))
    }
}

/// The type of error held by an [Error] instance.
#[derive(Debug)]
enum ErrorKind {
    Serialization,
    Deserialization,
    Authentication,
    Timeout,
    DeadlineExceeded,
    Exhausted,
    Cancelled,
    UnexpectedResultType,
    Transport(Box<TransportDetails>),
    Service(Box<ServiceDetails>),
    Operation(Box<Status>),
    /// A uncategorized error.
    Other,
}

#[derive(Debug)]
struct TransportDetails {
    headers: Option<HeaderMap>,
    before_send: bool,
}

#[derive(Debug)]
struct ServiceDetails {
    headers: Option<HeaderMap>,
    status: Status,
}
