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

use crate::operation::{OperationResult, unpack};
use crate::stub::dynamic::OperationsStub;
use crate::Operation;
use gax::Result;
use gax::client_config::ClientConfig;
use gax::descriptor::MethodDescriptor;
use gax::error::Error;
use gax::error::rpc::Status;
use gax::message::Message;
use gax::options::RequestOptions;
use gax::polling_backoff_policy::{PollingBackoffPolicy, default_lro_backoff};
use gax::polling_error_policy::{Aip194Strict, PollingErrorPolicy};
use gax::retry_result::RetryResult;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

/// How long [Poller::wait_until_done] waits by default.
pub const DEFAULT_TOTAL_TIMEOUT: Duration = Duration::from_secs(3600);

/// The result of polling a long-running operation.
///
/// # Parameters
/// * `R` - the response type. This is the type returned when the operation
///   completes successfully.
/// * `M` - the metadata type. While operations are in progress the service
///   may return values of this type.
#[derive(Debug)]
pub enum PollingResult<R, M> {
    /// The operation is still in progress.
    InProgress(Option<M>),
    /// The operation completed. This includes the result.
    Completed(Result<R>),
    /// An error trying to poll the operation.
    ///
    /// The polling error policy classified this error as transient, the
    /// next poll may succeed.
    PollingError(Error),
}

type Callback = Box<dyn FnOnce(&Operation) + Send + Sync>;

/// Tracks a long-running operation until it completes.
///
/// The poller starts from the envelope returned by the method that started
/// the operation. It only changes state when polled: [poll_once] replaces the
/// local copy with the latest state from the service. Once the operation is
/// done, polling returns the same state without calling the service.
///
/// A done operation either succeeded, and [results] returns the response, or
/// failed, and [results] returns an [operation error]. Failures to query the
/// operation are returned as regular errors and leave the state unchanged.
///
/// [poll_once]: Self::poll_once
/// [results]: Self::results
/// [operation error]: Error::is_operation_error
///
/// # Parameters
/// * `R` - the response type.
/// * `M` - the metadata type.
pub struct Poller<R, M> {
    operation: Operation,
    stub: Arc<dyn OperationsStub>,
    options: RequestOptions,
    client_backoff: Option<Arc<dyn PollingBackoffPolicy>>,
    client_error_policy: Option<Arc<dyn PollingErrorPolicy>>,
    total_timeout: Duration,
    callbacks: Vec<Callback>,
    loop_start: std::time::Instant,
    poll_count: u32,
    initial_reported: bool,
    completion_reported: bool,
    _types: PhantomData<fn() -> (R, M)>,
}

impl<R, M> Poller<R, M>
where
    R: Message,
    M: Message,
{
    /// Creates a poller for `operation`.
    pub fn new(operation: Operation, stub: Arc<dyn OperationsStub>) -> Self {
        Self {
            operation,
            stub,
            options: RequestOptions::default(),
            client_backoff: None,
            client_error_policy: None,
            total_timeout: DEFAULT_TOTAL_TIMEOUT,
            callbacks: Vec::new(),
            loop_start: std::time::Instant::now(),
            poll_count: 0,
            initial_reported: false,
            completion_reported: false,
            _types: PhantomData,
        }
    }

    /// Creates a poller for an operation started by `descriptor`'s method.
    ///
    /// Fails if the method does not start a long-running operation, or if
    /// `R` and `M` are not the types named by the descriptor.
    pub fn for_method(
        operation: Operation,
        stub: Arc<dyn OperationsStub>,
        descriptor: &MethodDescriptor,
    ) -> Result<Self> {
        let expected = descriptor.operation().ok_or_else(|| {
            Error::other(format!(
                "{} does not start a long-running operation",
                descriptor.name()
            ))
        })?;
        for (want, got) in [
            (expected.response_type.as_str(), R::typename()),
            (expected.metadata_type.as_str(), M::typename()),
        ] {
            if want != got {
                return Err(Error::unexpected_result_type(format!(
                    "{} returns {want}, the poller expects {got}",
                    descriptor.name()
                )));
            }
        }
        Ok(Self::new(operation, stub))
    }

    /// Sets the options used to query, cancel, and delete the operation.
    ///
    /// The polling policies in `options`, if any, take precedence over the
    /// client configuration.
    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    /// Uses the client-wide polling policies, if any.
    pub fn with_client_config(mut self, config: &ClientConfig) -> Self {
        self.client_backoff = config.polling_backoff_policy().cloned();
        self.client_error_policy = config.polling_error_policy().cloned();
        self
    }

    /// Changes how long [wait_until_done][Self::wait_until_done] waits.
    pub fn with_total_timeout<V: Into<Duration>>(mut self, v: V) -> Self {
        self.total_timeout = v.into();
        self
    }

    pub fn name(&self) -> &str {
        self.operation.name()
    }

    pub fn done(&self) -> bool {
        self.operation.done()
    }

    /// The latest known state of the operation.
    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    pub fn into_operation(self) -> Operation {
        self.operation
    }

    /// The operation metadata, if the service has reported any.
    ///
    /// Returns an [unexpected result type] error if the metadata is not an `M`.
    ///
    /// [unexpected result type]: Error::is_unexpected_result_type
    pub fn metadata(&self) -> Result<Option<M>> {
        self.operation.metadata().map(unpack::<M>).transpose()
    }

    /// The response, if the operation completed successfully.
    ///
    /// Returns an [unexpected result type] error if the response is not an `R`.
    ///
    /// [unexpected result type]: Error::is_unexpected_result_type
    pub fn response(&self) -> Result<Option<R>> {
        self.operation.response().map(unpack::<R>).transpose()
    }

    /// The error status, if the operation failed.
    pub fn error(&self) -> Option<&Status> {
        self.operation.error()
    }

    pub fn is_error(&self) -> bool {
        self.operation.error().is_some()
    }

    pub fn is_response(&self) -> bool {
        self.operation.response().is_some()
    }

    /// The outcome of the operation, `None` while it is in progress.
    pub fn results(&self) -> Option<Result<R>> {
        match self.operation.result()? {
            OperationResult::Response(any) => Some(unpack::<R>(any)),
            OperationResult::Error(status) => Some(Err(Error::operation(status.clone()))),
        }
    }

    /// Queries the service once and replaces the local state.
    ///
    /// Does not call the service if the operation is already done.
    pub async fn poll_once(&mut self) -> Result<&Operation> {
        if self.operation.done() {
            return Ok(&self.operation);
        }
        let name = self.operation.name().to_string();
        tracing::debug!(operation = %name, "polling long-running operation");
        let updated = cancellable(
            &self.options,
            self.stub.get_operation(&name, self.options.clone()),
        )
        .await?;
        self.operation = updated;
        if self.operation.done() {
            tracing::debug!(operation = %name, "long-running operation is done");
            for callback in std::mem::take(&mut self.callbacks) {
                callback(&self.operation);
            }
        }
        Ok(&self.operation)
    }

    /// An alias for [poll_once][Self::poll_once].
    pub async fn reload(&mut self) -> Result<&Operation> {
        self.poll_once().await
    }

    /// Polls the operation until it is done or `timeout` elapses.
    ///
    /// Waits between polls using the polling backoff policy. Errors querying
    /// the operation are classified by the polling error policy: transient
    /// errors are ignored, and the loop continues.
    ///
    /// If the operation is not done when `timeout` elapses this returns a
    /// [deadline exceeded] error. The poller remains usable.
    ///
    /// [deadline exceeded]: Error::is_deadline_exceeded
    pub async fn wait_until_complete(&mut self, timeout: Duration) -> Result<R> {
        let deadline = tokio::time::Instant::now() + timeout;
        let policy_start = std::time::Instant::now();
        let backoff = self.backoff_policy();
        let error_policy = self.error_policy();
        let mut attempt_count = 0_u32;
        while !self.operation.done() {
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Err(Error::deadline_exceeded(format!(
                    "operation {} is not done after {timeout:?}",
                    self.operation.name()
                )));
            }
            attempt_count += 1;
            let delay = std::cmp::min(
                backoff.wait_period(policy_start, attempt_count),
                deadline - now,
            );
            tracing::debug!(operation = %self.operation.name(), ?delay, "waiting before next poll");
            cancellable(&self.options, async {
                tokio::time::sleep(delay).await;
                Ok(())
            })
            .await?;
            match self.poll_once().await {
                Ok(op) if op.done() => {}
                Ok(op) => {
                    if let Some(e) =
                        error_policy.on_in_progress(policy_start, attempt_count, op.name())
                    {
                        return Err(e);
                    }
                }
                Err(e) => match error_policy.on_error(policy_start, attempt_count, e) {
                    RetryResult::Continue(e) => {
                        tracing::debug!("ignoring transient polling error: {e}");
                    }
                    RetryResult::Permanent(e) | RetryResult::Exhausted(e) => return Err(e),
                },
            }
        }
        self.results()
            .unwrap_or_else(|| Err(Error::other("the operation is not done")))
    }

    /// Polls the operation until it is done, using the default total timeout.
    ///
    /// See [wait_until_complete][Self::wait_until_complete].
    pub async fn wait_until_done(&mut self) -> Result<R> {
        self.wait_until_complete(self.total_timeout).await
    }

    /// Requests the cancellation of the operation.
    ///
    /// The local state is not changed. Use [poll_once][Self::poll_once] to
    /// observe the outcome.
    pub async fn cancel(&self) -> Result<()> {
        let name = self.operation.name();
        tracing::debug!(operation = %name, "cancelling long-running operation");
        cancellable(
            &self.options,
            self.stub.cancel_operation(name, self.options.clone()),
        )
        .await
    }

    /// Deletes the operation from the service.
    pub async fn delete(&self) -> Result<()> {
        let name = self.operation.name();
        cancellable(
            &self.options,
            self.stub.delete_operation(name, self.options.clone()),
        )
        .await
    }

    /// Registers a callback to run when the operation is done.
    ///
    /// Callbacks run once, in registration order. If the operation is
    /// already done the callback runs immediately.
    pub fn on_done<F>(&mut self, callback: F)
    where
        F: FnOnce(&Operation) + Send + Sync + 'static,
    {
        if self.operation.done() {
            callback(&self.operation);
            return;
        }
        self.callbacks.push(Box::new(callback));
    }

    /// Reports the state of the operation, polling the service if needed.
    ///
    /// The first call reports the initial state without calling the service.
    /// Returns `None` after the completion is reported.
    pub async fn poll(&mut self) -> Option<PollingResult<R, M>> {
        if self.completion_reported {
            return None;
        }
        if self.initial_reported && !self.operation.done() {
            self.poll_count += 1;
            if let Err(e) = self.poll_once().await {
                return match self
                    .error_policy()
                    .on_error(self.loop_start, self.poll_count, e)
                {
                    RetryResult::Continue(e) => Some(PollingResult::PollingError(e)),
                    RetryResult::Permanent(e) | RetryResult::Exhausted(e) => {
                        self.completion_reported = true;
                        Some(PollingResult::Completed(Err(e)))
                    }
                };
            }
        }
        self.initial_reported = true;
        if let Some(result) = self.results() {
            self.completion_reported = true;
            return Some(PollingResult::Completed(result));
        }
        Some(PollingResult::InProgress(self.metadata().ok().flatten()))
    }

    /// Converts the poller into a [futures::Stream] of [PollingResult]s.
    ///
    /// The stream waits between polls using the polling backoff policy, and
    /// ends after the completion is reported.
    pub fn to_stream(self) -> impl futures::Stream<Item = PollingResult<R, M>>
    where
        R: 'static,
        M: 'static,
    {
        use futures::stream::unfold;
        unfold(self, |mut poller| async move {
            if poller.initial_reported
                && !poller.completion_reported
                && !poller.operation.done()
            {
                let delay = poller
                    .backoff_policy()
                    .wait_period(poller.loop_start, poller.poll_count + 1);
                tokio::time::sleep(delay).await;
            }
            let result = poller.poll().await?;
            Some((result, poller))
        })
    }

    fn backoff_policy(&self) -> Arc<dyn PollingBackoffPolicy> {
        self.options
            .polling_backoff_policy()
            .clone()
            .or_else(|| self.client_backoff.clone())
            .unwrap_or_else(|| Arc::new(default_lro_backoff()))
    }

    fn error_policy(&self) -> Arc<dyn PollingErrorPolicy> {
        self.options
            .polling_error_policy()
            .clone()
            .or_else(|| self.client_error_policy.clone())
            .unwrap_or_else(|| Arc::new(Aip194Strict))
    }
}

impl<R, M> std::fmt::Debug for Poller<R, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poller")
            .field("operation", &self.operation)
            .field("stub", &self.stub)
            .field("options", &self.options)
            .field("total_timeout", &self.total_timeout)
            .field("callbacks", &self.callbacks.len())
            .finish_non_exhaustive()
    }
}

async fn cancellable<F, T>(options: &RequestOptions, f: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match options.cancellation_token() {
        None => f.await,
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => Err(Error::cancelled("the long-running operation request was cancelled")),
            r = f => r,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gax::any::Any;
    use gax::descriptor::OperationDescriptor;
    use gax::error::rpc::Code;
    use gax::exponential_backoff::ExponentialBackoffBuilder;
    use gax::polling_error_policy::AlwaysContinue;
    use serde::{Deserialize, Serialize};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    type TestResult = anyhow::Result<()>;

    #[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
    struct Book {
        name: String,
    }

    impl Message for Book {
        fn typename() -> &'static str {
            "type.googleapis.com/library.v1.Book"
        }
    }

    #[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
    struct Progress {
        percent: i32,
    }

    impl Message for Progress {
        fn typename() -> &'static str {
            "type.googleapis.com/library.v1.Progress"
        }
    }

    // Returns the scripted responses in order, then repeats the last one.
    #[derive(Debug, Default)]
    struct Scripted {
        responses: Mutex<VecDeque<Result<Operation>>>,
        gets: AtomicU32,
        cancels: AtomicU32,
    }

    impl Scripted {
        fn new(responses: Vec<Result<Operation>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                ..Default::default()
            })
        }

        fn gets(&self) -> u32 {
            self.gets.load(Ordering::SeqCst)
        }
    }

    impl crate::stub::OperationsStub for Scripted {
        async fn get_operation(&self, name: &str, _options: RequestOptions) -> Result<Operation> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            match responses.len() {
                0 => Ok(Operation::new(name)),
                1 => match responses.front() {
                    Some(Ok(op)) => Ok(op.clone()),
                    _ => responses.pop_front().unwrap_or_else(|| Ok(Operation::new(name))),
                },
                _ => responses.pop_front().unwrap_or_else(|| Ok(Operation::new(name))),
            }
        }

        async fn cancel_operation(&self, _name: &str, _options: RequestOptions) -> Result<()> {
            self.cancels.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn pending(percent: i32) -> anyhow::Result<Operation> {
        Ok(Operation::new("operations/123").set_metadata(Any::from_msg(&Progress { percent })?))
    }

    fn success() -> anyhow::Result<Operation> {
        let book = Book {
            name: "shelves/s/books/b".into(),
        };
        Ok(pending(100)?.set_response(Any::from_msg(&book)?))
    }

    fn failure() -> anyhow::Result<Operation> {
        Ok(pending(50)?.set_error(
            Status::default()
                .set_code(Code::FailedPrecondition)
                .set_message("shelf is full"),
        ))
    }

    fn unavailable() -> Error {
        Error::service(
            Status::default()
                .set_code(Code::Unavailable)
                .set_message("try-again"),
        )
    }

    #[tokio::test]
    async fn accessors() -> TestResult {
        let stub = Scripted::new(vec![]);
        let poller = Poller::<Book, Progress>::new(pending(25)?, stub.clone());
        assert_eq!(poller.name(), "operations/123");
        assert!(!poller.done());
        assert_eq!(poller.metadata()?, Some(Progress { percent: 25 }));
        assert_eq!(poller.response()?, None);
        assert!(poller.results().is_none());
        assert!(!poller.is_error());
        assert!(!poller.is_response());

        let poller = Poller::<Book, Progress>::new(success()?, stub.clone());
        assert!(poller.is_response());
        let book = poller.results().transpose()?;
        assert_eq!(book.map(|b| b.name), Some("shelves/s/books/b".to_string()));

        let poller = Poller::<Book, Progress>::new(failure()?, stub.clone());
        assert!(poller.is_error());
        assert_eq!(poller.error().map(|s| s.code), Some(Code::FailedPrecondition));
        let err = poller.results().expect("operation is done").unwrap_err();
        assert!(err.is_operation_error(), "{err:?}");
        assert_eq!(err.status().map(|s| s.code), Some(Code::FailedPrecondition));
        Ok(())
    }

    #[tokio::test]
    async fn wrong_types() -> TestResult {
        let stub = Scripted::new(vec![]);
        let poller = Poller::<Progress, Book>::new(success()?, stub);
        let err = poller.response().unwrap_err();
        assert!(err.is_unexpected_result_type(), "{err:?}");
        let err = poller.metadata().unwrap_err();
        assert!(err.is_unexpected_result_type(), "{err:?}");
        let err = poller.results().expect("operation is done").unwrap_err();
        assert!(err.is_unexpected_result_type(), "{err:?}");
        Ok(())
    }

    #[tokio::test]
    async fn poll_once_replaces_state() -> TestResult {
        let stub = Scripted::new(vec![Ok(pending(50)?), Ok(success()?)]);
        let mut poller = Poller::<Book, Progress>::new(pending(0)?, stub.clone());

        poller.poll_once().await?;
        assert_eq!(poller.metadata()?, Some(Progress { percent: 50 }));
        assert!(!poller.done());

        let op = poller.reload().await?;
        assert!(op.done());
        assert_eq!(stub.gets(), 2);

        // Done operations are not polled again.
        poller.poll_once().await?;
        poller.poll_once().await?;
        assert_eq!(stub.gets(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn poll_error_keeps_state() -> TestResult {
        let stub = Scripted::new(vec![Err(unavailable()), Ok(success()?)]);
        let mut poller = Poller::<Book, Progress>::new(pending(10)?, stub.clone());
        let err = poller.poll_once().await.unwrap_err();
        assert_eq!(err.status().map(|s| s.code), Some(Code::Unavailable));
        assert_eq!(poller.metadata()?, Some(Progress { percent: 10 }));
        assert!(poller.poll_once().await?.done());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn wait_until_done_after_three_polls() -> TestResult {
        let stub = Scripted::new(vec![Ok(pending(30)?), Ok(pending(60)?), Ok(success()?)]);
        let mut poller = Poller::<Book, Progress>::new(pending(0)?, stub.clone());
        let start = tokio::time::Instant::now();
        let book = poller.wait_until_done().await?;
        assert_eq!(book.name, "shelves/s/books/b");
        assert_eq!(stub.gets(), 3);
        // The default polling backoff waits 10s, 13s, and 16.9s.
        let elapsed = start.elapsed();
        assert!(
            elapsed.abs_diff(Duration::from_millis(39_900)) < Duration::from_millis(1),
            "{elapsed:?}"
        );
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn wait_until_done_error() -> TestResult {
        let stub = Scripted::new(vec![Ok(failure()?)]);
        let mut poller = Poller::<Book, Progress>::new(pending(0)?, stub.clone());
        let err = poller.wait_until_done().await.unwrap_err();
        assert!(err.is_operation_error(), "{err:?}");
        assert_eq!(err.status().map(|s| s.message.as_str()), Some("shelf is full"));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn wait_until_complete_deadline() -> TestResult {
        let stub = Scripted::new(vec![]);
        let backoff = ExponentialBackoffBuilder::new()
            .with_initial_delay(Duration::from_secs(10))
            .with_maximum_delay(Duration::from_secs(300))
            .with_scaling(2.0)
            .build()?;
        let mut options = RequestOptions::default();
        options.set_polling_backoff_policy(backoff);
        let mut poller =
            Poller::<Book, Progress>::new(pending(0)?, stub.clone()).with_options(options);

        let start = tokio::time::Instant::now();
        let err = poller
            .wait_until_complete(Duration::from_secs(45))
            .await
            .unwrap_err();
        assert!(err.is_deadline_exceeded(), "{err:?}");
        assert!(start.elapsed() >= Duration::from_secs(45), "{:?}", start.elapsed());
        // Polls after 10s, 30s, and at the deadline.
        assert_eq!(stub.gets(), 3);

        // The operation is still usable.
        assert!(!poller.done());
        poller.poll_once().await?;
        assert_eq!(stub.gets(), 4);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn wait_ignores_transient_errors() -> TestResult {
        let stub = Scripted::new(vec![Err(unavailable()), Err(unavailable()), Ok(success()?)]);
        let mut poller = Poller::<Book, Progress>::new(pending(0)?, stub.clone());
        let book = poller.wait_until_done().await?;
        assert_eq!(book.name, "shelves/s/books/b");
        assert_eq!(stub.gets(), 3);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn wait_stops_on_permanent_error() -> TestResult {
        let permission = Error::service(
            Status::default()
                .set_code(Code::PermissionDenied)
                .set_message("uh-oh"),
        );
        let stub = Scripted::new(vec![Err(permission), Ok(success()?)]);
        let mut poller = Poller::<Book, Progress>::new(pending(0)?, stub.clone());
        let err = poller.wait_until_done().await.unwrap_err();
        assert_eq!(err.status().map(|s| s.code), Some(Code::PermissionDenied));
        assert!(!err.is_operation_error(), "{err:?}");
        assert_eq!(stub.gets(), 1);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn client_config_policies() -> TestResult {
        let permission = Error::service(
            Status::default()
                .set_code(Code::PermissionDenied)
                .set_message("uh-oh"),
        );
        let stub = Scripted::new(vec![Err(permission), Ok(success()?)]);
        let config = ClientConfig::new()
            .set_polling_error_policy(AlwaysContinue)
            .set_polling_backoff_policy(
                ExponentialBackoffBuilder::new()
                    .with_initial_delay(Duration::from_secs(1))
                    .with_maximum_delay(Duration::from_secs(1))
                    .build()?,
            );
        let mut poller =
            Poller::<Book, Progress>::new(pending(0)?, stub.clone()).with_client_config(&config);
        let start = tokio::time::Instant::now();
        poller.wait_until_done().await?;
        assert_eq!(stub.gets(), 2);
        assert_eq!(start.elapsed(), Duration::from_secs(2));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn wait_cancelled() -> TestResult {
        let stub = Scripted::new(vec![]);
        let token = tokio_util::sync::CancellationToken::new();
        let mut options = RequestOptions::default();
        options.set_cancellation_token(token.clone());
        let mut poller =
            Poller::<Book, Progress>::new(pending(0)?, stub.clone()).with_options(options);
        let cancel = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            token.cancel();
        });
        let err = poller.wait_until_done().await.unwrap_err();
        assert!(err.is_cancelled(), "{err:?}");
        assert_eq!(stub.gets(), 0);
        cancel.await?;
        Ok(())
    }

    #[tokio::test]
    async fn cancel_does_not_change_state() -> TestResult {
        let stub = Scripted::new(vec![]);
        let poller = Poller::<Book, Progress>::new(pending(40)?, stub.clone());
        poller.cancel().await?;
        assert_eq!(stub.cancels.load(Ordering::SeqCst), 1);
        assert_eq!(stub.gets(), 0);
        assert_eq!(poller.metadata()?, Some(Progress { percent: 40 }));

        // The stub does not support deletes.
        let err = poller.delete().await.unwrap_err();
        assert!(err.to_string().contains("delete_operation"), "{err}");
        Ok(())
    }

    #[tokio::test]
    async fn on_done_callbacks() -> TestResult {
        let stub = Scripted::new(vec![Ok(pending(50)?), Ok(success()?)]);
        let mut poller = Poller::<Book, Progress>::new(pending(0)?, stub.clone());
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            poller.on_done(move |op| order.lock().unwrap().push((i, op.done())));
        }
        poller.poll_once().await?;
        assert!(order.lock().unwrap().is_empty());
        poller.poll_once().await?;
        assert_eq!(*order.lock().unwrap(), [(0, true), (1, true), (2, true)]);

        // Done operations run the callback immediately.
        let late = order.clone();
        poller.on_done(move |_| late.lock().unwrap().push((3, true)));
        assert_eq!(order.lock().unwrap().len(), 4);

        // Callbacks run only once.
        poller.poll_once().await?;
        assert_eq!(order.lock().unwrap().len(), 4);
        Ok(())
    }

    #[tokio::test]
    async fn poll_results() -> TestResult {
        let stub = Scripted::new(vec![Ok(pending(50)?), Err(unavailable()), Ok(success()?)]);
        let mut poller = Poller::<Book, Progress>::new(pending(0)?, stub.clone());

        match poller.poll().await {
            Some(PollingResult::InProgress(m)) => assert_eq!(m, Some(Progress { percent: 0 })),
            r => panic!("{r:?}"),
        }
        assert_eq!(stub.gets(), 0);
        match poller.poll().await {
            Some(PollingResult::InProgress(m)) => assert_eq!(m, Some(Progress { percent: 50 })),
            r => panic!("{r:?}"),
        }
        match poller.poll().await {
            Some(PollingResult::PollingError(e)) => {
                assert_eq!(e.status().map(|s| s.code), Some(Code::Unavailable))
            }
            r => panic!("{r:?}"),
        }
        match poller.poll().await {
            Some(PollingResult::Completed(r)) => assert_eq!(r?.name, "shelves/s/books/b"),
            r => panic!("{r:?}"),
        }
        assert!(poller.poll().await.is_none());
        assert_eq!(stub.gets(), 3);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn stream() -> TestResult {
        use futures::StreamExt;
        let stub = Scripted::new(vec![Ok(pending(50)?), Ok(success()?)]);
        let poller = Poller::<Book, Progress>::new(pending(0)?, stub.clone());
        let results = poller.to_stream().collect::<Vec<_>>().await;
        assert_eq!(results.len(), 3, "{results:?}");
        assert!(matches!(results[0], PollingResult::InProgress(Some(Progress { percent: 0 }))));
        assert!(matches!(results[1], PollingResult::InProgress(Some(Progress { percent: 50 }))));
        assert!(matches!(&results[2], PollingResult::Completed(Ok(b)) if b.name == "shelves/s/books/b"));
        Ok(())
    }

    #[test]
    fn for_method() -> TestResult {
        let stub = Scripted::new(vec![]);
        let descriptor = MethodDescriptor::builder("library.v1.Library/CreateBook")
            .with_operation(OperationDescriptor::new(Book::typename(), Progress::typename()))
            .build()?;
        let poller =
            Poller::<Book, Progress>::for_method(pending(0)?, stub.clone(), &descriptor)?;
        assert_eq!(poller.name(), "operations/123");

        let err =
            Poller::<Progress, Book>::for_method(pending(0)?, stub.clone(), &descriptor).unwrap_err();
        assert!(err.is_unexpected_result_type(), "{err:?}");

        let descriptor = MethodDescriptor::builder("library.v1.Library/GetBook").build()?;
        let err = Poller::<Book, Progress>::for_method(pending(0)?, stub, &descriptor).unwrap_err();
        assert!(err.to_string().contains("GetBook"), "{err}");
        Ok(())
    }

    #[tokio::test]
    async fn default_stub_methods() -> TestResult {
        let stub = Scripted::new(vec![]);
        let err = crate::stub::OperationsStub::delete_operation(
            stub.as_ref(),
            "operations/123",
            RequestOptions::default(),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("not supported"), "{err}");
        Ok(())
    }

    #[test]
    fn send_and_sync() {
        static_assertions::assert_impl_all!(Poller<Book, Progress>: Send, Sync, std::fmt::Debug);
    }
}
