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

#[cfg(test)]
mod tests {
    use gax::Result;
    use gax::error::Error;
    use gax::error::rpc::{Code, Status};
    use gax::message::Message;
    use gax::options::RequestOptions;
    use lro::stub::OperationsStub;
    use lro::{Operation, Poller};
    use serde::{Deserialize, Serialize};
    use serde_json::{Value, json};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    type TestResult = anyhow::Result<()>;

    #[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    struct Backup {
        name: String,
        size_bytes: i64,
    }

    impl Message for Backup {
        fn typename() -> &'static str {
            "type.googleapis.com/test.v1.Backup"
        }
    }

    #[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    struct BackupMetadata {
        progress_percent: i32,
    }

    impl Message for BackupMetadata {
        fn typename() -> &'static str {
            "type.googleapis.com/test.v1.BackupMetadata"
        }
    }

    #[derive(Debug)]
    struct State {
        polls_remaining: u32,
        polls: u32,
        cancelled: bool,
        fail_with: Option<Status>,
    }

    // An in-memory service. Each operation completes after a fixed number
    // of polls, unless it is cancelled first.
    #[derive(Debug, Default)]
    struct FakeService {
        operations: Mutex<HashMap<String, State>>,
    }

    impl FakeService {
        // Starts a backup, returning the envelope as it would be received
        // over the wire.
        fn create_backup(&self, id: &str, polls: u32, fail_with: Option<Status>) -> Result<Operation> {
            let name = format!("operations/{id}");
            self.operations.lock().unwrap().insert(
                name.clone(),
                State {
                    polls_remaining: polls,
                    polls: 0,
                    cancelled: false,
                    fail_with,
                },
            );
            Operation::from_json(json!({
                "name": name,
                "metadata": {
                    "@type": BackupMetadata::typename(),
                    "progressPercent": 0
                }
            }))
        }

        fn polls(&self, name: &str) -> u32 {
            self.operations
                .lock()
                .unwrap()
                .get(name)
                .map(|s| s.polls)
                .unwrap_or_default()
        }

        fn envelope(name: &str, state: &State) -> Value {
            let progress = if state.polls_remaining == 0 { 100 } else { 10 * state.polls as i32 };
            let mut envelope = json!({
                "name": name,
                "metadata": {"@type": BackupMetadata::typename(), "progressPercent": progress}
            });
            if state.cancelled {
                envelope["done"] = json!(true);
                envelope["error"] = json!({"code": Code::Cancelled as i32, "message": "cancelled by the user"});
            } else if state.polls_remaining == 0 {
                envelope["done"] = json!(true);
                match &state.fail_with {
                    Some(status) => envelope["error"] = json!(status),
                    None => {
                        envelope["response"] = json!({
                            "@type": Backup::typename(),
                            "name": "backups/b",
                            "sizeBytes": 1024
                        })
                    }
                }
            }
            envelope
        }
    }

    impl OperationsStub for FakeService {
        async fn get_operation(&self, name: &str, _options: RequestOptions) -> Result<Operation> {
            let envelope = {
                let mut operations = self.operations.lock().unwrap();
                let state = operations.get_mut(name).ok_or_else(|| {
                    Error::service(
                        Status::default()
                            .set_code(Code::NotFound)
                            .set_message(format!("{name} not found")),
                    )
                })?;
                state.polls += 1;
                state.polls_remaining = state.polls_remaining.saturating_sub(1);
                Self::envelope(name, state)
            };
            Operation::from_json(envelope)
        }

        async fn cancel_operation(&self, name: &str, _options: RequestOptions) -> Result<()> {
            let mut operations = self.operations.lock().unwrap();
            if let Some(state) = operations.get_mut(name) {
                state.cancelled = true;
            }
            Ok(())
        }

        async fn delete_operation(&self, name: &str, _options: RequestOptions) -> Result<()> {
            self.operations.lock().unwrap().remove(name);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn backup_completes() -> TestResult {
        let service = Arc::new(FakeService::default());
        let operation = service.create_backup("b1", 3, None)?;
        let mut poller = Poller::<Backup, BackupMetadata>::new(operation, service.clone());
        assert_eq!(poller.metadata()?, Some(BackupMetadata { progress_percent: 0 }));

        let backup = poller.wait_until_done().await?;
        assert_eq!(
            backup,
            Backup {
                name: "backups/b".into(),
                size_bytes: 1024
            }
        );
        assert_eq!(service.polls("operations/b1"), 3);
        assert_eq!(poller.metadata()?, Some(BackupMetadata { progress_percent: 100 }));

        // Completed operations are not polled again.
        poller.poll_once().await?;
        assert_eq!(service.polls("operations/b1"), 3);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn backup_fails() -> TestResult {
        let service = Arc::new(FakeService::default());
        let status = Status::default()
            .set_code(Code::ResourceExhausted)
            .set_message("quota exceeded");
        let operation = service.create_backup("b2", 2, Some(status))?;
        let mut poller = Poller::<Backup, BackupMetadata>::new(operation, service.clone());

        let err = poller.wait_until_done().await.unwrap_err();
        assert!(err.is_operation_error(), "{err:?}");
        assert_eq!(err.status().map(|s| s.code), Some(Code::ResourceExhausted));
        assert!(poller.is_error());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_then_resume() -> TestResult {
        let service = Arc::new(FakeService::default());
        let operation = service.create_backup("b3", 5, None)?;
        let mut poller = Poller::<Backup, BackupMetadata>::new(operation, service.clone());

        let start = tokio::time::Instant::now();
        let err = poller
            .wait_until_complete(Duration::from_secs(20))
            .await
            .unwrap_err();
        assert!(err.is_deadline_exceeded(), "{err:?}");
        assert!(start.elapsed() >= Duration::from_secs(20));
        assert!(!poller.done());
        // Polled after 10s and at the deadline.
        assert_eq!(service.polls("operations/b3"), 2);

        let backup = poller.wait_until_done().await?;
        assert_eq!(backup.name, "backups/b");
        assert_eq!(service.polls("operations/b3"), 5);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_and_delete() -> TestResult {
        let service = Arc::new(FakeService::default());
        let operation = service.create_backup("b4", 10, None)?;
        let mut poller = Poller::<Backup, BackupMetadata>::new(operation, service.clone());

        poller.cancel().await?;
        // Cancelling does not change the local state.
        assert!(!poller.done());

        poller.poll_once().await?;
        assert!(poller.done());
        assert_eq!(poller.error().map(|s| s.code), Some(Code::Cancelled));

        poller.delete().await?;
        let mut again = Poller::<Backup, BackupMetadata>::new(
            Operation::new("operations/b4"),
            service.clone(),
        );
        let err = again.poll_once().await.unwrap_err();
        assert_eq!(err.status().map(|s| s.code), Some(Code::NotFound));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn missing_operation_is_permanent() -> TestResult {
        let service = Arc::new(FakeService::default());
        let mut poller = Poller::<Backup, BackupMetadata>::new(
            Operation::new("operations/unknown"),
            service.clone(),
        );
        let err = poller.wait_until_done().await.unwrap_err();
        assert_eq!(err.status().map(|s| s.code), Some(Code::NotFound));
        assert!(!err.is_operation_error(), "{err:?}");
        Ok(())
    }
}
