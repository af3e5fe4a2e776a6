//! Shared test doubles for orchestrator and upload tests.

use async_trait::async_trait;
use chatrelay_core::assistant::{
    AssistantApi, AssistantSpec, CompletionRequest, Run, RunStatus, ThreadMessage,
};
use chatrelay_core::error::{RelayError, Result, TransportError};
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// An assistant service that replays scripted run statuses and records
/// every call it receives.
///
/// `get_run` pops the next status; the last one repeats forever.
pub struct ScriptedAssistant {
    statuses: Mutex<VecDeque<RunStatus>>,
    reply: Mutex<Option<ThreadMessage>>,
    completion: Mutex<Option<String>>,
    remote_stores: Mutex<Vec<(String, String)>>,
    calls: Mutex<Vec<String>>,
    posted: Mutex<Vec<(String, String)>>,
    completions: Mutex<Vec<CompletionRequest>>,
    failing_calls: Mutex<Vec<String>>,
    counter: Mutex<u32>,
}

impl ScriptedAssistant {
    pub fn new(statuses: Vec<RunStatus>) -> Self {
        Self {
            statuses: Mutex::new(statuses.into()),
            reply: Mutex::new(None),
            completion: Mutex::new(None),
            remote_stores: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            posted: Mutex::new(Vec::new()),
            completions: Mutex::new(Vec::new()),
            failing_calls: Mutex::new(Vec::new()),
            counter: Mutex::new(0),
        }
    }

    /// Runs complete on the first poll and the thread answers with `text`.
    pub fn replying(text: &str) -> Self {
        Self::new(vec![RunStatus::Completed]).with_reply(Some(assistant_message(text)))
    }

    pub fn with_reply(self, reply: Option<ThreadMessage>) -> Self {
        *self.reply.lock().unwrap() = reply;
        self
    }

    pub fn with_completion(self, text: &str) -> Self {
        *self.completion.lock().unwrap() = Some(text.to_string());
        self
    }

    /// A knowledge store that already exists remotely.
    pub fn with_remote_store(self, id: &str, name: &str) -> Self {
        self.remote_stores
            .lock()
            .unwrap()
            .push((id.to_string(), name.to_string()));
        self
    }

    /// Make every call to `method` fail with a network error.
    pub fn failing(self, method: &str) -> Self {
        self.failing_calls.lock().unwrap().push(method.to_string());
        self
    }

    /// Names of the methods called, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, method: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.as_str() == method)
            .count()
    }

    /// `(thread_id, text)` of every posted message.
    pub fn posted(&self) -> Vec<(String, String)> {
        self.posted.lock().unwrap().clone()
    }

    pub fn completions(&self) -> Vec<CompletionRequest> {
        self.completions.lock().unwrap().clone()
    }

    fn record(&self, method: &str) -> Result<()> {
        self.calls.lock().unwrap().push(method.to_string());
        if self.failing_calls.lock().unwrap().iter().any(|m| m == method) {
            return Err(RelayError::Transport(TransportError::ExhaustedRetries {
                attempts: 3,
                last: Box::new(TransportError::Network(format!("{method} unreachable"))),
            }));
        }
        Ok(())
    }

    fn next_id(&self, prefix: &str) -> String {
        let mut counter = self.counter.lock().unwrap();
        *counter += 1;
        format!("{prefix}_{}", *counter)
    }
}

pub fn assistant_message(text: &str) -> ThreadMessage {
    ThreadMessage {
        id: "msg_reply".into(),
        role: "assistant".into(),
        text: Some(text.to_string()),
    }
}

#[async_trait]
impl AssistantApi for ScriptedAssistant {
    async fn create_thread(&self, _cancel: &CancellationToken) -> Result<String> {
        self.record("create_thread")?;
        Ok(self.next_id("thread"))
    }

    async fn create_message(
        &self,
        thread_id: &str,
        text: &str,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        self.record("create_message")?;
        self.posted
            .lock()
            .unwrap()
            .push((thread_id.to_string(), text.to_string()));
        Ok(())
    }

    async fn create_run(
        &self,
        _thread_id: &str,
        _assistant_id: &str,
        _cancel: &CancellationToken,
    ) -> Result<String> {
        self.record("create_run")?;
        Ok(self.next_id("run"))
    }

    async fn get_run(
        &self,
        _thread_id: &str,
        run_id: &str,
        _cancel: &CancellationToken,
    ) -> Result<Run> {
        self.record("get_run")?;
        let mut statuses = self.statuses.lock().unwrap();
        let status = if statuses.len() > 1 {
            statuses.pop_front().unwrap_or(RunStatus::Completed)
        } else {
            statuses.front().cloned().unwrap_or(RunStatus::Completed)
        };
        let last_error = status
            .is_failure()
            .then(|| "server_error: model overloaded".to_string());
        Ok(Run {
            id: run_id.to_string(),
            status,
            last_error,
        })
    }

    async fn latest_message(
        &self,
        _thread_id: &str,
        _cancel: &CancellationToken,
    ) -> Result<Option<ThreadMessage>> {
        self.record("latest_message")?;
        Ok(self.reply.lock().unwrap().clone())
    }

    async fn create_assistant(
        &self,
        _spec: &AssistantSpec,
        _cancel: &CancellationToken,
    ) -> Result<String> {
        self.record("create_assistant")?;
        Ok(self.next_id("asst"))
    }

    async fn create_vector_store(&self, name: &str, _cancel: &CancellationToken) -> Result<String> {
        self.record("create_vector_store")?;
        let id = self.next_id("vs");
        self.remote_stores
            .lock()
            .unwrap()
            .push((id.clone(), name.to_string()));
        Ok(id)
    }

    async fn link_vector_store(
        &self,
        _assistant_id: &str,
        _store_id: &str,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        self.record("link_vector_store")
    }

    async fn find_vector_store(
        &self,
        name: &str,
        _cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        self.record("find_vector_store")?;
        Ok(self
            .remote_stores
            .lock()
            .unwrap()
            .iter()
            .find(|(_, n)| n == name)
            .map(|(id, _)| id.clone()))
    }

    async fn upload_file(
        &self,
        _file_name: &str,
        _bytes: Vec<u8>,
        _cancel: &CancellationToken,
    ) -> Result<String> {
        self.record("upload_file")?;
        Ok(self.next_id("file"))
    }

    async fn attach_file(
        &self,
        _store_id: &str,
        _file_id: &str,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        self.record("attach_file")
    }

    async fn detach_file(
        &self,
        _store_id: &str,
        file_id: &str,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        self.record(&format!("detach_file:{file_id}"))
    }

    async fn delete_file(&self, file_id: &str, _cancel: &CancellationToken) -> Result<()> {
        self.record(&format!("delete_file:{file_id}"))
    }

    async fn complete_chat(
        &self,
        request: &CompletionRequest,
        _cancel: &CancellationToken,
    ) -> Result<String> {
        self.record("complete_chat")?;
        self.completions.lock().unwrap().push(request.clone());
        self.completion
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| RelayError::Decode("No choices in completion response".into()))
    }
}
