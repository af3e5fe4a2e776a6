//! OpenAI Assistants (v2) client.
//!
//! Implements [`AssistantApi`] over the hosted assistant service:
//! - threads, messages and runs for the reply protocol
//! - assistants, vector stores and files for knowledge uploads
//! - chat completions for completion mode
//!
//! Every request goes through the shared [`RetryingTransport`].

use async_trait::async_trait;
use chatrelay_core::assistant::{
    AssistantApi, AssistantSpec, CompletionRequest, Run, RunStatus, ThreadMessage,
};
use chatrelay_core::error::{RelayError, Result};
use chatrelay_transport::{OutboundRequest, Part, RetryingTransport};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Header opting into the v2 assistants API.
const BETA_HEADER: (&str, &str) = ("OpenAI-Beta", "assistants=v2");

pub struct OpenAiAssistantClient {
    base_url: String,
    api_key: String,
    transport: RetryingTransport,
}

impl OpenAiAssistantClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        transport: RetryingTransport,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            transport,
        }
    }

    fn request(&self, request: OutboundRequest) -> OutboundRequest {
        request
            .bearer(&self.api_key)
            .header(BETA_HEADER.0, BETA_HEADER.1)
    }

    fn get(&self, path: &str) -> OutboundRequest {
        self.request(OutboundRequest::get(format!("{}{path}", self.base_url)))
    }

    fn delete(&self, path: &str) -> OutboundRequest {
        self.request(OutboundRequest::delete(format!("{}{path}", self.base_url)))
    }

    fn post<T: Serialize + ?Sized>(&self, path: &str, payload: &T) -> Result<OutboundRequest> {
        let request = OutboundRequest::post(format!("{}{path}", self.base_url)).json(payload)?;
        Ok(self.request(request))
    }
}

#[async_trait]
impl AssistantApi for OpenAiAssistantClient {
    async fn create_thread(&self, cancel: &CancellationToken) -> Result<String> {
        let request = self.post("/threads", &serde_json::json!({}))?;
        let thread: ApiObject = self.transport.execute_json(&request, cancel).await?;
        debug!(thread_id = %thread.id, "Created thread");
        Ok(thread.id)
    }

    async fn create_message(
        &self,
        thread_id: &str,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let body = ApiNewMessage {
            role: "user",
            content: text,
        };
        let request = self.post(&format!("/threads/{thread_id}/messages"), &body)?;
        let _: ApiObject = self.transport.execute_json(&request, cancel).await?;
        Ok(())
    }

    async fn create_run(
        &self,
        thread_id: &str,
        assistant_id: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let body = serde_json::json!({ "assistant_id": assistant_id });
        let request = self.post(&format!("/threads/{thread_id}/runs"), &body)?;
        let run: ApiRun = self.transport.execute_json(&request, cancel).await?;
        Ok(run.id)
    }

    async fn get_run(
        &self,
        thread_id: &str,
        run_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Run> {
        let request = self.get(&format!("/threads/{thread_id}/runs/{run_id}"));
        let run: ApiRun = self.transport.execute_json(&request, cancel).await?;
        Ok(run.into())
    }

    async fn latest_message(
        &self,
        thread_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<ThreadMessage>> {
        let request = self.get(&format!("/threads/{thread_id}/messages?limit=1&order=desc"));
        let list: ApiList<ApiThreadMessage> = self.transport.execute_json(&request, cancel).await?;
        Ok(list.data.into_iter().next().map(Into::into))
    }

    async fn create_assistant(
        &self,
        spec: &AssistantSpec,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let body = serde_json::json!({
            "name": spec.name,
            "model": spec.model,
            "instructions": spec.instructions,
            "tools": [{ "type": "file_search" }],
        });
        let request = self.post("/assistants", &body)?;
        let assistant: ApiObject = self.transport.execute_json(&request, cancel).await?;
        Ok(assistant.id)
    }

    async fn create_vector_store(&self, name: &str, cancel: &CancellationToken) -> Result<String> {
        let request = self.post("/vector_stores", &serde_json::json!({ "name": name }))?;
        let store: ApiObject = self.transport.execute_json(&request, cancel).await?;
        Ok(store.id)
    }

    async fn link_vector_store(
        &self,
        assistant_id: &str,
        store_id: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let body = serde_json::json!({
            "tool_resources": { "file_search": { "vector_store_ids": [store_id] } },
        });
        let request = self.post(&format!("/assistants/{assistant_id}"), &body)?;
        let _: ApiObject = self.transport.execute_json(&request, cancel).await?;
        Ok(())
    }

    async fn find_vector_store(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        let request = self.get("/vector_stores?limit=100");
        let list: ApiList<ApiNamedObject> = self.transport.execute_json(&request, cancel).await?;
        Ok(list
            .data
            .into_iter()
            .find(|store| store.name.as_deref() == Some(name))
            .map(|store| store.id))
    }

    async fn upload_file(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let request = self.request(
            OutboundRequest::post(format!("{}/files", self.base_url)).multipart(vec![
                Part::Text {
                    name: "purpose".into(),
                    value: "assistants".into(),
                },
                Part::File {
                    name: "file".into(),
                    file_name: file_name.to_string(),
                    bytes,
                },
            ]),
        );
        let file: ApiObject = self.transport.execute_json(&request, cancel).await?;
        debug!(file_id = %file.id, file_name, "Uploaded file");
        Ok(file.id)
    }

    async fn attach_file(
        &self,
        store_id: &str,
        file_id: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let body = serde_json::json!({ "file_id": file_id });
        let request = self.post(&format!("/vector_stores/{store_id}/files"), &body)?;
        let _: ApiObject = self.transport.execute_json(&request, cancel).await?;
        Ok(())
    }

    async fn detach_file(
        &self,
        store_id: &str,
        file_id: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let request = self.delete(&format!("/vector_stores/{store_id}/files/{file_id}"));
        self.transport.execute(&request, cancel).await?;
        Ok(())
    }

    async fn delete_file(&self, file_id: &str, cancel: &CancellationToken) -> Result<()> {
        let request = self.delete(&format!("/files/{file_id}"));
        self.transport.execute(&request, cancel).await?;
        Ok(())
    }

    async fn complete_chat(
        &self,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let body = serde_json::json!({
            "model": request.model,
            "messages": request.messages,
            "temperature": request.temperature,
        });
        let outbound = self.post("/chat/completions", &body)?;
        let response: ApiCompletion = self.transport.execute_json(&outbound, cancel).await?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|text| !text.is_empty())
            .ok_or_else(|| RelayError::Decode("No choices in completion response".into()))
    }
}

// --- Assistants API types (internal) ---

#[derive(Debug, Deserialize)]
struct ApiObject {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ApiNamedObject {
    id: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiList<T> {
    data: Vec<T>,
}

#[derive(Debug, Serialize)]
struct ApiNewMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ApiRun {
    id: String,
    status: String,
    #[serde(default)]
    last_error: Option<ApiRunError>,
}

#[derive(Debug, Deserialize)]
struct ApiRunError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl From<ApiRun> for Run {
    fn from(run: ApiRun) -> Self {
        let last_error = run.last_error.and_then(|e| {
            let code = e.code.filter(|c| !c.is_empty());
            let message = e.message.filter(|m| !m.is_empty());
            match (code, message) {
                (Some(code), Some(message)) => Some(format!("{code}: {message}")),
                (code, message) => message.or(code),
            }
        });
        Run {
            id: run.id,
            status: RunStatus::parse(&run.status),
            last_error,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiThreadMessage {
    id: String,
    role: String,
    #[serde(default)]
    content: Vec<ApiContentPart>,
}

#[derive(Debug, Deserialize)]
struct ApiContentPart {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<ApiText>,
}

#[derive(Debug, Deserialize)]
struct ApiText {
    value: String,
}

impl From<ApiThreadMessage> for ThreadMessage {
    fn from(message: ApiThreadMessage) -> Self {
        let parts: Vec<String> = message
            .content
            .into_iter()
            .filter(|part| part.kind == "text")
            .filter_map(|part| part.text.map(|t| t.value))
            .filter(|value| !value.is_empty())
            .collect();
        ThreadMessage {
            id: message.id,
            role: message.role,
            text: (!parts.is_empty()).then(|| parts.join("\n")),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiCompletion {
    choices: Vec<ApiChoice>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ApiChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}
