//! The reply orchestrator.
//!
//! In assistant mode a reply is produced by driving the hosted assistant
//! through a fixed sequence of states:
//!
//! ```text
//! ResolveAssistant → ResolveThread → PostMessage → StartRun → PollRun → FetchReply → Done
//!        └───────────────┴──────────────┴─────────────┴──────────┴───────────┴──→ Failed
//! ```
//!
//! In completion mode the locally stored history is folded into a single
//! chat-completion request instead.
//!
//! Either way the exchanged pair of turns is recorded once a reply exists.
//! Failing to record it is logged but does not withhold the reply.

use std::sync::Arc;
use std::time::Duration;

use chatrelay_config::{AppConfig, ReplyMode};
use chatrelay_core::assistant::{AssistantApi, CompletionRequest, RunStatus};
use chatrelay_core::error::{RelayError, Result};
use chatrelay_core::message::{InboundMessage, Turn};
use chatrelay_core::messenger::ChatContext;
use chatrelay_core::store::ConversationStore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::history::HistoryAssembler;
use crate::locks::ConversationLocks;

/// Prefix the first message of a conversation with the listing it is about.
pub fn with_listing_context(text: &str, context: Option<&ChatContext>) -> String {
    match context {
        Some(ctx) if !ctx.is_empty() => {
            format!("Message about listing \"{}\" ({}): {text}", ctx.title, ctx.price)
        }
        _ => text.to_string(),
    }
}

pub struct AssistantOrchestrator {
    api: Arc<dyn AssistantApi>,
    store: Arc<dyn ConversationStore>,
    history: HistoryAssembler,
    locks: ConversationLocks,
    mode: ReplyMode,
    model: String,
    temperature: f32,
    poll_interval: Duration,
    run_timeout: Duration,
}

impl AssistantOrchestrator {
    pub fn new(api: Arc<dyn AssistantApi>, store: Arc<dyn ConversationStore>) -> Self {
        Self {
            history: HistoryAssembler::new(store.clone(), "You are a helpful assistant.", 5),
            api,
            store,
            locks: ConversationLocks::new(),
            mode: ReplyMode::Assistant,
            model: "gpt-4o".into(),
            temperature: 0.5,
            poll_interval: Duration::from_millis(500),
            run_timeout: Duration::from_secs(120),
        }
    }

    /// Build with every knob taken from configuration.
    pub fn from_config(
        api: Arc<dyn AssistantApi>,
        store: Arc<dyn ConversationStore>,
        config: &AppConfig,
    ) -> Self {
        Self::new(api, store)
            .with_mode(config.assistant.mode)
            .with_model(config.assistant.model.clone(), config.assistant.temperature)
            .with_history(
                config.assistant.system_prompt.clone(),
                config.database.history_limit,
            )
            .with_poll_interval(config.assistant.poll_interval())
            .with_run_timeout(config.assistant.run_timeout())
    }

    pub fn with_mode(mut self, mode: ReplyMode) -> Self {
        self.mode = mode;
        self
    }

    /// Model and temperature for completion mode.
    pub fn with_model(mut self, model: impl Into<String>, temperature: f32) -> Self {
        self.model = model.into();
        self.temperature = temperature;
        self
    }

    /// Persona and history window for completion mode.
    pub fn with_history(mut self, system_prompt: impl Into<String>, limit: usize) -> Self {
        self.history = HistoryAssembler::new(self.store.clone(), system_prompt, limit);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = timeout;
        self
    }

    pub fn mode(&self) -> ReplyMode {
        self.mode
    }

    /// Produce (and record) the reply to `message`.
    ///
    /// Work for one conversation is serialized; `cancel` aborts any wait.
    pub async fn reply(
        &self,
        message: &InboundMessage,
        context: Option<&ChatContext>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let _guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RelayError::Cancelled),
            guard = self.locks.acquire(&message.chat_id) => guard,
        };

        info!(
            conversation_id = %message.chat_id,
            owner_id = message.owner_id,
            mode = ?self.mode,
            "Processing message"
        );

        let reply = match self.mode {
            ReplyMode::Assistant => self.reply_via_assistant(message, context, cancel).await,
            ReplyMode::Completion => self.reply_via_completion(message, context, cancel).await,
        };

        let reply = match reply {
            Ok(reply) => reply,
            Err(e) => {
                warn!(conversation_id = %message.chat_id, error = %e, "Reply failed");
                return Err(e);
            }
        };

        self.record_exchange(message, &reply).await;
        info!(
            conversation_id = %message.chat_id,
            reply_len = reply.len(),
            "Reply ready"
        );
        Ok(reply)
    }

    async fn reply_via_assistant(
        &self,
        message: &InboundMessage,
        context: Option<&ChatContext>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let conversation_id = message.chat_id.as_str();

        // ResolveAssistant
        let assistant_id = self
            .store
            .get_assistant(message.owner_id)
            .await?
            .ok_or(RelayError::AssistantNotConfigured {
                owner_id: message.owner_id,
            })?;
        debug!(conversation_id, assistant_id = %assistant_id, "Resolved assistant");

        // ResolveThread
        let (thread_id, is_new_thread) = match self.store.get_binding(conversation_id).await? {
            Some(binding) => (binding.thread_id, false),
            None => {
                let thread_id = self.api.create_thread(cancel).await?;
                self.store
                    .create_binding(conversation_id, &thread_id, &assistant_id)
                    .await
                    .inspect_err(|e| {
                        error!(conversation_id, thread_id = %thread_id, error = %e, "Failed to bind thread")
                    })?;
                info!(conversation_id, thread_id = %thread_id, "Started new thread");
                (thread_id, true)
            }
        };

        // PostMessage
        let text = if is_new_thread {
            with_listing_context(&message.text, context)
        } else {
            message.text.clone()
        };
        self.api.create_message(&thread_id, &text, cancel).await?;
        debug!(conversation_id, thread_id = %thread_id, "Posted message");

        // StartRun
        let run_id = self.api.create_run(&thread_id, &assistant_id, cancel).await?;
        debug!(conversation_id, thread_id = %thread_id, run_id = %run_id, "Started run");

        // PollRun
        self.wait_for_run(&thread_id, &run_id, cancel).await?;

        // FetchReply
        let latest = self.api.latest_message(&thread_id, cancel).await?;
        match latest {
            Some(m) if m.role == "assistant" => m.text.ok_or(RelayError::EmptyReply {
                thread_id: thread_id.clone(),
            }),
            _ => Err(RelayError::EmptyReply { thread_id }),
        }
    }

    /// Poll until the run completes, fails, times out, or `cancel` fires.
    async fn wait_for_run(
        &self,
        thread_id: &str,
        run_id: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let deadline = Instant::now() + self.run_timeout;
        let mut polls = 0u32;

        loop {
            let run = self.api.get_run(thread_id, run_id, cancel).await?;
            polls += 1;

            match run.status {
                RunStatus::Completed => {
                    debug!(thread_id, run_id, polls, "Run completed");
                    return Ok(());
                }
                ref status if status.is_failure() => {
                    let reason = run.last_error.unwrap_or_else(|| status.to_string());
                    warn!(thread_id, run_id, status = %status, reason = %reason, "Run failed");
                    return Err(RelayError::RunFailed {
                        run_id: run_id.to_string(),
                        reason,
                    });
                }
                ref status => debug!(thread_id, run_id, status = %status, "Run pending"),
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(thread_id, run_id, polls, "Run timed out");
                return Err(RelayError::RunTimedOut {
                    run_id: run_id.to_string(),
                    waited_secs: self.run_timeout.as_secs(),
                });
            }

            let pause = self.poll_interval.min(deadline - now);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RelayError::Cancelled),
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }

    async fn reply_via_completion(
        &self,
        message: &InboundMessage,
        context: Option<&ChatContext>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let conversation_id = message.chat_id.as_str();

        let (turns, first_message) = match self.history.recent(conversation_id).await {
            Ok(turns) => {
                let first = turns.is_empty();
                (turns, first)
            }
            Err(e) => {
                warn!(conversation_id, error = %e, "History unavailable, continuing without it");
                (Vec::new(), false)
            }
        };
        debug!(conversation_id, history = turns.len(), "Loaded history");

        let text = if first_message {
            with_listing_context(&message.text, context)
        } else {
            message.text.clone()
        };

        let request = CompletionRequest {
            model: self.model.clone(),
            messages: self.history.fold(turns, &text),
            temperature: self.temperature,
        };

        let reply = self.api.complete_chat(&request, cancel).await?;
        if reply.trim().is_empty() {
            return Err(RelayError::EmptyReply {
                thread_id: conversation_id.to_string(),
            });
        }
        Ok(reply)
    }

    /// Persist the user/assistant pair; failures are logged only.
    async fn record_exchange(&self, message: &InboundMessage, reply: &str) {
        let user = Turn::user(
            &message.chat_id,
            message.owner_id,
            &message.text,
            message.created_at,
        );
        let answered_at = chrono::Utc::now().timestamp().max(message.created_at);
        let assistant = Turn::assistant(&message.chat_id, message.owner_id, reply, answered_at);

        if let Err(e) = self.store.save_turn_pair(&user, &assistant).await {
            error!(
                conversation_id = %message.chat_id,
                error = %e,
                "Failed to record exchange; reply is still returned"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{ScriptedAssistant, assistant_message};
    use chatrelay_core::assistant::ThreadMessage;
    use chatrelay_core::message::Role;
    use chatrelay_store::InMemoryStore;

    const OWNER: i64 = 42;

    fn inbound(chat_id: &str, text: &str) -> InboundMessage {
        InboundMessage {
            chat_id: chat_id.into(),
            owner_id: OWNER,
            text: text.into(),
            created_at: 1_700_000_000,
        }
    }

    fn listing() -> ChatContext {
        ChatContext {
            title: "Leather sofa".into(),
            price: "12 000 ₽".into(),
        }
    }

    async fn seeded_store() -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new());
        store.save_assistant("asst_1", "shop-asst", OWNER).await.unwrap();
        store
    }

    fn orchestrator(api: &Arc<ScriptedAssistant>, store: &Arc<InMemoryStore>) -> AssistantOrchestrator {
        AssistantOrchestrator::new(api.clone(), store.clone())
            .with_poll_interval(Duration::from_millis(500))
            .with_run_timeout(Duration::from_secs(120))
    }

    #[tokio::test(start_paused = true)]
    async fn full_protocol_returns_reply_and_records_pair() {
        let store = seeded_store().await;
        let api = Arc::new(
            ScriptedAssistant::new(vec![
                RunStatus::Queued,
                RunStatus::InProgress,
                RunStatus::Completed,
            ])
            .with_reply(Some(assistant_message("Yes, it is available."))),
        );

        let reply = orchestrator(&api, &store)
            .reply(&inbound("c1", "hello"), None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(reply, "Yes, it is available.");
        assert_eq!(
            api.calls(),
            [
                "create_thread",
                "create_message",
                "create_run",
                "get_run",
                "get_run",
                "get_run",
                "latest_message"
            ]
        );

        let turns = store.turns("c1").await;
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, Role::User);
        assert_eq!(turns[0].content, "hello");
        assert_eq!(turns[0].created_at, 1_700_000_000);
        assert_eq!(turns[1].role, Role::Assistant);
        assert!(turns[1].created_at >= turns[0].created_at);
    }

    #[tokio::test(start_paused = true)]
    async fn context_prefix_only_on_first_message() {
        let store = seeded_store().await;
        let api = Arc::new(ScriptedAssistant::replying("ok"));
        let orch = orchestrator(&api, &store);
        let cancel = CancellationToken::new();

        orch.reply(&inbound("c1", "is it available?"), Some(&listing()), &cancel)
            .await
            .unwrap();
        orch.reply(&inbound("c1", "can you deliver?"), Some(&listing()), &cancel)
            .await
            .unwrap();

        let posted = api.posted();
        assert_eq!(posted.len(), 2);
        assert_eq!(
            posted[0].1,
            "Message about listing \"Leather sofa\" (12 000 ₽): is it available?"
        );
        assert_eq!(posted[1].1, "can you deliver?");
        // Same thread both times
        assert_eq!(posted[0].0, posted[1].0);
        assert_eq!(api.count("create_thread"), 1);

        // Stored user turn carries the text as received
        let turns = store.turns("c1").await;
        assert_eq!(turns[0].content, "is it available?");
    }

    #[tokio::test(start_paused = true)]
    async fn missing_context_sends_text_as_is() {
        let store = seeded_store().await;
        let api = Arc::new(ScriptedAssistant::replying("ok"));

        orchestrator(&api, &store)
            .reply(&inbound("c1", "hello"), None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(api.posted()[0].1, "hello");
    }

    #[tokio::test(start_paused = true)]
    async fn unconfigured_owner_fails_before_any_call() {
        let store = Arc::new(InMemoryStore::new());
        let api = Arc::new(ScriptedAssistant::replying("ok"));

        let err = orchestrator(&api, &store)
            .reply(&inbound("c1", "hello"), None, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, RelayError::AssistantNotConfigured { owner_id: OWNER }));
        assert!(api.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_run_stops_without_fetch_or_persist() {
        let store = seeded_store().await;
        let api = Arc::new(
            ScriptedAssistant::new(vec![
                RunStatus::Queued,
                RunStatus::InProgress,
                RunStatus::Failed,
            ])
            .with_reply(Some(assistant_message("never seen"))),
        );

        let err = orchestrator(&api, &store)
            .reply(&inbound("c1", "hello"), None, &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            RelayError::RunFailed { reason, .. } => assert!(reason.contains("overloaded")),
            other => panic!("expected RunFailed, got {other:?}"),
        }
        assert_eq!(api.count("get_run"), 3);
        assert_eq!(api.count("latest_message"), 0);
        assert_eq!(store.turn_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_and_cancelled_runs_are_failures() {
        for status in [RunStatus::Expired, RunStatus::Cancelled] {
            let store = seeded_store().await;
            let api = Arc::new(ScriptedAssistant::new(vec![status]));
            let err = orchestrator(&api, &store)
                .reply(&inbound("c1", "hello"), None, &CancellationToken::new())
                .await
                .unwrap_err();
            assert!(matches!(err, RelayError::RunFailed { .. }));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_status_keeps_polling() {
        let store = seeded_store().await;
        let api = Arc::new(
            ScriptedAssistant::new(vec![
                RunStatus::Other("requires_action".into()),
                RunStatus::Other("cancelling".into()),
                RunStatus::Completed,
            ])
            .with_reply(Some(assistant_message("done"))),
        );

        let reply = orchestrator(&api, &store)
            .reply(&inbound("c1", "hello"), None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(reply, "done");
        assert_eq!(api.count("get_run"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_interval_is_respected() {
        let store = seeded_store().await;
        let api = Arc::new(
            ScriptedAssistant::new(vec![
                RunStatus::Queued,
                RunStatus::Queued,
                RunStatus::Queued,
                RunStatus::Completed,
            ])
            .with_reply(Some(assistant_message("done"))),
        );

        let started = Instant::now();
        orchestrator(&api, &store)
            .reply(&inbound("c1", "hello"), None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(started.elapsed(), Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn endless_run_times_out() {
        let store = seeded_store().await;
        let api = Arc::new(ScriptedAssistant::new(vec![RunStatus::InProgress]));

        let started = Instant::now();
        let err = orchestrator(&api, &store)
            .with_run_timeout(Duration::from_secs(5))
            .reply(&inbound("c1", "hello"), None, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, RelayError::RunTimedOut { waited_secs: 5, .. }));
        assert!(started.elapsed() <= Duration::from_secs(5));
        assert_eq!(api.count("latest_message"), 0);
        assert_eq!(store.turn_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_polling() {
        let store = seeded_store().await;
        let api = Arc::new(ScriptedAssistant::new(vec![RunStatus::InProgress]));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1200)).await;
            trigger.cancel();
        });

        let err = orchestrator(&api, &store)
            .reply(&inbound("c1", "hello"), None, &cancel)
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(api.count("get_run"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_thread_is_empty_reply() {
        let store = seeded_store().await;
        let api = Arc::new(ScriptedAssistant::new(vec![RunStatus::Completed]).with_reply(None));

        let err = orchestrator(&api, &store)
            .reply(&inbound("c1", "hello"), None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::EmptyReply { .. }));
        assert_eq!(store.turn_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reply_without_text_is_empty_reply() {
        let store = seeded_store().await;
        let api = Arc::new(ScriptedAssistant::new(vec![RunStatus::Completed]).with_reply(Some(
            ThreadMessage {
                id: "msg_1".into(),
                role: "assistant".into(),
                text: None,
            },
        )));

        let err = orchestrator(&api, &store)
            .reply(&inbound("c1", "hello"), None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::EmptyReply { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn reply_returned_even_when_persistence_fails() {
        let store = seeded_store().await;
        store.fail_turn_writes(true);
        let api = Arc::new(ScriptedAssistant::replying("Still here."));

        let reply = orchestrator(&api, &store)
            .reply(&inbound("c1", "hello"), None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(reply, "Still here.");
        assert_eq!(store.turn_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_to_bind_thread_is_fatal() {
        let store = seeded_store().await;
        store.fail_binding_writes(true);
        let api = Arc::new(ScriptedAssistant::replying("ok"));

        let err = orchestrator(&api, &store)
            .reply(&inbound("c1", "hello"), None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Persistence(_)));
        assert_eq!(api.calls(), ["create_thread"]);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failure_propagates() {
        let store = seeded_store().await;
        let api = Arc::new(ScriptedAssistant::replying("ok").failing("create_run"));

        let err = orchestrator(&api, &store)
            .reply(&inbound("c1", "hello"), None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Transport(_)));
        assert_eq!(store.turn_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_first_messages_share_one_thread() {
        let store = seeded_store().await;
        let api = Arc::new(
            ScriptedAssistant::new(vec![RunStatus::Queued, RunStatus::Completed])
                .with_reply(Some(assistant_message("ok"))),
        );
        let orch = Arc::new(orchestrator(&api, &store));

        let handles: Vec<_> = ["first", "second"]
            .into_iter()
            .map(|text| {
                let orch = orch.clone();
                tokio::spawn(async move {
                    orch.reply(&inbound("c1", text), None, &CancellationToken::new())
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(api.count("create_thread"), 1);
        assert_eq!(store.turn_count().await, 4);
    }

    #[tokio::test]
    async fn completion_mode_folds_history() {
        let store = seeded_store().await;
        store
            .save_turn_pair(
                &Turn::user("c1", OWNER, "is it available?", 100),
                &Turn::assistant("c1", OWNER, "yes", 101),
            )
            .await
            .unwrap();
        let api = Arc::new(ScriptedAssistant::new(vec![]).with_completion("Delivery is free."));

        let reply = AssistantOrchestrator::new(api.clone(), store.clone())
            .with_mode(ReplyMode::Completion)
            .with_model("gpt-4o-mini", 0.2)
            .with_history("You sell furniture.", 5)
            .reply(&inbound("c1", "delivery?"), Some(&listing()), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(reply, "Delivery is free.");
        let request = &api.completions()[0];
        assert_eq!(request.model, "gpt-4o-mini");
        let contents: Vec<&str> = request.messages.iter().map(|m| m.content.as_str()).collect();
        // Not the first message: no listing prefix
        assert_eq!(
            contents,
            ["You sell furniture.", "is it available?", "yes", "delivery?"]
        );
        assert_eq!(api.count("create_thread"), 0);
        assert_eq!(store.turn_count().await, 4);
    }

    #[tokio::test]
    async fn completion_mode_first_message_gets_context() {
        let store = Arc::new(InMemoryStore::new());
        let api = Arc::new(ScriptedAssistant::new(vec![]).with_completion("Hi!"));

        AssistantOrchestrator::new(api.clone(), store.clone())
            .with_mode(ReplyMode::Completion)
            .reply(&inbound("c1", "hello"), Some(&listing()), &CancellationToken::new())
            .await
            .unwrap();

        let request = &api.completions()[0];
        let last = request.messages.last().unwrap();
        assert!(last.content.starts_with("Message about listing \"Leather sofa\""));
        assert_eq!(store.turns("c1").await[0].content, "hello");
    }

    #[tokio::test]
    async fn completion_mode_degrades_without_history() {
        let store = seeded_store().await;
        store.fail_history_reads(true);
        let api = Arc::new(ScriptedAssistant::new(vec![]).with_completion("Hi!"));

        let reply = AssistantOrchestrator::new(api.clone(), store.clone())
            .with_mode(ReplyMode::Completion)
            .reply(&inbound("c1", "hello"), Some(&listing()), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(reply, "Hi!");
        let request = &api.completions()[0];
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[1].content, "hello");
    }

    #[test]
    fn listing_prefix_format() {
        assert_eq!(
            with_listing_context("hi", Some(&listing())),
            "Message about listing \"Leather sofa\" (12 000 ₽): hi"
        );
        assert_eq!(with_listing_context("hi", Some(&ChatContext::default())), "hi");
        assert_eq!(with_listing_context("hi", None), "hi");
    }
}
