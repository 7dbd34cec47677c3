//! The dispatch boundary between callers and the agent loop.
//!
//! A request names a task and optionally a session. The dispatcher picks the
//! conversation it belongs to, makes sure only one cycle runs on that
//! conversation at a time, and bounds the cycle with the request timeout.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use taskloop_agent::AgentLoop;
use taskloop_config::{BusyPolicy, ConversationScope};
use taskloop_core::conversation::{ConversationStore, DEFAULT_WINDOW};
use taskloop_core::error::{Error, Result};
use taskloop_core::message::ConversationId;
use taskloop_core::tool::{ToolCatalog, ToolDescriptor};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Conversation id used when every request shares one conversation.
pub const SHARED_CONVERSATION: &str = "default";

/// Conversations kept in memory before idle ones are evicted.
pub const DEFAULT_MAX_CONVERSATIONS: usize = 1000;

/// A task submitted by a caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopRequest {
    pub task: String,

    /// Session to continue; only meaningful with per-session scope
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
}

impl LoopRequest {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            session: None,
        }
    }

    pub fn in_session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }
}

/// The final answer for a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopResponse {
    pub answer: String,
    pub conversation_id: String,
}

type SharedStore = Arc<Mutex<ConversationStore>>;

/// Routes requests to conversations and runs the agent loop on them.
pub struct Dispatcher {
    agent: Arc<AgentLoop>,
    catalog: Arc<dyn ToolCatalog>,
    scope: ConversationScope,
    busy_policy: BusyPolicy,
    window: usize,
    max_conversations: usize,
    request_timeout: Option<Duration>,
    conversations: RwLock<HashMap<String, SharedStore>>,
}

impl Dispatcher {
    /// Shared scope, queueing, no request timeout.
    pub fn new(agent: Arc<AgentLoop>, catalog: Arc<dyn ToolCatalog>) -> Self {
        Self {
            agent,
            catalog,
            scope: ConversationScope::Shared,
            busy_policy: BusyPolicy::Queue,
            window: DEFAULT_WINDOW,
            max_conversations: DEFAULT_MAX_CONVERSATIONS,
            request_timeout: None,
            conversations: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_scope(mut self, scope: ConversationScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_busy_policy(mut self, policy: BusyPolicy) -> Self {
        self.busy_policy = policy;
        self
    }

    /// Number of history entries shown to the model for new conversations.
    pub fn with_history_window(mut self, window: usize) -> Self {
        self.window = window.max(1);
        self
    }

    /// Bound on stored conversations. Past it, the least recently updated
    /// idle conversation is dropped to make room for a new one.
    pub fn with_max_conversations(mut self, max: usize) -> Self {
        self.max_conversations = max.max(1);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Run one task to completion.
    ///
    /// Fails with [`Error::Busy`] under the reject policy when the conversation
    /// is already running, [`Error::Timeout`] when the request timeout expires
    /// and [`Error::Cancelled`] when `cancel` fires.
    pub async fn submit(&self, request: LoopRequest, cancel: CancellationToken) -> Result<LoopResponse> {
        let conversation_id = self.resolve(request.session.as_deref());

        // The timer cancels a child token so the loop unwinds through its own cleanup
        let run_token = cancel.child_token();
        let timer = self.request_timeout.map(|limit| {
            let token = run_token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                token.cancel();
            })
        });

        let outcome = self
            .run_cycle(&conversation_id, &request.task, &run_token)
            .await;

        if let Some(timer) = timer {
            timer.abort();
        }

        match outcome {
            Ok(answer) => Ok(LoopResponse {
                answer,
                conversation_id,
            }),
            Err(Error::Cancelled) if !cancel.is_cancelled() => {
                let timeout_secs = self.request_timeout.map_or(0, |t| t.as_secs());
                warn!(conversation_id = %conversation_id, timeout_secs, "Request timed out");
                Err(Error::Timeout { timeout_secs })
            }
            Err(e) => Err(e),
        }
    }

    async fn run_cycle(
        &self,
        conversation_id: &str,
        task: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        // A store reset or evicted while we waited for it is stale; start over
        let mut guard = loop {
            let store = self.store(conversation_id).await;
            let guard = self.acquire(conversation_id, store.clone(), cancel).await?;
            if self.is_current(conversation_id, &store).await {
                break guard;
            }
            debug!(conversation_id, "Conversation replaced while waiting, retrying");
        };

        self.agent.run(&mut guard, task, cancel).await
    }

    async fn is_current(&self, conversation_id: &str, store: &SharedStore) -> bool {
        self.conversations
            .read()
            .await
            .get(conversation_id)
            .is_some_and(|current| Arc::ptr_eq(current, store))
    }

    async fn acquire(
        &self,
        conversation_id: &str,
        store: SharedStore,
        cancel: &CancellationToken,
    ) -> Result<OwnedMutexGuard<ConversationStore>> {
        match self.busy_policy {
            BusyPolicy::Reject => store.try_lock_owned().map_err(|_| {
                debug!(conversation_id, "Rejecting request for busy conversation");
                Error::Busy(conversation_id.to_string())
            }),
            BusyPolicy::Queue => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(Error::Cancelled),
                    guard = store.lock_owned() => Ok(guard),
                }
            }
        }
    }

    fn resolve(&self, session: Option<&str>) -> String {
        match self.scope {
            ConversationScope::Shared => SHARED_CONVERSATION.to_string(),
            ConversationScope::PerSession => session
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| ConversationId::new().to_string()),
        }
    }

    async fn store(&self, conversation_id: &str) -> SharedStore {
        if let Some(store) = self.conversations.read().await.get(conversation_id) {
            return store.clone();
        }

        let mut conversations = self.conversations.write().await;
        if let Some(store) = conversations.get(conversation_id) {
            return store.clone();
        }
        if conversations.len() >= self.max_conversations {
            evict_idle(&mut conversations);
        }

        info!(conversation_id, "Starting conversation");
        let store = Arc::new(Mutex::new(ConversationStore::with_id(
            ConversationId::from(conversation_id),
            self.window,
        )));
        conversations.insert(conversation_id.to_string(), store.clone());
        store
    }

    /// A copy of a conversation, waiting for any running cycle to finish.
    pub async fn history(&self, conversation_id: &str) -> Option<ConversationStore> {
        let store = self.conversations.read().await.get(conversation_id).cloned()?;
        let snapshot = store.lock().await.clone();
        Some(snapshot)
    }

    /// Forget a conversation, waiting for any running cycle to finish first.
    /// Returns whether it existed.
    pub async fn reset(&self, conversation_id: &str) -> bool {
        let Some(store) = self.conversations.read().await.get(conversation_id).cloned() else {
            return false;
        };

        let _running = store.lock().await;
        let mut conversations = self.conversations.write().await;
        let removed = conversations
            .get(conversation_id)
            .is_some_and(|current| Arc::ptr_eq(current, &store));
        if removed {
            conversations.remove(conversation_id);
            info!(conversation_id, "Conversation reset");
        }
        removed
    }

    pub async fn conversation_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.conversations.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// The tools the model would be offered right now.
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        Ok(self.catalog.list_tools().await?)
    }
}

/// Drop the least recently updated conversation that has no cycle running.
fn evict_idle(conversations: &mut HashMap<String, SharedStore>) {
    let oldest = conversations
        .iter()
        .filter_map(|(id, store)| {
            let store = store.try_lock().ok()?;
            Some((id.clone(), store.updated_at()))
        })
        .min_by_key(|(_, updated_at)| *updated_at)
        .map(|(id, _)| id);

    match oldest {
        Some(id) => {
            conversations.remove(&id);
            debug!(conversation_id = %id, "Evicted idle conversation");
        }
        None => warn!(
            conversations = conversations.len(),
            "Conversation limit reached and none are idle"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{BlockingProvider, EchoProvider, agent_with};
    use taskloop_core::message::Message;

    fn dispatcher(provider: Arc<dyn taskloop_core::provider::Provider>) -> Dispatcher {
        let (agent, catalog) = agent_with(provider);
        Dispatcher::new(agent, catalog)
    }

    #[tokio::test]
    async fn shared_scope_uses_one_conversation() {
        let d = dispatcher(Arc::new(EchoProvider));

        let first = d
            .submit(LoopRequest::new("first").in_session("a"), CancellationToken::new())
            .await
            .unwrap();
        let second = d
            .submit(LoopRequest::new("second").in_session("b"), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(first.conversation_id, SHARED_CONVERSATION);
        assert_eq!(second.conversation_id, SHARED_CONVERSATION);
        assert_eq!(second.answer, "answer to: second");

        let history = d.history(SHARED_CONVERSATION).await.unwrap();
        assert_eq!(history.len(), 4);
        assert_eq!(history.messages()[2], Message::user("second"));
    }

    #[tokio::test]
    async fn per_session_scope_separates_conversations() {
        let d = dispatcher(Arc::new(EchoProvider)).with_scope(ConversationScope::PerSession);

        let a = d
            .submit(LoopRequest::new("one").in_session("alice"), CancellationToken::new())
            .await
            .unwrap();
        let anon1 = d
            .submit(LoopRequest::new("two"), CancellationToken::new())
            .await
            .unwrap();
        let anon2 = d
            .submit(LoopRequest::new("three"), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(a.conversation_id, "alice");
        assert_ne!(anon1.conversation_id, anon2.conversation_id);
        assert_eq!(d.conversation_ids().await.len(), 3);
        assert_eq!(d.history("alice").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn reject_policy_refuses_concurrent_request() {
        let provider = Arc::new(BlockingProvider::new());
        let d = Arc::new(
            dispatcher(provider.clone()).with_busy_policy(BusyPolicy::Reject),
        );

        let running = {
            let d = d.clone();
            tokio::spawn(async move {
                d.submit(LoopRequest::new("slow"), CancellationToken::new()).await
            })
        };
        provider.wait_entered().await;

        let err = d
            .submit(LoopRequest::new("impatient"), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Busy(ref id) if id == SHARED_CONVERSATION));

        provider.release();
        let done = running.await.unwrap().unwrap();
        assert_eq!(done.answer, "released");
        // The rejected task never touched the history
        assert_eq!(d.history(SHARED_CONVERSATION).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn queue_policy_serializes_requests() {
        let provider = Arc::new(BlockingProvider::new());
        let d = Arc::new(dispatcher(provider.clone()));

        let first = {
            let d = d.clone();
            tokio::spawn(async move {
                d.submit(LoopRequest::new("first"), CancellationToken::new()).await
            })
        };
        provider.wait_entered().await;

        let second = {
            let d = d.clone();
            tokio::spawn(async move {
                d.submit(LoopRequest::new("second"), CancellationToken::new()).await
            })
        };

        provider.release();
        first.await.unwrap().unwrap();
        provider.wait_entered().await;
        provider.release();
        second.await.unwrap().unwrap();

        let history = d.history(SHARED_CONVERSATION).await.unwrap();
        assert_eq!(
            history.messages(),
            &[
                Message::user("first"),
                Message::assistant("released"),
                Message::user("second"),
                Message::assistant("released"),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn request_timeout_is_reported_as_timeout() {
        let provider = Arc::new(BlockingProvider::new());
        let d = dispatcher(provider).with_request_timeout(Some(Duration::from_secs(5)));

        let err = d
            .submit(LoopRequest::new("never ends"), CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Timeout { timeout_secs: 5 }));
        let history = d.history(SHARED_CONVERSATION).await.unwrap();
        assert!(!history.has_pending_calls());
    }

    #[tokio::test]
    async fn external_cancellation_is_reported_as_cancelled() {
        let provider = Arc::new(BlockingProvider::new());
        let d = dispatcher(provider.clone()).with_request_timeout(Some(Duration::from_secs(300)));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        let waiter = provider.clone();
        tokio::spawn(async move {
            waiter.wait_entered().await;
            trigger.cancel();
        });

        let err = d.submit(LoopRequest::new("task"), cancel).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test]
    async fn reset_forgets_conversation() {
        let d = dispatcher(Arc::new(EchoProvider));
        d.submit(LoopRequest::new("hi"), CancellationToken::new())
            .await
            .unwrap();

        assert!(d.reset(SHARED_CONVERSATION).await);
        assert!(d.history(SHARED_CONVERSATION).await.is_none());
        assert!(!d.reset(SHARED_CONVERSATION).await);
    }

    #[tokio::test]
    async fn reset_waits_for_running_cycle() {
        let provider = Arc::new(BlockingProvider::new());
        let d = Arc::new(
            dispatcher(provider.clone()).with_busy_policy(BusyPolicy::Reject),
        );

        let running = {
            let d = d.clone();
            tokio::spawn(async move {
                d.submit(LoopRequest::new("first"), CancellationToken::new()).await
            })
        };
        provider.wait_entered().await;

        let reset = {
            let d = d.clone();
            tokio::spawn(async move { d.reset(SHARED_CONVERSATION).await })
        };
        tokio::task::yield_now().await;

        // The conversation is still busy, so a second cycle cannot start
        let err = d
            .submit(LoopRequest::new("second"), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Busy(ref id) if id == SHARED_CONVERSATION));

        provider.release();
        assert_eq!(running.await.unwrap().unwrap().answer, "released");
        assert!(reset.await.unwrap());
        assert!(d.history(SHARED_CONVERSATION).await.is_none());
    }

    #[tokio::test]
    async fn anonymous_sessions_are_bounded() {
        let d = dispatcher(Arc::new(EchoProvider))
            .with_scope(ConversationScope::PerSession)
            .with_max_conversations(3);

        for i in 0..10 {
            d.submit(LoopRequest::new(format!("task {i}")), CancellationToken::new())
                .await
                .unwrap();
        }

        assert_eq!(d.conversation_ids().await.len(), 3);
    }

    #[test]
    fn eviction_skips_busy_conversations() {
        let store = |id: &str| -> SharedStore {
            Arc::new(Mutex::new(ConversationStore::with_id(
                ConversationId::from(id),
                DEFAULT_WINDOW,
            )))
        };
        let busy = store("busy");
        let mut conversations = HashMap::from([
            ("busy".to_string(), busy.clone()),
            ("idle".to_string(), store("idle")),
        ]);

        let _running = busy.try_lock().unwrap();
        evict_idle(&mut conversations);

        assert!(conversations.contains_key("busy"));
        assert!(!conversations.contains_key("idle"));
    }

    #[tokio::test]
    async fn lists_catalog_tools() {
        let d = dispatcher(Arc::new(EchoProvider));
        let tools = d.list_tools().await.unwrap();
        assert_eq!(tools[0].name, "echo");
    }
}
