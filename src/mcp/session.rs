//! Session Registry
//!
//! Sessions are created by `initialize`, looked up by the `mcp-session-id`
//! header, and bound once to a [`SessionChannel`] whose worker processes that
//! session's requests strictly in arrival order. The registry is the only
//! shared mutable state on the request path; all mutation goes through its
//! methods under a single lock.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use jsonrpc_core::types::request::Call;
use jsonrpc_core::types::response::Output;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("session '{0}' not found")]
    NotFound(String),

    #[error("session '{0}' already has a bound channel")]
    AlreadyBound(String),

    #[error("session '{0}' has no bound channel")]
    NotBound(String),

    #[error("session '{0}' is closed")]
    Closed(String),
}

/// Identity of a session, handed to tool handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub id: String,
    pub created_at: DateTime<Utc>,
}

impl SessionContext {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created_at: Utc::now(),
        }
    }
}

/// How responses on a session are framed, fixed at initialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    /// One `application/json` body per HTTP request.
    Json,
    /// A short-lived `text/event-stream` per HTTP request.
    Stream,
}

/// A batch of calls queued on a session, with the slot for its responses.
pub struct SessionJob {
    pub calls: Vec<Call>,
    pub reply: oneshot::Sender<Vec<Output>>,
}

/// Queue into a session's worker task.
pub struct SessionChannel {
    jobs: mpsc::Sender<SessionJob>,
    worker: JoinHandle<()>,
}

impl SessionChannel {
    pub fn new(jobs: mpsc::Sender<SessionJob>, worker: JoinHandle<()>) -> Self {
        Self { jobs, worker }
    }
}

enum ChannelState {
    Unbound,
    Bound(SessionChannel),
    Closed,
}

pub struct Session {
    context: SessionContext,
    mode: ResponseMode,
    channel: Mutex<ChannelState>,
    last_active: Mutex<Instant>,
}

impl Session {
    fn new(id: String, mode: ResponseMode) -> Self {
        Self {
            context: SessionContext::new(id),
            mode,
            channel: Mutex::new(ChannelState::Unbound),
            last_active: Mutex::new(Instant::now()),
        }
    }

    pub fn id(&self) -> &str {
        &self.context.id
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn mode(&self) -> ResponseMode {
        self.mode
    }

    pub fn last_active(&self) -> Instant {
        *self.last_active.lock()
    }

    fn touch(&self) {
        *self.last_active.lock() = Instant::now();
    }

    /// Attach the channel serving this session. A session is bound at most once.
    pub fn bind(&self, channel: SessionChannel) -> Result<(), SessionError> {
        let mut state = self.channel.lock();
        match *state {
            ChannelState::Unbound => {
                *state = ChannelState::Bound(channel);
                Ok(())
            }
            ChannelState::Bound(_) => Err(SessionError::AlreadyBound(self.id().to_string())),
            ChannelState::Closed => Err(SessionError::Closed(self.id().to_string())),
        }
    }

    /// Queue calls behind any earlier work on this session and wait for their
    /// responses.
    pub async fn submit(&self, calls: Vec<Call>) -> Result<Vec<Output>, SessionError> {
        let jobs = match &*self.channel.lock() {
            ChannelState::Bound(channel) => channel.jobs.clone(),
            ChannelState::Unbound => return Err(SessionError::NotBound(self.id().to_string())),
            ChannelState::Closed => return Err(SessionError::Closed(self.id().to_string())),
        };
        self.touch();

        let (reply, response) = oneshot::channel();
        jobs.send(SessionJob { calls, reply })
            .await
            .map_err(|_| SessionError::Closed(self.id().to_string()))?;
        response
            .await
            .map_err(|_| SessionError::Closed(self.id().to_string()))
    }

    /// Stop accepting work and wait for the worker to drain its queue.
    pub async fn close(&self) {
        if let Some(worker) = self.shut() {
            drain_worker(self.id().to_string(), worker).await;
        }
    }

    /// Stop accepting work without waiting. Returns the worker still draining
    /// queued jobs, if the session was bound.
    fn shut(&self) -> Option<JoinHandle<()>> {
        let previous = std::mem::replace(&mut *self.channel.lock(), ChannelState::Closed);
        match previous {
            ChannelState::Bound(SessionChannel { jobs, worker }) => {
                drop(jobs);
                Some(worker)
            }
            ChannelState::Unbound | ChannelState::Closed => None,
        }
    }
}

/// Live sessions keyed by identifier.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    max_sessions: usize,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_sessions: max_sessions.max(1),
        }
    }

    /// Register a fresh session under a random v4 UUID. At capacity, the
    /// least recently active session is evicted first.
    pub async fn create(&self, mode: ResponseMode) -> Arc<Session> {
        let (session, evicted) = {
            let mut sessions = self.sessions.write();
            let evicted = if sessions.len() >= self.max_sessions {
                let oldest = sessions
                    .values()
                    .min_by_key(|session| session.last_active())
                    .map(|session| session.id().to_string());
                oldest.and_then(|id| sessions.remove(&id))
            } else {
                None
            };

            let session = loop {
                let id = Uuid::new_v4().to_string();
                if let Entry::Vacant(slot) = sessions.entry(id.clone()) {
                    let session = Arc::new(Session::new(id, mode));
                    slot.insert(session.clone());
                    break session;
                }
            };
            (session, evicted)
        };

        tracing::info!(session_id = %session.id(), mode = ?mode, "session created");
        if let Some(evicted) = evicted {
            tracing::info!(session_id = %evicted.id(), "session evicted at capacity");
            // The new client must not wait on an unrelated session's queue.
            if let Some(worker) = evicted.shut() {
                tokio::spawn(drain_worker(evicted.id().to_string(), worker));
            }
        }
        session
    }

    /// Find a live session and mark it active.
    pub fn lookup(&self, id: &str) -> Result<Arc<Session>, SessionError> {
        let session = self
            .sessions
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        session.touch();
        Ok(session)
    }

    pub fn bind(&self, id: &str, channel: SessionChannel) -> Result<(), SessionError> {
        let sessions = self.sessions.write();
        let session = sessions
            .get(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        session.bind(channel)
    }

    /// Remove a session and close its channel.
    pub async fn evict(&self, id: &str) -> Result<(), SessionError> {
        let session = self
            .sessions
            .write()
            .remove(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        tracing::info!(session_id = %id, "session evicted");
        session.close().await;
        Ok(())
    }

    /// Evict every session idle for longer than `ttl`. Returns how many went.
    pub async fn evict_idle(&self, ttl: Duration) -> usize {
        let expired: Vec<Arc<Session>> = {
            let mut sessions = self.sessions.write();
            let ids: Vec<String> = sessions
                .values()
                .filter(|session| session.last_active().elapsed() > ttl)
                .map(|session| session.id().to_string())
                .collect();
            ids.iter().filter_map(|id| sessions.remove(id)).collect()
        };

        for session in &expired {
            tracing::info!(session_id = %session.id(), "idle session evicted");
            session.close().await;
        }
        expired.len()
    }

    /// Close every session; used on shutdown.
    pub async fn close_all(&self) {
        let sessions: Vec<Arc<Session>> = self.sessions.write().drain().map(|(_, s)| s).collect();
        let count = sessions.len();
        futures::future::join_all(sessions.iter().map(|session| session.close())).await;
        tracing::info!(count, "all sessions closed");
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

async fn drain_worker(session_id: String, worker: JoinHandle<()>) {
    if let Err(err) = worker.await {
        tracing::error!(session_id = %session_id, error = %err, "session worker failed");
    }
}

/// Periodically evict idle sessions. A zero `idle_timeout` disables eviction.
pub fn spawn_idle_sweeper(
    registry: Arc<SessionRegistry>,
    idle_timeout: Duration,
    sweep_interval: Duration,
) -> Option<JoinHandle<()>> {
    if idle_timeout.is_zero() || sweep_interval.is_zero() {
        return None;
    }
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let evicted = registry.evict_idle(idle_timeout).await;
            if evicted > 0 {
                tracing::debug!(evicted, remaining = registry.len(), "idle sweep finished");
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonrpc_core::{Id, Value, Version};

    /// Worker that answers every call with its own id as the result.
    fn echo_channel() -> SessionChannel {
        let (tx, mut rx) = mpsc::channel::<SessionJob>(8);
        let worker = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let outputs = job
                    .calls
                    .into_iter()
                    .filter_map(|call| match call {
                        Call::MethodCall(call) => Some(crate::mcp::types::success_output(
                            call.id.clone(),
                            serde_json::to_value(&call.id).unwrap_or(Value::Null),
                        )),
                        _ => None,
                    })
                    .collect();
                let _ = job.reply.send(outputs);
            }
        });
        SessionChannel::new(tx, worker)
    }

    fn ping(id: u64) -> Call {
        Call::MethodCall(jsonrpc_core::MethodCall {
            jsonrpc: Some(Version::V2),
            method: "ping".into(),
            params: jsonrpc_core::Params::None,
            id: Id::Num(id),
        })
    }

    #[tokio::test]
    async fn created_sessions_are_registered_and_found() {
        let registry = SessionRegistry::new(16);
        let session = registry.create(ResponseMode::Json).await;
        assert!(Uuid::parse_str(session.id()).is_ok());
        assert!(registry.lookup(session.id()).is_ok());
        assert_eq!(
            registry.lookup("nope").err(),
            Some(SessionError::NotFound("nope".into()))
        );
    }

    #[tokio::test]
    async fn channel_binds_once() {
        let registry = SessionRegistry::new(16);
        let session = registry.create(ResponseMode::Json).await;
        registry.bind(session.id(), echo_channel()).unwrap();
        let err = registry.bind(session.id(), echo_channel()).unwrap_err();
        assert!(matches!(err, SessionError::AlreadyBound(_)));
    }

    #[tokio::test]
    async fn submit_requires_a_bound_channel() {
        let registry = SessionRegistry::new(16);
        let session = registry.create(ResponseMode::Json).await;
        let err = session.submit(vec![ping(1)]).await.unwrap_err();
        assert!(matches!(err, SessionError::NotBound(_)));

        session.bind(echo_channel()).unwrap();
        let outputs = session.submit(vec![ping(1), ping(2)]).await.unwrap();
        assert_eq!(outputs.len(), 2);
    }

    #[tokio::test]
    async fn evicted_session_rejects_further_work() {
        let registry = SessionRegistry::new(16);
        let session = registry.create(ResponseMode::Json).await;
        session.bind(echo_channel()).unwrap();

        registry.evict(session.id()).await.unwrap();
        assert!(!registry.contains(session.id()));
        assert!(matches!(
            session.submit(vec![ping(1)]).await,
            Err(SessionError::Closed(_))
        ));
        assert!(matches!(
            registry.evict(session.id()).await,
            Err(SessionError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn capacity_evicts_least_recently_active() {
        let registry = SessionRegistry::new(2);
        let first = registry.create(ResponseMode::Json).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = registry.create(ResponseMode::Json).await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        // Touching the first makes the second the eviction candidate.
        registry.lookup(first.id()).unwrap();
        let third = registry.create(ResponseMode::Json).await;

        assert_eq!(registry.len(), 2);
        assert!(registry.contains(first.id()));
        assert!(!registry.contains(second.id()));
        assert!(registry.contains(third.id()));
    }

    #[tokio::test]
    async fn creation_at_capacity_does_not_wait_for_the_evicted_queue() {
        let registry = SessionRegistry::new(1);
        let busy = registry.create(ResponseMode::Json).await;
        let (tx, mut rx) = mpsc::channel::<SessionJob>(8);
        let worker = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                tokio::time::sleep(Duration::from_secs(2)).await;
                let _ = job.reply.send(Vec::new());
            }
        });
        busy.bind(SessionChannel::new(tx, worker)).unwrap();

        let in_flight = {
            let busy = busy.clone();
            tokio::spawn(async move { busy.submit(vec![ping(1)]).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let started = Instant::now();
        let fresh = registry.create(ResponseMode::Json).await;
        assert!(
            started.elapsed() < Duration::from_millis(500),
            "create waited {:?}",
            started.elapsed()
        );
        assert!(registry.contains(fresh.id()));
        assert!(!registry.contains(busy.id()));

        // The evicted session refuses new work at once but finishes what it had.
        assert!(matches!(
            busy.submit(vec![ping(2)]).await,
            Err(SessionError::Closed(_))
        ));
        assert!(in_flight.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn idle_sessions_are_swept() {
        let registry = SessionRegistry::new(16);
        let stale = registry.create(ResponseMode::Json).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        let fresh = registry.create(ResponseMode::Json).await;

        assert_eq!(registry.evict_idle(Duration::from_millis(20)).await, 1);
        assert!(!registry.contains(stale.id()));
        assert!(registry.contains(fresh.id()));
    }

    #[tokio::test]
    async fn zero_idle_timeout_disables_sweeper() {
        let registry = Arc::new(SessionRegistry::new(16));
        assert!(spawn_idle_sweeper(registry, Duration::ZERO, Duration::from_secs(1)).is_none());
    }

    #[tokio::test]
    async fn close_all_drains_registry() {
        let registry = SessionRegistry::new(16);
        for _ in 0..3 {
            let session = registry.create(ResponseMode::Stream).await;
            session.bind(echo_channel()).unwrap();
        }
        registry.close_all().await;
        assert!(registry.is_empty());
    }
}
