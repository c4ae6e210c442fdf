pub mod lifecycle;
pub mod scheduler;
mod sse;
pub mod tally;

use std::sync::Arc;

use tokio::sync::{Mutex, RwLock, mpsc, watch};

use crate::{
    config::AppConfig,
    dao::{models::PollId, poll_store::PollStore},
    error::ServiceError,
    services::{announcer::Announcer, sse_events},
};

pub use self::sse::SseHub;
use self::{lifecycle::PollLifecycle, scheduler::Scheduler, sse::SseState};

pub type SharedState = Arc<AppState>;

/// Central application state shared by the routes and the background workers.
pub struct AppState {
    config: AppConfig,
    poll_store: RwLock<Option<Arc<dyn PollStore>>>,
    sse: SseState,
    announcer: Arc<dyn Announcer>,
    scheduler: Scheduler,
    expirations: Mutex<Option<mpsc::UnboundedReceiver<PollId>>>,
    degraded: watch::Sender<bool>,
}

impl AppState {
    /// Construct a new [`AppState`] announcing results on the public SSE stream.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig) -> SharedState {
        let sse = SseState::new(config.sse_capacity, config.sse_capacity);
        let announcer: Arc<dyn Announcer> = sse.public().clone();
        Self::build(config, sse, announcer)
    }

    /// Same as [`AppState::new`] with a custom results [`Announcer`].
    pub fn with_announcer(config: AppConfig, announcer: Arc<dyn Announcer>) -> SharedState {
        let sse = SseState::new(config.sse_capacity, config.sse_capacity);
        Self::build(config, sse, announcer)
    }

    fn build(config: AppConfig, sse: SseState, announcer: Arc<dyn Announcer>) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        let (scheduler, expirations) = Scheduler::new();
        Arc::new(Self {
            config,
            poll_store: RwLock::new(None),
            sse,
            announcer,
            scheduler,
            expirations: Mutex::new(Some(expirations)),
            degraded: degraded_tx,
        })
    }

    /// Runtime configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Obtain a handle to the current poll store, if one is installed.
    pub async fn poll_store(&self) -> Option<Arc<dyn PollStore>> {
        let guard = self.poll_store.read().await;
        guard.as_ref().cloned()
    }

    /// Current poll store, or [`ServiceError::Degraded`] when none is installed.
    pub async fn require_poll_store(&self) -> Result<Arc<dyn PollStore>, ServiceError> {
        self.poll_store().await.ok_or(ServiceError::Degraded)
    }

    /// Lifecycle bound to the current poll store.
    pub async fn lifecycle(&self) -> Result<PollLifecycle, ServiceError> {
        let store = self.require_poll_store().await?;
        Ok(PollLifecycle::new(store, self.config.max_store_attempts))
    }

    /// Install a new poll store implementation and leave degraded mode.
    pub async fn set_poll_store(&self, store: Arc<dyn PollStore>) {
        {
            let mut guard = self.poll_store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false);
    }

    /// Remove the current poll store and enter degraded mode.
    pub async fn clear_poll_store(&self) {
        {
            let mut guard = self.poll_store.write().await;
            guard.take();
        }
        self.update_degraded(true);
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Update the degraded flag, broadcasting a status event when the value changes.
    pub fn update_degraded(&self, value: bool) {
        let changed = self.degraded.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
        if !changed {
            return;
        }

        sse_events::broadcast_system_status(self.public_sse(), value);
    }

    /// Timers of the open polls.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Take the expiry channel fed by the scheduler; only the first caller gets it.
    pub async fn take_expirations(&self) -> Option<mpsc::UnboundedReceiver<PollId>> {
        self.expirations.lock().await.take()
    }

    /// Destination of closed poll results.
    pub fn announcer(&self) -> &dyn Announcer {
        self.announcer.as_ref()
    }

    /// Broadcast hub used for the public SSE stream.
    pub fn public_sse(&self) -> &SseHub {
        self.sse.public()
    }

    /// Broadcast hub used for the admin SSE stream.
    pub fn admin_sse(&self) -> &SseHub {
        self.sse.admin().hub()
    }

    /// Token guard that ensures a single admin SSE subscriber at a time.
    pub fn admin_token(&self) -> &Mutex<Option<String>> {
        self.sse.admin().token()
    }
}
