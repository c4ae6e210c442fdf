use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    dao::{poll_store::PollStore, storage::StorageError},
    services::expiry_service,
    state::SharedState,
};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Reconnect to the storage backend and keep the shared state in degraded mode when it is unavailable.
pub async fn run<F, Fut>(state: SharedState, mut connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn PollStore>, StorageError>> + Send,
{
    let mut delay = INITIAL_DELAY;

    loop {
        match connect().await {
            Ok(store) => {
                state.set_poll_store(store.clone()).await;
                info!("storage connection established; leaving degraded mode");
                rearm_until_done(&state, store.clone()).await;
                delay = INITIAL_DELAY;

                if !watch_health(&state, store.as_ref()).await {
                    warn!("exhausted storage reconnect attempts; dropping the connection");
                    state.clear_poll_store().await;
                }

                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
            Err(err) => {
                warn!(error = %err, "storage connection attempt failed");
                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
        }
    }
}

/// Arm timers for the polls left open in `store`, retrying until the listing succeeds.
async fn rearm_until_done(state: &SharedState, store: Arc<dyn PollStore>) {
    let mut delay = INITIAL_DELAY;
    loop {
        match expiry_service::rearm_open_polls(state, store.clone()).await {
            Ok(_) => return,
            Err(err) => {
                warn!(error = %err, "failed to re-arm open poll timers; retrying");
                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
        }
    }
}

/// Health-check `store` until it fails for good, returning `false` at that point.
async fn watch_health(state: &SharedState, store: &dyn PollStore) -> bool {
    loop {
        match store.health_check().await {
            Ok(()) => {
                if state.is_degraded() {
                    info!("storage healthy again; leaving degraded mode");
                    state.update_degraded(false);
                }
                sleep(HEALTH_POLL_INTERVAL).await;
            }
            Err(err) => {
                warn!(error = %err, "storage health check failed");
                if !reconnect(state, store).await {
                    return false;
                }
                state.update_degraded(false);
                sleep(HEALTH_POLL_INTERVAL).await;
            }
        }
    }
}

async fn reconnect(state: &SharedState, store: &dyn PollStore) -> bool {
    let mut reconnect_delay = INITIAL_DELAY;

    for attempt in 0..MAX_RECONNECT_ATTEMPTS {
        match store.try_reconnect().await {
            Ok(()) => {
                info!(attempt, "storage reconnection succeeded after health check failure");
                return true;
            }
            Err(err) => {
                if attempt == 0 {
                    warn!(
                        attempt, error = %err,
                        "storage reconnect first attempt failed; entering in degraded mode"
                    );
                    state.update_degraded(true);
                } else {
                    warn!(attempt, error = %err, "storage reconnect attempt failed");
                }
                sleep(reconnect_delay).await;
                reconnect_delay = (reconnect_delay * 2).min(MAX_DELAY);
            }
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::AppConfig,
        dao::{models::PollEntity, poll_store::memory::MemoryPollStore},
        state::AppState,
    };

    #[tokio::test(start_paused = true)]
    async fn installs_the_store_after_failed_attempts() {
        let state = AppState::new(AppConfig::default());
        let store = MemoryPollStore::new();
        let poll = PollEntity::open(
            "lunch",
            Duration::from_secs(600),
            std::time::SystemTime::now(),
        );
        store.create_open_poll(poll.clone()).await.unwrap();

        let mut failures = 2;
        let candidate = store.clone();
        let supervisor = tokio::spawn(run(state.clone(), move || {
            let outcome = if failures > 0 {
                failures -= 1;
                Err(StorageError::Unsupported { backend: "flaky" })
            } else {
                Ok(Arc::new(candidate.clone()) as Arc<dyn PollStore>)
            };
            async move { outcome }
        }));

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(!state.is_degraded());
        assert!(state.poll_store().await.is_some());
        assert!(state.scheduler().is_armed(poll.id));

        supervisor.abort();
    }
}
