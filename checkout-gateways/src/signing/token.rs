//! Per-gateway cache for client-credentials bearer tokens.

use std::future::Future;
use std::time::Duration;

use tokio::sync::{RwLock, watch};
use tokio::time::Instant;

use checkout_types::GatewayError;

/// Tokens are refreshed this long before the provider says they expire.
pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::from_secs(60);

/// A freshly issued token and its advertised lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub value: String,
    pub expires_in: Duration,
}

type RefreshResult = Option<Result<String, GatewayError>>;

enum Slot {
    Empty,
    Fresh { value: String, refresh_at: Instant },
    /// A refresh is in flight; wait on the channel instead of fetching.
    Refreshing(watch::Receiver<RefreshResult>),
}

enum Action {
    Hit(String),
    Wait(watch::Receiver<RefreshResult>),
    Fetch(watch::Sender<RefreshResult>),
}

/// Double-checked token cache.
///
/// Readers take the read lock. On a miss exactly one caller marks the slot as
/// refreshing and performs the fetch with no lock held; concurrent callers
/// wait for that result. Fetch errors are handed to the waiters and leave the
/// slot empty.
pub struct TokenCache {
    slot: RwLock<Slot>,
    margin: Duration,
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new(DEFAULT_SAFETY_MARGIN)
    }
}

impl TokenCache {
    pub fn new(margin: Duration) -> Self {
        Self {
            slot: RwLock::new(Slot::Empty),
            margin,
        }
    }

    /// Returns the cached token, or runs `fetch` once to obtain a new one.
    pub async fn get_or_refresh<F, Fut>(&self, fetch: F) -> Result<String, GatewayError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<AccessToken, GatewayError>>,
    {
        {
            let slot = self.slot.read().await;
            if let Slot::Fresh { value, refresh_at } = &*slot {
                if Instant::now() < *refresh_at {
                    return Ok(value.clone());
                }
            }
        }

        let action = {
            let mut slot = self.slot.write().await;
            match &*slot {
                Slot::Fresh { value, refresh_at } if Instant::now() < *refresh_at => {
                    Action::Hit(value.clone())
                }
                Slot::Refreshing(rx) if rx.has_changed().is_ok() => Action::Wait(rx.clone()),
                _ => {
                    let (tx, rx) = watch::channel(None);
                    *slot = Slot::Refreshing(rx);
                    Action::Fetch(tx)
                }
            }
        };
        let tx = match action {
            Action::Hit(value) => return Ok(value),
            Action::Wait(rx) => return Self::wait_for(rx).await,
            Action::Fetch(tx) => tx,
        };

        let result = fetch().await;

        let mut slot = self.slot.write().await;
        let outcome = match result {
            Ok(token) => {
                let ttl = token.expires_in.saturating_sub(self.margin);
                *slot = Slot::Fresh {
                    value: token.value.clone(),
                    refresh_at: Instant::now() + ttl,
                };
                Ok(token.value)
            }
            Err(e) => {
                *slot = Slot::Empty;
                Err(e)
            }
        };
        drop(slot);
        let _ = tx.send(Some(outcome.clone()));
        outcome
    }

    /// Drops the cached token, for example after the provider rejected it.
    pub async fn invalidate(&self) {
        let mut slot = self.slot.write().await;
        if matches!(*slot, Slot::Fresh { .. }) {
            *slot = Slot::Empty;
        }
    }

    pub async fn is_cached(&self) -> bool {
        match &*self.slot.read().await {
            Slot::Fresh { refresh_at, .. } => Instant::now() < *refresh_at,
            _ => false,
        }
    }

    async fn wait_for(mut rx: watch::Receiver<RefreshResult>) -> Result<String, GatewayError> {
        match rx.wait_for(|v| v.is_some()).await {
            Ok(value) => match &*value {
                Some(result) => result.clone(),
                None => Err(GatewayError::transient("token", "token refresh produced no result")),
            },
            Err(_) => Err(GatewayError::transient("token", "token refresh was abandoned")),
        }
    }
}
