use parking_lot::Mutex;
use std::collections::BTreeSet;
use tokio_util::sync::CancellationToken;

/// Subscription set and run token shared by the bundled stream sources
#[derive(Debug, Default)]
pub struct StreamControl {
    subscribed: Mutex<BTreeSet<String>>,
    running: Mutex<Option<CancellationToken>>,
}

impl StreamControl {
    pub fn subscribe<'a>(&self, symbols: impl IntoIterator<Item = &'a String>) {
        self.subscribed.lock().extend(symbols.into_iter().cloned());
    }

    pub fn unsubscribe(&self, symbol: &str) -> bool {
        self.subscribed.lock().remove(symbol)
    }

    pub fn is_subscribed(&self, symbol: &str) -> bool {
        self.subscribed.lock().contains(symbol)
    }

    pub fn symbols(&self) -> Vec<String> {
        self.subscribed.lock().iter().cloned().collect()
    }

    /// Token for a fresh run; any previous run is cancelled
    pub fn begin(&self) -> CancellationToken {
        let token = CancellationToken::new();
        if let Some(previous) = self.running.lock().replace(token.clone()) {
            previous.cancel();
        }
        token
    }

    pub fn stop(&self) -> bool {
        match self.running.lock().take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .map(|t| !t.is_cancelled())
            .unwrap_or(false)
    }
}
