use std::fmt;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownCause {
    Interrupt,
    Terminate,
    Restart,
    UsageLimit,
    Panic,
}

impl fmt::Display for ShutdownCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ShutdownCause::Interrupt => "SIGINT",
            ShutdownCause::Terminate => "SIGTERM",
            ShutdownCause::Restart => "SIGUSR2",
            ShutdownCause::UsageLimit => "usage limit",
            ShutdownCause::Panic => "panic",
        };
        f.write_str(name)
    }
}

/// Process-wide shutdown latch. The first cause wins; later triggers are ignored.
#[derive(Clone)]
pub struct ShutdownSignal {
    tx: watch::Sender<Option<ShutdownCause>>,
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    /// Returns `true` if this call started the shutdown.
    pub fn trigger(&self, cause: ShutdownCause) -> bool {
        let started = self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(cause);
            true
        });
        if started {
            tracing::warn!(%cause, "shutdown requested");
        }
        started
    }

    pub fn cause(&self) -> Option<ShutdownCause> {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<ShutdownCause>> {
        self.tx.subscribe()
    }

    /// Resolves once shutdown has been triggered.
    pub async fn wait(&self) -> ShutdownCause {
        let mut rx = self.tx.subscribe();
        loop {
            if let Some(cause) = *rx.borrow_and_update() {
                return cause;
            }
            // The sender lives in self, so this only fails if every clone dropped.
            if rx.changed().await.is_err() {
                return ShutdownCause::Terminate;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_cause_wins() {
        let signal = ShutdownSignal::new();
        assert!(signal.cause().is_none());

        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.wait().await })
        };

        assert!(signal.trigger(ShutdownCause::UsageLimit));
        assert!(!signal.trigger(ShutdownCause::Interrupt));
        assert_eq!(waiter.await.unwrap(), ShutdownCause::UsageLimit);
        assert_eq!(signal.cause(), Some(ShutdownCause::UsageLimit));
    }
}
