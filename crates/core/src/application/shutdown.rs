// Shutdown Signal
// One sender, any number of tokens held by background loops

use tokio::sync::watch;

/// Shutdown signal for graceful termination
#[derive(Clone)]
pub struct ShutdownToken {
    rx: watch::Receiver<bool>,
}

impl ShutdownToken {
    /// Check if shutdown was requested
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait for shutdown signal (returns immediately if already signalled)
    pub async fn wait(&mut self) {
        // Err means the sender is gone, which also ends the wait
        let _ = self.rx.wait_for(|stopped| *stopped).await;
    }
}

/// Shutdown sender
pub struct ShutdownSender {
    tx: watch::Sender<bool>,
}

impl ShutdownSender {
    /// Signal shutdown to every token
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }

    /// Mint another token for a new background task
    pub fn token(&self) -> ShutdownToken {
        ShutdownToken {
            rx: self.tx.subscribe(),
        }
    }

    pub fn is_shutdown(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Create a shutdown channel
pub fn shutdown_channel() -> (ShutdownSender, ShutdownToken) {
    let (tx, rx) = watch::channel(false);
    (ShutdownSender { tx }, ShutdownToken { rx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_all_tokens_observe_shutdown() {
        let (sender, token) = shutdown_channel();
        let mut late = sender.token();
        assert!(!token.is_shutdown());

        sender.shutdown();
        assert!(token.is_shutdown());
        assert!(sender.is_shutdown());

        // Already signalled: wait must not block
        tokio::time::timeout(Duration::from_millis(100), late.wait())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_dropped_sender_releases_waiters() {
        let (sender, mut token) = shutdown_channel();
        drop(sender);
        tokio::time::timeout(Duration::from_millis(100), token.wait())
            .await
            .unwrap();
    }
}
