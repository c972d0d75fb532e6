//! Version notices from the policy service.
//!
//! The notice is fetched in the background while the pipeline runs and shown
//! at the end of the run if it arrived in time. It never affects the outcome.

use crate::client::{CliClient, VersionMessage};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

#[async_trait]
pub trait Messager: Send + Sync {
    /// Start fetching the notice for `cli_version`. The receiver yields at
    /// most one message.
    fn load_version_messages(&self, cli_version: &str) -> mpsc::Receiver<VersionMessage>;

    /// Wait a bounded time for the notice.
    async fn handle_version_message(
        &self,
        messages: mpsc::Receiver<VersionMessage>,
    ) -> Option<VersionMessage>;
}

pub struct VersionMessenger {
    client: Arc<CliClient>,
    wait: Duration,
}

impl VersionMessenger {
    pub fn new(client: Arc<CliClient>) -> Self {
        Self::with_wait(client, Duration::from_millis(900))
    }

    pub fn with_wait(client: Arc<CliClient>, wait: Duration) -> Self {
        VersionMessenger { client, wait }
    }
}

#[async_trait]
impl Messager for VersionMessenger {
    fn load_version_messages(&self, cli_version: &str) -> mpsc::Receiver<VersionMessage> {
        let (tx, rx) = mpsc::channel(1);
        let client = self.client.clone();
        let cli_version = cli_version.to_string();

        tokio::spawn(async move {
            match client.get_version_message(&cli_version).await {
                Ok(Some(message)) => {
                    let _ = tx.send(message).await;
                }
                Ok(None) => {}
                Err(e) => debug!(error = %e, "version message unavailable"),
            }
        });

        rx
    }

    async fn handle_version_message(
        &self,
        mut messages: mpsc::Receiver<VersionMessage>,
    ) -> Option<VersionMessage> {
        tokio::time::timeout(self.wait, messages.recv())
            .await
            .ok()
            .flatten()
    }
}
