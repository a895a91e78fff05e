//! Event fan-out: a synchronous typed observer registry for the session core
//! and an async broadcast bus for presentation collaborators.

mod observers;

use async_trait::async_trait;
use futures::{stream::BoxStream, StreamExt};
use nimbus_types::{events::SystemEvent, Result};
use tokio::sync::broadcast;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::warn;

pub use observers::{ObserverId, ObserverSet};

#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, event: SystemEvent) -> Result<()>;
    /// Each subscription sees every event published after it was created.
    /// Dropping the stream unsubscribes.
    fn subscribe(&self) -> BoxStream<'static, SystemEvent>;
}

/// In-process bus backed by a broadcast channel.
#[derive(Clone)]
pub struct LocalBus {
    tx: broadcast::Sender<SystemEvent>,
}

impl LocalBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[async_trait]
impl EventBus for LocalBus {
    async fn publish(&self, event: SystemEvent) -> Result<()> {
        // No subscribers is not an error: presentation may not be attached yet.
        let _ = self.tx.send(event);
        Ok(())
    }

    fn subscribe(&self) -> BoxStream<'static, SystemEvent> {
        BroadcastStream::new(self.tx.subscribe())
            .filter_map(|event| async move {
                match event {
                    Ok(event) => Some(event),
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        warn!("Event subscriber lagged; {skipped} events dropped");
                        None
                    }
                }
            })
            .boxed()
    }
}
