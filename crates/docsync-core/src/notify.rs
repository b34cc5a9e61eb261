use futures::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

use crate::catalog::ItemId;

/// Broadcast channel of "this item changed" events.
///
/// Publishing never waits on subscribers. Subscribers only see events sent
/// after they subscribed; a subscriber that falls more than `capacity`
/// events behind skips the oldest ones.
#[derive(Debug, Clone)]
pub struct ChangeNotifier {
    sender: broadcast::Sender<ItemId>,
}

impl ChangeNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish a change. Returns the number of subscribers reached.
    pub fn publish(&self, item: ItemId) -> usize {
        match self.sender.send(item) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(item)) => {
                debug!("No subscribers for change of {}", item);
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ItemId> {
        self.sender.subscribe()
    }

    /// Subscribe as a `Stream`, silently skipping lagged events.
    pub fn stream(&self) -> impl Stream<Item = ItemId> + Send + 'static {
        BroadcastStream::new(self.sender.subscribe()).filter_map(|event| async move {
            match event {
                Ok(item) => Some(item),
                Err(e) => {
                    warn!("Change subscriber lagged: {}", e);
                    None
                }
            }
        })
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
