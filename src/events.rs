use std::sync::Arc;

use tokio::sync::broadcast;

use crate::{
    types::{Block, Epoch},
    validators::Validators,
};

#[derive(Debug, Clone)]
pub enum OrderingEvent {
    /// A frame was decided and its block applied.
    BlockDecided(Block),
    /// An epoch ended; `epoch` is the one that starts now.
    EpochSealed {
        epoch: Epoch,
        validators: Arc<Validators>,
    },
    /// A fatal error stopped the orderer. Operator intervention is required.
    Halted { reason: String },
}

pub trait OrderingEventBus: Clone + Send + Sync + 'static {
    /// Type returned to consumers that subscribe to ordering events.
    type Receiver;

    fn subscribe(&self) -> Self::Receiver;
    fn publish(&self, event: OrderingEvent);
}

#[derive(Clone)]
pub struct BroadcastEventBus {
    sender: broadcast::Sender<OrderingEvent>,
}

impl BroadcastEventBus {
    pub fn new(buffer: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer);
        Self { sender }
    }
}

impl Default for BroadcastEventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl OrderingEventBus for BroadcastEventBus {
    type Receiver = broadcast::Receiver<OrderingEvent>;

    fn subscribe(&self) -> Self::Receiver {
        self.sender.subscribe()
    }

    fn publish(&self, event: OrderingEvent) {
        let _ = self.sender.send(event);
    }
}
