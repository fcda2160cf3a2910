//! Async front end serializing every caller onto one orderer.
//!
//! The orderer is strictly sequential. [`OrderingService`] owns it inside a tokio task and feeds
//! it from a bounded queue, so any number of network tasks can submit events concurrently.

use std::sync::Arc;

use async_stream::stream;
use futures::Stream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{info, warn};

use crate::{
    config::ServiceConfig,
    consensus::{BlockCallbacks, Consensus},
    dag::{DagIndex, Event, EventSource},
    error::OrderingError,
    events::{BroadcastEventBus, OrderingEvent, OrderingEventBus},
    storage::Store,
    types::{Block, Epoch, Frame},
    validators::Validators,
};

enum Request {
    Build {
        event: Event,
        reply: oneshot::Sender<Result<Event, OrderingError>>,
    },
    Process {
        event: Event,
        reply: oneshot::Sender<Result<(), OrderingError>>,
    },
    Position {
        reply: oneshot::Sender<(Epoch, Frame)>,
    },
}

pub struct OrderingService<E = BroadcastEventBus>
where
    E: OrderingEventBus,
{
    requests: mpsc::Sender<Request>,
    event_bus: E,
}

impl<E> Clone for OrderingService<E>
where
    E: OrderingEventBus,
{
    fn clone(&self) -> Self {
        Self {
            requests: self.requests.clone(),
            event_bus: self.event_bus.clone(),
        }
    }
}

pub type DefaultOrderingService = OrderingService<BroadcastEventBus>;

impl DefaultOrderingService {
    /// Bootstrap a consensus instance and start serving it. Must be called within a tokio runtime.
    pub fn start<S, I, D, C>(
        store: Arc<S>,
        input: Arc<I>,
        dag_index: Arc<D>,
        callbacks: C,
        config: ServiceConfig,
    ) -> Result<Self, OrderingError>
    where
        S: Store + 'static,
        I: EventSource + 'static,
        D: DagIndex + 'static,
        C: BlockCallbacks + 'static,
    {
        let event_bus = BroadcastEventBus::new(config.event_bus_capacity);
        Self::start_with_components(store, input, dag_index, callbacks, event_bus, config)
    }

    /// Stream of decided blocks, starting with the next one.
    ///
    /// Ends once the service is stopped. Blocks missed because the consumer lagged behind are
    /// skipped with a warning.
    pub fn decided_blocks(&self) -> impl Stream<Item = Block> + Send + 'static {
        let mut receiver = self.event_bus.subscribe();
        stream! {
            loop {
                match receiver.recv().await {
                    Ok(OrderingEvent::BlockDecided(block)) => {
                        yield block;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Decided blocks stream lagged, skipped {skipped} ordering events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}

impl<E> OrderingService<E>
where
    E: OrderingEventBus,
{
    pub fn start_with_components<S, I, D, C>(
        store: Arc<S>,
        input: Arc<I>,
        dag_index: Arc<D>,
        callbacks: C,
        event_bus: E,
        config: ServiceConfig,
    ) -> Result<Self, OrderingError>
    where
        S: Store + 'static,
        I: EventSource + 'static,
        D: DagIndex + 'static,
        C: BlockCallbacks + 'static,
    {
        config.validate()?;

        let mut consensus = Consensus::new(store, input, dag_index, config.orderer);
        consensus.bootstrap(PublishingCallbacks {
            inner: callbacks,
            event_bus: event_bus.clone(),
            pending: None,
        })?;

        let (requests, receiver) = mpsc::channel(config.queue_capacity);
        tokio::spawn(serve(consensus, receiver, event_bus.clone()));

        Ok(Self {
            requests,
            event_bus,
        })
    }

    pub fn subscribe(&self) -> E::Receiver {
        self.event_bus.subscribe()
    }

    /// Assign the frame of a locally created event. See [`crate::orderer::Orderer::build`].
    pub async fn build(&self, event: Event) -> Result<Event, OrderingError> {
        self.request(|reply| Request::Build { event, reply })
            .await?
    }

    /// Take a built event into consensus. See [`crate::orderer::Orderer::process`].
    pub async fn process(&self, event: Event) -> Result<(), OrderingError> {
        self.request(|reply| Request::Process { event, reply })
            .await?
    }

    /// Current epoch and its last decided frame.
    pub async fn position(&self) -> Result<(Epoch, Frame), OrderingError> {
        self.request(|reply| Request::Position { reply }).await
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Request,
    ) -> Result<T, OrderingError> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(make(reply))
            .await
            .map_err(|_| OrderingError::ServiceStopped)?;
        response.await.map_err(|_| OrderingError::ServiceStopped)
    }
}

async fn serve<S, I, D, E>(
    mut consensus: Consensus<S, I, D>,
    mut requests: mpsc::Receiver<Request>,
    event_bus: E,
) where
    S: Store + 'static,
    I: EventSource + 'static,
    D: DagIndex + 'static,
    E: OrderingEventBus,
{
    while let Some(request) = requests.recv().await {
        match request {
            Request::Build { mut event, reply } => {
                let result = consensus.build(&mut event).map(|()| event);
                report_halt(&event_bus, result.as_ref().err());
                let _ = reply.send(result);
            }
            Request::Process { event, reply } => {
                let result = consensus.process(&event);
                report_halt(&event_bus, result.as_ref().err());
                let _ = reply.send(result);
            }
            Request::Position { reply } => {
                let orderer = consensus.orderer();
                let _ = reply.send((orderer.epoch(), orderer.last_decided_frame()));
            }
        }
    }
    info!("Ordering service stopped");
}

/// Publish the error that halted the orderer, once.
fn report_halt<E>(event_bus: &E, err: Option<&OrderingError>)
where
    E: OrderingEventBus,
{
    if let Some(err) = err
        && err.is_fatal()
        && !matches!(err, OrderingError::Halted(_))
    {
        event_bus.publish(OrderingEvent::Halted {
            reason: err.to_string(),
        });
    }
}

/// Forwards to the application's callbacks and announces blocks and epochs on the bus.
struct PublishingCallbacks<C, E> {
    inner: C,
    event_bus: E,
    pending: Option<Block>,
}

impl<C, E> BlockCallbacks for PublishingCallbacks<C, E>
where
    C: BlockCallbacks,
    E: OrderingEventBus,
{
    fn begin_block(&mut self, block: &Block) {
        self.pending = Some(block.clone());
        self.inner.begin_block(block);
    }

    fn apply_event(&mut self, event: &Event) {
        self.inner.apply_event(event);
    }

    fn end_block(&mut self) -> Option<Validators> {
        let next_validators = self.inner.end_block();
        if let Some(block) = self.pending.take() {
            self.event_bus.publish(OrderingEvent::BlockDecided(block));
        }
        next_validators
    }

    fn seal_epoch(&mut self, sealed: Epoch, next: &Validators) -> Result<(), OrderingError> {
        self.inner.seal_epoch(sealed, next)?;
        self.event_bus.publish(OrderingEvent::EpochSealed {
            epoch: sealed + 1,
            validators: Arc::new(next.clone()),
        });
        Ok(())
    }
}
