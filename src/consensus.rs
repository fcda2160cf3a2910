//! Block production on top of the [`Orderer`].
//!
//! Adds what a general-purpose node needs once a frame is decided: confirming the subgraph below
//! the Atropos and reporting cheaters to the application.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::{
    config::OrdererConfig,
    dag::{DagIndex, Event, EventSource, VectorClock},
    error::OrderingError,
    orderer::{ApplyAtroposFn, Orderer, OrdererCallbacks, SealEpochFn},
    storage::Store,
    types::{Block, Epoch, EventHash, Frame, ValidatorId},
    validators::Validators,
};

/// Application hooks invoked for every decided block.
pub trait BlockCallbacks: Send {
    /// A frame was decided; its confirmed events follow.
    fn begin_block(&mut self, block: &Block);

    /// A newly confirmed event, in traversal order.
    fn apply_event(&mut self, event: &Event) {
        let _ = event;
    }

    /// Close the block. Returning a non-empty validator set ends the epoch.
    fn end_block(&mut self) -> Option<Validators> {
        None
    }

    /// Epoch-final bookkeeping before the next epoch starts.
    fn seal_epoch(&mut self, sealed: Epoch, next: &Validators) -> Result<(), OrderingError> {
        let _ = (sealed, next);
        Ok(())
    }
}

/// Orders events and turns every decided frame into a [`Block`].
pub struct Consensus<S, I, D> {
    orderer: Orderer<S, I, D>,
}

impl<S, I, D> Consensus<S, I, D>
where
    S: Store + 'static,
    I: EventSource + 'static,
    D: DagIndex + 'static,
{
    pub fn new(store: Arc<S>, input: Arc<I>, dag_index: Arc<D>, config: OrdererConfig) -> Self {
        Self {
            orderer: Orderer::new(store, input, dag_index, config),
        }
    }

    pub fn orderer(&self) -> &Orderer<S, I, D> {
        &self.orderer
    }

    pub fn bootstrap<C>(&mut self, callbacks: C) -> Result<(), OrderingError>
    where
        C: BlockCallbacks + 'static,
    {
        let callbacks = Arc::new(Mutex::new(callbacks));

        let store = Arc::clone(self.orderer.store());
        let input = Arc::clone(self.orderer.input());
        let dag_index = Arc::clone(self.orderer.dag_index());
        let block_callbacks = Arc::clone(&callbacks);
        let apply_atropos: ApplyAtroposFn = Box::new(move |frame, atropos| {
            seal_block(
                store.as_ref(),
                input.as_ref(),
                dag_index.as_ref(),
                &mut *block_callbacks.lock(),
                frame,
                atropos,
            )
        });
        let seal_epoch: SealEpochFn =
            Box::new(move |sealed, next| callbacks.lock().seal_epoch(sealed, next));

        self.orderer.bootstrap(OrdererCallbacks {
            apply_atropos: Some(apply_atropos),
            seal_epoch: Some(seal_epoch),
        })
    }

    /// See [`Orderer::build`].
    pub fn build(&mut self, event: &mut Event) -> Result<(), OrderingError> {
        self.orderer.build(event)
    }

    /// See [`Orderer::process`].
    pub fn process(&mut self, event: &Event) -> Result<(), OrderingError> {
        self.orderer.process(event)
    }
}

fn seal_block<S, I, D, C>(
    store: &S,
    input: &I,
    dag_index: &D,
    callbacks: &mut C,
    frame: Frame,
    atropos: EventHash,
) -> Result<Option<Validators>, OrderingError>
where
    S: Store + ?Sized,
    I: EventSource + ?Sized,
    D: DagIndex + ?Sized,
    C: BlockCallbacks + ?Sized,
{
    let validators = store.get_validators();
    let block = Block {
        epoch: store.get_epoch(),
        frame,
        atropos,
        cheaters: cheaters(&validators, &dag_index.merged_highest_before(&atropos)),
    };
    callbacks.begin_block(&block);

    let confirmed = confirm_events(store, input, frame, atropos, |event| {
        callbacks.apply_event(event)
    })?;
    debug!("Frame {frame} confirmed {confirmed} events");

    Ok(callbacks.end_block())
}

/// Validators whose branch of the clock reports a fork, in the set's order.
pub fn cheaters(validators: &Validators, clock: &VectorClock) -> Vec<ValidatorId> {
    validators
        .sorted_ids()
        .iter()
        .enumerate()
        .filter(|(index, _)| clock.get(*index).is_fork_detected())
        .map(|(_, id)| *id)
        .collect()
}

/// Depth-first walk from the Atropos through parents, marking every not yet confirmed event as
/// confirmed on `frame`.
///
/// Stops at already confirmed events, so the subgraph of an earlier Atropos is never revisited.
/// Self-parents are visited before other parents. Returns the number of confirmed events.
pub fn confirm_events<S, I, F>(
    store: &S,
    input: &I,
    frame: Frame,
    atropos: EventHash,
    mut on_confirmed: F,
) -> Result<usize, OrderingError>
where
    S: Store + ?Sized,
    I: EventSource + ?Sized,
    F: FnMut(&Event),
{
    let mut confirmed = 0;
    let mut stack = vec![atropos];
    while let Some(id) = stack.pop() {
        if store.get_event_confirmed_on(&id).is_some() {
            continue;
        }
        let event = input
            .get_event(&id)
            .ok_or(OrderingError::EventNotFound(id))?;

        store.set_event_confirmed_on(id, frame);
        on_confirmed(&event);
        confirmed += 1;

        let parents: Vec<EventHash> = event.parents().collect();
        stack.extend(parents.into_iter().rev());
    }
    Ok(confirmed)
}
