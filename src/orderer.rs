//! Frame assignment, root detection and the decide-advance-rebootstrap loop.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::{
    config::OrdererConfig,
    dag::{DagIndex, Event, EventSource},
    election::{Election, ElectionContext, Res},
    error::OrderingError,
    storage::Store,
    types::{Epoch, EventHash, FIRST_FRAME, Frame, RootAndSlot},
    validators::Validators,
};

/// Called once per decided frame with its Atropos. Returning a non-empty validator set ends the
/// epoch.
pub type ApplyAtroposFn =
    Box<dyn FnMut(Frame, EventHash) -> Result<Option<Validators>, OrderingError> + Send>;
/// Epoch-final bookkeeping, called with the sealed epoch and the next epoch's validators.
pub type SealEpochFn = Box<dyn FnMut(Epoch, &Validators) -> Result<(), OrderingError> + Send>;

#[derive(Default)]
pub struct OrdererCallbacks {
    pub apply_atropos: Option<ApplyAtroposFn>,
    pub seal_epoch: Option<SealEpochFn>,
}

/// Election view over the store's roots and the DAG index.
struct RootsView<'a, S: ?Sized, D: ?Sized> {
    store: &'a S,
    dag_index: &'a D,
}

impl<S, D> ElectionContext for RootsView<'_, S, D>
where
    S: Store + ?Sized,
    D: DagIndex + ?Sized,
{
    fn forkless_cause(&self, a: &EventHash, b: &EventHash) -> bool {
        self.dag_index.forkless_cause(a, b)
    }

    fn frame_roots(&self, frame: Frame) -> Vec<RootAndSlot> {
        self.store.get_frame_roots(frame)
    }
}

/// Orders events into frames and elects one Atropos per frame.
///
/// Events must be fed in causal order, parents first. Every mutating method takes `&mut self`,
/// so concurrent callers must serialize onto one owner (see [`crate::service::OrderingService`]).
///
/// A fatal error halts the orderer: its in-memory election state can't be trusted any more and
/// every later call fails with [`OrderingError::Halted`].
pub struct Orderer<S, I, D> {
    store: Arc<S>,
    input: Arc<I>,
    dag_index: Arc<D>,
    config: OrdererConfig,
    election: Option<Election>,
    callbacks: OrdererCallbacks,
    halted: Option<String>,
}

impl<S, I, D> Orderer<S, I, D>
where
    S: Store,
    I: EventSource,
    D: DagIndex,
{
    pub fn new(store: Arc<S>, input: Arc<I>, dag_index: Arc<D>, config: OrdererConfig) -> Self {
        Self {
            store,
            input,
            dag_index,
            config,
            election: None,
            callbacks: OrdererCallbacks::default(),
            halted: None,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn input(&self) -> &Arc<I> {
        &self.input
    }

    pub fn dag_index(&self) -> &Arc<D> {
        &self.dag_index
    }

    pub fn config(&self) -> &OrdererConfig {
        &self.config
    }

    /// Election of the current undecided frame, once bootstrapped.
    pub fn election(&self) -> Option<&Election> {
        self.election.as_ref()
    }

    pub fn epoch(&self) -> Epoch {
        self.store.get_epoch()
    }

    pub fn last_decided_frame(&self) -> Frame {
        self.store.get_last_decided_frame()
    }

    /// Reason of the fatal error that halted the orderer, if any.
    pub fn halted(&self) -> Option<&str> {
        self.halted.as_deref()
    }

    /// Restore the election from the store and decide whatever the known roots already decide.
    pub fn bootstrap(&mut self, callbacks: OrdererCallbacks) -> Result<(), OrderingError> {
        if self.election.is_some() {
            return Err(OrderingError::AlreadyBootstrapped);
        }
        self.callbacks = callbacks;
        self.election = Some(Election::new(
            self.store.get_validators(),
            self.store.get_last_decided_frame() + 1,
        ));
        self.bootstrap_election()
            .map(|_| ())
            .map_err(|err| self.fail(err))
    }

    /// Assign the frame of a new event.
    ///
    /// The DAG index must already know the event. An event of another epoch, or by a creator
    /// outside the validator set, is a protocol violation and halts the orderer.
    pub fn build(&mut self, event: &mut Event) -> Result<(), OrderingError> {
        self.ensure_running()?;
        if self.election.is_none() {
            return Err(OrderingError::NotBootstrapped);
        }
        self.check_origin(event).map_err(|err| self.fail(err))?;

        let (_, frame) = self
            .calc_frame_idx(event, false)
            .map_err(|err| self.fail(err))?;
        event.set_frame(frame);
        Ok(())
    }

    /// Take a built event into consensus.
    ///
    /// Rejects the event with [`OrderingError::WrongFrame`] if its claimed frame doesn't match
    /// the calculated one; nothing is stored in that case. The event must be retrievable from the
    /// event source by the time its children are processed.
    pub fn process(&mut self, event: &Event) -> Result<(), OrderingError> {
        self.ensure_running()?;
        if self.election.is_none() {
            return Err(OrderingError::NotBootstrapped);
        }

        let self_parent_frame = match self.check_and_save_event(event) {
            Ok(frame) => frame,
            Err(err @ OrderingError::WrongFrame { .. }) => {
                warn!("Rejected event {}: {err}", event.id());
                return Err(err);
            }
            Err(err) => return Err(self.fail(err)),
        };

        // election doesn't fail under normal circumstances,
        // otherwise the store is in an inconsistent state
        self.handle_election(self_parent_frame, event)
            .map_err(|err| self.fail(err))
    }

    fn ensure_running(&self) -> Result<(), OrderingError> {
        match &self.halted {
            Some(reason) => Err(OrderingError::Halted(reason.clone())),
            None => Ok(()),
        }
    }

    fn fail(&mut self, err: OrderingError) -> OrderingError {
        if err.is_fatal() && self.halted.is_none() {
            error!("Fatal ordering error, halting: {err}");
            self.halted = Some(err.to_string());
        }
        err
    }

    fn check_origin(&self, event: &Event) -> Result<(), OrderingError> {
        let active = self.store.get_epoch();
        if event.epoch() != active {
            return Err(OrderingError::WrongEpoch {
                event: event.epoch(),
                active,
            });
        }
        if !self.store.get_validators().contains(event.creator()) {
            return Err(OrderingError::UnknownCreator(event.creator()));
        }
        Ok(())
    }

    /// Verify the claimed frame and record the event if it's a root.
    fn check_and_save_event(&self, event: &Event) -> Result<Frame, OrderingError> {
        let (self_parent_frame, frame) = self.calc_frame_idx(event, true)?;
        if event.frame() != frame {
            return Err(OrderingError::WrongFrame {
                claimed: event.frame(),
                calculated: frame,
            });
        }

        if self_parent_frame != frame {
            debug!(
                "Root {} of validator {} at frame {frame}",
                event.id(),
                event.creator()
            );
            self.store
                .add_root(RootAndSlot::new(event.id(), frame, event.creator()));
        }
        Ok(self_parent_frame)
    }

    /// Feed the root to the election for every frame it climbed, sealing decided frames.
    fn handle_election(
        &mut self,
        self_parent_frame: Frame,
        root: &Event,
    ) -> Result<(), OrderingError> {
        for frame in self_parent_frame + 1..=root.frame() {
            let decided = {
                let election = self
                    .election
                    .as_mut()
                    .ok_or(OrderingError::NotBootstrapped)?;
                let ctx = RootsView {
                    store: self.store.as_ref(),
                    dag_index: self.dag_index.as_ref(),
                };
                election.process_root(RootAndSlot::new(root.id(), frame, root.creator()), &ctx)?
            };
            let Some(decided) = decided else {
                continue;
            };

            // this root has observed that the lowest not decided frame is decided now
            if self.on_frame_decided(decided.frame, decided.atropos)? {
                break;
            }
            if self.bootstrap_election()? {
                break;
            }
        }
        Ok(())
    }

    /// Re-run the election over known roots until it stops deciding frames.
    ///
    /// Returns whether an epoch was sealed on the way.
    fn bootstrap_election(&mut self) -> Result<bool, OrderingError> {
        while let Some(decided) = self.process_known_roots()? {
            if self.on_frame_decided(decided.frame, decided.atropos)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Fully re-process the current voting with every root above the last decided frame.
    fn process_known_roots(&mut self) -> Result<Option<Res>, OrderingError> {
        let last_decided_frame = self.store.get_last_decided_frame();
        let election = self
            .election
            .as_mut()
            .ok_or(OrderingError::NotBootstrapped)?;
        debug_assert_eq!(election.frame_to_decide(), last_decided_frame + 1);
        let ctx = RootsView {
            store: self.store.as_ref(),
            dag_index: self.dag_index.as_ref(),
        };

        let mut frame = last_decided_frame + 1;
        loop {
            let frame_roots = self.store.get_frame_roots(frame);
            if frame_roots.is_empty() {
                return Ok(None);
            }
            for root in frame_roots {
                if let Some(decided) = election.process_root(root, &ctx)? {
                    return Ok(Some(decided));
                }
            }
            frame += 1;
        }
    }

    /// Move the last decided frame to `frame`, sealing the epoch if the application asks to.
    ///
    /// Returns whether the epoch was sealed.
    fn on_frame_decided(&mut self, frame: Frame, atropos: EventHash) -> Result<bool, OrderingError> {
        info!(
            "Frame {frame} decided in epoch {}, atropos {atropos}",
            self.store.get_epoch()
        );

        let new_validators = match self.callbacks.apply_atropos.as_mut() {
            Some(apply_atropos) => apply_atropos(frame, atropos)?,
            None => None,
        };

        match new_validators.filter(|validators| !validators.is_empty()) {
            Some(validators) => {
                let sealed_epoch = self.store.get_epoch();
                if let Some(seal_epoch) = self.callbacks.seal_epoch.as_mut() {
                    seal_epoch(sealed_epoch, &validators)?;
                }
                let validators = Arc::new(validators);
                self.store
                    .seal_epoch(sealed_epoch + 1, Arc::clone(&validators));
                info!(
                    "Epoch {sealed_epoch} sealed at frame {frame}, {} validators in epoch {}",
                    validators.len(),
                    sealed_epoch + 1
                );
                self.election = Some(Election::new(validators, FIRST_FRAME));
                Ok(true)
            }
            None => {
                self.store.set_last_decided_state(frame);
                self.election = Some(Election::new(self.store.get_validators(), frame + 1));
                Ok(false)
            }
        }
    }

    /// Returns the self-parent's frame and the event's frame.
    ///
    /// Frames can't be skipped: even if a parent is already at `F+1`, the event must itself be
    /// forkless caused by a quorum of frame `F` roots, because forkless cause isn't transitive
    /// once there's a cheater.
    fn calc_frame_idx(
        &self,
        event: &Event,
        check_only: bool,
    ) -> Result<(Frame, Frame), OrderingError> {
        let self_parent_frame = match event.self_parent() {
            Some(parent) => self
                .input
                .get_event(&parent)
                .ok_or(OrderingError::EventNotFound(parent))?
                .frame(),
            None => 0,
        };

        let max_frame_to_check = if check_only {
            event.frame()
        } else {
            self_parent_frame.saturating_add(self.config.max_frame_scan)
        };

        let mut frame = self_parent_frame;
        while frame < max_frame_to_check && self.forkless_caused_by_quorum_on(event, frame) {
            frame += 1;
        }
        if frame == 0 {
            frame = FIRST_FRAME;
        }
        Ok((self_parent_frame, frame))
    }

    /// Whether the event is forkless caused by 2/3W of the roots at `frame`.
    fn forkless_caused_by_quorum_on(&self, event: &Event, frame: Frame) -> bool {
        let validators = self.store.get_validators();
        let mut observed = validators.new_counter();
        for root in self.store.get_frame_roots(frame) {
            if self.dag_index.forkless_cause(&event.id(), &root.hash) {
                observed.count(root.slot.validator);
            }
            if observed.has_quorum() {
                break;
            }
        }
        observed.has_quorum()
    }
}
