//! A leaderless, asynchronous BFT ordering engine for DAG-structured event graphs.
//!
//! Every validator creates events referencing events it has already seen. The engine assigns
//! each event a **frame**, recognizes the first event of a validator in a frame as a **root**,
//! and runs a virtual-voting election among roots that irrevocably decides one **Atropos** per
//! frame. Every Atropos becomes a block: the events below it that no earlier block confirmed.
//!
//! ## How it works
//!
//! An event belongs to frame `f + 1` once it is forkless caused by roots of frame `f` holding
//! more than 2/3 of the validators' weight. Roots vote about the roots of the lowest undecided
//! frame: directly in the first round (do I observe it?), then by weighted majority of the
//! previous round's votes. A vote backed by a supermajority is final. The first validator, in
//! the validator set's deterministic order, whose root is finally voted "yes" gives the Atropos.
//!
//! The entry points are [`orderer::Orderer`] (frames and elections only),
//! [`consensus::Consensus`] (adds block confirmation and cheater reports) and
//! [`service::OrderingService`] (a tokio single-writer front end). Forkless cause and fork
//! detection come from an external [`dag::DagIndex`], persistent state from a
//! [`storage::Store`].

pub mod protos {
    pub mod ordering {
        pub mod v1 {
            include!(concat!(env!("OUT_DIR"), "/ordering.v1.rs"));
        }
    }
}

pub mod config;
pub mod consensus;
pub mod dag;
pub mod election;
pub mod error;
pub mod events;
pub mod orderer;
pub mod service;
pub mod storage;
pub mod types;
pub mod validators;
