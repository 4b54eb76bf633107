//! Worker-team communication: active messages, aggregating stores,
//! collectives and the global counter.

pub mod aggr_store;
pub mod message;
pub mod world;

pub use aggr_store::{AggrStore, LaneTracker};
pub use message::{Envelope, Lane, Message};
pub use world::{run_team, WorkerComm};
