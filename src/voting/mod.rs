//! Voting items, votes, and everything that acts on them.

mod bill;
mod closer;
mod engine;
mod results;

pub use bill::{Bill, BillSource, BillSourceFairing, BillVoteAdapter, HttpBillSource, StaticBillSource};
pub use closer::{ItemCloserFairing, ItemClosers};
pub use engine::VotingEngine;
pub use results::{tabulate, ResultsAggregator};
