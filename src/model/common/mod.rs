//! Types shared between the database and API representations.

mod item;

pub use item::{Eligibility, ItemStatus, ItemType, Jurisdiction, OptionId, VoterId, VotingOption};
