//! Data model for voting items and votes.
//!
//! `common` holds the types shared by both representations; `db` and `api`
//! hold the storage and wire representations respectively.

pub mod api;
pub mod common;
pub mod db;
pub mod mongodb;
