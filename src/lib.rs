//! Patchxfer is the communication substrate of a structured adaptive mesh
//! refinement (AMR) code. Data lives on rectangular patches of integer
//! index space, grouped into levels of increasing resolution and spread
//! across processes. This crate computes which parts of which patches
//! overlap, packages the data movement between them into transactions,
//! groups the transactions into per-process schedules that exchange one
//! message per peer, and runs those schedules, either blocking or as
//! relaunchable jobs. On top of that sits a boundary node sum, which makes
//! node-centered values shared by several patches (and by the levels of a
//! hierarchy) agree on their total.

pub mod arena;
pub mod centering;
pub mod config;
pub mod error;
pub mod execution;
pub mod index_space;
pub mod int_vector;
pub mod job;
pub mod level;
pub mod message;
pub mod node_sum;
pub mod overlap;
pub mod patch;
pub mod schedule;
pub mod spatial_index;
pub mod transaction;
pub mod variable;

pub use error::{Error, Result};
