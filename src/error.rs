use thiserror::Error;




/**
 * Error type for the transfer substrate. None of these are retried: each
 * reflects a bug in how the substrate was driven, or an inconsistency
 * between the box metadata held by two processes. The message names the
 * offending box, patch, or variable.
 */
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    /// An operation was called out of order, or with settings that do not
    /// combine (e.g. computing a sum before it was set up).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A geometric request that can never be satisfied, such as a
    /// transaction for an empty overlap.
    #[error("geometry error: {0}")]
    Geometry(String),

    /// The two ends of a schedule disagree about the message layout, or a
    /// transaction refers to data that is not present.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// An arena allocation exceeded the remaining capacity.
    #[error("arena exhausted: requested {requested} bytes with {remaining} of {capacity} remaining")]
    ArenaExhaustion {
        requested: usize,
        remaining: usize,
        capacity: usize,
    },

    /// A numerical request outside the domain of the operation.
    #[error("domain error: {0}")]
    Domain(String),

    /// The transport underneath a communicator has gone away.
    #[error("communication error: {0}")]
    Communication(String),
}




pub type Result<T> = std::result::Result<T, Error>;
