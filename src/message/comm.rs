use serde::{Deserialize, Serialize};
use crate::error::Result;

/// Identifies a stream of messages between two ranks. Messages with the
/// same source and tag are delivered in the order they were sent.
pub type Tag = u32;

/// A message in transit, labeled with its sender and tag.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub source: usize,
    pub tag: Tag,
    pub data: Vec<u8>,
}

/// Interface for a group of processes that can exchange messages over a
/// network. The underlying transport can in principle be TCP, in-process
/// channels, or a higher level abstraction like MPI.
///
pub trait Communicator {
    /// Must be implemented to return the rank of this process within the
    /// communicator.
    fn rank(&self) -> usize;

    /// Must be implemented to return the number of peer processes in this
    /// communicator.
    fn size(&self) -> usize;

    /// Must be implemented to send a message to a peer. This method must
    /// return immediately, in other words it is not allowed to block until a
    /// matching receive is posted. The communicator takes ownership of the
    /// buffer.
    fn send(&self, rank: usize, tag: Tag, message: Vec<u8>) -> Result<()>;

    /// Must be implemented to return the next message from the given source
    /// with the given tag, if one has arrived, without blocking. Messages
    /// that arrive for other sources or tags are kept for later receives.
    fn try_recv(&self, source: usize, tag: Tag) -> Result<Option<Vec<u8>>>;

    /// Must be implemented to receive the next message from the given source
    /// with the given tag. This method is allowed to block until it arrives.
    fn recv(&self, source: usize, tag: Tag) -> Result<Vec<u8>>;
}
