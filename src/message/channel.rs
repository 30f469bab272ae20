use crossbeam_channel::Sender;
use crate::error::{Error, Result};
use super::comm::{Communicator, Envelope, Tag};
use super::mailbox::Mailbox;

/// A communicator whose ranks are threads of one process, connected by
/// crossbeam channels. Useful for tests and for running a distributed
/// computation on one machine.
///
pub struct ChannelCommunicator {
    rank: usize,
    peers: Vec<Sender<Envelope>>,
    mailbox: Mailbox,
}

impl ChannelCommunicator {
    /// Create a group of `size` connected communicators; the one at position
    /// `n` has rank `n`. Each is meant to be moved onto its own thread.
    ///
    pub fn world(size: usize) -> Vec<Self> {
        let (sinks, sources): (Vec<_>, Vec<_>) = (0..size).map(|_| crossbeam_channel::unbounded()).unzip();

        sources
            .into_iter()
            .enumerate()
            .map(|(rank, source)| Self {
                rank,
                peers: sinks.clone(),
                mailbox: Mailbox::new(source),
            })
            .collect()
    }
}

impl Communicator for ChannelCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.peers.len()
    }

    fn send(&self, rank: usize, tag: Tag, message: Vec<u8>) -> Result<()> {
        let peer = self.peers
            .get(rank)
            .ok_or_else(|| Error::Communication(format!("no rank {} in a world of {}", rank, self.peers.len())))?;
        peer.send(Envelope { source: self.rank, tag, data: message })
            .map_err(|_| Error::Communication(format!("rank {} has hung up", rank)))
    }

    fn try_recv(&self, source: usize, tag: Tag) -> Result<Option<Vec<u8>>> {
        self.mailbox.try_take(source, tag)
    }

    fn recv(&self, source: usize, tag: Tag) -> Result<Vec<u8>> {
        self.mailbox.take(source, tag)
    }
}
