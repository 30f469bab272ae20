use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use crossbeam_channel::{Receiver, TryRecvError};
use log::trace;
use crate::error::{Error, Result};
use super::comm::{Envelope, Tag};

/// Sorts inbound envelopes by source and tag, and keeps the ones that
/// arrive before anybody asks for them.
///
pub(crate) struct Mailbox {
    inbound: Receiver<Envelope>,
    pending: RefCell<HashMap<(usize, Tag), VecDeque<Vec<u8>>>>,
}

impl Mailbox {
    pub fn new(inbound: Receiver<Envelope>) -> Self {
        Self {
            inbound,
            pending: RefCell::new(HashMap::new()),
        }
    }

    pub fn try_take(&self, source: usize, tag: Tag) -> Result<Option<Vec<u8>>> {
        loop {
            match self.inbound.try_recv() {
                Ok(envelope) => self.stash(envelope),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    return self.pop(source, tag)
                        .map(Some)
                        .ok_or_else(|| Error::Communication("inbound channel closed".to_string()))
                }
            }
        }
        Ok(self.pop(source, tag))
    }

    pub fn take(&self, source: usize, tag: Tag) -> Result<Vec<u8>> {
        loop {
            if let Some(data) = self.pop(source, tag) {
                return Ok(data)
            }
            let envelope = self.inbound
                .recv()
                .map_err(|_| Error::Communication(format!("inbound channel closed waiting on rank {} tag {}", source, tag)))?;
            self.stash(envelope)
        }
    }

    fn stash(&self, envelope: Envelope) {
        trace!("message from rank {} tag {} ({} bytes)", envelope.source, envelope.tag, envelope.data.len());
        self.pending
            .borrow_mut()
            .entry((envelope.source, envelope.tag))
            .or_default()
            .push_back(envelope.data)
    }

    fn pop(&self, source: usize, tag: Tag) -> Option<Vec<u8>> {
        self.pending
            .borrow_mut()
            .get_mut(&(source, tag))
            .and_then(VecDeque::pop_front)
    }
}
