//! Running a schedule: either all at once, blocking on each incoming
//! message, or as a relaunchable job that never blocks.

use std::collections::BTreeSet;
use log::trace;
use rayon::prelude::*;
use crate::arena::Arena;
use crate::error::{Error, Result};
use crate::job::{JobState, RelaunchableJob};
use crate::level::PatchLevel;
use crate::message::Communicator;
use crate::schedule::Schedule;
use crate::transaction::{LevelPair, MessageReader, MessageWriter, Transaction};




// ============================================================================
impl<const D: usize> Schedule<D> {


    /**
     * Run the transfer from `src` into `dst`, blocking until every incoming
     * message has arrived. `time` is the time to interpolate to, for
     * time-interpolating transactions.
     */
    pub fn execute<C: Communicator>(&self, comm: &C, src: &PatchLevel<D>, dst: &mut PatchLevel<D>, time: f64) -> Result<()> {
        self.execute_levels(comm, LevelPair::Distinct { src, dst }, time)
    }


    /**
     * Run a transfer whose source and destination are the same level.
     */
    pub fn execute_in_place<C: Communicator>(&self, comm: &C, level: &mut PatchLevel<D>, time: f64) -> Result<()> {
        self.execute_levels(comm, LevelPair::Same(level), time)
    }


    /**
     * Run the transfer in four steps: pack and send every outgoing message,
     * run the local transactions, then receive and unpack the message from
     * each peer in ascending rank order.
     */
    pub fn execute_levels<C: Communicator>(&self, comm: &C, mut levels: LevelPair<D>, time: f64) -> Result<()> {
        self.check_rank(comm)?;
        self.send_outgoing(comm, levels.source(), time)?;
        self.run_local(&mut levels, time)?;

        for (&peer, transactions) in self.incoming() {
            let message = comm.recv(peer, self.tag())?;
            self.unpack_from(peer, transactions, &message, levels.destination())?;
        }
        Ok(())
    }


    /**
     * Return a job which runs this schedule without blocking, for use with
     * a `JobRelauncher`.
     */
    pub fn job<'a, C: Communicator>(&'a self, comm: &'a C, levels: LevelPair<'a, D>, time: f64) -> ScheduleJob<'a, C, D> {
        ScheduleJob {
            schedule: self,
            comm,
            levels,
            time,
            stage: Stage::Start,
        }
    }


    fn check_rank<C: Communicator>(&self, comm: &C) -> Result<()> {
        if comm.rank() != self.rank() {
            return Err(Error::Configuration(format!(
                "schedule built for rank {} executed on rank {}",
                self.rank(), comm.rank())))
        }
        Ok(())
    }


    /**
     * Pack one message per peer into buffers carved from a single arena,
     * sized exactly from the transactions. Communicators take ownership of
     * what they send, so each packed buffer is copied out of the arena into
     * the message handed over; the arena is dropped once all are sent.
     */
    fn send_outgoing<C: Communicator>(&self, comm: &C, src: &PatchLevel<D>, time: f64) -> Result<()> {
        let peers: Vec<(&usize, &Vec<Transaction<D>>)> = self.outgoing().iter().collect();
        let sizes: Vec<usize> = peers.iter().map(|(peer, _)| self.outgoing_bytes(**peer)).collect();
        let alignment = self.config().arena_alignment;

        let mut arena = Arena::with_alignment(Arena::required_capacity(sizes.iter().copied(), alignment), alignment);
        let allocations = sizes.iter().map(|&size| arena.allocate(size)).collect::<Result<Vec<_>>>()?;

        {
            let buffers = arena.split_mut(&allocations)?;
            let pack = |(buffer, (_, transactions)): (&mut [u8], &(&usize, &Vec<Transaction<D>>))| -> Result<()> {
                let mut writer = MessageWriter::new(buffer);
                for transaction in transactions.iter() {
                    transaction.pack_stream(src, time, &mut writer)?
                }
                Ok(())
            };
            if self.config().parallel_pack && peers.len() > 1 {
                buffers.into_par_iter().zip(peers.par_iter()).map(pack).collect::<Result<()>>()?
            } else {
                buffers.into_iter().zip(peers.iter()).map(pack).collect::<Result<()>>()?
            }
        }

        for ((peer, _), allocation) in peers.iter().zip(&allocations) {
            let peer = **peer;
            trace!("rank {} -> {} tag {}: {} bytes", self.rank(), peer, self.tag(), allocation.len());
            comm.send(peer, self.tag(), arena.get(allocation).to_vec())?
        }
        Ok(())
    }


    fn run_local(&self, levels: &mut LevelPair<D>, time: f64) -> Result<()> {
        for transaction in self.local_transactions() {
            transaction.run_locally(levels, time)?
        }
        Ok(())
    }


    fn unpack_from(&self, peer: usize, transactions: &[Transaction<D>], message: &[u8], dst: &mut PatchLevel<D>) -> Result<()> {
        let expected = self.incoming_bytes(peer);

        if message.len() != expected {
            return Err(Error::Protocol(format!(
                "rank {} sent {} bytes on tag {}, expected {}",
                peer, message.len(), self.tag(), expected)))
        }
        let mut reader = MessageReader::new(message);

        for transaction in transactions {
            transaction.unpack_stream(dst, &mut reader)?
        }
        reader.finish()
    }
}




enum Stage {
    Start,
    Receiving(BTreeSet<usize>),
    Done,
}




/**
 * A schedule execution that can be suspended while waiting for messages.
 * The first continuation sends all outgoing messages and runs the local
 * transactions; later continuations unpack whichever incoming messages have
 * arrived, in any order.
 */
pub struct ScheduleJob<'a, C, const D: usize> {
    schedule: &'a Schedule<D>,
    comm: &'a C,
    levels: LevelPair<'a, D>,
    time: f64,
    stage: Stage,
}




// ============================================================================
impl<'a, C: Communicator, const D: usize> RelaunchableJob for ScheduleJob<'a, C, D> {


    fn continue_job(&mut self) -> Result<()> {
        if let Stage::Start = self.stage {
            self.schedule.check_rank(self.comm)?;
            self.schedule.send_outgoing(self.comm, self.levels.source(), self.time)?;
            self.schedule.run_local(&mut self.levels, self.time)?;
            self.stage = Stage::Receiving(self.schedule.incoming().keys().copied().collect());
        }

        if let Stage::Receiving(pending) = &mut self.stage {
            let mut arrived = Vec::new();

            for &peer in pending.iter() {
                if let Some(message) = self.comm.try_recv(peer, self.schedule.tag())? {
                    let transactions = self.schedule.incoming().get(&peer).map_or(&[][..], |ts| &ts[..]);
                    self.schedule.unpack_from(peer, transactions, &message, self.levels.destination())?;
                    arrived.push(peer);
                }
            }
            for peer in arrived {
                pending.remove(&peer);
            }
            if pending.is_empty() {
                self.stage = Stage::Done
            }
        }
        Ok(())
    }


    fn job_state(&self) -> JobState {
        match self.stage {
            Stage::Start => JobState::NoncommunicationWait,
            Stage::Receiving(_) => JobState::CommunicationWait,
            Stage::Done => JobState::Completed,
        }
    }
}
