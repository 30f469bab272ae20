use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use log::{debug, error, info, warn};

use crate::error::{Error, Result};
use super::backoff::{retry, ExponentialBackoff};
use super::comm::{Communicator, Envelope, Tag};
use super::mailbox::Mailbox;
use super::util;

const ACCEPT_POLL: Duration = Duration::from_millis(10);
const RETRY_WAIT: Duration = Duration::from_millis(50);
const RETRY_MAX_WAIT: Duration = Duration::from_millis(2000);
const CONNECT_ATTEMPTS: usize = 20;

/// A communicator whose ranks are processes (or threads) reachable at known
/// socket addresses. Each rank listens on its own address; outgoing messages
/// are queued to a sender thread, which holds one connection per peer and
/// writes length-prefixed MessagePack envelopes. Dropping the communicator
/// flushes the queued messages and stops the listener.
///
pub struct TcpCommunicator {
    rank: usize,
    size: usize,
    outbound: Option<Sender<(usize, Envelope)>>,
    loopback: Sender<Envelope>,
    mailbox: Mailbox,
    shutdown: Arc<AtomicBool>,
    send_thread: Option<JoinHandle<()>>,
    listen_thread: Option<JoinHandle<()>>,
}

impl TcpCommunicator {
    /// Bind the listener for `rank` at `peers[rank]` and start the
    /// background threads. Connections to peers are made lazily, with
    /// retries, when the first message to each is sent.
    ///
    pub fn connect(rank: usize, peers: Vec<SocketAddr>) -> Result<Self> {
        let addr = *peers
            .get(rank)
            .ok_or_else(|| Error::Configuration(format!("rank {} has no address among {} peers", rank, peers.len())))?;
        let listener = TcpListener::bind(addr).map_err(|e| io_error(&addr, e))?;
        Self::with_listener(rank, listener, peers)
    }

    /// Start the communicator for `rank` on a listener the caller has
    /// already bound, for example to an ephemeral port whose address was
    /// then shared with the other ranks.
    ///
    pub fn with_listener(rank: usize, listener: TcpListener, peers: Vec<SocketAddr>) -> Result<Self> {
        if rank >= peers.len() {
            return Err(Error::Configuration(format!("rank {} has no address among {} peers", rank, peers.len())))
        }
        let addr = listener.local_addr().map_err(|e| Error::Communication(e.to_string()))?;
        listener.set_nonblocking(true).map_err(|e| io_error(&addr, e))?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let (inbound_sink, inbound_src) = crossbeam_channel::unbounded();
        let (outbound_sink, outbound_src) = crossbeam_channel::unbounded();
        let size = peers.len();

        let listen_thread = Self::start_listener(listener, inbound_sink.clone(), Arc::clone(&shutdown));
        let send_thread = Self::start_serial_sender(peers, outbound_src);

        info!("rank {} listening on {}", rank, addr);

        Ok(Self {
            rank,
            size,
            outbound: Some(outbound_sink),
            loopback: inbound_sink,
            mailbox: Mailbox::new(inbound_src),
            shutdown,
            send_thread: Some(send_thread),
            listen_thread: Some(listen_thread),
        })
    }

    fn start_serial_sender(peers: Vec<SocketAddr>, outbound: Receiver<(usize, Envelope)>) -> JoinHandle<()> {
        thread::spawn(move || {
            let mut table: HashMap<usize, TcpStream> = HashMap::new();

            for (rank, envelope) in outbound {
                let bytes = match rmp_serde::encode::to_vec(&envelope) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        error!("failed to encode message for rank {}: {}", rank, e);
                        continue
                    }
                };
                let mut attempts = 0;

                loop {
                    attempts += 1;

                    if !table.contains_key(&rank) {
                        match Self::connect_with_retry(peers[rank]) {
                            Ok(stream) => {
                                table.insert(rank, stream);
                            }
                            Err(e) => {
                                error!("dropping message to {}: {}", peers[rank], e);
                                break
                            }
                        }
                    }
                    let written = match table.get_mut(&rank) {
                        Some(stream) => util::write_frame(stream, &bytes),
                        None => break,
                    };
                    match written {
                        Ok(()) => break,
                        Err(e) if attempts < 2 => {
                            warn!("failed to send message to {}: {}; reconnecting", peers[rank], e);
                            table.remove(&rank);
                        }
                        Err(e) => {
                            error!("dropping message to {}: {}", peers[rank], e);
                            break
                        }
                    }
                }
            }
            debug!("sender thread shutting down");
        })
    }

    fn start_listener(listener: TcpListener, inbound: Sender<Envelope>, shutdown: Arc<AtomicBool>) -> JoinHandle<()> {
        thread::spawn(move || {
            while !shutdown.load(Ordering::SeqCst) {
                match listener.accept() {
                    Ok((stream, remote)) => {
                        Self::handle_connection(stream, remote, inbound.clone());
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        thread::sleep(ACCEPT_POLL)
                    }
                    Err(e) => {
                        error!("accept failed: {}", e);
                        break
                    }
                }
            }
            debug!("listener thread shutting down");
        })
    }

    fn handle_connection(mut stream: TcpStream, remote: SocketAddr, inbound: Sender<Envelope>) -> JoinHandle<()> {
        debug!("receiving connection from {}", remote);

        thread::spawn(move || {
            if let Err(e) = stream.set_nonblocking(false) {
                error!("connection from {} failed: {}", remote, e);
                return
            }
            loop {
                let frame = match util::read_frame(&mut stream) {
                    Ok(frame) => frame,
                    Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                    Err(e) => {
                        error!("connection from {} failed: {}", remote, e);
                        break
                    }
                };
                match rmp_serde::decode::from_slice::<Envelope>(&frame) {
                    Ok(envelope) => {
                        if inbound.send(envelope).is_err() {
                            break
                        }
                    }
                    Err(e) => error!("undecodable message from {}: {}", remote, e),
                }
            }
            debug!("connection from {} closed", remote);
        })
    }

    fn connect_with_retry(addr: SocketAddr) -> io::Result<TcpStream> {
        let delays = ExponentialBackoff::new(RETRY_WAIT, RETRY_MAX_WAIT, 2).take(CONNECT_ATTEMPTS);

        retry(delays, || TcpStream::connect(addr), |e, delay| {
            debug!("connect to {} failed: {}; retrying in {:?}", addr, e, delay)
        })
    }
}

impl Communicator for TcpCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn send(&self, rank: usize, tag: Tag, message: Vec<u8>) -> Result<()> {
        if rank >= self.size {
            return Err(Error::Communication(format!("no rank {} in a world of {}", rank, self.size)))
        }
        let envelope = Envelope { source: self.rank, tag, data: message };

        if rank == self.rank {
            return self.loopback
                .send(envelope)
                .map_err(|_| Error::Communication("loopback channel closed".to_string()))
        }
        self.outbound
            .as_ref()
            .ok_or_else(|| Error::Communication("communicator is shutting down".to_string()))?
            .send((rank, envelope))
            .map_err(|_| Error::Communication("sender thread has stopped".to_string()))
    }

    fn try_recv(&self, source: usize, tag: Tag) -> Result<Option<Vec<u8>>> {
        self.mailbox.try_take(source, tag)
    }

    fn recv(&self, source: usize, tag: Tag) -> Result<Vec<u8>> {
        self.mailbox.take(source, tag)
    }
}

impl Drop for TcpCommunicator {
    fn drop(&mut self) {
        self.outbound.take();

        if let Some(handle) = self.send_thread.take() {
            if handle.join().is_err() {
                error!("sender thread panicked")
            }
        }
        self.shutdown.store(true, Ordering::SeqCst);

        if let Some(handle) = self.listen_thread.take() {
            if handle.join().is_err() {
                error!("listener thread panicked")
            }
        }
    }
}

fn io_error(addr: &SocketAddr, e: io::Error) -> Error {
    Error::Communication(format!("{}: {}", addr, e))
}

#[cfg(test)]
mod test {

    use std::net::{SocketAddr, TcpListener};
    use crate::error::Error;
    use crate::message::comm::Communicator;
    use super::TcpCommunicator;

    #[test]
    fn two_ranks_exchange_tagged_messages() {
        let listeners: Vec<TcpListener> = (0..2).map(|_| TcpListener::bind("127.0.0.1:0").unwrap()).collect();
        let peers: Vec<SocketAddr> = listeners.iter().map(|l| l.local_addr().unwrap()).collect();

        let handles: Vec<_> = listeners
            .into_iter()
            .enumerate()
            .map(|(rank, listener)| {
                let peers = peers.clone();
                std::thread::spawn(move || {
                    let comm = TcpCommunicator::with_listener(rank, listener, peers).unwrap();
                    let other = 1 - rank;
                    comm.send(other, 1, vec![rank as u8; 3]).unwrap();
                    comm.send(other, 2, vec![10 + rank as u8]).unwrap();
                    comm.send(rank, 2, vec![20]).unwrap();
                    let b = comm.recv(other, 2).unwrap();
                    let a = comm.recv(other, 1).unwrap();
                    let own = comm.recv(rank, 2).unwrap();
                    (a, b, own)
                })
            })
            .collect();

        for (rank, handle) in handles.into_iter().enumerate() {
            let (a, b, own) = handle.join().unwrap();
            let other = 1 - rank as u8;
            assert_eq!(a, vec![other; 3]);
            assert_eq!(b, vec![10 + other]);
            assert_eq!(own, vec![20]);
        }
    }

    #[test]
    fn rank_without_an_address_is_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let peers = vec![listener.local_addr().unwrap()];
        assert!(matches!(TcpCommunicator::with_listener(1, listener, peers), Err(Error::Configuration(_))));
    }
}
