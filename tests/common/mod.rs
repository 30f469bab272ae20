use std::thread;
use patchxfer::message::channel::ChannelCommunicator;

/// Run `f` once per rank, each on its own thread with its own channel
/// communicator, and collect the results in rank order.
pub fn run_ranks<F, T>(size: usize, f: F) -> Vec<T>
where
    F: Fn(ChannelCommunicator) -> T + Send + Clone + 'static,
    T: Send + 'static,
{
    let handles: Vec<_> = ChannelCommunicator::world(size)
        .into_iter()
        .map(|comm| {
            let f = f.clone();
            thread::spawn(move || f(comm))
        })
        .collect();

    handles.into_iter().map(|h| h.join().unwrap()).collect()
}
