//! Dispatcher worker pool

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};

use crate::error::{NativeIoError, Result};
use crate::namespace::Namespace;
use crate::primitive::{Outcome, PrimitiveCall};
use crate::registry::Descriptor;

use super::Ticket;

/// A queued call and where to send its result
struct Job {
    call: PrimitiveCall,
    reply: Sender<Result<Outcome>>,
}

/// Runs primitive calls on a fixed pool of worker threads
///
/// Dropping the dispatcher stops accepting work, lets the workers drain
/// their queues and joins them.
pub struct Dispatcher {
    namespace: Arc<Namespace>,
    queues: Vec<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    /// Round-robin cursor for calls with no target file
    next: AtomicUsize,
}

impl Dispatcher {
    /// Start `workers` threads serving `namespace`
    pub fn new(namespace: Arc<Namespace>, workers: usize) -> Result<Self> {
        if workers == 0 {
            return Err(NativeIoError::Config(
                "dispatcher needs at least one worker".to_string(),
            ));
        }

        let mut queues = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers {
            let (sender, receiver) = channel::unbounded();
            let namespace = Arc::clone(&namespace);
            let handle = thread::Builder::new()
                .name(format!("nativeio-dispatch-{}", id))
                .spawn(move || run_worker(id, namespace, receiver))?;
            queues.push(sender);
            handles.push(handle);
        }

        tracing::debug!("Dispatcher started with {} worker(s)", workers);
        Ok(Self {
            namespace,
            queues,
            workers: handles,
            next: AtomicUsize::new(0),
        })
    }

    /// Queue a call; the ticket yields its result
    pub fn submit(&self, call: PrimitiveCall) -> Result<Ticket> {
        if self.queues.is_empty() {
            return Err(NativeIoError::Busy("dispatcher is shut down".to_string()));
        }

        let shard = self.shard(&call);
        let (reply, receiver) = channel::bounded(1);
        self.queues[shard]
            .send(Job { call, reply })
            .map_err(|_| NativeIoError::Busy(format!("dispatch worker {} has stopped", shard)))?;
        Ok(Ticket::new(receiver))
    }

    /// Number of worker threads
    pub fn worker_count(&self) -> usize {
        self.queues.len()
    }

    /// Stop accepting calls, finish queued ones and join the workers
    pub fn shutdown(&mut self) {
        self.queues.clear();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::error!("Dispatch worker panicked");
            }
        }
    }

    /// Worker for a call: every call on one file goes to the same worker
    ///
    /// Descriptor calls are keyed by the name of the file they refer to, so
    /// a close and a later delete of that name stay in submission order.
    fn shard(&self, call: &PrimitiveCall) -> usize {
        let workers = self.queues.len();
        if let Some(name) = call.name() {
            return hash_shard(name, workers);
        }
        if let Some(raw) = call.descriptor() {
            let Ok(fd) = Descriptor::from_raw(raw) else {
                return 0;
            };
            return match self.namespace.descriptor_name(fd) {
                Some(name) => hash_shard(&name, workers),
                // Stale descriptors fail wherever they run
                None => fd.slot() % workers,
            };
        }
        self.next.fetch_add(1, Ordering::Relaxed) % workers
    }
}

fn hash_shard(name: &str, workers: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    (hasher.finish() % workers as u64) as usize
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(id: usize, namespace: Arc<Namespace>, jobs: Receiver<Job>) {
    for job in jobs.iter() {
        let call_type = job.call.call_type();
        let result = namespace.execute(job.call);
        if let Err(e) = &result {
            tracing::debug!("Worker {}: {:?} failed: {}", id, call_type, e);
        }
        // The submitter may have dropped its ticket
        let _ = job.reply.send(result);
    }
    tracing::debug!("Dispatch worker {} exiting", id);
}
