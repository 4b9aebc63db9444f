//! Worker pool for blocking application work.
//!
//! Jobs are tagged with the connection that asked for them. Every job for a
//! given connection serial goes to the same worker, so its completions come
//! back in submission order. Results travel back over a channel and the
//! loop is woken through its `mio::Waker`; the loop alone decides whether
//! the connection is still around to receive them.

use bytes::Bytes;
use mio::Waker;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

use crate::runtime::application::Job;
use crate::runtime::connection::ConnectionId;

struct Task {
    conn: ConnectionId,
    serial: u64,
    job: Job,
}

/// A finished job, addressed to a specific connection incarnation.
#[derive(Debug)]
pub struct Completion {
    pub conn: ConnectionId,
    pub serial: u64,
    pub response: Option<Bytes>,
}

/// Fixed set of worker threads, each with its own job queue.
pub struct OffloadPool {
    queues: Vec<UnboundedSender<Task>>,
    completions: UnboundedReceiver<Completion>,
    workers: Vec<JoinHandle<()>>,
}

impl OffloadPool {
    /// Spawn `workers` threads (at least one).
    pub fn new(workers: usize, waker: Arc<Waker>) -> io::Result<Self> {
        let (done_tx, done_rx) = mpsc::unbounded_channel();

        let count = workers.max(1);
        let mut queues = Vec::with_capacity(count);
        let mut handles = Vec::with_capacity(count);
        for worker_id in 0..count {
            let (job_tx, job_rx) = mpsc::unbounded_channel();
            let done_tx = done_tx.clone();
            let waker = Arc::clone(&waker);

            let handle = thread::Builder::new()
                .name(format!("offload-{worker_id}"))
                .spawn(move || worker_loop(worker_id, job_rx, done_tx, waker))?;
            queues.push(job_tx);
            handles.push(handle);
        }

        Ok(Self {
            queues,
            completions: done_rx,
            workers: handles,
        })
    }

    /// Queue a job on the worker owning `serial`. Returns false if that
    /// worker has gone away.
    pub fn submit(&self, conn: ConnectionId, serial: u64, job: Job) -> bool {
        let worker = (serial % self.queues.len() as u64) as usize;
        self.queues[worker].send(Task { conn, serial, job }).is_ok()
    }

    /// Completions that have arrived since the last call.
    pub fn drain(&mut self) -> Vec<Completion> {
        let mut done = Vec::new();
        while let Ok(completion) = self.completions.try_recv() {
            done.push(completion);
        }
        done
    }

    pub fn workers(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for OffloadPool {
    fn drop(&mut self) {
        // Closing the queues ends each worker's recv loop.
        self.queues.clear();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(
    worker_id: usize,
    mut jobs: UnboundedReceiver<Task>,
    done: UnboundedSender<Completion>,
    waker: Arc<Waker>,
) {
    while let Some(task) = jobs.blocking_recv() {
        let response = (task.job)();
        let completion = Completion {
            conn: task.conn,
            serial: task.serial,
            response,
        };
        if done.send(completion).is_err() {
            break;
        }
        if let Err(e) = waker.wake() {
            warn!(worker = worker_id, error = %e, "Failed to wake event loop");
        }
    }
    debug!(worker = worker_id, "Offload worker stopped");
}
