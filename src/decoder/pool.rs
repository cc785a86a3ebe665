//! Barrier-synchronized decode workers

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Barrier};
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tracing::{debug, error, trace};

use super::DecodePlan;
use crate::store::{BLOCK_SIZE, SampleStore, fold_range};
use crate::{Result, TelemetryError};

/// One worker's share of a dispatch.
#[derive(Debug, Clone)]
pub(crate) struct Job {
    pub buffer: Arc<[u8]>,
    /// Byte offset of the worker's first packet in `buffer`
    pub offset: usize,
    pub block_count: usize,
    pub first_sample_index: u64,
}

#[derive(Default)]
struct WorkerSlot {
    job: Mutex<Option<Job>>,
    failure: Mutex<Option<TelemetryError>>,
}

struct Shared {
    new_data: Barrier,
    all_done: Barrier,
    shutdown: AtomicBool,
    slots: Vec<WorkerSlot>,
    plan: Arc<DecodePlan>,
    store: Arc<SampleStore>,
}

/// Persistent decode threads released together by the dispatcher.
///
/// Each dispatch hands every worker a disjoint run of whole blocks. Workers
/// wait on `new_data`, decode and write their blocks, then meet the dispatcher
/// at `all_done`. The dispatcher only publishes the new sample count after
/// `all_done`, so readers never observe a partially written dispatch.
pub(crate) struct WorkerPool {
    shared: Arc<Shared>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub(crate) fn new(worker_count: usize, plan: Arc<DecodePlan>, store: Arc<SampleStore>) -> Result<Self> {
        let shared = Arc::new(Shared {
            new_data: Barrier::new(worker_count + 1),
            all_done: Barrier::new(worker_count + 1),
            shutdown: AtomicBool::new(false),
            slots: (0..worker_count).map(|_| WorkerSlot::default()).collect(),
            plan,
            store,
        });

        // Workers wait on their start channel until every thread is spawned.
        let mut starts = Vec::with_capacity(worker_count);
        let mut handles = Vec::with_capacity(worker_count);
        for worker in 0..worker_count {
            match spawn_worker(worker) {
                Ok((start, handle)) => {
                    starts.push(start);
                    handles.push(handle);
                }
                Err(source) => {
                    abort_partial_start(starts, handles);
                    return Err(TelemetryError::Spawn { context: format!("decode worker {worker}"), source });
                }
            }
        }

        for (worker, start) in starts.into_iter().enumerate() {
            if start.send(Arc::clone(&shared)).is_err() {
                error!(worker, "Decode worker exited before start");
            }
        }

        debug!(workers = worker_count, "Decode worker pool started");
        Ok(Self { shared, handles })
    }

    pub(crate) fn worker_count(&self) -> usize {
        self.shared.slots.len()
    }

    /// Decode `blocks_per_worker` blocks per worker from `buffer`, which holds
    /// `worker_count * blocks_per_worker * BLOCK_SIZE` contiguous packets.
    pub(crate) fn dispatch(
        &self,
        buffer: Arc<[u8]>,
        packet_size: usize,
        blocks_per_worker: usize,
        first_sample_index: u64,
    ) -> Result<()> {
        let packets_per_worker = blocks_per_worker * BLOCK_SIZE;
        for (worker, slot) in self.shared.slots.iter().enumerate() {
            *slot.job.lock() = Some(Job {
                buffer: Arc::clone(&buffer),
                offset: worker * packets_per_worker * packet_size,
                block_count: blocks_per_worker,
                first_sample_index: first_sample_index + (worker * packets_per_worker) as u64,
            });
        }

        trace!(blocks_per_worker, first_sample_index, "Releasing decode workers");
        self.shared.new_data.wait();
        self.shared.all_done.wait();

        let mut first_failure = None;
        for slot in &self.shared.slots {
            if let Some(failure) = slot.failure.lock().take() {
                error!(error = %failure, "Decode worker failed");
                first_failure.get_or_insert(failure);
            }
        }
        first_failure.map_or(Ok(()), Err)
    }

    /// Stop and join every worker.
    pub(crate) fn shutdown(&mut self) {
        if self.handles.is_empty() {
            return;
        }
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.new_data.wait();
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                error!("Decode worker exited with a panic");
            }
        }
        debug!("Decode worker pool stopped");
    }
}

fn spawn_worker(worker: usize) -> std::io::Result<(Sender<Arc<Shared>>, JoinHandle<()>)> {
    let (start, started) = mpsc::channel::<Arc<Shared>>();
    let handle = std::thread::Builder::new().name(format!("framewire-decode-{worker}")).spawn(move || {
        if let Ok(shared) = started.recv() {
            worker_loop(worker, &shared);
        }
    })?;
    Ok((start, handle))
}

/// Release and join the workers started before a spawn failure.
///
/// Dropping the start channels wakes each worker before it reaches a barrier.
fn abort_partial_start(starts: Vec<Sender<Arc<Shared>>>, handles: Vec<JoinHandle<()>>) -> usize {
    drop(starts);
    let joined = handles.len();
    for handle in handles {
        if handle.join().is_err() {
            error!("Decode worker exited with a panic");
        }
    }
    debug!(joined, "Joined workers after a failed pool start");
    joined
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(worker: usize, shared: &Shared) {
    let mut matrix: Vec<Vec<f32>> = vec![vec![0.0; BLOCK_SIZE]; shared.plan.channels.len()];

    loop {
        shared.new_data.wait();
        if shared.shutdown.load(Ordering::Acquire) {
            break;
        }

        let job = shared.slots[worker].job.lock().take();
        if let Some(job) = job {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                decode_job(&job, &shared.plan, &shared.store, &mut matrix)
            }));
            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e),
                Err(_) => Some(TelemetryError::WorkerPanicked { worker }),
            };
            *shared.slots[worker].failure.lock() = failure;
        }

        shared.all_done.wait();
    }
}

/// Decode one job into the private matrix block by block and write each
/// finished block to the store.
pub(crate) fn decode_job(
    job: &Job,
    plan: &DecodePlan,
    store: &SampleStore,
    matrix: &mut [Vec<f32>],
) -> Result<()> {
    let stride = plan.packet_size;
    for block in 0..job.block_count {
        let block_offset = job.offset + block * BLOCK_SIZE * stride;
        let packets = &job.buffer[block_offset..block_offset + BLOCK_SIZE * stride];

        for (index, packet) in packets.chunks_exact(stride).enumerate() {
            for (channel, values) in matrix.iter_mut().enumerate() {
                values[index] = plan.value(channel, packet);
            }
        }

        let block_start = job.first_sample_index + (block * BLOCK_SIZE) as u64;
        for (channel, values) in matrix.iter().enumerate() {
            let range = values[1..].iter().fold((values[0], values[0]), |range, v| fold_range(range, *v));
            store.write_block(channel, block_start, values, range)?;
        }
    }
    Ok(())
}
