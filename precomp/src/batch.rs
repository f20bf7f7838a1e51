//! Batch assembly over a pool of sample workers.
//!
//! Every epoch spawns `workers` threads. Worker `w` produces sample indices
//! `w, w + workers, w + 2 * workers, ...` with its own generator seeded from
//! `epoch_seed + w`, and sends them through its own bounded channel. The
//! consumer reads index `i` from worker `i % workers`, so batches come out in
//! index order and are reproducible whatever the thread timing.
//!
//! Dropping an [`Epoch`] cancels the workers and joins them.

use crate::config::TrainConfig;
use crate::dataset::{DatasetRegistry, ItemRef};
use crate::error::{PipelineError, Result};
use crate::producer::{Registries, Sample, SampleProducer};
use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, info, warn};
use ndarray::{stack, Array4, ArrayView3, Axis, ShapeError};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use shared::algo::worker_rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Consecutive samples of one epoch.
#[derive(Debug, Clone)]
pub struct Batch {
    pub index: usize,
    pub samples: Vec<Sample>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Inputs stacked as `(N, H, W, C)`.
    pub fn inputs(&self) -> std::result::Result<Array4<f64>, ShapeError> {
        let views: Vec<ArrayView3<f64>> = self.samples.iter().map(|s| s.input_image.view()).collect();
        stack(Axis(0), &views)
    }

    /// Targets stacked as `(N, H, W, C)`.
    pub fn targets(&self) -> std::result::Result<Array4<f64>, ShapeError> {
        let views: Vec<ArrayView3<f64>> = self.samples.iter().map(|s| s.target_image.view()).collect();
        stack(Axis(0), &views)
    }
}

/// Epoch size and execution policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochPlan {
    pub batch_size: usize,
    pub sample_size: usize,
    pub workers: usize,
    pub prefetch: usize,
    pub drop_last: bool,
    pub replacement: bool,
}

impl EpochPlan {
    pub fn from_config(config: &TrainConfig) -> Self {
        let settings = &config.pipeline;
        Self {
            batch_size: config.batch_size,
            sample_size: config.sample_size,
            workers: settings.worker_count(),
            prefetch: settings.prefetch_per_worker(config.batch_size),
            drop_last: settings.drop_last,
            replacement: settings.replacement,
        }
    }

    /// Samples produced per epoch.
    pub fn samples_per_epoch(&self) -> usize {
        if self.drop_last {
            self.sample_size / self.batch_size * self.batch_size
        } else {
            self.sample_size
        }
    }

    pub fn batches_per_epoch(&self) -> usize {
        if self.drop_last {
            self.sample_size / self.batch_size
        } else {
            self.sample_size.div_ceil(self.batch_size)
        }
    }
}

/// Produces epochs of batches from one run seed.
#[derive(Debug)]
pub struct BatchAssembler {
    producer: Arc<SampleProducer>,
    plan: EpochPlan,
    master: ChaCha8Rng,
    epochs_started: usize,
}

impl BatchAssembler {
    pub fn new(producer: SampleProducer, plan: EpochPlan, seed: u64) -> Self {
        Self {
            producer: Arc::new(producer),
            plan,
            master: ChaCha8Rng::seed_from_u64(seed),
            epochs_started: 0,
        }
    }

    /// Build the whole pipeline described by `config` with the default registries.
    pub fn from_config(config: &TrainConfig, datasets: DatasetRegistry) -> Result<Self> {
        Self::from_config_with(config, datasets, &Registries::default())
    }

    pub fn from_config_with(
        config: &TrainConfig,
        datasets: DatasetRegistry,
        registries: &Registries,
    ) -> Result<Self> {
        let producer = SampleProducer::build(config, datasets, registries)?;
        Ok(Self::new(
            producer,
            EpochPlan::from_config(config),
            config.pipeline.seed,
        ))
    }

    pub fn producer(&self) -> &Arc<SampleProducer> {
        &self.producer
    }

    pub fn plan(&self) -> &EpochPlan {
        &self.plan
    }

    /// Start the next epoch. Each call draws a new epoch seed from the run stream.
    pub fn epoch(&mut self) -> Epoch {
        let epoch_seed: u64 = self.master.gen();
        let order_seed: u64 = self.master.gen();
        let number = self.epochs_started;
        self.epochs_started += 1;

        let total = self.plan.samples_per_epoch();
        let order = (!self.plan.replacement)
            .then(|| Arc::new(sampling_order(self.producer.images(), total, order_seed)));

        info!(
            "Epoch {}: {} samples in {} batches on {} workers",
            number,
            total,
            self.plan.batches_per_epoch(),
            self.plan.workers
        );
        Epoch::spawn(
            Arc::clone(&self.producer),
            self.plan,
            total,
            epoch_seed,
            order,
        )
    }
}

/// Items for a without-replacement epoch: shuffled passes over the collection.
fn sampling_order(items: &[ItemRef], total: usize, seed: u64) -> Vec<ItemRef> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut order = Vec::with_capacity(total);
    while order.len() < total && !items.is_empty() {
        let mut pass = items.to_vec();
        pass.shuffle(&mut rng);
        let take = (total - order.len()).min(pass.len());
        order.extend(pass.into_iter().take(take));
    }
    order
}

type SampleResult = Result<Sample>;

struct WorkerTask {
    worker: usize,
    workers: usize,
    total: usize,
    epoch_seed: u64,
    producer: Arc<SampleProducer>,
    order: Option<Arc<Vec<ItemRef>>>,
    sender: Sender<SampleResult>,
    cancel: Arc<AtomicBool>,
}

impl WorkerTask {
    fn run(self) {
        let mut rng = worker_rng(self.epoch_seed, self.worker);
        let mut index = self.worker;
        while index < self.total {
            if self.cancel.load(Ordering::Relaxed) {
                debug!("Sample worker {} cancelled", self.worker);
                return;
            }

            let planned = self.order.as_ref().and_then(|order| order.get(index));
            let result = self.producer.produce_planned(index as u64, planned, &mut rng);
            let failed = result.is_err();
            // A closed channel means the epoch was dropped
            if self.sender.send(result).is_err() || failed {
                return;
            }
            index += self.workers;
        }
    }
}

/// Lazy, finite sequence of batches. Yields a fatal error once, then ends.
pub struct Epoch {
    receivers: Vec<Receiver<SampleResult>>,
    handles: Vec<JoinHandle<()>>,
    cancel: Arc<AtomicBool>,
    batch_size: usize,
    total: usize,
    next_sample: usize,
    next_batch: usize,
    finished: bool,
}

impl Epoch {
    fn spawn(
        producer: Arc<SampleProducer>,
        plan: EpochPlan,
        total: usize,
        epoch_seed: u64,
        order: Option<Arc<Vec<ItemRef>>>,
    ) -> Self {
        let workers = plan.workers.max(1).min(total.max(1));
        let cancel = Arc::new(AtomicBool::new(false));
        let mut receivers = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);

        for worker in 0..workers {
            let (sender, receiver) = bounded(plan.prefetch.max(1));
            let task = WorkerTask {
                worker,
                workers,
                total,
                epoch_seed,
                producer: Arc::clone(&producer),
                order: order.clone(),
                sender,
                cancel: Arc::clone(&cancel),
            };
            handles.push(std::thread::spawn(move || task.run()));
            receivers.push(receiver);
        }

        Self {
            receivers,
            handles,
            cancel,
            batch_size: plan.batch_size,
            total,
            next_sample: 0,
            next_batch: 0,
            finished: false,
        }
    }

    /// Batches still to come.
    pub fn remaining_batches(&self) -> usize {
        if self.finished {
            0
        } else {
            (self.total - self.next_sample).div_ceil(self.batch_size)
        }
    }

    fn fail(&mut self, err: PipelineError) -> Option<Result<Batch>> {
        self.finished = true;
        self.shutdown();
        Some(Err(err))
    }

    fn shutdown(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
        // Unblocks workers waiting on a full channel
        self.receivers.clear();
        for (worker, handle) in self.handles.drain(..).enumerate() {
            if handle.join().is_err() {
                warn!("Sample worker {} panicked", worker);
            }
        }
    }
}

impl Iterator for Epoch {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished || self.next_sample >= self.total {
            return None;
        }

        let workers = self.receivers.len();
        let end = (self.next_sample + self.batch_size).min(self.total);
        let mut samples = Vec::with_capacity(end - self.next_sample);

        for index in self.next_sample..end {
            let worker = index % workers;
            match self.receivers[worker].recv() {
                Ok(Ok(sample)) => samples.push(sample),
                Ok(Err(err)) => return self.fail(err),
                // Workers only hang up early by panicking
                Err(_) => return self.fail(PipelineError::WorkerPanicked { worker }),
            }
        }

        let batch = Batch {
            index: self.next_batch,
            samples,
        };
        debug!(
            "Batch {} ready ({} samples)",
            batch.index,
            batch.samples.len()
        );
        self.next_sample = end;
        self.next_batch += 1;
        if self.next_sample >= self.total {
            self.finished = true;
        }
        Some(Ok(batch))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining_batches()))
    }
}

impl Drop for Epoch {
    fn drop(&mut self) {
        self.shutdown();
    }
}
