//! Parallel fan-out of records across worker threads with incremental
//! durability: skip-completed before limit, bounded result streaming, commits
//! (and progress, and cancellation checks) at one cadence.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;

use tracing::{info, warn};

use crate::checkpoint::CheckpointStore;
use crate::config::PipelineConfig;
use crate::errors::ResolveError;
use crate::llm::{LlmClient, SubmissionGate};
use crate::normalize::Normalizer;
use crate::registry::{RegistryPaths, RegistryQuery};
use crate::resolver::Resolver;
use crate::supplier::RawRecord;
use crate::types::InputId;

/// Cooperative cancellation signal shared between coordinator and workers.
///
/// Workers check it between cascade steps; the coordinator checks it at
/// commit boundaries and stops dispatching new work.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Fresh, unsignalled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once cancellation was signalled.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Outcome of one pipeline run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunSummary {
    /// Records resolved and upserted during this run.
    pub processed: usize,
    /// Records not dispatched: already completed, duplicated, or beyond the
    /// limit.
    pub skipped: usize,
    /// Records planned for this run after skipping and limiting.
    pub total: usize,
    /// Whether the run ended through cancellation.
    pub cancelled: bool,
}

/// Builds one adapter per worker; `None` selects the heuristic-only path.
pub type ClientFactory<'a> =
    &'a (dyn Fn(SubmissionGate) -> Option<Box<dyn LlmClient>> + Sync);

enum WorkerMessage {
    Resolved(crate::resolver::MatchResult),
    Fatal(ResolveError),
}

/// Drop already-completed and duplicate records, then apply the limit.
///
/// The order matters: limiting before filtering would re-count completed
/// rows against the cap and reduce useful work to zero on re-runs.
fn plan_work(
    records: Vec<RawRecord>,
    skip_ids: &HashSet<InputId>,
    limit: Option<usize>,
) -> (Vec<RawRecord>, usize) {
    let mut seen: HashSet<InputId> = HashSet::new();
    let mut planned = Vec::new();
    let mut skipped = 0;
    for record in records {
        let Some(input_id) = record.input_id() else {
            warn!("record without a derivable input id, skipping");
            skipped += 1;
            continue;
        };
        if skip_ids.contains(&input_id) || !seen.insert(input_id) {
            skipped += 1;
            continue;
        }
        planned.push(record);
    }
    if let Some(limit) = limit
        && planned.len() > limit
    {
        skipped += planned.len() - limit;
        planned.truncate(limit);
    }
    (planned, skipped)
}

/// Run the full pipeline over `records`.
///
/// Workers are self-contained: each opens its own registry handle, builds its
/// own adapter through `client_factory`, and owns its normalization cache.
/// The coordinator owns the checkpoint store exclusively and commits every
/// `batch_size` upserts.
pub fn run_pipeline(
    config: &PipelineConfig,
    paths: &RegistryPaths,
    records: Vec<RawRecord>,
    store: &mut CheckpointStore,
    cancel: &CancelToken,
    client_factory: ClientFactory<'_>,
) -> Result<RunSummary, ResolveError> {
    let skip_ids = store.processed_ids(!config.retry_errors);
    info!(completed = skip_ids.len(), "resume state loaded");
    let (planned, skipped) = plan_work(records, &skip_ids, config.limit);
    let total = planned.len();
    if total == 0 {
        info!("nothing to process");
        return Ok(RunSummary {
            processed: 0,
            skipped,
            total,
            cancelled: cancel.is_cancelled(),
        });
    }

    let workers = config.effective_workers().min(total).max(1);
    let batch_size = config.batch_size.max(1);
    let gate = SubmissionGate::new(config.llm_min_interval / workers as u32);
    let queue: Arc<Mutex<VecDeque<RawRecord>>> = Arc::new(Mutex::new(planned.into()));

    info!(workers, total, batch_size = config.batch_size, "dispatching records");
    let started = Instant::now();
    let mut processed = 0usize;
    let mut first_fatal: Option<ResolveError> = None;

    thread::scope(|scope| -> Result<(), ResolveError> {
        // The receiver lives inside the scope so an early coordinator exit
        // drops it, failing worker sends instead of deadlocking them.
        let (sender, receiver) = mpsc::sync_channel::<WorkerMessage>(workers * 2);
        for _ in 0..workers {
            let sender = sender.clone();
            let queue = Arc::clone(&queue);
            let gate = gate.clone();
            scope.spawn(move || {
                let mut registry = match RegistryQuery::open(paths) {
                    Ok(registry) => registry,
                    Err(err) => {
                        let _ = sender.send(WorkerMessage::Fatal(err));
                        return;
                    }
                };
                let client = client_factory(gate);
                let mut normalizer = Normalizer::new(client, config.normalize_cache_capacity);
                loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let record = queue.lock().expect("work queue poisoned").pop_front();
                    let Some(record) = record else {
                        break;
                    };
                    let mut resolver =
                        Resolver::new(&mut registry, &mut normalizer, Some(cancel));
                    match resolver.resolve(&record) {
                        Ok(result) => {
                            if sender.send(WorkerMessage::Resolved(result)).is_err() {
                                break;
                            }
                        }
                        // Cancelled mid-record: unfinished work is discarded.
                        Err(_) => break,
                    }
                }
            });
        }
        drop(sender);

        for message in receiver.iter() {
            match message {
                WorkerMessage::Resolved(result) => {
                    store.upsert(&result);
                    processed += 1;
                    if processed % batch_size == 0 {
                        store.commit()?;
                        report_progress(processed, total, &started);
                        if cancel.is_cancelled() {
                            queue.lock().expect("work queue poisoned").clear();
                        }
                    }
                }
                WorkerMessage::Fatal(err) => {
                    warn!(error = %err, "worker failed to start");
                    if first_fatal.is_none() {
                        first_fatal = Some(err);
                    }
                    queue.lock().expect("work queue poisoned").clear();
                }
            }
        }
        Ok(())
    })?;

    store.commit()?;
    report_progress(processed, total, &started);

    if processed == 0
        && let Some(fatal) = first_fatal
    {
        return Err(fatal);
    }

    Ok(RunSummary {
        processed,
        skipped,
        total,
        cancelled: cancel.is_cancelled(),
    })
}

/// Emit one progress record: processed, total, rolling rate, ETA.
fn report_progress(processed: usize, total: usize, started: &Instant) {
    let elapsed = started.elapsed().as_secs_f64();
    let rate = if elapsed > 0.0 {
        processed as f64 / elapsed
    } else {
        0.0
    };
    let remaining = total.saturating_sub(processed);
    let eta_minutes = if rate > 0.0 {
        remaining as f64 / rate / 60.0
    } else {
        0.0
    };
    info!(
        processed,
        total,
        rate_per_sec = format_args!("{rate:.1}"),
        eta_minutes = format_args!("{eta_minutes:.1}"),
        "progress"
    );
}
