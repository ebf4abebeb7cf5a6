use std::sync::Arc;

use chrono::{DateTime, Local};
use tracing::{error, info, warn};

use crate::discover::{dedup_instructors, discover_instructors};
use crate::evaluations::fetch_evaluations;
use crate::parse::{fetch_eval_ids, PageIds};
use crate::store::{FailureLog, Ledger, Store};
use crate::{info_time, CrawlConfig, Evaluation, Fetch, HttpFetcher, Instructor, Result};

/// Entry point of the binary: a full crawl over HTTP with the configuration from the environment.
pub async fn process_site() -> Result<CrawlSummary> {
    let config = CrawlConfig::from_env()?;
    let fetcher = Arc::new(HttpFetcher::new(config.request_timeout)?);
    Crawler::new(fetcher, config).run().await
}

/// Counters reported at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlSummary {
    pub instructors: usize,
    pub unique_instructors: usize,
    /// Already in the ledger when the run started.
    pub skipped: usize,
    /// Fully processed during this run.
    pub processed: usize,
    /// Instructors whose results page never came back. They stay out of the ledger.
    pub unavailable: usize,
    pub evaluations: usize,
    pub missing_evaluations: usize,
    pub mismatches: usize,
    /// Failure-log entries produced during this run.
    pub failures: usize,
    pub batches: usize,
    /// Records in the merged snapshot, if one was written.
    pub snapshot: Option<usize>,
}

/// Everything that changes while the crawl loop runs.
#[derive(Debug)]
pub struct CrawlState {
    pub ledger: Ledger,
    /// Evaluations not yet written to a batch file.
    pub accumulated: Vec<Evaluation>,
    /// Instructors whose evaluations sit in `accumulated`. Joins the ledger on the next flush.
    pub pending: Vec<i64>,
    pub failures: FailureLog,
    pub summary: CrawlSummary,
}

impl CrawlState {
    pub fn new(ledger: Ledger) -> Self {
        Self {
            ledger,
            accumulated: Vec::new(),
            pending: Vec::new(),
            failures: Vec::new(),
            summary: CrawlSummary::default(),
        }
    }
}

pub struct Crawler<F> {
    fetcher: Arc<F>,
    config: CrawlConfig,
    store: Store,
}

impl<F: Fetch> Crawler<F> {
    pub fn new(fetcher: Arc<F>, config: CrawlConfig) -> Self {
        let store = Store::new(config.data_dir.clone());
        Self {
            fetcher,
            config,
            store,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Runs the whole pipeline: ledger, instructors, per-instructor crawl, final flush, snapshot.
    pub async fn run(&self) -> Result<CrawlSummary> {
        let start_time = Local::now();
        info_time!("Started crawling");

        let ledger = self.store.load_ledger().await?;
        info!("{} completed instructors.", ledger.len());

        let (instructors, discovery_failures) = self.resolve_instructors().await?;
        let unique = dedup_instructors(&instructors);
        info!(
            "Fetching evaluations for {} unique instructors of {} instructors.",
            unique.len(),
            instructors.len()
        );
        self.store.save_names(&unique).await?;
        info!("Unique instructor names written.");

        let mut state = CrawlState::new(ledger);
        state.summary.instructors = instructors.len();
        state.summary.unique_instructors = unique.len();
        state.summary.failures += discovery_failures.len();
        state.failures.extend(discovery_failures);

        state = self.crawl(&unique, state, start_time).await?;

        if self.config.terminal_flush {
            if !state.accumulated.is_empty()
                || !state.pending.is_empty()
                || !state.failures.is_empty()
            {
                self.flush(&mut state).await?;
            }
            state.summary.snapshot = Some(self.store.write_snapshot(&[]).await?);
        } else {
            if !state.accumulated.is_empty() {
                warn!(
                    "{} evaluations below the flush threshold are only in the snapshot, their instructors stay out of the ledger.",
                    state.accumulated.len()
                );
            }
            state.summary.snapshot = Some(self.store.write_snapshot(&state.accumulated).await?);
        }

        let summary = state.summary;
        info_time!(
            start_time,
            "All done! {} evaluations from {} instructors, {} skipped, {} failures.",
            summary.evaluations,
            summary.processed,
            summary.skipped,
            summary.failures
        );
        Ok(summary)
    }

    /// Reads the cached instructor list, or discovers and caches it. Also returns the failure
    /// markers of a discovery pass, empty when the cache was used.
    pub async fn resolve_instructors(&self) -> Result<(Vec<Instructor>, FailureLog)> {
        if let Some(instructors) = self.store.load_instructors().await? {
            info!("Read {} instructors.", instructors.len());
            return Ok((instructors, FailureLog::new()));
        }

        info!("No instructors saved, fetching instructors...");
        let discovered = discover_instructors(
            self.fetcher.clone(),
            &self.config.endpoints,
            self.config.retry,
        )
        .await?;
        self.store.save_instructors(&discovered.instructors).await?;
        info!(
            "Instructors written to \"{}\".",
            self.store.instructors_path().display()
        );
        Ok((discovered.instructors, discovered.failures))
    }

    /// Visits `instructors` in order, skipping the ones in the ledger and flushing whenever the
    /// accumulated evaluations cross the threshold.
    pub async fn crawl(
        &self,
        instructors: &[Instructor],
        mut state: CrawlState,
        start_time: DateTime<Local>,
    ) -> Result<CrawlState> {
        for (i, inst) in instructors.iter().enumerate() {
            if state.ledger.contains(inst.key) {
                info!(
                    "Already fetched all evaluations for \"{}\", {}.",
                    inst.name, inst.key
                );
                state.summary.skipped += 1;
                continue;
            }

            self.crawl_instructor(inst, &mut state).await?;

            info_time!(
                start_time,
                "[{} of {} Instructors Complete] Running total is at {} evaluations with {} failures.",
                i + 1,
                instructors.len(),
                state.accumulated.len(),
                state.failures.len()
            );

            if state.accumulated.len() > self.config.flush_threshold {
                self.flush(&mut state).await?;
            }
        }
        Ok(state)
    }

    async fn crawl_instructor(&self, inst: &Instructor, state: &mut CrawlState) -> Result<()> {
        info!("Fetching evaluation IDs for \"{}\"...", inst.name);
        let (ids, mismatch) = match fetch_eval_ids(
            self.fetcher.as_ref(),
            &self.config.endpoints,
            self.config.retry,
            inst,
        )
        .await?
        {
            PageIds::Found { ids, mismatch } => (ids, mismatch),
            PageIds::Unavailable(target) => {
                error!(key = inst.key, "Results page unavailable, leaving instructor for the next run.");
                state.failures.push(target);
                state.summary.failures += 1;
                state.summary.unavailable += 1;
                return Ok(());
            }
        };
        if let Some(entries) = mismatch {
            state.summary.mismatches += 1;
            state.summary.failures += entries.len();
            state.failures.extend(entries);
        }

        info!("Fetching {} evaluations...", ids.len());
        let batch = fetch_evaluations(
            self.fetcher.clone(),
            &self.config.endpoints,
            self.config.retry,
            &ids,
            self.config.chunk_size,
        )
        .await?;

        let missing = batch.missing();
        if missing > 0 {
            error!(key = inst.key, "Failed to fetch {missing} evaluation(s).");
        }
        state.summary.missing_evaluations += missing;
        state.summary.failures += batch.failures.len();
        state.failures.extend(batch.failures);

        let fetched: Vec<Evaluation> = batch.evaluations.into_iter().flatten().collect();
        state.summary.evaluations += fetched.len();
        state.summary.processed += 1;
        state.accumulated.extend(fetched);
        state.pending.push(inst.key);
        info!("Fetched evaluations for instructor.");
        Ok(())
    }

    /// Writes the batch, then the failures, then the ledger. The ledger only advances once the
    /// batch is on disk.
    pub async fn flush(&self, state: &mut CrawlState) -> Result<()> {
        let tag = state.ledger.len();
        let saved = state.accumulated.len();
        let failures = state.failures.len();

        // Instructors without any evaluations need no batch to be ledgered.
        if !state.accumulated.is_empty() {
            self.store.write_batch(tag, &state.accumulated).await?;
            state.accumulated.clear();
            state.summary.batches += 1;
        }

        if !state.failures.is_empty() {
            self.store.write_failures(tag, &state.failures).await?;
            state.failures.clear();
        }

        let mut ledger = state.ledger.clone();
        ledger.extend(state.pending.iter().copied());
        self.store.save_ledger(&ledger).await?;
        state.ledger = ledger;
        state.pending.clear();

        info!("*** Saved {saved} evaluations and {failures} failures [{tag}]. ***");
        Ok(())
    }
}
