use std::collections::HashSet;
use std::sync::Arc;

use chrono::Local;
use tokio::task::JoinSet;
use tracing::debug;

use crate::model::SearchEnvelope;
use crate::request::{join_ordered, retry_fetch};
use crate::{info_time, Endpoints, Fetch, Fetched, Instructor, Request, Result, RetryPolicy};

/// Symbols the two-character search queries are built from.
pub const QUERY_ALPHABET: &str = "abcdefghijklmnopqrstuvwxyz,- ";

/// Every two-character query, first character cycling slowest.
pub fn keyspace() -> Vec<String> {
    QUERY_ALPHABET
        .chars()
        .flat_map(|first| QUERY_ALPHABET.chars().map(move |second| format!("{first}{second}")))
        .collect()
}

/// Result of a discovery pass.
#[derive(Debug, Default)]
pub struct Discovered {
    /// Every search row, in keyspace order, duplicates included.
    pub instructors: Vec<Instructor>,
    /// Targets of the searches that yielded nothing usable, in keyspace order.
    pub failures: Vec<String>,
}

/// Runs one search per keyspace query, all at once, and flattens the results in keyspace order.
/// A query the upstream rejects just contributes nothing besides its failure marker.
pub async fn discover_instructors<F: Fetch>(
    fetcher: Arc<F>,
    endpoints: &Endpoints,
    policy: RetryPolicy,
) -> Result<Discovered> {
    let start_time = Local::now();
    let queries = keyspace();
    info_time!("Searching instructors with {} queries", queries.len());

    let mut task_set = JoinSet::new();
    for (idx, query) in queries.iter().enumerate() {
        let request = Request::get(endpoints.instructor_search(query)?);
        task_set.spawn({
            let fetcher = fetcher.clone();
            async move { (idx, search(fetcher.as_ref(), &request, policy).await) }
        });
    }

    let mut discovered = Discovered::default();
    for result in join_ordered(task_set, queries.len()).await? {
        match result {
            Ok(rows) => discovered.instructors.extend(rows),
            Err(target) => discovered.failures.push(target),
        }
    }

    info_time!(
        start_time,
        "Fetched {} instructors ({} queries yielded nothing usable)",
        discovered.instructors.len(),
        discovered.failures.len()
    );
    Ok(discovered)
}

/// `Err` holds the failure marker of a rejected search.
async fn search<F: Fetch>(
    fetcher: &F,
    request: &Request,
    policy: RetryPolicy,
) -> std::result::Result<Vec<Instructor>, String> {
    let res = match retry_fetch(fetcher, request, policy).await {
        Fetched::Response(res) => res,
        Fetched::Exhausted { target } => {
            debug!(%target, "instructor search rejected");
            return Err(target);
        }
    };
    res.json::<SearchEnvelope>()
        .map(SearchEnvelope::into_instructors)
        .map_err(|e| {
            debug!(url = %request.url, "instructor search returned an unexpected body: {e}");
            request.url.clone()
        })
}

/// Keeps the first instructor seen for every key, in first-seen order.
pub fn dedup_instructors(instructors: &[Instructor]) -> Vec<Instructor> {
    let mut seen = HashSet::with_capacity(instructors.len());
    instructors
        .iter()
        .filter(|inst| seen.insert(inst.key))
        .cloned()
        .collect()
}
