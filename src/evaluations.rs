use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::model::EvaluationEnvelope;
use crate::request::{join_ordered, retry_fetch};
use crate::{Endpoints, Evaluation, Fetch, Fetched, Request, Result, RetryPolicy};

/// Evaluations fetched for a list of ids. `evaluations[i]` belongs to `ids[i]`,
/// `None` where the fetch gave up.
#[derive(Debug, Default)]
pub struct EvaluationBatch {
    pub evaluations: Vec<Option<Evaluation>>,
    /// Failure-log entries produced while fetching.
    pub failures: Vec<String>,
}

impl EvaluationBatch {
    pub fn missing(&self) -> usize {
        self.evaluations.iter().filter(|e| e.is_none()).count()
    }
}

/// Fetches one evaluation. Exhausted retries, or a body that isn't an evaluation, come back as
/// `Err(failure_marker)` instead of aborting anything.
pub async fn fetch_evaluation<F: Fetch + ?Sized>(
    fetcher: &F,
    endpoints: &Endpoints,
    policy: RetryPolicy,
    eval_id: &str,
) -> Result<std::result::Result<Evaluation, String>> {
    let request = Request::post(endpoints.evaluation(eval_id)?);
    let res = match retry_fetch(fetcher, &request, policy).await {
        Fetched::Response(res) => res,
        Fetched::Exhausted { target } => return Ok(Err(target)),
    };

    match res.json::<EvaluationEnvelope>() {
        Ok(EvaluationEnvelope { d: Some(eval) }) => Ok(Ok(eval)),
        Ok(EvaluationEnvelope { d: None }) => {
            warn!(%eval_id, "evaluation endpoint returned no record");
            Ok(Err(request.url))
        }
        Err(e) => {
            warn!(%eval_id, "Failed to decode evaluation: {e}");
            Ok(Err(request.url))
        }
    }
}

/// Fetches `ids` in chunks of `chunk_size`. Chunks run one after another, the fetches inside a
/// chunk run concurrently. Output order matches `ids`.
pub async fn fetch_evaluations<F: Fetch>(
    fetcher: Arc<F>,
    endpoints: &Endpoints,
    policy: RetryPolicy,
    ids: &[String],
    chunk_size: usize,
) -> Result<EvaluationBatch> {
    let mut batch = EvaluationBatch {
        evaluations: Vec::with_capacity(ids.len()),
        failures: Vec::new(),
    };

    for chunk in ids.chunks(chunk_size.max(1)) {
        info!("\t{}/{}", batch.evaluations.len(), ids.len());

        let mut task_set = JoinSet::new();
        for (idx, eval_id) in chunk.iter().enumerate() {
            task_set.spawn({
                let fetcher = fetcher.clone();
                let endpoints = endpoints.clone();
                let eval_id = eval_id.clone();
                async move {
                    let fetched =
                        fetch_evaluation(fetcher.as_ref(), &endpoints, policy, &eval_id).await;
                    (idx, fetched)
                }
            });
        }

        for fetched in join_ordered(task_set, chunk.len()).await? {
            match fetched? {
                Ok(eval) => batch.evaluations.push(Some(eval)),
                Err(failure) => {
                    batch.failures.push(failure);
                    batch.evaluations.push(None);
                }
            }
        }
    }

    Ok(batch)
}
