use std::sync::OnceLock;

use regex::Regex;
use tracing::error;

use crate::request::retry_fetch;
use crate::{Endpoints, Fetch, Fetched, Instructor, Request, Result, RetryPolicy};

/// Attribute carrying an evaluation id on the instructor page.
const EVAL_ID_MARKER: &str = "x-data-evalid";
const EVAL_ID_PREFIX: &str = "x-data-evalid=\"";
const EVAL_ID_SUFFIX: &str = "\"";

fn eval_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"x-data-evalid="[A-Z0-9_-]*""#).expect("valid eval id regex"))
}

/// Ids found on an instructor page, plus the marker count they were checked against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedIds {
    pub ids: Vec<String>,
    /// Marker occurrences minus the one inside the page's own script.
    pub expected: usize,
}

impl ExtractedIds {
    pub fn is_consistent(&self) -> bool {
        self.ids.len() == self.expected
    }
}

/// Pulls every evaluation id out of an instructor page.
pub fn extract_eval_ids(page: &str) -> ExtractedIds {
    let expected = page.matches(EVAL_ID_MARKER).count().saturating_sub(1);
    let ids = eval_id_regex()
        .find_iter(page)
        .filter_map(|m| {
            m.as_str()
                .strip_prefix(EVAL_ID_PREFIX)
                .and_then(|s| s.strip_suffix(EVAL_ID_SUFFIX))
                .map(str::to_string)
        })
        .collect();
    ExtractedIds { ids, expected }
}

/// What fetching one instructor's page produced.
#[derive(Debug)]
pub enum PageIds {
    Found {
        ids: Vec<String>,
        /// Failure-log entries for an id count that disagrees with the marker count.
        mismatch: Option<[String; 2]>,
    },
    /// The page itself could not be fetched. Holds the exhausted target.
    Unavailable(String),
}

/// Fetches an instructor's results page and extracts its evaluation ids.
/// A count mismatch is reported but the extracted ids are still returned.
pub async fn fetch_eval_ids<F: Fetch + ?Sized>(
    fetcher: &F,
    endpoints: &Endpoints,
    policy: RetryPolicy,
    instructor: &Instructor,
) -> Result<PageIds> {
    let request = Request::get(endpoints.instructor_page(instructor.key)?);
    let page = match retry_fetch(fetcher, &request, policy).await {
        Fetched::Response(res) => res.body,
        Fetched::Exhausted { target } => return Ok(PageIds::Unavailable(target)),
    };

    let extracted = extract_eval_ids(&page);
    let mismatch = if extracted.is_consistent() {
        None
    } else {
        error!(
            key = instructor.key,
            "Id pattern matched fewer ids than there really are (found {} of {})",
            extracted.ids.len(),
            extracted.expected
        );
        Some([serde_json::to_string(instructor)?, page])
    };

    Ok(PageIds::Found {
        ids: extracted.ids,
        mismatch,
    })
}
