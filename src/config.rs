use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use reqwest::Url;

use crate::{
    Error, Result, BASE_URL, CHUNK_SIZE, DATA_DIR, FLUSH_THRESHOLD, REQUEST_TIMEOUT_SECS,
    RETRIES, RETRY_DELAY_SECS,
};

/// How often, and how patiently, a request is retried after a non-success.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: RETRIES,
            delay: Duration::from_secs(RETRY_DELAY_SECS),
        }
    }
}

/// Builds the URLs of the three upstream endpoints.
#[derive(Clone, Debug)]
pub struct Endpoints {
    base_url: String,
}

impl Endpoints {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn instructor_search(&self, query: &str) -> Result<String> {
        self.with_param("/results/default.aspx/GetInstructorsByName", "query", query)
    }

    pub fn instructor_page(&self, key: i64) -> Result<String> {
        self.with_param("/results/instructor.aspx", "ik", &key.to_string())
    }

    pub fn evaluation(&self, eval_id: &str) -> Result<String> {
        self.with_param("/results/Instructor.aspx/GetEvaluation", "e", eval_id)
    }

    fn with_param(&self, path: &str, name: &str, value: &str) -> Result<String> {
        let url = Url::parse_with_params(&format!("{}{path}", self.base_url), &[(name, value)])
            .map_err(|e| Error::Config(format!("bad base url '{}': {e}", self.base_url)))?;
        Ok(url.into())
    }
}

impl Default for Endpoints {
    fn default() -> Self {
        Self::new(BASE_URL)
    }
}

/// Everything a crawl run needs to know. Defaults come from the crate constants.
#[derive(Clone, Debug)]
pub struct CrawlConfig {
    pub endpoints: Endpoints,
    /// Directory holding the ledger, the cached instructor list and all output files.
    pub data_dir: PathBuf,
    pub retry: RetryPolicy,
    pub request_timeout: Duration,
    pub chunk_size: usize,
    pub flush_threshold: usize,
    /// Flush whatever is left below the threshold once every instructor was visited.
    pub terminal_flush: bool,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            endpoints: Endpoints::default(),
            data_dir: PathBuf::from(DATA_DIR),
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            chunk_size: CHUNK_SIZE,
            flush_threshold: FLUSH_THRESHOLD,
            terminal_flush: true,
        }
    }
}

impl CrawlConfig {
    /// Defaults, overridden by any `EVALCRAWL_*` variables in the environment or a `.env` file.
    pub fn from_env() -> Result<Self> {
        let _ = dotenv::dotenv();
        let mut config = Self::default();

        if let Ok(url) = dotenv::var("EVALCRAWL_BASE_URL") {
            config.endpoints = Endpoints::new(url);
        }
        if let Ok(dir) = dotenv::var("EVALCRAWL_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(retries) = env_parse("EVALCRAWL_RETRIES")? {
            config.retry.retries = retries;
        }
        if let Some(secs) = env_parse("EVALCRAWL_RETRY_DELAY_SECS")? {
            config.retry.delay = Duration::from_secs(secs);
        }
        if let Some(chunk_size) = env_parse("EVALCRAWL_CHUNK_SIZE")? {
            config.chunk_size = chunk_size;
        }
        if let Some(threshold) = env_parse("EVALCRAWL_FLUSH_THRESHOLD")? {
            config.flush_threshold = threshold;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::Config("chunk size must be at least 1".into()));
        }
        // Catches a malformed base url before the crawl starts.
        self.endpoints.instructor_page(0)?;
        Ok(())
    }
}

fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match dotenv::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("{name}={raw}: {e}"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_encode_their_query() {
        let endpoints = Endpoints::new("http://localhost:3000/");
        let url = endpoints.instructor_search("a,").unwrap();
        assert_eq!(
            url,
            "http://localhost:3000/results/default.aspx/GetInstructorsByName?query=a%2C"
        );
        assert_eq!(
            endpoints.instructor_page(-1926156022).unwrap(),
            "http://localhost:3000/results/instructor.aspx?ik=-1926156022"
        );
        assert_eq!(
            endpoints.evaluation("20181_15_4576").unwrap(),
            "http://localhost:3000/results/Instructor.aspx/GetEvaluation?e=20181_15_4576"
        );
    }

    #[test]
    fn bad_base_url_is_a_config_error() {
        let config = CrawlConfig {
            endpoints: Endpoints::new("not a url"),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn defaults_follow_crate_constants() {
        let config = CrawlConfig::default();
        assert_eq!(config.retry.retries, 3);
        assert_eq!(config.retry.delay, Duration::from_secs(10));
        assert_eq!(config.chunk_size, 20);
        assert_eq!(config.flush_threshold, 200);
        assert!(config.terminal_flush);
    }
}
