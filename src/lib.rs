//! EVALUATION CRAWLER
//! Harvests the instructor directory and every instructor's evaluation records,
//! checkpointing progress so a crawl can be stopped and picked up again.

mod macros;

pub mod config;
pub mod discover;
mod error;
pub mod evaluations;
pub mod model;
pub mod parse;
pub mod process;
pub mod request;
pub mod store;

pub use config::{CrawlConfig, Endpoints, RetryPolicy};
pub use error::{Error, Result};
pub use model::{Evaluation, Instructor, Question};
pub use process::{CrawlSummary, Crawler};
pub use request::{Fetch, Fetched, HttpFetcher, Request, Response};

const BASE_URL: &str = "https://evaluations.ufl.edu";
const DATA_DIR: &str = ".";
/// Retries after the first attempt, so a target is tried `RETRIES + 1` times.
const RETRIES: u32 = 3;
const RETRY_DELAY_SECS: u64 = 10;
const REQUEST_TIMEOUT_SECS: u64 = 60;
/// Evaluations requested concurrently per chunk.
const CHUNK_SIZE: usize = 20;
/// Accumulated evaluations must exceed this before a flush happens.
const FLUSH_THRESHOLD: usize = 200;

const INSTRUCTORS_FILE: &str = "instructors.json";
const LEDGER_FILE: &str = "completed_instructors.json";
const SNAPSHOT_FILE: &str = "evaluations.json";
const NAMES_FILE: &str = "unique_instructor_names.txt";
const BATCH_DIR: &str = "evals";
const FAILURE_DIR: &str = "fails";
