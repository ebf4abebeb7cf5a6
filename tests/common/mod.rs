#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use evalcrawl::{
    CrawlConfig, Endpoints, Evaluation, Fetch, Instructor, Request, Response, Result, RetryPolicy,
};
use reqwest::Url;
use serde_json::json;

pub const BASE_URL: &str = "http://upstream.test";

pub fn instructor(key: i64, name: &str) -> Instructor {
    Instructor {
        name: name.into(),
        key,
        term5: "20181".into(),
        term_name: "Spring 2018".into(),
        term_full: "20181 <em>Spring 2018</em>".into(),
    }
}

pub fn evaluation(id: &str, instructor: &str) -> Evaluation {
    serde_json::from_value(json!({
        "__type": "Web.Evaluations.PublicResults.Evaluation",
        "Key2": id,
        "Term": "20181",
        "TermLit": "2018 Spring",
        "CollegeCode": "LS",
        "CollegeName": "Liberal Arts and Sciences",
        "DepartmentCode": null,
        "DepartmentName": "Mathematics",
        "Course": "MAC2313",
        "CourseTitle": "Analyt Geom & Calc 3",
        "Section": "4576",
        "InstructorTitle": null,
        "IsPubliclyAvailable": false,
        "Enrolled": 30,
        "Responded": 24,
        "ResponseRate": 80,
        "InstructorName": instructor,
        "OriginalSource": null,
        "Questions": [{
            "ID": 1, "Text": "Overall", "Zeros": 0, "Ones": 0, "Twos": 1,
            "Threes": 3, "Fours": 8, "Fives": 12, "Mean": 4.29, "StDev": 0.86
        }]
    }))
    .unwrap()
}

/// Instructor results page listing `ids`, with the marker also used once in script.
pub fn results_page(ids: &[String]) -> String {
    let mut page = String::from(
        "<html><script>$(document).on('click', '[x-data-evalid]', openEval);</script><table>",
    );
    for id in ids {
        page.push_str(&format!(r#"<tr x-data-evalid="{id}"><td>{id}</td></tr>"#));
    }
    page.push_str("</table></html>");
    page
}

pub fn config(data_dir: &Path) -> CrawlConfig {
    CrawlConfig {
        endpoints: Endpoints::new(BASE_URL),
        data_dir: data_dir.to_path_buf(),
        retry: RetryPolicy {
            retries: 1,
            delay: Duration::ZERO,
        },
        ..Default::default()
    }
}

#[derive(Default)]
struct Flight {
    in_flight: usize,
    peak: usize,
    rounds: Vec<usize>,
}

/// In-memory stand-in for the evaluations site.
#[derive(Default)]
pub struct MockApi {
    search: HashMap<String, Vec<Instructor>>,
    rejected_queries: HashSet<String>,
    pages: HashMap<i64, String>,
    evaluations: HashMap<String, Evaluation>,
    requests: Mutex<Vec<String>>,
    flight: Mutex<Flight>,
}

impl MockApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_search(mut self, query: &str, rows: Vec<Instructor>) -> Self {
        self.search.insert(query.into(), rows);
        self
    }

    pub fn rejecting(mut self, query: &str) -> Self {
        self.rejected_queries.insert(query.into());
        self
    }

    pub fn with_page(mut self, key: i64, page: String) -> Self {
        self.pages.insert(key, page);
        self
    }

    /// Adds an instructor whose page lists `ids`, each served as an evaluation.
    pub fn with_instructor(mut self, inst: &Instructor, ids: &[&str]) -> Self {
        let ids: Vec<String> = ids.iter().map(|s| s.to_string()).collect();
        self.pages.insert(inst.key, results_page(&ids));
        for id in ids {
            self.evaluations
                .insert(id.clone(), evaluation(&id, &inst.name));
        }
        self
    }

    pub fn with_evaluation(mut self, eval: Evaluation) -> Self {
        self.evaluations.insert(eval.key2.clone(), eval);
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self, needle: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|url| url.contains(needle))
            .count()
    }

    /// Peak concurrency of every burst of evaluation requests, in order.
    pub fn evaluation_rounds(&self) -> Vec<usize> {
        self.flight.lock().unwrap().rounds.clone()
    }

    async fn serve_evaluation(&self, id: &str) -> Response {
        {
            let mut flight = self.flight.lock().unwrap();
            flight.in_flight += 1;
            flight.peak = flight.peak.max(flight.in_flight);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
        {
            let mut flight = self.flight.lock().unwrap();
            flight.in_flight -= 1;
            if flight.in_flight == 0 {
                let peak = flight.peak;
                flight.rounds.push(peak);
                flight.peak = 0;
            }
        }

        match self.evaluations.get(id) {
            Some(eval) => ok(json!({ "d": eval }).to_string()),
            None => status(500),
        }
    }
}

fn ok(body: String) -> Response {
    Response { status: 200, body }
}

fn status(status: u16) -> Response {
    Response {
        status,
        body: String::new(),
    }
}

#[async_trait]
impl Fetch for MockApi {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        self.requests.lock().unwrap().push(request.url.clone());

        let url = Url::parse(&request.url).unwrap();
        let param = |name: &str| {
            url.query_pairs()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.into_owned())
                .unwrap_or_default()
        };

        let res = match url.path() {
            "/results/default.aspx/GetInstructorsByName" => {
                let query = param("query");
                if self.rejected_queries.contains(&query) {
                    status(500)
                } else {
                    let rows = self.search.get(&query).cloned().unwrap_or_default();
                    ok(json!({ "d": { "aaData": rows } }).to_string())
                }
            }
            "/results/instructor.aspx" => {
                let key: i64 = param("ik").parse().unwrap();
                match self.pages.get(&key) {
                    Some(page) => ok(page.clone()),
                    None => status(404),
                }
            }
            "/results/Instructor.aspx/GetEvaluation" => {
                assert_eq!(request.method, reqwest::Method::POST);
                self.serve_evaluation(&param("e")).await
            }
            other => panic!("unexpected path {other}"),
        };
        Ok(res)
    }
}
