use serde::{Deserialize, Serialize};

/// One row of the instructor directory. `key` is the identity, everything else is informational.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Instructor {
    /// "Johnson,Sally E"
    pub name: String,
    pub key: i64,
    /// "20118"
    #[serde(default)]
    pub term5: String,
    /// "Fall 2011"
    #[serde(default)]
    pub term_name: String,
    /// "20118 <em>Fall 2011</em>"
    #[serde(default)]
    pub term_full: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Evaluation {
    #[serde(rename = "__type", default)]
    pub type_name: String,
    /// "20181_1510547920_4576"
    pub key2: String,
    #[serde(default)]
    pub term: String,
    #[serde(default)]
    pub term_lit: String,
    #[serde(default)]
    pub college_code: String,
    #[serde(default)]
    pub college_name: String,
    pub department_code: Option<String>,
    #[serde(default)]
    pub department_name: String,
    #[serde(default)]
    pub course: String,
    #[serde(default)]
    pub course_title: String,
    #[serde(default)]
    pub section: String,
    pub instructor_title: Option<String>,
    #[serde(default)]
    pub is_publicly_available: bool,
    #[serde(default)]
    pub enrolled: u32,
    #[serde(default)]
    pub responded: u32,
    #[serde(default)]
    pub response_rate: f64,
    #[serde(default)]
    pub instructor_name: String,
    pub original_source: Option<String>,
    #[serde(default)]
    pub questions: Vec<Question>,
}

/// A prompt and its 0..=5 rating histogram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Question {
    #[serde(rename = "ID")]
    pub id: i64,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub zeros: u32,
    #[serde(default)]
    pub ones: u32,
    #[serde(default)]
    pub twos: u32,
    #[serde(default)]
    pub threes: u32,
    #[serde(default)]
    pub fours: u32,
    #[serde(default)]
    pub fives: u32,
    #[serde(default)]
    pub mean: f64,
    #[serde(default)]
    pub st_dev: f64,
}

impl Question {
    /// Response counts indexed by rating.
    pub fn histogram(&self) -> [u32; 6] {
        [
            self.zeros,
            self.ones,
            self.twos,
            self.threes,
            self.fours,
            self.fives,
        ]
    }
}

/// Body of the instructor search endpoint: `{"d": {"aaData": [...]}}`.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct SearchEnvelope {
    #[serde(default)]
    pub d: Option<SearchData>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct SearchData {
    #[serde(rename = "aaData", default)]
    pub aa_data: Option<Vec<Instructor>>,
}

impl SearchEnvelope {
    pub fn into_instructors(self) -> Vec<Instructor> {
        self.d.and_then(|d| d.aa_data).unwrap_or_default()
    }
}

/// Body of the evaluation endpoint: `{"d": {...}}`.
#[derive(Debug, Deserialize)]
pub(crate) struct EvaluationEnvelope {
    pub d: Option<Evaluation>,
}
