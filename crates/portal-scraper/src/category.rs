//! Data categories scraped from the portal and the records they produce.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// One of the independent data domains extracted per job.
///
/// The derived ordering is the order categories are scraped in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Attendance,
    MidMarks,
    PersonalDetails,
}

impl Category {
    pub const ALL: [Category; 3] = [
        Category::Attendance,
        Category::MidMarks,
        Category::PersonalDetails,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Attendance => "attendance",
            Category::MidMarks => "mid_marks",
            Category::PersonalDetails => "personal_details",
        }
    }

    /// Message shown on the job while this category is being scraped.
    pub fn activity_message(&self) -> &'static str {
        match self {
            Category::Attendance => "Scraping attendance data",
            Category::MidMarks => "Scraping mid marks data",
            Category::PersonalDetails => "Scraping personal details",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single scraped row: field name to value.
pub type Record = BTreeMap<String, serde_json::Value>;

/// Ordered records extracted for one category.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordSet {
    pub category: Option<Category>,
    pub records: Vec<Record>,
}

impl RecordSet {
    pub fn new(category: Category, records: Vec<Record>) -> Self {
        Self {
            category: Some(category),
            records,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Serializes the records as the JSON document that is stored and uploaded.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(&self.records)
    }
}
