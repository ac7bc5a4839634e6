//! Per-category navigation and parsing.

use std::sync::Arc;

use async_trait::async_trait;

use crate::category::{Category, Record, RecordSet};
use crate::config::PortalConfig;
use crate::portal::html::{self, Table};
use crate::portal::{PortalError, PortalSession};

/// Navigates to one category's page within a session and parses it.
#[async_trait]
pub trait CategoryExtractor: Send + Sync {
    fn category(&self) -> Category;

    async fn extract(
        &self,
        session: &mut dyn PortalSession,
        academic_year: &str,
    ) -> Result<RecordSet, PortalError>;
}

/// Extractor that fetches a single page and hands its body to a parser.
pub struct PageExtractor {
    category: Category,
    path: String,
    year_param: String,
    parse: fn(&str) -> Result<Vec<Record>, PortalError>,
}

impl PageExtractor {
    pub fn attendance(path: impl Into<String>, year_param: impl Into<String>) -> Self {
        Self {
            category: Category::Attendance,
            path: path.into(),
            year_param: year_param.into(),
            parse: parse_attendance,
        }
    }

    pub fn mid_marks(path: impl Into<String>, year_param: impl Into<String>) -> Self {
        Self {
            category: Category::MidMarks,
            path: path.into(),
            year_param: year_param.into(),
            parse: parse_mid_marks,
        }
    }

    pub fn personal_details(path: impl Into<String>, year_param: impl Into<String>) -> Self {
        Self {
            category: Category::PersonalDetails,
            path: path.into(),
            year_param: year_param.into(),
            parse: parse_personal_details,
        }
    }
}

#[async_trait]
impl CategoryExtractor for PageExtractor {
    fn category(&self) -> Category {
        self.category
    }

    async fn extract(
        &self,
        session: &mut dyn PortalSession,
        academic_year: &str,
    ) -> Result<RecordSet, PortalError> {
        let page = session
            .fetch_page(&self.path, &[(self.year_param.as_str(), academic_year)])
            .await?;
        let records = (self.parse)(&page.body)?;
        Ok(RecordSet::new(self.category, records))
    }
}

/// The three portal extractors, paths taken from config.
pub fn default_extractors(config: &PortalConfig) -> Vec<Arc<dyn CategoryExtractor>> {
    let year = config.academic_year_param.as_str();
    vec![
        Arc::new(PageExtractor::attendance(&config.attendance_path, year)),
        Arc::new(PageExtractor::mid_marks(&config.mid_marks_path, year)),
        Arc::new(PageExtractor::personal_details(
            &config.personal_details_path,
            year,
        )),
    ]
}

/// Attendance: one record per subject with the percentage as a number.
pub fn parse_attendance(body: &str) -> Result<Vec<Record>, PortalError> {
    let tables = html::parse_tables(body)?;
    let (table, subject_col, percent_col) = tables
        .iter()
        .find_map(|t| Some((t, t.column("subject")?, t.column("percent")?)))
        .ok_or_else(|| PortalError::Parse("attendance table not found".to_string()))?;

    let mut records = Vec::new();
    for row in &table.rows {
        let Some(subject) = row.get(subject_col).filter(|s| !s.is_empty()) else {
            continue;
        };
        let raw_percent = row.get(percent_col).map(String::as_str).unwrap_or_default();
        let percentage = match raw_percent.trim() {
            "" | "-" | "N/A" | "NA" => serde_json::Value::Null,
            other => html::parse_number(other)
                .and_then(serde_json::Number::from_f64)
                .map(serde_json::Value::Number)
                .ok_or_else(|| {
                    PortalError::Parse(format!(
                        "invalid attendance percentage '{}' for {}",
                        other, subject
                    ))
                })?,
        };

        let mut record = row_record(table, row, &[subject_col, percent_col]);
        record.insert("subject".to_string(), subject.clone().into());
        record.insert("attendance_percentage".to_string(), percentage);
        records.push(record);
    }

    Ok(records)
}

/// Mid-term marks: one record per subject, one field per assessment column.
pub fn parse_mid_marks(body: &str) -> Result<Vec<Record>, PortalError> {
    let tables = html::parse_tables(body)?;
    let (table, subject_col) = tables
        .iter()
        .filter(|t| t.headers.len() >= 2)
        .find_map(|t| Some((t, t.column("subject")?)))
        .ok_or_else(|| PortalError::Parse("mid marks table not found".to_string()))?;

    let records = table
        .rows
        .iter()
        .filter_map(|row| {
            let subject = row.get(subject_col).filter(|s| !s.is_empty())?;
            let mut record = row_record(table, row, &[subject_col]);
            record.insert("subject".to_string(), subject.clone().into());
            Some(record)
        })
        .collect();

    Ok(records)
}

/// Personal details: label/value rows folded into a single record.
///
/// Accepts `label | value` rows and `label | : | value` rows from any table.
pub fn parse_personal_details(body: &str) -> Result<Vec<Record>, PortalError> {
    let tables = html::parse_tables(body)?;

    let mut record = Record::new();
    for table in &tables {
        for row in std::iter::once(&table.headers).chain(table.rows.iter()) {
            let (label, value) = match row.as_slice() {
                [label, value] => (label, value),
                [label, sep, value] if sep.trim() == ":" => (label, value),
                _ => continue,
            };
            let key = html::normalize_header(label);
            if key.is_empty() {
                continue;
            }
            record
                .entry(key)
                .or_insert_with(|| serde_json::Value::String(value.trim().to_string()));
        }
    }

    if record.is_empty() {
        return Err(PortalError::Parse("personal details not found".to_string()));
    }
    Ok(vec![record])
}

/// Builds a record from every column except `skip`, keyed by normalized header.
fn row_record(table: &Table, row: &[String], skip: &[usize]) -> Record {
    let mut record = Record::new();
    for (index, header) in table.headers.iter().enumerate() {
        if skip.contains(&index) {
            continue;
        }
        let key = html::normalize_header(header);
        if key.is_empty() {
            continue;
        }
        let value = row.get(index).map(String::as_str).unwrap_or_default();
        record.insert(key, html::cell_value(value));
    }
    record
}
