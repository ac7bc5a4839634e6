//! HTML helpers for the portal's server-rendered pages.
//!
//! Parsed documents are not `Send`, so everything here is synchronous and
//! returns owned data; callers fetch first and parse afterwards.

use reqwest::Url;
use scraper::{ElementRef, Html, Selector};

use crate::portal::PortalError;

/// Login form found on the portal's login page.
#[derive(Debug, Clone, PartialEq)]
pub struct LoginForm {
    pub action: Url,
    /// Hidden inputs and named submit buttons, sent back unchanged.
    pub fields: Vec<(String, String)>,
    pub username_field: String,
    pub password_field: String,
}

/// A table with its header row split from the data rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// Index of the first header whose normalized form contains `needle`.
    pub fn column(&self, needle: &str) -> Option<usize> {
        self.headers
            .iter()
            .position(|h| normalize_header(h).contains(needle))
    }
}

fn selector(css: &str) -> Result<Selector, PortalError> {
    Selector::parse(css).map_err(|e| PortalError::Parse(format!("bad selector '{}': {}", css, e)))
}

/// Finds the form holding a password input and collects what must be posted.
pub fn parse_login_form(body: &str, page_url: &Url) -> Result<LoginForm, PortalError> {
    let document = Html::parse_document(body);
    let form_sel = selector("form")?;
    let input_sel = selector("input")?;

    let form = document
        .select(&form_sel)
        .find(|form| {
            form.select(&input_sel)
                .any(|input| input_type(&input) == "password")
        })
        .ok_or_else(|| PortalError::Parse("login form not found".to_string()))?;

    let action = match form.value().attr("action").map(str::trim) {
        Some(action) if !action.is_empty() => page_url
            .join(action)
            .map_err(|e| PortalError::Parse(format!("invalid form action '{}': {}", action, e)))?,
        _ => page_url.clone(),
    };

    let mut fields = Vec::new();
    let mut username_field = None;
    let mut password_field = None;

    for input in form.select(&input_sel) {
        let Some(name) = input.value().attr("name").map(str::to_string) else {
            continue;
        };
        let value = input.value().attr("value").unwrap_or_default().to_string();

        match input_type(&input).as_str() {
            "password" => {
                password_field.get_or_insert(name);
            }
            "hidden" | "submit" => fields.push((name, value)),
            "text" | "email" | "number" | "tel" => {
                username_field.get_or_insert(name);
            }
            _ => {}
        }
    }

    Ok(LoginForm {
        action,
        fields,
        username_field: username_field.unwrap_or_else(|| "username".to_string()),
        password_field: password_field.unwrap_or_else(|| "password".to_string()),
    })
}

fn input_type(input: &ElementRef<'_>) -> String {
    input
        .value()
        .attr("type")
        .unwrap_or("text")
        .trim()
        .to_ascii_lowercase()
}

/// Parses every table in the document.
///
/// The header row is the first row made only of `th` cells, falling back to
/// the first row. Rows without any text are dropped.
pub fn parse_tables(body: &str) -> Result<Vec<Table>, PortalError> {
    let document = Html::parse_document(body);
    let table_sel = selector("table")?;
    let row_sel = selector("tr")?;
    let cell_sel = selector("th, td")?;

    let mut tables = Vec::new();
    for table in document.select(&table_sel) {
        let mut rows: Vec<(bool, Vec<String>)> = table
            .select(&row_sel)
            .map(|row| {
                let cells: Vec<ElementRef<'_>> = row.select(&cell_sel).collect();
                let all_th = !cells.is_empty() && cells.iter().all(|c| c.value().name() == "th");
                (all_th, cells.iter().map(cell_text).collect())
            })
            .filter(|(_, cells): &(bool, Vec<String>)| cells.iter().any(|c| !c.is_empty()))
            .collect();

        if rows.is_empty() {
            continue;
        }

        let header_index = rows.iter().position(|(all_th, _)| *all_th).unwrap_or(0);
        let (_, headers) = rows.remove(header_index);
        tables.push(Table {
            headers,
            rows: rows.into_iter().map(|(_, cells)| cells).collect(),
        });
    }

    Ok(tables)
}

/// Text content of an element with whitespace collapsed.
pub fn cell_text(element: &ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Turns a column label into a snake_case field name.
///
/// `Attendance %` → `attendance_percentage`, `Subject Name` → `subject_name`.
pub fn normalize_header(raw: &str) -> String {
    let expanded = raw.replace('%', " percentage ");
    let mut out = String::with_capacity(expanded.len());
    for c in expanded.trim().chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_matches('_').to_string()
}

/// Converts a cell to a JSON number when it reads as one, otherwise a string.
pub fn cell_value(raw: &str) -> serde_json::Value {
    let trimmed = raw.trim();
    parse_number(trimmed)
        .and_then(serde_json::Number::from_f64)
        .map(serde_json::Value::Number)
        .unwrap_or_else(|| serde_json::Value::String(trimmed.to_string()))
}

/// Parses numbers like `87.5`, `87.5%` or `1,024`.
pub fn parse_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .trim_end_matches('%')
        .trim()
        .chars()
        .filter(|c| *c != ',')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// True when a page is the login screen rather than the requested content.
pub fn is_login_url(url: &str) -> bool {
    url.to_ascii_lowercase().contains("login")
}
