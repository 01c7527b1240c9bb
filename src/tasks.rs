use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::models::trailing_segment;

const TASKS_TEMPLATE: &str = "\
# keyword,start date (YYYY-MM-DD),end date (YYYY-MM-DD),output folder
Trump,2024-05-01,2024-05-02,Trump_May_2024
Biden,2024-05-01,2024-05-02,Biden_May_2024
";

const USERS_TEMPLATE: &str = "\
# one handle per line
WhiteHouse
nasa
google
";

/// First-pass work: find popular posts for a keyword in a date window.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchTask {
    pub keyword: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub output_folder: PathBuf,
}

/// Second-pass work derived from a first-pass artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeepDiveTask {
    pub source_label: String,
    pub url_to_scrape: String,
}

/// The unit actually dispatched: one post page, one destination folder.
#[derive(Debug, Clone, PartialEq)]
pub struct PostTarget {
    pub url: String,
    pub output_dir: PathBuf,
}

impl PostTarget {
    pub fn identity(&self) -> &str {
        trailing_segment(&self.url)
    }
}

/// Outcome of reading a line-oriented manifest.
pub enum Manifest<T> {
    Loaded(Vec<T>),
    /// The file was missing; an example was written in its place.
    Created,
}

fn read_or_create(path: &Path, template: &str) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(raw) => Ok(Some(raw)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            fs::write(path, template)
                .with_context(|| format!("Failed to create example {}", path.display()))?;
            Ok(None)
        }
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}

fn content_lines(raw: &str) -> impl Iterator<Item = (usize, &str)> {
    raw.lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim()))
        .filter(|(_, l)| !l.is_empty() && !l.starts_with('#'))
}

pub fn load_search_tasks(path: &Path) -> Result<Manifest<SearchTask>> {
    let Some(raw) = read_or_create(path, TASKS_TEMPLATE)? else {
        return Ok(Manifest::Created);
    };
    let tasks = content_lines(&raw)
        .filter_map(|(line_no, line)| match parse_search_line(line) {
            Some(task) => Some(task),
            None => {
                warn!(line = line_no, content = line, "skipping malformed task line");
                None
            }
        })
        .collect();
    Ok(Manifest::Loaded(tasks))
}

fn parse_search_line(line: &str) -> Option<SearchTask> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    let [keyword, start, end, folder] = fields.as_slice() else {
        return None;
    };
    if keyword.is_empty() || folder.is_empty() {
        return None;
    }
    Some(SearchTask {
        keyword: keyword.to_string(),
        start_date: NaiveDate::parse_from_str(start, "%Y-%m-%d").ok()?,
        end_date: NaiveDate::parse_from_str(end, "%Y-%m-%d").ok()?,
        output_folder: PathBuf::from(folder),
    })
}

pub fn load_handles(path: &Path) -> Result<Manifest<String>> {
    let Some(raw) = read_or_create(path, USERS_TEMPLATE)? else {
        return Ok(Manifest::Created);
    };
    let handles = content_lines(&raw)
        .map(|(_, l)| l.trim_start_matches('@').to_string())
        .collect();
    Ok(Manifest::Loaded(handles))
}
