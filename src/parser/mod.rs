//! Producers turning operator input into jobs.
//!
//! Task files are CSV or TSV tables whose header cells read
//! `<bind kind> <NAME>`; every following row becomes one job. Command-line
//! `KEY=value` flags become environment bindings, shared data inputs and
//! includes. Workflow runs produce one job per parameter file.

use std::fs::File;
use std::io::Read;
use std::sync::LazyLock;

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use thiserror::Error;

use crate::job::{BindKind, Job, JobType, Parameters};
use crate::resource::{Env, Include, Input, Resource};

/// Pattern every header cell must match.
pub const HEADER_PATTERN: &str = r"^(?P<bindkind>.+) +(?P<name>.+)$";

/// Pattern for `KEY=value` flags.
pub const KEY_VALUE_PATTERN: &str = r"^(?P<key>[0-9A-Z_]+)=(?P<value>.+)$";

/// Include name binding the workflow description.
pub const CWL_FILE_ENV: &str = "CWL_FILE";

/// Include name binding the workflow parameter file.
pub const CWL_PARAM_FILE_ENV: &str = "CWL_PARAM_FILE";

static HEADER: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| Regex::new(HEADER_PATTERN));
static KEY_VALUE: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(KEY_VALUE_PATTERN));

/// Errors raised while producing jobs.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ParseError {
    /// Raised when the task file cannot be read.
    #[error("failed to open tasks file `{path}`: {message}")]
    Io {
        /// Task file path.
        path: Utf8PathBuf,
        /// Operating system error string.
        message: String,
    },
    /// Raised for a task file that is neither `.csv` nor `.tsv`.
    #[error("unexpected extension for task file: {path} (expected .csv or .tsv)")]
    Extension {
        /// Task file path.
        path: Utf8PathBuf,
    },
    /// Raised when the CSV reader rejects the input.
    #[error("malformed task file: {0}")]
    Csv(String),
    /// Raised when a header cell does not name a bind kind and a variable.
    #[error("unexpected format for task file columns header: {column} (expected: {HEADER_PATTERN})")]
    Header {
        /// Offending header cell.
        column: String,
    },
    /// Raised when a row has fewer fields than the header.
    #[error("task row {row} has {found} columns but the header declares {expected}")]
    ShortRow {
        /// Zero-based data row offset.
        row: usize,
        /// Header width.
        expected: usize,
        /// Row width.
        found: usize,
    },
    /// Raised when a row has more fields than the header.
    #[error("task row {row} has {found} columns but the header declares only {expected}")]
    LongRow {
        /// Zero-based data row offset.
        row: usize,
        /// Header width.
        expected: usize,
        /// Row width.
        found: usize,
    },
    /// Raised when a `KEY=value` flag is malformed.
    #[error("invalid format for {flag}: {value} (expected: {KEY_VALUE_PATTERN})")]
    KeyValue {
        /// Flag being parsed.
        flag: &'static str,
        /// Offending value.
        value: String,
    },
    /// Raised when a built-in pattern fails to compile.
    #[error("invalid built-in pattern: {0}")]
    Pattern(String),
}

/// Field separator of a task file.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TaskFormat {
    /// Comma separated, strict quoting.
    Csv,
    /// Tab separated, quotes taken literally inside fields.
    Tsv,
}

impl TaskFormat {
    /// Chooses the format from a file extension.
    #[must_use]
    pub fn from_path(path: &Utf8Path) -> Option<Self> {
        match path.extension() {
            Some("csv") => Some(Self::Csv),
            Some("tsv") => Some(Self::Tsv),
            _ => None,
        }
    }

    fn reader<R: Read>(self, input: R) -> csv::Reader<R> {
        let mut builder = csv::ReaderBuilder::new();
        builder.has_headers(false).flexible(true);
        if self == Self::Tsv {
            builder.delimiter(b'\t').quoting(false);
        }
        builder.from_reader(input)
    }
}

/// How a header column binds its values.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ColumnKind {
    /// One of the five supported flags.
    Bind(BindKind),
    /// Anything else; values in this column are ignored.
    Unrecognized(String),
}

/// One parsed header cell.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Column {
    /// Bind kind.
    pub kind: ColumnKind,
    /// Variable name.
    pub name: String,
}

impl Column {
    /// Parses a header cell such as `--input-recursive REFERENCE`.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::Header`] when the cell does not match
    /// [`HEADER_PATTERN`].
    pub fn parse(cell: &str) -> Result<Self, ParseError> {
        let captures = header_regex()?
            .captures(cell.trim())
            .ok_or_else(|| ParseError::Header {
                column: cell.to_owned(),
            })?;
        let flag = captures
            .name("bindkind")
            .map_or("", |found| found.as_str())
            .trim_matches(' ');
        let name = captures
            .name("name")
            .map_or("", |found| found.as_str())
            .trim_matches(' ');
        let kind = BindKind::from_flag(flag)
            .map_or_else(|| ColumnKind::Unrecognized(flag.to_owned()), ColumnKind::Bind);
        Ok(Self {
            kind,
            name: name.to_owned(),
        })
    }

    /// Binds `value` into `parameters`; unrecognized columns add nothing.
    pub fn bind(&self, parameters: &mut Parameters, value: &str) {
        if let ColumnKind::Bind(kind) = self.kind {
            parameters.bind(kind, &self.name, value.trim_matches(' '));
        }
    }
}

/// Jobs produced from one task file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TaskFile {
    /// Component name: the file name.
    pub name: String,
    /// Job name prefix: the file stem.
    pub prefix: String,
    /// One job per data row.
    pub jobs: Vec<Job>,
}

/// Reads and parses a `.csv` or `.tsv` task file.
///
/// # Errors
///
/// Returns [`ParseError::Extension`] for other extensions,
/// [`ParseError::Io`] when the file cannot be opened, and any error from
/// [`parse_reader`].
pub fn parse_file(path: &Utf8Path) -> Result<TaskFile, ParseError> {
    let format = TaskFormat::from_path(path).ok_or_else(|| ParseError::Extension {
        path: path.to_path_buf(),
    })?;
    let file = File::open(path).map_err(|err| ParseError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;
    let name = path.file_name().unwrap_or(path.as_str()).to_owned();
    let prefix = path.file_stem().unwrap_or(name.as_str()).to_owned();
    let jobs = parse_reader(file, format, &prefix)?;
    Ok(TaskFile { name, prefix, jobs })
}

/// Parses task rows from `input`; job `i` is built from data row `i`.
///
/// An empty input yields no jobs.
///
/// # Errors
///
/// Returns [`ParseError::Header`] before any job is produced when a header
/// cell is malformed, and [`ParseError::ShortRow`] or
/// [`ParseError::LongRow`] for rows whose width differs from the header.
pub fn parse_reader<R: Read>(
    input: R,
    format: TaskFormat,
    prefix: &str,
) -> Result<Vec<Job>, ParseError> {
    let mut records = format.reader(input).into_records();
    let Some(first) = records.next() else {
        return Ok(Vec::new());
    };
    let header = first.map_err(|err| ParseError::Csv(err.to_string()))?;
    let columns = header
        .iter()
        .map(Column::parse)
        .collect::<Result<Vec<_>, _>>()?;
    for column in &columns {
        if let ColumnKind::Unrecognized(flag) = &column.kind {
            tracing::warn!(flag = %flag, name = %column.name, "ignoring task column with unknown bind kind");
        }
    }

    let mut jobs = Vec::new();
    for (row, result) in records.enumerate() {
        let record = result.map_err(|err| ParseError::Csv(err.to_string()))?;
        if record.len() < columns.len() {
            return Err(ParseError::ShortRow {
                row,
                expected: columns.len(),
                found: record.len(),
            });
        }
        if record.len() > columns.len() {
            return Err(ParseError::LongRow {
                row,
                expected: columns.len(),
                found: record.len(),
            });
        }
        let mut job = Job::new(row, prefix);
        for (column, value) in columns.iter().zip(record.iter()) {
            column.bind(&mut job.parameters, value);
        }
        jobs.push(job);
    }
    Ok(jobs)
}

/// Parses `--env KEY=value` flags.
///
/// # Errors
///
/// Returns [`ParseError::KeyValue`] for a malformed flag.
pub fn parse_env(values: &[String]) -> Result<Vec<Env>, ParseError> {
    values
        .iter()
        .map(|value| {
            let (key, val) = split_key_value(value)?.ok_or_else(|| ParseError::KeyValue {
                flag: "env variable",
                value: value.clone(),
            })?;
            Ok(Env::new(key, val))
        })
        .collect()
}

/// Parses `--shared KEY=url` flags into recursive inputs.
///
/// # Errors
///
/// Returns [`ParseError::KeyValue`] for a malformed flag.
pub fn parse_shared_data(values: &[String]) -> Result<Vec<Input>, ParseError> {
    values
        .iter()
        .map(|value| {
            let (key, url) = split_key_value(value)?.ok_or_else(|| ParseError::KeyValue {
                flag: "shared data",
                value: value.clone(),
            })?;
            Ok(Input::new(Resource::new(key, url).with_recursive(true)))
        })
        .collect()
}

/// Parses `--include` flags: `KEY=path` binds the copy to `KEY`, anything
/// else is copied without a binding.
///
/// # Errors
///
/// Returns [`ParseError::Pattern`] only if the built-in pattern is broken.
pub fn parse_includes(values: &[String]) -> Result<Vec<Include>, ParseError> {
    values
        .iter()
        .map(|value| {
            Ok(match split_key_value(value)? {
                Some((key, path)) => Include::named(key, path),
                None => Include::anonymous(value.as_str()),
            })
        })
        .collect()
}

/// Builds one workflow-description job per parameter file.
///
/// Returns the component name (the workflow file name) and the jobs.
#[must_use]
pub fn workflow_jobs(workflow: &Utf8Path, params: &[Utf8PathBuf]) -> (String, Vec<Job>) {
    let name = workflow.file_name().unwrap_or(workflow.as_str()).to_owned();
    let jobs = params
        .iter()
        .enumerate()
        .map(|(index, param)| {
            let mut job = Job::new(index, &name);
            job.job_type = JobType::WorkflowDescription;
            job.parameters.includes = vec![
                Include::named(CWL_FILE_ENV, workflow),
                Include::named(CWL_PARAM_FILE_ENV, param.as_path()),
            ];
            job
        })
        .collect();
    (name, jobs)
}

fn header_regex() -> Result<&'static Regex, ParseError> {
    HEADER
        .as_ref()
        .map_err(|err| ParseError::Pattern(err.to_string()))
}

fn split_key_value(value: &str) -> Result<Option<(&str, &str)>, ParseError> {
    let pattern = KEY_VALUE
        .as_ref()
        .map_err(|err| ParseError::Pattern(err.to_string()))?;
    Ok(pattern.captures(value).and_then(|captures| {
        let key = captures.name("key")?.as_str();
        let val = captures.name("value")?.as_str();
        Some((key, val))
    }))
}
