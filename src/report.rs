//! Response and analysis files.

use std::fmt::Write as _;
use std::fs;
use std::io::{ErrorKind, Write as _};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::info;

use crate::dispatch::CapturedResponse;
use crate::{AppError, Result};

const RESPONSE_RULE_WIDTH: usize = 50;
const REPORT_RULE_WIDTH: usize = 60;
const NAME_COMMAND_CHARS: usize = 30;
const MAX_NAME_ATTEMPTS: u32 = 999;

/// File name for a captured response:
/// `response_<YYYYmmdd_HHMMSS>_<first 30 chars of command>.txt`, with spaces
/// replaced by `_` and `/` by `-`.
#[must_use]
pub fn response_file_name(command: &str, at: &DateTime<Local>) -> String {
    let short: String = command
        .chars()
        .take(NAME_COMMAND_CHARS)
        .map(|c| match c {
            ' ' => '_',
            '/' => '-',
            other => other,
        })
        .collect();
    format!("response_{}_{short}.txt", at.format("%Y%m%d_%H%M%S"))
}

/// Body of a response file.
#[must_use]
pub fn render_response(response: &CapturedResponse) -> String {
    let rule = "=".repeat(RESPONSE_RULE_WIDTH);
    format!(
        "Command: {}\nCaptured: {}\nCompleteness: {}\n{rule}\n\n{}\n",
        response.command,
        response.captured_at.format("%Y-%m-%d %H:%M:%S"),
        response.completeness,
        response.text(),
    )
}

/// Write `response` into `dir`, returning the file path.
///
/// When the name is already taken (same command prefix captured within the
/// same second) a `_2`, `_3`, ... suffix is added before `.txt`.
///
/// # Errors
///
/// Returns `AppError::Io` if the directory cannot be created or the file
/// cannot be written.
pub fn write_response(dir: &Path, response: &CapturedResponse) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .map_err(|err| AppError::Io(format!("cannot create {}: {err}", dir.display())))?;
    let name = response_file_name(response.command.text(), &response.captured_at);
    let stem = name.strip_suffix(".txt").unwrap_or(&name);
    let body = render_response(response);

    for attempt in 1..=MAX_NAME_ATTEMPTS {
        let path = if attempt == 1 {
            dir.join(&name)
        } else {
            dir.join(format!("{stem}_{attempt}.txt"))
        };
        let file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path);
        match file {
            Ok(mut file) => {
                file.write_all(body.as_bytes()).map_err(|err| {
                    AppError::Io(format!("cannot write {}: {err}", path.display()))
                })?;
                info!(path = %path.display(), "response saved");
                return Ok(path);
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {}
            Err(err) => {
                return Err(AppError::Io(format!(
                    "cannot write {}: {err}",
                    path.display()
                )))
            }
        }
    }
    Err(AppError::Io(format!("no free response file name for {name}")))
}

/// Concatenate tool outputs under `=== NAME ===` headings.
#[must_use]
pub fn combine_sections<'a, I>(sections: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut combined = String::new();
    for (title, body) in sections {
        let _ = write!(combined, "\n=== {} ===\n{body}\n", title.to_uppercase());
    }
    combined
}

/// Body of an analysis report: the analysis, then the raw data it was
/// produced from.
#[must_use]
pub fn render_analysis_report(analysis: &str, raw_data: &str) -> String {
    let rule = "=".repeat(REPORT_RULE_WIDTH);
    format!(
        "{rule}\nANALYSIS RESULTS\nGenerated {}\n{rule}\n\n{analysis}\n\n{rule}\nRAW DATA COLLECTED\n{rule}\n{raw_data}",
        Local::now().format("%Y-%m-%d %H:%M:%S"),
    )
}

/// Write an analysis report to `path`.
///
/// # Errors
///
/// Returns `AppError::Io` if the file cannot be written.
pub fn write_analysis_report(path: &Path, analysis: &str, raw_data: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|err| AppError::Io(format!("cannot create {}: {err}", parent.display())))?;
    }
    fs::write(path, render_analysis_report(analysis, raw_data))
        .map_err(|err| AppError::Io(format!("cannot write {}: {err}", path.display())))?;
    info!(path = %path.display(), "analysis report saved");
    Ok(())
}

/// Markdown copy of an analysis request: the prompt, then the collected data
/// in a fenced block, for review outside the analysis CLI.
#[must_use]
pub fn render_data_file(prompt: &str, data: &str) -> String {
    format!(
        "# Analysis Request\n\nGenerated {}\n\n## Instructions\n\n{prompt}\n\n## Collected Data\n\n```\n{}\n```\n",
        Local::now().format("%Y-%m-%d %H:%M:%S"),
        data.trim_matches('\n'),
    )
}

/// Write [`render_data_file`] output to `path`.
///
/// # Errors
///
/// Returns `AppError::Io` if the file cannot be written.
pub fn write_data_file(path: &Path, prompt: &str, data: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|err| AppError::Io(format!("cannot create {}: {err}", parent.display())))?;
    }
    fs::write(path, render_data_file(prompt, data))
        .map_err(|err| AppError::Io(format!("cannot write {}: {err}", path.display())))?;
    info!(path = %path.display(), "analysis data saved");
    Ok(())
}
