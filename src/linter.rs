//! Contract linting - static analysis of OpenAPI documents.
//!
//! Checks contract files for:
//! - JSON/YAML syntax errors
//! - Broken or external $ref references
//! - Path template variables and path parameters that disagree
//! - Documents that don't load as a contract
//! - Missing servers and operation ids (warnings)

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;

use crate::contract::PathTemplate;
use crate::loader::{build_contract, load_document, navigate_fragment};
use crate::types::{json_type_name, Method};

/// Severity level for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// A single diagnostic message from linting.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: String,
    pub file: PathBuf,
    /// JSON pointer to the issue (e.g., "/paths/~1pets~1{id}/get")
    pub path: String,
    pub message: String,
}

/// Result of linting a single file.
#[derive(Debug, Clone, Serialize)]
pub struct FileResult {
    pub file: PathBuf,
    pub status: FileStatus,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
}

/// Status of a linted file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Ok,
    Error,
    Warning,
}

/// Result of linting a directory or set of files.
#[derive(Debug, Clone, Serialize)]
pub struct LintResult {
    pub path: PathBuf,
    pub files_checked: usize,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub warnings: usize,
    pub results: Vec<FileResult>,
}

impl LintResult {
    /// Returns true if all files passed (no errors).
    pub fn is_ok(&self) -> bool {
        self.errors == 0
    }
}

/// Collects diagnostics for one file.
struct Report<'a> {
    file: &'a Path,
    diagnostics: Vec<Diagnostic>,
}

impl Report<'_> {
    fn push(&mut self, severity: Severity, code: &str, path: &str, message: String) {
        self.diagnostics.push(Diagnostic {
            severity,
            code: code.to_string(),
            file: self.file.to_path_buf(),
            path: if path.is_empty() { "/".to_string() } else { path.to_string() },
            message,
        });
    }

    fn error(&mut self, code: &str, path: &str, message: String) {
        self.push(Severity::Error, code, path, message);
    }

    fn warning(&mut self, code: &str, path: &str, message: String) {
        self.push(Severity::Warning, code, path, message);
    }

    fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(|d| d.severity == Severity::Error)
    }
}

/// Lint a contract file or a directory of contracts.
///
/// Directories are searched recursively for `.json`, `.yaml` and `.yml`
/// files. With `strict`, warnings fail a file too.
pub fn lint(path: &Path, strict: bool) -> LintResult {
    let files = collect_contract_files(path);
    let mut results = Vec::new();
    let mut total_errors = 0;
    let mut total_warnings = 0;

    for file in &files {
        let file_result = lint_file(file, path);
        total_errors += file_result
            .diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .count();
        total_warnings += file_result
            .diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Warning)
            .count();
        results.push(file_result);
    }

    let failed = results
        .iter()
        .filter(|r| {
            if strict {
                r.status != FileStatus::Ok
            } else {
                r.status == FileStatus::Error
            }
        })
        .count();

    LintResult {
        path: path.to_path_buf(),
        files_checked: files.len(),
        passed: files.len() - failed,
        failed,
        errors: total_errors,
        warnings: total_warnings,
        results,
    }
}

/// Lint a single contract file.
pub fn lint_file(file: &Path, base_path: &Path) -> FileResult {
    let mut report = Report {
        file,
        diagnostics: Vec::new(),
    };

    match load_document(file) {
        Ok(document) => lint_document(&document, &mut report),
        Err(e) => report.error("E001", "/", format!("syntax error: {}", e)),
    }

    let has_warnings = report
        .diagnostics
        .iter()
        .any(|d| d.severity == Severity::Warning);
    let status = if report.has_errors() {
        FileStatus::Error
    } else if has_warnings {
        FileStatus::Warning
    } else {
        FileStatus::Ok
    };

    FileResult {
        file: file.strip_prefix(base_path).unwrap_or(file).to_path_buf(),
        status,
        diagnostics: report.diagnostics,
    }
}

fn lint_document(document: &Value, report: &mut Report<'_>) {
    check_refs(document, "", document, report);
    check_paths(document, report);

    // Only worth building once the document is structurally sound.
    if !report.has_errors() {
        if let Err(e) = build_contract(document) {
            report.error("E006", "/", format!("contract does not load: {}", e));
        }
    }

    let has_servers = document
        .get("servers")
        .and_then(Value::as_array)
        .is_some_and(|s| !s.is_empty());
    if !has_servers {
        report.warning(
            "W001",
            "/servers",
            "no servers declared; requests match on path only".to_string(),
        );
    }
}

/// Recursively check $ref values.
fn check_refs(value: &Value, path: &str, root: &Value, report: &mut Report<'_>) {
    match value {
        Value::Object(map) => {
            if let Some(reference) = map.get("$ref") {
                match reference {
                    Value::String(r) if r.starts_with('#') => {
                        if navigate_fragment(root, r).is_none() {
                            report.error("E002", path, format!("reference not found: {}", r));
                        }
                    }
                    Value::String(r) => report.error(
                        "E002",
                        path,
                        format!("external reference not supported: {}", r),
                    ),
                    other => report.error(
                        "E002",
                        path,
                        format!(
                            "invalid $ref type: expected string, got {}",
                            json_type_name(other)
                        ),
                    ),
                }
            }
            for (key, val) in map {
                let child_path = format!("{}/{}", path, escape(key));
                check_refs(val, &child_path, root, report);
            }
        }
        Value::Array(arr) => {
            for (i, item) in arr.iter().enumerate() {
                check_refs(item, &format!("{}/{}", path, i), root, report);
            }
        }
        _ => {}
    }
}

/// Follow a `$ref` once, if there is one.
fn deref<'a>(value: &'a Value, root: &'a Value) -> Option<&'a Value> {
    match value.get("$ref").and_then(Value::as_str) {
        Some(r) => navigate_fragment(root, r),
        None => Some(value),
    }
}

/// Names of `in: path` parameters in a parameter list.
fn path_parameters<'a>(
    list: Option<&'a Value>,
    list_path: &str,
    root: &'a Value,
    report: &mut Report<'_>,
) -> Vec<&'a str> {
    let mut names = Vec::new();
    let Some(items) = list.and_then(Value::as_array) else {
        return names;
    };
    for (i, item) in items.iter().enumerate() {
        let Some(param) = deref(item, root) else {
            continue;
        };
        if param.get("in").and_then(Value::as_str) != Some("path") {
            continue;
        }
        let Some(name) = param.get("name").and_then(Value::as_str) else {
            continue;
        };
        if param.get("required").and_then(Value::as_bool) != Some(true) {
            report.error(
                "E004",
                &format!("{}/{}", list_path, i),
                format!("path parameter {} must be required", name),
            );
        }
        names.push(name);
    }
    names
}

fn check_paths(document: &Value, report: &mut Report<'_>) {
    let Some(paths) = document.get("paths").and_then(Value::as_object) else {
        return;
    };
    let mut operation_ids = HashSet::new();

    for (template, item) in paths {
        if template.starts_with("x-") {
            continue;
        }
        let item_path = format!("/paths/{}", escape(template));
        let Some(item) = deref(item, document) else {
            continue;
        };
        let variables: Vec<String> = PathTemplate::parse(template)
            .variables()
            .map(str::to_string)
            .collect();
        let shared = path_parameters(
            item.get("parameters"),
            &format!("{}/parameters", item_path),
            document,
            report,
        );

        for method in Method::ALL {
            let Some(operation) = item.get(method.as_str()) else {
                continue;
            };
            let op_path = format!("{}/{}", item_path, method.as_str());
            let own = path_parameters(
                operation.get("parameters"),
                &format!("{}/parameters", op_path),
                document,
                report,
            );
            let declared: Vec<&str> = shared.iter().chain(&own).copied().collect();

            for variable in &variables {
                if !declared.contains(&variable.as_str()) {
                    report.error(
                        "E003",
                        &op_path,
                        format!("path variable {{{}}} has no parameter declaration", variable),
                    );
                }
            }
            for name in &declared {
                if !variables.iter().any(|v| v == name) {
                    report.error(
                        "E005",
                        &op_path,
                        format!("path parameter {} does not appear in {}", name, template),
                    );
                }
            }

            match operation.get("operationId").and_then(Value::as_str) {
                Some(id) => {
                    if !operation_ids.insert(id) {
                        report.warning(
                            "W003",
                            &op_path,
                            format!("duplicate operationId {}", id),
                        );
                    }
                }
                None => report.warning(
                    "W002",
                    &op_path,
                    format!("{} {} has no operationId", method, template),
                ),
            }
        }
    }
}

fn escape(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

fn is_contract_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| matches!(e, "json" | "yaml" | "yml"))
}

/// Collect all contract files in a path (file or directory).
fn collect_contract_files(path: &Path) -> Vec<PathBuf> {
    if path.is_file() {
        return vec![path.to_path_buf()];
    }

    let mut files = Vec::new();
    collect_files_recursive(path, &mut files);
    files.sort();
    files
}

fn collect_files_recursive(dir: &Path, files: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files_recursive(&path, files);
        } else if is_contract_file(&path) {
            files.push(path);
        }
    }
}
