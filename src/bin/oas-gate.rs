//! OpenAPI Gate CLI
//!
//! Command-line interface for checking recorded requests and responses
//! against an OpenAPI contract.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use indexmap::IndexMap;
use oas_gate::{
    lint, load_contract_auto, Contract, FileStatus, Request, ResponseProbe, Severity,
    StatusPolicy, ValidateOptions, ValidationError, Validator, DEFAULT_MAX_DEPTH,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "oas-gate")]
#[command(about = "Validate HTTP requests and responses against an OpenAPI contract")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct ValidateFlags {
    /// Output results as JSON (for automation)
    #[arg(long)]
    json: bool,

    /// Envelope status when several errors are reported: first or highest
    #[arg(long, default_value = "first", value_parser = parse_policy)]
    status_policy: StatusPolicy,

    /// Maximum schema nesting depth
    #[arg(long, default_value_t = DEFAULT_MAX_DEPTH)]
    max_depth: usize,
}

impl ValidateFlags {
    fn options(&self) -> ValidateOptions {
        ValidateOptions::new()
            .status_policy(self.status_policy)
            .max_depth(self.max_depth)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a recorded request
    Request {
        /// Contract source: file path or URL (http:// or https://)
        contract: String,

        /// Request file: {method, url, headers, body}
        request: PathBuf,

        #[command(flatten)]
        flags: ValidateFlags,
    },

    /// Validate a recorded response for the request that produced it
    Response {
        /// Contract source: file path or URL (http:// or https://)
        contract: String,

        /// Request file: {method, url, headers, body}
        request: PathBuf,

        /// Response file: {status, content_type, body}
        response: PathBuf,

        #[command(flatten)]
        flags: ValidateFlags,
    },

    /// List the operations a contract declares
    Routes {
        /// Contract source: file path or URL (http:// or https://)
        contract: String,
    },

    /// Lint contract files (syntax, broken refs, path parameter mistakes)
    Lint {
        /// File or directory to lint
        path: PathBuf,

        /// Output format: text (default) or json
        #[arg(long, default_value = "text")]
        format: String,

        /// Treat warnings as errors
        #[arg(long)]
        strict: bool,

        /// Suppress progress output, only show errors
        #[arg(long, short)]
        quiet: bool,
    },
}

fn parse_policy(s: &str) -> Result<StatusPolicy, String> {
    StatusPolicy::parse(s)
        .ok_or_else(|| format!("unknown status policy: {} (expected first or highest)", s))
}

/// A recorded request. Either `url` or the separate parts are given.
#[derive(Deserialize)]
struct RequestFile {
    method: String,
    url: Option<String>,
    #[serde(default = "default_scheme")]
    scheme: String,
    #[serde(default)]
    host: String,
    #[serde(default)]
    path: String,
    #[serde(default)]
    query: String,
    #[serde(default)]
    headers: IndexMap<String, String>,
    body: Option<Value>,
}

#[derive(Deserialize)]
struct ResponseFile {
    status: u16,
    content_type: Option<String>,
    body: Option<Value>,
}

fn default_scheme() -> String {
    "http".to_string()
}

/// String bodies are sent as-is; anything else as JSON text.
fn body_bytes(body: Value) -> Vec<u8> {
    match body {
        Value::String(s) => s.into_bytes(),
        other => other.to_string().into_bytes(),
    }
}

impl RequestFile {
    fn into_request(self) -> Result<Request, String> {
        let mut request = match &self.url {
            Some(url) => Request::new(self.method.clone(), url)
                .map_err(|e| format!("invalid url {}: {}", url, e))?,
            None => Request::from_parts(self.method.clone(), self.scheme, self.host, self.path)
                .with_query(self.query),
        };
        for (name, value) in self.headers {
            request = request.with_header(name, value);
        }
        if let Some(body) = self.body {
            request = request.with_body(body_bytes(body));
        }
        Ok(request)
    }
}

impl ResponseFile {
    fn into_probe(self) -> ResponseProbe {
        let mut probe = ResponseProbe::new(self.status);
        if let Some(content_type) = self.content_type {
            probe = probe.with_content_type(content_type);
        }
        if let Some(body) = self.body {
            probe = probe.with_body(body_bytes(body));
        }
        probe
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Request {
            contract,
            request,
            flags,
        } => run_request(&contract, &request, &flags),

        Commands::Response {
            contract,
            request,
            response,
            flags,
        } => run_response(&contract, &request, &response, &flags),

        Commands::Routes { contract } => run_routes(&contract),

        Commands::Lint {
            path,
            format,
            strict,
            quiet,
        } => run_lint(&path, &format, strict, quiet),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

fn load(source: &str, json_output: bool) -> Result<Contract, u8> {
    load_contract_auto(source).map_err(|e| {
        report_error(json_output, &format!("loading contract: {}", e));
        e.exit_code() as u8
    })
}

/// Read and parse a JSON input file. Exit 3 when unreadable, 2 when malformed.
fn read_input<T: for<'de> Deserialize<'de>>(path: &Path, json_output: bool) -> Result<T, u8> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        report_error(json_output, &format!("reading {}: {}", path.display(), e));
        3u8
    })?;
    serde_json::from_str(&content).map_err(|e| {
        report_error(json_output, &format!("parsing {}: {}", path.display(), e));
        2u8
    })
}

fn read_request(path: &Path, json_output: bool) -> Result<Request, u8> {
    let file: RequestFile = read_input(path, json_output)?;
    file.into_request().map_err(|e| {
        report_error(json_output, &e);
        2u8
    })
}

fn run_request(
    contract_source: &str,
    request_path: &Path,
    flags: &ValidateFlags,
) -> Result<(), u8> {
    let contract = load(contract_source, flags.json)?;
    let request = read_request(request_path, flags.json)?;

    let validator = Validator::new(&contract).with_options(flags.options());
    let outcome = validator.validate_request(&request);

    if outcome.is_valid() {
        let parameters = serde_json::to_value(outcome.parameters()).unwrap_or(Value::Null);
        let output = json!({
            "valid": true,
            "parameters": parameters,
            "body": outcome.body(),
        });
        if flags.json {
            println!("{}", output);
        } else {
            println!("Valid");
            println!(
                "{}",
                serde_json::to_string_pretty(&output["parameters"]).unwrap_or_default()
            );
        }
        Ok(())
    } else {
        report_invalid(
            flags.json,
            outcome.status(),
            outcome.errors(),
            &outcome.envelope().to_json(),
        );
        Err(1)
    }
}

fn run_response(
    contract_source: &str,
    request_path: &Path,
    response_path: &Path,
    flags: &ValidateFlags,
) -> Result<(), u8> {
    let contract = load(contract_source, flags.json)?;
    let request = read_request(request_path, flags.json)?;
    let response: ResponseFile = read_input(response_path, flags.json)?;

    let validator = Validator::new(&contract).with_options(flags.options());
    let outcome = validator.validate_response_for(&request, &response.into_probe());

    if outcome.is_valid() {
        if flags.json {
            println!("{}", json!({ "valid": true, "data": outcome.data() }));
        } else {
            println!("Valid");
        }
        Ok(())
    } else {
        report_invalid(
            flags.json,
            outcome.status(),
            outcome.errors(),
            &outcome.envelope().to_json(),
        );
        Err(1)
    }
}

fn report_invalid(
    json_output: bool,
    status: Option<u16>,
    errors: &[ValidationError],
    envelope: &Value,
) {
    if json_output {
        println!("{}", envelope);
    } else {
        eprintln!("Validation failed ({}):", status.unwrap_or_default());
        for error in errors {
            eprintln!("  {}: {}", error.kind, error);
        }
    }
}

fn run_routes(contract_source: &str) -> Result<(), u8> {
    let contract = load(contract_source, false)?;
    for (method, template, operation) in contract.operations() {
        println!(
            "{:<7} {} {}",
            method.as_str().to_ascii_uppercase(),
            template,
            operation.operation_id.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

/// Output an error message in plain text or JSON format.
fn report_error(json_output: bool, msg: &str) {
    if json_output {
        println!("{}", json!({ "valid": false, "error": msg }));
    } else {
        eprintln!("Error: {}", msg);
    }
}

fn run_lint(path: &Path, format: &str, strict: bool, quiet: bool) -> Result<(), u8> {
    if !path.exists() {
        eprintln!("Error: path not found: {}", path.display());
        return Err(3);
    }

    let result = lint(path, strict);

    if format == "json" {
        let output = serde_json::to_string_pretty(&result).map_err(|e| {
            eprintln!("Error serializing output: {}", e);
            2u8
        })?;
        println!("{}", output);
    } else {
        if !quiet {
            println!("Linting {} ...\n", path.display());
        }

        for file_result in &result.results {
            let status_icon = match file_result.status {
                FileStatus::Ok => "\x1b[32m✓\x1b[0m",
                FileStatus::Warning => "\x1b[33m⚠\x1b[0m",
                FileStatus::Error => "\x1b[31m✗\x1b[0m",
            };

            if !quiet || file_result.status != FileStatus::Ok {
                println!("  {} {}", status_icon, file_result.file.display());
            }

            for diag in &file_result.diagnostics {
                let (color, label) = match diag.severity {
                    Severity::Error => ("\x1b[31m", "error"),
                    Severity::Warning => ("\x1b[33m", "warning"),
                };
                if !quiet || diag.severity == Severity::Error {
                    println!(
                        "    {}{}[{}]\x1b[0m: {} - {}",
                        color, label, diag.code, diag.path, diag.message
                    );
                }
            }
        }

        println!();
        if result.is_ok() && (!strict || result.warnings == 0) {
            println!(
                "\x1b[32m✓ {} files checked, all passed\x1b[0m",
                result.files_checked
            );
        } else {
            println!(
                "\x1b[31m✗ {} files checked: {} passed, {} failed ({} errors, {} warnings)\x1b[0m",
                result.files_checked, result.passed, result.failed, result.errors, result.warnings
            );
        }
    }

    if result.is_ok() && (!strict || result.warnings == 0) {
        Ok(())
    } else {
        Err(1)
    }
}
