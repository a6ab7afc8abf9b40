//! hpool CLI - Send one HTTP request through a pooled client and show the response

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use hpool_lib::{
    ApiTester, ClientsConfig, ConfigError, DecodedResponse, Method, Registry, TesterForm,
    TesterReport,
};
use thiserror::Error;
use tracing_subscriber::{filter::EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "hpool", version)]
#[command(about = "Send an HTTP request through a pooled client and show the response", long_about = None)]
struct Cli {
    /// Target URL; `http://` is assumed when no scheme is given
    #[arg(value_name = "URL")]
    url: String,

    /// HTTP method
    #[arg(short = 'X', long, default_value = "GET", value_parser = parse_method)]
    method: Method,

    /// Request header as `Key: Value` (repeatable)
    #[arg(short = 'H', long = "header", value_name = "HEADER")]
    headers: Vec<String>,

    /// Parameter as `key=value` (repeatable)
    #[arg(short = 'p', long = "param", value_name = "PARAM")]
    params: Vec<String>,

    /// Raw request body
    #[arg(short = 'd', long = "data", value_name = "BODY")]
    data: Option<String>,

    /// TOML file with client defaults
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Directory binary payloads are written to
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    log_verbosity: u8,

    /// Output logs as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn parse_method(s: &str) -> Result<Method, String> {
    s.parse()
        .map_err(|_| format!("unsupported HTTP method '{s}'"))
}

/// Initialize tracing subscriber based on verbosity and output format
fn init_tracing(verbose: u8, json: bool) {
    let base_filter = match std::env::var("RUST_LOG") {
        Ok(filter) => filter,
        Err(_) => match verbose {
            0 => "warn".to_string(),
            1 => "warn,hpool_lib=info".to_string(),
            2 => "info,hpool_lib=debug".to_string(),
            _ => "debug,hpool_lib=trace".to_string(),
        },
    };

    let filter = EnvFilter::try_new(&base_filter).unwrap_or_else(|_| EnvFilter::new("warn"));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_thread_ids(false)
                    .with_file(verbose >= 3)
                    .with_line_number(verbose >= 3)
                    .with_writer(std::io::stderr)
                    .compact(),
            )
            .init();
    }
}

fn load_config(path: Option<&Path>) -> Result<ClientsConfig, CliError> {
    match path {
        Some(path) => Ok(ClientsConfig::load(path)?),
        None => Ok(ClientsConfig::default()),
    }
}

fn build_form(cli: &Cli) -> TesterForm {
    let mut form = TesterForm::new(cli.url.as_str())
        .with_method(cli.method)
        .with_headers(cli.headers.join("\n"))
        .with_params(cli.params.join("\n"));
    if let Some(data) = &cli.data {
        form = form.with_body(data.as_str());
    }
    form
}

fn print_report(report: &TesterReport) {
    if let Some(status) = report.status {
        println!("Status: {status}");
    }
    if let Some(content_type) = &report.content_type {
        println!("Content-Type: {content_type}");
    }
    if !report.headers_text.is_empty() {
        print!("{}", report.headers_text);
    }
    println!();
    println!("{}", report.display());
}

/// Writes a binary payload to `dir`, returning the written path.
fn save_binary(report: &TesterReport, dir: &Path) -> Result<Option<PathBuf>, CliError> {
    let Some(DecodedResponse::Binary { bytes, filename }) = &report.payload else {
        return Ok(None);
    };
    let path = dir.join(filename);
    std::fs::create_dir_all(dir)
        .and_then(|()| std::fs::write(&path, bytes))
        .map_err(|source| CliError::Write {
            path: path.clone(),
            source,
        })?;
    Ok(Some(path))
}

async fn run(cli: Cli) -> Result<bool, CliError> {
    let config = load_config(cli.config.as_deref())?;
    let tester = ApiTester::new(Registry::new(config));

    let report = tester.run(&build_form(&cli)).await;
    if let Err(e) = tester.close() {
        tracing::warn!(error = %e, "failed to close connection pools");
    }
    if report.is_error() {
        eprintln!("{}", report.display());
        return Ok(false);
    }

    print_report(&report);
    if let Some(dir) = &cli.output {
        if let Some(path) = save_binary(&report, dir)? {
            println!("Saved: {}", path.display());
        }
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_verbosity, cli.json);

    tracing::debug!(url = %cli.url, method = %cli.method, "hpool starting");

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
