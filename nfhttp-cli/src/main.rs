//! Batch request runner: reads a JSON list of `{id, url, method}` requests
//! (`method` optional, defaults to GET), performs each synchronously through
//! the standard client pipeline, and writes every payload to its own
//! randomly-named file alongside a `responses.json` manifest mapping request
//! id to payload file name.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use nfhttp_types::{ClientExt, Method, Request};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

const RANDOM_FILE_NAME_LENGTH: usize = 20;

#[derive(Parser, Debug)]
#[command(name = "nfhttp-cli", about = "Run a batch of GET requests through the nfhttp client pipeline")]
struct Cli {
    /// JSON file containing `{"requests": [{"id": "...", "url": "..."}, ...]}`
    #[arg(short = 'i', long = "input")]
    input: PathBuf,

    /// Directory to write payload files and responses.json into
    #[arg(short = 'o', long = "output")]
    output: PathBuf,
}

#[derive(Debug, Deserialize)]
struct InputFile {
    requests: Vec<InputRequest>,
}

#[derive(Debug, Deserialize)]
struct InputRequest {
    id: String,
    url: String,
    /// HTTP method, e.g. `"GET"` or `"post"`. Defaults to `GET` when absent.
    #[serde(default)]
    method: Option<String>,
}

#[derive(Debug, Serialize)]
struct OutputFile {
    responses: HashMap<String, OutputResponse>,
}

#[derive(Debug, Serialize)]
struct OutputResponse {
    payload: String,
}

fn random_file_name() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(RANDOM_FILE_NAME_LENGTH)
        .map(char::from)
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let input_bytes = fs::read(&cli.input)
        .with_context(|| format!("reading input file {}", cli.input.display()))?;
    let input: InputFile = serde_json::from_slice(&input_bytes)
        .with_context(|| format!("parsing {} as the requests manifest", cli.input.display()))?;

    fs::create_dir_all(&cli.output)
        .with_context(|| format!("creating output directory {}", cli.output.display()))?;

    let cache_dir = nfhttp_client::standard_cache_location()
        .context("resolving the standard cache location")?;
    let client = nfhttp_client::create_client(
        cache_dir,
        format!("NFHTTP-CLI/{}", env!("CARGO_PKG_VERSION")),
        None,
        None,
    )
    .context("constructing the client pipeline")?;

    let mut responses = HashMap::new();
    for request in input.requests {
        let method = match &request.method {
            Some(m) => m.parse::<Method>().with_context(|| format!("parsing method for id {}", request.id))?,
            None => Method::Get,
        };
        tracing::debug!(id = %request.id, url = %request.url, method = %method, "performing request");
        let req = Request::new(&request.url, method)
            .with_context(|| format!("building request for id {}", request.id))?;
        let response = client.perform_sync(req);
        if let Some(err) = response.metadata().get("error") {
            tracing::warn!(id = %request.id, error = %err, "request failed");
        }

        let file_name = random_file_name();
        let file_path = cli.output.join(&file_name);
        fs::write(&file_path, response.body())
            .with_context(|| format!("writing payload for id {}", request.id))?;

        responses.insert(request.id, OutputResponse { payload: file_name });
    }

    let output = OutputFile { responses };
    let output_path = cli.output.join("responses.json");
    let output_json = serde_json::to_string_pretty(&output)?;
    fs::write(&output_path, output_json)
        .with_context(|| format!("writing {}", output_path.display()))?;

    Ok(())
}
