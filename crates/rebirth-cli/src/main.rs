use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use clap::{Parser, Subcommand, ValueEnum};
use rebirth_contracts::{remediation_hint, Composition, GenerationOutcome, MediaAsset};
use rebirth_engine::{
    check_credentials, classify, compress, CompressionTarget, EngineConfig, GenerationClient,
    Invocation, Pipeline, PipelineError, RelayHandler, Transport,
};
use serde_json::json;
use tiny_http::{Header, Request, Response, Server, StatusCode};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "rebirth", version, about = "Bag texture and try-on image generation")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Shrink one image under the upload budget.
    Compress(CompressArgs),
    /// Run a composition end to end and print the result.
    Generate(GenerateArgs),
    /// Classify a saved provider response body.
    Classify(ClassifyArgs),
    /// Run the multipart relay in front of the provider.
    Serve(ServeArgs),
    /// Confirm the API key and text model answer.
    Check(CheckArgs),
}

#[derive(Debug, Clone, clap::Args)]
struct BudgetArgs {
    #[arg(long, default_value_t = 3_500_000)]
    target_bytes: usize,
    #[arg(long, default_value_t = 4_500_000)]
    hard_stop_bytes: usize,
    #[arg(long, default_value_t = 2048)]
    max_dimension: u32,
    #[arg(long, default_value_t = 800)]
    min_dimension: u32,
    #[arg(long, default_value = "0.82,0.72,0.62")]
    quality: String,
}

impl BudgetArgs {
    fn to_target(&self) -> Result<CompressionTarget> {
        Ok(CompressionTarget {
            target_bytes: self.target_bytes,
            hard_stop_bytes: self.hard_stop_bytes,
            max_dimension: self.max_dimension,
            min_dimension: self.min_dimension,
            quality_ladder: parse_quality_ladder(&self.quality)?,
            ..CompressionTarget::default()
        })
    }
}

#[derive(Debug, Parser)]
struct CompressArgs {
    #[arg(long)]
    input: String,
    #[arg(long)]
    out: PathBuf,
    #[command(flatten)]
    budget: BudgetArgs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CompositionArg {
    TextureWrap,
    TryOn,
}

impl From<CompositionArg> for Composition {
    fn from(value: CompositionArg) -> Self {
        match value {
            CompositionArg::TextureWrap => Composition::TextureWrap,
            CompositionArg::TryOn => Composition::TryOn,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TransportArg {
    Json,
    Multipart,
}

impl From<TransportArg> for Transport {
    fn from(value: TransportArg) -> Self {
        match value {
            TransportArg::Json => Transport::JsonInline,
            TransportArg::Multipart => Transport::Multipart,
        }
    }
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[arg(long, value_enum)]
    composition: CompositionArg,
    #[arg(long = "image", required = true)]
    images: Vec<String>,
    #[arg(long)]
    prompt: Option<String>,
    #[arg(long, value_enum, default_value = "json")]
    transport: TransportArg,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    api_base: Option<String>,
    #[arg(long)]
    relay_url: Option<String>,
    #[arg(long)]
    out: Option<PathBuf>,
    #[command(flatten)]
    budget: BudgetArgs,
}

#[derive(Debug, Parser)]
struct ClassifyArgs {
    #[arg(long)]
    status: u16,
    #[arg(long)]
    body: PathBuf,
}

#[derive(Debug, Parser)]
struct ServeArgs {
    #[arg(long, default_value = "127.0.0.1:8787")]
    bind: String,
    #[arg(long)]
    model: Option<String>,
}

#[derive(Debug, Parser)]
struct CheckArgs {
    #[arg(long)]
    text_model: Option<String>,
    #[arg(long)]
    api_base: Option<String>,
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("rebirth error: {err:#}");
            if let Some(help) = err
                .downcast_ref::<PipelineError>()
                .and_then(PipelineError::help_text)
            {
                eprintln!("hint: {help}");
            }
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Compress(args) => run_compress(args),
        Command::Generate(args) => run_generate(args),
        Command::Classify(args) => run_classify(args),
        Command::Serve(args) => run_serve(args),
        Command::Check(args) => run_check(args),
    }
}

fn run_compress(args: CompressArgs) -> Result<i32> {
    let target = args.budget.to_target()?;
    let config = EngineConfig::from_env();
    let client = GenerationClient::new(config.request_timeout);
    let original = load_source(&args.input, &client)?;
    let input_bytes = original.byte_len();

    let compressed = compress(original, &target)?;
    fs::write(&args.out, compressed.bytes())
        .with_context(|| format!("failed writing {}", args.out.display()))?;

    let summary = json!({
        "source": compressed.source_name(),
        "mime_type": compressed.mime_type(),
        "input_bytes": input_bytes,
        "output_bytes": compressed.byte_len(),
        "within_target": compressed.byte_len() <= target.target_bytes,
        "exceeds_hard_stop": target.exceeds_hard_stop(&compressed),
        "out": args.out.display().to_string(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(0)
}

fn run_generate(args: GenerateArgs) -> Result<i32> {
    let mut config = EngineConfig::from_env();
    if let Some(model) = args.model {
        config = config.with_model(model);
    }
    if let Some(api_base) = args.api_base {
        config = config.with_api_base(api_base);
    }
    if let Some(relay_url) = args.relay_url {
        config = config.with_relay_base(relay_url);
    }
    config.compression = args.budget.to_target()?;

    let pipeline = Pipeline::new(config);
    let images = args
        .images
        .iter()
        .map(|source| load_source(source, pipeline.client()))
        .collect::<Result<Vec<MediaAsset>>>()?;

    let mut invocation = Invocation::new(args.composition.into(), images, args.transport.into());
    if let Some(prompt) = args.prompt {
        invocation = invocation.with_prompt(prompt);
    }
    let outcome = pipeline.generate(invocation)?;

    println!("{}", serde_json::to_string_pretty(&outcome.to_boundary())?);
    report_outcome(&outcome, args.out.as_deref())
}

fn run_classify(args: ClassifyArgs) -> Result<i32> {
    let body = fs::read_to_string(&args.body)
        .with_context(|| format!("failed reading {}", args.body.display()))?;
    let outcome = classify(args.status, &body);
    println!("{}", serde_json::to_string_pretty(&outcome.to_boundary())?);
    Ok(0)
}

fn run_check(args: CheckArgs) -> Result<i32> {
    let mut config = EngineConfig::from_env();
    if let Some(text_model) = args.text_model {
        config = config.with_text_model(text_model);
    }
    if let Some(api_base) = args.api_base {
        config = config.with_api_base(api_base);
    }
    let client = GenerationClient::new(config.request_timeout);
    let report = check_credentials(&config, &client)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if report.result.ok {
        return Ok(0);
    }
    if let Some(hint) = report.result.status.and_then(remediation_hint) {
        eprintln!("hint: {hint}");
    }
    Ok(1)
}

fn run_serve(args: ServeArgs) -> Result<i32> {
    let mut config = EngineConfig::from_env();
    if let Some(model) = args.model {
        config = config.with_model(model);
    }
    if config.require_api_key().is_err() {
        warn!("GEMINI_API_KEY is not set; every relay request will fail with 500");
    }
    let handler = Arc::new(RelayHandler::new(config));
    let server = Server::http(args.bind.as_str())
        .map_err(|err| anyhow!("failed to bind relay on {}: {err}", args.bind))?;
    info!(bind = %args.bind, "relay listening");

    for request in server.incoming_requests() {
        let handler = Arc::clone(&handler);
        thread::spawn(move || {
            if let Err(err) = serve_request(&handler, request) {
                warn!(error = %format!("{err:#}"), "relay response failed");
            }
        });
    }
    Ok(0)
}

fn serve_request(handler: &RelayHandler, mut request: Request) -> Result<()> {
    let body = read_capped(request.as_reader(), handler.body_limit())?;
    let method = request.method().to_string();
    let url = request.url().to_string();
    let content_type = request
        .headers()
        .iter()
        .find(|header| header.field.equiv("Content-Type"))
        .map(|header| header.value.to_string());

    let relayed = handler.handle(&method, &url, content_type.as_deref(), &body);
    info!(%method, %url, status = relayed.status, "relay request handled");

    let header = Header::from_bytes(&b"Content-Type"[..], relayed.content_type.as_bytes())
        .map_err(|_| anyhow!("invalid content type '{}'", relayed.content_type))?;
    let response = Response::from_data(relayed.body)
        .with_status_code(StatusCode(relayed.status))
        .with_header(header);
    request.respond(response).context("failed writing response")?;
    Ok(())
}

fn read_capped(reader: impl Read, limit: usize) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    reader
        .take(limit as u64 + 1)
        .read_to_end(&mut body)
        .context("failed reading request body")?;
    Ok(body)
}

fn load_source(src: &str, client: &GenerationClient) -> Result<MediaAsset> {
    let trimmed = src.trim();
    if trimmed.starts_with("data:") {
        return MediaAsset::from_data_url(trimmed, "upload");
    }
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        return Ok(client.fetch_asset(trimmed)?);
    }
    MediaAsset::from_path(Path::new(trimmed))
}

fn report_outcome(outcome: &GenerationOutcome, out: Option<&Path>) -> Result<i32> {
    match outcome {
        GenerationOutcome::Success { base64_data, .. } => {
            if let Some(path) = out {
                let bytes = BASE64
                    .decode(base64_data.as_bytes())
                    .context("generated image is not valid base64")?;
                fs::write(path, bytes)
                    .with_context(|| format!("failed writing {}", path.display()))?;
                info!(path = %path.display(), "generated image written");
            }
            Ok(0)
        }
        GenerationOutcome::TextOnly { .. } => {
            eprintln!("hint: the model answered with text only; try rephrasing the prompt.");
            Ok(1)
        }
        GenerationOutcome::RemoteError { http_status, .. } => {
            if let Some(hint) = remediation_hint(*http_status) {
                eprintln!("hint: {hint}");
            }
            Ok(1)
        }
        GenerationOutcome::MalformedResponse { http_status, .. } => {
            let hint = remediation_hint(*http_status)
                .unwrap_or("the endpoint did not return a usable answer; check the relay URL or API base.");
            eprintln!("hint: {hint}");
            Ok(1)
        }
    }
}

fn parse_quality_ladder(raw: &str) -> Result<Vec<f32>> {
    let ladder = raw
        .split(',')
        .map(str::trim)
        .filter(|piece| !piece.is_empty())
        .map(|piece| {
            piece
                .parse::<f32>()
                .with_context(|| format!("invalid quality '{piece}'"))
        })
        .collect::<Result<Vec<f32>>>()?;
    if ladder.is_empty() {
        bail!("quality ladder must list at least one value");
    }
    Ok(ladder)
}
