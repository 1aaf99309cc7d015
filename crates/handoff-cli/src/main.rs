mod cli;

use std::io::Write;

use cli::{CliError, CliOptions, PromptSource};
use handoff_gateway::config::{GatewayConfig, load_dotenv, require_non_empty_env};
use handoff_gateway::llm::{
    GatewayError, GenerationOutput, GenerationPipeline, GenerationRequest, generate_with_telemetry,
};
use tokio::sync::mpsc;
use tracing::error;
use tracing_subscriber::EnvFilter;

const API_KEY_ENV: &str = "HANDOFF_API_KEY";

#[tokio::main]
async fn main() {
    if let Err(err) = load_dotenv() {
        eprintln!("warning: {err}");
    }
    init_tracing();

    let options = match CliOptions::parse(std::env::args().skip(1)) {
        Ok(options) => options,
        Err(CliError::HelpRequested) => {
            print_usage();
            std::process::exit(0);
        }
        Err(err) => {
            eprintln!("error: {err}");
            eprintln!();
            print_usage();
            std::process::exit(2);
        }
    };

    let config = match GatewayConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!("failed to read gateway config: {err}");
            std::process::exit(2);
        }
    };
    let api_key = match require_non_empty_env(API_KEY_ENV) {
        Ok(key) => key,
        Err(err) => {
            error!("{err}");
            std::process::exit(2);
        }
    };
    let user_prompt = match read_prompt(&options.prompt) {
        Ok(prompt) => prompt,
        Err(err) => {
            error!("failed to read prompt: {err}");
            std::process::exit(2);
        }
    };
    let pipeline = match GenerationPipeline::from_config(&config) {
        Ok(pipeline) => pipeline,
        Err(err) => {
            error!("failed to build generation pipeline: {err}");
            std::process::exit(2);
        }
    };

    let request = GenerationRequest {
        provider_kind: options.provider,
        base_url: options
            .base_url
            .clone()
            .unwrap_or_else(|| config.default_base_url(options.provider).to_string()),
        model: options.model.clone(),
        api_key,
        system_instruction: options.system_instruction.clone(),
        user_prompt,
        timeout_ms: config.timeout_ms,
    };

    let result = if options.stream {
        run_streaming(&pipeline, &request).await
    } else {
        generate_with_telemetry(&pipeline, &request).await.0
    };

    match result {
        Ok(output) => print_output(&output),
        Err(err) => {
            eprintln!("{}", err.user_message());
            error!(
                error_type = err.error_type(),
                http_status = err.http_status(),
                "generation failed: {err}"
            );
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("handoff=info,handoff_gateway=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if std::env::var("HANDOFF_LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json")) {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn read_prompt(source: &PromptSource) -> std::io::Result<String> {
    match source {
        PromptSource::Inline(prompt) => Ok(prompt.clone()),
        PromptSource::File(path) => std::fs::read_to_string(path),
    }
}

/// Echoes raw deltas to stdout while the pipeline runs, then prints the
/// enforced result.
async fn run_streaming(
    pipeline: &GenerationPipeline,
    request: &GenerationRequest,
) -> Result<GenerationOutput, GatewayError> {
    let (sender, mut receiver) = mpsc::unbounded_channel::<handoff_gateway::llm::gateway::StreamDelta>();
    let printer = tokio::spawn(async move {
        let mut stdout = std::io::stdout();
        while let Some(delta) = receiver.recv().await {
            if delta.text.is_empty() {
                continue;
            }
            let _ = write!(stdout, "{}", delta.text);
            let _ = stdout.flush();
        }
        let _ = writeln!(stdout);
    });

    let result = pipeline.call_provider_detailed_stream(request, sender).await;
    if let Err(err) = printer.await {
        error!("delta printer task failed: {err}");
    }
    result
}

fn print_output(output: &GenerationOutput) {
    match serde_json::to_string_pretty(output) {
        Ok(json) => println!("{json}"),
        Err(err) => {
            error!("failed to serialize generation output: {err}");
            println!("{}", output.text);
        }
    }
}

fn print_usage() {
    eprintln!(
        "Usage: handoff --provider <kind> --model <id> (--prompt <text> | --prompt-file <path>) [options]\n\
         \n\
         Providers: openai | anthropic | google (aliases: mistral, claude, gemini)\n\
         \n\
         Options:\n\
         - --base-url <url>   Override the provider base URL\n\
         - --system <text>    System instruction for the primary call\n\
         - --stream           Print raw model text as it arrives\n\
         - --help             Show this help text\n\
         \n\
         Environment:\n\
         - HANDOFF_API_KEY                  Provider API key (required)\n\
         - GENERATION_TIMEOUT_MS            Per-attempt timeout, minimum 5000\n\
         - GENERATION_MAX_ATTEMPTS          Attempts per generation (default 3)\n\
         - GENERATION_RETRY_BASE_DELAY_MS   First backoff delay (default 500)\n\
         - GENERATION_PIPELINE_DEADLINE_MS  Optional bound on the whole pipeline\n\
         - HANDOFF_LOG_FORMAT=json          Structured JSON logs on stderr"
    );
}
