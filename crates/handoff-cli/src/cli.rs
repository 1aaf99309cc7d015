use std::path::PathBuf;

use handoff_gateway::llm::ProviderKind;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptSource {
    Inline(String),
    File(PathBuf),
}

#[derive(Debug, Clone)]
pub struct CliOptions {
    pub provider: ProviderKind,
    pub model: String,
    pub base_url: Option<String>,
    pub prompt: PromptSource,
    pub system_instruction: Option<String>,
    pub stream: bool,
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("unknown argument: {0}")]
    UnknownArgument(String),
    #[error("missing value for argument: {0}")]
    MissingValue(String),
    #[error("invalid --provider value: {0}")]
    InvalidProvider(String),
    #[error("missing required argument: {0}")]
    MissingArgument(&'static str),
    #[error("--prompt and --prompt-file are mutually exclusive")]
    ConflictingPrompt,
    #[error("help requested")]
    HelpRequested,
}

impl CliOptions {
    pub fn parse<I>(args: I) -> Result<Self, CliError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut provider = None;
        let mut model = None;
        let mut base_url = None;
        let mut prompt = None;
        let mut system_instruction = None;
        let mut stream = false;

        let mut iter = args.into_iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--help" | "-h" => return Err(CliError::HelpRequested),
                "--provider" => {
                    let value = iter.next().ok_or(CliError::MissingValue(arg.clone()))?;
                    provider = Some(
                        value
                            .parse::<ProviderKind>()
                            .map_err(|_| CliError::InvalidProvider(value.clone()))?,
                    );
                }
                "--model" => model = Some(iter.next().ok_or(CliError::MissingValue(arg.clone()))?),
                "--base-url" => {
                    base_url = Some(iter.next().ok_or(CliError::MissingValue(arg.clone()))?);
                }
                "--prompt" | "--prompt-file" => {
                    let value = iter.next().ok_or(CliError::MissingValue(arg.clone()))?;
                    if prompt.is_some() {
                        return Err(CliError::ConflictingPrompt);
                    }
                    prompt = Some(if arg == "--prompt" {
                        PromptSource::Inline(value)
                    } else {
                        PromptSource::File(PathBuf::from(value))
                    });
                }
                "--system" => {
                    system_instruction =
                        Some(iter.next().ok_or(CliError::MissingValue(arg.clone()))?);
                }
                "--stream" => stream = true,
                unknown => return Err(CliError::UnknownArgument(unknown.to_string())),
            }
        }

        Ok(Self {
            provider: provider.ok_or(CliError::MissingArgument("--provider"))?,
            model: model
                .filter(|model| !model.trim().is_empty())
                .ok_or(CliError::MissingArgument("--model"))?,
            base_url,
            prompt: prompt.ok_or(CliError::MissingArgument("--prompt or --prompt-file"))?,
            system_instruction,
            stream,
        })
    }
}
