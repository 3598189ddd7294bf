use arena_client::{ArenaError, GenerationRequest, ModelSlot};
use clap::{Args, Parser, Subcommand, ValueEnum};

/// Blind base-vs-finetuned comparison rounds against the arena backend.
#[derive(Parser, Debug)]
#[command(name = "arena", version)]
pub struct Cli {
    /// Backend base URL. Overrides `ARENA_API_URL`.
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    /// Raw `Cookie` header value of a logged-in session. Overrides `ARENA_SESSION_COOKIE`.
    #[arg(long, global = true)]
    pub cookie: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the experiments offered by the backend.
    Experiments,
    /// Run one comparison round and optionally record a preference.
    Generate(GenerateArgs),
}

#[derive(Args, Debug)]
pub struct GenerateArgs {
    /// Chat prompt.
    #[arg(long, conflicts_with_all = ["prefix", "suffix"])]
    pub prompt: Option<String>,

    /// Code before the cursor (FIM).
    #[arg(long)]
    pub prefix: Option<String>,

    /// Code after the cursor (FIM).
    #[arg(long, requires = "prefix")]
    pub suffix: Option<String>,

    /// Experiment id. Defaults to the first experiment matching the round's mode.
    #[arg(long, short = 'e')]
    pub experiment: Option<String>,

    /// Use the single-shot endpoint instead of the stream.
    #[arg(long)]
    pub no_stream: bool,

    /// Record a preference for this slot once the round completes.
    #[arg(long, value_enum, conflicts_with = "ask")]
    pub prefer: Option<SlotArg>,

    /// Ask for a preference on stdin once the round completes.
    #[arg(long)]
    pub ask: bool,
}

impl GenerateArgs {
    pub fn request(&self) -> Result<GenerationRequest, ArenaError> {
        let request = GenerationRequest::from_fields(
            self.prompt.as_deref().unwrap_or_default(),
            self.prefix.as_deref().unwrap_or_default(),
            self.suffix.as_deref().unwrap_or_default(),
        )?;
        Ok(request.experiment(self.experiment.as_deref()))
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum SlotArg {
    A,
    B,
}

impl From<SlotArg> for ModelSlot {
    fn from(value: SlotArg) -> Self {
        match value {
            SlotArg::A => ModelSlot::A,
            SlotArg::B => ModelSlot::B,
        }
    }
}

/// Reads an interactive answer; anything other than a/b means no selection.
pub fn parse_slot_answer(answer: &str) -> Option<ModelSlot> {
    match answer.trim().to_ascii_lowercase().as_str() {
        "a" => Some(ModelSlot::A),
        "b" => Some(ModelSlot::B),
        _ => None,
    }
}
