use crate::errors::ArenaError;
use crate::model::GenerationMode;

/// What the models are asked to complete.
#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum GenerationInput {
    /// Free-text prompt (chat mode).
    Chat { prompt: String },
    /// Code around the gap to fill (FIM mode).
    Fim { prefix: String, suffix: String },
}

/// Inputs for one comparison round.
#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GenerationRequest {
    pub input: GenerationInput,
    /// Selects the model pair; the server default is used when `None`.
    pub experiment_id: Option<String>,
}

impl GenerationRequest {
    /// Creates a chat-mode request.
    pub fn chat(prompt: impl Into<String>) -> Self {
        Self {
            input: GenerationInput::Chat {
                prompt: prompt.into(),
            },
            experiment_id: None,
        }
    }

    /// Creates a FIM-mode request.
    pub fn fim(prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            input: GenerationInput::Fim {
                prefix: prefix.into(),
                suffix: suffix.into(),
            },
            experiment_id: None,
        }
    }

    /// Builds a request from raw form fields.
    ///
    /// Exactly one of `prompt` and `prefix` must be non-empty.
    pub fn from_fields(prompt: &str, prefix: &str, suffix: &str) -> Result<Self, ArenaError> {
        match (prompt.trim().is_empty(), prefix.trim().is_empty()) {
            (false, true) => Ok(Self::chat(prompt)),
            (true, false) => Ok(Self::fim(prefix, suffix)),
            (false, false) => Err(ArenaError::Validation(
                "prompt and prefix are mutually exclusive".into(),
            )),
            (true, true) => Err(ArenaError::Validation(
                "either prompt or prefix is required".into(),
            )),
        }
    }

    /// Sets the experiment id; blank ids are treated as unset.
    pub fn experiment(mut self, experiment_id: Option<impl Into<String>>) -> Self {
        self.experiment_id = experiment_id
            .map(Into::into)
            .filter(|id: &String| !id.trim().is_empty());
        self
    }

    pub fn mode(&self) -> GenerationMode {
        match self.input {
            GenerationInput::Chat { .. } => GenerationMode::Chat,
            GenerationInput::Fim { .. } => GenerationMode::Fim,
        }
    }

    /// Text recorded as `codePrefix` with a preference.
    pub fn code_prefix(&self) -> &str {
        match &self.input {
            GenerationInput::Chat { prompt } => prompt,
            GenerationInput::Fim { prefix, .. } => prefix,
        }
    }

    /// Checks the request can be issued.
    pub fn validate(&self) -> Result<(), ArenaError> {
        let primary = match &self.input {
            GenerationInput::Chat { prompt } => prompt,
            GenerationInput::Fim { prefix, .. } => prefix,
        };
        if primary.trim().is_empty() {
            return Err(ArenaError::Validation(format!(
                "{} input must not be empty",
                self.mode()
            )));
        }
        Ok(())
    }

    /// Form fields for `/api/generate` and `/api/generate-stream`.
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = match &self.input {
            GenerationInput::Chat { prompt } => vec![("prompt", prompt.clone())],
            GenerationInput::Fim { prefix, suffix } => {
                vec![("prefix", prefix.clone()), ("suffix", suffix.clone())]
            }
        };
        fields.push(("mode", self.mode().as_str().to_string()));
        if let Some(experiment_id) = &self.experiment_id {
            fields.push(("experiment_id", experiment_id.clone()));
        }
        fields
    }
}
