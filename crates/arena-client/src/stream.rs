use crate::model::ModelSlot;

/// Typed events carried by the `/api/generate-stream` body.
///
/// Each SSE frame holds one JSON object tagged by `type`.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// First event of a round; fixes which slot shows the base model.
    Header {
        #[serde(rename = "modelAIsBase", alias = "model_a_is_base")]
        model_a_is_base: bool,
    },
    /// A model's stream became active.
    ModelStart { model: ModelSlot },
    /// Text to append to a model's buffer.
    Token {
        model: ModelSlot,
        text: String,
        /// Set when `text` is a whole fenced code block. Advisory only.
        #[serde(default, alias = "isCodeBlock")]
        is_code_block: bool,
    },
    /// A model's stream closed.
    ModelEnd { model: ModelSlot },
    /// Terminal event.
    Complete,
    /// Any event type this client does not know.
    #[serde(other)]
    Unknown,
}

impl StreamEvent {
    /// Returns true for the terminal `complete` event.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete)
    }

    /// Slot the event refers to, if any.
    pub fn slot(&self) -> Option<ModelSlot> {
        match self {
            Self::ModelStart { model } | Self::Token { model, .. } | Self::ModelEnd { model } => {
                Some(*model)
            }
            Self::Header { .. } | Self::Complete | Self::Unknown => None,
        }
    }
}
