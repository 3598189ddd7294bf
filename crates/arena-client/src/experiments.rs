use crate::model::GenerationMode;

/// One selectable experiment (model pair) offered by the backend.
#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ExperimentOption {
    /// Display label.
    pub label: String,
    /// Experiment id sent as `experiment_id`.
    pub value: String,
    pub mode: GenerationMode,
}

impl ExperimentOption {
    /// Derives label and mode from a backend experiment id.
    ///
    /// Ids containing `FIM` run in FIM mode, all others in chat mode.
    pub fn from_id(id: impl Into<String>) -> Self {
        let value = id.into();
        let mode = if value.contains("FIM") {
            GenerationMode::Fim
        } else {
            GenerationMode::Chat
        };
        Self {
            label: experiment_label(&value),
            value,
            mode,
        }
    }
}

/// `GET /api/config/experiments` response body.
#[derive(Clone, Debug, Default, serde::Deserialize)]
pub(crate) struct ExperimentList {
    #[serde(default)]
    pub experiments: Vec<String>,
}

/// The first underscore becomes a space; every word after the first is
/// capitalized with the rest lower-cased.
fn experiment_label(id: &str) -> String {
    let spaced = id.replacen('_', " ", 1);
    spaced
        .split(' ')
        .enumerate()
        .map(|(index, word)| {
            if index == 0 {
                return word.to_string();
            }
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    let rest = chars.as_str().to_lowercase();
                    first.to_uppercase().chain(rest.chars()).collect()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Builds options in backend order; the first is the default selection.
pub fn experiment_options(ids: impl IntoIterator<Item = String>) -> Vec<ExperimentOption> {
    ids.into_iter().map(ExperimentOption::from_id).collect()
}
