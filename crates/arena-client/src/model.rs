use std::fmt;

/// Anonymous UI slot a model is shown under for one round.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ModelSlot {
    /// Left-hand / first slot.
    A,
    /// Right-hand / second slot.
    B,
}

impl ModelSlot {
    /// Returns the other slot.
    pub fn other(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }

    /// Returns the slot label as sent on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
        }
    }
}

impl fmt::Display for ModelSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Real identity of a model behind a slot.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelIdentity {
    /// The untuned base model.
    Base,
    /// The fine-tuned model.
    Finetuned,
}

impl fmt::Display for ModelIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Base => f.write_str("base"),
            Self::Finetuned => f.write_str("finetuned"),
        }
    }
}

/// Mapping between slots and identities, fixed for one round.
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ModelAssignment {
    /// Whether slot A holds the base model.
    pub model_a_is_base: bool,
}

impl ModelAssignment {
    pub fn new(model_a_is_base: bool) -> Self {
        Self { model_a_is_base }
    }

    /// Identity of the model shown in `slot`.
    pub fn identity_of(&self, slot: ModelSlot) -> ModelIdentity {
        match (slot, self.model_a_is_base) {
            (ModelSlot::A, true) | (ModelSlot::B, false) => ModelIdentity::Base,
            (ModelSlot::A, false) | (ModelSlot::B, true) => ModelIdentity::Finetuned,
        }
    }

    /// Slot that shows the model with `identity`.
    pub fn slot_of(&self, identity: ModelIdentity) -> ModelSlot {
        match (identity, self.model_a_is_base) {
            (ModelIdentity::Base, true) | (ModelIdentity::Finetuned, false) => ModelSlot::A,
            (ModelIdentity::Base, false) | (ModelIdentity::Finetuned, true) => ModelSlot::B,
        }
    }
}

/// Generation mode of a comparison round.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationMode {
    /// Fill-in-the-middle: prefix and suffix.
    Fim,
    /// Free-text prompt.
    Chat,
}

impl GenerationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fim => "fim",
            Self::Chat => "chat",
        }
    }
}

impl fmt::Display for GenerationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final, identity-keyed completions of a finished round.
#[derive(Clone, Debug, Default, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonResults {
    pub base_response: String,
    pub finetuned_response: String,
}

impl ComparisonResults {
    /// Builds results from slot-keyed text using `assignment`.
    pub fn from_slots(assignment: ModelAssignment, model_a: &str, model_b: &str) -> Self {
        let (base, finetuned) = if assignment.model_a_is_base {
            (model_a, model_b)
        } else {
            (model_b, model_a)
        };
        Self {
            base_response: base.to_string(),
            finetuned_response: finetuned.to_string(),
        }
    }

    /// Returns the completion shown in `slot` under `assignment`.
    pub fn for_slot(&self, assignment: ModelAssignment, slot: ModelSlot) -> &str {
        match assignment.identity_of(slot) {
            ModelIdentity::Base => &self.base_response,
            ModelIdentity::Finetuned => &self.finetuned_response,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignment_maps_slots_both_ways() {
        let a_base = ModelAssignment::new(true);
        assert_eq!(a_base.identity_of(ModelSlot::A), ModelIdentity::Base);
        assert_eq!(a_base.identity_of(ModelSlot::B), ModelIdentity::Finetuned);
        assert_eq!(a_base.slot_of(ModelIdentity::Finetuned), ModelSlot::B);

        let b_base = ModelAssignment::new(false);
        assert_eq!(b_base.identity_of(ModelSlot::A), ModelIdentity::Finetuned);
        assert_eq!(b_base.slot_of(ModelIdentity::Base), ModelSlot::B);
    }

    #[test]
    fn results_from_slots_follow_assignment() {
        let results = ComparisonResults::from_slots(ModelAssignment::new(false), "x", "y");
        assert_eq!(results.base_response, "y");
        assert_eq!(results.finetuned_response, "x");
        assert_eq!(results.for_slot(ModelAssignment::new(false), ModelSlot::A), "x");
    }

    #[test]
    fn slot_and_identity_wire_names() {
        assert_eq!(serde_json::to_string(&ModelSlot::A).expect("slot"), "\"A\"");
        assert_eq!(
            serde_json::to_string(&ModelIdentity::Finetuned).expect("identity"),
            "\"finetuned\""
        );
        let results = serde_json::to_value(ComparisonResults {
            base_response: "b".into(),
            finetuned_response: "f".into(),
        })
        .expect("results");
        assert_eq!(results["baseResponse"], "b");
    }
}
