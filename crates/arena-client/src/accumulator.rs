use std::fmt;
use std::sync::Arc;

use crate::model::{ComparisonResults, ModelAssignment, ModelSlot};

/// Append-only text whose clones share the already received segments.
///
/// Cloning is O(1), so a snapshot per chunk never copies earlier tokens.
#[derive(Clone, Default)]
pub struct SlotText {
    tail: Option<Arc<Segment>>,
}

struct Segment {
    text: Box<str>,
    prev: Option<Arc<Segment>>,
    /// Totals up to and including this segment.
    len: usize,
    chars: usize,
}

impl SlotText {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_str(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        let (len, chars) = self
            .tail
            .as_ref()
            .map_or((0, 0), |tail| (tail.len, tail.chars));
        self.tail = Some(Arc::new(Segment {
            text: text.into(),
            prev: self.tail.take(),
            len: len + text.len(),
            chars: chars + text.chars().count(),
        }));
    }

    pub fn clear(&mut self) {
        *self = Self::new();
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.tail.as_ref().map_or(0, |tail| tail.len)
    }

    pub fn char_count(&self) -> usize {
        self.tail.as_ref().map_or(0, |tail| tail.chars)
    }

    pub fn is_empty(&self) -> bool {
        self.tail.is_none()
    }

    pub fn ends_with(&self, c: char) -> bool {
        self.tail.as_ref().is_some_and(|tail| tail.text.ends_with(c))
    }

    /// Segments in append order.
    fn segments(&self) -> Vec<&str> {
        let mut out = Vec::new();
        let mut cursor = self.tail.as_deref();
        while let Some(segment) = cursor {
            out.push(&*segment.text);
            cursor = segment.prev.as_deref();
        }
        out.reverse();
        out
    }

    fn eq_str(&self, other: &str) -> bool {
        if self.len() != other.len() {
            return false;
        }
        let mut rest = other;
        for segment in self.segments() {
            match rest.strip_prefix(segment) {
                Some(tail) => rest = tail,
                None => return false,
            }
        }
        rest.is_empty()
    }
}

// Unlinks uniquely owned segments one by one instead of recursing down a
// chain that can be one segment per token long.
impl Drop for SlotText {
    fn drop(&mut self) {
        let mut next = self.tail.take();
        while let Some(segment) = next {
            match Arc::try_unwrap(segment) {
                Ok(mut owned) => next = owned.prev.take(),
                Err(_) => break,
            }
        }
    }
}

impl fmt::Display for SlotText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in self.segments() {
            f.write_str(segment)?;
        }
        Ok(())
    }
}

impl fmt::Debug for SlotText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.to_string(), f)
    }
}

impl PartialEq for SlotText {
    fn eq(&self, other: &Self) -> bool {
        match (&self.tail, &other.tail) {
            (Some(a), Some(b)) if Arc::ptr_eq(a, b) => true,
            _ => self.len() == other.len() && self.eq_str(&other.to_string()),
        }
    }
}

impl Eq for SlotText {}

impl PartialEq<str> for SlotText {
    fn eq(&self, other: &str) -> bool {
        self.eq_str(other)
    }
}

impl PartialEq<&str> for SlotText {
    fn eq(&self, other: &&str) -> bool {
        self.eq_str(other)
    }
}

impl From<&str> for SlotText {
    fn from(value: &str) -> Self {
        let mut text = Self::new();
        text.push_str(value);
        text
    }
}

/// Two append-only text buffers, one per model slot.
///
/// Tokens are trusted to arrive as strict incremental appends; nothing here
/// reorders, diffs or replaces text.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ModelBuffers {
    model_a: SlotText,
    model_b: SlotText,
}

impl ModelBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, slot: ModelSlot, text: &str) {
        self.slot_mut(slot).push_str(text);
    }

    pub fn reset(&mut self) {
        self.model_a.clear();
        self.model_b.clear();
    }

    pub fn get(&self, slot: ModelSlot) -> &SlotText {
        match slot {
            ModelSlot::A => &self.model_a,
            ModelSlot::B => &self.model_b,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.model_a.is_empty() && self.model_b.is_empty()
    }

    /// Maps the slot buffers onto base/finetuned under `assignment`.
    pub fn resolve(&self, assignment: ModelAssignment) -> ComparisonResults {
        ComparisonResults::from_slots(
            assignment,
            &self.model_a.to_string(),
            &self.model_b.to_string(),
        )
    }

    fn slot_mut(&mut self, slot: ModelSlot) -> &mut SlotText {
        match slot {
            ModelSlot::A => &mut self.model_a,
            ModelSlot::B => &mut self.model_b,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interleaved_appends_keep_per_slot_order() {
        let mut buffers = ModelBuffers::new();
        let tokens = [
            (ModelSlot::A, "fn "),
            (ModelSlot::B, "let "),
            (ModelSlot::B, "x"),
            (ModelSlot::A, "main"),
            (ModelSlot::B, " = 1;"),
            (ModelSlot::A, "()"),
        ];
        for (slot, text) in tokens {
            buffers.append(slot, text);
        }
        assert_eq!(buffers.get(ModelSlot::A), "fn main()");
        assert_eq!(buffers.get(ModelSlot::B), "let x = 1;");
    }

    #[test]
    fn reset_clears_both_buffers() {
        let mut buffers = ModelBuffers::new();
        buffers.append(ModelSlot::A, "a");
        buffers.append(ModelSlot::B, "b");
        buffers.reset();
        assert!(buffers.is_empty());
    }

    #[test]
    fn resolve_uses_assignment() {
        let mut buffers = ModelBuffers::new();
        buffers.append(ModelSlot::A, "x");
        buffers.append(ModelSlot::B, "y");
        let results = buffers.resolve(ModelAssignment::new(true));
        assert_eq!(results.base_response, "x");
        assert_eq!(results.finetuned_response, "y");
    }

    #[test]
    fn clones_share_segments_and_stay_frozen() {
        let mut live = SlotText::from("def f():");
        let earlier = live.clone();
        live.push_str("\n  return 1");

        assert_eq!(earlier, "def f():");
        assert_eq!(live, "def f():\n  return 1");
        let earlier_tail = earlier.tail.as_ref().expect("tail");
        let shared = live
            .tail
            .as_ref()
            .and_then(|tail| tail.prev.as_ref())
            .expect("prev");
        assert!(Arc::ptr_eq(earlier_tail, shared));
    }

    #[test]
    fn counts_and_comparisons() {
        let mut text = SlotText::new();
        assert!(text.is_empty());
        text.push_str("hé");
        text.push_str("");
        text.push_str("llo\n");
        assert_eq!(text.len(), "héllo\n".len());
        assert_eq!(text.char_count(), 6);
        assert!(text.ends_with('\n'));
        assert_ne!(text, "héllo");
        assert_ne!(text, "hél\nlo");
        assert_eq!(text, SlotText::from("héllo\n"));
        assert_eq!(format!("{text:?}"), "\"héllo\\n\"");
    }

    #[test]
    fn long_chains_drop_without_recursion() {
        let mut text = SlotText::new();
        for _ in 0..200_000 {
            text.push_str("x");
        }
        let snapshot = text.clone();
        text.push_str("y");
        drop(text);
        assert_eq!(snapshot.len(), 200_000);
        drop(snapshot);
    }
}
