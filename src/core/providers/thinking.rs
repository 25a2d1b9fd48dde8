//! Reasoning / thinking-tag extractor (C8, spec.md §4.8).
//!
//! Splits `<think>...</think>` segments out of text emitted by models that
//! interleave reasoning with content. Grounded in the shape of the
//! teacher's `core/providers/thinking.rs`, scoped down to the two modes the
//! spec actually requires: a one-shot whole-text split and a stateful
//! streaming splitter.

const OPEN_TAG: &str = "<think>";
const CLOSE_TAG: &str = "</think>";

/// Splits a complete string into (content, reasoning). Multiple blocks
/// concatenate in order; an unterminated `<think>` sends everything after
/// it to `reasoning` (spec.md §4.8 "Whole-text").
pub fn split_whole_text(text: &str) -> (String, String) {
    let mut splitter = ThinkingSplitter::new();
    let (mut content, mut reasoning) = splitter.push(text);
    let (final_content, final_reasoning) = splitter.finish();
    content.push_str(&final_content);
    reasoning.push_str(&final_reasoning);
    (content, reasoning)
}

/// Stateful streaming splitter. Consumes arbitrary chunks and returns the
/// content/reasoning delta produced by each call. Tracks whether it is
/// currently inside a `<think>` block and carries at most
/// `max(OPEN_TAG, CLOSE_TAG).len() - 1` bytes of a possible partial tag at
/// the tail of what it has consumed so far (spec.md §4.8 "Streaming").
#[derive(Debug, Default)]
pub struct ThinkingSplitter {
    in_block: bool,
    carry: String,
}

impl ThinkingSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one more chunk of upstream text, returning `(content_delta,
    /// reasoning_delta)`. Never emits tag bytes on either side.
    pub fn push(&mut self, chunk: &str) -> (String, String) {
        let mut working = std::mem::take(&mut self.carry);
        working.push_str(chunk);

        let mut content = String::new();
        let mut reasoning = String::new();

        loop {
            let tag = if self.in_block { CLOSE_TAG } else { OPEN_TAG };
            if let Some(pos) = working.find(tag) {
                let before = &working[..pos];
                if self.in_block {
                    reasoning.push_str(before);
                } else {
                    content.push_str(before);
                }
                let rest = working[pos + tag.len()..].to_string();
                self.in_block = !self.in_block;
                working = rest;
                continue;
            }

            let max_carry = tag.len().saturating_sub(1);
            let carry_len = longest_suffix_prefix_overlap(&working, tag, max_carry);
            let split_at = working.len() - carry_len;
            let (emit, carry) = working.split_at(split_at);
            if self.in_block {
                reasoning.push_str(emit);
            } else {
                content.push_str(emit);
            }
            self.carry = carry.to_string();
            break;
        }

        (content, reasoning)
    }

    /// Flushes a non-empty carry (a tag-like suffix that never completed)
    /// to whichever side the splitter is currently in, per spec.md §4.8.
    pub fn finish(&mut self) -> (String, String) {
        let carry = std::mem::take(&mut self.carry);
        if carry.is_empty() {
            (String::new(), String::new())
        } else if self.in_block {
            (String::new(), carry)
        } else {
            (carry, String::new())
        }
    }
}

/// The longest suffix of `text` (up to `max_len` bytes) that equals a
/// prefix of `tag` — the "might be the start of a tag" check.
fn longest_suffix_prefix_overlap(text: &str, tag: &str, max_len: usize) -> usize {
    let max_len = max_len.min(text.len());
    for len in (1..=max_len).rev() {
        if text.as_bytes().ends_with(&tag.as_bytes()[..len]) {
            return len;
        }
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_text_single_block() {
        let (content, reasoning) = split_whole_text("before<think>reason</think>after");
        assert_eq!(content, "beforeafter");
        assert_eq!(reasoning, "reason");
    }

    #[test]
    fn whole_text_multiple_blocks_concatenate() {
        let (content, reasoning) = split_whole_text("<think>a</think>x<think>b</think>y");
        assert_eq!(content, "xy");
        assert_eq!(reasoning, "ab");
    }

    #[test]
    fn whole_text_unterminated_block_goes_to_reasoning() {
        let (content, reasoning) = split_whole_text("hi<think>still thinking");
        assert_eq!(content, "hi");
        assert_eq!(reasoning, "still thinking");
    }

    #[test]
    fn streaming_split_across_arbitrary_chunk_boundaries() {
        let mut splitter = ThinkingSplitter::new();
        let mut content = String::new();
        let mut reasoning = String::new();
        for chunk in ["<thi", "nk>Reason</thi", "nk>Answer"] {
            let (c, r) = splitter.push(chunk);
            content.push_str(&c);
            reasoning.push_str(&r);
        }
        let (c, r) = splitter.finish();
        content.push_str(&c);
        reasoning.push_str(&r);

        assert_eq!(reasoning, "Reason");
        assert_eq!(content, "Answer");
        assert!(!content.contains("<think>"));
        assert!(!reasoning.contains("</think>"));
    }

    #[test]
    fn content_plus_reasoning_equals_input_minus_tags() {
        let input = "A<think>B</think>C<think>D";
        let mut splitter = ThinkingSplitter::new();
        let (mut content, mut reasoning) = splitter.push(input);
        let (fc, fr) = splitter.finish();
        content.push_str(&fc);
        reasoning.push_str(&fr);
        assert_eq!(content, "AC");
        assert_eq!(reasoning, "BD");
    }
}
