//! Turns ranked results into the numbered context block handed to a
//! response generator.

use propdb_core::types::QueryResult;

pub const CONTEXT_HEADER: &str = "Relevant Property Information:";

#[derive(Debug, Clone, Copy)]
pub struct ContextAssembler {
    max_items: usize,
    max_chars: usize,
}

impl ContextAssembler {
    pub fn new(max_items: usize, max_chars: usize) -> Self {
        Self { max_items: max_items.max(1), max_chars }
    }

    /// `CONTEXT_HEADER` followed by up to `max_items` entries `"{n}. {content}"`,
    /// separated by blank lines and cut to at most `max_chars` characters.
    /// Empty input gives an empty string.
    pub fn assemble(&self, results: &[QueryResult]) -> String {
        if results.is_empty() {
            return String::new();
        }
        let mut out = CONTEXT_HEADER.to_string();
        let mut used = out.chars().count();
        for (i, result) in results.iter().take(self.max_items).enumerate() {
            let entry = format!("\n\n{}. {}", i + 1, result.content.trim());
            let len = entry.chars().count();
            if used + len <= self.max_chars {
                out.push_str(&entry);
                used += len;
                continue;
            }
            // room for a partial first entry only; later entries are dropped whole
            if i == 0 {
                out.extend(entry.chars().take(self.max_chars.saturating_sub(used)));
            }
            break;
        }
        out
    }
}
