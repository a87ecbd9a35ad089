//! Overlapping character-window chunking.
//!
//! Each window ends on the coarsest break point available in its second half
//! (paragraph, line, sentence, word), falling back to a plain character
//! boundary. The next window starts `overlap` characters before the previous
//! one ended, so neighbours always share exactly `overlap` characters.
//! Lengths are counted in chars, never bytes.

use crate::error::{Error, Result};
use crate::types::{Chunk, Document};

/// Break-point groups, coarse to fine. Within a group the latest match wins.
const SEPARATORS: &[&[&str]] = &[&["\n\n"], &["\n"], &[". ", "! ", "? "], &[" "]];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl ChunkingConfig {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::config("chunk size must be greater than zero"));
        }
        if overlap >= chunk_size {
            return Err(Error::config(format!(
                "chunk overlap ({overlap}) must be smaller than chunk size ({chunk_size})"
            )));
        }
        Ok(Self { chunk_size, overlap })
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self { chunk_size: 1000, overlap: 200 }
    }
}

/// Splits `document` into ordered chunks of at most `chunk_size` chars.
pub fn split(document: &Document, chunk_size: usize, overlap: usize) -> Result<Vec<Chunk>> {
    let config = ChunkingConfig::new(chunk_size, overlap)?;
    Ok(split_with(document, &config))
}

pub fn split_with(document: &Document, config: &ChunkingConfig) -> Vec<Chunk> {
    let chars: Vec<char> = document.content.chars().collect();
    let headers = section_headers(&document.content);
    spans(&chars, config.chunk_size, config.overlap)
        .into_iter()
        .enumerate()
        .map(|(sequence_index, (start, end))| Chunk {
            text: chars[start..end].iter().collect(),
            sequence_index,
            parent_document_id: document.id.clone(),
            section: section_for(&headers, start, end),
        })
        .collect()
}

/// Char-index spans `[start, end)` of each chunk.
fn spans(chars: &[char], chunk_size: usize, overlap: usize) -> Vec<(usize, usize)> {
    let n = chars.len();
    if n == 0 {
        return Vec::new();
    }
    let mut out = Vec::new();
    let mut start = 0;
    loop {
        if n - start <= chunk_size {
            out.push((start, n));
            return out;
        }
        let end = break_point(chars, start, start + chunk_size, overlap);
        out.push((start, end));
        start = end - overlap;
    }
}

/// Picks where the window `[start, limit]` ends. Always returns a value in
/// `(start + overlap, limit]` so the following window makes progress.
fn break_point(chars: &[char], start: usize, limit: usize, overlap: usize) -> usize {
    let progress_floor = start + overlap + 1;
    let half = start + (limit - start) / 2;
    for (rank, group) in SEPARATORS.iter().enumerate() {
        // word breaks may land anywhere; coarser breaks only in the second half
        let floor = if rank + 1 == SEPARATORS.len() { progress_floor } else { half.max(progress_floor) };
        let best = group.iter().filter_map(|sep| last_break(chars, sep, floor, limit)).max();
        if let Some(p) = best {
            return p;
        }
    }
    limit
}

/// Largest `p` in `[floor, limit]` where `sep` ends exactly at `p`.
fn last_break(chars: &[char], sep: &str, floor: usize, limit: usize) -> Option<usize> {
    let sep: Vec<char> = sep.chars().collect();
    let len = sep.len();
    if floor > limit {
        return None;
    }
    (floor.max(len)..=limit).rev().find(|&p| chars[p - len..p] == sep[..])
}

/// `(char offset, section name)` for every header line, e.g. `HOUSE RULES:`.
fn section_headers(text: &str) -> Vec<(usize, String)> {
    let mut headers = Vec::new();
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if let Some(name) = header_name(line) {
            headers.push((offset, name));
        }
        offset += line.chars().count();
    }
    headers
}

fn header_name(line: &str) -> Option<String> {
    let (label, _) = line.trim_start().split_once(':')?;
    let label = label.trim_end();
    let mut chars = label.chars();
    if !chars.next().is_some_and(|c| c.is_ascii_uppercase()) {
        return None;
    }
    let is_header = chars.all(|c| c.is_ascii_uppercase() || matches!(c, ' ' | '&' | '-' | '\'' | '/'));
    is_header.then(|| label.to_lowercase().replace(' ', "_"))
}

/// First header inside `[start, end)`, else the nearest one before `start`.
fn section_for(headers: &[(usize, String)], start: usize, end: usize) -> Option<String> {
    headers
        .iter()
        .find(|(pos, _)| (start..end).contains(pos))
        .or_else(|| headers.iter().rev().find(|(pos, _)| *pos < start))
        .map(|(_, name)| name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SourceKind;
    use std::path::PathBuf;

    fn doc(content: &str) -> Document {
        Document {
            id: "listing.txt".into(),
            path: PathBuf::from("/corpus/listing.txt"),
            filename: "listing.txt".into(),
            content: content.to_string(),
            source_kind: SourceKind::File,
        }
    }

    fn assert_overlap(chunks: &[Chunk], overlap: usize) {
        for pair in chunks.windows(2) {
            let head: String = pair[1].text.chars().take(overlap).collect();
            assert!(pair[0].text.ends_with(&head), "{:?} / {:?}", pair[0].text, pair[1].text);
        }
    }

    #[test]
    fn rejects_overlap_not_smaller_than_size() {
        assert!(matches!(split(&doc("abc"), 10, 10), Err(Error::Configuration(_))));
        assert!(matches!(split(&doc("abc"), 0, 0), Err(Error::Configuration(_))));
    }

    #[test]
    fn short_document_is_one_chunk() {
        let chunks = split(&doc("Check-in is at 3 PM."), 50, 10).expect("split");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Check-in is at 3 PM.");
        assert_eq!(chunks[0].sequence_index, 0);
    }

    #[test]
    fn empty_document_has_no_chunks() {
        assert!(split(&doc(""), 50, 10).expect("split").is_empty());
    }

    #[test]
    fn hundred_twenty_chars_make_three_chunks() {
        // nine letters and a space, twelve times
        let content = "abcdefghi ".repeat(12);
        assert_eq!(content.chars().count(), 120);
        let chunks = split(&doc(&content), 50, 10).expect("split");
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.text.chars().count() <= 50));
        assert_overlap(&chunks, 10);

        let unbroken = "x".repeat(120);
        let chunks = split(&doc(&unbroken), 50, 10).expect("split");
        assert_eq!(chunks.len(), 3);
        assert_overlap(&chunks, 10);
    }

    #[test]
    fn prefers_paragraph_breaks_over_words() {
        let content = format!("{}\n\n{}", "word ".repeat(8).trim_end(), "more ".repeat(12));
        let chunks = split(&doc(&content), 60, 5).expect("split");
        assert!(chunks[0].text.ends_with("\n\n"), "{:?}", chunks[0].text);
        assert_overlap(&chunks, 5);
    }

    #[test]
    fn bounds_and_overlap_hold_for_prose() {
        let content = "The cabin sleeps six. There is a wood stove! Is there parking? Yes, two spaces.\n"
            .repeat(9);
        let chunks = split(&doc(&content), 73, 17).expect("split");
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.text.chars().count() <= 73));
        assert_overlap(&chunks, 17);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.sequence_index, i);
        }
    }

    #[test]
    fn multibyte_text_is_split_on_char_boundaries() {
        let content = "été ☀ ".repeat(30);
        let chunks = split(&doc(&content), 20, 4).expect("split");
        assert!(chunks.iter().all(|c| c.text.chars().count() <= 20));
        assert_overlap(&chunks, 4);
    }

    #[test]
    fn deterministic_boundaries() {
        let content = "Quiet hours 10 PM to 8 AM. No parties.\nNo smoking indoors.\n\n".repeat(6);
        let a = split(&doc(&content), 64, 12).expect("split");
        let b = split(&doc(&content), 64, 12).expect("split");
        assert_eq!(a, b);
    }

    #[test]
    fn chunks_carry_nearest_section() {
        let content = "Cozy cabin by the lake.\nAMENITIES:\nWiFi, kitchen, fire pit.\nHOUSE RULES:\nNo pets.\n";
        let chunks = split(&doc(content), 30, 5).expect("split");
        assert_eq!(chunks[0].section, None);
        assert!(chunks.iter().any(|c| c.section.as_deref() == Some("amenities")));
        assert_eq!(chunks.last().and_then(|c| c.section.as_deref()), Some("house_rules"));
    }

    #[test]
    fn header_detection() {
        assert_eq!(header_name("CHECK IN & CHECK OUT:\n").as_deref(), Some("check_in_&_check_out"));
        assert_eq!(header_name("WIFI: free high-speed internet included").as_deref(), Some("wifi"));
        assert_eq!(header_name("Note: lowercase label"), None);
        assert_eq!(header_name("no colon here"), None);
    }
}
