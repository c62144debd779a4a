//! Fixed-size, overlapping text windows.
//!
//! Splits file content into windows of `size` characters that start every
//! `size - overlap` characters and are truncated at the end of the content.
//! Windows that are empty or whitespace-only are dropped, so indices are
//! assigned after filtering. Offsets and lengths count characters, not
//! bytes, so multi-byte text is never split inside a code point.

use crate::error::PreconditionError;

/// One window of a file's text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkWindow {
    /// Character offset of the window start within the content.
    pub offset: usize,
    pub text: String,
}

/// Reject parameters that cannot produce an advancing window sequence.
pub fn validate_chunking(size: usize, overlap: usize) -> Result<(), PreconditionError> {
    if size == 0 || overlap >= size {
        return Err(PreconditionError::InvalidChunking { size, overlap });
    }
    Ok(())
}

/// Split `content` into ordered, non-blank windows.
pub fn chunk_text(
    content: &str,
    size: usize,
    overlap: usize,
) -> Result<Vec<ChunkWindow>, PreconditionError> {
    validate_chunking(size, overlap)?;

    // Byte position of every char start, plus the end of the string.
    let boundaries: Vec<usize> = content
        .char_indices()
        .map(|(b, _)| b)
        .chain(std::iter::once(content.len()))
        .collect();
    let char_len = boundaries.len() - 1;
    let step = size - overlap;

    let mut windows = Vec::with_capacity(char_len / step + 1);
    let mut start = 0;
    while start < char_len {
        let end = (start + size).min(char_len);
        let text = &content[boundaries[start]..boundaries[end]];
        if !text.trim().is_empty() {
            windows.push(ChunkWindow {
                offset: start,
                text: text.to_string(),
            });
        }
        start += step;
    }

    Ok(windows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_text_single_window() {
        let windows = chunk_text("Hello, world!", 100, 10).unwrap();
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].offset, 0);
        assert_eq!(windows[0].text, "Hello, world!");
    }

    #[test]
    fn test_empty_text() {
        assert!(chunk_text("", 100, 10).unwrap().is_empty());
        assert!(chunk_text("   \n\t  ", 100, 10).unwrap().is_empty());
    }

    #[test]
    fn test_no_overlap_window_count() {
        let text = "a".repeat(25);
        let windows = chunk_text(&text, 10, 0).unwrap();
        // ceil(25 / 10)
        assert_eq!(windows.len(), 3);
        assert_eq!(windows[2].text, "aaaaa");
    }

    #[test]
    fn test_overlap_offsets() {
        let text: String = ('a'..='z').collect();
        let windows = chunk_text(&text, 10, 4).unwrap();
        let offsets: Vec<usize> = windows.iter().map(|w| w.offset).collect();
        assert_eq!(offsets, vec![0, 6, 12, 18, 24]);
        assert_eq!(windows[0].text, "abcdefghij");
        assert_eq!(windows[1].text, "ghijklmnop");
        assert_eq!(windows[4].text, "yz");
    }

    #[test]
    fn test_offsets_strictly_increasing() {
        let text = "def f():\n    return 1\n\n".repeat(40);
        let windows = chunk_text(&text, 37, 11).unwrap();
        assert!(windows.len() > 1);
        for pair in windows.windows(2) {
            assert!(pair[0].offset < pair[1].offset);
        }
    }

    #[test]
    fn test_blank_windows_dropped_before_indexing() {
        // Second window is entirely whitespace.
        let text = format!("{}{}{}", "x".repeat(5), " ".repeat(5), "y".repeat(5));
        let windows = chunk_text(&text, 5, 0).unwrap();
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].text, "xxxxx");
        assert_eq!(windows[1].text, "yyyyy");
        assert_eq!(windows[1].offset, 10);
    }

    #[test]
    fn test_overlap_not_smaller_than_size_rejected() {
        assert_eq!(
            chunk_text("anything", 10, 10),
            Err(PreconditionError::InvalidChunking {
                size: 10,
                overlap: 10
            })
        );
        assert!(chunk_text("anything", 10, 12).is_err());
        assert!(chunk_text("anything", 0, 0).is_err());
    }

    #[test]
    fn test_multibyte_characters() {
        let text = "héllo wörld ✓✓✓";
        let windows = chunk_text(text, 4, 0).unwrap();
        let joined: String = windows.iter().map(|w| w.text.as_str()).collect();
        assert_eq!(joined, text);
        assert_eq!(windows[0].text, "héll");
    }

    #[test]
    fn test_deterministic() {
        let text = "import os\n\nclass A:\n    pass\n".repeat(20);
        let c1 = chunk_text(&text, 50, 10).unwrap();
        let c2 = chunk_text(&text, 50, 10).unwrap();
        assert_eq!(c1, c2);
    }
}
