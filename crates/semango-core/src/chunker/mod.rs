//! Overlapping text chunker.
//!
//! Splits long text into windows of a target size with a fixed overlap,
//! preferring to cut on word boundaries so no chunk starts or ends in the
//! middle of a word. Offsets are byte offsets into the source text and
//! feed directly into chunk-id derivation, so the same input always
//! yields the same chunks.

/// Characters treated as word boundaries when adjusting chunk edges.
const BOUNDARY: &[u8] = b" \t\r\n.,;!?";

fn is_boundary(byte: u8) -> bool {
    BOUNDARY.contains(&byte)
}

/// Split `text` into overlapping chunks of at most `size` bytes.
///
/// Returns `(byte_offset, chunk)` pairs in source order. The end of each
/// chunk is pulled back to the nearest preceding boundary character; if
/// none exists inside the window the hard boundary at `size` is used.
/// The next window starts `overlap` bytes before the previous end, then
/// advances past the next boundary character. Text no longer than `size`
/// comes back as a single chunk at offset 0.
pub fn chunk_text(text: &str, size: usize, overlap: usize) -> Vec<(usize, String)> {
    if text.len() <= size {
        if text.is_empty() {
            return Vec::new();
        }
        return vec![(0, text.to_string())];
    }

    let bytes = text.as_bytes();
    let len = bytes.len();
    let mut chunks = Vec::new();
    let mut start = 0usize;

    loop {
        let mut end = (start + size).min(len);
        if end < len {
            let mut cut = end;
            while cut > start && !is_boundary(bytes[cut - 1]) {
                cut -= 1;
            }
            if cut > start {
                end = cut;
            }
            while end > start && !text.is_char_boundary(end) {
                end -= 1;
            }
            if end == start {
                // Pathological window full of one multi-byte char run;
                // fall back to the next char boundary past the hard cut.
                end = (start + size).min(len);
                while end < len && !text.is_char_boundary(end) {
                    end += 1;
                }
            }
        }

        chunks.push((start, text[start..end].to_string()));
        if end >= len {
            break;
        }

        let mut next = end.saturating_sub(overlap);
        let mut probe = next;
        while probe < end && !is_boundary(bytes[probe]) {
            probe += 1;
        }
        if probe < end {
            next = probe + 1;
        }
        while next < len && !text.is_char_boundary(next) {
            next += 1;
        }
        if next <= start {
            next = end;
        }
        start = next;
    }

    chunks
}
