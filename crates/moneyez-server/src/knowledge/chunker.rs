//! Character-window text splitting with overlap.

/// Separators tried in order when choosing where a chunk ends
const SEPARATORS: [&str; 3] = ["\n\n", "\n", " "];

/// Splits text into windows of at most `size` characters
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    size: usize,
    overlap: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(1000, 100)
    }
}

impl Chunker {
    /// `overlap` is clamped below half of `size`
    pub fn new(size: usize, overlap: usize) -> Self {
        let size = size.max(1);
        Self {
            size,
            overlap: overlap.min(size / 2),
        }
    }

    pub fn split(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let n = chars.len();
        let mut chunks = Vec::new();
        let mut start = 0;

        while start < n {
            let limit = (start + self.size).min(n);
            let end = if limit == n {
                n
            } else {
                self.break_point(&chars, start, limit)
            };

            let chunk: String = chars[start..end].iter().collect();
            let chunk = chunk.trim();
            if !chunk.is_empty() {
                chunks.push(chunk.to_string());
            }
            if end == n {
                break;
            }

            let mut next = end.saturating_sub(self.overlap).max(start + 1);
            // begin the overlap on a word
            if let Some(ws) = chars[next..end].iter().position(|c| c.is_whitespace()) {
                if next > start + 1 && next + ws + 1 < end {
                    next += ws + 1;
                }
            }
            start = next;
        }

        chunks
    }

    /// Latest separator end within the back half of `[start, limit)`, else `limit`
    fn break_point(&self, chars: &[char], start: usize, limit: usize) -> usize {
        let floor = start + (limit - start) / 2;
        for sep in SEPARATORS {
            let sep: Vec<char> = sep.chars().collect();
            let mut i = limit;
            while i >= floor + sep.len() {
                if chars[i - sep.len()..i] == sep[..] {
                    return i;
                }
                i -= 1;
            }
        }
        limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_is_one_chunk() {
        assert_eq!(Chunker::default().split("  Tiết kiệm  "), vec!["Tiết kiệm"]);
        assert!(Chunker::default().split("   ").is_empty());
    }

    #[test]
    fn test_prefers_paragraph_breaks() {
        let para_a = "a".repeat(60);
        let para_b = "b ".repeat(40);
        let text = format!("{para_a}\n\n{para_b}");
        let chunks = Chunker::new(100, 10).split(&text);
        assert_eq!(chunks[0], para_a);
        assert!(chunks[1].starts_with('b'));
    }

    #[test]
    fn test_windows_respect_size_and_overlap() {
        let text = "quỹ khẩn cấp ".repeat(300);
        let chunker = Chunker::new(200, 40);
        let chunks = chunker.split(&text);
        assert!(chunks.len() > 10);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 200);
        }
        // consecutive chunks share text
        let tail: String = chunks[0].chars().rev().take(10).collect::<Vec<_>>().into_iter().rev().collect();
        assert!(chunks[1].contains(tail.trim()));
    }

    #[test]
    fn test_unbroken_text_splits_at_limit() {
        let text = "x".repeat(250);
        let chunks = Chunker::new(100, 0).split(&text);
        assert_eq!(chunks.iter().map(|c| c.len()).collect::<Vec<_>>(), vec![100, 100, 50]);
    }
}
