// src/index/chunking.rs
// Text chunking for embedding-sized windows

/// Target chunk size in characters
const CHUNK_SIZE: usize = 1500;
/// Overlap carried between consecutive chunks
const CHUNK_OVERLAP: usize = 200;

/// Split text into overlapping windows sized for embedding.
///
/// Prefers breaking at paragraph and sentence boundaries near the window
/// edge; whitespace-only input yields no chunks.
pub fn chunk_text(content: &str) -> Vec<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let chars: Vec<char> = trimmed.chars().collect();
    if chars.len() <= CHUNK_SIZE {
        return vec![trimmed.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < chars.len() {
        let hard_end = (start + CHUNK_SIZE).min(chars.len());
        let mut end = hard_end;

        // Look for a natural break in the last quarter of the window
        if hard_end < chars.len() {
            let search_from = start + CHUNK_SIZE * 3 / 4;
            if let Some(break_at) = find_break(&chars, search_from, hard_end) {
                end = break_at;
            }
        }

        let chunk: String = chars[start..end].iter().collect();
        let chunk = chunk.trim().to_string();
        if !chunk.is_empty() {
            chunks.push(chunk);
        }

        if end >= chars.len() {
            break;
        }
        start = end.saturating_sub(CHUNK_OVERLAP).max(start + 1);
    }

    chunks
}

/// Best break position in [from, to): paragraph > sentence end
fn find_break(chars: &[char], from: usize, to: usize) -> Option<usize> {
    let window = &chars[from..to];

    if let Some(pos) = window.iter().rposition(|&c| c == '\n') {
        return Some(from + pos + 1);
    }
    window
        .iter()
        .rposition(|&c| matches!(c, '.' | '。' | '!' | '！' | '?' | '？'))
        .map(|pos| from + pos + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input_yields_no_chunks() {
        assert!(chunk_text("").is_empty());
        assert!(chunk_text("   \n  ").is_empty());
    }

    #[test]
    fn test_short_text_is_single_chunk() {
        let chunks = chunk_text("A short article body.");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], "A short article body.");
    }

    #[test]
    fn test_long_text_produces_overlapping_chunks() {
        let sentence = "Markets rallied on upbeat economic data. ";
        let content = sentence.repeat(200); // ~8200 chars
        let chunks = chunk_text(&content);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= CHUNK_SIZE);
        }
        // Overlap: the tail of chunk N reappears at the head of chunk N+1
        let tail: String = chunks[0].chars().rev().take(50).collect::<String>()
            .chars().rev().collect();
        assert!(chunks[1].contains(tail.trim()));
    }

    #[test]
    fn test_chunks_prefer_sentence_breaks() {
        let sentence = "句子在这里结束。";
        let content = sentence.repeat(400);
        let chunks = chunk_text(&content);
        assert!(chunks.len() > 1);
        assert!(chunks[0].ends_with('。'));
    }

    #[test]
    fn test_cjk_text_chunks_on_char_boundaries() {
        let content = "金融市场分析".repeat(600);
        let chunks = chunk_text(&content);
        assert!(chunks.len() > 1, "CJK text must still be chunked");
    }
}
