//! Chunked, context-aware translation of a job's segments.
//!
//! Segments are packed into chunks bounded by a character budget. Every
//! chunk after the first is seeded with the tail of the previous one so
//! the provider sees trailing context. Results are merged in chunk order
//! with the later chunk winning on overlap.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{DubError, Result};
use crate::job::Segment;

use super::Translator;

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[(\d+)\]\]").expect("valid tag regex"));

const SENTENCE_ENDS: [char; 6] = ['.', '!', '?', '。', '！', '？'];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkerConfig {
    pub max_chars_per_chunk: usize,
    pub overlap_segments: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chars_per_chunk: 2000,
            overlap_segments: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChunkSegment {
    pub segment_index: usize,
    pub text: String,
}

/// Segments sent to the translator in one call. The first `overlap`
/// entries repeat the previous chunk's tail as context.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslationChunk {
    pub segments: Vec<ChunkSegment>,
    pub overlap: usize,
}

impl TranslationChunk {
    pub fn indices(&self) -> Vec<usize> {
        self.segments.iter().map(|s| s.segment_index).collect()
    }

    /// Segments this chunk contributes for the first time.
    pub fn new_segments(&self) -> &[ChunkSegment] {
        &self.segments[self.overlap.min(self.segments.len())..]
    }

    pub fn char_count(&self) -> usize {
        self.segments.iter().map(|s| s.text.chars().count()).sum()
    }
}

pub struct TranslationChunker {
    config: ChunkerConfig,
}

impl TranslationChunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Partition segments (in index order) into overlapping chunks.
    ///
    /// A chunk always takes at least one new segment, so a single segment
    /// over budget still forms its own chunk. The seed is the last
    /// `overlap_segments` of the previous chunk, clamped to its size; seeded
    /// context does not count against the budget for admitting the first
    /// new segment.
    pub fn chunk_segments(&self, segments: &[Segment]) -> Vec<TranslationChunk> {
        let mut ordered: Vec<&Segment> = segments.iter().collect();
        ordered.sort_by_key(|s| s.segment_index);

        let mut chunks = Vec::new();
        let mut current: Vec<ChunkSegment> = Vec::new();
        let mut overlap = 0;
        let mut chars = 0;

        for seg in ordered {
            let len = seg.original_text.chars().count();
            let has_new = current.len() > overlap;

            if has_new && chars + len > self.config.max_chars_per_chunk {
                let seed_len = self.config.overlap_segments.min(current.len());
                let seed = current[current.len() - seed_len..].to_vec();
                chunks.push(TranslationChunk {
                    segments: std::mem::take(&mut current),
                    overlap,
                });

                chars = seed.iter().map(|s| s.text.chars().count()).sum();
                overlap = seed.len();
                current = seed;
            }

            current.push(ChunkSegment {
                segment_index: seg.segment_index,
                text: seg.original_text.clone(),
            });
            chars += len;
        }

        if current.len() > overlap {
            chunks.push(TranslationChunk {
                segments: current,
                overlap,
            });
        }
        chunks
    }

    /// Translate all segments chunk by chunk.
    ///
    /// Returns a translation for every segment (originals fill any gaps).
    /// Fails on the first chunk whose provider call fails or whose output
    /// cannot be parsed; callers then use [`Self::translate_individually`].
    pub async fn translate_chunked(
        &self,
        translator: &dyn Translator,
        segments: &[Segment],
        source_lang: &str,
        target_lang: &str,
    ) -> Result<BTreeMap<usize, String>> {
        let chunks = self.chunk_segments(segments);
        info!(
            "Chunked {} segments into {} chunks (max_chars={}, overlap={})",
            segments.len(),
            chunks.len(),
            self.config.max_chars_per_chunk,
            self.config.overlap_segments
        );

        let mut merged = BTreeMap::new();
        for (n, chunk) in chunks.iter().enumerate() {
            debug!(
                "Chunk {}/{}: {} segments ({} context), indices={:?}",
                n + 1,
                chunks.len(),
                chunk.segments.len(),
                chunk.overlap,
                chunk.indices()
            );

            let input = build_chunk_text(chunk);
            let output = translator
                .translate(&input, source_lang, target_lang)
                .await?;

            let mut parsed = parse_translation_result(&output);
            let indices = chunk.indices();
            parsed.retain(|idx, _| indices.contains(idx));

            if parsed.is_empty() {
                match chunk.segments.as_slice() {
                    [only] if !output.trim().is_empty() => {
                        parsed.insert(only.segment_index, output.trim().to_string());
                    }
                    _ => {
                        return Err(DubError::provider(
                            translator.name(),
                            format!("chunk {} returned no tagged translations", n + 1),
                        ))
                    }
                }
            }

            merge_translations(&mut merged, parsed);
        }

        Ok(fill_missing(merged, segments))
    }

    /// Translate each segment on its own. Never fails: a segment whose
    /// translation errors keeps its original text.
    pub async fn translate_individually(
        &self,
        translator: &dyn Translator,
        segments: &[Segment],
        source_lang: &str,
        target_lang: &str,
    ) -> BTreeMap<usize, String> {
        let mut out = BTreeMap::new();
        for seg in segments {
            let text = if seg.original_text.trim().is_empty() {
                seg.original_text.clone()
            } else {
                match self
                    .translate_split(translator, &seg.original_text, source_lang, target_lang)
                    .await
                {
                    Ok(t) => {
                        debug!("Segment {} translated individually", seg.segment_index);
                        t
                    }
                    Err(e) => {
                        warn!(
                            "Segment {} translation failed: {}, using original text",
                            seg.segment_index, e
                        );
                        seg.original_text.clone()
                    }
                }
            };
            out.insert(seg.segment_index, text);
        }
        out
    }

    async fn translate_split(
        &self,
        translator: &dyn Translator,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<String> {
        let pieces = split_text(text, self.config.max_chars_per_chunk);
        let mut translated = Vec::with_capacity(pieces.len());
        for piece in &pieces {
            let t = translator.translate(piece, source_lang, target_lang).await?;
            translated.push(t.trim().to_string());
        }
        Ok(translated.join(" "))
    }
}

/// Whether `text` contains segment tags produced by [`build_chunk_text`].
pub fn has_segment_tags(text: &str) -> bool {
    TAG_RE.is_match(text)
}

/// One `[[index]] text` line per segment.
pub fn build_chunk_text(chunk: &TranslationChunk) -> String {
    chunk
        .segments
        .iter()
        .map(|s| {
            format!("[[{}]] {}", s.segment_index, escape_tags(&s.text).trim())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Flatten to one line and collapse every `[[` run so segment text can
/// never contain a tag.
fn escape_tags(text: &str) -> String {
    let mut flat = text.replace(['\r', '\n'], " ");
    while flat.contains("[[") {
        flat = flat.replace("[[", "[");
    }
    flat
}

/// Parse tagged provider output into `segment_index -> text`.
///
/// Text runs from one tag to the next, so multi-line translations survive.
/// A repeated tag keeps its last occurrence.
pub fn parse_translation_result(output: &str) -> BTreeMap<usize, String> {
    let tags: Vec<(usize, usize, usize)> = TAG_RE
        .captures_iter(output)
        .filter_map(|c| {
            let whole = c.get(0)?;
            let index = c.get(1)?.as_str().parse().ok()?;
            Some((index, whole.start(), whole.end()))
        })
        .collect();

    let mut result = BTreeMap::new();
    for (i, &(index, _, text_start)) in tags.iter().enumerate() {
        let text_end = tags.get(i + 1).map(|t| t.1).unwrap_or(output.len());
        let text = output[text_start..text_end].trim();
        result.insert(index, text.to_string());
    }
    result
}

/// Merge one chunk's results; values already present are overwritten.
pub fn merge_translations(merged: &mut BTreeMap<usize, String>, chunk: BTreeMap<usize, String>) {
    let overlap = chunk.keys().filter(|k| merged.contains_key(k)).count();
    if overlap > 0 {
        debug!("{} overlapping segments overridden by later chunk", overlap);
    }
    merged.extend(chunk);
}

fn fill_missing(
    mut merged: BTreeMap<usize, String>,
    segments: &[Segment],
) -> BTreeMap<usize, String> {
    let mut missing = 0;
    for seg in segments {
        if !merged.contains_key(&seg.segment_index) {
            missing += 1;
            merged.insert(seg.segment_index, seg.original_text.clone());
        }
    }
    if missing > 0 {
        warn!("{} segments missing from chunk output, keeping original text", missing);
    }
    merged.retain(|idx, _| segments.iter().any(|s| s.segment_index == *idx));
    merged
}

/// Split long text into pieces of at most `max_chars`, preferring to cut
/// right after a sentence terminator.
pub fn split_text(text: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if max_chars == 0 || chars.len() <= max_chars {
        return vec![text.to_string()];
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let mut end = (start + max_chars).min(chars.len());
        if end < chars.len() {
            if let Some(cut) = (start + 1..end).rev().find(|&i| SENTENCE_ENDS.contains(&chars[i])) {
                end = cut + 1;
            }
        }
        let piece: String = chars[start..end].iter().collect();
        let piece = piece.trim();
        if !piece.is_empty() {
            pieces.push(piece.to_string());
        }
        start = end;
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    fn segments(texts: &[&str]) -> Vec<Segment> {
        let job = Uuid::new_v4();
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| Segment::new(job, i, i as u64 * 1000, i as u64 * 1000 + 900, *t))
            .collect()
    }

    fn chunker(max_chars: usize, overlap: usize) -> TranslationChunker {
        TranslationChunker::new(ChunkerConfig {
            max_chars_per_chunk: max_chars,
            overlap_segments: overlap,
        })
    }

    #[test]
    fn test_zero_segments_zero_chunks() {
        assert!(chunker(100, 2).chunk_segments(&[]).is_empty());
    }

    #[test]
    fn test_chunks_respect_budget_and_overlap() {
        let segs = segments(&["aaaa", "bbbb", "cccc", "dddd", "eeee", "ffff"]);
        let chunks = chunker(12, 1).chunk_segments(&segs);

        assert_eq!(chunks[0].indices(), vec![0, 1, 2]);
        assert_eq!(chunks[0].overlap, 0);
        assert_eq!(chunks[1].indices(), vec![2, 3, 4]);
        assert_eq!(chunks[1].overlap, 1);
        assert_eq!(chunks[2].indices(), vec![4, 5]);
        for chunk in &chunks {
            assert!(chunk.char_count() <= 12);
        }
    }

    #[test]
    fn test_every_segment_is_new_exactly_once() {
        let texts: Vec<String> = (0..40).map(|i| "x".repeat(1 + (i * 7) % 23)).collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let segs = segments(&refs);

        for (max, overlap) in [(10, 0), (30, 2), (50, 5), (1, 3)] {
            let chunks = chunker(max, overlap).chunk_segments(&segs);
            let new: Vec<usize> = chunks
                .iter()
                .flat_map(|c| c.new_segments().iter().map(|s| s.segment_index))
                .collect();
            assert_eq!(new, (0..40).collect::<Vec<_>>(), "max={max} overlap={overlap}");
        }
    }

    #[test]
    fn test_oversized_segment_forms_own_chunk() {
        let long = "y".repeat(50);
        let segs = segments(&["short", &long, "tail"]);
        let chunks = chunker(10, 0).chunk_segments(&segs);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].indices(), vec![1]);
        assert_eq!(chunks[1].segments[0].text, long);
    }

    #[test]
    fn test_overlap_clamped_to_chunk_size() {
        let segs = segments(&["aaaaaaaa", "bbbbbbbb", "cccccccc"]);
        let chunks = chunker(8, 10).chunk_segments(&segs);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].indices(), vec![0, 1]);
        assert_eq!(chunks[1].overlap, 1);
        assert_eq!(chunks[2].indices(), vec![0, 1, 2]);
        assert_eq!(chunks[2].overlap, 2);
    }

    #[test]
    fn test_full_overlap_when_chunk_added_fewer_segments() {
        // Each chunk after the first adds a single new segment, yet the next
        // one still carries two segments of context.
        let segs = segments(&["aaaaaaaa", "bbbbbbbb", "cccccccc", "dddddddd", "eeeeeeee"]);
        let chunks = chunker(16, 2).chunk_segments(&segs);

        assert_eq!(chunks[0].indices(), vec![0, 1]);
        assert_eq!(chunks[1].indices(), vec![0, 1, 2]);
        assert_eq!(chunks[1].overlap, 2);
        assert_eq!(chunks[2].indices(), vec![1, 2, 3]);
        assert_eq!(chunks[2].overlap, 2);
        assert_eq!(chunks[3].indices(), vec![2, 3, 4]);
        assert_eq!(chunks[3].overlap, 2);
        assert_eq!(chunks.len(), 4);
    }

    #[test]
    fn test_chunk_text_roundtrips_out_of_order_indices() {
        let chunk = TranslationChunk {
            segments: vec![
                ChunkSegment { segment_index: 12, text: "hello\nthere".into() },
                ChunkSegment { segment_index: 3, text: "bye".into() },
            ],
            overlap: 0,
        };
        let text = build_chunk_text(&chunk);
        assert_eq!(text, "[[12]] hello there\n[[3]] bye");

        let parsed = parse_translation_result(&text);
        assert_eq!(parsed[&12], "hello there");
        assert_eq!(parsed[&3], "bye");
    }

    #[test]
    fn test_bracket_runs_in_text_never_become_tags() {
        let chunk = TranslationChunk {
            segments: vec![
                ChunkSegment { segment_index: 0, text: "see [[[1]] ok".into() },
                ChunkSegment { segment_index: 1, text: "b [[[[[2]]]]".into() },
            ],
            overlap: 0,
        };
        let text = build_chunk_text(&chunk);
        assert_eq!(TAG_RE.find_iter(&text).count(), 2);

        let parsed = parse_translation_result(&text);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[&0], "see [1]] ok");
        assert_eq!(parsed[&1], "b [2]]]]");
    }

    #[test]
    fn test_parse_keeps_multiline_text() {
        let parsed = parse_translation_result("Sure!\n[[5]] line one\nline two\n[[6]] next");
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[&5], "line one\nline two");
    }

    #[test]
    fn test_later_chunk_wins_on_overlap() {
        let mut merged = BTreeMap::new();
        let a: BTreeMap<usize, String> =
            [(5, "A5"), (6, "A6"), (7, "A7")].map(|(k, v)| (k, v.to_string())).into();
        let b: BTreeMap<usize, String> =
            [(6, "B6"), (7, "B7"), (8, "B8")].map(|(k, v)| (k, v.to_string())).into();
        merge_translations(&mut merged, a);
        merge_translations(&mut merged, b);
        assert_eq!(merged[&5], "A5");
        assert_eq!(merged[&6], "B6");
        assert_eq!(merged[&7], "B7");
        assert_eq!(merged[&8], "B8");
    }

    #[test]
    fn test_split_text_prefers_sentence_boundary() {
        let pieces = split_text("One two. Three four five! Six", 12);
        assert_eq!(pieces, vec!["One two.", "Three four", "five! Six"]);
        for p in &pieces {
            assert!(p.chars().count() <= 12);
        }
        assert_eq!(split_text("short", 100), vec!["short"]);
    }

    #[test]
    fn test_split_text_cjk() {
        let pieces = split_text("你好。世界你好。再见", 5);
        assert_eq!(pieces, vec!["你好。", "世界你好。", "再见"]);
    }

    /// Echoes each tagged line back, upper-cased, and fails on demand.
    struct EchoTranslator {
        calls: AtomicUsize,
        fail_on_call: Option<usize>,
    }

    #[async_trait]
    impl Translator for EchoTranslator {
        async fn translate(&self, text: &str, _source: &str, _target: &str) -> Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if Some(n) == self.fail_on_call {
                return Err(DubError::provider("echo", "boom"));
            }
            Ok(format!("{}#{}", text.to_uppercase(), n))
        }

        fn name(&self) -> &'static str {
            "echo"
        }
    }

    #[tokio::test]
    async fn test_translate_chunked_merges_all_segments() {
        let segs = segments(&["aa", "bb", "cc", "dd"]);
        let translator = EchoTranslator { calls: AtomicUsize::new(0), fail_on_call: None };
        let out = chunker(4, 1)
            .translate_chunked(&translator, &segs, "en", "fr")
            .await
            .unwrap();

        assert_eq!(out.len(), 4);
        assert_eq!(out[&0], "AA");
        // 1 is re-sent as context in the second chunk and takes that value
        assert_eq!(out[&1], "BB");
        assert!(out[&3].starts_with("DD"));
        assert_eq!(translator.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_translate_chunked_aborts_on_failure() {
        let segs = segments(&["aa", "bb", "cc"]);
        let translator = EchoTranslator { calls: AtomicUsize::new(0), fail_on_call: Some(1) };
        let err = chunker(4, 0)
            .translate_chunked(&translator, &segs, "en", "fr")
            .await
            .unwrap_err();
        assert!(err.is_provider());
    }

    #[tokio::test]
    async fn test_individual_fallback_keeps_original_on_error() {
        let segs = segments(&["one", "two", ""]);
        let translator = EchoTranslator { calls: AtomicUsize::new(0), fail_on_call: Some(0) };
        let out = chunker(100, 2)
            .translate_individually(&translator, &segs, "en", "fr")
            .await;
        assert_eq!(out[&0], "one");
        assert_eq!(out[&1], "TWO#1");
        assert_eq!(out[&2], "");
    }
}
