use super::SubtitleEntry;
use crate::job::Segment;
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct SubtitleOptions {
    /// Put the original line under the translation.
    pub bilingual: bool,
    /// Prefix cues with `[speaker]` when the recognizer labelled one.
    pub speaker_labels: bool,
}

/// Build subtitle cues from segments in index order.
///
/// Uses the translated text, falling back to the original; segments with
/// no text at all produce no cue.
pub fn entries_from_segments(segments: &[Segment], options: &SubtitleOptions) -> Vec<SubtitleEntry> {
    let mut ordered: Vec<&Segment> = segments.iter().collect();
    ordered.sort_by_key(|s| s.segment_index);

    let entries: Vec<SubtitleEntry> = ordered
        .into_iter()
        .filter_map(|segment| {
            let original = segment.original_text.trim();
            let translated = segment
                .translated_text
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .unwrap_or(original);
            if translated.is_empty() {
                return None;
            }

            let mut text = translated.to_string();
            if options.bilingual && !original.is_empty() && original != translated {
                text = format!("{}\n{}", text, original);
            }
            if options.speaker_labels {
                text = format_text_with_speaker(&text, segment.speaker_id.as_deref());
            }

            Some(SubtitleEntry {
                index: 0,
                start: Duration::from_millis(segment.start_ms),
                end: Duration::from_millis(segment.end_ms),
                text,
            })
        })
        .collect();

    renumber(fix_overlapping_timestamps(entries))
}

/// Format text with optional speaker label prefix.
fn format_text_with_speaker(text: &str, speaker: Option<&str>) -> String {
    match speaker {
        Some(s) if !s.is_empty() => format!("[{}] {}", s, text),
        _ => text.to_string(),
    }
}

/// Pull each cue's end back to the next cue's start when they overlap.
fn fix_overlapping_timestamps(mut entries: Vec<SubtitleEntry>) -> Vec<SubtitleEntry> {
    for i in 1..entries.len() {
        let next_start = entries[i].start;
        let prev = &mut entries[i - 1];
        if next_start < prev.end {
            prev.end = next_start.max(prev.start);
        }
    }
    entries
}

fn renumber(mut entries: Vec<SubtitleEntry>) -> Vec<SubtitleEntry> {
    for (i, entry) in entries.iter_mut().enumerate() {
        entry.index = i + 1;
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn segment(index: usize, start_ms: u64, end_ms: u64, text: &str, translated: Option<&str>) -> Segment {
        let mut seg = Segment::new(Uuid::nil(), index, start_ms, end_ms, text);
        seg.translated_text = translated.map(str::to_string);
        seg
    }

    #[test]
    fn test_uses_translation_with_original_fallback() {
        let segments = vec![
            segment(0, 0, 2000, "Hello world", Some("Hola mundo")),
            segment(1, 2500, 5000, "Untranslated", None),
        ];

        let entries = entries_from_segments(&segments, &SubtitleOptions::default());

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].index, 1);
        assert_eq!(entries[0].text, "Hola mundo");
        assert_eq!(entries[1].index, 2);
        assert_eq!(entries[1].text, "Untranslated");
    }

    #[test]
    fn test_bilingual_and_speaker() {
        let mut seg = segment(0, 0, 2000, "Hello", Some("Bonjour"));
        seg.speaker_id = Some("Alice".to_string());
        let options = SubtitleOptions {
            bilingual: true,
            speaker_labels: true,
        };

        let entries = entries_from_segments(&[seg], &options);
        assert_eq!(entries[0].text, "[Alice] Bonjour\nHello");
    }

    #[test]
    fn test_fix_overlapping_timestamps() {
        let segments = vec![
            segment(1, 2500, 5000, "Second", None),
            segment(0, 0, 3000, "First", None),
        ];

        let entries = entries_from_segments(&segments, &SubtitleOptions::default());

        assert_eq!(entries[0].text, "First");
        assert_eq!(entries[0].end, Duration::from_millis(2500));
        assert_eq!(entries[1].start, Duration::from_millis(2500));
    }

    #[test]
    fn test_blank_segments_are_skipped_and_renumbered() {
        let segments = vec![
            segment(0, 0, 1000, "  ", None),
            segment(1, 1000, 2000, "  Hello world  ", Some("  ")),
        ];
        let entries = entries_from_segments(&segments, &SubtitleOptions::default());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].index, 1);
        assert_eq!(entries[0].text, "Hello world");
    }
}
