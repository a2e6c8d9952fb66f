use super::{format_timestamp, SubtitleEntry, SubtitleFormatter};

pub struct VttFormatter;

impl SubtitleFormatter for VttFormatter {
    fn format(&self, entries: &[SubtitleEntry]) -> String {
        let mut output = String::from("WEBVTT\n\n");

        for entry in entries {
            output.push_str(&format!(
                "{}\n{} --> {}\n{}\n\n",
                entry.index,
                format_timestamp(entry.start, '.'),
                format_timestamp(entry.end, '.'),
                escape_cue_text(&entry.text)
            ));
        }

        output
    }

    fn extension(&self) -> &'static str {
        "vtt"
    }
}

/// Cue payloads may not contain raw `&`, `<` or the `-->` arrow.
fn escape_cue_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace("-->", "--&gt;")
}
