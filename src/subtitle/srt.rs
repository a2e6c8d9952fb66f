use super::{format_timestamp, SubtitleEntry, SubtitleFormatter};

pub struct SrtFormatter;

impl SubtitleFormatter for SrtFormatter {
    fn format(&self, entries: &[SubtitleEntry]) -> String {
        let mut output = String::new();
        for entry in entries {
            output.push_str(&format!(
                "{}\n{} --> {}\n{}\n\n",
                entry.index,
                format_timestamp(entry.start, ','),
                format_timestamp(entry.end, ','),
                entry.text
            ));
        }
        output
    }

    fn extension(&self) -> &'static str {
        "srt"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_srt_format() {
        let entries = vec![
            SubtitleEntry {
                index: 1,
                start: Duration::from_millis(1500),
                end: Duration::from_millis(4000),
                text: "Hola, mundo!".to_string(),
            },
            SubtitleEntry {
                index: 2,
                start: Duration::from_millis(4500),
                end: Duration::from_millis(7000),
                text: "Esto es una prueba.\nThis is a test.".to_string(),
            },
        ];

        let output = SrtFormatter.format(&entries);

        assert!(output.starts_with("1\n00:00:01,500 --> 00:00:04,000\nHola, mundo!\n\n"));
        assert!(output.contains("2\n00:00:04,500 --> 00:00:07,000\nEsto es una prueba.\nThis is a test.\n"));
    }

    #[test]
    fn test_srt_empty() {
        assert_eq!(SrtFormatter.format(&[]), "");
    }
}
