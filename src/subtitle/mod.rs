pub mod convert;
pub mod srt;
pub mod vtt;

pub use convert::{entries_from_segments, SubtitleOptions};

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubtitleFormat {
    #[default]
    Srt,
    Vtt,
}

impl std::str::FromStr for SubtitleFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "srt" => Ok(SubtitleFormat::Srt),
            "vtt" => Ok(SubtitleFormat::Vtt),
            _ => Err(format!("Unknown subtitle format: {}. Use 'srt' or 'vtt'", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubtitleEntry {
    pub index: usize,
    pub start: Duration,
    pub end: Duration,
    pub text: String,
}

pub trait SubtitleFormatter: Send + Sync {
    fn format(&self, entries: &[SubtitleEntry]) -> String;
    fn extension(&self) -> &'static str;
}

pub fn create_formatter(format: SubtitleFormat) -> Box<dyn SubtitleFormatter> {
    match format {
        SubtitleFormat::Srt => Box::new(srt::SrtFormatter),
        SubtitleFormat::Vtt => Box::new(vtt::VttFormatter),
    }
}

/// `HH:MM:SS<sep>mmm`
pub(crate) fn format_timestamp(d: Duration, millis_sep: char) -> String {
    let total_secs = d.as_secs();
    format!(
        "{:02}:{:02}:{:02}{}{:03}",
        total_secs / 3600,
        (total_secs % 3600) / 60,
        total_secs % 60,
        millis_sep,
        d.subsec_millis()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(Duration::from_millis(1500), ','), "00:00:01,500");
        assert_eq!(
            format_timestamp(Duration::from_secs(3661) + Duration::from_millis(123), '.'),
            "01:01:01.123"
        );
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("SRT".parse::<SubtitleFormat>().unwrap(), SubtitleFormat::Srt);
        assert_eq!("vtt".parse::<SubtitleFormat>().unwrap(), SubtitleFormat::Vtt);
        assert!("json".parse::<SubtitleFormat>().is_err());
    }

    #[test]
    fn test_formatter_extension() {
        assert_eq!(create_formatter(SubtitleFormat::Srt).extension(), "srt");
        assert_eq!(create_formatter(SubtitleFormat::Vtt).extension(), "vtt");
    }
}
