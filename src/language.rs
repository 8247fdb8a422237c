//! Language tags: parsing, prompt names and container metadata codes.

use std::fmt;
use std::path::Path;

/// Lower-case ISO 639-1 (or 639-2) language code such as `zh` or `en`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LanguageTag(String);

impl LanguageTag {
    /// Accepts two or three ASCII letters, case-insensitive. `auto` is not a tag.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        let valid = (2..=3).contains(&value.len()) && value.bytes().all(|b| b.is_ascii_alphabetic());
        if !valid || value.eq_ignore_ascii_case("auto") {
            return None;
        }
        Some(Self(value.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Human readable name used in translation prompts.
    pub fn display_name(&self) -> &str {
        match self.0.as_str() {
            "zh" => "Simplified Chinese",
            "en" => "English",
            "ja" => "Japanese",
            "ko" => "Korean",
            "fr" => "French",
            "de" => "German",
            "es" => "Spanish",
            "ru" => "Russian",
            "it" => "Italian",
            "pt" => "Portuguese",
            "vi" => "Vietnamese",
            "th" => "Thai",
            "ar" => "Arabic",
            _ => self.0.as_str(),
        }
    }

    /// ISO 639-2/B code written into subtitle stream metadata.
    pub fn container_code(&self) -> &'static str {
        match self.0.as_str() {
            "zh" | "chi" => "chi",
            "en" | "eng" => "eng",
            "ja" | "jpn" => "jpn",
            "ko" | "kor" => "kor",
            "fr" | "fre" => "fre",
            "de" | "ger" => "ger",
            "es" | "spa" => "spa",
            "ru" | "rus" => "rus",
            "it" | "ita" => "ita",
            "pt" | "por" => "por",
            _ => UNDETERMINED,
        }
    }
}

impl fmt::Display for LanguageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub const UNDETERMINED: &str = "und";

/// `None` for `auto` or anything that is not a language code.
pub fn language_hint(value: Option<&str>) -> Option<LanguageTag> {
    value.and_then(LanguageTag::parse)
}

/// Language tag carried in a subtitle file name, e.g. `movie.zh.srt` → `zh`.
pub fn tag_from_file_name(file_name: &str) -> Option<LanguageTag> {
    let stem = Path::new(file_name).file_stem()?.to_str()?;
    let (_, tag) = stem.rsplit_once('.')?;
    LanguageTag::parse(tag)
}

/// Metadata code for a muxed subtitle stream: the translation target wins,
/// then the declared source language, then the tag in the file name.
pub fn subtitle_stream_language(
    target: Option<&str>,
    source: Option<&str>,
    srt_path: &Path,
) -> &'static str {
    language_hint(target)
        .or_else(|| language_hint(source))
        .or_else(|| {
            srt_path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(tag_from_file_name)
        })
        .map(|tag| tag.container_code())
        .unwrap_or(UNDETERMINED)
}
