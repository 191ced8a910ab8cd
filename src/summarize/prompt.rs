//! Summary length presets and prompt construction

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// How long the generated summary should be
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryLength {
    Short,
    #[default]
    Medium,
    Long,
}

impl SummaryLength {
    /// Instruction placed in front of the article text
    pub fn instruction(&self) -> &'static str {
        match self {
            Self::Short => {
                "Summarize the following article in 2-3 sentences. \
                 Focus on the single most important point."
            }
            Self::Medium => {
                "Summarize the following article in one or two paragraphs, \
                 covering the main points and the key supporting details."
            }
            Self::Long => {
                "Write a detailed summary of the following article in several paragraphs. \
                 Cover every main point, the important facts, figures and quotes, \
                 and the article's conclusion."
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Short => "short",
            Self::Medium => "medium",
            Self::Long => "long",
        }
    }
}

impl fmt::Display for SummaryLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SummaryLength {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "short" => Ok(Self::Short),
            "medium" => Ok(Self::Medium),
            "long" => Ok(Self::Long),
            other => Err(format!(
                "unknown summary length '{}' (expected short, medium or long)",
                other
            )),
        }
    }
}

/// Builds the generation prompt for `text`
pub fn build_prompt(length: SummaryLength, text: &str) -> String {
    format!("{}\n\nArticle:\n{}", length.instruction(), text.trim())
}
