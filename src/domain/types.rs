use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Lifecycle of one grading attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GradingStatus {
    Processing,
    Completed,
    Failed,
}

impl GradingStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Who produced the scores of a grading session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GradingType {
    Ai,
    Lecturer,
    Both,
}

impl GradingType {
    pub fn is_lecturer_graded(self) -> bool {
        matches!(self, Self::Lecturer | Self::Both)
    }
}

/// Kind of assessment, which decides how sessions are picked for statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AssessmentType {
    Assignment,
    Lab,
    PracticalExam,
}

pub const PRACTICAL_EXAM_KEYWORDS: &[&str] =
    &["practical exam", "practical-exam", "practical_exam", "practicalexam", "pe exam"];

pub const LAB_KEYWORDS: &[&str] = &["lab", "labs", "laboratory"];

/// Lowercased alphanumeric words with trailing digits dropped, so "Lab3"
/// yields "lab".
fn name_words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .map(|word| word.trim_end_matches(|c: char| c.is_ascii_digit()))
        .filter(|word| !word.is_empty())
        .map(str::to_string)
        .collect()
}

/// Whole-word match: "lab" matches "Lab 3" but not "Collaborative".
fn has_keyword(words: &[String], keyword: &str) -> bool {
    let phrase = name_words(keyword);
    !phrase.is_empty() && words.windows(phrase.len()).any(|window| window == phrase.as_slice())
}

impl AssessmentType {
    /// Infers the type from a template name. Practical-exam keywords win over lab keywords.
    pub fn infer_from_name(name: &str) -> Self {
        let words = name_words(name);
        if PRACTICAL_EXAM_KEYWORDS.iter().any(|keyword| has_keyword(&words, keyword)) {
            Self::PracticalExam
        } else if LAB_KEYWORDS.iter().any(|keyword| has_keyword(&words, keyword)) {
            Self::Lab
        } else {
            Self::Assignment
        }
    }
}

// The portal backend still emits the legacy 0/1/2 integer codes on some endpoints.
fn decode_code<'de, D, T>(
    deserializer: D,
    expecting: &'static str,
    from_index: fn(i64) -> Option<T>,
    from_name: fn(&str) -> Option<T>,
) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Value::deserialize(deserializer)?;
    let decoded = match &raw {
        Value::Number(number) => number.as_i64().and_then(from_index),
        Value::String(text) => from_name(&text.trim().to_ascii_uppercase())
            .or_else(|| text.trim().parse::<i64>().ok().and_then(from_index)),
        _ => None,
    };

    decoded.ok_or_else(|| serde::de::Error::custom(format!("invalid {expecting}: {raw}")))
}

impl<'de> Deserialize<'de> for GradingStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        decode_code(
            deserializer,
            "grading status",
            |code| match code {
                0 => Some(Self::Processing),
                1 => Some(Self::Completed),
                2 => Some(Self::Failed),
                _ => None,
            },
            |name| match name {
                "PROCESSING" => Some(Self::Processing),
                "COMPLETED" => Some(Self::Completed),
                "FAILED" => Some(Self::Failed),
                _ => None,
            },
        )
    }
}

impl<'de> Deserialize<'de> for GradingType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        decode_code(
            deserializer,
            "grading type",
            |code| match code {
                0 => Some(Self::Ai),
                1 => Some(Self::Lecturer),
                2 => Some(Self::Both),
                _ => None,
            },
            |name| match name {
                "AI" => Some(Self::Ai),
                "LECTURER" => Some(Self::Lecturer),
                "BOTH" => Some(Self::Both),
                _ => None,
            },
        )
    }
}
