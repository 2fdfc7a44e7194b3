use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

pub const ENTROPY_MIN: f32 = 0.2;
pub const ENTROPY_MAX: f32 = 1.5;
pub const DEFAULT_ENTROPY: f32 = 0.7;

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Character {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub archetype: String,
    #[serde(default)]
    pub description: String,
}

impl Character {
    pub fn blank() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            ..Self::default()
        }
    }

    pub fn new(
        name: impl Into<String>,
        archetype: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            archetype: archetype.into(),
            description: description.into(),
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.name.trim().is_empty()
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CharacterField {
    Name,
    Archetype,
    Description,
}

/// Characters with a non-blank name, in roster order.
pub fn valid_characters(characters: &[Character]) -> Vec<Character> {
    characters.iter().filter(|c| c.is_valid()).cloned().collect()
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ChapterStatus {
    #[default]
    Pending,
    Generating,
    Completed,
    Error,
}

impl ChapterStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "待写",
            Self::Generating => "生成中",
            Self::Completed => "已完成",
            Self::Error => "失败",
        }
    }

    /// Pending and failed chapters are picked up by "write all remaining".
    pub fn is_remaining(&self) -> bool {
        matches!(self, Self::Pending | Self::Error)
    }
}

impl fmt::Display for ChapterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chapter {
    pub id: u32,
    pub title: String,
    pub summary: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub status: ChapterStatus,
}

impl Chapter {
    pub fn stub(id: u32, title: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            summary: summary.into(),
            content: String::new(),
            status: ChapterStatus::Pending,
        }
    }

    pub fn has_content(&self) -> bool {
        !self.content.is_empty()
    }
}

#[derive(Debug, Error, PartialEq)]
#[error("entropy {value} is outside [{min}, {max}]", min = ENTROPY_MIN, max = ENTROPY_MAX)]
pub struct EntropyOutOfRange {
    pub value: f32,
}

/// Sampling temperature exposed to the user. Values are validated on entry and
/// then forwarded to the backend exactly as given.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "f32", into = "f32")]
pub struct Entropy(f32);

impl Entropy {
    pub fn new(value: f32) -> Result<Self, EntropyOutOfRange> {
        if value.is_nan() || !(ENTROPY_MIN..=ENTROPY_MAX).contains(&value) {
            return Err(EntropyOutOfRange { value });
        }
        Ok(Self(value))
    }

    pub fn value(self) -> f32 {
        self.0
    }
}

impl Default for Entropy {
    fn default() -> Self {
        Self(DEFAULT_ENTROPY)
    }
}

impl TryFrom<f32> for Entropy {
    type Error = EntropyOutOfRange;

    fn try_from(value: f32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Entropy> for f32 {
    fn from(entropy: Entropy) -> Self {
        entropy.0
    }
}

impl fmt::Display for Entropy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}
