use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::PromptConfig;

mod builders;

pub use builders::{
    build_blueprint_prompt, build_refine_prompt, build_scene_prompt, build_style_prompt,
    format_characters, format_story_context, NO_CHARACTERS_NOTE,
};

const BUILT_IN_PROMPTS: &str = include_str!("../../prompts/default.toml");

pub type PromptArguments = HashMap<String, String>;

/// The four task prompts the pipelines render.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum PromptKey {
    StyleDna,
    Blueprint,
    Scene,
    Refine,
}

impl PromptKey {
    pub const ALL: [Self; 4] = [Self::StyleDna, Self::Blueprint, Self::Scene, Self::Refine];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StyleDna => "style_dna",
            Self::Blueprint => "blueprint",
            Self::Scene => "scene",
            Self::Refine => "refine",
        }
    }
}

impl fmt::Display for PromptKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PromptSource {
    BuiltIn,
    File(PathBuf),
}

#[derive(Clone, Debug)]
pub struct PromptTemplate {
    key: String,
    segments: Vec<Segment>,
    required: BTreeSet<String>,
    description: Option<String>,
    source: PromptSource,
}

impl PromptTemplate {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn source(&self) -> &PromptSource {
        &self.source
    }

    pub fn required_arguments(&self) -> impl Iterator<Item = &str> {
        self.required.iter().map(|s| s.as_str())
    }

    pub fn render(&self, arguments: &PromptArguments) -> Result<String, PromptError> {
        if let Some(missing) = self.required.iter().find(|r| !arguments.contains_key(*r)) {
            return Err(PromptError::MissingArgument {
                key: self.key.clone(),
                argument: missing.clone(),
            });
        }

        let mut output = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => output.push_str(text),
                Segment::Slot(name) => {
                    if let Some(value) = arguments.get(name) {
                        output.push_str(value);
                    }
                }
            }
        }
        Ok(output)
    }

    fn compile(key: String, raw: RawPrompt, source: PromptSource) -> Result<Self, PromptError> {
        let segments = tokenize(&raw.template);
        let slots: BTreeSet<String> = segments
            .iter()
            .filter_map(|segment| match segment {
                Segment::Slot(name) => Some(name.clone()),
                Segment::Text(_) => None,
            })
            .collect();

        let required = if raw.required.is_empty() {
            slots
        } else {
            let mut declared = BTreeSet::new();
            for argument in raw.required {
                let argument = argument.trim().to_string();
                if !slots.contains(&argument) {
                    return Err(PromptError::InvalidRequired { key, argument });
                }
                declared.insert(argument);
            }
            declared
        };

        Ok(Self {
            key,
            segments,
            required,
            description: raw.description,
            source,
        })
    }
}

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("prompt `{0}` not found")]
    NotFound(String),
    #[error("missing argument `{argument}` when rendering prompt `{key}`")]
    MissingArgument { key: String, argument: String },
    #[error("failed to read prompt file `{path}`: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse built-in prompt definitions: {0}")]
    ParseBuiltIn(toml::de::Error),
    #[error("failed to parse prompt file `{path}` as TOML: {source}")]
    ParseToml {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("failed to parse prompt file `{path}` as YAML: {source}")]
    ParseYaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("prompt `{key}` declares required argument `{argument}` with no matching placeholder")]
    InvalidRequired { key: String, argument: String },
}

/// Built-in prompt templates, optionally overridden by TOML/YAML files found in
/// the configured directories (later directories win).
#[derive(Debug)]
pub struct PromptRegistry {
    prompts: BTreeMap<String, PromptTemplate>,
    directories: Vec<PathBuf>,
}

impl PromptRegistry {
    pub fn new() -> Result<Self, PromptError> {
        Self::from_prompt_config(&PromptConfig::default())
    }

    pub fn from_prompt_config(config: &PromptConfig) -> Result<Self, PromptError> {
        let mut registry = Self {
            prompts: BTreeMap::new(),
            directories: config.custom_directories.clone(),
        };
        registry.reload()?;
        Ok(registry)
    }

    pub fn with_custom_directories<P: AsRef<Path>>(directories: &[P]) -> Result<Self, PromptError> {
        Self::from_prompt_config(&PromptConfig {
            custom_directories: directories
                .iter()
                .map(|p| p.as_ref().to_path_buf())
                .collect(),
        })
    }

    pub fn reload(&mut self) -> Result<(), PromptError> {
        let mut prompts = BTreeMap::new();
        for template in parse_toml(BUILT_IN_PROMPTS, PromptSource::BuiltIn)
            .map_err(PromptError::ParseBuiltIn)??
        {
            prompts.insert(template.key().to_string(), template);
        }
        for dir in &self.directories {
            load_directory(dir, &mut prompts)?;
        }
        self.prompts = prompts;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&PromptTemplate> {
        self.prompts.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.prompts.keys().map(|k| k.as_str())
    }

    pub fn format(&self, key: PromptKey, args: &PromptArguments) -> Result<String, PromptError> {
        self.get(key.as_str())
            .ok_or_else(|| PromptError::NotFound(key.to_string()))?
            .render(args)
    }

    pub fn format_with<I, K, V>(&self, key: PromptKey, arguments: I) -> Result<String, PromptError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let args: PromptArguments = arguments
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.format(key, &args)
    }
}

fn load_directory(
    dir: &Path,
    prompts: &mut BTreeMap<String, PromptTemplate>,
) -> Result<(), PromptError> {
    if !dir.is_dir() {
        return Ok(());
    }

    let io_error = |source| PromptError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_error)? {
        let path = entry.map_err(io_error)?.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();

    for path in files {
        let Some(ext) = path.extension().and_then(|ext| ext.to_str()) else {
            continue;
        };
        let ext = ext.to_ascii_lowercase();
        if !matches!(ext.as_str(), "toml" | "yaml" | "yml") {
            continue;
        }

        let contents = fs::read_to_string(&path).map_err(|source| PromptError::Io {
            path: path.clone(),
            source,
        })?;
        let source = PromptSource::File(path.clone());
        let templates = if ext == "toml" {
            parse_toml(&contents, source).map_err(|source| PromptError::ParseToml {
                path: path.clone(),
                source,
            })??
        } else {
            let document: PromptDocument =
                serde_yaml::from_str(&contents).map_err(|source| PromptError::ParseYaml {
                    path: path.clone(),
                    source,
                })?;
            compile_document(document, source)?
        };
        for template in templates {
            prompts.insert(template.key().to_string(), template);
        }
    }

    Ok(())
}

fn parse_toml(
    contents: &str,
    source: PromptSource,
) -> Result<Result<Vec<PromptTemplate>, PromptError>, toml::de::Error> {
    let document: PromptDocument = toml::from_str(contents)?;
    Ok(compile_document(document, source))
}

fn compile_document(
    document: PromptDocument,
    source: PromptSource,
) -> Result<Vec<PromptTemplate>, PromptError> {
    document
        .prompts
        .into_iter()
        .map(|(key, raw)| PromptTemplate::compile(key, raw, source.clone()))
        .collect()
}

#[derive(Debug, Deserialize)]
struct PromptDocument {
    #[serde(default)]
    prompts: BTreeMap<String, RawPrompt>,
}

#[derive(Debug, Deserialize)]
struct RawPrompt {
    #[serde(alias = "text")]
    template: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    required: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
enum Segment {
    Text(String),
    Slot(String),
}

/// Splits a template into literal text and `{name}` slots. `{{` and `}}` are
/// literal braces; an unterminated `{` is kept as text.
fn tokenize(template: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut text = String::new();
    let mut chars = template.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                text.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                text.push('}');
            }
            '{' => {
                let mut name = String::new();
                let mut closed = false;
                for next in chars.by_ref() {
                    if next == '}' {
                        closed = true;
                        break;
                    }
                    name.push(next);
                }
                let trimmed = name.trim();
                if closed && !trimmed.is_empty() {
                    if !text.is_empty() {
                        segments.push(Segment::Text(std::mem::take(&mut text)));
                    }
                    segments.push(Segment::Slot(trimmed.to_string()));
                } else {
                    text.push('{');
                    text.push_str(&name);
                    if closed {
                        text.push('}');
                    }
                }
            }
            _ => text.push(ch),
        }
    }

    if !text.is_empty() {
        segments.push(Segment::Text(text));
    }
    segments
}
