//! nbformat 4 document model.
//!
//! Only the fields this tool reads or writes are typed; everything else in
//! cell and notebook metadata is carried through untouched.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

pub const NBFORMAT: u32 = 4;
pub const NBFORMAT_MINOR: u32 = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notebook {
    pub cells: Vec<Cell>,
    pub metadata: NotebookMetadata,
    pub nbformat: u32,
    pub nbformat_minor: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotebookMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernelspec: Option<KernelSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_info: Option<LanguageInfo>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelSpec {
    pub display_name: String,
    pub language: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cell_type", rename_all = "lowercase")]
pub enum Cell {
    Markdown {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default)]
        metadata: Map<String, Value>,
        source: Source,
    },
    Code {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default)]
        execution_count: Option<u32>,
        #[serde(default)]
        metadata: Map<String, Value>,
        #[serde(default)]
        outputs: Vec<Value>,
        source: Source,
    },
    Raw {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default)]
        metadata: Map<String, Value>,
        source: Source,
    },
}

/// Cell source text. On disk it is either one string or a list of lines;
/// it is always written back as a list of lines, each keeping its newline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Source(pub String);

impl Source {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn lines_with_endings(&self) -> Vec<&str> {
        self.0.split_inclusive('\n').collect()
    }
}

impl From<String> for Source {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Source {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl Serialize for Source {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.lines_with_endings())
    }
}

impl<'de> Deserialize<'de> for Source {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Multiline {
            Single(String),
            Lines(Vec<String>),
        }

        Ok(match Multiline::deserialize(deserializer)? {
            Multiline::Single(s) => Source(s),
            Multiline::Lines(lines) => Source(lines.concat()),
        })
    }
}

impl Cell {
    pub fn markdown(source: impl Into<Source>) -> Self {
        Self::Markdown {
            id: None,
            metadata: Map::new(),
            source: source.into(),
        }
    }

    pub fn code(source: impl Into<Source>) -> Self {
        Self::Code {
            id: None,
            execution_count: None,
            metadata: Map::new(),
            outputs: Vec::new(),
            source: source.into(),
        }
    }

    pub fn cell_type(&self) -> &'static str {
        match self {
            Self::Markdown { .. } => "markdown",
            Self::Code { .. } => "code",
            Self::Raw { .. } => "raw",
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Markdown { id, .. } | Self::Code { id, .. } | Self::Raw { id, .. } => {
                id.as_deref()
            }
        }
    }

    pub fn set_id(&mut self, value: String) {
        match self {
            Self::Markdown { id, .. } | Self::Code { id, .. } | Self::Raw { id, .. } => {
                *id = Some(value)
            }
        }
    }

    pub fn source(&self) -> &Source {
        match self {
            Self::Markdown { source, .. } | Self::Code { source, .. } | Self::Raw { source, .. } => {
                source
            }
        }
    }

    pub fn is_code(&self) -> bool {
        matches!(self, Self::Code { .. })
    }
}

impl Notebook {
    pub fn new(metadata: NotebookMetadata) -> Self {
        Self {
            cells: Vec::new(),
            metadata,
            nbformat: NBFORMAT,
            nbformat_minor: NBFORMAT_MINOR,
        }
    }

    pub fn code_cells(&self) -> impl Iterator<Item = (usize, &Cell)> {
        self.cells.iter().enumerate().filter(|(_, c)| c.is_code())
    }
}
