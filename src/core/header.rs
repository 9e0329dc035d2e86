//! The three-line `WHAT` / `WHY` / `CHECK` comment that opens every generated code cell.

use crate::utils::error::{NotebookError, Result};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellHeader {
    pub what: String,
    pub why: String,
    pub check: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeaderField {
    What,
    Why,
    Check,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeaderLanguage {
    Japanese,
    English,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderDefect {
    /// None of the first three lines is a header line.
    Missing,
    MissingField(HeaderField),
    OutOfOrder {
        line: usize,
        expected: HeaderField,
        found: HeaderField,
    },
    EmptyField(HeaderField),
    WrongLanguage {
        field: HeaderField,
        expected: HeaderLanguage,
    },
}

const FIELD_ORDER: [HeaderField; 3] = [HeaderField::What, HeaderField::Why, HeaderField::Check];

impl HeaderField {
    pub fn label(self) -> &'static str {
        match self {
            Self::What => "WHAT",
            Self::Why => "WHY",
            Self::Check => "CHECK",
        }
    }
}

impl fmt::Display for HeaderField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl HeaderLanguage {
    pub fn code(self) -> &'static str {
        match self {
            Self::Japanese => "ja",
            Self::English => "en",
        }
    }

    pub fn accepts(self, text: &str) -> bool {
        match self {
            Self::Japanese => text.chars().any(is_japanese_char),
            Self::English => text.is_ascii(),
        }
    }
}

fn is_japanese_char(c: char) -> bool {
    matches!(c,
        '\u{3040}'..='\u{309F}'     // hiragana
        | '\u{30A0}'..='\u{30FF}'   // katakana
        | '\u{3400}'..='\u{4DBF}'
        | '\u{4E00}'..='\u{9FFF}'
        | '\u{FF66}'..='\u{FF9F}')
}

impl FromStr for HeaderLanguage {
    type Err = NotebookError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "ja" | "japanese" => Ok(Self::Japanese),
            "en" | "english" => Ok(Self::English),
            _ => Err(NotebookError::InvalidConfigValueError {
                field: "header_language".to_string(),
                value: s.to_string(),
                reason: "expected 'ja' or 'en'".to_string(),
            }),
        }
    }
}

impl fmt::Display for HeaderLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Japanese => "Japanese",
            Self::English => "English",
        })
    }
}

impl fmt::Display for HeaderDefect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => write!(f, "no WHAT/WHY/CHECK header"),
            Self::MissingField(field) => write!(f, "missing '# {}:' line", field),
            Self::OutOfOrder {
                line,
                expected,
                found,
            } => write!(f, "line {} is {} but {} was expected", line, found, expected),
            Self::EmptyField(field) => write!(f, "{} is empty", field),
            Self::WrongLanguage { field, expected } => {
                write!(f, "{} is not written in {}", field, expected)
            }
        }
    }
}

impl CellHeader {
    pub fn new(what: impl Into<String>, why: impl Into<String>, check: impl Into<String>) -> Self {
        Self {
            what: what.into(),
            why: why.into(),
            check: check.into(),
        }
    }

    pub fn render(&self) -> String {
        format!(
            "# WHAT: {}\n# WHY : {}\n# CHECK: {}\n",
            self.what, self.why, self.check
        )
    }

    pub fn field(&self, field: HeaderField) -> &str {
        match field {
            HeaderField::What => &self.what,
            HeaderField::Why => &self.why,
            HeaderField::Check => &self.check,
        }
    }

    /// Reads the header from the first three lines of a cell.
    pub fn parse(source: &str) -> std::result::Result<Self, Vec<HeaderDefect>> {
        let lines: Vec<Option<(HeaderField, &str)>> =
            source.lines().take(3).map(parse_header_line).collect();

        if lines.iter().all(Option::is_none) {
            return Err(vec![HeaderDefect::Missing]);
        }

        let mut values = [""; 3];
        let mut defects = Vec::new();
        for (position, expected) in FIELD_ORDER.into_iter().enumerate() {
            match lines.get(position).copied().flatten() {
                Some((found, value)) if found == expected => {
                    if value.is_empty() {
                        defects.push(HeaderDefect::EmptyField(expected));
                    }
                    values[position] = value;
                }
                Some((found, _)) => defects.push(HeaderDefect::OutOfOrder {
                    line: position + 1,
                    expected,
                    found,
                }),
                None => defects.push(HeaderDefect::MissingField(expected)),
            }
        }

        if defects.is_empty() {
            Ok(Self::new(values[0], values[1], values[2]))
        } else {
            Err(defects)
        }
    }

    /// Every defect of `source`, including fields written in the wrong language.
    pub fn check(source: &str, language: HeaderLanguage) -> Vec<HeaderDefect> {
        match Self::parse(source) {
            Ok(header) => FIELD_ORDER
                .into_iter()
                .filter(|&field| !language.accepts(header.field(field)))
                .map(|field| HeaderDefect::WrongLanguage {
                    field,
                    expected: language,
                })
                .collect(),
            Err(defects) => defects,
        }
    }
}

/// `# LABEL: value`, allowing spaces before the colon (`# WHY :`).
fn parse_header_line(line: &str) -> Option<(HeaderField, &str)> {
    let rest = line.trim_start().strip_prefix('#')?.trim_start();
    FIELD_ORDER.into_iter().find_map(|field| {
        let value = rest
            .strip_prefix(field.label())?
            .trim_start_matches(' ')
            .strip_prefix(':')?;
        Some((field, value.trim()))
    })
}
