//! Turns the raw schema and plan into validated inputs, or into the full
//! list of what is missing or ambiguous. Nothing is inferred.

use crate::adapters::dbml::parse_dbml;
use crate::adapters::plan_markdown::parse_plan;
use crate::domain::plan::Plan;
use crate::domain::schema::{Schema, Table};
use crate::utils::error::{NotebookError, Result};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputRole {
    Schema,
    Plan,
}

impl fmt::Display for InputRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Schema => "schema",
            Self::Plan => "plan",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnresolvedItem {
    MissingFile { role: InputRole, path: String },
    EmptyFile { role: InputRole, path: String },
    UnreadableFile {
        role: InputRole,
        path: String,
        reason: String,
    },
    SchemaSyntax { line: usize, message: String },
    NoTables,
    DanglingReference {
        relationship: String,
        table: String,
        column: Option<String>,
    },
    PlanWithoutTitle,
    NoDatasets,
    UnknownDataset { name: String },
    OpenQuestion { text: String },
    Placeholder { text: String },
}

impl fmt::Display for UnresolvedItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingFile { role, path } => write!(f, "{} file not found: {}", role, path),
            Self::EmptyFile { role, path } => write!(f, "{} file is empty: {}", role, path),
            Self::UnreadableFile { role, path, reason } => {
                write!(f, "{} file cannot be read ({}): {}", role, reason, path)
            }
            Self::SchemaSyntax { line, message } => {
                write!(f, "schema syntax error at line {}: {}", line, message)
            }
            Self::NoTables => write!(f, "schema defines no tables"),
            Self::DanglingReference {
                relationship,
                table,
                column: Some(column),
            } => write!(
                f,
                "relationship `{}` references unknown column {}.{}",
                relationship, table, column
            ),
            Self::DanglingReference {
                relationship,
                table,
                column: None,
            } => write!(
                f,
                "relationship `{}` references unknown table {}",
                relationship, table
            ),
            Self::PlanWithoutTitle => write!(f, "plan has no level-1 title"),
            Self::NoDatasets => write!(f, "plan does not list any dataset"),
            Self::UnknownDataset { name } => {
                write!(f, "plan dataset `{}` is not defined in the schema", name)
            }
            Self::OpenQuestion { text } => write!(f, "open question in plan: {}", text),
            Self::Placeholder { text } => write!(f, "placeholder in plan: {}", text),
        }
    }
}

/// Paths of the two inputs and their bytes, `None` when the file does not exist.
#[derive(Debug, Clone, Default)]
pub struct InputDocuments {
    pub schema_path: String,
    pub schema: Option<Vec<u8>>,
    pub plan_path: String,
    pub plan: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedInputs {
    pub schema: Schema,
    pub plan: Plan,
    /// Tables the plan selects, in plan order.
    pub datasets: Vec<Table>,
    pub schema_path: String,
    pub plan_path: String,
}

impl ResolvedInputs {
    pub fn title(&self) -> &str {
        self.plan.title.as_deref().unwrap_or_default()
    }
}

pub fn resolve_inputs(documents: InputDocuments) -> Result<ResolvedInputs> {
    let mut items = Vec::new();

    let schema = decode(
        InputRole::Schema,
        &documents.schema_path,
        documents.schema.as_deref(),
        &mut items,
    )
    .and_then(|text| match parse_dbml(&text) {
        Ok(schema) => Some(schema),
        Err(NotebookError::SchemaParseError { line, message }) => {
            items.push(UnresolvedItem::SchemaSyntax { line, message });
            None
        }
        Err(e) => {
            items.push(UnresolvedItem::SchemaSyntax {
                line: 0,
                message: e.to_string(),
            });
            None
        }
    });

    if let Some(schema) = &schema {
        if schema.tables.is_empty() {
            items.push(UnresolvedItem::NoTables);
        }
        items.extend(schema.dangling_references().into_iter().map(|d| {
            UnresolvedItem::DanglingReference {
                relationship: d.relationship,
                table: d.table,
                column: d.column,
            }
        }));
    }

    let plan = decode(
        InputRole::Plan,
        &documents.plan_path,
        documents.plan.as_deref(),
        &mut items,
    )
    .map(|text| parse_plan(&text));

    let mut datasets: Vec<Table> = Vec::new();
    if let Some(plan) = &plan {
        if plan.title.is_none() {
            items.push(UnresolvedItem::PlanWithoutTitle);
        }

        let names = plan.datasets();
        if names.is_empty() {
            items.push(UnresolvedItem::NoDatasets);
        }
        if let Some(schema) = &schema {
            for name in names {
                match schema.table(&name) {
                    Some(table) => {
                        if !datasets.iter().any(|t| t.name == table.name) {
                            datasets.push(table.clone());
                        }
                    }
                    None => items.push(UnresolvedItem::UnknownDataset { name }),
                }
            }
        }

        items.extend(plan.open_questions().into_iter().map(|item| {
            UnresolvedItem::OpenQuestion {
                text: item.text.clone(),
            }
        }));
        items.extend(
            plan.placeholders()
                .into_iter()
                .map(|text| UnresolvedItem::Placeholder { text }),
        );
    }

    match (schema, plan) {
        (Some(schema), Some(plan)) if items.is_empty() => {
            tracing::debug!(
                "Resolved {} dataset(s) from {} table(s)",
                datasets.len(),
                schema.tables.len()
            );
            Ok(ResolvedInputs {
                schema,
                plan,
                datasets,
                schema_path: documents.schema_path,
                plan_path: documents.plan_path,
            })
        }
        _ => Err(NotebookError::UnresolvedInputs { items }),
    }
}

fn decode(
    role: InputRole,
    path: &str,
    bytes: Option<&[u8]>,
    items: &mut Vec<UnresolvedItem>,
) -> Option<String> {
    let path = path.to_string();
    let Some(bytes) = bytes else {
        items.push(UnresolvedItem::MissingFile { role, path });
        return None;
    };
    match std::str::from_utf8(bytes) {
        Err(e) => {
            items.push(UnresolvedItem::UnreadableFile {
                role,
                path,
                reason: format!("not UTF-8: {}", e),
            });
            None
        }
        Ok(text) if text.trim().is_empty() => {
            items.push(UnresolvedItem::EmptyFile { role, path });
            None
        }
        Ok(text) => Some(text.strip_prefix('\u{feff}').unwrap_or(text).to_string()),
    }
}

/// `1. first\n2. second\n`
pub fn render_unresolved(items: &[UnresolvedItem]) -> String {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| format!("{}. {}\n", i + 1, item))
        .collect()
}
