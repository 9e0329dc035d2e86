//! Builds the PoC notebook from resolved inputs.
//!
//! Code is only generated for what the schema states outright: loading each
//! selected table with the declared column types, a size overview, and joins
//! along declared relationships. Plan requirements are carried over as text.

use crate::adapters::notebook_json::assign_cell_ids;
use crate::core::header::{CellHeader, HeaderLanguage};
use crate::core::inputs::ResolvedInputs;
use crate::core::lint::lint_notebook;
use crate::domain::notebook::{Cell, KernelSpec, LanguageInfo, Notebook, NotebookMetadata};
use crate::domain::plan::{PlanSection, SectionRole};
use crate::domain::schema::{ColumnKind, Relationship, Table};
use crate::utils::error::{NotebookError, Result};
use serde_json::Map;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
pub struct GeneratorOptions {
    pub language: HeaderLanguage,
    pub data_dir: String,
    pub na_tokens: Vec<String>,
    pub kernel_name: String,
    pub kernel_display_name: String,
    pub python_version: String,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        Self {
            language: HeaderLanguage::Japanese,
            data_dir: "data".to_string(),
            na_tokens: vec!["NULL".to_string()],
            kernel_name: "python3".to_string(),
            kernel_display_name: "Python 3".to_string(),
            python_version: "3.11".to_string(),
        }
    }
}

pub struct NotebookGenerator {
    options: GeneratorOptions,
}

/// Python variable stem per dataset, unique within one notebook.
#[derive(Debug, Default)]
struct DatasetVariables {
    stems: HashMap<String, String>,
}

impl DatasetVariables {
    fn assign(datasets: &[Table]) -> Self {
        let mut taken = HashSet::new();
        let mut stems = HashMap::new();
        for (ordinal, table) in datasets.iter().enumerate() {
            let base =
                identifier(&table.name).unwrap_or_else(|| format!("dataset_{}", ordinal + 1));
            let mut stem = base.clone();
            let mut n = 2;
            while !taken.insert(stem.clone()) {
                stem = format!("{}_{}", base, n);
                n += 1;
            }
            stems.insert(table.name.clone(), stem);
        }
        Self { stems }
    }

    fn stem(&self, table: &str) -> &str {
        self.stems.get(table).map(String::as_str).unwrap_or("dataset")
    }

    fn frame(&self, table: &str) -> String {
        format!("{}_df", self.stem(table))
    }
}

impl NotebookGenerator {
    pub fn new(options: GeneratorOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &GeneratorOptions {
        &self.options
    }

    pub fn generate(&self, inputs: &ResolvedInputs) -> Result<Notebook> {
        let mut notebook = Notebook::new(self.metadata());
        let vars = DatasetVariables::assign(&inputs.datasets);

        notebook.cells.push(Cell::markdown(self.intro(inputs)));
        notebook.cells.push(self.code_cell(self.setup_header(), SETUP_CODE));
        notebook
            .cells
            .push(self.code_cell(self.helpers_header(), &self.helpers_code()));

        for (ordinal, table) in inputs.datasets.iter().enumerate() {
            notebook.cells.push(self.code_cell(
                self.loader_header(table, ordinal + 1),
                &self.loader_code(table, &vars),
            ));
        }

        notebook.cells.push(self.code_cell(
            self.overview_header(),
            &self.overview_code(&inputs.datasets, &vars),
        ));

        for relationship in inputs.schema.relationships_between(&inputs.datasets) {
            if let Some(cell) = self.join_cell(inputs, relationship, &vars) {
                notebook.cells.push(cell);
            }
        }

        for section in inputs.plan.sections_with_role(SectionRole::Requirements) {
            notebook.cells.push(Cell::markdown(self.requirement(section)));
        }

        notebook.cells.push(Cell::markdown(self.closing_notes(inputs)));
        assign_cell_ids(&mut notebook);

        let violations = lint_notebook(&notebook, self.options.language, None);
        if let Some(first) = violations.first() {
            return Err(NotebookError::ProcessingError {
                message: format!(
                    "generated notebook breaks its own header rule ({} violation(s), first: {})",
                    violations.len(),
                    first
                ),
            });
        }

        tracing::debug!(
            "Generated {} cell(s) for {} dataset(s)",
            notebook.cells.len(),
            inputs.datasets.len()
        );
        Ok(notebook)
    }

    fn metadata(&self) -> NotebookMetadata {
        NotebookMetadata {
            kernelspec: Some(KernelSpec {
                display_name: self.options.kernel_display_name.clone(),
                language: "python".to_string(),
                name: self.options.kernel_name.clone(),
            }),
            language_info: Some(LanguageInfo {
                name: "python".to_string(),
                version: Some(self.options.python_version.clone()),
                extra: Map::new(),
            }),
            extra: Map::new(),
        }
    }

    fn is_japanese(&self) -> bool {
        self.options.language == HeaderLanguage::Japanese
    }

    fn code_cell(&self, header: CellHeader, body: &str) -> Cell {
        Cell::code(format!("{}{}", header.render(), body))
    }

    /// Identifiers only appear in English headers when they are plain ASCII.
    fn english_name(&self, name: &str, fallback: String) -> String {
        if name.is_ascii() {
            name.to_string()
        } else {
            fallback
        }
    }

    fn intro(&self, inputs: &ResolvedInputs) -> String {
        let mut text = format!("# {}\n\n", inputs.title());

        let narrative: Vec<&str> = inputs
            .plan
            .sections
            .iter()
            .filter(|s| s.level <= 1 && s.role() == SectionRole::Narrative && !s.body.is_empty())
            .map(|s| s.body.as_str())
            .collect();
        if !narrative.is_empty() {
            text.push_str(&narrative.join("\n\n"));
            text.push_str("\n\n");
        }

        text.push_str(if self.is_japanese() {
            "## 対象データセット\n\n"
        } else {
            "## Datasets\n\n"
        });
        for table in &inputs.datasets {
            match &table.note {
                Some(note) => text.push_str(&format!("- `{}`: {}\n", table.name, note)),
                None => text.push_str(&format!("- `{}`\n", table.name)),
            }
        }

        text.push('\n');
        if self.is_japanese() {
            text.push_str(&format!(
                "このノートブックは `{}` と `{}` から生成されています。分析要件は `{}` に基づきます。",
                inputs.schema_path, inputs.plan_path, inputs.plan_path
            ));
        } else {
            text.push_str(&format!(
                "This notebook was generated from `{}` and `{}`. Analysis requirements follow `{}`.",
                inputs.schema_path, inputs.plan_path, inputs.plan_path
            ));
        }
        text
    }

    fn setup_header(&self) -> CellHeader {
        if self.is_japanese() {
            CellHeader::new(
                "分析で利用するライブラリの読み込みと表示設定の初期化",
                "再現性の高い環境を準備し結果の読みやすさを確保するため",
                "pandas のバージョンが表示されること",
            )
        } else {
            CellHeader::new(
                "Import the analysis libraries and set display options",
                "A known environment keeps the results reproducible and readable",
                "The pandas version is printed",
            )
        }
    }

    fn helpers_header(&self) -> CellHeader {
        if self.is_japanese() {
            CellHeader::new(
                "データディレクトリと型変換の共通関数を定義する",
                "読み込み処理を一元管理し前処理を再利用できるようにするため",
                "エラーなく実行され DATA_DIR が表示されること",
            )
        } else {
            CellHeader::new(
                "Define the data directory and shared type conversion helpers",
                "Every loader applies the same parsing rules",
                "Runs without errors and prints DATA_DIR",
            )
        }
    }

    fn helpers_code(&self) -> String {
        let na_tokens: Vec<&str> = self.options.na_tokens.iter().map(String::as_str).collect();
        format!(
            r#"from typing import List

DATA_DIR = Path({data_dir})
NA_TOKENS = {na_tokens}
BOOL_MAP = {{"TRUE": True, "FALSE": False, "true": True, "false": False, "1": True, "0": False}}


def parse_datetimes(df: pd.DataFrame, columns: List[str], *, utc: bool = True) -> pd.DataFrame:
    for column in columns:
        if column not in df.columns:
            continue
        with warnings.catch_warnings():
            warnings.simplefilter("ignore", category=UserWarning)
            df[column] = pd.to_datetime(df[column], errors="coerce", utc=utc)
    return df


def parse_booleans(df: pd.DataFrame, columns: List[str]) -> pd.DataFrame:
    for column in columns:
        if column not in df.columns:
            continue
        df[column] = df[column].astype("string").map(BOOL_MAP).astype("boolean")
    return df


print(f"DATA_DIR={{DATA_DIR.resolve()}}")
"#,
            data_dir = py_str(&self.options.data_dir),
            na_tokens = py_list(&na_tokens),
        )
    }

    fn loader_header(&self, table: &Table, ordinal: usize) -> CellHeader {
        if self.is_japanese() {
            CellHeader::new(
                format!("`{}` を読み込み、日時列とブール列を型変換する", table.name),
                "スキーマ定義どおりの型で後続の集計を行うため",
                "行数と列数が表示され、日時列が datetime 型になっていること",
            )
        } else {
            let name = self.english_name(&table.name, format!("dataset #{}", ordinal));
            CellHeader::new(
                format!("Load `{}` and convert its datetime and boolean columns", name),
                "Later steps rely on the column types declared in the schema",
                "Row and column counts are shown and datetime columns have datetime dtype",
            )
        }
    }

    fn loader_code(&self, table: &Table, vars: &DatasetVariables) -> String {
        let var = vars.frame(&table.name);
        let datetimes = table.columns_of_kind(ColumnKind::Timestamp);
        let booleans = table.columns_of_kind(ColumnKind::Boolean);
        format!(
            "{var} = pd.read_csv(\n    DATA_DIR / {file},\n    encoding=\"utf-8-sig\",\n    na_values=NA_TOKENS,\n)\n\
             {var} = parse_datetimes({var}, {datetimes})\n\
             {var} = parse_booleans({var}, {booleans})\n\
             print({var}.shape)\n\
             {var}.dtypes\n",
            var = var,
            file = py_str(&format!("{}.csv", table.name)),
            datetimes = py_list(&datetimes),
            booleans = py_list(&booleans),
        )
    }

    fn overview_header(&self) -> CellHeader {
        if self.is_japanese() {
            CellHeader::new(
                "読み込んだデータセットの件数・列数・欠損の概況を確認する",
                "以降の集計で前提とするデータ品質と量を把握するため",
                "各データセットの行数・列数・非欠損率が一覧表示されること",
            )
        } else {
            CellHeader::new(
                "Summarize row counts, column counts and missing values per dataset",
                "Later analysis depends on knowing the size and quality of each dataset",
                "A table with rows, columns and non-null ratio per dataset is displayed",
            )
        }
    }

    fn overview_code(&self, datasets: &[Table], vars: &DatasetVariables) -> String {
        let names: Vec<&str> = datasets.iter().map(|t| t.name.as_str()).collect();
        let frames: Vec<String> = datasets.iter().map(|t| vars.frame(&t.name)).collect();
        let frames = frames.join(", ");
        format!(
            "frames = [{frames}]\n\
             summary = pd.DataFrame(\n    {{\n        \"rows\": [len(df) for df in frames],\n        \"columns\": [df.shape[1] for df in frames],\n        \"non_null_ratio\": [1 - df.isna().mean().mean() for df in frames],\n    }},\n    index={index},\n)\n\
             summary\n",
            frames = frames,
            index = py_list(&names),
        )
    }

    fn join_cell(
        &self,
        inputs: &ResolvedInputs,
        relationship: &Relationship,
        vars: &DatasetVariables,
    ) -> Option<Cell> {
        let from = inputs.schema.table(&relationship.from.table)?;
        let to = inputs.schema.table(&relationship.to.table)?;
        let (from_stem, to_stem) = (vars.stem(&from.name), vars.stem(&to.name));
        let (from_var, to_var) = (vars.frame(&from.name), vars.frame(&to.name));
        let joined = format!("{}_{}_joined", from_stem, to_stem);
        // pandas rejects suffixes that produce duplicate column names
        let from_suffix = format!("_{}", from_stem);
        let to_suffix = if from.name == to.name {
            format!("_{}_ref", to_stem)
        } else {
            format!("_{}", to_stem)
        };

        let left_on: Vec<&str> = relationship.from.columns.iter().map(String::as_str).collect();
        let right_on: Vec<&str> = relationship.to.columns.iter().map(String::as_str).collect();
        let code = format!(
            "{joined} = {from_var}.merge(\n    {to_var},\n    left_on={left_on},\n    right_on={right_on},\n    how=\"left\",\n    suffixes=({from_suffix}, {to_suffix}),\n    indicator=True,\n)\n\
             print({joined}.shape)\n\
             {joined}[\"_merge\"].value_counts()\n",
            joined = joined,
            from_var = from_var,
            to_var = to_var,
            left_on = py_list(&left_on),
            right_on = py_list(&right_on),
            from_suffix = py_str(&from_suffix),
            to_suffix = py_str(&to_suffix),
        );

        let rendered = relationship.to_string();
        let header = if self.is_japanese() {
            CellHeader::new(
                format!("`{}` と `{}` をリレーション `{}` で結合する", from.name, to.name, rendered),
                "スキーマで定義された関係に沿ってデータ間の対応を検証するため",
                "結合後の件数と、対応先が見つからない行 (left_only) の数が確認できること",
            )
        } else {
            CellHeader::new(
                format!(
                    "Join along the relationship `{}`",
                    self.english_name(&rendered, "declared in the schema".to_string())
                ),
                "Checks how well the two datasets line up on the declared keys",
                "The joined shape and the number of left_only rows are shown",
            )
        };
        Some(self.code_cell(header, &code))
    }

    fn requirement(&self, section: &PlanSection) -> String {
        let mut text = format!("## {}\n\n", section.heading);
        if !section.body.is_empty() {
            text.push_str(&section.body);
            text.push_str("\n\n");
        }
        for item in &section.items {
            text.push_str(&format!("- {}\n", item.text));
        }
        text.push('\n');
        text.push_str(if self.is_japanese() {
            "> この要件の分析コードは自動生成していません。方針を確認したうえでセルを追加してください。"
        } else {
            "> No analysis code is generated for this requirement. Add cells once the approach is agreed."
        });
        text
    }

    fn closing_notes(&self, inputs: &ResolvedInputs) -> String {
        if self.is_japanese() {
            format!(
                "## メモ\n\n\
                 - 新しいコードセルを追加する場合も、先頭に `# WHAT:` / `# WHY :` / `# CHECK:` の3行を日本語で記述してください。\n\
                 - `{}` または `{}` を更新した場合は `poc-notebook generate` で再生成してください。",
                inputs.schema_path, inputs.plan_path
            )
        } else {
            format!(
                "## Notes\n\n\
                 - Start every new code cell with the `# WHAT:` / `# WHY :` / `# CHECK:` lines, written in English.\n\
                 - After editing `{}` or `{}`, regenerate with `poc-notebook generate`.",
                inputs.schema_path, inputs.plan_path
            )
        }
    }
}

const SETUP_CODE: &str = r#"from pathlib import Path
import warnings

import pandas as pd

pd.set_option("display.max_columns", 40)
pd.set_option("display.max_rows", 20)
pd.set_option("display.float_format", "{:.3f}".format)

print(f"pandas={pd.__version__}")
"#;

/// Snake-case Python identifier for a table name; `None` when no ASCII
/// letter or digit survives.
fn identifier(name: &str) -> Option<String> {
    let mut ident: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    if ident.trim_matches('_').is_empty() {
        return None;
    }
    if ident.starts_with(|c: char| c.is_ascii_digit()) {
        ident.insert(0, '_');
    }
    Some(ident)
}

fn py_str(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn py_list(values: &[&str]) -> String {
    let items: Vec<String> = values.iter().map(|v| py_str(v)).collect();
    format!("[{}]", items.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::inputs::{resolve_inputs, InputDocuments};

    const SCHEMA: &str = r#"
Table equipment_control_logs {
  Id bigint [pk]
  EdgeManagedEquipmentId bigint
  OrderReceiptDate timestamp
  IsDelete boolean
  Note: '遠隔操作ログ'
}

Table equipment_status_events {
  Id bigint [pk]
  EdgeManagedEquipmentId bigint [ref: > equipment_control_logs.EdgeManagedEquipmentId]
  ReportedDate datetime
}

Table unused {
  id int
}
"#;

    const PLAN: &str = r#"# PoC: 操作ログと状態イベントの初期分析

操作ログの傾向把握と状態イベントとの関係性を検証する。

## データセット

- `equipment_control_logs`
- `equipment_status_events`

## 分析要件

- 日次の操作件数を集計する
"#;

    fn inputs() -> ResolvedInputs {
        resolve_inputs(InputDocuments {
            schema_path: "data/schema.dbml".to_string(),
            schema: Some(SCHEMA.as_bytes().to_vec()),
            plan_path: "PLAN.md".to_string(),
            plan: Some(PLAN.as_bytes().to_vec()),
        })
        .unwrap()
    }

    fn generate(language: HeaderLanguage) -> Notebook {
        NotebookGenerator::new(GeneratorOptions {
            language,
            ..GeneratorOptions::default()
        })
        .generate(&inputs())
        .unwrap()
    }

    #[test]
    fn test_cell_sequence() {
        let notebook = generate(HeaderLanguage::Japanese);
        let types: Vec<_> = notebook.cells.iter().map(|c| c.cell_type()).collect();
        assert_eq!(
            types,
            vec![
                "markdown", // intro
                "code",     // setup
                "code",     // helpers
                "code",     // loader
                "code",     // loader
                "code",     // overview
                "code",     // join
                "markdown", // requirement
                "markdown", // notes
            ]
        );

        let intro = notebook.cells[0].source().as_str();
        assert!(intro.starts_with("# PoC: 操作ログと状態イベントの初期分析\n"));
        assert!(intro.contains("- `equipment_control_logs`: 遠隔操作ログ"));
        assert!(!intro.contains("unused"));
    }

    #[test]
    fn test_every_code_cell_has_header() {
        for language in [HeaderLanguage::Japanese, HeaderLanguage::English] {
            let notebook = generate(language);
            for (_, cell) in notebook.code_cells() {
                let source = cell.source().as_str();
                assert!(source.starts_with("# WHAT: "));
                assert!(CellHeader::check(source, language).is_empty());
            }
        }
    }

    #[test]
    fn test_loader_uses_schema_types() {
        let notebook = generate(HeaderLanguage::Japanese);
        let loader = notebook.cells[3].source().as_str();
        assert!(loader.contains("DATA_DIR / \"equipment_control_logs.csv\""));
        assert!(loader.contains("parse_datetimes(equipment_control_logs_df, [\"OrderReceiptDate\"])"));
        assert!(loader.contains("parse_booleans(equipment_control_logs_df, [\"IsDelete\"])"));
    }

    #[test]
    fn test_join_follows_relationship_keys() {
        let notebook = generate(HeaderLanguage::English);
        let join = notebook.cells[6].source().as_str();
        assert!(join.contains("equipment_status_events_df.merge("));
        assert!(join.contains("left_on=[\"EdgeManagedEquipmentId\"]"));
        assert!(join.contains("right_on=[\"EdgeManagedEquipmentId\"]"));
    }

    #[test]
    fn test_requirements_stay_markdown() {
        let notebook = generate(HeaderLanguage::Japanese);
        let requirement = notebook.cells[7].source().as_str();
        assert!(requirement.starts_with("## 分析要件\n"));
        assert!(requirement.contains("- 日次の操作件数を集計する"));
    }

    #[test]
    fn test_metadata_and_ids() {
        let first = generate(HeaderLanguage::Japanese);
        let second = generate(HeaderLanguage::Japanese);
        assert_eq!(first, second);

        let kernelspec = first.metadata.kernelspec.as_ref().unwrap();
        assert_eq!(kernelspec.name, "python3");
        assert_eq!(kernelspec.display_name, "Python 3");
        assert_eq!(
            first.metadata.language_info.as_ref().unwrap().version.as_deref(),
            Some("3.11")
        );
        assert!(first.cells.iter().all(|c| c.id().is_some()));
    }

    #[test]
    fn test_identifier() {
        assert_eq!(identifier("Equipment-Logs").as_deref(), Some("equipment_logs"));
        assert_eq!(identifier("2024_events").as_deref(), Some("_2024_events"));
        assert_eq!(identifier("設備"), None);
        assert_eq!(py_str("a\"b\\c"), "\"a\\\"b\\\\c\"");
    }

    fn generate_from(schema: &str, plan: &str) -> Notebook {
        let inputs = resolve_inputs(InputDocuments {
            schema_path: "data/schema.dbml".to_string(),
            schema: Some(schema.as_bytes().to_vec()),
            plan_path: "PLAN.md".to_string(),
            plan: Some(plan.as_bytes().to_vec()),
        })
        .unwrap();
        NotebookGenerator::new(GeneratorOptions::default())
            .generate(&inputs)
            .unwrap()
    }

    #[test]
    fn test_non_ascii_tables_get_distinct_variables() {
        let schema = "Table 操作ログ {\n  契約ID varchar\n}\n\nTable 状態ログ {\n  契約ID varchar [ref: > 操作ログ.契約ID]\n}\n\nTable ops {\n  id int\n}\n\nTable o-p-s {\n  id int\n}\n";
        let plan = "# 検証\n\n## データセット\n\n- `操作ログ`\n- `状態ログ`\n- `ops`\n- `o-p-s`\n";
        let notebook = generate_from(schema, plan);

        assert!(notebook.cells[3].source().as_str().contains("dataset_1_df = pd.read_csv("));
        assert!(notebook.cells[4].source().as_str().contains("dataset_2_df = pd.read_csv("));
        assert!(notebook.cells[5].source().as_str().contains("ops_df = pd.read_csv("));
        assert!(notebook.cells[6].source().as_str().contains("o_p_s_df = pd.read_csv("));

        let overview = notebook.cells[7].source().as_str();
        assert!(overview.contains("frames = [dataset_1_df, dataset_2_df, ops_df, o_p_s_df]"));

        let join = notebook.cells[8].source().as_str();
        assert!(join.contains("dataset_2_dataset_1_joined = dataset_2_df.merge("));
        assert!(join.contains("suffixes=(\"_dataset_2\", \"_dataset_1\")"));
    }

    #[test]
    fn test_colliding_identifiers_are_numbered() {
        let tables = vec![
            Table {
                name: "a-b".to_string(),
                ..Table::default()
            },
            Table {
                name: "a_b".to_string(),
                ..Table::default()
            },
        ];
        let vars = DatasetVariables::assign(&tables);
        assert_eq!(vars.frame("a-b"), "a_b_df");
        assert_eq!(vars.frame("a_b"), "a_b_2_df");
    }

    #[test]
    fn test_self_join_uses_distinct_suffixes() {
        let schema = "Table employees {\n  id int [pk]\n  manager_id int [ref: > employees.id]\n}\n";
        let plan = "# Org chart\n\n## Datasets\n\n- `employees`\n";
        let notebook = generate_from(schema, plan);

        let join = notebook.cells[5].source().as_str();
        assert!(join.contains("employees_employees_joined = employees_df.merge("));
        assert!(join.contains("suffixes=(\"_employees\", \"_employees_ref\")"));
    }
}
