use crate::config::env::parse_list;
use crate::core::header::HeaderLanguage;
use crate::domain::logs::{
    CONTRACT_ID, DEFAULT_OPERATION_COLUMNS, DEFAULT_STATE_COLUMNS, ORDER_RECEIPT_DATE,
    REPORTED_DATE,
};
use crate::utils::error::{NotebookError, Result};
use crate::utils::validation::{
    validate_file_extensions, validate_non_empty_list, validate_non_empty_string, validate_path,
    Validate,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_CONFIG_FILE: &str = "notebook.toml";

/// Project configuration. Every section is optional; a missing file means all defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotebookConfig {
    pub inputs: InputsConfig,
    pub output: OutputConfig,
    pub notebook: NotebookSection,
    pub logs: LogsConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputsConfig {
    pub schema: String,
    pub plan: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub notebook: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotebookSection {
    pub header_language: String,
    pub data_dir: String,
    pub na_tokens: Vec<String>,
    pub kernel_name: String,
    pub kernel_display_name: String,
    pub python_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogsConfig {
    pub data_dir: String,
    pub file_prefix: String,
    pub file_suffix: String,
    pub operation_sheet: String,
    pub state_sheet: String,
    pub operation_columns: Vec<String>,
    pub state_columns: Vec<String>,
    pub tolerance_minutes: u64,
    pub cache_enabled: bool,
    pub cache_dir: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub enabled: bool,
}

impl Default for InputsConfig {
    fn default() -> Self {
        Self {
            schema: "data/schema.dbml".to_string(),
            plan: "PLAN.md".to_string(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            notebook: "PoC.ipynb".to_string(),
        }
    }
}

impl Default for NotebookSection {
    fn default() -> Self {
        Self {
            header_language: "ja".to_string(),
            data_dir: "data".to_string(),
            na_tokens: vec!["NULL".to_string()],
            kernel_name: "python3".to_string(),
            kernel_display_name: "Python 3".to_string(),
            python_version: "3.11".to_string(),
        }
    }
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
            file_prefix: "★機器遠隔操作履歴＆機器状態変化履歴_".to_string(),
            file_suffix: ".xlsx".to_string(),
            operation_sheet: "機器遠隔操作履歴".to_string(),
            state_sheet: "機器状態変化履歴".to_string(),
            operation_columns: DEFAULT_OPERATION_COLUMNS.iter().map(|s| s.to_string()).collect(),
            state_columns: DEFAULT_STATE_COLUMNS.iter().map(|s| s.to_string()).collect(),
            tolerance_minutes: 5,
            cache_enabled: true,
            cache_dir: ".cache".to_string(),
        }
    }
}

impl NotebookConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        Self::from_toml_str(&content)
    }

    /// Loads `path` if it exists, otherwise returns the defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().is_file() {
            Self::from_file(path)
        } else {
            tracing::debug!(
                "No configuration at {}, using defaults",
                path.as_ref().display()
            );
            Ok(Self::default())
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| NotebookError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// Replaces `${VAR}` with the variable's value; unset variables are left as written.
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| NotebookError::ConfigError {
            message: e.to_string(),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    pub fn header_language(&self) -> Result<HeaderLanguage> {
        self.notebook.header_language.parse()
    }

    pub fn validate_config(&self) -> Result<()> {
        validate_path("inputs.schema", &self.inputs.schema)?;
        validate_path("inputs.plan", &self.inputs.plan)?;
        validate_path("output.notebook", &self.output.notebook)?;
        validate_file_extensions(
            "output.notebook",
            std::slice::from_ref(&self.output.notebook),
            &["ipynb"],
        )?;
        self.header_language()?;
        validate_path("notebook.data_dir", &self.notebook.data_dir)?;
        validate_non_empty_string("notebook.kernel_name", &self.notebook.kernel_name)?;
        self.logs.validate()
    }
}

impl LogsConfig {
    /// `OPERATION_COLS`, `STATE_COLS` and `MERGE_TOLERANCE_MINUTES` take
    /// precedence over the file.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Same as `apply_env`, reading variables through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("OPERATION_COLS") {
            self.operation_columns = parse_list(&raw);
        }
        if let Some(raw) = lookup("STATE_COLS") {
            self.state_columns = parse_list(&raw);
        }
        if let Some(raw) = lookup("MERGE_TOLERANCE_MINUTES") {
            if !raw.trim().is_empty() {
                self.tolerance_minutes = raw.trim().parse().map_err(|_| {
                    NotebookError::InvalidConfigValueError {
                        field: "MERGE_TOLERANCE_MINUTES".to_string(),
                        value: raw.clone(),
                        reason: "must be a whole number of minutes".to_string(),
                    }
                })?;
            }
        }
        Ok(())
    }
}

impl Validate for LogsConfig {
    fn validate(&self) -> Result<()> {
        validate_path("logs.data_dir", &self.data_dir)?;
        validate_non_empty_string("logs.operation_sheet", &self.operation_sheet)?;
        validate_non_empty_string("logs.state_sheet", &self.state_sheet)?;
        validate_non_empty_list("logs.operation_columns", &self.operation_columns)?;
        validate_non_empty_list("logs.state_columns", &self.state_columns)?;

        for (field, columns, required) in [
            (
                "logs.operation_columns",
                &self.operation_columns,
                [CONTRACT_ID, ORDER_RECEIPT_DATE],
            ),
            (
                "logs.state_columns",
                &self.state_columns,
                [CONTRACT_ID, REPORTED_DATE],
            ),
        ] {
            for column in required {
                if !columns.iter().any(|c| c == column) {
                    return Err(NotebookError::InvalidConfigValueError {
                        field: field.to_string(),
                        value: columns.join(","),
                        reason: format!("must include '{}' to match logs", column),
                    });
                }
            }
        }

        if self.cache_enabled {
            validate_path("logs.cache_dir", &self.cache_dir)?;
        }
        Ok(())
    }
}

impl Validate for NotebookConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = NotebookConfig::from_toml_str("").unwrap();
        assert_eq!(config.inputs.schema, "data/schema.dbml");
        assert_eq!(config.inputs.plan, "PLAN.md");
        assert_eq!(config.output.notebook, "PoC.ipynb");
        assert_eq!(config.header_language().unwrap(), HeaderLanguage::Japanese);
        assert_eq!(config.logs.tolerance_minutes, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_content = r#"
[notebook]
header_language = "en"
na_tokens = ["NULL", "N/A"]

[logs]
tolerance_minutes = 10
operation_columns = ["ContractId", "OrderReceiptDate", "PropertyValue"]
"#;

        let config = NotebookConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.header_language().unwrap(), HeaderLanguage::English);
        assert_eq!(config.notebook.na_tokens, vec!["NULL", "N/A"]);
        assert_eq!(config.notebook.kernel_name, "python3");
        assert_eq!(config.logs.tolerance_minutes, 10);
        assert_eq!(config.logs.operation_columns.len(), 3);
        assert_eq!(config.logs.state_columns.len(), 10);
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("POC_TEST_PLAN_PATH", "docs/PLAN.md");

        let config = NotebookConfig::from_toml_str(
            "[inputs]\nplan = \"${POC_TEST_PLAN_PATH}\"\nschema = \"${POC_TEST_UNSET_VAR}\"\n",
        )
        .unwrap();
        assert_eq!(config.inputs.plan, "docs/PLAN.md");
        assert_eq!(config.inputs.schema, "${POC_TEST_UNSET_VAR}");

        std::env::remove_var("POC_TEST_PLAN_PATH");
    }

    #[test]
    fn test_config_validation() {
        let config =
            NotebookConfig::from_toml_str("[output]\nnotebook = \"PoC.py\"\n").unwrap();
        assert!(config.validate().is_err());

        let config =
            NotebookConfig::from_toml_str("[notebook]\nheader_language = \"fr\"\n").unwrap();
        assert!(config.validate().is_err());

        let config = NotebookConfig::from_toml_str(
            "[logs]\nstate_columns = [\"ContractId\", \"MessageName\"]\n",
        )
        .unwrap();
        assert!(matches!(
            config.validate(),
            Err(NotebookError::InvalidConfigValueError { .. })
        ));
    }

    #[test]
    fn test_invalid_toml_is_reported() {
        assert!(matches!(
            NotebookConfig::from_toml_str("[logs\n"),
            Err(NotebookError::ConfigValidationError { .. })
        ));
    }

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_tolerance_precedence() {
        let mut config = LogsConfig::default();
        config.apply_overrides(lookup(&[])).unwrap();
        assert_eq!(config.tolerance_minutes, 5);

        let mut config = NotebookConfig::from_toml_str("[logs]\ntolerance_minutes = 3\n")
            .unwrap()
            .logs;
        config.apply_overrides(lookup(&[])).unwrap();
        assert_eq!(config.tolerance_minutes, 3);

        config
            .apply_overrides(lookup(&[("MERGE_TOLERANCE_MINUTES", " 7 ")]))
            .unwrap();
        assert_eq!(config.tolerance_minutes, 7);

        // blank means unset
        config
            .apply_overrides(lookup(&[("MERGE_TOLERANCE_MINUTES", "")]))
            .unwrap();
        assert_eq!(config.tolerance_minutes, 7);
    }

    #[test]
    fn test_non_numeric_tolerance_is_rejected() {
        let mut config = LogsConfig::default();
        let err = config
            .apply_overrides(lookup(&[("MERGE_TOLERANCE_MINUTES", "five")]))
            .unwrap_err();
        assert!(matches!(
            err,
            NotebookError::InvalidConfigValueError { ref field, ref value, .. }
                if field == "MERGE_TOLERANCE_MINUTES" && value == "five"
        ));
        assert_eq!(config.tolerance_minutes, 5);
    }

    #[test]
    fn test_column_lists_from_env() {
        let mut config = NotebookConfig::from_toml_str(
            "[logs]\noperation_columns = [\"ContractId\", \"OrderReceiptDate\", \"TimerDiv\"]\n",
        )
        .unwrap()
        .logs;
        config
            .apply_overrides(lookup(&[
                ("OPERATION_COLS", "ContractId, OrderReceiptDate,PropertyValue"),
                ("STATE_COLS", "ContractId,ReportedDate,,MessageName"),
            ]))
            .unwrap();

        assert_eq!(
            config.operation_columns,
            vec!["ContractId", "OrderReceiptDate", "PropertyValue"]
        );
        assert_eq!(
            config.state_columns,
            vec!["ContractId", "ReportedDate", "MessageName"]
        );
        assert!(config.validate().is_ok());

        config
            .apply_overrides(lookup(&[("STATE_COLS", "MessageName")]))
            .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(b"[output]\nnotebook = \"analysis/PoC.ipynb\"\n")
            .unwrap();

        let config = NotebookConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.output.notebook, "analysis/PoC.ipynb");

        let defaults = NotebookConfig::load_or_default("/no/such/notebook.toml").unwrap();
        assert_eq!(defaults.output.notebook, "PoC.ipynb");
    }
}
