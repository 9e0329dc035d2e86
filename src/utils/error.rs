use crate::core::inputs::UnresolvedItem;
use crate::core::lint::LintViolation;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NotebookError {
    #[error("Zip operation failed: {0}")]
    ZipError(#[from] zip::result::ZipError),

    #[error("Workbook error: {0}")]
    WorkbookError(#[from] calamine::XlsxError),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Configuration error in {field}: {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value for {field}: '{value}' ({reason})")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },

    #[error("DBML syntax error at line {line}: {message}")]
    SchemaParseError { line: usize, message: String },

    #[error("{} unresolved input item(s); nothing was generated", items.len())]
    UnresolvedInputs { items: Vec<UnresolvedItem> },

    #[error("{} code cell(s) violate the WHAT/WHY/CHECK header rule", violations.len())]
    HeaderViolations { violations: Vec<LintViolation> },

    #[error("Not found: {message}")]
    NotFound { message: String },

    #[error("Data processing error: {message}")]
    ProcessingError { message: String },

    #[error("Validation error: {message}")]
    ValidationError { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Input,
    Data,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ErrorSeverity {
    /// Process exit status for the binary.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Low => 0,
            Self::Medium => 2,
            Self::High => 1,
            Self::Critical => 3,
        }
    }
}

impl NotebookError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ConfigError { .. }
            | Self::ConfigValidationError { .. }
            | Self::InvalidConfigValueError { .. }
            | Self::MissingConfigError { .. }
            | Self::TomlError(_) => ErrorCategory::Configuration,
            Self::SchemaParseError { .. }
            | Self::UnresolvedInputs { .. }
            | Self::HeaderViolations { .. }
            | Self::NotFound { .. } => ErrorCategory::Input,
            Self::CsvError(_)
            | Self::WorkbookError(_)
            | Self::ProcessingError { .. }
            | Self::ValidationError { .. }
            | Self::SerializationError(_) => ErrorCategory::Data,
            Self::ZipError(_) | Self::IoError(_) => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::IoError(_) | Self::ZipError(_) => ErrorSeverity::Critical,
            _ => ErrorSeverity::High,
        }
    }

    pub fn recovery_suggestion(&self) -> String {
        match self {
            Self::UnresolvedInputs { .. } => {
                "Resolve every listed item in the schema or plan, then run again".to_string()
            }
            Self::SchemaParseError { line, .. } => {
                format!("Fix the DBML syntax near line {}", line)
            }
            Self::HeaderViolations { .. } => {
                "Start each new code cell with '# WHAT:', '# WHY :' and '# CHECK:' lines"
                    .to_string()
            }
            Self::NotFound { .. } => {
                "Check the data directory and file naming pattern in the configuration".to_string()
            }
            Self::TomlError(_) | Self::ConfigError { .. } | Self::ConfigValidationError { .. } => {
                "Make sure the configuration file exists and is valid TOML".to_string()
            }
            Self::InvalidConfigValueError { field, .. } | Self::MissingConfigError { field } => {
                format!("Set a valid value for '{}'", field)
            }
            Self::CsvError(_)
            | Self::WorkbookError(_)
            | Self::ValidationError { .. }
            | Self::ProcessingError { .. } => {
                "Inspect the exported sheets for missing columns or malformed timestamps"
                    .to_string()
            }
            Self::SerializationError(_) => "The notebook file is not valid JSON".to_string(),
            Self::IoError(_) | Self::ZipError(_) => {
                "Check file permissions and that the files are not corrupted".to_string()
            }
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            Self::UnresolvedInputs { items } => format!(
                "Stopped: {} item(s) in the inputs are missing or ambiguous",
                items.len()
            ),
            Self::HeaderViolations { violations } => format!(
                "{} code cell(s) do not start with the required header",
                violations.len()
            ),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, NotebookError>;
