use crate::utils::error::{NotebookError, Result};
use std::path::Path;

pub trait Validate {
    fn validate(&self) -> Result<()>;
}

fn invalid(field: &str, value: impl Into<String>, reason: impl Into<String>) -> NotebookError {
    NotebookError::InvalidConfigValueError {
        field: field.to_string(),
        value: value.into(),
        reason: reason.into(),
    }
}

/// Relative to the project root; only rejects values no filesystem accepts.
pub fn validate_path(field_name: &str, path: &str) -> Result<()> {
    if path.trim().is_empty() {
        return Err(invalid(field_name, path, "path is empty"));
    }
    if path.contains('\0') {
        return Err(invalid(field_name, path, "path contains a NUL byte"));
    }
    Ok(())
}

pub fn validate_positive_number(field_name: &str, value: usize, min_value: usize) -> Result<()> {
    if value < min_value {
        return Err(invalid(
            field_name,
            value.to_string(),
            format!("must be at least {}", min_value),
        ));
    }
    Ok(())
}

pub fn validate_file_extensions(
    field_name: &str,
    files: &[String],
    allowed_extensions: &[&str],
) -> Result<()> {
    for file in files {
        let extension = Path::new(file).extension().and_then(|ext| ext.to_str());
        match extension {
            Some(ext) if allowed_extensions.contains(&ext) => {}
            Some(ext) => {
                return Err(invalid(
                    field_name,
                    file.as_str(),
                    format!(
                        "extension .{} is not one of: {}",
                        ext,
                        allowed_extensions.join(", ")
                    ),
                ))
            }
            None => return Err(invalid(field_name, file.as_str(), "file has no extension")),
        }
    }
    Ok(())
}

pub fn validate_non_empty_string(field_name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(invalid(field_name, value, "must not be blank"));
    }
    Ok(())
}

pub fn validate_non_empty_list(field_name: &str, values: &[String]) -> Result<()> {
    if values.iter().all(|v| v.trim().is_empty()) {
        return Err(NotebookError::MissingConfigError {
            field: field_name.to_string(),
        });
    }
    Ok(())
}
