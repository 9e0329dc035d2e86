use crate::adapters::cache::LogCache;
use crate::config::toml_config::LogsConfig;
use crate::domain::logs::{format_timestamp, LogSnapshot, LogTable};
use crate::domain::ports::LogRepository;
use crate::utils::error::{NotebookError, Result};
use async_trait::async_trait;
use calamine::{open_workbook, Data, Reader, Xlsx};
use chrono::Duration;
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

/// Where export bundles live and what to read from them.
#[derive(Debug, Clone)]
pub struct ExportBundleSettings {
    pub data_dir: PathBuf,
    pub file_prefix: String,
    pub file_suffix: String,
    pub operation_sheet: String,
    pub state_sheet: String,
    pub operation_columns: Vec<String>,
    pub state_columns: Vec<String>,
    pub tolerance: Duration,
}

impl ExportBundleSettings {
    /// Relative directories in `config` are resolved against `root`.
    pub fn from_config(root: &Path, config: &LogsConfig) -> Self {
        Self {
            data_dir: root.join(&config.data_dir),
            file_prefix: config.file_prefix.clone(),
            file_suffix: config.file_suffix.clone(),
            operation_sheet: config.operation_sheet.clone(),
            state_sheet: config.state_sheet.clone(),
            operation_columns: config.operation_columns.clone(),
            state_columns: config.state_columns.clone(),
            tolerance: Duration::minutes(config.tolerance_minutes as i64),
        }
    }

    fn cache_columns(&self) -> Vec<String> {
        let mut columns = self.operation_columns.clone();
        columns.push("|".to_string());
        columns.extend(self.state_columns.iter().cloned());
        columns
    }
}

/// Container of the two exported sheets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleFormat {
    /// `.xlsx` workbook with one worksheet per log.
    Workbook,
    /// `.zip` holding `<sheet>.csv` per log.
    CsvArchive,
}

impl BundleFormat {
    pub fn detect(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("xlsx") | Some("xlsm") => Ok(Self::Workbook),
            Some("zip") => Ok(Self::CsvArchive),
            _ => Err(NotebookError::ValidationError {
                message: format!(
                    "{} is neither an .xlsx workbook nor a .zip of CSV sheets",
                    path.display()
                ),
            }),
        }
    }
}

/// Reads the newest export bundle in the data directory.
pub struct ExportBundleRepository {
    settings: ExportBundleSettings,
    cache: Option<LogCache>,
}

impl ExportBundleRepository {
    pub fn new(settings: ExportBundleSettings) -> Self {
        Self {
            settings,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: LogCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn settings(&self) -> &ExportBundleSettings {
        &self.settings
    }

    pub fn latest_bundle(&self) -> Result<PathBuf> {
        latest_bundle(&self.settings)
    }
}

/// Bundle names embed their export date, so the lexicographically last match is the newest.
fn latest_bundle(settings: &ExportBundleSettings) -> Result<PathBuf> {
    let dir = &settings.data_dir;
    if !dir.is_dir() {
        return Err(NotebookError::NotFound {
            message: format!("data directory {} does not exist", dir.display()),
        });
    }

    let mut latest: Option<String> = None;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(&settings.file_prefix)
            && name.ends_with(&settings.file_suffix)
            && latest.as_ref().map_or(true, |current| name > *current)
        {
            latest = Some(name);
        }
    }

    latest.map(|name| dir.join(name)).ok_or_else(|| NotebookError::NotFound {
        message: format!(
            "no export matching {}*{} in {}",
            settings.file_prefix,
            settings.file_suffix,
            dir.display()
        ),
    })
}

/// Blocking half of `fetch_latest`: locate, consult the cache, read.
fn load_latest(settings: &ExportBundleSettings, cache: Option<&LogCache>) -> Result<LogSnapshot> {
    let path = latest_bundle(settings)?;

    let Some(cache) = cache else {
        return read_bundle(settings, &path);
    };

    let key = LogCache::key_for(&path, &settings.cache_columns())?;
    if let Some(snapshot) = cache.load(&key) {
        return Ok(snapshot);
    }
    let snapshot = read_bundle(settings, &path)?;
    if let Err(e) = cache.store(&key, &snapshot) {
        tracing::warn!("⚠️ Could not write cache {}: {}", cache.dir().display(), e);
    }
    Ok(snapshot)
}

fn read_bundle(settings: &ExportBundleSettings, path: &Path) -> Result<LogSnapshot> {
    let format = BundleFormat::detect(path)?;
    tracing::info!("📥 Reading export bundle {} ({:?})", path.display(), format);

    let (operations, states) = match format {
        BundleFormat::Workbook => {
            let mut workbook: Xlsx<BufReader<File>> = open_workbook(path)?;
            (
                read_worksheet(&mut workbook, &settings.operation_sheet)?,
                read_worksheet(&mut workbook, &settings.state_sheet)?,
            )
        }
        BundleFormat::CsvArchive => {
            let mut archive = zip::ZipArchive::new(File::open(path)?)?;
            (
                read_csv_entry(&mut archive, &settings.operation_sheet)?,
                read_csv_entry(&mut archive, &settings.state_sheet)?,
            )
        }
    };

    let operations = select_columns(&operations, &settings.operation_columns, &settings.operation_sheet)?;
    let states = select_columns(&states, &settings.state_columns, &settings.state_sheet)?;
    tracing::info!(
        "📊 Loaded {} operation row(s) and {} state row(s)",
        operations.len(),
        states.len()
    );
    Ok(LogSnapshot { operations, states })
}

fn missing_sheet(sheet: &str) -> NotebookError {
    NotebookError::ValidationError {
        message: format!("sheet '{}' is missing from the export bundle", sheet),
    }
}

/// First row is the header.
fn read_worksheet(workbook: &mut Xlsx<BufReader<File>>, sheet: &str) -> Result<LogTable> {
    if !workbook.sheet_names().iter().any(|name| name == sheet) {
        return Err(missing_sheet(sheet));
    }
    let range = workbook.worksheet_range(sheet)?;
    let mut rows = range.rows();
    let header = rows.next().ok_or_else(|| NotebookError::ValidationError {
        message: format!("sheet '{}' has no header row", sheet),
    })?;

    let mut table = LogTable::new(
        header
            .iter()
            .map(|cell| cell_text(cell).unwrap_or_default())
            .collect(),
    );
    table.rows = rows.map(|row| row.iter().map(cell_text).collect()).collect();
    Ok(table)
}

/// Spreadsheet cell as the text the CSV path would have produced.
fn cell_text(cell: &Data) -> Option<String> {
    match cell {
        Data::Empty | Data::Error(_) => None,
        Data::String(s) => (!s.is_empty()).then(|| s.clone()),
        Data::Int(i) => Some(i.to_string()),
        // ids typed as numbers must not come back as `12345.0`
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => Some(format!("{}", *f as i64)),
        Data::Float(f) => Some(f.to_string()),
        Data::Bool(b) => Some(b.to_string()),
        Data::DateTime(dt) => dt.as_datetime().map(|t| format_timestamp(&t)),
        Data::DateTimeIso(s) | Data::DurationIso(s) => Some(s.clone()),
    }
}

fn read_csv_entry(archive: &mut zip::ZipArchive<File>, sheet: &str) -> Result<LogTable> {
    let mut data = Vec::new();
    match archive.by_name(&format!("{}.csv", sheet)) {
        Ok(mut file) => {
            file.read_to_end(&mut data)?;
        }
        Err(zip::result::ZipError::FileNotFound) => return Err(missing_sheet(sheet)),
        Err(e) => return Err(e.into()),
    }
    LogTable::from_csv(&data)
}

/// Keeps `columns`, in the order they appear in the sheet.
fn select_columns(table: &LogTable, columns: &[String], sheet: &str) -> Result<LogTable> {
    for column in columns {
        table.require_column(column, sheet)?;
    }

    let keep: Vec<usize> = table
        .columns
        .iter()
        .enumerate()
        .filter(|(_, name)| columns.contains(name))
        .map(|(i, _)| i)
        .collect();

    let mut selected = LogTable::new(keep.iter().map(|&i| table.columns[i].clone()).collect());
    selected.rows = table
        .rows
        .iter()
        .map(|row| keep.iter().map(|&i| row[i].clone()).collect())
        .collect();
    Ok(selected)
}

#[async_trait]
impl LogRepository for ExportBundleRepository {
    async fn fetch_latest(&self) -> Result<LogSnapshot> {
        let settings = self.settings.clone();
        let cache = self.cache.clone();
        tokio::task::spawn_blocking(move || load_latest(&settings, cache.as_ref()))
            .await
            .map_err(|e| NotebookError::ProcessingError {
                message: format!("export loading task failed: {}", e),
            })?
    }

    fn tolerance(&self) -> Duration {
        self.settings.tolerance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calamine::{ExcelDateTime, ExcelDateTimeType};

    #[test]
    fn test_select_columns_keeps_file_order() {
        let mut table = LogTable::new(vec!["A".into(), "ContractId".into(), "B".into()]);
        table
            .rows
            .push(vec![Some("a".into()), Some("C1".into()), Some("b".into())]);

        let selected =
            select_columns(&table, &["B".to_string(), "ContractId".to_string()], "sheet")
                .unwrap();
        assert_eq!(selected.columns, vec!["ContractId", "B"]);
        assert_eq!(selected.rows[0], vec![Some("C1".into()), Some("b".into())]);

        assert!(matches!(
            select_columns(&table, &["Missing".to_string()], "sheet"),
            Err(NotebookError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_latest_bundle_requires_matching_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let mut config = LogsConfig::default();
        config.data_dir = ".".to_string();
        config.file_prefix = "export_".to_string();
        let repo = ExportBundleRepository::new(ExportBundleSettings::from_config(
            temp_dir.path(),
            &config,
        ));

        assert!(matches!(
            repo.latest_bundle(),
            Err(NotebookError::NotFound { .. })
        ));

        fs::write(temp_dir.path().join("export_0401.xlsx"), b"").unwrap();
        fs::write(temp_dir.path().join("export_0415.xlsx"), b"").unwrap();
        fs::write(temp_dir.path().join("export_0501.zip"), b"").unwrap();
        fs::write(temp_dir.path().join("other_0601.xlsx"), b"").unwrap();

        let latest = repo.latest_bundle().unwrap();
        assert_eq!(latest.file_name().unwrap(), "export_0415.xlsx");
    }

    #[test]
    fn test_bundle_format_from_extension() {
        assert_eq!(
            BundleFormat::detect(Path::new("data/export_0501.XLSX")).unwrap(),
            BundleFormat::Workbook
        );
        assert_eq!(
            BundleFormat::detect(Path::new("data/export_0501.zip")).unwrap(),
            BundleFormat::CsvArchive
        );
        assert!(BundleFormat::detect(Path::new("data/export_0501.csv")).is_err());
    }

    #[test]
    fn test_cell_text_matches_csv_rendering() {
        assert_eq!(cell_text(&Data::Empty), None);
        assert_eq!(cell_text(&Data::String(String::new())), None);
        assert_eq!(cell_text(&Data::String("C1".into())).as_deref(), Some("C1"));
        assert_eq!(cell_text(&Data::Float(12345.0)).as_deref(), Some("12345"));
        assert_eq!(cell_text(&Data::Float(1.5)).as_deref(), Some("1.5"));
        assert_eq!(cell_text(&Data::Bool(true)).as_deref(), Some("true"));

        // 2024-05-01 10:30:00
        let dt = ExcelDateTime::new(45413.4375, ExcelDateTimeType::DateTime, false);
        assert_eq!(
            cell_text(&Data::DateTime(dt)).as_deref(),
            Some("2024-05-01 10:30:00")
        );
    }
}
