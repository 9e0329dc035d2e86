use crate::core::header::{CellHeader, HeaderDefect, HeaderLanguage};
use crate::domain::notebook::Notebook;
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LintViolation {
    pub cell_index: usize,
    pub cell_id: Option<String>,
    pub defect: HeaderDefect,
}

impl fmt::Display for LintViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cell_id {
            Some(id) => write!(f, "cell {} ({}): {}", self.cell_index, id, self.defect),
            None => write!(f, "cell {}: {}", self.cell_index, self.defect),
        }
    }
}

/// Checks the header of every code cell. With a `baseline`, cells that
/// already existed there (same id, or identical source) are skipped.
pub fn lint_notebook(
    notebook: &Notebook,
    language: HeaderLanguage,
    baseline: Option<&Notebook>,
) -> Vec<LintViolation> {
    let (known_ids, known_sources): (HashSet<&str>, HashSet<&str>) = match baseline {
        Some(baseline) => (
            baseline.cells.iter().filter_map(|c| c.id()).collect(),
            baseline
                .code_cells()
                .map(|(_, c)| c.source().as_str())
                .collect(),
        ),
        None => (HashSet::new(), HashSet::new()),
    };

    let mut violations = Vec::new();
    for (cell_index, cell) in notebook.code_cells() {
        let existing = cell.id().is_some_and(|id| known_ids.contains(id))
            || known_sources.contains(cell.source().as_str());
        if existing {
            continue;
        }

        for defect in CellHeader::check(cell.source().as_str(), language) {
            violations.push(LintViolation {
                cell_index,
                cell_id: cell.id().map(str::to_string),
                defect,
            });
        }
    }
    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::notebook::{Cell, NotebookMetadata};

    const GOOD: &str = "# WHAT: load\n# WHY : reuse\n# CHECK: shape printed\nx = 1\n";

    fn notebook(sources: &[&str]) -> Notebook {
        let mut notebook = Notebook::new(NotebookMetadata::default());
        notebook.cells.push(Cell::markdown("# Title"));
        for (i, source) in sources.iter().enumerate() {
            let mut cell = Cell::code(*source);
            cell.set_id(format!("cell-{}", i));
            notebook.cells.push(cell);
        }
        notebook
    }

    #[test]
    fn test_only_code_cells_are_checked() {
        let nb = notebook(&[GOOD, "print(1)\n"]);
        let violations = lint_notebook(&nb, HeaderLanguage::English, None);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].cell_index, 2);
        assert_eq!(violations[0].cell_id.as_deref(), Some("cell-1"));
        assert_eq!(violations[0].defect, HeaderDefect::Missing);
        assert_eq!(violations[0].to_string(), "cell 2 (cell-1): no WHAT/WHY/CHECK header");
    }

    #[test]
    fn test_baseline_exempts_existing_cells() {
        let baseline = notebook(&["print(1)\n"]);

        let mut edited = notebook(&["print(1)\n", "print(2)\n"]);
        // same source, new id
        edited.cells[1].set_id("renamed".to_string());
        let violations = lint_notebook(&edited, HeaderLanguage::English, Some(&baseline));
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].cell_id.as_deref(), Some("cell-1"));
    }

    #[test]
    fn test_baseline_matches_by_id() {
        let baseline = notebook(&["print(1)\n"]);
        let edited = notebook(&["print('changed')\n"]);
        assert!(lint_notebook(&edited, HeaderLanguage::English, Some(&baseline)).is_empty());
    }
}
