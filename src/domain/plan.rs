use serde::{Deserialize, Serialize};

const DATASET_KEYWORDS: &[&str] = &["dataset", "data source", "table", "データ", "テーブル"];
const OPEN_QUESTION_KEYWORDS: &[&str] = &["open question", "unresolved", "未解決", "未確定", "課題"];
const PLACEHOLDER_MARKERS: &[&str] = &["TBD", "TODO", "???", "未定", "要確認"];

/// The analysis plan (`PLAN.md`) split into headed sections.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub title: Option<String>,
    pub sections: Vec<PlanSection>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanSection {
    /// 0 for text that precedes the first heading.
    pub level: u8,
    pub heading: String,
    pub body: String,
    pub items: Vec<PlanItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanItem {
    pub text: String,
    pub code_spans: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionRole {
    Datasets,
    OpenQuestions,
    Requirements,
    Narrative,
}

impl Plan {
    pub fn sections_with_role(&self, role: SectionRole) -> impl Iterator<Item = &PlanSection> {
        self.sections.iter().filter(move |s| s.role() == role)
    }

    /// Dataset names in the order the plan lists them, without duplicates.
    pub fn datasets(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for section in self.sections_with_role(SectionRole::Datasets) {
            for item in &section.items {
                if let Some(name) = item.dataset_name() {
                    if !names.contains(&name) {
                        names.push(name);
                    }
                }
            }
        }
        names
    }

    pub fn open_questions(&self) -> Vec<&PlanItem> {
        self.sections_with_role(SectionRole::OpenQuestions)
            .flat_map(|s| s.items.iter())
            .collect()
    }

    /// Every fragment of text carrying a placeholder marker such as `TBD`.
    pub fn placeholders(&self) -> Vec<String> {
        let mut found = Vec::new();
        for section in &self.sections {
            if section.role() == SectionRole::OpenQuestions {
                continue;
            }
            if contains_placeholder(&section.heading) {
                found.push(section.heading.clone());
            }
            for line in section.body.lines().map(str::trim) {
                if contains_placeholder(line) {
                    found.push(line.to_string());
                }
            }
            for item in &section.items {
                if contains_placeholder(&item.text) {
                    found.push(item.text.clone());
                }
            }
        }
        found
    }
}

impl PlanSection {
    pub fn role(&self) -> SectionRole {
        let heading = self.heading.to_lowercase();
        if OPEN_QUESTION_KEYWORDS.iter().any(|k| heading.contains(k)) {
            SectionRole::OpenQuestions
        } else if DATASET_KEYWORDS.iter().any(|k| heading.contains(k)) {
            SectionRole::Datasets
        } else if self.items.is_empty() {
            SectionRole::Narrative
        } else {
            SectionRole::Requirements
        }
    }
}

impl PlanItem {
    pub fn dataset_name(&self) -> Option<String> {
        if let Some(code) = self.code_spans.first() {
            let code = code.trim();
            if !code.is_empty() {
                return Some(code.to_string());
            }
        }
        self.text
            .split(|c: char| c.is_whitespace() || matches!(c, ':' | '：' | '(' | '（' | ','))
            .find(|s| !s.is_empty())
            .map(str::to_string)
    }
}

fn contains_placeholder(text: &str) -> bool {
    PLACEHOLDER_MARKERS.iter().any(|m| text.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(text: &str, code: &[&str]) -> PlanItem {
        PlanItem {
            text: text.to_string(),
            code_spans: code.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_section_roles() {
        let datasets = PlanSection {
            level: 2,
            heading: "使用データ".to_string(),
            items: vec![item("logs", &[])],
            ..PlanSection::default()
        };
        let questions = PlanSection {
            level: 2,
            heading: "Open Questions".to_string(),
            ..PlanSection::default()
        };
        let goals = PlanSection {
            level: 2,
            heading: "Goals".to_string(),
            items: vec![item("count events", &[])],
            ..PlanSection::default()
        };
        let intro = PlanSection {
            level: 2,
            heading: "Background".to_string(),
            ..PlanSection::default()
        };

        assert_eq!(datasets.role(), SectionRole::Datasets);
        assert_eq!(questions.role(), SectionRole::OpenQuestions);
        assert_eq!(goals.role(), SectionRole::Requirements);
        assert_eq!(intro.role(), SectionRole::Narrative);
    }

    #[test]
    fn test_dataset_name_prefers_code_span() {
        assert_eq!(
            item("`equipment_control_logs`: remote operations", &["equipment_control_logs"])
                .dataset_name()
                .as_deref(),
            Some("equipment_control_logs")
        );
        assert_eq!(
            item("status_events（状態イベント）", &[]).dataset_name().as_deref(),
            Some("status_events")
        );
        assert_eq!(item("   ", &[]).dataset_name(), None);
    }

    #[test]
    fn test_placeholders_skip_open_question_sections() {
        let plan = Plan {
            title: Some("PoC".to_string()),
            sections: vec![
                PlanSection {
                    level: 2,
                    heading: "Goals".to_string(),
                    body: "Threshold is TBD\nfine line".to_string(),
                    items: vec![item("集計粒度は未定", &[])],
                },
                PlanSection {
                    level: 2,
                    heading: "Open questions".to_string(),
                    items: vec![item("TODO decide owner", &[])],
                    ..PlanSection::default()
                },
            ],
        };

        assert_eq!(plan.placeholders(), vec!["Threshold is TBD", "集計粒度は未定"]);
        assert_eq!(plan.open_questions().len(), 1);
    }
}
