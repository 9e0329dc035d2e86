use crate::domain::plan::{Plan, PlanItem, PlanSection};
use pulldown_cmark::{Event, Parser as MdParser, Tag, TagEnd};

/// Splits `PLAN.md` into heading-delimited sections. Top-level list items are
/// collected per section; everything else becomes body text.
pub fn parse_plan(source: &str) -> Plan {
    let mut plan = Plan::default();
    let mut current = PlanSection::default();
    let mut in_heading = false;
    let mut heading_level = 0u8;
    let mut item_stack: Vec<PlanItem> = Vec::new();
    let mut in_code_block = false;

    for event in MdParser::new(source) {
        match event {
            Event::Start(Tag::Heading { level, .. }) => {
                finish_section(&mut plan, std::mem::take(&mut current));
                in_heading = true;
                heading_level = level as u8;
                current.level = heading_level;
            }
            Event::End(TagEnd::Heading(_)) => {
                in_heading = false;
                current.heading = current.heading.trim().to_string();
                if heading_level == 1 && plan.title.is_none() {
                    plan.title = Some(current.heading.clone());
                }
            }
            Event::Start(Tag::Item) => item_stack.push(PlanItem::default()),
            Event::End(TagEnd::Item) => {
                if let Some(mut item) = item_stack.pop() {
                    item.text = item.text.trim().to_string();
                    if item.text.is_empty() {
                        continue;
                    }
                    // nested items belong to their parent
                    match item_stack.last_mut() {
                        Some(parent) => {
                            parent.text.push(' ');
                            parent.text.push_str(&item.text);
                        }
                        None => current.items.push(item),
                    }
                }
            }
            Event::Start(Tag::CodeBlock(_)) => in_code_block = true,
            Event::End(TagEnd::CodeBlock) => in_code_block = false,
            Event::Text(text) => {
                if in_heading {
                    current.heading.push_str(&text);
                } else if let Some(item) = item_stack.last_mut() {
                    item.text.push_str(&text);
                } else if !in_code_block {
                    current.body.push_str(&text);
                }
            }
            Event::Code(code) => {
                if in_heading {
                    current.heading.push_str(&code);
                } else if let Some(item) = item_stack.last_mut() {
                    item.text.push_str(&code);
                    item.code_spans.push(code.to_string());
                } else {
                    current.body.push_str(&code);
                }
            }
            Event::SoftBreak | Event::HardBreak => {
                if let Some(item) = item_stack.last_mut() {
                    item.text.push(' ');
                } else if !in_heading {
                    current.body.push('\n');
                }
            }
            Event::End(TagEnd::Paragraph) => {
                if item_stack.is_empty() {
                    current.body.push('\n');
                }
            }
            _ => {}
        }
    }

    finish_section(&mut plan, current);
    plan
}

fn finish_section(plan: &mut Plan, mut section: PlanSection) {
    section.body = section.body.trim().to_string();
    let empty = section.heading.is_empty() && section.body.is_empty() && section.items.is_empty();
    if !empty {
        plan.sections.push(section);
    }
}
