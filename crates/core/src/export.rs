use crate::directors::DirectorStyle;
use crate::model::Chapter;
use chrono::NaiveDate;

pub const UNWRITTEN_PLACEHOLDER: &str = "(未生成)";

/// Flattens every chapter, ascending by id, into one plain-text script.
pub fn export_script(chapters: &[Chapter]) -> String {
    let mut ordered: Vec<&Chapter> = chapters.iter().collect();
    ordered.sort_by_key(|c| c.id);
    ordered
        .into_iter()
        .map(|c| {
            let body = if c.has_content() {
                c.content.as_str()
            } else {
                UNWRITTEN_PLACEHOLDER
            };
            format!("\n\n=== 第 {} 场: {} ===\n\n{}", c.id, c.title, body)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn export_file_name(style: DirectorStyle, date: NaiveDate) -> String {
    format!("Script-Remix-{}-{}.txt", style.id(), date.format("%Y-%m-%d"))
}
