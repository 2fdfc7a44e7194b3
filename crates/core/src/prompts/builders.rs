use super::{PromptError, PromptKey, PromptRegistry};
use crate::model::{Chapter, Character};

pub const NO_CHARACTERS_NOTE: &str = "No specific character profiles provided. Infer from outline.";

/// Renders the roster as `- NAME: ... (archetype)` / `TRAITS:` pairs.
pub fn format_characters(characters: &[Character]) -> String {
    if characters.is_empty() {
        return NO_CHARACTERS_NOTE.to_string();
    }
    characters
        .iter()
        .map(|c| {
            format!(
                "- NAME: {} ({})\n  TRAITS: {}",
                c.name, c.archetype, c.description
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Joins the committed content of `chapters` in order. Callers pass only the
/// chapters that precede the one being written.
pub fn format_story_context(chapters: &[Chapter]) -> String {
    chapters
        .iter()
        .map(|c| format!("[SEQUENCE {}: {}]\n{}", c.id, c.title, c.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn build_style_prompt(registry: &PromptRegistry, reference: &str) -> Result<String, PromptError> {
    registry.format_with(PromptKey::StyleDna, [("corpus", reference)])
}

pub fn build_blueprint_prompt(
    registry: &PromptRegistry,
    style_dna: &str,
    outline: &str,
    characters: &[Character],
) -> Result<String, PromptError> {
    let roster = format_characters(characters);
    registry.format_with(
        PromptKey::Blueprint,
        [
            ("style_dna", style_dna),
            ("characters", roster.as_str()),
            ("outline", outline),
        ],
    )
}

/// Builds the scene prompt for `chapters[index]`. Only `chapters[..index]`
/// contribute to the story-so-far block.
pub fn build_scene_prompt(
    registry: &PromptRegistry,
    index: usize,
    chapters: &[Chapter],
    style_dna: &str,
    outline: &str,
    characters: &[Character],
) -> Result<String, PromptError> {
    let target = chapters
        .get(index)
        .ok_or_else(|| PromptError::NotFound(format!("sequence at index {index}")))?;
    let story_so_far = format_story_context(&chapters[..index]);
    let roster = format_characters(characters);
    let sequence_id = target.id.to_string();

    registry.format_with(
        PromptKey::Scene,
        [
            ("sequence_id", sequence_id.as_str()),
            ("sequence_title", target.title.as_str()),
            ("sequence_summary", target.summary.as_str()),
            ("style_dna", style_dna),
            ("characters", roster.as_str()),
            ("outline", outline),
            ("story_so_far", story_so_far.as_str()),
        ],
    )
}

pub fn build_refine_prompt(
    registry: &PromptRegistry,
    current_content: &str,
    instruction: &str,
    style_dna: &str,
    characters: &[Character],
) -> Result<String, PromptError> {
    let roster = format_characters(characters);
    registry.format_with(
        PromptKey::Refine,
        [
            ("instruction", instruction),
            ("style_dna", style_dna),
            ("characters", roster.as_str()),
            ("current_content", current_content),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ChapterStatus;

    fn written(id: u32, title: &str, content: &str) -> Chapter {
        Chapter {
            content: content.to_string(),
            status: ChapterStatus::Completed,
            ..Chapter::stub(id, title, format!("summary {id}"))
        }
    }

    #[test]
    fn characters_render_one_block_each() {
        let roster = vec![
            Character::new("苏丽珍", "人妻", "旗袍下的克制"),
            Character::new("周慕云", "作家", "把秘密说给树洞"),
        ];
        let rendered = format_characters(&roster);
        assert_eq!(
            rendered,
            "- NAME: 苏丽珍 (人妻)\n  TRAITS: 旗袍下的克制\n- NAME: 周慕云 (作家)\n  TRAITS: 把秘密说给树洞"
        );
        assert_eq!(format_characters(&[]), NO_CHARACTERS_NOTE);
    }

    #[test]
    fn scene_context_only_includes_earlier_chapters() {
        let registry = PromptRegistry::new().unwrap();
        let chapters = vec![
            written(1, "雨夜", "MARKER-ONE"),
            written(2, "面档", "MARKER-TWO"),
            Chapter::stub(3, "告别", "走廊尽头"),
            written(4, "后来", "MARKER-FOUR"),
        ];

        let prompt = build_scene_prompt(&registry, 2, &chapters, "dna", "outline", &[]).unwrap();
        assert!(prompt.contains("[SEQUENCE 1: 雨夜]\nMARKER-ONE"));
        assert!(prompt.contains("[SEQUENCE 2: 面档]\nMARKER-TWO"));
        assert!(prompt.contains("SEQUENCE 3: \"告别\""));
        assert!(prompt.contains("走廊尽头"));
        assert!(!prompt.contains("MARKER-FOUR"));

        let first = build_scene_prompt(&registry, 0, &chapters, "dna", "outline", &[]).unwrap();
        assert!(!first.contains("MARKER-ONE"));
        assert!(first.contains(NO_CHARACTERS_NOTE));
    }

    #[test]
    fn scene_index_out_of_range_is_not_found() {
        let registry = PromptRegistry::new().unwrap();
        let error = build_scene_prompt(&registry, 5, &[], "dna", "outline", &[]).unwrap_err();
        assert!(matches!(error, PromptError::NotFound(_)));
    }

    #[test]
    fn blueprint_prompt_keeps_literal_json_braces() {
        let registry = PromptRegistry::new().unwrap();
        let prompt = build_blueprint_prompt(&registry, "DNA-X", "赛博朋克面馆", &[]).unwrap();
        assert!(prompt.contains("DNA-X"));
        assert!(prompt.contains("赛博朋克面馆"));
        assert!(prompt.contains("{ \"feasibilityReport\": string"));
    }

    #[test]
    fn refine_prompt_embeds_instruction_and_content() {
        let registry = PromptRegistry::new().unwrap();
        let prompt =
            build_refine_prompt(&registry, "原始剧本", "删掉所有独白", "DNA", &[]).unwrap();
        assert!(prompt.contains("\"删掉所有独白\""));
        assert!(prompt.contains("原始剧本"));
    }

    #[test]
    fn style_prompt_embeds_corpus() {
        let registry = PromptRegistry::new().unwrap();
        let prompt = build_style_prompt(&registry, "CORPUS-BODY").unwrap();
        assert!(prompt.contains("CORPUS-BODY"));
        assert!(prompt.contains("【风格基因提取报告】"));
    }
}
