use log::debug;

use crate::core::config::StyleOptions;
use crate::core::error::StorybookError;
use crate::core::story::{
    CharacterMapping, GenerationRequest, ImageData, SceneContext, StoryPageDraft,
};

/// Fixed appropriateness clause appended to every illustration request.
const SAFETY_CLAUSE: &str = "The illustration must be warm, gentle, and appropriate for young \
    children. No frightening imagery, no violence, no sad or distressing scenes, and no text, \
    letters, or numbers anywhere in the image.";

/// Narrative position of the page being illustrated.
#[derive(Debug, Clone)]
pub struct NarrativeWindow<'a> {
    pub page_number: u32,
    pub total_pages: u32,
    pub previous_text: Option<&'a str>,
    pub next_text: Option<&'a str>,
    pub concept: &'a str,
    pub tone: &'a str,
}

/// Which reference images accompany a composition.
///
/// Page 1 ships the raw avatar references, keyed by reference slot. Every
/// later page ships the single page-1 illustration instead and rewrites the
/// per-character instructions against `position_in_reference`; that
/// substitution is the cross-page consistency mechanism. `None` covers runs
/// where no usable reference exists (no avatars, or page 1 fell back).
#[derive(Debug, Clone)]
pub enum ReferenceSet {
    Avatars(Vec<(u8, ImageData)>),
    PageOne(ImageData),
    None,
}

/// Builds the complete generation request for one page: structured prompt
/// sections plus the ordered reference images.
///
/// Composing with missing page text is a programmer error (PROMPT_ERROR),
/// surfaced immediately rather than absorbed into a fallback.
pub fn compose(
    page: &StoryPageDraft,
    mappings: &[CharacterMapping],
    scene: &SceneContext,
    narrative: &NarrativeWindow<'_>,
    style: &StyleOptions,
    references: &ReferenceSet,
) -> Result<GenerationRequest, StorybookError> {
    if page.text.trim().is_empty() {
        return Err(StorybookError::EmptyPageText {
            page: page.page_number,
        });
    }

    let mut sections: Vec<String> = Vec::new();

    sections.push(format!(
        "Illustrate this page of a children's picture book:\n\"{}\"",
        page.text.trim()
    ));

    if let Some(visual_context) = page.visual_context.as_deref() {
        if !visual_context.trim().is_empty() {
            sections.push(format!("Page visual notes: {}", visual_context.trim()));
        }
    }

    sections.push(character_contract(mappings, references));
    sections.push(scene_directives(scene, style));
    sections.push(continuity_directives(narrative));
    sections.push(SAFETY_CLAUSE.to_string());

    let images = reference_images(references);
    debug!(
        "Composed page {} prompt: {} section(s), {} reference image(s)",
        page.page_number,
        sections.len(),
        images.len()
    );

    Ok(GenerationRequest {
        text_prompt: sections.join("\n\n"),
        images,
    })
}

/// Per-character visual contract. Avatar-bearing characters are told to
/// match their attached reference; description-only characters get their
/// full textual appearance contract.
fn character_contract(mappings: &[CharacterMapping], references: &ReferenceSet) -> String {
    if mappings.is_empty() {
        return "Characters: none. Render the scene itself, with no people or \
            named characters."
            .to_string();
    }

    let mut lines = vec!["Characters in this illustration:".to_string()];
    match references {
        ReferenceSet::Avatars(avatars) => {
            let mut attached: Vec<u8> = avatars.iter().map(|(slot, _)| *slot).collect();
            attached.sort_unstable();
            for mapping in mappings {
                let attachment = if mapping.has_reference_slot() {
                    attached
                        .iter()
                        .position(|slot| *slot as i8 == mapping.avatar_index)
                } else {
                    None
                };
                match attachment {
                    Some(pos) => lines.push(format!(
                        "- {}: match the appearance of attached reference image {} exactly. {}",
                        mapping.name,
                        pos + 1,
                        mapping.visual_description
                    )),
                    None => lines.push(description_line(mapping)),
                }
            }
        }
        ReferenceSet::PageOne(_) => {
            lines.push(
                "The attached image is the illustration of page 1 of this same story. \
                 Keep every character visually identical to it."
                    .to_string(),
            );
            for mapping in mappings {
                let position = mapping
                    .position_in_reference
                    .as_deref()
                    .unwrap_or_else(|| mapping.role.default_reference_position());
                lines.push(format!(
                    "- {} appears {} in the attached reference image; keep their \
                     appearance exactly the same.",
                    mapping.name, position
                ));
            }
        }
        ReferenceSet::None => {
            for mapping in mappings {
                lines.push(description_line(mapping));
            }
        }
    }
    lines.join("\n")
}

fn description_line(mapping: &CharacterMapping) -> String {
    format!("- {}: {}", mapping.name, mapping.visual_description)
}

fn scene_directives(scene: &SceneContext, style: &StyleOptions) -> String {
    let mut palette = scene.color_palette.join(", ");
    if let Some(hint) = style.palette_hint.as_deref() {
        if !hint.trim().is_empty() {
            palette.push_str(&format!(" (favor {})", hint.trim()));
        }
    }
    format!(
        "Setting: {}. Mood: {}. Color palette: {}. Visual style: {}, {}.",
        scene.setting, scene.mood, palette, scene.visual_style, style.illustration_style
    )
}

fn continuity_directives(narrative: &NarrativeWindow<'_>) -> String {
    let mut lines = vec![format!(
        "This is page {} of {} in a story about {} (tone: {}).",
        narrative.page_number, narrative.total_pages, narrative.concept, narrative.tone
    )];
    if let Some(previous) = narrative.previous_text {
        lines.push(format!(
            "The previous page read: \"{}\" - this illustration continues from it.",
            previous.trim()
        ));
    }
    if let Some(next) = narrative.next_text {
        lines.push(format!(
            "The next page will read: \"{}\" - leave room for the story to go there.",
            next.trim()
        ));
    }
    lines.join("\n")
}

fn reference_images(references: &ReferenceSet) -> Vec<ImageData> {
    match references {
        ReferenceSet::Avatars(avatars) => {
            let mut ordered = avatars.clone();
            ordered.sort_by_key(|(slot, _)| *slot);
            ordered.into_iter().map(|(_, image)| image).collect()
        }
        ReferenceSet::PageOne(image) => vec![image.clone()],
        ReferenceSet::None => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::story::{CharacterRole, NO_REFERENCE_SLOT};

    fn mapping(name: &str, role: CharacterRole, avatar_index: i8) -> CharacterMapping {
        CharacterMapping {
            character_id: name.to_lowercase(),
            name: name.to_string(),
            role,
            avatar_index,
            visual_description: format!("{} wears a yellow raincoat", name),
            position_in_reference: None,
        }
    }

    fn page(number: u32, text: &str) -> StoryPageDraft {
        StoryPageDraft {
            page_number: number,
            text: text.to_string(),
            is_edited: false,
            visual_context: None,
        }
    }

    fn scene() -> SceneContext {
        SceneContext::from_concept("a rainy day adventure", "calm")
    }

    fn narrative(page_number: u32, total: u32) -> NarrativeWindow<'static> {
        NarrativeWindow {
            page_number,
            total_pages: total,
            previous_text: None,
            next_text: None,
            concept: "a rainy day adventure",
            tone: "calm",
        }
    }

    fn image(byte: u8) -> ImageData {
        ImageData {
            bytes: vec![byte],
            mime_type: "image/png".to_string(),
        }
    }

    #[test]
    fn test_empty_page_text_is_prompt_error() {
        let err = compose(
            &page(2, "   "),
            &[mapping("Alice", CharacterRole::Primary, 0)],
            &scene(),
            &narrative(2, 5),
            &StyleOptions::default(),
            &ReferenceSet::None,
        )
        .unwrap_err();
        assert_eq!(err.code(), "PROMPT_ERROR");
    }

    #[test]
    fn test_page_one_avatar_numbering_skips_imageless_slots() {
        // Slot 0 belongs to the child (description-based, no avatar bytes),
        // so Alice's slot-1 avatar is attachment 1 and Bob's slot-2 is 2.
        let mappings = vec![
            mapping("Milo", CharacterRole::Primary, 0),
            mapping("Alice", CharacterRole::Secondary, 1),
            mapping("Bob", CharacterRole::Supporting, 2),
            mapping("Charlie", CharacterRole::Supporting, NO_REFERENCE_SLOT),
        ];
        let references = ReferenceSet::Avatars(vec![(1, image(1)), (2, image(2))]);

        let request = compose(
            &page(1, "They set out into the rain."),
            &mappings,
            &scene(),
            &narrative(1, 5),
            &StyleOptions::default(),
            &references,
        )
        .unwrap();

        assert_eq!(request.images.len(), 2);
        assert_eq!(request.images[0].bytes, vec![1]);
        assert!(request
            .text_prompt
            .contains("Alice: match the appearance of attached reference image 1"));
        assert!(request
            .text_prompt
            .contains("Bob: match the appearance of attached reference image 2"));
        // Child and Charlie stay description-based.
        assert!(request.text_prompt.contains("Milo: Milo wears"));
        assert!(request.text_prompt.contains("Charlie: Charlie wears"));
    }

    #[test]
    fn test_later_pages_use_page_one_reference() {
        let mut mappings = vec![
            mapping("Alice", CharacterRole::Primary, 0),
            mapping("Bob", CharacterRole::Secondary, NO_REFERENCE_SLOT),
        ];
        mappings[0].position_in_reference = Some("on the left, under the umbrella".to_string());

        let request = compose(
            &page(3, "The puddle turned out to be enormous."),
            &mappings,
            &scene(),
            &narrative(3, 5),
            &StyleOptions::default(),
            &ReferenceSet::PageOne(image(7)),
        )
        .unwrap();

        assert_eq!(request.images.len(), 1);
        assert!(request
            .text_prompt
            .contains("Alice appears on the left, under the umbrella"));
        // No detected position: falls back to the role-based sentence.
        assert!(request
            .text_prompt
            .contains("Bob appears beside the main character"));
        assert!(!request.text_prompt.contains("reference image 2"));
    }

    #[test]
    fn test_no_reference_composition_is_description_only() {
        let mappings = vec![mapping("Alice", CharacterRole::Primary, 0)];
        let request = compose(
            &page(2, "Alice kept going."),
            &mappings,
            &scene(),
            &narrative(2, 5),
            &StyleOptions::default(),
            &ReferenceSet::None,
        )
        .unwrap();

        assert!(request.images.is_empty());
        assert!(request.text_prompt.contains("Alice: Alice wears"));
        assert!(!request.text_prompt.contains("attached reference image"));
    }

    #[test]
    fn test_prompt_carries_scene_continuity_and_safety() {
        let request = compose(
            &page(2, "Splash!"),
            &[],
            &scene(),
            &NarrativeWindow {
                page_number: 2,
                total_pages: 3,
                previous_text: Some("It began to rain."),
                next_text: Some("Home at last."),
                concept: "a rainy day adventure",
                tone: "calm",
            },
            &StyleOptions::default(),
            &ReferenceSet::None,
        )
        .unwrap();

        assert!(request.text_prompt.contains("\"Splash!\""));
        assert!(request.text_prompt.contains("Setting:"));
        assert!(request.text_prompt.contains("page 2 of 3"));
        assert!(request.text_prompt.contains("It began to rain."));
        assert!(request.text_prompt.contains("Home at last."));
        assert!(request.text_prompt.contains("appropriate for young"));
        assert!(request.text_prompt.contains("Render the scene itself"));
    }

    #[test]
    fn test_never_more_than_three_reference_images() {
        let references = ReferenceSet::Avatars(vec![(0, image(0)), (1, image(1)), (2, image(2))]);
        let request = compose(
            &page(1, "Everyone together now."),
            &[
                mapping("A", CharacterRole::Primary, 0),
                mapping("B", CharacterRole::Secondary, 1),
                mapping("C", CharacterRole::Supporting, 2),
            ],
            &scene(),
            &narrative(1, 2),
            &StyleOptions::default(),
            &references,
        )
        .unwrap();
        assert!(request.images.len() <= 3);
    }
}
