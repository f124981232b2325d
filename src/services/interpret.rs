use log::{debug, warn};
use sha2::{Digest, Sha256};

use crate::core::error::{FailureCategory, StorybookError};
use crate::core::story::{CharacterMapping, CharacterRole, GenerationOutcome, PlaceholderArt, StoryContext};
use crate::services::image::ImageModelResponse;

/// Fixed background/accent pairs for placeholder art. The seed digest picks
/// one, so the same failed page always renders the same colors.
const PLACEHOLDER_PALETTES: [(&str, &str); 6] = [
    ("#FDE8D7", "#C05621"),
    ("#D7E8FD", "#2B6CB0"),
    ("#DFF5E1", "#2F855A"),
    ("#F3E8FD", "#6B46C1"),
    ("#FDF6D7", "#B7791F"),
    ("#FDE2E2", "#C53030"),
];

/// What the interpreter made of one page's model call.
#[derive(Debug, Clone, PartialEq)]
pub struct InterpretedPage {
    pub outcome: GenerationOutcome,
    /// `(character_id, position sentence)` pairs, filled only for page 1.
    /// The controller writes these into `CharacterMapping::position_in_reference`.
    pub position_hints: Vec<(String, String)>,
}

/// Heuristic classifier over free-text model errors, in fixed priority
/// order with an explicit generic catch-all.
///
/// Fragile by nature: the model API reports failures as prose. If it ever
/// grows structured error codes, replace this function and nothing else.
pub fn classify_error_text(text: &str) -> FailureCategory {
    let lower = text.to_lowercase();
    if lower.contains("not supported") || lower.contains("feature") {
        FailureCategory::FeatureUnsupported
    } else if lower.contains("quota") || lower.contains("limit") {
        FailureCategory::QuotaExceeded
    } else if lower.contains("api key") || lower.contains("auth") {
        FailureCategory::AuthError
    } else if lower.contains("network") || lower.contains("connection") {
        FailureCategory::NetworkError
    } else {
        FailureCategory::GenericError
    }
}

/// Seed string for deterministic placeholder synthesis:
/// `{storyOrConceptId}-page{NN}-{primaryCharacter}-{category}`.
pub fn placeholder_seed(
    scope: &str,
    page_number: u32,
    primary_character: &str,
    category: FailureCategory,
) -> String {
    format!(
        "{}-page{:02}-{}-{}",
        scope,
        page_number,
        primary_character,
        category.as_str()
    )
}

/// Pure seed-to-descriptor synthesis. Identical seeds yield byte-identical
/// descriptors, so repeated failures and repeated views stay visually
/// stable. No URL templating happens here.
pub fn placeholder_art(seed: &str, category: FailureCategory) -> PlaceholderArt {
    let digest = Sha256::digest(seed.as_bytes());
    let (background, accent) = PLACEHOLDER_PALETTES[digest[0] as usize % PLACEHOLDER_PALETTES.len()];
    PlaceholderArt {
        category,
        seed: seed.to_string(),
        background: background.to_string(),
        accent: accent.to_string(),
        label: label_for(category),
    }
}

fn label_for(category: FailureCategory) -> String {
    match category {
        FailureCategory::FeatureUnsupported => "Illustrations aren't available here yet",
        FailureCategory::QuotaExceeded => "Illustration paused, try again in a little while",
        FailureCategory::AuthError => "Illustrations need to be set up again",
        FailureCategory::NetworkError => "No connection, this picture will arrive later",
        FailureCategory::GenericError => "This picture is still on its way",
    }
    .to_string()
}

/// Turns a raw model result into a page outcome.
///
/// A model failure or a text-only response becomes a classified `Fallback`;
/// the run is never aborted for those. A response object with no parts at
/// all is malformed input and surfaces as a fatal error instead. For page 1
/// the result also carries position hints for every mapping, success or not,
/// so later pages can reference the anchor image.
pub fn interpret(
    result: anyhow::Result<ImageModelResponse>,
    page_number: u32,
    mappings: &[CharacterMapping],
    ctx: &StoryContext,
) -> Result<InterpretedPage, StorybookError> {
    let primary_name = mappings
        .iter()
        .find(|m| m.role == CharacterRole::Primary)
        .map(|m| m.name.as_str())
        .unwrap_or("story");

    let fallback = |category: FailureCategory| {
        let seed = placeholder_seed(ctx.seed_scope(), page_number, primary_name, category);
        debug!("Page {} falling back ({}), seed {}", page_number, category, seed);
        InterpretedPage {
            outcome: GenerationOutcome::Fallback(placeholder_art(&seed, category)),
            position_hints: if page_number == 1 {
                generic_position_hints(mappings)
            } else {
                Vec::new()
            },
        }
    };

    match result {
        Ok(response) => {
            if response.parts.is_empty() {
                return Err(StorybookError::MalformedResponse(
                    "image model response contained no parts".to_string(),
                ));
            }
            match response.first_image() {
                Some(image) => {
                    let position_hints = if page_number == 1 {
                        extract_position_hints(&response.text(), mappings)
                    } else {
                        Vec::new()
                    };
                    Ok(InterpretedPage {
                        outcome: GenerationOutcome::Image(image.clone()),
                        position_hints,
                    })
                }
                None => {
                    // Text-only answer: the model described instead of drew.
                    let text = response.text();
                    warn!(
                        "Page {} got a text-only response, classifying: {}",
                        page_number,
                        text.chars().take(120).collect::<String>()
                    );
                    Ok(fallback(classify_error_text(&text)))
                }
            }
        }
        Err(error) => {
            let message = format!("{:#}", error);
            warn!("Page {} model call failed: {}", page_number, message);
            Ok(fallback(classify_error_text(&message)))
        }
    }
}

fn generic_position_hints(mappings: &[CharacterMapping]) -> Vec<(String, String)> {
    mappings
        .iter()
        .map(|m| {
            (
                m.character_id.clone(),
                m.role.default_reference_position().to_string(),
            )
        })
        .collect()
}

/// Best-effort layout detection from the model's prose: find the sentence
/// mentioning each character and map its location words onto a stable
/// phrase. Anything undetected falls back to the role-based sentence.
fn extract_position_hints(text: &str, mappings: &[CharacterMapping]) -> Vec<(String, String)> {
    let lower = text.to_lowercase();
    let sentences: Vec<&str> = lower
        .split(['.', '!', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    mappings
        .iter()
        .map(|mapping| {
            let name = mapping.name.to_lowercase();
            let hint = sentences
                .iter()
                .find(|s| s.contains(&name))
                .and_then(|s| position_phrase(s))
                .unwrap_or_else(|| mapping.role.default_reference_position().to_string());
            (mapping.character_id.clone(), hint)
        })
        .collect()
}

fn position_phrase(sentence: &str) -> Option<String> {
    let phrase = if sentence.contains("left") {
        "on the left side of the scene"
    } else if sentence.contains("right") {
        "on the right side of the scene"
    } else if sentence.contains("center") || sentence.contains("middle") {
        "in the center of the scene"
    } else if sentence.contains("background") || sentence.contains("behind") {
        "in the background of the scene"
    } else if sentence.contains("foreground") || sentence.contains("front") {
        "in the foreground of the scene"
    } else {
        return None;
    };
    Some(phrase.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::story::ImageData;
    use crate::services::image::ResponsePart;
    use anyhow::anyhow;

    fn mapping(name: &str, role: CharacterRole) -> CharacterMapping {
        CharacterMapping {
            character_id: name.to_lowercase(),
            name: name.to_string(),
            role,
            avatar_index: -1,
            visual_description: String::new(),
            position_in_reference: None,
        }
    }

    fn ctx() -> StoryContext {
        StoryContext {
            story_id: String::new(),
            title: "The Big Puddle".to_string(),
            concept: "puddle-adventure".to_string(),
            tone: "calm".to_string(),
        }
    }

    #[test]
    fn test_classification_priority_order() {
        assert_eq!(
            classify_error_text("Image output is not supported for this model"),
            FailureCategory::FeatureUnsupported
        );
        // "feature" outranks "quota" even when both appear.
        assert_eq!(
            classify_error_text("feature quota reached"),
            FailureCategory::FeatureUnsupported
        );
        assert_eq!(
            classify_error_text("429: QUOTA exceeded"),
            FailureCategory::QuotaExceeded
        );
        assert_eq!(
            classify_error_text("rate limit hit"),
            FailureCategory::QuotaExceeded
        );
        assert_eq!(
            classify_error_text("invalid API key"),
            FailureCategory::AuthError
        );
        assert_eq!(
            classify_error_text("authentication expired"),
            FailureCategory::AuthError
        );
        assert_eq!(
            classify_error_text("connection reset by peer"),
            FailureCategory::NetworkError
        );
        assert_eq!(
            classify_error_text("something odd happened"),
            FailureCategory::GenericError
        );
    }

    #[test]
    fn test_placeholder_seed_format() {
        let seed = placeholder_seed("puddle-adventure", 1, "Milo", FailureCategory::QuotaExceeded);
        assert_eq!(seed, "puddle-adventure-page01-Milo-quota-exceeded");
    }

    #[test]
    fn test_placeholder_art_is_pure() {
        let seed = placeholder_seed("s", 4, "Milo", FailureCategory::NetworkError);
        let a = placeholder_art(&seed, FailureCategory::NetworkError);
        let b = placeholder_art(&seed, FailureCategory::NetworkError);
        assert_eq!(a, b);
        assert!(a.background.starts_with('#'));
        assert!(!a.label.is_empty());
    }

    #[test]
    fn test_interpret_error_becomes_fallback_with_hints_on_page_one() {
        let mappings = vec![
            mapping("Milo", CharacterRole::Primary),
            mapping("Alice", CharacterRole::Secondary),
        ];
        let interpreted = interpret(
            Err(anyhow!("quota exceeded for model")),
            1,
            &mappings,
            &ctx(),
        )
        .unwrap();

        match &interpreted.outcome {
            GenerationOutcome::Fallback(art) => {
                assert_eq!(art.category, FailureCategory::QuotaExceeded);
                assert_eq!(art.seed, "puddle-adventure-page01-Milo-quota-exceeded");
            }
            other => panic!("expected fallback, got {:?}", other),
        }
        assert_eq!(interpreted.position_hints.len(), 2);
        assert_eq!(
            interpreted.position_hints[0].1,
            "in the center of the scene"
        );
    }

    #[test]
    fn test_interpret_error_on_later_page_has_no_hints() {
        let mappings = vec![mapping("Milo", CharacterRole::Primary)];
        let interpreted =
            interpret(Err(anyhow!("connection refused")), 3, &mappings, &ctx()).unwrap();
        assert!(interpreted.outcome.is_fallback());
        assert!(interpreted.position_hints.is_empty());
    }

    #[test]
    fn test_interpret_empty_response_is_malformed() {
        let mappings = vec![mapping("Milo", CharacterRole::Primary)];
        let err = interpret(
            Ok(ImageModelResponse { parts: vec![] }),
            2,
            &mappings,
            &ctx(),
        )
        .unwrap_err();
        assert_eq!(err.code(), "PROMPT_ERROR");
    }

    #[test]
    fn test_interpret_text_only_response_is_classified() {
        let mappings = vec![mapping("Milo", CharacterRole::Primary)];
        let response = ImageModelResponse {
            parts: vec![ResponsePart::Text(
                "Inline images are not supported for this request.".to_string(),
            )],
        };
        let interpreted = interpret(Ok(response), 2, &mappings, &ctx()).unwrap();
        match interpreted.outcome {
            GenerationOutcome::Fallback(art) => {
                assert_eq!(art.category, FailureCategory::FeatureUnsupported)
            }
            other => panic!("expected fallback, got {:?}", other),
        }
    }

    #[test]
    fn test_interpret_success_extracts_positions_from_prose() {
        let mappings = vec![
            mapping("Milo", CharacterRole::Primary),
            mapping("Alice", CharacterRole::Secondary),
            mapping("Bob", CharacterRole::Supporting),
        ];
        let response = ImageModelResponse {
            parts: vec![
                ResponsePart::Text(
                    "Milo splashes on the left. Alice waves in the background.".to_string(),
                ),
                ResponsePart::Image(ImageData {
                    bytes: vec![1],
                    mime_type: "image/png".to_string(),
                }),
            ],
        };
        let interpreted = interpret(Ok(response), 1, &mappings, &ctx()).unwrap();

        assert!(matches!(interpreted.outcome, GenerationOutcome::Image(_)));
        let hints: std::collections::HashMap<_, _> =
            interpreted.position_hints.into_iter().collect();
        assert_eq!(hints["milo"], "on the left side of the scene");
        assert_eq!(hints["alice"], "in the background of the scene");
        // Bob was not mentioned: role-based fallback.
        assert_eq!(hints["bob"], "in the background of the scene");
    }

    #[test]
    fn test_identical_inputs_yield_identical_fallbacks() {
        let mappings = vec![mapping("Milo", CharacterRole::Primary)];
        let a = interpret(Err(anyhow!("network down")), 2, &mappings, &ctx()).unwrap();
        let b = interpret(Err(anyhow!("network down")), 2, &mappings, &ctx()).unwrap();
        assert_eq!(a, b);
    }
}
