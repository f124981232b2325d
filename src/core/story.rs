use serde::{Deserialize, Serialize};

use crate::core::error::FailureCategory;

/// The image model accepts at most this many reference images per call.
/// Everything in the allocator budgets against this number.
pub const MAX_REFERENCE_SLOTS: usize = 3;

/// Avatar index for characters rendered from their textual description only.
pub const NO_REFERENCE_SLOT: i8 = -1;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VisualProfile {
    #[serde(default)]
    pub appearance: String,
    #[serde(default)]
    pub style: String,
    #[serde(default)]
    pub personality: String,
    #[serde(default)]
    pub key_features: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Character {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub visual_profile: VisualProfile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CharacterRole {
    Primary,
    Secondary,
    Supporting,
}

impl CharacterRole {
    /// Where a character of this role is assumed to sit in the page-1
    /// reference image when no finer position was detected.
    pub fn default_reference_position(&self) -> &'static str {
        match self {
            CharacterRole::Primary => "in the center of the scene",
            CharacterRole::Secondary => "beside the main character",
            CharacterRole::Supporting => "in the background of the scene",
        }
    }
}

/// Per-story placement of one character, rebuilt for every generation or
/// regeneration request. `avatar_index` is the character's reference slot
/// (0..=2) or `NO_REFERENCE_SLOT`. `position_in_reference` stays `None`
/// until page 1 has been recorded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CharacterMapping {
    pub character_id: String,
    pub name: String,
    pub role: CharacterRole,
    pub avatar_index: i8,
    pub visual_description: String,
    #[serde(default)]
    pub position_in_reference: Option<String>,
}

impl CharacterMapping {
    pub fn has_reference_slot(&self) -> bool {
        self.avatar_index >= 0
    }
}

/// Scene directives held constant across a story unless explicitly changed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SceneContext {
    pub setting: String,
    pub mood: String,
    pub color_palette: Vec<String>,
    pub visual_style: String,
}

impl SceneContext {
    /// Derives a stable scene from the story concept and tone. Callers that
    /// hold richer scene data build the struct directly instead.
    pub fn from_concept(concept: &str, tone: &str) -> Self {
        let lower = concept.to_lowercase();
        let setting = if lower.contains("forest") || lower.contains("woods") {
            "a sunlit forest clearing"
        } else if lower.contains("sea") || lower.contains("ocean") || lower.contains("beach") {
            "a calm seaside shore"
        } else if lower.contains("space") || lower.contains("star") || lower.contains("moon") {
            "a friendly starry sky"
        } else if lower.contains("school") {
            "a bright classroom"
        } else if lower.contains("farm") {
            "a cheerful farmyard"
        } else {
            "a cozy home and its neighborhood"
        };

        let tone_lower = tone.to_lowercase();
        let (mood, color_palette) = if tone_lower.contains("calm") || tone_lower.contains("gentle")
        {
            (
                "calm and reassuring",
                vec!["soft blue", "sage green", "cream"],
            )
        } else if tone_lower.contains("excit") || tone_lower.contains("adventur") {
            (
                "bright and adventurous",
                vec!["sunny yellow", "sky blue", "coral"],
            )
        } else if tone_lower.contains("silly") || tone_lower.contains("funny") {
            (
                "playful and silly",
                vec!["bubblegum pink", "lime green", "orange"],
            )
        } else {
            ("warm and friendly", vec!["warm amber", "teal", "blush"])
        };

        SceneContext {
            setting: setting.to_string(),
            mood: mood.to_string(),
            color_palette: color_palette.into_iter().map(String::from).collect(),
            visual_style: "soft storybook watercolor".to_string(),
        }
    }
}

/// One page of a story draft. Pages are 1-indexed and contiguous.
/// `is_edited` is set only by direct user edits and cleared by any AI
/// (re)generation of the page's text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoryPageDraft {
    pub page_number: u32,
    pub text: String,
    #[serde(default)]
    pub is_edited: bool,
    #[serde(default)]
    pub visual_context: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageData {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// Deterministic stand-in for a missing illustration. Built purely from its
/// seed so repeated failures render identically.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlaceholderArt {
    pub category: FailureCategory,
    pub seed: String,
    pub background: String,
    pub accent: String,
    pub label: String,
}

/// What a page's generation produced: a real illustration, or a classified
/// deterministic placeholder.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GenerationOutcome {
    Image(ImageData),
    Fallback(PlaceholderArt),
}

impl GenerationOutcome {
    pub fn is_fallback(&self) -> bool {
        matches!(self, GenerationOutcome::Fallback(_))
    }
}

/// Finalized page record handed to the application tier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IllustratedPage {
    pub page_number: u32,
    pub text: String,
    pub outcome: GenerationOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationProgress {
    pub current_page: u32,
    pub total_pages: u32,
    pub percent: u8,
    pub message: String,
}

/// Explicit story-scoped context threaded through every pipeline call.
/// Nothing in the pipeline reads ambient user or profile state.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StoryContext {
    pub story_id: String,
    pub title: String,
    pub concept: String,
    pub tone: String,
}

impl StoryContext {
    /// Identifier used to seed deterministic placeholder art: the story id
    /// when one exists, otherwise the concept.
    pub fn seed_scope(&self) -> &str {
        if self.story_id.is_empty() {
            &self.concept
        } else {
            &self.story_id
        }
    }
}

/// A single image-model call: text instructions plus ordered reference
/// images, never more than `MAX_REFERENCE_SLOTS` of them.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub text_prompt: String,
    pub images: Vec<ImageData>,
}
