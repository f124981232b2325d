use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::core::config::StyleOptions;
use crate::core::error::StorybookError;
use crate::core::story::{
    Character, CharacterMapping, GenerationOutcome, GenerationProgress, IllustratedPage,
    ImageData, SceneContext, StoryContext, StoryPageDraft,
};
use crate::services::allocator::validate_mappings;
use crate::services::image::{AvatarSource, ImageModel};
use crate::services::interpret::interpret;
use crate::services::prompt::{compose, NarrativeWindow, ReferenceSet};

/// Cooperative cancellation signal. The controller checks it only between
/// pages: an in-flight page always completes to a recorded outcome.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything a finished (or cancelled) run hands back: recorded pages in
/// order, the mappings with their page-1 positions filled in, and whether
/// the run reached the last page.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub pages: Vec<IllustratedPage>,
    pub mappings: Vec<CharacterMapping>,
    pub completed: bool,
}

/// Drives page-by-page illustration, strictly sequentially.
///
/// Page 1 is generated against the raw avatar references; its output image
/// becomes the visual anchor every later page is generated against. That
/// causal chain is why there is no parallel generation here: page i+1's
/// prompt cannot exist until page i (and above all page 1) is recorded.
pub struct SequentialGenerationController<'a> {
    image_model: &'a dyn ImageModel,
    avatar_source: &'a dyn AvatarSource,
    style: &'a StyleOptions,
}

impl<'a> SequentialGenerationController<'a> {
    pub fn new(
        image_model: &'a dyn ImageModel,
        avatar_source: &'a dyn AvatarSource,
        style: &'a StyleOptions,
    ) -> Self {
        Self {
            image_model,
            avatar_source,
            style,
        }
    }

    /// Illustrates every page in ascending page order, emitting a progress
    /// callback after each recorded page.
    ///
    /// Model failures never abort the run: they are classified and recorded
    /// as fallback outcomes. Only allocation and prompt errors (programmer
    /// errors) propagate.
    pub async fn run(
        &self,
        pages: &[StoryPageDraft],
        characters: &[Character],
        mappings: Vec<CharacterMapping>,
        scene: &SceneContext,
        ctx: &StoryContext,
        cancel: &CancelFlag,
        mut on_progress: impl FnMut(&GenerationProgress),
    ) -> Result<RunOutput, StorybookError> {
        validate_mappings(&mappings)?;
        let mut mappings = mappings;

        let mut ordered: Vec<&StoryPageDraft> = pages.iter().collect();
        ordered.sort_by_key(|p| p.page_number);
        for (i, page) in ordered.iter().enumerate() {
            if page.page_number != (i + 1) as u32 {
                warn!(
                    "Page numbering is not contiguous from 1 (found page {} at position {})",
                    page.page_number,
                    i + 1
                );
                break;
            }
        }

        let total = ordered.len() as u32;
        if total == 0 {
            return Ok(RunOutput {
                pages: Vec::new(),
                mappings,
                completed: true,
            });
        }

        let avatar_references = self.fetch_avatar_references(characters, &mappings).await;
        info!(
            "Starting illustration run: {} page(s), {} avatar reference(s)",
            total,
            avatar_references.len()
        );

        let mut anchor: Option<ImageData> = None;
        let mut results: Vec<IllustratedPage> = Vec::new();
        let mut completed = true;

        for (index, page) in ordered.iter().enumerate() {
            if index > 0 && cancel.is_cancelled() {
                info!("Run cancelled after {} recorded page(s)", index);
                completed = false;
                break;
            }

            debug!("Generating page {}", page.page_number);
            let references = if index == 0 {
                if avatar_references.is_empty() {
                    ReferenceSet::None
                } else {
                    ReferenceSet::Avatars(avatar_references.clone())
                }
            } else {
                match &anchor {
                    Some(image) => ReferenceSet::PageOne(image.clone()),
                    None => ReferenceSet::None,
                }
            };

            let narrative = NarrativeWindow {
                page_number: page.page_number,
                total_pages: total,
                previous_text: index.checked_sub(1).map(|i| ordered[i].text.as_str()),
                next_text: ordered.get(index + 1).map(|p| p.text.as_str()),
                concept: &ctx.concept,
                tone: &ctx.tone,
            };

            let request = compose(page, &mappings, scene, &narrative, self.style, &references)?;
            let result = self.image_model.generate(&request).await;
            let interpreted = interpret(result, page.page_number, &mappings, ctx)?;

            if index == 0 {
                if let GenerationOutcome::Image(image) = &interpreted.outcome {
                    anchor = Some(image.clone());
                }
                apply_position_hints(&mut mappings, &interpreted.position_hints);
            }

            results.push(IllustratedPage {
                page_number: page.page_number,
                text: page.text.clone(),
                outcome: interpreted.outcome,
            });

            let done = (index + 1) as u32;
            let progress = GenerationProgress {
                current_page: page.page_number,
                total_pages: total,
                percent: ((done * 100) / total) as u8,
                message: format!("Illustrated page {} of {}", page.page_number, total),
            };
            info!("{}", progress.message);
            on_progress(&progress);
        }

        Ok(RunOutput {
            pages: results,
            mappings,
            completed,
        })
    }

    /// Fetches avatar bytes for every slot-holding mapping whose character
    /// has an avatar url. A failed fetch degrades that character to its
    /// textual description instead of failing the run.
    async fn fetch_avatar_references(
        &self,
        characters: &[Character],
        mappings: &[CharacterMapping],
    ) -> Vec<(u8, ImageData)> {
        let mut references = Vec::new();
        for mapping in mappings.iter().filter(|m| m.has_reference_slot()) {
            let Some(character) = characters.iter().find(|c| c.id == mapping.character_id) else {
                continue;
            };
            let Some(avatar_url) = character.avatar_url.as_deref() else {
                continue;
            };
            match self.avatar_source.fetch(avatar_url).await {
                Ok(image) => references.push((mapping.avatar_index as u8, image)),
                Err(error) => warn!(
                    "Avatar fetch for {} failed, using description instead: {:#}",
                    mapping.name, error
                ),
            }
        }
        references
    }
}

fn apply_position_hints(mappings: &mut [CharacterMapping], hints: &[(String, String)]) {
    for (character_id, position) in hints {
        if let Some(mapping) = mappings.iter_mut().find(|m| &m.character_id == character_id) {
            mapping.position_in_reference = Some(position.clone());
        }
    }
}
