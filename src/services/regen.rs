use anyhow::Result;
use log::info;

use crate::core::config::StyleOptions;
use crate::core::story::{StoryContext, StoryPageDraft};
use crate::services::llm::LlmClient;
use crate::services::storytext::StoryTextGenerator;

/// Re-runs story-text generation while preserving everything it does not
/// touch. Text only: illustrations are not regenerated here, they are
/// lazily re-run by the sequential controller when the caller next asks
/// for them.
///
/// Any AI-produced page text clears `is_edited`; only direct user edits set
/// it.
pub struct RegenerationCoordinator<'a> {
    llm: &'a dyn LlmClient,
    style: &'a StyleOptions,
}

impl<'a> RegenerationCoordinator<'a> {
    pub fn new(llm: &'a dyn LlmClient, style: &'a StyleOptions) -> Self {
        Self { llm, style }
    }

    /// Regenerates every page's text, preserving page count and numbering.
    /// Every produced page comes back with `is_edited = false`.
    pub async fn regenerate_story(
        &self,
        pages: &[StoryPageDraft],
        ctx: &StoryContext,
        character_names: &[String],
        custom_instruction: Option<&str>,
    ) -> Result<Vec<StoryPageDraft>> {
        if pages.is_empty() {
            return Ok(Vec::new());
        }

        let generator = StoryTextGenerator::new(self.llm, self.style);
        let texts = generator
            .regenerate_all(pages, ctx, character_names, custom_instruction)
            .await?;

        info!("Regenerated all {} page(s) of {}", texts.len(), ctx.title);
        Ok(pages
            .iter()
            .zip(texts)
            .map(|(original, text)| StoryPageDraft {
                page_number: original.page_number,
                text,
                is_edited: false,
                visual_context: None,
            })
            .collect())
    }

    /// Regenerates exactly one page's text against the accumulated story so
    /// far and returns the replacement draft. Every other page is left
    /// untouched; callers splice the result in themselves.
    pub async fn regenerate_page(
        &self,
        page_number: u32,
        pages: &[StoryPageDraft],
        ctx: &StoryContext,
        custom_instruction: Option<&str>,
    ) -> Result<StoryPageDraft> {
        let generator = StoryTextGenerator::new(self.llm, self.style);
        let text = generator
            .regenerate_single(page_number, pages, ctx, custom_instruction)
            .await?;

        info!("Regenerated page {} of {}", page_number, ctx.title);
        Ok(StoryPageDraft {
            page_number,
            text,
            is_edited: false,
            visual_context: None,
        })
    }
}
