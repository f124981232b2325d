use anyhow::{Context, Result};
use log::debug;
use serde::Deserialize;

use crate::core::config::StyleOptions;
use crate::core::story::{StoryContext, StoryPageDraft};
use crate::services::llm::LlmClient;

const SYSTEM_PROMPT: &str = "You are a writer of short picture-book stories for young children \
    with Gestalt Language Processing needs. Use simple, natural, repeatable phrases. \
    Return only valid JSON, with no commentary.";

/// Builds story-text prompts and parses the model's JSON answers. The
/// regeneration coordinator drives this; the model itself stays behind
/// `LlmClient`.
pub struct StoryTextGenerator<'a> {
    llm: &'a dyn LlmClient,
    style: &'a StyleOptions,
}

impl<'a> StoryTextGenerator<'a> {
    pub fn new(llm: &'a dyn LlmClient, style: &'a StyleOptions) -> Self {
        Self { llm, style }
    }

    /// Generates a fresh story as exactly `page_count` page texts.
    pub async fn generate_story_text(
        &self,
        title: &str,
        concept: &str,
        character_names: &[String],
        page_count: usize,
    ) -> Result<Vec<String>> {
        let prompt = format!(
            "Write a {page_count}-page picture-book story titled \"{title}\".\
            \nConcept: {concept}\
            \nCharacters: {characters}\
            \nIllustration style for context: {style}\
            \n\nRules:\
            \n- Exactly {page_count} pages, one or two short sentences per page.\
            \n- Use simple, repeatable phrases a young child can echo.\
            \n- Every page must be illustratable as a single scene.\
            \n\nReturn only a JSON array of exactly {page_count} strings, one per page.",
            page_count = page_count,
            title = title,
            concept = concept,
            characters = join_names(character_names),
            style = self.style.illustration_style,
        );

        let response = self.llm.chat(SYSTEM_PROMPT, &prompt).await?;
        let pages = parse_page_array(&response)?;
        ensure_page_count(&pages, page_count)?;
        Ok(pages)
    }

    /// Regenerates every page's text for an existing story, keeping the page
    /// count. The optional instruction steers the rewrite.
    pub async fn regenerate_all(
        &self,
        pages: &[StoryPageDraft],
        ctx: &StoryContext,
        character_names: &[String],
        custom_instruction: Option<&str>,
    ) -> Result<Vec<String>> {
        let current = pages
            .iter()
            .map(|p| format!("Page {}: {}", p.page_number, p.text))
            .collect::<Vec<_>>()
            .join("\n");

        let instruction = custom_instruction
            .map(|i| format!("\nRewrite instruction: {}", i))
            .unwrap_or_default();

        let prompt = format!(
            "Rewrite this {count}-page picture-book story titled \"{title}\".\
            \nConcept: {concept} (tone: {tone})\
            \nCharacters: {characters}\
            \nCurrent story:\n{current}{instruction}\
            \n\nKeep exactly {count} pages and the same overall arc. Use simple, \
            repeatable phrases a young child can echo.\
            \nReturn only a JSON array of exactly {count} strings, one per page.",
            count = pages.len(),
            title = ctx.title,
            concept = ctx.concept,
            tone = ctx.tone,
            characters = join_names(character_names),
            current = current,
            instruction = instruction,
        );

        let response = self.llm.chat(SYSTEM_PROMPT, &prompt).await?;
        let texts = parse_page_array(&response)?;
        ensure_page_count(&texts, pages.len())?;
        Ok(texts)
    }

    /// Regenerates a single page's text, using everything before it as
    /// continuity context.
    pub async fn regenerate_single(
        &self,
        page_number: u32,
        pages: &[StoryPageDraft],
        ctx: &StoryContext,
        custom_instruction: Option<&str>,
    ) -> Result<String> {
        let target = pages
            .iter()
            .find(|p| p.page_number == page_number)
            .with_context(|| format!("Page {} not found in story", page_number))?;

        let preceding = pages
            .iter()
            .filter(|p| p.page_number < page_number)
            .map(|p| format!("Page {}: {}", p.page_number, p.text))
            .collect::<Vec<_>>()
            .join("\n");

        let following = pages
            .iter()
            .find(|p| p.page_number == page_number + 1)
            .map(|p| format!("\nThe next page reads: {}", p.text))
            .unwrap_or_default();

        let instruction = custom_instruction
            .map(|i| format!("\nRewrite instruction: {}", i))
            .unwrap_or_default();

        let prompt = format!(
            "Rewrite page {page_number} of the picture-book story \"{title}\" \
            (concept: {concept}, tone: {tone}).\
            \nThe story so far:\n{preceding}\
            \nThe current page {page_number} reads: {current}{following}{instruction}\
            \n\nWrite a replacement for page {page_number} only: one or two short \
            sentences with simple, repeatable phrasing that fits between its \
            neighbors.\
            \nReturn only a JSON object: {{ \"text\": \"...\" }}",
            page_number = page_number,
            title = ctx.title,
            concept = ctx.concept,
            tone = ctx.tone,
            preceding = if preceding.is_empty() {
                "(this is the first page)".to_string()
            } else {
                preceding
            },
            current = target.text,
            following = following,
            instruction = instruction,
        );

        let response = self.llm.chat(SYSTEM_PROMPT, &prompt).await?;
        let clean = strip_code_blocks(&response);

        #[derive(Deserialize)]
        struct SinglePage {
            text: String,
        }
        let parsed: SinglePage = serde_json::from_str(&clean)
            .context(format!("Failed to parse single-page JSON: {}", clean))?;
        debug!("Regenerated page {} text ({} chars)", page_number, parsed.text.len());
        Ok(parsed.text)
    }
}

fn join_names(names: &[String]) -> String {
    if names.is_empty() {
        "none (a character-free story)".to_string()
    } else {
        names.join(", ")
    }
}

fn parse_page_array(response: &str) -> Result<Vec<String>> {
    let clean = strip_code_blocks(response);
    serde_json::from_str(&clean).context(format!("Failed to parse page array JSON: {}", clean))
}

fn ensure_page_count(pages: &[String], expected: usize) -> Result<()> {
    anyhow::ensure!(
        pages.len() == expected,
        "Model returned {} pages, expected {}",
        pages.len(),
        expected
    );
    Ok(())
}

/// Strips markdown code fences the model sometimes wraps JSON in.
pub fn strip_code_blocks(s: &str) -> String {
    let s = s.trim();
    if s.starts_with("```json") {
        s.trim_start_matches("```json")
            .trim_end_matches("```")
            .trim()
            .to_string()
    } else if s.starts_with("```") {
        s.trim_start_matches("```")
            .trim_end_matches("```")
            .trim()
            .to_string()
    } else {
        s.to_string()
    }
}
