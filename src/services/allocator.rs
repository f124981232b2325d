use anyhow::Result;
use async_trait::async_trait;
use log::{debug, warn};

use crate::core::error::StorybookError;
use crate::core::story::{
    Character, CharacterMapping, CharacterRole, MAX_REFERENCE_SLOTS, NO_REFERENCE_SLOT,
};

/// Inbound collaborator: whatever the application tier stores characters in.
#[async_trait]
pub trait CharacterStore: Send + Sync {
    async fn fetch_characters(&self, ids: &[String]) -> Result<Vec<Character>>;
}

/// Assigns the bounded avatar reference budget across the requested
/// characters. Strictly deterministic and total: any valid input yields a
/// mapping list, never an error.
///
/// Priority order:
/// 1. The child profile, when present, comes first: forced primary, slot 0.
///    Children are always description-based (no avatar url).
/// 2. Remaining selected characters keep their selection order. Those with
///    an avatar consume increasing free slots until the budget is spent.
/// 3. Everyone past the budget, and every avatar-less character, gets
///    `NO_REFERENCE_SLOT` and relies on `visual_description`.
/// 4. Roles follow arrival order into the list: first primary, second
///    secondary, the rest supporting.
pub fn allocate(
    characters: &[Character],
    selected_ids: &[String],
    child_profile: Option<&Character>,
) -> Vec<CharacterMapping> {
    let mut mappings: Vec<CharacterMapping> = Vec::new();
    let mut next_slot: i8 = 0;

    if let Some(child) = child_profile {
        mappings.push(CharacterMapping {
            character_id: child.id.clone(),
            name: child.name.clone(),
            role: CharacterRole::Primary,
            avatar_index: next_slot,
            visual_description: describe(child),
            position_in_reference: None,
        });
        next_slot += 1;
    }

    for id in selected_ids {
        if child_profile.is_some_and(|c| &c.id == id) {
            continue;
        }
        let Some(character) = characters.iter().find(|c| &c.id == id) else {
            warn!("Selected character {} not found, skipping", id);
            continue;
        };

        let avatar_index =
            if character.avatar_url.is_some() && (next_slot as usize) < MAX_REFERENCE_SLOTS {
                let slot = next_slot;
                next_slot += 1;
                slot
            } else {
                NO_REFERENCE_SLOT
            };

        mappings.push(CharacterMapping {
            character_id: character.id.clone(),
            name: character.name.clone(),
            role: CharacterRole::Supporting,
            avatar_index,
            visual_description: describe(character),
            position_in_reference: None,
        });
    }

    for (i, mapping) in mappings.iter_mut().enumerate() {
        mapping.role = match i {
            0 => CharacterRole::Primary,
            1 => CharacterRole::Secondary,
            _ => CharacterRole::Supporting,
        };
    }

    debug!(
        "Allocated {} mapping(s), {} holding reference slots",
        mappings.len(),
        mappings.iter().filter(|m| m.has_reference_slot()).count()
    );
    mappings
}

/// Fetches the selected characters and allocates in one step.
pub async fn allocate_from_store(
    store: &dyn CharacterStore,
    selected_ids: &[String],
    child_profile: Option<&Character>,
) -> Result<Vec<CharacterMapping>> {
    let characters = store.fetch_characters(selected_ids).await?;
    Ok(allocate(&characters, selected_ids, child_profile))
}

/// Full textual appearance contract for prompt composition: appearance (or a
/// generic sentence), plus style and key features when the profile has them.
fn describe(character: &Character) -> String {
    let profile = &character.visual_profile;
    let mut description = if profile.appearance.trim().is_empty() {
        format!("A friendly storybook character named {}", character.name)
    } else {
        profile.appearance.trim().to_string()
    };
    if !profile.style.trim().is_empty() {
        description.push_str(&format!(", drawn in a {} style", profile.style.trim()));
    }
    if !profile.key_features.is_empty() {
        description.push_str(&format!(
            "; notable features: {}",
            profile.key_features.join(", ")
        ));
    }
    description
}

/// Checks the allocation invariants the rest of the pipeline depends on.
/// A violation means a caller built mappings by hand and got them wrong.
pub fn validate_mappings(mappings: &[CharacterMapping]) -> Result<(), StorybookError> {
    let mut seen_slots = [false; MAX_REFERENCE_SLOTS];
    let mut primaries = 0;

    for mapping in mappings {
        if mapping.avatar_index < NO_REFERENCE_SLOT
            || mapping.avatar_index >= MAX_REFERENCE_SLOTS as i8
        {
            return Err(StorybookError::Allocation(format!(
                "avatar index {} for {} is out of range",
                mapping.avatar_index, mapping.name
            )));
        }
        if mapping.avatar_index >= 0 {
            let slot = mapping.avatar_index as usize;
            if seen_slots[slot] {
                return Err(StorybookError::Allocation(format!(
                    "reference slot {} assigned twice",
                    slot
                )));
            }
            seen_slots[slot] = true;
        }
        if mapping.role == CharacterRole::Primary {
            primaries += 1;
        }
    }

    if !mappings.is_empty() && primaries != 1 {
        return Err(StorybookError::Allocation(format!(
            "expected exactly one primary character, found {}",
            primaries
        )));
    }

    Ok(())
}
