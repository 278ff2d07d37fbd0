use cardgen_contracts::error::{StudioError, StudioResult};
use cardgen_contracts::kinds::GeneratorKind;
use image::DynamicImage;
use indexmap::IndexMap;

use crate::export::{entry_file_name, pack_archive, ArchiveEntry, ArchiveNames};
use crate::normalize::encode_png;
use crate::orchestrator::GenerationResult;

#[derive(Debug, Clone, Default)]
pub enum EditState {
    #[default]
    Gallery,
    Editing {
        selected: DynamicImage,
    },
}

/// One image in a kind's flattened listing.
#[derive(Debug, Clone, Copy)]
pub struct GalleryEntry<'a> {
    /// 1-based position across the whole kind bucket.
    pub position: usize,
    /// 1-based position of the prompt within the bucket.
    pub prompt_index: usize,
    pub prompt_text: &'a str,
    /// 1-based position within the prompt's images.
    pub variation: usize,
    pub image: &'a DynamicImage,
}

impl GalleryEntry<'_> {
    pub fn file_name(&self, kind: GeneratorKind) -> String {
        entry_file_name(kind, self.prompt_text, self.prompt_index, self.variation)
    }
}

/// Images generated during one session, bucketed by kind and grouped by
/// prompt in generation order, plus the edit-mode slot.
#[derive(Debug, Clone, Default)]
pub struct GalleryState {
    buckets: IndexMap<GeneratorKind, IndexMap<String, Vec<DynamicImage>>>,
    edit: EditState,
}

impl GalleryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, result: &GenerationResult) {
        self.buckets
            .entry(result.kind)
            .or_default()
            .entry(result.prompt_text.clone())
            .or_default()
            .push(result.image.clone());
    }

    /// Drops every image recorded for `kind`; other kinds are untouched.
    pub fn clear_kind(&mut self, kind: GeneratorKind) {
        self.buckets.shift_remove(&kind);
    }

    pub fn prompts(&self, kind: GeneratorKind) -> impl Iterator<Item = (&str, &[DynamicImage])> {
        self.buckets
            .get(&kind)
            .into_iter()
            .flat_map(|prompts| prompts.iter())
            .map(|(prompt, images)| (prompt.as_str(), images.as_slice()))
    }

    pub fn count(&self, kind: GeneratorKind) -> usize {
        self.prompts(kind).map(|(_, images)| images.len()).sum()
    }

    pub fn total_count(&self) -> usize {
        self.buckets
            .values()
            .flat_map(|prompts| prompts.values())
            .map(Vec::len)
            .sum()
    }

    pub fn entries(&self, kind: GeneratorKind) -> Vec<GalleryEntry<'_>> {
        let mut entries = Vec::new();
        for (prompt_idx, (prompt_text, images)) in self.prompts(kind).enumerate() {
            for (image_idx, image) in images.iter().enumerate() {
                entries.push(GalleryEntry {
                    position: entries.len() + 1,
                    prompt_index: prompt_idx + 1,
                    prompt_text,
                    variation: image_idx + 1,
                    image,
                });
            }
        }
        entries
    }

    pub fn entry(&self, kind: GeneratorKind, position: usize) -> Option<GalleryEntry<'_>> {
        if position == 0 {
            return None;
        }
        self.entries(kind).into_iter().nth(position - 1)
    }

    pub fn select(&mut self, image: DynamicImage) {
        self.edit = EditState::Editing { selected: image };
    }

    /// Swaps the image being edited. Returns false outside edit mode.
    pub fn replace_selected(&mut self, image: DynamicImage) -> bool {
        match &mut self.edit {
            EditState::Editing { selected } => {
                *selected = image;
                true
            }
            EditState::Gallery => false,
        }
    }

    pub fn exit_edit(&mut self) {
        self.edit = EditState::Gallery;
    }

    pub fn selected_image(&self) -> Option<&DynamicImage> {
        match &self.edit {
            EditState::Editing { selected } => Some(selected),
            EditState::Gallery => None,
        }
    }

    pub fn edit_mode_active(&self) -> bool {
        matches!(self.edit, EditState::Editing { .. })
    }

    /// Packs every image of `kind` into a zip archive, prompts then images
    /// in insertion order. Refused when fewer than `min_images` exist.
    pub fn export_all(&self, kind: GeneratorKind, min_images: usize) -> StudioResult<Vec<u8>> {
        let count = self.count(kind);
        if count < min_images.max(1) {
            return Err(StudioError::validation(format!(
                "Export needs at least {} {kind} image(s); the gallery has {count}.",
                min_images.max(1)
            )));
        }
        let mut names = ArchiveNames::new();
        let mut archive_entries = Vec::with_capacity(count);
        for entry in self.entries(kind) {
            archive_entries.push(ArchiveEntry {
                name: names.claim(kind, entry.prompt_text, entry.prompt_index, entry.variation),
                bytes: encode_png(entry.image)?,
            });
        }
        pack_archive(&archive_entries)
    }
}
