use std::collections::HashSet;
use std::io::{Cursor, Write};

use cardgen_contracts::error::{StudioError, StudioResult};
use cardgen_contracts::kinds::GeneratorKind;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const DEFAULT_ARCHIVE_NAME: &str = "all_images.zip";

const MAX_STEM_CHARS: usize = 64;

#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// `{kind}_{prompt}_{position}.png`, falling back to `prompt{index}` when the
/// prompt has no usable characters.
pub fn entry_file_name(
    kind: GeneratorKind,
    prompt_text: &str,
    prompt_index: usize,
    position: usize,
) -> String {
    let stem = entry_stem(prompt_text, prompt_index);
    format!("{}_{stem}_{position}.png", kind.as_str())
}

fn entry_stem(prompt_text: &str, prompt_index: usize) -> String {
    let stem = sanitize_stem(prompt_text);
    if stem.is_empty() {
        format!("prompt{prompt_index}")
    } else {
        stem
    }
}

/// Hands out entry names that are unique within one archive. Distinct
/// prompts can sanitize to the same stem; later ones get their prompt index
/// appended, then a counter if that is taken too.
#[derive(Debug, Default)]
pub struct ArchiveNames {
    used: HashSet<String>,
}

impl ArchiveNames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(
        &mut self,
        kind: GeneratorKind,
        prompt_text: &str,
        prompt_index: usize,
        position: usize,
    ) -> String {
        let name = entry_file_name(kind, prompt_text, prompt_index, position);
        if self.used.insert(name.clone()) {
            return name;
        }
        let stem = entry_stem(prompt_text, prompt_index);
        let mut suffix = format!("{prompt_index}");
        let mut attempt = 1usize;
        loop {
            let name = format!("{}_{stem}-{suffix}_{position}.png", kind.as_str());
            if self.used.insert(name.clone()) {
                return name;
            }
            attempt += 1;
            suffix = format!("{prompt_index}-{attempt}");
        }
    }
}

pub fn sanitize_stem(text: &str) -> String {
    let replaced: String = text
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' {
                ch
            } else {
                '_'
            }
        })
        .collect();
    let mut collapsed = String::with_capacity(replaced.len());
    for ch in replaced.chars() {
        if ch == '_' && collapsed.ends_with('_') {
            continue;
        }
        collapsed.push(ch);
    }
    collapsed
        .trim_matches('_')
        .chars()
        .take(MAX_STEM_CHARS)
        .collect::<String>()
        .trim_end_matches('_')
        .to_string()
}

/// Writes `entries` into an uncompressed zip held in memory. PNG data is
/// already compressed, so entries are stored as-is.
pub fn pack_archive(entries: &[ArchiveEntry]) -> StudioResult<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    for entry in entries {
        writer
            .start_file(entry.name.as_str(), options)
            .map_err(|err| export_error(&entry.name, err))?;
        writer
            .write_all(&entry.bytes)
            .map_err(|err| export_error(&entry.name, err))?;
    }
    let cursor = writer
        .finish()
        .map_err(|err| StudioError::Export(format!("failed to finalize archive: {err}")))?;
    Ok(cursor.into_inner())
}

fn export_error(name: &str, err: impl std::fmt::Display) -> StudioError {
    StudioError::Export(format!("failed to add '{name}' to archive: {err}"))
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Read};

    use cardgen_contracts::kinds::GeneratorKind;
    use zip::{CompressionMethod, ZipArchive};

    use super::{entry_file_name, pack_archive, sanitize_stem, ArchiveEntry, ArchiveNames};

    #[test]
    fn stems_keep_safe_characters_only() {
        assert_eq!(sanitize_stem("rocket"), "rocket");
        assert_eq!(sanitize_stem("  sales / ops: Q3  "), "sales_ops_Q3");
        assert_eq!(sanitize_stem("data-flow"), "data-flow");
        assert_eq!(sanitize_stem("???"), "");
        assert_eq!(sanitize_stem(&"a".repeat(100)).len(), 64);
    }

    #[test]
    fn file_names_fall_back_to_prompt_index() {
        assert_eq!(
            entry_file_name(GeneratorKind::Icon, "gear", 2, 3),
            "icon_gear_3.png"
        );
        assert_eq!(
            entry_file_name(GeneratorKind::Diagram, "!!!", 2, 1),
            "diagram_prompt2_1.png"
        );
    }

    #[test]
    fn archive_names_never_repeat() {
        let mut names = ArchiveNames::new();
        assert_eq!(
            names.claim(GeneratorKind::Icon, "sales/ops", 1, 1),
            "icon_sales_ops_1.png"
        );
        assert_eq!(
            names.claim(GeneratorKind::Icon, "sales ops", 2, 1),
            "icon_sales_ops-2_1.png"
        );
        assert_eq!(
            names.claim(GeneratorKind::Icon, "sales_ops-2", 3, 1),
            "icon_sales_ops-2-3_1.png"
        );
        assert_eq!(
            names.claim(GeneratorKind::Icon, "sales ops", 2, 1),
            "icon_sales_ops-2-2_1.png"
        );
    }

    #[test]
    fn archive_stores_entries_in_order() -> anyhow::Result<()> {
        let bytes = pack_archive(&[
            ArchiveEntry {
                name: "icon_a_1.png".to_string(),
                bytes: b"first".to_vec(),
            },
            ArchiveEntry {
                name: "icon_b_2.png".to_string(),
                bytes: b"second".to_vec(),
            },
        ])?;
        let mut archive = ZipArchive::new(Cursor::new(bytes))?;
        assert_eq!(archive.len(), 2);

        let mut second = archive.by_index(1)?;
        assert_eq!(second.name(), "icon_b_2.png");
        assert_eq!(second.compression(), CompressionMethod::Stored);
        let mut contents = Vec::new();
        second.read_to_end(&mut contents)?;
        assert_eq!(contents, b"second");
        Ok(())
    }

    #[test]
    fn empty_archive_is_still_valid() -> anyhow::Result<()> {
        let bytes = pack_archive(&[])?;
        let archive = ZipArchive::new(Cursor::new(bytes))?;
        assert_eq!(archive.len(), 0);
        Ok(())
    }
}
