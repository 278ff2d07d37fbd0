use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{StudioError, StudioResult};
use crate::kinds::GeneratorKind;

pub const MAX_REFERENCE_IMAGES: usize = 4;
pub const DEFAULT_MAX_VARIATIONS: u32 = 10;

/// Dimension presets accepted by the image endpoints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageSize {
    #[serde(rename = "256x256")]
    Square256,
    #[serde(rename = "512x512")]
    Square512,
    #[serde(rename = "1024x1024")]
    Square1024,
    #[serde(rename = "1536x1024")]
    Landscape,
    #[serde(rename = "1024x1536")]
    Portrait,
    #[default]
    #[serde(rename = "auto")]
    Auto,
}

impl ImageSize {
    pub const ALL: [ImageSize; 6] = [
        Self::Square256,
        Self::Square512,
        Self::Square1024,
        Self::Landscape,
        Self::Portrait,
        Self::Auto,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Square256 => "256x256",
            Self::Square512 => "512x512",
            Self::Square1024 => "1024x1024",
            Self::Landscape => "1536x1024",
            Self::Portrait => "1024x1536",
            Self::Auto => "auto",
        }
    }

    /// Pixel dimensions, with `auto` mapped to a square 1024.
    pub fn dims(self) -> (u32, u32) {
        match self {
            Self::Square256 => (256, 256),
            Self::Square512 => (512, 512),
            Self::Square1024 | Self::Auto => (1024, 1024),
            Self::Landscape => (1536, 1024),
            Self::Portrait => (1024, 1536),
        }
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageSize {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase().replace(' ', "");
        Self::ALL
            .into_iter()
            .find(|size| size.as_str() == normalized)
            .ok_or_else(|| {
                let options = Self::ALL.map(ImageSize::as_str).join(", ");
                format!("Unsupported image size '{raw}' (expected one of {options}).")
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub kind: GeneratorKind,
    pub prompt_texts: Vec<String>,
    pub variation_count: u32,
    pub references: Vec<Vec<u8>>,
    pub size: ImageSize,
}

impl GenerationRequest {
    /// Builds an unvalidated request from raw user input, splitting icon
    /// input into one prompt per line.
    pub fn new(
        kind: GeneratorKind,
        input: &str,
        variation_count: u32,
        references: Vec<Vec<u8>>,
        size: ImageSize,
    ) -> Self {
        let prompt_texts = if kind.splits_lines() {
            split_prompt_lines(input)
        } else {
            let trimmed = input.trim();
            if trimmed.is_empty() {
                Vec::new()
            } else {
                vec![trimmed.to_string()]
            }
        };
        Self {
            kind,
            prompt_texts,
            variation_count,
            references,
            size,
        }
    }

    /// [`GenerationRequest::new`] checked against the default variation limit.
    pub fn from_input(
        kind: GeneratorKind,
        input: &str,
        variation_count: u32,
        references: Vec<Vec<u8>>,
        size: ImageSize,
    ) -> StudioResult<Self> {
        let request = Self::new(kind, input, variation_count, references, size);
        request.validate(DEFAULT_MAX_VARIATIONS)?;
        Ok(request)
    }

    pub fn validate(&self, max_variations: u32) -> StudioResult<()> {
        if self.prompt_texts.is_empty() {
            return Err(StudioError::validation(
                "Please enter a prompt to generate images.",
            ));
        }
        if self.prompt_texts.iter().any(|text| text.trim().is_empty()) {
            return Err(StudioError::validation("Prompt entries must not be blank."));
        }
        if self.variation_count == 0 {
            return Err(StudioError::validation(
                "Number of variations must be at least 1.",
            ));
        }
        if self.variation_count > max_variations {
            return Err(StudioError::validation(format!(
                "Number of variations must be at most {max_variations}."
            )));
        }
        if self.references.len() > MAX_REFERENCE_IMAGES {
            return Err(StudioError::validation(format!(
                "Upload up to {MAX_REFERENCE_IMAGES} reference images ({} given).",
                self.references.len()
            )));
        }
        Ok(())
    }

    pub fn is_edit(&self) -> bool {
        !self.references.is_empty()
    }

    /// Results expected when every call returns an image. Edit requests yield
    /// one image per prompt regardless of the variation count.
    pub fn expected_total(&self) -> u32 {
        let per_prompt = if self.is_edit() {
            1
        } else {
            self.variation_count
        };
        self.prompt_texts.len() as u32 * per_prompt
    }

    pub fn variations_per_prompt(&self) -> u32 {
        if self.is_edit() {
            1
        } else {
            self.variation_count
        }
    }
}

/// One prompt per non-blank line, trimmed.
pub fn split_prompt_lines(input: &str) -> Vec<String> {
    input
        .split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{split_prompt_lines, GenerationRequest, ImageSize};
    use crate::error::StudioError;
    use crate::kinds::GeneratorKind;

    #[test]
    fn split_drops_blank_lines_and_surrounding_whitespace() {
        assert_eq!(split_prompt_lines("a\n\nb  \n"), vec!["a", "b"]);
        assert_eq!(split_prompt_lines("  rocket\r\n\t\ngear "), vec!["rocket", "gear"]);
        assert!(split_prompt_lines(" \n \n").is_empty());
    }

    #[test]
    fn icon_input_becomes_one_prompt_per_line() -> anyhow::Result<()> {
        let request = GenerationRequest::from_input(
            GeneratorKind::Icon,
            "rocket\ngear\n",
            2,
            Vec::new(),
            ImageSize::Auto,
        )?;
        assert_eq!(request.prompt_texts, vec!["rocket", "gear"]);
        assert_eq!(request.expected_total(), 4);
        Ok(())
    }

    #[test]
    fn diagram_input_stays_a_single_prompt() -> anyhow::Result<()> {
        let request = GenerationRequest::from_input(
            GeneratorKind::Diagram,
            " sales funnel\nwith three teams ",
            3,
            Vec::new(),
            ImageSize::Landscape,
        )?;
        assert_eq!(request.prompt_texts, vec!["sales funnel\nwith three teams"]);
        assert_eq!(request.expected_total(), 3);
        Ok(())
    }

    #[test]
    fn empty_prompt_is_a_validation_error() {
        let err = GenerationRequest::from_input(
            GeneratorKind::Icon,
            " \n\n ",
            2,
            Vec::new(),
            ImageSize::Auto,
        )
        .unwrap_err();
        assert!(matches!(err, StudioError::Validation(_)));
    }

    #[test]
    fn variation_and_reference_bounds_are_enforced() {
        let zero = GenerationRequest::from_input(
            GeneratorKind::Diagram,
            "x",
            0,
            Vec::new(),
            ImageSize::Auto,
        );
        assert!(matches!(zero, Err(StudioError::Validation(_))));

        let too_many = GenerationRequest::from_input(
            GeneratorKind::Diagram,
            "x",
            11,
            Vec::new(),
            ImageSize::Auto,
        );
        assert!(matches!(too_many, Err(StudioError::Validation(_))));

        let refs = GenerationRequest::from_input(
            GeneratorKind::Diagram,
            "x",
            1,
            vec![vec![0u8]; 5],
            ImageSize::Auto,
        );
        assert!(matches!(refs, Err(StudioError::Validation(_))));
    }

    #[test]
    fn edit_requests_expect_one_image_per_prompt() -> anyhow::Result<()> {
        let request = GenerationRequest::from_input(
            GeneratorKind::Icon,
            "rocket\ngear",
            3,
            vec![vec![1, 2, 3]],
            ImageSize::Auto,
        )?;
        assert!(request.is_edit());
        assert_eq!(request.expected_total(), 2);
        Ok(())
    }

    #[test]
    fn size_parses_presets() {
        assert_eq!("1536x1024".parse::<ImageSize>(), Ok(ImageSize::Landscape));
        assert_eq!("AUTO".parse::<ImageSize>(), Ok(ImageSize::Auto));
        assert!("800x600".parse::<ImageSize>().is_err());
        assert_eq!(ImageSize::Portrait.dims(), (1024, 1536));
    }
}
