use thiserror::Error;

pub type StudioResult<T> = std::result::Result<T, StudioError>;

/// Failures surfaced to the session user. None of them are fatal: the
/// session stays usable for a retry after any of these.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StudioError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailure(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Could not decode image: {0}")]
    Decode(String),

    #[error("Error generating image for prompt '{prompt}' (variation {variation}): {cause}")]
    Generation {
        prompt: String,
        variation: u32,
        cause: String,
    },

    #[error("Export failed: {0}")]
    Export(String),
}

impl StudioError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn generation(prompt: &str, variation: u32, cause: impl Into<String>) -> Self {
        Self::Generation {
            prompt: prompt.to_string(),
            variation,
            cause: cause.into(),
        }
    }

    /// Short machine tag used in session events.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AuthenticationFailure(_) => "authentication_failure",
            Self::Validation(_) => "validation",
            Self::Decode(_) => "decode",
            Self::Generation { .. } => "generation",
            Self::Export(_) => "export",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::StudioError;

    #[test]
    fn generation_error_message_names_prompt_and_variation() {
        let err = StudioError::generation("rocket", 2, "OpenAI request failed (500): boom");
        assert_eq!(
            err.to_string(),
            "Error generating image for prompt 'rocket' (variation 2): OpenAI request failed (500): boom"
        );
        assert_eq!(err.kind(), "generation");
    }

    #[test]
    fn validation_error_is_human_readable() {
        let err = StudioError::validation("Please enter a prompt to generate images.");
        assert_eq!(
            err.to_string(),
            "Invalid request: Please enter a prompt to generate images."
        );
    }
}
