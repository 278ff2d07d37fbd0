use cardgen_contracts::kinds::GeneratorKind;
use cardgen_contracts::request::GenerationRequest;
use serde::Serialize;

use crate::orchestrator::GenerationResult;

/// Progress of the request currently being consumed. Lives only between the
/// start of a request and its completion or failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressState {
    pub kind: GeneratorKind,
    pub completed: u32,
    pub total: u32,
    pub current_prompt: String,
    pub current_prompt_index: usize,
    pub prompt_count: usize,
    pub current_variation: u32,
    pub total_variations: u32,
}

impl ProgressState {
    pub fn start(request: &GenerationRequest) -> Self {
        Self {
            kind: request.kind,
            completed: 0,
            total: request.expected_total(),
            current_prompt: request.prompt_texts.first().cloned().unwrap_or_default(),
            current_prompt_index: 0,
            prompt_count: request.prompt_texts.len(),
            current_variation: 0,
            total_variations: request.variations_per_prompt(),
        }
    }

    pub fn advance(&mut self, result: &GenerationResult) {
        self.completed += 1;
        self.current_prompt = result.prompt_text.clone();
        self.current_prompt_index = result.prompt_index;
        self.current_variation = result.variation_index;
    }

    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.completed as f64 / self.total as f64).clamp(0.0, 1.0)
    }

    pub fn status_line(&self) -> String {
        match self.kind {
            GeneratorKind::Icon => format!(
                "Generating variation {} of {} for prompt {}/{}: {}",
                self.current_variation,
                self.total_variations,
                self.current_prompt_index,
                self.prompt_count,
                self.current_prompt
            ),
            _ => format!(
                "Generating {} variation {} of {}",
                self.kind, self.current_variation, self.total_variations
            ),
        }
    }
}
