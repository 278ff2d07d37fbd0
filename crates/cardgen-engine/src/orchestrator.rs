use std::collections::VecDeque;
use std::iter::FusedIterator;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use cardgen_contracts::config::EmptySlotPolicy;
use cardgen_contracts::error::{StudioError, StudioResult};
use cardgen_contracts::events::EventWriter;
use cardgen_contracts::kinds::{compose, GeneratorKind};
use cardgen_contracts::request::{GenerationRequest, ImageSize};
use image::DynamicImage;
use serde_json::{json, Map, Value};

use crate::normalize::normalize_references;
use crate::provider::{error_chain_text, ImageProvider, ProviderRequest};

const ERROR_CAUSE_MAX_CHARS: usize = 600;

#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub kind: GeneratorKind,
    pub prompt_text: String,
    /// 1-based position of the prompt within the request.
    pub prompt_index: usize,
    pub prompt_count: usize,
    pub variation_index: u32,
    pub variation_count: u32,
    pub image: DynamicImage,
}

#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub model: String,
    pub edit_model: String,
    pub empty_slot: EmptySlotPolicy,
}

#[derive(Debug, Clone)]
struct PlannedCall {
    prompt_index: usize,
    prompt_text: String,
    full_prompt: String,
    variation_index: u32,
    variation_count: u32,
}

/// Turns requests into sequential provider calls.
#[derive(Clone)]
pub struct Orchestrator {
    provider: Arc<dyn ImageProvider>,
    settings: GenerationSettings,
    events: EventWriter,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn ImageProvider>,
        settings: GenerationSettings,
        events: EventWriter,
    ) -> Self {
        Self {
            provider,
            settings,
            events,
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn settings(&self) -> &GenerationSettings {
        &self.settings
    }

    /// Plans the calls for `request` with `template` already resolved.
    /// References are normalized up front, so a bad upload fails here before
    /// any external call is made. Nothing is sent until the returned
    /// [`Generation`] is pulled.
    pub fn generate(&self, request: &GenerationRequest, template: &str) -> StudioResult<Generation> {
        let reference = normalize_references(&request.references)?;
        let variation_count = request.variations_per_prompt();
        let prompt_count = request.prompt_texts.len();

        let mut plan = VecDeque::new();
        for (idx, prompt_text) in request.prompt_texts.iter().enumerate() {
            let full_prompt = compose(template, prompt_text);
            for variation_index in 1..=variation_count {
                plan.push_back(PlannedCall {
                    prompt_index: idx + 1,
                    prompt_text: prompt_text.clone(),
                    full_prompt: full_prompt.clone(),
                    variation_index,
                    variation_count,
                });
            }
        }

        let model = if reference.is_some() {
            self.settings.edit_model.clone()
        } else {
            self.settings.model.clone()
        };

        Ok(Generation {
            provider: Arc::clone(&self.provider),
            events: self.events.clone(),
            kind: request.kind,
            size: request.size,
            model,
            reference,
            empty_slot: self.settings.empty_slot,
            plan,
            prompt_count,
            calls_issued: 0,
            skipped: 0,
            finished: false,
        })
    }
}

/// Lazy result stream of one request. Each `next` issues at most the calls
/// needed to produce one image; after an error the stream is exhausted and the
/// remaining planned calls are dropped. Not restartable.
pub struct Generation {
    provider: Arc<dyn ImageProvider>,
    events: EventWriter,
    kind: GeneratorKind,
    size: ImageSize,
    model: String,
    reference: Option<Vec<u8>>,
    empty_slot: EmptySlotPolicy,
    plan: VecDeque<PlannedCall>,
    prompt_count: usize,
    calls_issued: usize,
    skipped: usize,
    finished: bool,
}

impl Generation {
    pub fn is_edit(&self) -> bool {
        self.reference.is_some()
    }

    pub fn remaining_calls(&self) -> usize {
        self.plan.len()
    }

    pub fn calls_issued(&self) -> usize {
        self.calls_issued
    }

    /// Response slots that carried no image data and were skipped.
    pub fn skipped_slots(&self) -> usize {
        self.skipped
    }

    fn run_call(&mut self, call: &PlannedCall) -> StudioResult<Option<DynamicImage>> {
        let request = ProviderRequest {
            model: self.model.clone(),
            prompt: call.full_prompt.clone(),
            n: 1,
            size: self.size,
            reference: self.reference.clone(),
        };
        self.calls_issued += 1;
        let response = self.provider.generate(&request).map_err(|err| {
            StudioError::generation(
                &call.prompt_text,
                call.variation_index,
                error_chain_text(&err, ERROR_CAUSE_MAX_CHARS),
            )
        })?;

        let Some(encoded) = response
            .data
            .iter()
            .find_map(|datum| datum.b64_json.as_deref())
        else {
            return match self.empty_slot {
                EmptySlotPolicy::Skip => Ok(None),
                EmptySlotPolicy::Fail => Err(StudioError::generation(
                    &call.prompt_text,
                    call.variation_index,
                    "response contained no image data",
                )),
            };
        };

        let bytes = BASE64.decode(encoded.trim().as_bytes()).map_err(|err| {
            StudioError::generation(
                &call.prompt_text,
                call.variation_index,
                format!("image base64 decode failed: {err}"),
            )
        })?;
        let image = image::load_from_memory(&bytes).map_err(|err| {
            StudioError::generation(
                &call.prompt_text,
                call.variation_index,
                format!("returned image could not be decoded: {err}"),
            )
        })?;
        Ok(Some(image))
    }

    fn log_skipped(&self, call: &PlannedCall) {
        let payload = map_object(json!({
            "kind": self.kind.as_str(),
            "prompt": call.prompt_text,
            "variation": call.variation_index,
            "provider": self.provider.name(),
        }));
        if let Err(err) = self.events.emit("slot_skipped", payload) {
            eprintln!("cardgen warning: failed to write session event 'slot_skipped': {err:#}");
        }
    }
}

impl Iterator for Generation {
    type Item = StudioResult<GenerationResult>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        while let Some(call) = self.plan.pop_front() {
            match self.run_call(&call) {
                Ok(Some(image)) => {
                    return Some(Ok(GenerationResult {
                        kind: self.kind,
                        prompt_text: call.prompt_text,
                        prompt_index: call.prompt_index,
                        prompt_count: self.prompt_count,
                        variation_index: call.variation_index,
                        variation_count: call.variation_count,
                        image,
                    }));
                }
                Ok(None) => {
                    self.skipped += 1;
                    self.log_skipped(&call);
                }
                Err(err) => {
                    self.finished = true;
                    self.plan.clear();
                    return Some(Err(err));
                }
            }
        }
        self.finished = true;
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.finished {
            return (0, Some(0));
        }
        (0, Some(self.plan.len()))
    }
}

impl FusedIterator for Generation {}

fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}
