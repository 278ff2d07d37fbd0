use std::path::Path;
use std::sync::Arc;

use cardgen_contracts::config::GalleryConfig;
use cardgen_contracts::error::{StudioError, StudioResult};
use cardgen_contracts::events::{EventPayload, EventWriter};
use cardgen_contracts::kinds::{GeneratorKind, TemplateResolver};
use cardgen_contracts::request::{GenerationRequest, ImageSize};
use image::DynamicImage;
use indexmap::IndexMap;
use serde_json::{json, Value};

use crate::auth::{AuthGate, CredentialStore};
use crate::gallery::GalleryState;
use crate::normalize::{decode_image, encode_png, fingerprint};
use crate::orchestrator::{GenerationResult, Orchestrator};
use crate::progress::ProgressState;

pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Outcome of one fully consumed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitSummary {
    pub kind: GeneratorKind,
    pub prompt_count: usize,
    pub images: usize,
    pub skipped: usize,
    pub calls: usize,
}

/// One user's studio: identity, gallery, edit slot and per-kind template
/// overrides. Sessions share nothing mutable.
pub struct Session {
    auth: AuthGate,
    resolver: TemplateResolver,
    overrides: IndexMap<GeneratorKind, String>,
    gallery: GalleryState,
    progress: Option<ProgressState>,
    orchestrator: Orchestrator,
    gallery_config: GalleryConfig,
    events: EventWriter,
}

impl Session {
    pub fn new(
        store: Arc<CredentialStore>,
        resolver: TemplateResolver,
        orchestrator: Orchestrator,
        gallery_config: GalleryConfig,
        events: EventWriter,
    ) -> Self {
        let session = Self {
            auth: AuthGate::new(store),
            resolver,
            overrides: IndexMap::new(),
            gallery: GalleryState::new(),
            progress: None,
            orchestrator,
            gallery_config,
            events,
        };
        session.emit(
            "session_started",
            json!({
                "provider": session.orchestrator.provider_name(),
                "replace_on_generate": session.gallery_config.replace_on_generate,
            }),
        );
        session
    }

    pub fn session_id(&self) -> &str {
        self.events.session_id()
    }

    pub fn events(&self) -> &EventWriter {
        &self.events
    }

    pub fn provider_name(&self) -> &str {
        self.orchestrator.provider_name()
    }

    pub fn gallery(&self) -> &GalleryState {
        &self.gallery
    }

    pub fn gallery_config(&self) -> &GalleryConfig {
        &self.gallery_config
    }

    pub fn progress(&self) -> Option<&ProgressState> {
        self.progress.as_ref()
    }

    pub fn resolver(&self) -> &TemplateResolver {
        &self.resolver
    }

    pub fn login(&mut self, username: &str, password: &str) -> StudioResult<()> {
        if self.auth.authenticate(username, password) {
            self.emit("login_succeeded", json!({ "user": username }));
            return Ok(());
        }
        self.emit("login_failed", json!({ "user": username }));
        Err(StudioError::AuthenticationFailure(
            "Invalid username or password.".to_string(),
        ))
    }

    pub fn logout(&mut self) {
        let user = self.auth.current_user().map(str::to_string);
        self.auth.logout();
        if let Some(user) = user {
            self.emit("logged_out", json!({ "user": user }));
        }
    }

    pub fn current_user(&self) -> Option<&str> {
        self.auth.current_user()
    }

    pub fn require_login(&self) -> StudioResult<&str> {
        self.auth.current_user().ok_or_else(|| {
            StudioError::AuthenticationFailure("Please log in to continue.".to_string())
        })
    }

    pub fn set_system_prompt(&mut self, kind: GeneratorKind, text: &str) {
        if text.trim().is_empty() {
            self.overrides.shift_remove(&kind);
        } else {
            self.overrides.insert(kind, text.to_string());
        }
    }

    pub fn reset_system_prompt(&mut self, kind: GeneratorKind) {
        self.overrides.shift_remove(&kind);
    }

    pub fn has_system_override(&self, kind: GeneratorKind) -> bool {
        self.overrides.contains_key(&kind)
    }

    /// The template the next request of `kind` will use.
    pub fn system_prompt(&self, kind: GeneratorKind) -> String {
        self.resolver
            .resolve(kind, self.overrides.get(&kind).map(String::as_str))
    }

    /// Validates and runs `request`, recording each image in the gallery as
    /// soon as it arrives and reporting it through `on_result`. On failure the
    /// images recorded before the failing call stay in the gallery.
    pub fn submit<F>(&mut self, request: &GenerationRequest, mut on_result: F) -> StudioResult<SubmitSummary>
    where
        F: FnMut(&GenerationResult, &ProgressState),
    {
        self.require_login()?;
        request.validate(self.gallery_config.max_variations)?;

        let template = self.system_prompt(request.kind);
        let mut generation = match self.orchestrator.generate(request, &template) {
            Ok(generation) => generation,
            Err(err) => {
                self.log_failure("generation_failed", request.kind, &err);
                return Err(err);
            }
        };

        if self.gallery_config.replace_on_generate {
            self.gallery.clear_kind(request.kind);
        }
        self.progress = Some(ProgressState::start(request));
        self.emit(
            "generation_started",
            json!({
                "kind": request.kind.as_str(),
                "prompts": request.prompt_texts,
                "variations": request.variations_per_prompt(),
                "edit": generation.is_edit(),
                "size": request.size.as_str(),
            }),
        );

        let mut images = 0usize;
        for item in generation.by_ref() {
            let result = match item {
                Ok(result) => result,
                Err(err) => {
                    self.progress = None;
                    self.log_failure("generation_failed", request.kind, &err);
                    return Err(err);
                }
            };
            self.gallery.record(&result);
            images += 1;
            let Some(progress) = self.progress.as_mut() else {
                continue;
            };
            progress.advance(&result);
            let snapshot = progress.clone();
            self.emit(
                "image_generated",
                json!({
                    "kind": result.kind.as_str(),
                    "prompt": result.prompt_text,
                    "variation": result.variation_index,
                    "width": result.image.width(),
                    "height": result.image.height(),
                    "fingerprint": fingerprint(&result.image),
                    "progress": snapshot,
                }),
            );
            on_result(&result, &snapshot);
        }
        self.progress = None;

        let summary = SubmitSummary {
            kind: request.kind,
            prompt_count: request.prompt_texts.len(),
            images,
            skipped: generation.skipped_slots(),
            calls: generation.calls_issued(),
        };
        self.emit(
            "generation_finished",
            json!({
                "kind": summary.kind.as_str(),
                "images": summary.images,
                "skipped": summary.skipped,
                "calls": summary.calls,
                "gallery_count": self.gallery.count(summary.kind),
            }),
        );
        Ok(summary)
    }

    /// Enters edit mode with the image at 1-based `position` of `kind`.
    pub fn select(&mut self, kind: GeneratorKind, position: usize) -> StudioResult<()> {
        self.require_login()?;
        let (image, prompt) = {
            let entry = self.gallery.entry(kind, position).ok_or_else(|| {
                StudioError::validation(format!(
                    "No {kind} image at position {position} (gallery has {}).",
                    self.gallery.count(kind)
                ))
            })?;
            (entry.image.clone(), entry.prompt_text.to_string())
        };
        self.emit(
            "edit_selected",
            json!({
                "kind": kind.as_str(),
                "position": position,
                "prompt": prompt,
                "fingerprint": fingerprint(&image),
            }),
        );
        self.gallery.select(image);
        Ok(())
    }

    /// Replaces the image being edited with an uploaded one. The gallery
    /// history is untouched.
    pub fn upload_replacement(&mut self, raw: &[u8]) -> StudioResult<()> {
        self.require_login()?;
        self.require_edit_mode()?;
        let image = decode_image(raw)?;
        let print = fingerprint(&image);
        self.gallery.replace_selected(image);
        self.emit("edit_uploaded", json!({ "fingerprint": print }));
        Ok(())
    }

    /// Sends the selected image with `prompt` to the edit endpoint and swaps
    /// in the first returned image. The selection is unchanged on failure.
    pub fn apply_edit(
        &mut self,
        kind: GeneratorKind,
        prompt: &str,
        size: ImageSize,
    ) -> StudioResult<()> {
        self.require_login()?;
        let selected = self.require_edit_mode()?;
        let reference = encode_png(selected)?;
        // The whole edit text is one prompt, even for kinds that split lines.
        let text = prompt.trim();
        let request = GenerationRequest {
            kind,
            prompt_texts: if text.is_empty() {
                Vec::new()
            } else {
                vec![text.to_string()]
            },
            variation_count: 1,
            references: vec![reference],
            size,
        };
        request.validate(self.gallery_config.max_variations)?;

        let template = self.system_prompt(kind);
        let first = self
            .orchestrator
            .generate(&request, &template)
            .and_then(|mut generation| match generation.next() {
                Some(item) => item,
                None => Err(StudioError::generation(
                    request.prompt_texts.first().map(String::as_str).unwrap_or_default(),
                    1,
                    "response contained no image data",
                )),
            });

        match first {
            Ok(result) => {
                let print = fingerprint(&result.image);
                self.gallery.replace_selected(result.image);
                self.emit(
                    "edit_applied",
                    json!({
                        "kind": kind.as_str(),
                        "prompt": result.prompt_text,
                        "fingerprint": print,
                    }),
                );
                Ok(())
            }
            Err(err) => {
                self.log_failure("edit_failed", kind, &err);
                Err(err)
            }
        }
    }

    pub fn exit_edit(&mut self) {
        if self.gallery.edit_mode_active() {
            self.gallery.exit_edit();
            self.emit("edit_exited", json!({}));
        }
    }

    pub fn selected_image(&self) -> Option<&DynamicImage> {
        self.gallery.selected_image()
    }

    /// PNG bytes and download name of one gallery image.
    pub fn image_png(&self, kind: GeneratorKind, position: usize) -> StudioResult<(String, Vec<u8>)> {
        self.require_login()?;
        let entry = self.gallery.entry(kind, position).ok_or_else(|| {
            StudioError::validation(format!(
                "No {kind} image at position {position} (gallery has {}).",
                self.gallery.count(kind)
            ))
        })?;
        let name = entry.file_name(kind);
        Ok((name, encode_png(entry.image)?))
    }

    /// Zip archive of every `kind` image, in gallery order.
    pub fn export(&self, kind: GeneratorKind) -> StudioResult<Vec<u8>> {
        self.require_login()?;
        self.gallery
            .export_all(kind, self.gallery_config.export_min_images)
    }

    pub fn export_to(&self, kind: GeneratorKind, path: &Path) -> StudioResult<usize> {
        let archive = self.export(kind)?;
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|err| {
                StudioError::Export(format!("failed to create {}: {err}", parent.display()))
            })?;
        }
        std::fs::write(path, &archive).map_err(|err| {
            StudioError::Export(format!("failed to write {}: {err}", path.display()))
        })?;
        let images = self.gallery.count(kind);
        self.emit(
            "export_written",
            json!({
                "kind": kind.as_str(),
                "path": path.to_string_lossy(),
                "images": images,
                "bytes": archive.len(),
            }),
        );
        Ok(images)
    }

    fn require_edit_mode(&self) -> StudioResult<&DynamicImage> {
        self.gallery
            .selected_image()
            .ok_or_else(|| StudioError::validation("Select an image to edit first."))
    }

    fn log_failure(&self, event_type: &str, kind: GeneratorKind, err: &StudioError) {
        self.emit(
            event_type,
            json!({
                "kind": kind.as_str(),
                "error_kind": err.kind(),
                "error": err.to_string(),
            }),
        );
    }

    fn emit(&self, event_type: &str, payload: Value) {
        let payload: EventPayload = payload.as_object().cloned().unwrap_or_default();
        if let Err(err) = self.events.emit(event_type, payload) {
            eprintln!("cardgen warning: failed to write session event '{event_type}': {err:#}");
        }
    }
}
