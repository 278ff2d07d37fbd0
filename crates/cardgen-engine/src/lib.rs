pub mod auth;
pub mod export;
pub mod gallery;
pub mod normalize;
pub mod orchestrator;
pub mod progress;
pub mod provider;
pub mod session;

use std::sync::Arc;

use cardgen_contracts::config::StudioConfig;
use cardgen_contracts::events::EventWriter;
use cardgen_contracts::kinds::TemplateResolver;

pub use auth::{AuthGate, CredentialStore};
pub use gallery::{EditState, GalleryEntry, GalleryState};
pub use orchestrator::{Generation, GenerationResult, GenerationSettings, Orchestrator};
pub use progress::ProgressState;
pub use provider::{build_provider, ImageProvider};
pub use session::{new_session_id, Session, SubmitSummary};

/// Wires a session from configuration around `provider`. The credential
/// store can be shared between sessions.
pub fn session_from_parts(
    config: &StudioConfig,
    provider: Arc<dyn ImageProvider>,
    store: Arc<CredentialStore>,
    events: EventWriter,
) -> Session {
    let settings = GenerationSettings {
        model: config.provider.model.clone(),
        edit_model: config.provider.edit_model.clone(),
        empty_slot: config.gallery.empty_slot,
    };
    let orchestrator = Orchestrator::new(provider, settings, events.clone());
    Session::new(
        store,
        TemplateResolver::default(),
        orchestrator,
        config.gallery.clone(),
        events,
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cardgen_contracts::config::StudioConfig;
    use cardgen_contracts::events::EventWriter;
    use cardgen_contracts::kinds::GeneratorKind;
    use cardgen_contracts::request::{GenerationRequest, ImageSize};

    use super::{build_provider, session_from_parts, CredentialStore, Session};

    fn build_session(config: &StudioConfig, events: EventWriter) -> anyhow::Result<Session> {
        let provider = build_provider(&config.provider)?;
        let store = Arc::new(CredentialStore::from_config(config));
        Ok(session_from_parts(config, provider, store, events))
    }

    #[test]
    fn dryrun_session_generates_from_config() -> anyhow::Result<()> {
        let config = StudioConfig::from_toml(
            r#"
[credentials]
alice = "s3cret"

[provider]
name = "dryrun"
"#,
        )?;
        let mut session = build_session(&config, EventWriter::discard("s-dry"))?;
        assert_eq!(session.provider_name(), "dryrun");
        session.login("alice", "s3cret")?;

        let request = GenerationRequest::new(
            GeneratorKind::Diagram,
            "org chart",
            2,
            Vec::new(),
            ImageSize::Square256,
        );
        let summary = session.submit(&request, |_, _| {})?;
        assert_eq!(summary.images, 2);
        let (name, png) = session.image_png(GeneratorKind::Diagram, 2)?;
        assert_eq!(name, "diagram_org_chart_2.png");
        let decoded = image::load_from_memory(&png)?;
        assert_eq!((decoded.width(), decoded.height()), (256, 256));
        Ok(())
    }

    #[test]
    fn unknown_provider_is_rejected() -> anyhow::Result<()> {
        let config = StudioConfig::from_toml("[provider]\nname = \"nope\"\n")?;
        let err = build_session(&config, EventWriter::discard("s")).err();
        let message = err.map(|err| err.to_string()).unwrap_or_default();
        assert!(message.contains("unknown image provider 'nope'"));
        Ok(())
    }
}
