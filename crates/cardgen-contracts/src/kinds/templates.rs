use super::registry::{GeneratorKind, KindRegistry};

pub const PROMPT_SEPARATOR: &str = "\n\nUser request: ";

pub const DIAGRAM_TEMPLATE: &str = r#"You are an expert visual communicator and designer. Your task is to create advanced, yet easy-to-understand, hand-drawn style diagrams for business, marketing, and organizational workflows. Your diagrams should:

Use a minimalist, illustrated hand-drawn aesthetic, similar to visual note-taking or whiteboard sketching.
Include clearly labeled characters (e.g., Product Manager, Strategist) with simple illustrated avatars.
Keep padding around the image and no information should get cut off
Depict communication tools and challenges using icons (e.g., email, meetings, Slack, confusion emoji, clock, warning signs).
Use dotted arrows to indicate communication or information flow between roles.
Communicate common workplace challenges like misalignment, information silos, and tool overload.
Arrange people and interactions horizontally in logical teams or departments (e.g., Merchandising, Marketing, Agency).
Always prioritize clarity, balance, and visual storytelling. Include icons, facial expressions, and directional cues to emphasize communication bottlenecks or inefficiencies.
If there is too much text or visual content try to reduce the font and keep space for visual clarity.
Have a proper whiteboard background for clear image.
Do not rewrite the entire prompt in the diagram. Only clearly illustrate the concept.
Always only follow the style of the images provided in the knowledge bank."#;

pub const ICON_TEMPLATE: &str = r#"You are a visual design assistant that generates prompts for creating icons in a luxurious, minimalistic, slightly 3D style with a transparent background. The background should always be transparent.

When the user inputs a shortphrase, your job is to analyze the text input and decide what text and icon the card should contain. Then automatically format it into the following prompt structure:

"Create an image of a minimalistic luxury slight 3D style card icon with a transparent background, like a $10,000 design team's work, of the word "xyz" with a graphic of a "abc". Make the background transparent."

Always consider the full prompt exactly as above with the text inserted cleanly into "xyz" and "abc" — replacing "xyz" with the label/text the icon should feature, and "abc" with the visual graphic or symbol they mentioned. Do not include anything else in your reply.

Make sure it is in a card style. The text and any graphic on the card should be flat 2D black printed on the card. the card should be slightly 3d and the colour of the card should always be #f9f1dd. Make sure the background is ALWAYS FULLY TRANSPARENT."#;

/// Picks the system template for a kind: a non-blank override wins over the
/// registered built-in text.
#[derive(Debug, Clone, Default)]
pub struct TemplateResolver {
    registry: KindRegistry,
}

impl TemplateResolver {
    pub fn new(registry: KindRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &KindRegistry {
        &self.registry
    }

    pub fn resolve(&self, kind: GeneratorKind, override_template: Option<&str>) -> String {
        match override_template {
            Some(text) if !text.trim().is_empty() => text.to_string(),
            _ => self.registry.template(kind).to_string(),
        }
    }
}

/// Joins template and user prompt verbatim. An empty template leaves the
/// prompt untouched.
pub fn compose(template: &str, user_prompt: &str) -> String {
    if template.trim().is_empty() {
        return user_prompt.to_string();
    }
    format!("{template}{PROMPT_SEPARATOR}{user_prompt}")
}

#[cfg(test)]
mod tests {
    use super::{compose, TemplateResolver, DIAGRAM_TEMPLATE, ICON_TEMPLATE};
    use crate::kinds::GeneratorKind;

    #[test]
    fn resolve_prefers_non_blank_override() {
        let resolver = TemplateResolver::default();
        assert_eq!(
            resolver.resolve(GeneratorKind::Icon, Some("pixel art")),
            "pixel art"
        );
        assert_eq!(resolver.resolve(GeneratorKind::Icon, Some("   ")), ICON_TEMPLATE);
        assert_eq!(resolver.resolve(GeneratorKind::Diagram, None), DIAGRAM_TEMPLATE);
        assert_eq!(resolver.resolve(GeneratorKind::Default, None), "");
    }

    #[test]
    fn compose_uses_user_request_separator() {
        assert_eq!(
            compose("Draw icons.", "rocket"),
            "Draw icons.\n\nUser request: rocket"
        );
    }

    #[test]
    fn compose_without_template_passes_prompt_through() {
        assert_eq!(compose("", "  keep <raw> text "), "  keep <raw> text ");
    }
}
