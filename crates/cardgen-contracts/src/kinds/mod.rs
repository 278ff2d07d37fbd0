mod registry;
mod templates;

pub use registry::{GeneratorKind, KindRegistry, KindSpec};
pub use templates::{compose, TemplateResolver, DIAGRAM_TEMPLATE, ICON_TEMPLATE, PROMPT_SEPARATOR};
