use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::templates::{DIAGRAM_TEMPLATE, ICON_TEMPLATE};

/// Generator family. Each kind has its own default template and variation
/// count, registered once in [`KindRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeneratorKind {
    Diagram,
    Icon,
    Default,
}

impl GeneratorKind {
    pub const ALL: [GeneratorKind; 3] = [Self::Diagram, Self::Icon, Self::Default];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Diagram => "diagram",
            Self::Icon => "icon",
            Self::Default => "default",
        }
    }

    /// Icon input carries one prompt per line; the other kinds take the whole
    /// text as a single prompt.
    pub fn splits_lines(self) -> bool {
        matches!(self, Self::Icon)
    }
}

impl fmt::Display for GeneratorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GeneratorKind {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "diagram" | "diagrams" => Ok(Self::Diagram),
            "icon" | "icons" => Ok(Self::Icon),
            "default" => Ok(Self::Default),
            other => Err(format!(
                "Unknown generator kind '{other}' (expected diagram, icon or default)."
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindSpec {
    pub kind: GeneratorKind,
    pub template: String,
    pub default_variations: u32,
}

#[derive(Debug, Clone)]
pub struct KindRegistry {
    kinds: IndexMap<GeneratorKind, KindSpec>,
}

impl Default for KindRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

impl KindRegistry {
    pub fn new(kinds: Option<IndexMap<GeneratorKind, KindSpec>>) -> Self {
        Self {
            kinds: kinds.unwrap_or_else(default_kinds),
        }
    }

    pub fn register(&mut self, spec: KindSpec) {
        self.kinds.insert(spec.kind, spec);
    }

    pub fn get(&self, kind: GeneratorKind) -> Option<&KindSpec> {
        self.kinds.get(&kind)
    }

    pub fn list(&self) -> impl Iterator<Item = &KindSpec> {
        self.kinds.values()
    }

    pub fn template(&self, kind: GeneratorKind) -> &str {
        self.get(kind)
            .map(|spec| spec.template.as_str())
            .unwrap_or_default()
    }

    pub fn default_variations(&self, kind: GeneratorKind) -> u32 {
        self.get(kind)
            .map(|spec| spec.default_variations)
            .filter(|value| *value > 0)
            .unwrap_or(1)
    }
}

fn default_kinds() -> IndexMap<GeneratorKind, KindSpec> {
    let mut map = IndexMap::new();
    let mut insert = |kind: GeneratorKind, template: &str, default_variations: u32| {
        map.insert(
            kind,
            KindSpec {
                kind,
                template: template.to_string(),
                default_variations,
            },
        );
    };

    insert(GeneratorKind::Diagram, DIAGRAM_TEMPLATE, 4);
    insert(GeneratorKind::Icon, ICON_TEMPLATE, 2);
    insert(GeneratorKind::Default, "", 1);

    map
}
