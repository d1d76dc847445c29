use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::config::AspectRatio;
use crate::errors::ConfigError;

/// Placeholder substituted with the selected ratio, e.g. `4:3`.
pub const ASPECT_RATIO_PLACEHOLDER: &str = "{aspect_ratio}";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeSpec {
    pub id: String,
    pub label: String,
    pub icon: String,
    pub template: String,
}

impl ModeSpec {
    pub fn render(&self, aspect_ratio: AspectRatio) -> String {
        self.template
            .replace(ASPECT_RATIO_PLACEHOLDER, aspect_ratio.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct ModeRow {
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    icon: Option<String>,
    template: String,
}

/// Enhancement modes as data. Adding a mode never needs a code change: rows
/// can be merged in from JSON.
#[derive(Debug, Clone)]
pub struct ModeRegistry {
    modes: IndexMap<String, ModeSpec>,
}

impl Default for ModeRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ModeRegistry {
    pub fn new(modes: Option<IndexMap<String, ModeSpec>>) -> Self {
        Self {
            modes: modes.unwrap_or_else(default_modes),
        }
    }

    pub fn get(&self, id: &str) -> Option<&ModeSpec> {
        self.modes.get(&normalize_id(id))
    }

    pub fn list(&self) -> impl Iterator<Item = &ModeSpec> {
        self.modes.values()
    }

    pub fn ids(&self) -> Vec<String> {
        self.modes.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.modes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modes.is_empty()
    }

    pub fn ensure(&self, id: &str) -> Result<&ModeSpec, ConfigError> {
        self.get(id)
            .ok_or_else(|| ConfigError::UnknownMode(id.trim().to_string()))
    }

    pub fn insert(&mut self, spec: ModeSpec) {
        let id = normalize_id(&spec.id);
        self.modes.insert(
            id.clone(),
            ModeSpec {
                id,
                label: spec.label,
                icon: spec.icon,
                template: spec.template,
            },
        );
    }

    /// Merges a JSON object keyed by mode id. Existing ids are overridden,
    /// new ids are appended in file order. Returns the number of rows merged.
    pub fn merge_json(&mut self, raw: &str) -> Result<usize, serde_json::Error> {
        let rows: IndexMap<String, ModeRow> = serde_json::from_str(raw)?;
        let mut merged = 0;
        for (id, row) in rows {
            let id = normalize_id(&id);
            if id.is_empty() || row.template.trim().is_empty() {
                continue;
            }
            let label = row
                .label
                .filter(|value| !value.trim().is_empty())
                .unwrap_or_else(|| id.clone());
            self.insert(ModeSpec {
                id,
                label,
                icon: row.icon.unwrap_or_default(),
                template: row.template,
            });
            merged += 1;
        }
        Ok(merged)
    }
}

fn normalize_id(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

fn default_modes() -> IndexMap<String, ModeSpec> {
    let mut map = IndexMap::new();

    let mut insert = |id: &str, label: &str, icon: &str, template: &str| {
        map.insert(
            id.to_string(),
            ModeSpec {
                id: id.to_string(),
                label: label.to_string(),
                icon: icon.to_string(),
                template: template.to_string(),
            },
        );
    };

    insert(
        "reconstruct",
        "Maestro",
        "🧩",
        "MEJORA DE DEFINICIÓN Y TONOS: Nitidez extrema y calibración de color vibrante.",
    );
    insert(
        "restore",
        "Sanar",
        "🩹",
        "RESTAURACIÓN TÉCNICA: Borrado de rayones y recuperación de contraste.",
    );
    insert(
        "resize",
        "Escalar",
        "📐",
        "RE-ESCALADO HD: Ajuste a {aspect_ratio} con regeneración de bordes.",
    );
    insert(
        "artistic",
        "Cine",
        "🎞️",
        "MEJORA CINEMATOGRÁFICA: Gradación de color y luces profesionales.",
    );
    insert(
        "standard",
        "Rápido",
        "⚡",
        "OPTIMIZACIÓN RÁPIDA: Brillo y enfoque básico.",
    );

    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_canonical_modes_in_order() {
        let registry = ModeRegistry::default();
        assert_eq!(
            registry.ids(),
            vec!["reconstruct", "restore", "resize", "artistic", "standard"]
        );
        assert!(registry.list().all(|mode| !mode.template.trim().is_empty()));
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let registry = ModeRegistry::default();
        assert_eq!(
            registry.get(" Restore ").map(|mode| mode.label.as_str()),
            Some("Sanar")
        );
    }

    #[test]
    fn ensure_fails_closed_on_unknown_mode() {
        let registry = ModeRegistry::default();
        assert_eq!(
            registry.ensure("sepia").err(),
            Some(ConfigError::UnknownMode("sepia".to_string()))
        );
    }

    #[test]
    fn resize_template_interpolates_ratio() {
        let registry = ModeRegistry::default();
        let rendered = registry
            .get("resize")
            .map(|mode| mode.render(AspectRatio::Wide))
            .unwrap_or_default();
        assert_eq!(
            rendered,
            "RE-ESCALADO HD: Ajuste a 16:9 con regeneración de bordes."
        );
    }

    #[test]
    fn merge_json_adds_and_overrides_modes() -> anyhow::Result<()> {
        let mut registry = ModeRegistry::default();
        let merged = registry.merge_json(
            r#"{
                "skin_restore": {"label": "Piel", "icon": "✨", "template": "PIEL: suavizado natural."},
                "Standard": {"template": "OPTIMIZACIÓN: brillo."},
                "empty": {"template": "   "}
            }"#,
        )?;
        assert_eq!(merged, 2);
        assert_eq!(registry.len(), 6);
        assert_eq!(registry.ids().last().map(String::as_str), Some("skin_restore"));
        let standard = registry.ensure("standard")?;
        assert_eq!(standard.template, "OPTIMIZACIÓN: brillo.");
        assert_eq!(standard.label, "standard");
        Ok(())
    }

    #[test]
    fn merge_json_rejects_malformed_payload() {
        let mut registry = ModeRegistry::default();
        assert!(registry.merge_json("[1, 2]").is_err());
        assert_eq!(registry.len(), 5);
    }
}
