// Recipe registry (C1): pure constant data loaded once at startup, O(1) map
// reads thereafter, no I/O past construction. Built-in recipes are embedded
// at compile time; `engine.toml`'s `extra_recipe_paths` (§10.3) lets callers
// layer user-supplied YAML recipes on top without touching this binary.

use crate::recipe::schema::{Recipe, RecipeError};
use std::collections::HashMap;
use std::path::Path;

/// The built-in recipe set, embedded so the registry never depends on a
/// filesystem layout to boot.
const BUILTIN_RECIPES: &[&str] = &[
    include_str!("../../recipes/rustup.yaml"),
    include_str!("../../recipes/cargo-audit.yaml"),
    include_str!("../../recipes/docker.yaml"),
    include_str!("../../recipes/ruff.yaml"),
    include_str!("../../recipes/pytorch.yaml"),
];

#[derive(Debug)]
pub enum RegistryLoadError {
    Parse { source: String, reason: serde_yaml::Error },
    Invalid(RecipeError),
}

impl std::fmt::Display for RegistryLoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryLoadError::Parse { source, reason } => {
                write!(f, "failed to parse recipe document ({source}): {reason}")
            }
            RegistryLoadError::Invalid(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for RegistryLoadError {}

/// Holds every loaded recipe, keyed by tool id.
pub struct RecipeRegistry {
    recipes: HashMap<String, Recipe>,
}

impl RecipeRegistry {
    /// Loads and schema-validates the embedded built-in recipe set. Fails
    /// with a diagnostic naming the offending recipe and field (§4.1) if
    /// any recipe violates its invariants.
    pub fn load_builtin() -> Result<Self, RegistryLoadError> {
        let mut registry = RecipeRegistry { recipes: HashMap::new() };
        for doc in BUILTIN_RECIPES {
            registry.load_document(doc, "<builtin>")?;
        }
        Ok(registry)
    }

    /// Layers additional recipes from a directory of `*.yaml` files on top
    /// of whatever is already loaded. A later recipe with the same id
    /// overrides an earlier one, so user-supplied recipes can shadow
    /// built-ins.
    pub fn load_dir(&mut self, dir: &Path) -> Result<(), RegistryLoadError> {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return Ok(());
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
                continue;
            }
            if let Ok(contents) = std::fs::read_to_string(&path) {
                self.load_document(&contents, &path.to_string_lossy())?;
            }
        }
        Ok(())
    }

    fn load_document(&mut self, doc: &str, source: &str) -> Result<(), RegistryLoadError> {
        let recipe: Recipe = serde_yaml::from_str(doc).map_err(|reason| RegistryLoadError::Parse {
            source: source.to_string(),
            reason,
        })?;
        recipe.validate().map_err(RegistryLoadError::Invalid)?;
        self.recipes.insert(recipe.id.clone(), recipe);
        Ok(())
    }

    pub fn get(&self, tool_id: &str) -> Option<&Recipe> {
        self.recipes.get(tool_id)
    }

    pub fn contains(&self, tool_id: &str) -> bool {
        self.recipes.contains_key(tool_id)
    }

    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.recipes.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_recipes_load_and_validate() {
        let registry = RecipeRegistry::load_builtin().expect("builtin recipes must be valid");
        assert!(registry.contains("cargo-audit"));
        assert!(registry.contains("rustup"));
        assert!(registry.contains("docker"));
        assert!(registry.contains("ruff"));
        assert!(registry.contains("pytorch"));
    }

    #[test]
    fn ids_are_sorted() {
        let registry = RecipeRegistry::load_builtin().unwrap();
        let ids = registry.ids();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);
    }
}
