//! Coarse category input file
//!
//! `categories.<axis>.json` is authored by hand (or seeded on first run):
//! ```json
//! { "categories": [
//!     { "name": "Signal Processing", "definition": "...", "aliases": ["DSP"] },
//!     { "name": "Sensing", "definition": "...",
//!       "children": [ { "name": "Wearables", "definition": "..." } ] }
//! ] }
//! ```
//! A bare top-level array is also accepted. Children give a two-level
//! hierarchy; deeper nesting is rejected.

use dirtax_common::atomic::write_json_atomic;
use dirtax_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::models::Axis;

/// Bucket used when a proposal returns no usable category
pub const FALLBACK_CATEGORY: &str = "Unassigned Specific Subdomain";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorySpec {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub definition: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<CategorySpec>,
}

impl CategorySpec {
    pub fn leaf(name: &str, definition: &str) -> Self {
        Self {
            name: name.to_string(),
            definition: definition.to_string(),
            aliases: Vec::new(),
            children: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CategoriesFile {
    Wrapped { categories: Vec<CategorySpec> },
    Bare(Vec<CategorySpec>),
}

#[derive(Debug, Serialize)]
struct CategoriesFileOut<'a> {
    categories: &'a [CategorySpec],
}

/// Where the category file for `axis` lives.
///
/// A configured path may contain `{axis}`, which is replaced by the axis
/// name so one setting can serve both axes.
pub fn categories_path(axis_dir: &Path, axis: Axis, configured: Option<&Path>) -> PathBuf {
    match configured {
        Some(path) => PathBuf::from(path.to_string_lossy().replace("{axis}", axis.as_str())),
        None => axis_dir.join(format!("categories.{}.json", axis)),
    }
}

/// Read and validate the category file; `None` when it does not exist.
pub fn load_categories(path: &Path) -> Result<Option<Vec<CategorySpec>>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(Error::Config(format!(
                "Read category file {} failed: {}",
                path.display(),
                e
            )))
        }
    };

    let parsed: CategoriesFile = serde_json::from_slice(&bytes).map_err(|e| {
        Error::Config(format!("Parse category file {} failed: {}", path.display(), e))
    })?;
    let categories = match parsed {
        CategoriesFile::Wrapped { categories } => categories,
        CategoriesFile::Bare(categories) => categories,
    };

    validate_categories(&categories)
        .map_err(|msg| Error::Config(format!("Category file {}: {}", path.display(), msg)))?;
    Ok(Some(normalize(categories)))
}

fn validate_categories(categories: &[CategorySpec]) -> std::result::Result<(), String> {
    if categories.is_empty() {
        return Err("no categories defined".to_string());
    }
    let mut seen = HashSet::new();
    for (i, category) in categories.iter().enumerate() {
        let name = category.name.trim();
        if name.is_empty() {
            return Err(format!("category #{} has a blank name", i + 1));
        }
        if !seen.insert(name.to_lowercase()) {
            return Err(format!("duplicate category name '{}'", name));
        }
        let mut child_seen = HashSet::new();
        for child in &category.children {
            let child_name = child.name.trim();
            if child_name.is_empty() {
                return Err(format!("a child of '{}' has a blank name", name));
            }
            if !child.children.is_empty() {
                return Err(format!(
                    "'{}' under '{}' nests deeper than two levels",
                    child_name, name
                ));
            }
            if !child_seen.insert(child_name.to_lowercase()) {
                return Err(format!("duplicate child '{}' under '{}'", child_name, name));
            }
        }
    }
    Ok(())
}

fn normalize(categories: Vec<CategorySpec>) -> Vec<CategorySpec> {
    categories
        .into_iter()
        .map(|c| CategorySpec {
            name: c.name.trim().to_string(),
            definition: c.definition.trim().to_string(),
            aliases: c
                .aliases
                .iter()
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty())
                .collect(),
            children: normalize(c.children),
        })
        .collect()
}

/// Seed list written when no category file exists yet
pub fn placeholder_categories() -> Vec<CategorySpec> {
    vec![
        CategorySpec::leaf(
            "Placeholder Category A",
            "Replace with a real coarse category and its one-sentence definition.",
        ),
        CategorySpec::leaf(
            "Placeholder Category B",
            "Replace with a real coarse category and its one-sentence definition.",
        ),
    ]
}

pub fn write_categories(path: &Path, categories: &[CategorySpec]) -> Result<()> {
    write_json_atomic(path, &CategoriesFileOut { categories })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_absent_file_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(load_categories(&dir.path().join("categories.problem.json")).unwrap().is_none());
    }

    #[test]
    fn test_wrapped_and_bare_forms() {
        let dir = TempDir::new().unwrap();
        let wrapped = dir.path().join("a.json");
        std::fs::write(
            &wrapped,
            r#"{"categories": [{"name": " Signal Processing ", "aliases": ["DSP", " "],
                "children": [{"name": "Denoising"}]}]}"#,
        )
        .unwrap();
        let list = load_categories(&wrapped).unwrap().unwrap();
        assert_eq!(list[0].name, "Signal Processing");
        assert_eq!(list[0].aliases, vec!["DSP".to_string()]);
        assert_eq!(list[0].children[0].name, "Denoising");

        let bare = dir.path().join("b.json");
        std::fs::write(&bare, r#"[{"name": "User Studies"}]"#).unwrap();
        assert_eq!(load_categories(&bare).unwrap().unwrap().len(), 1);
    }

    #[test]
    fn test_invalid_files_are_config_errors() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("c.json");
        for body in [
            r#"{"categories": []}"#,
            r#"[{"name": "  "}]"#,
            r#"[{"name": "A"}, {"name": "a"}]"#,
            r#"[{"name": "A", "children": [{"name": "B", "children": [{"name": "C"}]}]}]"#,
            "{ broken",
        ] {
            std::fs::write(&path, body).unwrap();
            assert!(
                matches!(load_categories(&path), Err(Error::Config(_))),
                "body accepted: {}",
                body
            );
        }
    }

    #[test]
    fn test_placeholders_roundtrip_through_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("categories.method.json");
        write_categories(&path, &placeholder_categories()).unwrap();
        let back = load_categories(&path).unwrap().unwrap();
        assert_eq!(back, placeholder_categories());
    }

    #[test]
    fn test_categories_path() {
        let dir = Path::new("/out/problem");
        assert_eq!(
            categories_path(dir, Axis::Problem, None),
            PathBuf::from("/out/problem/categories.problem.json")
        );
        assert_eq!(
            categories_path(dir, Axis::Method, Some(Path::new("/cfg/cats.{axis}.json"))),
            PathBuf::from("/cfg/cats.method.json")
        );
    }
}
