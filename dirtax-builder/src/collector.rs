//! Record collector
//!
//! Reads the upstream researcher index and per-researcher profiles and
//! extracts the qualifying directions for one axis.
//!
//! # Input layout
//! ```text
//! <root>/researchers.index.json   { "researchers": [{ "identity": {...}, "profile_path": "..." }] }
//! <root>/profiles/<id>.json       { "works": [{ "id", "title", "publication_year", "analysis": {...} }] }
//! ```
//!
//! Upstream documents are loosely typed; the boundary structs below accept
//! nulls and missing fields as defaults so one sparse profile never aborts
//! collection, while a document that is not JSON at all is a hard error.

use crate::models::record::{embedding_context, sort_records_stable};
use crate::models::{Axis, DirectionRecord};
use dirtax_common::{Error, Result};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Index file name under the researchers root
pub const INDEX_FILE: &str = "researchers.index.json";

/// Profile directory name under the researchers root
pub const PROFILES_DIR: &str = "profiles";

fn nullable<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Default, Deserialize)]
struct ResearcherIndex {
    #[serde(default, deserialize_with = "nullable")]
    researchers: Vec<IndexEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct IndexEntry {
    #[serde(default, deserialize_with = "nullable")]
    identity: Identity,
    #[serde(default, deserialize_with = "nullable")]
    profile_path: String,
}

#[derive(Debug, Default, Deserialize)]
struct Identity {
    #[serde(default)]
    openalex_author_id: Value,
    #[serde(default)]
    name: Value,
}

#[derive(Debug, Default, Deserialize)]
struct Profile {
    #[serde(default, deserialize_with = "nullable")]
    works: Vec<Option<Work>>,
}

#[derive(Debug, Default, Deserialize)]
struct Work {
    #[serde(default)]
    id: Value,
    #[serde(default)]
    title: Value,
    #[serde(default)]
    publication_year: Value,
    #[serde(default, deserialize_with = "nullable")]
    analysis: Analysis,
}

#[derive(Debug, Default, Deserialize)]
struct Analysis {
    #[serde(default, deserialize_with = "nullable")]
    is_interesting: bool,
    #[serde(default, deserialize_with = "nullable")]
    problem_directions: Vec<Value>,
    #[serde(default, deserialize_with = "nullable")]
    method_directions: Vec<Value>,
}

impl Analysis {
    fn directions(&self, axis: Axis) -> &[Value] {
        match axis {
            Axis::Problem => &self.problem_directions,
            Axis::Method => &self.method_directions,
        }
    }
}

/// Render a loosely-typed scalar as trimmed text (`null` → empty)
fn scalar_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.trim().to_string(),
        other => other.to_string().trim().to_string(),
    }
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let bytes = std::fs::read(path).map_err(|e| {
        Error::Io(std::io::Error::new(
            e.kind(),
            format!("Failed to read {}: {}", path.display(), e),
        ))
    })?;
    serde_json::from_slice(&bytes).map_err(Error::Json)
}

fn profile_path_for(root: &Path, entry: &IndexEntry, researcher_id: &str) -> Option<PathBuf> {
    let raw = entry.profile_path.trim();
    if !raw.is_empty() {
        let name = Path::new(raw).file_name()?;
        return Some(root.join(PROFILES_DIR).join(name));
    }
    if !researcher_id.is_empty() {
        return Some(root.join(PROFILES_DIR).join(format!("{}.json", researcher_id)));
    }
    None
}

/// Collect the ordered record list for `axis`.
pub fn collect_records(researchers_root: &Path, axis: Axis) -> Result<Vec<DirectionRecord>> {
    let index_path = researchers_root.join(INDEX_FILE);
    let index: ResearcherIndex = read_json(&index_path)?;

    let mut records = Vec::new();
    let mut profiles_read = 0usize;

    for entry in &index.researchers {
        let researcher_id = scalar_text(&entry.identity.openalex_author_id);
        let researcher_name = scalar_text(&entry.identity.name);

        let Some(profile_path) = profile_path_for(researchers_root, entry, &researcher_id) else {
            debug!("Skipping index entry without profile path or author id");
            continue;
        };
        if !profile_path.exists() {
            debug!(path = %profile_path.display(), "Profile missing, skipping");
            continue;
        }

        let profile: Profile = read_json(&profile_path)?;
        profiles_read += 1;

        for work in profile.works.iter().flatten() {
            if !work.analysis.is_interesting {
                continue;
            }
            let paper_id = scalar_text(&work.id);
            let paper_title = scalar_text(&work.title);
            let publication_year = work
                .publication_year
                .as_i64()
                .and_then(|y| i32::try_from(y).ok());

            for raw in work.analysis.directions(axis) {
                let text = scalar_text(raw).to_lowercase();
                if text.is_empty() {
                    continue;
                }
                records.push(DirectionRecord {
                    axis,
                    context: embedding_context(&text),
                    text,
                    paper_id: paper_id.clone(),
                    paper_title: paper_title.clone(),
                    publication_year,
                    researcher_id: researcher_id.clone(),
                    researcher_name: researcher_name.clone(),
                });
            }
        }
    }

    sort_records_stable(&mut records);

    info!(
        axis = %axis,
        researchers = index.researchers.len(),
        profiles = profiles_read,
        records = records.len(),
        "Collected direction records"
    );

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn write(path: &Path, value: &Value) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, serde_json::to_vec(value).unwrap()).unwrap();
    }

    fn fixture() -> TempDir {
        let dir = TempDir::new().unwrap();
        write(
            &dir.path().join(INDEX_FILE),
            &json!({
                "researchers": [
                    { "identity": { "openalex_author_id": "A2", "name": "Bo" },
                      "profile_path": "somewhere/else/A2.json" },
                    { "identity": { "openalex_author_id": "A1", "name": "Al" } },
                    { "identity": { "openalex_author_id": "A404" } },
                    { "identity": null }
                ]
            }),
        );
        write(
            &dir.path().join(PROFILES_DIR).join("A1.json"),
            &json!({
                "works": [
                    { "id": "W2", "title": "Second", "publication_year": 2021,
                      "analysis": { "is_interesting": true,
                                    "problem_directions": ["  Stress Detection ", "", null],
                                    "method_directions": ["Transformers"] } },
                    { "id": "W9", "title": "Boring",
                      "analysis": { "is_interesting": false,
                                    "problem_directions": ["ignored"] } },
                    null
                ]
            }),
        );
        write(
            &dir.path().join(PROFILES_DIR).join("A2.json"),
            &json!({
                "works": [
                    { "id": "W1", "title": "First", "publication_year": "2019",
                      "analysis": { "is_interesting": true,
                                    "problem_directions": ["Emotion Recognition"],
                                    "method_directions": null } }
                ]
            }),
        );
        dir
    }

    #[test]
    fn test_collect_problem_axis() {
        let dir = fixture();
        let records = collect_records(dir.path(), Axis::Problem).unwrap();
        assert_eq!(records.len(), 2);

        // Sorted by paper id: W1 before W2
        assert_eq!(records[0].paper_id, "W1");
        assert_eq!(records[0].text, "emotion recognition");
        assert_eq!(records[0].researcher_name, "Bo");
        assert_eq!(records[0].publication_year, None, "string year is not an integer");

        assert_eq!(records[1].text, "stress detection");
        assert_eq!(records[1].publication_year, Some(2021));
        assert_eq!(records[1].context, "stress detection");
    }

    #[test]
    fn test_collect_method_axis() {
        let dir = fixture();
        let records = collect_records(dir.path(), Axis::Method).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].text, "transformers");
        assert_eq!(records[0].axis, Axis::Method);
    }

    #[test]
    fn test_missing_index_is_error() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            collect_records(dir.path(), Axis::Problem),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn test_corrupt_profile_is_error() {
        let dir = fixture();
        std::fs::write(dir.path().join(PROFILES_DIR).join("A1.json"), b"{ not json").unwrap();
        assert!(matches!(
            collect_records(dir.path(), Axis::Problem),
            Err(Error::Json(_))
        ));
    }
}
