//! Hierarchical grouping
//!
//! Maps canonical fine-grained labels onto the coarse categories by
//! embedding both sides and taking, for each label, the most similar
//! target. Targets are the leaf entries of the category file: a category
//! with children contributes its children, a category without children
//! contributes itself. The mapping is re-derived on every run and involves
//! no randomness; ties go to the first target in file order.

pub mod categories;
pub mod proposal;

pub use categories::CategorySpec;

use crate::batch::{BatchOrchestrator, NoCheckpoint};
use crate::clustering::normalized;
use crate::error::{BuildError, BuildResult};
use crate::models::{Axis, L1Category, L2Entry, L2Item, MappingRow, OrphanLabel, SubCategory};
use dirtax_common::config::defaults;
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

/// Merge labels that share a name (case-insensitive) across clusters.
///
/// The first spelling and first non-empty definition win; aliases are
/// unioned and sorted; topic ids keep first-seen order. Output is sorted by
/// lower-cased name.
pub fn canonicalize_labels(entries: &[L2Entry]) -> Vec<L2Item> {
    struct Acc {
        item: L2Item,
        aliases: BTreeSet<String>,
    }

    let mut by_name: BTreeMap<String, Acc> = BTreeMap::new();
    for entry in entries {
        let name = entry.l2_name.trim();
        if name.is_empty() {
            continue;
        }
        let acc = by_name.entry(name.to_lowercase()).or_insert_with(|| Acc {
            item: L2Item {
                l2_name: name.to_string(),
                definition: String::new(),
                aliases: Vec::new(),
                topic_ids: Vec::new(),
                size: 0,
            },
            aliases: BTreeSet::new(),
        });

        if acc.item.definition.is_empty() {
            acc.item.definition = entry.definition.trim().to_string();
        }
        for alias in &entry.aliases {
            let alias = alias.trim();
            if !alias.is_empty() {
                acc.aliases.insert(alias.to_string());
            }
        }
        if entry.topic_id >= 0 && !acc.item.topic_ids.contains(&entry.topic_id) {
            acc.item.topic_ids.push(entry.topic_id);
        }
        acc.item.size += entry.size;
    }

    by_name
        .into_values()
        .map(|acc| L2Item {
            aliases: acc.aliases.into_iter().collect(),
            ..acc.item
        })
        .collect()
}

/// One embeddable grouping target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub l1_name: String,
    pub sub_category: Option<String>,
    pub text: String,
}

fn describe(axis: Axis, level: &str, name: &str, definition: &str, aliases: &[String]) -> String {
    let mut parts = vec![format!("{} {}: {}", axis, level, name.trim())];
    let definition = definition.trim().trim_end_matches('.');
    if !definition.is_empty() {
        parts.push(definition.to_string());
    }
    if !aliases.is_empty() {
        parts.push(format!("Aliases: {}", aliases.join(", ")));
    }
    parts.join(". ")
}

/// Embedding text for a label: `"{axis} L2: {name}. {definition}"`
pub fn label_text(axis: Axis, item: &L2Item) -> String {
    describe(axis, "L2", &item.l2_name, &item.definition, &[])
}

/// Leaf targets in file order, texts prefixed `"{axis} L1: "`
pub fn flatten_targets(axis: Axis, categories: &[CategorySpec]) -> Vec<Target> {
    let mut targets = Vec::new();
    for category in categories {
        if category.children.is_empty() {
            targets.push(Target {
                l1_name: category.name.clone(),
                sub_category: None,
                text: describe(axis, "L1", &category.name, &category.definition, &category.aliases),
            });
        } else {
            for child in &category.children {
                targets.push(Target {
                    l1_name: category.name.clone(),
                    sub_category: Some(child.name.clone()),
                    text: describe(axis, "L1", &child.name, &child.definition, &child.aliases),
                });
            }
        }
    }
    targets
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroupingSettings {
    /// Best-match similarity below which a label is reported as an orphan
    pub orphan_threshold: f32,
}

impl Default for GroupingSettings {
    fn default() -> Self {
        Self {
            orphan_threshold: defaults::ORPHAN_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupingResult {
    pub mapping: Vec<MappingRow>,
    /// L2 name → (L1 name, sub-category)
    pub l2_to_l1: BTreeMap<String, (String, Option<String>)>,
    pub categories: Vec<L1Category>,
    pub orphans: Vec<OrphanLabel>,
}

/// Pure assignment step over precomputed vectors.
pub fn assign(
    axis: Axis,
    items: &[L2Item],
    categories: &[CategorySpec],
    label_vectors: &[Vec<f32>],
    target_vectors: &[Vec<f32>],
    settings: GroupingSettings,
) -> BuildResult<GroupingResult> {
    let targets = flatten_targets(axis, categories);
    if targets.is_empty() {
        return Err(BuildError::Common(dirtax_common::Error::Config(
            "no coarse categories to group into".to_string(),
        )));
    }
    if label_vectors.len() != items.len() || target_vectors.len() != targets.len() {
        return Err(BuildError::integrity(format!(
            "grouping got {} label vectors for {} labels and {} target vectors for {} targets",
            label_vectors.len(),
            items.len(),
            target_vectors.len(),
            targets.len()
        )));
    }

    let label_unit: Vec<Vec<f32>> = label_vectors.iter().map(|v| normalized(v)).collect();
    let target_unit: Vec<Vec<f32>> = target_vectors.iter().map(|v| normalized(v)).collect();

    let mut result = GroupingResult::default();
    for (item, label) in items.iter().zip(label_unit.iter()) {
        let mut best = 0usize;
        let mut best_sim = f32::NEG_INFINITY;
        for (ti, target) in target_unit.iter().enumerate() {
            let sim: f32 = label.iter().zip(target.iter()).map(|(a, b)| a * b).sum();
            if sim > best_sim {
                best = ti;
                best_sim = sim;
            }
        }
        let target = &targets[best];

        result.mapping.push(MappingRow {
            l2_name: item.l2_name.clone(),
            l1_name: target.l1_name.clone(),
            sub_category: target.sub_category.clone(),
            similarity: Some(best_sim),
        });
        result.l2_to_l1.insert(
            item.l2_name.clone(),
            (target.l1_name.clone(), target.sub_category.clone()),
        );

        if best_sim < settings.orphan_threshold {
            result.orphans.push(OrphanLabel {
                l2_name: item.l2_name.clone(),
                best_l1_name: target.l1_name.clone(),
                similarity: best_sim,
                size: item.size,
                topic_ids: item.topic_ids.clone(),
            });
        }
    }

    result
        .orphans
        .sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.l2_name.cmp(&b.l2_name)));

    result.categories = categories
        .iter()
        .map(|category| {
            let assigned = |sub: Option<&str>| -> Vec<String> {
                result
                    .mapping
                    .iter()
                    .filter(|row| row.l1_name == category.name && (sub.is_none() || row.sub_category.as_deref() == sub))
                    .map(|row| row.l2_name.clone())
                    .collect()
            };
            L1Category {
                name: category.name.clone(),
                definition: category.definition.clone(),
                aliases: category.aliases.clone(),
                l2_names: assigned(None),
                sub_categories: category
                    .children
                    .iter()
                    .map(|child| SubCategory {
                        name: child.name.clone(),
                        definition: child.definition.clone(),
                        aliases: child.aliases.clone(),
                        l2_names: assigned(Some(child.name.as_str())),
                    })
                    .collect(),
            }
        })
        .collect();

    Ok(result)
}

/// Embed labels and targets, then assign.
pub async fn group(
    axis: Axis,
    items: &[L2Item],
    categories: &[CategorySpec],
    embedder: &BatchOrchestrator<'_>,
    settings: GroupingSettings,
) -> BuildResult<GroupingResult> {
    let target_texts: Vec<String> = flatten_targets(axis, categories).into_iter().map(|t| t.text).collect();
    if items.is_empty() {
        // Nothing to map; the category listing is still produced.
        let unused = vec![Vec::new(); target_texts.len()];
        return assign(axis, items, categories, &[], &unused, settings);
    }

    let label_texts: Vec<String> = items.iter().map(|item| label_text(axis, item)).collect();
    let label_vectors = embedder.run(&label_texts, &mut NoCheckpoint).await?;
    let target_vectors = embedder.run(&target_texts, &mut NoCheckpoint).await?;

    let result = assign(axis, items, categories, &label_vectors, &target_vectors, settings)?;
    info!(
        axis = %axis,
        labels = items.len(),
        targets = target_vectors.len(),
        orphans = result.orphans.len(),
        "Grouped fine-grained labels"
    );
    Ok(result)
}
