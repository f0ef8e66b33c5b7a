// src/dag/varpool.rs

//! Var-pool merging between tasks and the workflow instance.

use std::collections::HashMap;

use crate::model::{Direct, Property, TaskInstance};

/// Input pool of a task built from its finished predecessors.
///
/// Predecessors are visited by completion time; for a name set by several of
/// them the earliest non-empty value wins.
pub fn merge_predecessor_pools<'a>(
    predecessors: impl IntoIterator<Item = &'a TaskInstance>,
) -> Vec<Property> {
    let mut preds: Vec<&TaskInstance> = predecessors.into_iter().collect();
    preds.sort_by_key(|t| t.end_time);

    let mut merged: Vec<Property> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for pred in preds {
        for prop in pred.output_vars() {
            match index.get(&prop.name) {
                Some(&i) => {
                    if merged[i].value.is_empty() && !prop.value.is_empty() {
                        merged[i].value = prop.value.clone();
                    }
                }
                None => {
                    index.insert(prop.name.clone(), merged.len());
                    merged.push(Property {
                        name: prop.name.clone(),
                        direct: Direct::In,
                        value: prop.value.clone(),
                    });
                }
            }
        }
    }

    merged
}

/// Fold task outputs into a workflow-level pool; later non-empty values
/// overwrite earlier ones.
pub fn merge_into<'a>(pool: &mut Vec<Property>, outputs: impl IntoIterator<Item = &'a Property>) {
    for prop in outputs {
        match pool.iter_mut().find(|p| p.name == prop.name) {
            Some(existing) => {
                if !prop.value.is_empty() {
                    existing.value = prop.value.clone();
                }
            }
            None => pool.push(prop.clone()),
        }
    }
}

/// Name to value lookup, last entry wins.
pub fn as_map(pool: &[Property]) -> HashMap<&str, &str> {
    pool.iter()
        .map(|p| (p.name.as_str(), p.value.as_str()))
        .collect()
}
