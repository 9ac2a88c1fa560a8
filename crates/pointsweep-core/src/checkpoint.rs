use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Progress carried between runs: which `(site, category)` units already
/// completed. Passed into a pipeline run and returned from it; the pipeline
/// itself never reads or writes it to disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    completed_categories: BTreeSet<String>,
}

impl Checkpoint {
    #[must_use]
    pub fn is_completed(&self, site: &str, category: &str) -> bool {
        self.completed_categories.contains(&unit_key(site, category))
    }

    pub fn mark_completed(&mut self, site: &str, category: &str) {
        self.completed_categories.insert(unit_key(site, category));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.completed_categories.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.completed_categories.is_empty()
    }
}

fn unit_key(site: &str, category: &str) -> String {
    format!("{site}/{category}")
}
