use std::collections::BTreeMap;

use serde::Serialize;

use crate::{BuildLabel, DeploymentTarget, RuleEntry};

/// Rule entries indexed by label.
///
/// A label can have several configured variants (one per deployment target),
/// so lookups come in a single-valued flavour ("is anything known for this
/// label") and a multi-valued one. Variants are kept sorted by deployment
/// target, which makes the map's contents independent of insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct RuleEntryMap {
    entries: BTreeMap<BuildLabel, Vec<RuleEntry>>,
}

impl RuleEntryMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `entry` unless a variant with the same label and deployment
    /// target is already present. Returns whether the entry was inserted.
    pub fn insert(&mut self, entry: RuleEntry) -> bool {
        let variants = self.entries.entry(entry.label().clone()).or_default();
        match variants.binary_search_by(|existing| {
            existing.deployment_target.cmp(&entry.deployment_target)
        }) {
            Ok(_) => false,
            Err(idx) => {
                variants.insert(idx, entry);
                true
            }
        }
    }

    pub fn contains(&self, label: &BuildLabel) -> bool {
        self.entries.contains_key(label)
    }

    /// Any entry for `label`; the unconfigured variant sorts first.
    pub fn rule_entry(&self, label: &BuildLabel) -> Option<&RuleEntry> {
        self.entries.get(label).and_then(|variants| variants.first())
    }

    pub fn rule_entries(&self, label: &BuildLabel) -> &[RuleEntry] {
        self.entries
            .get(label)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn rule_entry_for(
        &self,
        label: &BuildLabel,
        deployment_target: Option<&DeploymentTarget>,
    ) -> Option<&RuleEntry> {
        self.rule_entries(label)
            .iter()
            .find(|entry| entry.deployment_target.as_ref() == deployment_target)
    }

    /// Move every entry of `other` into `self`. Existing (label, deployment
    /// target) pairs win.
    pub fn merge(&mut self, other: RuleEntryMap) {
        for entry in other.into_entries() {
            self.insert(entry);
        }
    }

    pub fn labels(&self) -> impl Iterator<Item = &BuildLabel> {
        self.entries.keys()
    }

    pub fn entries(&self) -> impl Iterator<Item = &RuleEntry> {
        self.entries.values().flatten()
    }

    pub fn into_entries(self) -> impl Iterator<Item = RuleEntry> {
        self.entries.into_values().flatten()
    }

    /// Number of distinct labels.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Number of entries across all labels and variants.
    pub fn entry_count(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<RuleEntry> for RuleEntryMap {
    fn from_iter<T: IntoIterator<Item = RuleEntry>>(iter: T) -> Self {
        let mut map = RuleEntryMap::new();
        for entry in iter {
            map.insert(entry);
        }
        map
    }
}

impl Extend<RuleEntry> for RuleEntryMap {
    fn extend<T: IntoIterator<Item = RuleEntry>>(&mut self, iter: T) {
        for entry in iter {
            self.insert(entry);
        }
    }
}
