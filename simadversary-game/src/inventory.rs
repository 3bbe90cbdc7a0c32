//! Inventory collection and the policy that maintains it.
//!
//! The collection keeps insertion order for display. The policy owns the
//! credential-exclusivity rule: adding a credential-class item evicts every
//! held item that shares its base type.
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::config::GameConfig;
use crate::constants::{CATEGORY_ACCESS_KEYWORDS, CATEGORY_INFO_KEYWORDS, CATEGORY_TOOL_KEYWORDS};
use crate::data::RequiredItems;

/// Ordered set of item identifiers held by the player.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Inventory {
    items: Vec<String>,
}

impl Inventory {
    #[must_use]
    pub const fn new() -> Self {
        Self { items: Vec::new() }
    }

    #[must_use]
    pub fn contains(&self, item: &str) -> bool {
        self.items.iter().any(|held| held == item)
    }

    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        &self.items
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Display summary ("No items" when empty).
    #[must_use]
    pub fn summary(&self) -> String {
        if self.items.is_empty() {
            "No items".to_string()
        } else {
            self.items.join(", ")
        }
    }
}

impl<S: Into<String>> FromIterator<S> for Inventory {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self {
            items: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// Display buckets produced by [`InventoryPolicy::categorize`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorizedInventory {
    pub credentials: Vec<String>,
    pub tools: Vec<String>,
    pub information: Vec<String>,
    pub access: Vec<String>,
    pub other: Vec<String>,
}

/// Consistency report produced by [`InventoryPolicy::validate`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryReport {
    pub valid: bool,
    pub duplicates: Vec<String>,
    pub issues: Vec<String>,
}

/// Add/remove/query rules over an [`Inventory`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InventoryPolicy {
    credentials: BTreeMap<String, String>,
}

impl InventoryPolicy {
    #[must_use]
    pub const fn new(credentials: BTreeMap<String, String>) -> Self {
        Self { credentials }
    }

    #[must_use]
    pub fn from_config(config: &GameConfig) -> Self {
        Self::new(config.credentials.clone())
    }

    #[must_use]
    pub fn is_credential(&self, item: &str) -> bool {
        self.credentials.contains_key(item)
    }

    #[must_use]
    pub fn credential_base(&self, item: &str) -> Option<&str> {
        self.credentials.get(item).map(String::as_str)
    }

    /// Add an item, returning whether it was newly inserted.
    pub fn add(&self, inventory: &mut Inventory, item: &str) -> bool {
        if let Some(base) = self.credential_base(item) {
            inventory
                .items
                .retain(|held| held == item || self.credential_base(held) != Some(base));
        }
        if inventory.contains(item) {
            return false;
        }
        inventory.items.push(item.to_string());
        true
    }

    /// Remove the first matching item, returning whether anything was removed.
    pub fn remove(&self, inventory: &mut Inventory, item: &str) -> bool {
        if let Some(index) = inventory.items.iter().position(|held| held == item) {
            inventory.items.remove(index);
            true
        } else {
            false
        }
    }

    #[must_use]
    pub fn has(&self, inventory: &Inventory, item: &str) -> bool {
        inventory.contains(item)
    }

    /// Evaluate a required-items expression: every conjunct must hold, a
    /// disjunction holds when any listed item is present.
    #[must_use]
    pub fn meets_requirements(&self, inventory: &Inventory, required: &RequiredItems) -> bool {
        required
            .iter()
            .all(|requirement| requirement.satisfied_by(|item| self.has(inventory, item)))
    }

    #[must_use]
    pub fn categorize(&self, inventory: &Inventory) -> CategorizedInventory {
        let mut buckets = CategorizedInventory::default();
        for item in inventory.iter() {
            let lowered = item.to_lowercase();
            let matches = |keywords: &[&str]| keywords.iter().any(|kw| lowered.contains(kw));
            let bucket = if self.is_credential(item) {
                &mut buckets.credentials
            } else if matches(CATEGORY_TOOL_KEYWORDS) {
                &mut buckets.tools
            } else if matches(CATEGORY_INFO_KEYWORDS) {
                &mut buckets.information
            } else if matches(CATEGORY_ACCESS_KEYWORDS) {
                &mut buckets.access
            } else {
                &mut buckets.other
            };
            bucket.push(item.to_string());
        }
        buckets
    }

    /// Report duplicate entries and credential-exclusivity violations.
    #[must_use]
    pub fn validate(&self, inventory: &Inventory) -> InventoryReport {
        let mut report = InventoryReport {
            valid: true,
            ..InventoryReport::default()
        };
        let mut seen = BTreeSet::new();
        let mut bases = BTreeSet::new();
        for item in inventory.iter() {
            if !seen.insert(item) {
                report.duplicates.push(item.to_string());
                report.valid = false;
            }
            if let Some(base) = self.credential_base(item)
                && !bases.insert(base)
            {
                report
                    .issues
                    .push(format!("Multiple credentials of type: {base}"));
                report.valid = false;
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Requirement;

    fn policy() -> InventoryPolicy {
        let mut credentials = BTreeMap::new();
        credentials.insert("User credentials".to_string(), "user".to_string());
        credentials.insert("Developer credentials".to_string(), "user".to_string());
        credentials.insert("Domain Administrator credentials".to_string(), "admin".to_string());
        InventoryPolicy::new(credentials)
    }

    #[test]
    fn add_is_idempotent_and_ordered() {
        let policy = policy();
        let mut inventory = Inventory::new();
        assert!(policy.add(&mut inventory, "Network Map"));
        assert!(policy.add(&mut inventory, "Persistence"));
        assert!(!policy.add(&mut inventory, "Network Map"));
        assert_eq!(inventory.as_slice(), ["Network Map", "Persistence"]);
    }

    #[test]
    fn credential_of_same_base_evicts_previous() {
        let policy = policy();
        let mut inventory = Inventory::new();
        policy.add(&mut inventory, "User credentials");
        policy.add(&mut inventory, "Domain Administrator credentials");
        policy.add(&mut inventory, "Developer credentials");
        assert!(!inventory.contains("User credentials"));
        assert!(inventory.contains("Developer credentials"));
        assert!(inventory.contains("Domain Administrator credentials"));
        assert!(policy.validate(&inventory).valid);
    }

    #[test]
    fn requirements_support_and_of_or() {
        let policy = policy();
        let inventory: Inventory = ["Network Map", "Payload"].into_iter().collect();
        let required = vec![
            Requirement::Item("Network Map".to_string()),
            Requirement::AnyOf(vec!["Macro".to_string(), "Payload".to_string()]),
        ];
        assert!(policy.meets_requirements(&inventory, &required));
        let missing = vec![Requirement::AnyOf(vec!["Macro".to_string()])];
        assert!(!policy.meets_requirements(&inventory, &missing));
        assert!(policy.meets_requirements(&inventory, &Vec::new()));
    }

    #[test]
    fn remove_reports_presence() {
        let policy = policy();
        let mut inventory: Inventory = ["Persistence"].into_iter().collect();
        assert!(policy.remove(&mut inventory, "Persistence"));
        assert!(!policy.remove(&mut inventory, "Persistence"));
        assert!(inventory.is_empty());
        assert_eq!(inventory.summary(), "No items");
    }

    #[test]
    fn categorize_and_validate_buckets() {
        let policy = policy();
        let inventory: Inventory = [
            "User credentials",
            "Exploit kit",
            "Internal IP List",
            "Workstation Foothold",
            "NTDS.dit",
            "User credentials",
            "Developer credentials",
        ]
        .into_iter()
        .collect();
        let buckets = policy.categorize(&inventory);
        assert_eq!(buckets.tools, vec!["Exploit kit"]);
        assert_eq!(buckets.information, vec!["Internal IP List"]);
        assert_eq!(buckets.access, vec!["Workstation Foothold"]);
        assert_eq!(buckets.other, vec!["NTDS.dit"]);
        assert_eq!(buckets.credentials.len(), 3);

        let report = policy.validate(&inventory);
        assert!(!report.valid);
        assert_eq!(report.duplicates, vec!["User credentials"]);
        assert_eq!(report.issues.len(), 2);
    }
}
