//! One-pass index over the resources of a bundle.
//!
//! Every resource is reachable by `Type/id`, by its entry `fullUrl` and, for
//! `urn:uuid:` full URLs, by the bare UUID form as well. Lookups never scan.

use std::collections::{BTreeSet, HashMap};

use serde_json::Value;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct ResourceIndex {
    resources: Vec<Value>,
    by_type: HashMap<String, Vec<usize>>,
    by_ref: HashMap<String, usize>,
}

impl ResourceIndex {
    /// Take the resources out of `bundle` and index them. Entries without a
    /// `resource` or a `resourceType` are skipped.
    pub fn build(bundle: Value) -> Self {
        let mut index = ResourceIndex::default();
        let Value::Object(mut bundle) = bundle else {
            return index;
        };
        let Some(Value::Array(entries)) = bundle.remove("entry") else {
            return index;
        };

        for entry in entries {
            let Value::Object(mut entry) = entry else {
                continue;
            };
            let full_url = entry
                .get("fullUrl")
                .and_then(Value::as_str)
                .map(str::to_string);
            let Some(resource) = entry.remove("resource") else {
                continue;
            };
            index.insert(resource, full_url);
        }

        debug!(
            resources = index.resources.len(),
            types = index.by_type.len(),
            "indexed FHIR bundle"
        );
        index
    }

    fn insert(&mut self, resource: Value, full_url: Option<String>) {
        let Some(resource_type) = resource
            .get("resourceType")
            .and_then(Value::as_str)
            .map(str::to_string)
        else {
            return;
        };
        let position = self.resources.len();

        if let Some(id) = resource.get("id").and_then(Value::as_str) {
            self.by_ref
                .entry(format!("{resource_type}/{id}"))
                .or_insert(position);
        }
        if let Some(url) = full_url {
            if let Some(uuid) = url.strip_prefix("urn:uuid:") {
                self.by_ref.entry(uuid.to_string()).or_insert(position);
            }
            self.by_ref.entry(url).or_insert(position);
        }

        self.by_type.entry(resource_type).or_default().push(position);
        self.resources.push(resource);
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn get(&self, position: usize) -> Option<&Value> {
        self.resources.get(position)
    }

    /// Resources of one type in bundle order.
    pub fn of_type<'a>(&'a self, resource_type: &str) -> impl Iterator<Item = &'a Value> + 'a {
        self.by_type
            .get(resource_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .filter_map(|position| self.resources.get(*position))
    }

    /// Positions of every resource of one type.
    pub fn positions_of_type(&self, resource_type: &str) -> BTreeSet<usize> {
        self.by_type
            .get(resource_type)
            .map(|positions| positions.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn position(&self, reference: &str) -> Option<usize> {
        let reference = reference.trim();
        if reference.is_empty() || reference.starts_with('#') {
            return None;
        }
        if let Some(position) = self.by_ref.get(reference) {
            return Some(*position);
        }
        let unversioned = reference
            .split_once("/_history/")
            .map_or(reference, |(head, _)| head);
        if let Some(position) = self.by_ref.get(unversioned) {
            return Some(*position);
        }
        // Absolute URLs fall back to their trailing `Type/id`.
        let mut segments = unversioned.rsplit('/');
        let id = segments.next()?;
        let resource_type = segments.next()?;
        self.by_ref.get(&format!("{resource_type}/{id}")).copied()
    }

    /// Resolve `Type/id`, `urn:uuid:...` or an absolute URL ending in `Type/id`.
    pub fn resolve(&self, reference: &str) -> Option<&Value> {
        self.position(reference)
            .and_then(|position| self.resources.get(position))
    }

    /// Resolve the `reference` field of a FHIR `Reference` element.
    pub fn resolve_reference(&self, reference: &Value) -> Option<&Value> {
        reference
            .get("reference")
            .and_then(Value::as_str)
            .and_then(|reference| self.resolve(reference))
    }
}

/// `resourceType` of a resource.
pub fn resource_type(resource: &Value) -> Option<&str> {
    resource.get("resourceType").and_then(Value::as_str)
}

/// Canonical `Type/id` key of a resource.
pub fn resource_key(resource: &Value) -> Option<String> {
    let id = resource.get("id").and_then(Value::as_str)?;
    Some(format!("{}/{id}", resource_type(resource)?))
}
