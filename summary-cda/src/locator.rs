//! Namespace-agnostic element lookup.
//!
//! Candidate order for every name:
//! 1. the unprefixed name (default namespace),
//! 2. `prefix:name` for each prefix declared on the document root,
//! 3. `{uri}name` for every namespace URI used by HL7 CDA and its extensions.
//!
//! The first candidate that matches anywhere in the searched scope wins.

use crate::xml::XmlElement;

/// Namespace URIs seen in CDA documents exchanged across borders.
pub const CDA_NAMESPACES: &[&str] = &[
    "urn:hl7-org:v3",
    "urn:hl7-org:v3/voc",
    "urn:hl7-org:sdtc",
    "urn:epsos-org:ep:medication",
    "urn:ihe:pharm:medication",
    "urn:ihe:pharm",
];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Candidate {
    Unprefixed(String),
    Prefixed { prefix: String, local: String },
    Clark { uri: &'static str, local: String },
}

impl Candidate {
    fn matches(&self, element: &XmlElement) -> bool {
        match self {
            Candidate::Unprefixed(local) => {
                element.name.prefix.is_none() && element.name.local == *local
            }
            Candidate::Prefixed { prefix, local } => {
                element.name.prefix.as_deref() == Some(prefix.as_str())
                    && element.name.local == *local
            }
            Candidate::Clark { uri, local } => {
                element.name.namespace.as_deref() == Some(*uri) && element.name.local == *local
            }
        }
    }
}

/// Lookup helper bound to the prefixes declared on one document root.
#[derive(Debug, Clone, Default)]
pub struct ElementLocator {
    root_prefixes: Vec<String>,
}

impl ElementLocator {
    pub fn for_root(root: &XmlElement) -> Self {
        let root_prefixes = root
            .namespaces
            .iter()
            .filter_map(|decl| decl.prefix.clone())
            .collect();
        Self { root_prefixes }
    }

    pub fn root_prefixes(&self) -> &[String] {
        &self.root_prefixes
    }

    fn candidates(&self, local: &str) -> Vec<Candidate> {
        let mut out = Vec::with_capacity(1 + self.root_prefixes.len() + CDA_NAMESPACES.len());
        out.push(Candidate::Unprefixed(local.to_string()));
        for prefix in &self.root_prefixes {
            out.push(Candidate::Prefixed {
                prefix: prefix.clone(),
                local: local.to_string(),
            });
        }
        for uri in CDA_NAMESPACES.iter().copied() {
            out.push(Candidate::Clark {
                uri,
                local: local.to_string(),
            });
        }
        out
    }

    /// First descendant of `scope` matching any of `names`.
    pub fn find<'a>(&self, scope: &'a XmlElement, names: &[&str]) -> Option<&'a XmlElement> {
        let descendants = scope.descendants();
        names.iter().find_map(|name| {
            self.candidates(name).into_iter().find_map(|candidate| {
                descendants
                    .iter()
                    .copied()
                    .find(|element| candidate.matches(element))
            })
        })
    }

    /// Every descendant of `scope` matching any of `names`, in document order.
    pub fn find_all<'a>(&self, scope: &'a XmlElement, names: &[&str]) -> Vec<&'a XmlElement> {
        let candidates = self.all_candidates(names);
        scope
            .descendants()
            .into_iter()
            .filter(|element| candidates.iter().any(|c| c.matches(element)))
            .collect()
    }

    /// First direct child of `parent` matching any of `names`.
    pub fn child<'a>(&self, parent: &'a XmlElement, names: &[&str]) -> Option<&'a XmlElement> {
        names.iter().find_map(|name| {
            self.candidates(name)
                .into_iter()
                .find_map(|candidate| parent.elements().find(|element| candidate.matches(element)))
        })
    }

    /// Every direct child of `parent` matching any of `names`, in document order.
    pub fn children<'a>(&self, parent: &'a XmlElement, names: &[&str]) -> Vec<&'a XmlElement> {
        let candidates = self.all_candidates(names);
        parent
            .elements()
            .filter(|element| candidates.iter().any(|c| c.matches(element)))
            .collect()
    }

    /// Follow a chain of direct-child steps.
    pub fn path<'a>(&self, start: &'a XmlElement, steps: &[&str]) -> Option<&'a XmlElement> {
        steps
            .iter()
            .try_fold(start, |current, step| self.child(current, &[*step]))
    }

    /// Every element reachable through a chain of child steps (fan-out at each step).
    pub fn path_all<'a>(&self, start: &'a XmlElement, steps: &[&str]) -> Vec<&'a XmlElement> {
        steps.iter().fold(vec![start], |current, step| {
            current
                .into_iter()
                .flat_map(|element| self.children(element, &[*step]))
                .collect()
        })
    }

    /// True when `element` itself is one of `names`.
    pub fn is(&self, element: &XmlElement, names: &[&str]) -> bool {
        self.all_candidates(names).iter().any(|c| c.matches(element))
    }

    fn all_candidates(&self, names: &[&str]) -> Vec<Candidate> {
        names.iter().flat_map(|name| self.candidates(name)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::parse_xml;

    #[test]
    fn candidate_order_prefers_unprefixed_name() {
        let root = parse_xml(
            r#"<doc xmlns:a="urn:x"><a:title>prefixed</a:title><title>plain</title></doc>"#,
        )
        .unwrap();
        let locator = ElementLocator::for_root(&root);
        let found = locator.find(&root, &["title"]).unwrap();
        assert_eq!(found.own_text().as_deref(), Some("plain"));
    }

    #[test]
    fn missing_element_is_not_an_error() {
        let root = parse_xml("<doc><a/></doc>").unwrap();
        let locator = ElementLocator::for_root(&root);
        assert!(locator.find(&root, &["section"]).is_none());
        assert!(locator.path(&root, &["a", "b"]).is_none());
        assert_eq!(locator.path_all(&root, &["a"]).len(), 1);
    }
}
