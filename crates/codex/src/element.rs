//
// element.rs
//
// Semantic code elements, references and uses emitted by extractors
//

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::store::Store;
use crate::symbol_store::StoreKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Kind {
    Assembly,
    Module,
    Type,
    Func,
    Term,
}

impl Kind {
    /// Kinds whose uses can be renamed with plain text edits.
    pub fn is_renamable(self) -> bool {
        matches!(self, Kind::Func | Kind::Term)
    }

    /// Kinds that can enclose other elements.
    pub fn is_container(self) -> bool {
        !matches!(self, Kind::Term)
    }
}

/// Opaque reference to a definition.
///
/// The lineage is the element's name followed by its enclosing names,
/// innermost first. Two elements with the same lineage are the same
/// definition as far as resolution is concerned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ref(Vec<String>);

impl Ref {
    pub fn new<I, S>(lineage: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(lineage.into_iter().map(Into::into).collect())
    }

    pub fn name(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    /// Reference to the enclosing element, `None` for top-level elements.
    pub fn parent(&self) -> Option<Ref> {
        (self.0.len() > 1).then(|| Ref(self.0[1..].to_vec()))
    }

    pub fn lineage(&self) -> &[String] {
        &self.0
    }
}

impl std::fmt::Display for Ref {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut outermost_first: Vec<&str> = self.0.iter().map(String::as_str).collect();
        outermost_first.reverse();
        write!(f, "{}", outermost_first.join("."))
    }
}

/// Outward relation of an element, e.g. the method it overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub kind: RelationKind,
    pub target: Ref,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationKind {
    Overrides,
    Inherits,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    pub kind: Kind,
    pub name: String,
    /// Enclosing simple names, innermost first; empty for top-level elements.
    #[serde(default)]
    pub path: Vec<String>,
    #[serde(default, rename = "public")]
    pub is_public: bool,
    #[serde(default)]
    pub attrs: BTreeSet<String>,
    pub offset: usize,
    pub length: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relations: Vec<Relation>,
}

impl Element {
    pub fn new(kind: Kind, name: impl Into<String>, offset: usize) -> Self {
        let name = name.into();
        let length = name.chars().count();
        Self {
            kind,
            name,
            path: Vec::new(),
            is_public: true,
            attrs: BTreeSet::new(),
            offset,
            length,
            signature: None,
            documentation: None,
            relations: Vec::new(),
        }
    }

    pub fn within<I, S>(mut self, path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.path = path.into_iter().map(Into::into).collect();
        self
    }

    pub fn to_ref(&self) -> Ref {
        Ref(std::iter::once(self.name.clone())
            .chain(self.path.iter().cloned())
            .collect())
    }
}

/// A recorded occurrence of a reference to a definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Use {
    pub target: Ref,
    pub kind: Kind,
    pub offset: usize,
    pub length: usize,
}

/// An element together with where it was found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Definition {
    pub store: Store,
    /// Symbol store that produced this definition.
    pub origin: StoreKey,
    pub element: Element,
}

impl Definition {
    pub fn to_ref(&self) -> Ref {
        self.element.to_ref()
    }

    pub fn kind(&self) -> Kind {
        self.element.kind
    }

    pub fn name(&self) -> &str {
        &self.element.name
    }
}

/// Output of one extraction pass over a store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub elements: Vec<Element>,
    pub uses: Vec<Use>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ref_lineage_and_parent() {
        let elem = Element::new(Kind::Func, "run", 4).within(["Worker", "jobs"]);
        let r = elem.to_ref();
        assert_eq!(r.name(), Some("run"));
        assert_eq!(r.to_string(), "jobs.Worker.run");
        assert_eq!(r.parent(), Some(Ref::new(["Worker", "jobs"])));
        assert_eq!(Ref::new(["jobs"]).parent(), None);
    }

    #[test]
    fn test_new_element_length_is_name_length() {
        let elem = Element::new(Kind::Term, "größe", 0);
        assert_eq!(elem.length, 5);
    }

    #[test]
    fn test_renamable_kinds() {
        assert!(Kind::Func.is_renamable());
        assert!(Kind::Term.is_renamable());
        assert!(!Kind::Type.is_renamable());
        assert!(!Kind::Module.is_renamable());
    }

    #[test]
    fn test_element_json_defaults() {
        let json = r#"{"kind":"Type","name":"Foo","offset":3,"length":3}"#;
        let elem: Element = serde_json::from_str(json).unwrap();
        assert!(elem.path.is_empty());
        assert!(!elem.is_public);
        assert!(elem.relations.is_empty());
    }
}
