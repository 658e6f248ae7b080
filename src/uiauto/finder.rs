//! Composable queries against an accessibility-tree snapshot.
//!
//! A [`Finder`] is a conjunction of node predicates, optionally scoped
//! below an ancestor and required to contain a descendant, plus a
//! selector choosing among the matches (first, nth, or unique).

use std::fmt;

use regex::Regex;

use crate::core::errors::{IthError, Result};
use crate::uiauto::node::{NodeState, Role, UiNode};

#[derive(Debug, Clone)]
enum Predicate {
    Name(String),
    NameRegex(Regex),
    NameStartingWith(String),
    NameContaining(String),
    ClassName(String),
    HasClass(String),
    Role(Role),
    InputType(String),
    Attribute(String, String),
    State(NodeState, bool),
}

impl Predicate {
    fn matches(&self, node: &UiNode) -> bool {
        match self {
            Self::Name(n) => node.name == *n,
            Self::NameRegex(re) => re.is_match(&node.name),
            Self::NameStartingWith(p) => node.name.starts_with(p.as_str()),
            Self::NameContaining(p) => node.name.contains(p.as_str()),
            Self::ClassName(c) => node.class_name == *c,
            Self::HasClass(c) => node.has_class(c),
            Self::Role(r) => node.role == *r,
            Self::InputType(t) => node.input_type() == Some(t.as_str()),
            Self::Attribute(k, v) => node.html_attributes.get(k) == Some(v),
            Self::State(s, want) => node.has_state(*s) == *want,
        }
    }

    fn describe(&self, out: &mut Vec<String>) {
        out.push(match self {
            Self::Name(n) => format!("name: {n:?}"),
            Self::NameRegex(re) => format!("name: /{}/", re.as_str()),
            Self::NameStartingWith(p) => format!("name: {p:?}*"),
            Self::NameContaining(p) => format!("name: *{p:?}*"),
            Self::ClassName(c) => format!("className: {c:?}"),
            Self::HasClass(c) => format!("hasClass: {c:?}"),
            Self::Role(r) => format!("role: {r:?}"),
            Self::InputType(t) => format!("inputType: {t:?}"),
            Self::Attribute(k, v) => format!("{k}: {v:?}"),
            Self::State(s, want) => format!("{s:?}: {want}"),
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Selector {
    #[default]
    First,
    Nth(usize),
    Unique,
}

/// Query against the UI tree.
#[derive(Debug, Clone, Default)]
pub struct Finder {
    predicates: Vec<Predicate>,
    ancestor: Option<Box<Finder>>,
    descendant: Option<Box<Finder>>,
    selector: Selector,
}

impl Finder {
    pub fn new() -> Self {
        Self::default()
    }

    fn with(mut self, p: Predicate) -> Self {
        self.predicates.push(p);
        self
    }

    #[must_use]
    pub fn name(self, name: impl Into<String>) -> Self {
        self.with(Predicate::Name(name.into()))
    }

    #[must_use]
    pub fn name_regex(self, re: Regex) -> Self {
        self.with(Predicate::NameRegex(re))
    }

    #[must_use]
    pub fn name_starting_with(self, prefix: impl Into<String>) -> Self {
        self.with(Predicate::NameStartingWith(prefix.into()))
    }

    #[must_use]
    pub fn name_containing(self, part: impl Into<String>) -> Self {
        self.with(Predicate::NameContaining(part.into()))
    }

    /// Exact match on the full class attribute.
    #[must_use]
    pub fn class_name(self, class: impl Into<String>) -> Self {
        self.with(Predicate::ClassName(class.into()))
    }

    /// Match one of the space-separated class names.
    #[must_use]
    pub fn has_class(self, class: impl Into<String>) -> Self {
        self.with(Predicate::HasClass(class.into()))
    }

    #[must_use]
    pub fn role(self, role: Role) -> Self {
        self.with(Predicate::Role(role))
    }

    #[must_use]
    pub fn input_type(self, ty: impl Into<String>) -> Self {
        self.with(Predicate::InputType(ty.into()))
    }

    #[must_use]
    pub fn attribute(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.with(Predicate::Attribute(key.into(), value.into()))
    }

    #[must_use]
    pub fn state(self, state: NodeState, value: bool) -> Self {
        self.with(Predicate::State(state, value))
    }

    #[must_use]
    pub fn focused(self) -> Self {
        self.state(NodeState::Focused, true)
    }

    #[must_use]
    pub fn editable(self) -> Self {
        self.state(NodeState::Editable, true)
    }

    #[must_use]
    pub fn visible(self) -> Self {
        self.state(NodeState::Invisible, false)
    }

    /// Only consider nodes strictly below the node `ancestor` resolves to.
    #[must_use]
    pub fn ancestor(mut self, ancestor: Self) -> Self {
        self.ancestor = Some(Box::new(ancestor));
        self
    }

    /// Only match nodes that contain a node matching `descendant`.
    #[must_use]
    pub fn descendant(mut self, descendant: Self) -> Self {
        self.descendant = Some(Box::new(descendant));
        self
    }

    #[must_use]
    pub fn first(mut self) -> Self {
        self.selector = Selector::First;
        self
    }

    /// Select the `n`th (0-based) match.
    #[must_use]
    pub fn nth(mut self, n: usize) -> Self {
        self.selector = Selector::Nth(n);
        self
    }

    /// Fail resolution when more than one node matches.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.selector = Selector::Unique;
        self
    }

    fn matches_self(&self, node: &UiNode) -> bool {
        self.predicates.iter().all(|p| p.matches(node))
            && self
                .descendant
                .as_ref()
                .is_none_or(|d| node.children.iter().any(|c| !d.find_all(c).is_empty()))
    }

    /// Every node in `root` matching the predicates, in pre-order.
    pub fn find_all<'a>(&self, root: &'a UiNode) -> Vec<&'a UiNode> {
        let scope: Vec<&'a UiNode> = match &self.ancestor {
            Some(ancestor) => match ancestor.resolve(root) {
                Ok(a) => a.iter().skip(1).collect(),
                Err(_) => Vec::new(),
            },
            None => root.iter().collect(),
        };
        scope
            .into_iter()
            .filter(|node| self.matches_self(node))
            .collect()
    }

    /// The node selected by this finder.
    pub fn resolve<'a>(&self, root: &'a UiNode) -> Result<&'a UiNode> {
        let matches = self.find_all(root);
        let picked = match self.selector {
            Selector::First => matches.first().copied(),
            Selector::Nth(n) => matches.get(n).copied(),
            Selector::Unique => {
                if matches.len() > 1 {
                    return Err(IthError::automation(format!(
                        "{} nodes match {}, expected exactly one",
                        matches.len(),
                        self.pretty()
                    )));
                }
                matches.first().copied()
            }
        };
        picked.ok_or_else(|| IthError::NodeNotFound {
            finder: self.pretty(),
        })
    }

    /// Human-readable description used in error messages.
    pub fn pretty(&self) -> String {
        let mut parts = Vec::new();
        for p in &self.predicates {
            p.describe(&mut parts);
        }
        if let Some(a) = &self.ancestor {
            parts.push(format!("ancestor: {}", a.pretty()));
        }
        if let Some(d) = &self.descendant {
            parts.push(format!("descendant: {}", d.pretty()));
        }
        match self.selector {
            Selector::First => {}
            Selector::Nth(n) => parts.push(format!("nth: {n}")),
            Selector::Unique => parts.push("unique".to_string()),
        }
        format!("{{{}}}", parts.join(", "))
    }
}

impl fmt::Display for Finder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pretty())
    }
}
