//! Accessibility-tree snapshot model.

#![allow(missing_docs)]

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

/// Screen coordinate in DIPs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Screen rectangle in DIPs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub const fn new(left: i32, top: i32, width: i32, height: i32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn center(&self) -> Point {
        Point::new(
            f64::from(self.left) + f64::from(self.width) / 2.0,
            f64::from(self.top) + f64::from(self.height) / 2.0,
        )
    }

    pub const fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    pub fn contains(&self, p: Point) -> bool {
        p.x >= f64::from(self.left)
            && p.y >= f64::from(self.top)
            && p.x < f64::from(self.left + self.width)
            && p.y < f64::from(self.top + self.height)
    }
}

/// Accessibility role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    RootWebArea,
    Window,
    Dialog,
    Button,
    StaticText,
    TextField,
    TextFieldWithComboBox,
    SearchBox,
    Keyboard,
    GenericContainer,
    Group,
    Menu,
    MenuItem,
    ListBox,
    ListBoxOption,
    Image,
    Link,
    Canvas,
    Heading,
    #[serde(other)]
    Unknown,
}

/// Boolean accessibility states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeState {
    Focused,
    Focusable,
    Editable,
    Protected,
    Invisible,
    Offscreen,
    Multiline,
    Readonly,
    Disabled,
}

/// One node of an accessibility-tree snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UiNode {
    pub id: u64,
    pub role: Role,
    pub name: String,
    pub class_name: String,
    pub value: String,
    pub html_attributes: BTreeMap<String, String>,
    pub state: BTreeSet<NodeState>,
    pub location: Rect,
    pub children: Vec<UiNode>,
}

impl Default for UiNode {
    fn default() -> Self {
        Self {
            id: 0,
            role: Role::GenericContainer,
            name: String::new(),
            class_name: String::new(),
            value: String::new(),
            html_attributes: BTreeMap::new(),
            state: BTreeSet::new(),
            location: Rect::default(),
            children: Vec::new(),
        }
    }
}

impl UiNode {
    /// HTML `type` attribute of an input element.
    pub fn input_type(&self) -> Option<&str> {
        self.html_attributes.get("type").map(String::as_str)
    }

    pub fn has_state(&self, state: NodeState) -> bool {
        self.state.contains(&state)
    }

    /// Whether `class` is one of the space-separated class names.
    pub fn has_class(&self, class: &str) -> bool {
        self.class_name.split_whitespace().any(|c| c == class)
    }

    /// Depth-first pre-order iterator over this node and its descendants.
    pub fn iter(&self) -> impl Iterator<Item = &Self> {
        let mut stack = vec![self];
        std::iter::from_fn(move || {
            let node = stack.pop()?;
            stack.extend(node.children.iter().rev());
            Some(node)
        })
    }

    pub fn find_by_id(&self, id: u64) -> Option<&Self> {
        self.iter().find(|n| n.id == id)
    }

    /// Node currently holding keyboard focus.
    pub fn focused(&self) -> Option<&Self> {
        self.iter().find(|n| n.has_state(NodeState::Focused))
    }

    pub fn info(&self) -> NodeInfo {
        NodeInfo {
            id: self.id,
            role: self.role,
            name: self.name.clone(),
            class_name: self.class_name.clone(),
            value: self.value.clone(),
            input_type: self.input_type().map(str::to_string),
            state: self.state.clone(),
            location: self.location,
        }
    }
}

/// Flat attributes of a node, as returned by `info`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: u64,
    pub role: Role,
    pub name: String,
    pub class_name: String,
    pub value: String,
    pub input_type: Option<String>,
    pub state: BTreeSet<NodeState>,
    pub location: Rect,
}

/// Render the subtree as indented text for failure diagnostics.
pub fn dump_tree(root: &UiNode) -> String {
    let mut out = String::new();
    dump_into(root, 0, &mut out);
    out
}

fn dump_into(node: &UiNode, depth: usize, out: &mut String) {
    let _ = write!(out, "{:indent$}{:?}", "", node.role, indent = depth * 2);
    if !node.name.is_empty() {
        let _ = write!(out, " name={:?}", node.name);
    }
    if !node.class_name.is_empty() {
        let _ = write!(out, " class={:?}", node.class_name);
    }
    if !node.value.is_empty() {
        let _ = write!(out, " value={:?}", node.value);
    }
    if !node.state.is_empty() {
        let _ = write!(out, " state={:?}", node.state);
    }
    let r = node.location;
    let _ = writeln!(
        out,
        " rect=({},{} {}x{})",
        r.left, r.top, r.width, r.height
    );
    for child in &node.children {
        dump_into(child, depth + 1, out);
    }
}
