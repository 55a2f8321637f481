//! Immutable configuration trees.
//!
//! A [`Snapshot`] maps every [`NodePath`] it contains to a [`ConfigNode`].
//! Containers do not embed their children; the children of a container
//! are simply the entries one segment below its path.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ConfigError;
use crate::path::NodePath;

/// Typed attribute value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<Value>),
    Record(Record),
}

/// Flat set of named attributes.
pub type Record = BTreeMap<String, Value>;

impl Value {
    /// Truthiness used by template conditionals.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::List(items) => !items.is_empty(),
            Value::Record(fields) => !fields.is_empty(),
            Value::Int(_) | Value::Str(_) => true,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Record(fields) => Some(fields),
            _ => None,
        }
    }

    /// Looks up a field of a record value.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.as_record().and_then(|fields| fields.get(name))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Str(s) => f.write_str(s),
            Value::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{item}")?;
                }
                Ok(())
            }
            Value::Record(fields) => match serde_json::to_string(fields) {
                Ok(text) => f.write_str(&text),
                Err(_) => Err(fmt::Error),
            },
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<u16> for Value {
    fn from(value: u16) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<Record> for Value {
    fn from(value: Record) -> Self {
        Value::Record(value)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(values: Vec<T>) -> Self {
        Value::List(values.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Leaf,
    Container,
}

/// Value stored at one path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigNode {
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: Record,
}

impl ConfigNode {
    pub fn leaf() -> Self {
        Self {
            kind: NodeKind::Leaf,
            attributes: Record::new(),
        }
    }

    pub fn container() -> Self {
        Self {
            kind: NodeKind::Container,
            attributes: Record::new(),
        }
    }

    /// Builder-style attribute setter. `Null` values are not stored.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let value = value.into();
        if !value.is_null() {
            self.attributes.insert(name.into(), value);
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    pub fn get_int(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_int)
    }

    pub fn is_container(&self) -> bool {
        self.kind == NodeKind::Container
    }
}

/// Full configuration tree at one instant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    nodes: BTreeMap<NodePath, ConfigNode>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `node` at `path`, creating empty containers for any missing
    /// ancestor below the root.
    pub fn insert(&mut self, path: NodePath, node: ConfigNode) -> Option<ConfigNode> {
        for ancestor in path.ancestors() {
            if ancestor.is_root() || self.nodes.contains_key(&ancestor) {
                continue;
            }
            self.nodes.insert(ancestor, ConfigNode::container());
        }
        self.nodes.insert(path, node)
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, path: NodePath, node: ConfigNode) -> Self {
        self.insert(path, node);
        self
    }

    pub fn get(&self, path: &NodePath) -> Option<&ConfigNode> {
        self.nodes.get(path)
    }

    pub fn contains(&self, path: &NodePath) -> bool {
        self.nodes.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodePath, &ConfigNode)> {
        self.nodes.iter()
    }

    pub fn paths(&self) -> impl Iterator<Item = &NodePath> {
        self.nodes.keys()
    }

    /// `path` itself (if present) and everything beneath it, in pre-order.
    pub fn subtree<'a>(
        &'a self,
        path: &'a NodePath,
    ) -> impl Iterator<Item = (&'a NodePath, &'a ConfigNode)> + 'a {
        self.nodes
            .range(path.clone()..)
            .take_while(move |(p, _)| *p == path || path.is_ancestor_of(p))
    }

    /// Direct children of `path`.
    pub fn children<'a>(
        &'a self,
        path: &'a NodePath,
    ) -> impl Iterator<Item = (&'a NodePath, &'a ConfigNode)> + 'a {
        let depth = path.len() + 1;
        self.subtree(path).filter(move |(p, _)| p.len() == depth)
    }

    /// Every path present in either snapshot, in pre-order.
    pub fn union_paths<'a>(&'a self, other: &'a Snapshot) -> BTreeSet<&'a NodePath> {
        self.nodes.keys().chain(other.nodes.keys()).collect()
    }

    /// Parses a desired-state document: a JSON object mapping path strings
    /// to nodes.
    pub fn from_json(document: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(document).map_err(|e| ConfigError::InvalidDocument(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::InvalidDocument(e.to_string()))
    }
}

impl FromIterator<(NodePath, ConfigNode)> for Snapshot {
    fn from_iter<T: IntoIterator<Item = (NodePath, ConfigNode)>>(iter: T) -> Self {
        let mut snapshot = Snapshot::new();
        for (path, node) in iter {
            snapshot.insert(path, node);
        }
        snapshot
    }
}

impl Serialize for Snapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.nodes.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Snapshot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let nodes = BTreeMap::<NodePath, ConfigNode>::deserialize(deserializer)?;
        Ok(nodes.into_iter().collect())
    }
}
