//! Applicability predicates for handler bindings.
//!
//! Several bindings may share one path pattern (for example one writer per
//! routing protocol under a generic `protocol[*]` list). A [`Check`] decides
//! which of them applies to a concrete path, given the snapshot the path is
//! being resolved against.

use std::fmt;
use std::sync::Arc;

use crate::path::{KeyValue, NodePath};
use crate::snapshot::{Snapshot, Value};

type PredicateFn = dyn Fn(&NodePath, &Snapshot) -> bool + Send + Sync;

#[derive(Clone)]
pub enum Check {
    /// Component `component` of the key of the last segment named `segment` equals `value`.
    KeyEquals {
        segment: String,
        component: usize,
        value: KeyValue,
    },
    /// Attribute of the node at the last segment named `segment` (or at the
    /// path itself when `segment` is `None`) equals `value`.
    AttributeEquals {
        segment: Option<String>,
        attribute: String,
        value: Value,
    },
    All(Vec<Check>),
    Any(Vec<Check>),
    Not(Box<Check>),
    Predicate(Arc<PredicateFn>),
}

impl Check {
    pub fn key_equals(segment: impl Into<String>, component: usize, value: KeyValue) -> Self {
        Check::KeyEquals {
            segment: segment.into(),
            component,
            value,
        }
    }

    pub fn attribute_equals(
        segment: Option<&str>,
        attribute: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        Check::AttributeEquals {
            segment: segment.map(str::to_string),
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    pub fn predicate(f: impl Fn(&NodePath, &Snapshot) -> bool + Send + Sync + 'static) -> Self {
        Check::Predicate(Arc::new(f))
    }

    pub fn evaluate(&self, path: &NodePath, snapshot: &Snapshot) -> bool {
        match self {
            Check::KeyEquals {
                segment,
                component,
                value,
            } => path
                .key_of(segment)
                .and_then(|key| key.get(*component))
                .is_some_and(|actual| actual == value),
            Check::AttributeEquals {
                segment,
                attribute,
                value,
            } => {
                let target = match segment {
                    Some(name) => path.up_to(name),
                    None => Some(path.clone()),
                };
                target
                    .and_then(|target| snapshot.get(&target).and_then(|n| n.get(attribute)).cloned())
                    .is_some_and(|actual| &actual == value)
            }
            Check::All(checks) => checks.iter().all(|c| c.evaluate(path, snapshot)),
            Check::Any(checks) => checks.iter().any(|c| c.evaluate(path, snapshot)),
            Check::Not(check) => !check.evaluate(path, snapshot),
            Check::Predicate(f) => f(path, snapshot),
        }
    }
}

impl fmt::Debug for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Check::KeyEquals {
                segment,
                component,
                value,
            } => write!(f, "KeyEquals({segment}[{component}] == {value})"),
            Check::AttributeEquals {
                segment,
                attribute,
                value,
            } => write!(
                f,
                "AttributeEquals({}.{attribute} == {value:?})",
                segment.as_deref().unwrap_or(".")
            ),
            Check::All(checks) => f.debug_tuple("All").field(checks).finish(),
            Check::Any(checks) => f.debug_tuple("Any").field(checks).finish(),
            Check::Not(check) => f.debug_tuple("Not").field(check).finish(),
            Check::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}
