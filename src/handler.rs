//! Reader and writer contracts.
//!
//! Handlers never talk to a session themselves. A reader names the command
//! whose output it needs and parses that output; a writer turns before/after
//! values into a [`CommandBatch`]. The engine performs every exchange, which
//! keeps caching, ordering and failure classification in one place.

use std::fmt;
use std::sync::Arc;

use crate::error::HandlerError;
use crate::path::{Key, NodePath};
use crate::snapshot::{ConfigNode, Snapshot};
use crate::template::{Bindings, Template};

/// Ordered literal command lines submitted as one unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandBatch {
    lines: Vec<String>,
}

impl CommandBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Splits rendered text into lines, dropping blank ones and trailing
    /// whitespace. Leading indentation is kept.
    pub fn from_text(text: &str) -> Self {
        Self {
            lines: text
                .lines()
                .map(str::trim_end)
                .filter(|line| !line.trim().is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    /// Renders `template` and splits the result.
    pub fn render(template: &Template, bindings: &Bindings) -> Self {
        Self::from_text(&template.render(bindings))
    }

    pub fn push(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    pub fn extend(&mut self, other: CommandBatch) {
        self.lines.extend(other.lines);
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Surrounds the batch with mode entry and exit lines.
    pub fn framed(&self, enter: &[String], exit: &[String]) -> Vec<String> {
        enter
            .iter()
            .chain(self.lines.iter())
            .chain(exit.iter())
            .cloned()
            .collect()
    }
}

impl fmt::Display for CommandBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.lines.join("\n"))
    }
}

impl<S: Into<String>> FromIterator<S> for CommandBatch {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self {
            lines: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// Read-only view of both snapshots of the running pass.
#[derive(Debug, Clone, Copy)]
pub struct WriteContext<'a> {
    pub before: &'a Snapshot,
    pub after: &'a Snapshot,
}

/// How a modified node is converged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdatePolicy {
    /// Delete the old value, then create the new one, as two batches.
    #[default]
    Replace,
    /// Send the batch produced by [`Writer::update`].
    Incremental,
}

/// Turns device output into configuration values.
pub trait Reader: Send + Sync {
    /// Command whose output describes the node at `path`. `None` when the
    /// node can be built from its path alone.
    fn read_command(&self, path: &NodePath) -> Option<String>;

    /// Builds the node from `output`; `Ok(None)` means the node is absent.
    fn read_one(&self, path: &NodePath, output: &str) -> Result<Option<ConfigNode>, HandlerError>;

    /// For list nodes: command listing the entries under `parent`.
    fn list_command(&self, _parent: &NodePath) -> Option<String> {
        None
    }

    /// For list nodes: keys of the entries found in `output`.
    fn read_all(&self, _parent: &NodePath, _output: &str) -> Result<Vec<Key>, HandlerError> {
        Ok(Vec::new())
    }
}

/// Turns configuration changes into command batches.
pub trait Writer: Send + Sync {
    fn create(
        &self,
        path: &NodePath,
        after: &ConfigNode,
        ctx: &WriteContext<'_>,
    ) -> Result<CommandBatch, HandlerError>;

    fn delete(
        &self,
        path: &NodePath,
        before: &ConfigNode,
        ctx: &WriteContext<'_>,
    ) -> Result<CommandBatch, HandlerError>;

    /// Defaults to the delete lines followed by the create lines.
    fn update(
        &self,
        path: &NodePath,
        before: &ConfigNode,
        after: &ConfigNode,
        ctx: &WriteContext<'_>,
    ) -> Result<CommandBatch, HandlerError> {
        let mut batch = self.delete(path, before, ctx)?;
        batch.extend(self.create(path, after, ctx)?);
        Ok(batch)
    }

    fn update_policy(&self) -> UpdatePolicy {
        UpdatePolicy::Replace
    }
}

/// What a registration binds to its path pattern.
#[derive(Clone)]
pub enum Handler {
    /// Pure container: no commands in either direction.
    Structural,
    Read(Arc<dyn Reader>),
    Write(Arc<dyn Writer>),
    ReadWrite(Arc<dyn Reader>, Arc<dyn Writer>),
}

impl Handler {
    /// One object serving both directions.
    pub fn read_write<T: Reader + Writer + 'static>(handler: T) -> Self {
        let shared = Arc::new(handler);
        Handler::ReadWrite(shared.clone(), shared)
    }

    pub fn reader(&self) -> Option<&Arc<dyn Reader>> {
        match self {
            Handler::Read(r) | Handler::ReadWrite(r, _) => Some(r),
            _ => None,
        }
    }

    pub fn writer(&self) -> Option<&Arc<dyn Writer>> {
        match self {
            Handler::Write(w) | Handler::ReadWrite(_, w) => Some(w),
            _ => None,
        }
    }

    pub fn is_structural(&self) -> bool {
        matches!(self, Handler::Structural)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Handler::Structural => "Structural",
            Handler::Read(_) => "Read",
            Handler::Write(_) => "Write",
            Handler::ReadWrite(_, _) => "ReadWrite",
        };
        f.write_str(name)
    }
}
