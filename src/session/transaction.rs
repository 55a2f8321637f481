use super::*;

/// How a path differs between the two snapshots of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Unchanged,
    Added,
    Removed,
    Modified,
}

/// Compares one node in isolation; children are compared at their own paths.
pub fn classify(before: Option<&ConfigNode>, after: Option<&ConfigNode>) -> ChangeKind {
    match (before, after) {
        (None, None) => ChangeKind::Unchanged,
        (None, Some(_)) => ChangeKind::Added,
        (Some(_), None) => ChangeKind::Removed,
        (Some(b), Some(a)) if b == a => ChangeKind::Unchanged,
        (Some(_), Some(_)) => ChangeKind::Modified,
    }
}

/// Lifecycle of one reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TxState {
    Planning,
    Executing,
    Committed,
    Failed,
}

/// Which writer operation produced a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum BatchPhase {
    Delete,
    Create,
    Update,
}

/// One write the engine will perform.
#[derive(Debug, Clone)]
pub struct PlannedOp<'r> {
    pub path: NodePath,
    pub kind: ChangeKind,
    pub binding: &'r Binding,
    pub before: Option<ConfigNode>,
    pub after: Option<ConfigNode>,
    /// Descendant paths whose changes this op carries for a subtree writer.
    pub folded: Vec<NodePath>,
}

impl PlannedOp<'_> {
    pub(super) fn failure(&self, phase: BatchPhase, cause: Cause) -> TxError {
        match phase {
            BatchPhase::Delete => TxError::DeleteFailed {
                path: self.path.clone(),
                value: self.before.clone(),
                cause,
            },
            BatchPhase::Create | BatchPhase::Update => TxError::WriteFailed {
                path: self.path.clone(),
                value: self.after.clone(),
                cause,
            },
        }
    }

    /// Renders the batches for this op, in submission order.
    ///
    /// Empty batches are kept; the caller decides whether to skip them.
    pub fn render(&self, ctx: &WriteContext<'_>) -> Result<Vec<(BatchPhase, CommandBatch)>, TxError> {
        let Some(writer) = self.binding.handler().writer() else {
            let phase = if self.kind == ChangeKind::Removed {
                BatchPhase::Delete
            } else {
                BatchPhase::Create
            };
            return Err(self.failure(phase, Cause::NoHandler));
        };

        let handler_error = |phase: BatchPhase| {
            move |err: crate::error::HandlerError| self.failure(phase, Cause::Handler(err))
        };

        match (self.kind, &self.before, &self.after) {
            (ChangeKind::Added, _, Some(after)) => {
                let batch = writer
                    .create(&self.path, after, ctx)
                    .map_err(handler_error(BatchPhase::Create))?;
                Ok(vec![(BatchPhase::Create, batch)])
            }
            (ChangeKind::Removed, Some(before), _) => {
                let batch = writer
                    .delete(&self.path, before, ctx)
                    .map_err(handler_error(BatchPhase::Delete))?;
                Ok(vec![(BatchPhase::Delete, batch)])
            }
            (ChangeKind::Modified, Some(before), Some(after)) => {
                match self.binding.update_policy() {
                    UpdatePolicy::Replace => {
                        let delete = writer
                            .delete(&self.path, before, ctx)
                            .map_err(handler_error(BatchPhase::Delete))?;
                        let create = writer
                            .create(&self.path, after, ctx)
                            .map_err(handler_error(BatchPhase::Create))?;
                        Ok(vec![(BatchPhase::Delete, delete), (BatchPhase::Create, create)])
                    }
                    UpdatePolicy::Incremental => {
                        let batch = writer
                            .update(&self.path, before, after, ctx)
                            .map_err(handler_error(BatchPhase::Update))?;
                        Ok(vec![(BatchPhase::Update, batch)])
                    }
                }
            }
            _ => Ok(Vec::new()),
        }
    }
}

/// Ordered writes for one pass.
#[derive(Debug, Clone, Default)]
pub struct Plan<'r> {
    ops: Vec<PlannedOp<'r>>,
}

impl<'r> Plan<'r> {
    pub fn ops(&self) -> &[PlannedOp<'r>] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlannedOp<'r>> {
        self.ops.iter()
    }

    /// `(path, kind)` pairs in execution order.
    pub fn summary(&self) -> Vec<(NodePath, ChangeKind)> {
        self.ops.iter().map(|op| (op.path.clone(), op.kind)).collect()
    }
}

/// A batch as submitted (or, for a preview, as it would be submitted).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedBatch {
    pub path: NodePath,
    pub kind: ChangeKind,
    pub phase: BatchPhase,
    pub binding: String,
    /// Framed lines, including config-mode entry and exit.
    pub lines: Vec<String>,
}

/// Outcome of one pass.
#[derive(Debug, Clone)]
pub struct TxReport {
    pub session: SessionId,
    pub state: TxState,
    /// Batches that were sent, in order.
    pub executed: Vec<RenderedBatch>,
    /// Batches skipped because the writer produced no lines.
    pub skipped: usize,
    pub error: Option<TxError>,
}

impl TxReport {
    pub fn is_committed(&self) -> bool {
        self.state == TxState::Committed
    }

    pub fn into_result(self) -> Result<TxReport, TxError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }
}

/// The snapshot a path's checks are evaluated against.
fn check_snapshot<'s>(kind: ChangeKind, before: &'s Snapshot, after: &'s Snapshot) -> &'s Snapshot {
    if kind == ChangeKind::Removed {
        before
    } else {
        after
    }
}

/// First applicable binding that can take part in a write.
fn write_binding<'r>(registry: &'r Registry, path: &NodePath, snapshot: &Snapshot) -> Option<&'r Binding> {
    registry
        .resolve(path, snapshot)
        .into_iter()
        .find(|b| b.is_structural() || b.handler().writer().is_some())
}

/// Computes the ordered operations converging `before` into `after`.
///
/// Removals come first, children before parents; then additions and
/// modifications, parents before children. Within a rank, paths keep
/// their natural order.
pub fn plan<'r>(registry: &'r Registry, before: &Snapshot, after: &Snapshot) -> Result<Plan<'r>, TxError> {
    let mut ops: BTreeMap<NodePath, PlannedOp<'r>> = BTreeMap::new();

    for path in before.union_paths(after) {
        let old = before.get(path);
        let new = after.get(path);
        let kind = classify(old, new);
        if kind == ChangeKind::Unchanged {
            continue;
        }

        let snapshot = check_snapshot(kind, before, after);
        match write_binding(registry, path, snapshot) {
            Some(binding) if binding.is_structural() => {
                trace!("Structural pass-through: {}", path);
            }
            Some(binding) => {
                debug!("Planned {:?} {} via '{}'", kind, path, binding.id());
                ops.entry(path.clone()).or_insert_with(|| PlannedOp {
                    path: path.clone(),
                    kind,
                    binding,
                    before: old.cloned(),
                    after: new.cloned(),
                    folded: Vec::new(),
                });
            }
            None => {
                let owner = path.ancestors().filter(|a| !a.is_root()).find_map(|ancestor| {
                    let source = if after.contains(&ancestor) { after } else { before };
                    write_binding(registry, &ancestor, source)
                        .filter(|b| b.is_subtree() && !b.is_structural())
                        .map(|b| (ancestor, b))
                });
                let Some((ancestor, binding)) = owner else {
                    return Err(match kind {
                        ChangeKind::Removed => TxError::DeleteFailed {
                            path: path.clone(),
                            value: old.cloned(),
                            cause: Cause::NoHandler,
                        },
                        _ => TxError::WriteFailed {
                            path: path.clone(),
                            value: new.cloned(),
                            cause: Cause::NoHandler,
                        },
                    });
                };
                debug!("Folded {} into subtree '{}' at {}", path, binding.id(), ancestor);
                let op = ops.entry(ancestor.clone()).or_insert_with(|| {
                    let old = before.get(&ancestor).cloned();
                    let new = after.get(&ancestor).cloned();
                    let kind = match classify(old.as_ref(), new.as_ref()) {
                        ChangeKind::Unchanged => ChangeKind::Modified,
                        other => other,
                    };
                    PlannedOp {
                        path: ancestor.clone(),
                        kind,
                        binding,
                        before: old,
                        after: new,
                        folded: Vec::new(),
                    }
                });
                op.folded.push(path.clone());
            }
        }
    }

    let (mut removals, mut writes): (Vec<_>, Vec<_>) = ops
        .into_values()
        .partition(|op| op.kind == ChangeKind::Removed);
    removals.sort_by(|a, b| {
        b.binding
            .rank()
            .cmp(&a.binding.rank())
            .then_with(|| b.path.cmp(&a.path))
    });
    writes.sort_by(|a, b| {
        a.binding
            .rank()
            .cmp(&b.binding.rank())
            .then_with(|| a.path.cmp(&b.path))
    });
    removals.extend(writes);

    debug!("Plan ready: {} operations", removals.len());
    Ok(Plan { ops: removals })
}
