//! Handler registry.
//!
//! The registry is built once from a handler catalog and is read-only
//! afterwards. Building validates the catalog and fixes a total execution
//! order over all registrations:
//!
//! - a registration whose pattern may contain another's applies first
//!   (a VRF before the protocols configured inside it);
//! - explicit `after` / `before` edges add cross-reference constraints;
//! - ties keep catalog order.
//!
//! A cycle in those constraints is rejected at build time.

use std::collections::{BTreeSet, HashMap};

use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::check::Check;
use crate::error::{ConfigError, RegistryError};
use crate::handler::{Handler, UpdatePolicy};
use crate::path::{NodePath, PathPattern};
use crate::snapshot::Snapshot;

/// One catalog entry, as supplied by the embedding application.
#[derive(Debug, Clone)]
pub struct Registration {
    id: String,
    pattern: Result<PathPattern, ConfigError>,
    handler: Handler,
    check: Option<Check>,
    after: Vec<String>,
    before: Vec<String>,
    subtree: bool,
    update_policy: Option<UpdatePolicy>,
}

impl Registration {
    /// `pattern` uses path syntax with `[*]` wildcards; it is validated by
    /// [`RegistryBuilder::build`].
    pub fn new(id: impl Into<String>, pattern: &str, handler: Handler) -> Self {
        Self {
            id: id.into(),
            pattern: pattern.parse(),
            handler,
            check: None,
            after: Vec::new(),
            before: Vec::new(),
            subtree: false,
            update_policy: None,
        }
    }

    pub fn structural(id: impl Into<String>, pattern: &str) -> Self {
        Self::new(id, pattern, Handler::Structural)
    }

    pub fn with_check(mut self, check: Check) -> Self {
        self.check = Some(check);
        self
    }

    /// Apply after registration `id`.
    pub fn after(mut self, id: impl Into<String>) -> Self {
        self.after.push(id.into());
        self
    }

    /// Apply before registration `id`.
    pub fn before(mut self, id: impl Into<String>) -> Self {
        self.before.push(id.into());
        self
    }

    /// The writer also owns every descendant that has no binding of its own.
    pub fn subtree(mut self) -> Self {
        self.subtree = true;
        self
    }

    /// Overrides the writer's own update policy.
    pub fn update_policy(mut self, policy: UpdatePolicy) -> Self {
        self.update_policy = Some(policy);
        self
    }
}

/// A validated registration with its position in the execution order.
#[derive(Debug, Clone)]
pub struct Binding {
    id: String,
    pattern: PathPattern,
    handler: Handler,
    check: Option<Check>,
    subtree: bool,
    update_policy: Option<UpdatePolicy>,
    index: usize,
    rank: usize,
}

impl Binding {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn pattern(&self) -> &PathPattern {
        &self.pattern
    }

    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    /// Position in the execution order; lower applies earlier.
    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn is_subtree(&self) -> bool {
        self.subtree
    }

    pub fn is_structural(&self) -> bool {
        self.handler.is_structural()
    }

    /// Pattern match plus check.
    pub fn applies(&self, path: &NodePath, snapshot: &Snapshot) -> bool {
        self.pattern.matches(path)
            && self
                .check
                .as_ref()
                .is_none_or(|check| check.evaluate(path, snapshot))
    }

    /// Registration override, else the writer's preference.
    pub fn update_policy(&self) -> UpdatePolicy {
        self.update_policy
            .or_else(|| self.handler.writer().map(|w| w.update_policy()))
            .unwrap_or_default()
    }
}

/// Collects registrations before validation.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    registrations: Vec<Registration>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, registration: Registration) -> Self {
        self.registrations.push(registration);
        self
    }

    pub fn push(&mut self, registration: Registration) {
        self.registrations.push(registration);
    }

    /// Validates the catalog and computes the execution order.
    pub fn build(self) -> Result<Registry, RegistryError> {
        let mut ids: HashMap<String, usize> = HashMap::new();
        let mut bindings = Vec::with_capacity(self.registrations.len());
        let mut explicit = Vec::new();

        for (index, reg) in self.registrations.into_iter().enumerate() {
            if ids.insert(reg.id.clone(), index).is_some() {
                return Err(RegistryError::DuplicateId(reg.id));
            }
            let pattern = reg.pattern.map_err(|err| RegistryError::InvalidPattern {
                id: reg.id.clone(),
                reason: err.to_string(),
            })?;
            explicit.push((reg.after, reg.before));
            bindings.push(Binding {
                id: reg.id,
                pattern,
                handler: reg.handler,
                check: reg.check,
                subtree: reg.subtree,
                update_policy: reg.update_policy,
                index,
                rank: 0,
            });
        }

        let n = bindings.len();
        let mut successors: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n];

        for (i, (after, before)) in explicit.iter().enumerate() {
            for target in after {
                let j = lookup(&ids, &bindings[i].id, target)?;
                successors[j].insert(i);
            }
            for target in before {
                let j = lookup(&ids, &bindings[i].id, target)?;
                successors[i].insert(j);
            }
        }
        for i in 0..n {
            for j in 0..n {
                if i != j && bindings[i].pattern.may_contain(&bindings[j].pattern) {
                    successors[i].insert(j);
                }
            }
        }

        let order = topological_order(&successors).map_err(|cycle| {
            RegistryError::OrderingCycle(cycle.into_iter().map(|i| bindings[i].id.clone()).collect())
        })?;
        for (rank, &index) in order.iter().enumerate() {
            bindings[index].rank = rank;
        }

        debug!(
            "registry built: {} bindings, order [{}]",
            n,
            order
                .iter()
                .map(|&i| bindings[i].id.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        Ok(Registry { bindings, order })
    }
}

fn lookup(ids: &HashMap<String, usize>, from: &str, to: &str) -> Result<usize, RegistryError> {
    ids.get(to)
        .copied()
        .ok_or_else(|| RegistryError::UnknownRegistration {
            from: from.to_string(),
            to: to.to_string(),
        })
}

/// Kahn's algorithm, always releasing the lowest ready index first.
/// On failure returns the indices of one cycle.
fn topological_order(successors: &[BTreeSet<usize>]) -> Result<Vec<usize>, Vec<usize>> {
    let n = successors.len();
    let mut in_degree = vec![0usize; n];
    for targets in successors {
        for &t in targets {
            in_degree[t] += 1;
        }
    }

    let mut ready: BTreeSet<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(next) = ready.pop_first() {
        order.push(next);
        for &t in &successors[next] {
            in_degree[t] -= 1;
            if in_degree[t] == 0 {
                ready.insert(t);
            }
        }
    }
    if order.len() == n {
        return Ok(order);
    }

    // Every unprocessed node still has an unprocessed predecessor, so
    // walking predecessors from any of them must revisit a node.
    let remaining: BTreeSet<usize> = (0..n).filter(|&i| in_degree[i] > 0).collect();
    let predecessor = |node: usize| {
        remaining
            .iter()
            .copied()
            .find(|&p| successors[p].contains(&node))
    };
    let mut walk = Vec::new();
    let mut current = remaining.first().copied();
    while let Some(node) = current {
        if let Some(pos) = walk.iter().position(|&v| v == node) {
            let mut cycle: Vec<usize> = walk[pos..].to_vec();
            cycle.reverse();
            return Err(cycle);
        }
        walk.push(node);
        current = predecessor(node);
    }
    Err(remaining.into_iter().collect())
}

/// Summary of a built registry, for startup checks and tooling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RegistryDiagnostics {
    pub total_bindings: usize,
    /// Binding ids in execution order.
    pub execution_order: Vec<String>,
    pub structural: Vec<String>,
    /// Bindings that can read but not write.
    pub read_only: Vec<String>,
    /// Bindings that can write but not read.
    pub write_only: Vec<String>,
    /// Bindings that never resolve because an earlier binding with the same
    /// pattern has no check.
    pub shadowed: Vec<String>,
}

impl RegistryDiagnostics {
    pub fn has_issues(&self) -> bool {
        !self.shadowed.is_empty()
    }
}

/// Read-only mapping from node paths to handler bindings.
#[derive(Debug, Clone)]
pub struct Registry {
    bindings: Vec<Binding>,
    order: Vec<usize>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Binding> {
        self.bindings.iter().find(|b| b.id == id)
    }

    /// Bindings in execution order.
    pub fn ordered(&self) -> impl Iterator<Item = &Binding> {
        self.order.iter().map(|&i| &self.bindings[i])
    }

    /// Every binding whose pattern matches `path`, most specific first,
    /// then catalog order. Checks are not evaluated.
    pub fn candidates(&self, path: &NodePath) -> Vec<&Binding> {
        let mut matching: Vec<&Binding> = self
            .bindings
            .iter()
            .filter(|b| b.pattern.matches(path))
            .collect();
        matching.sort_by_key(|b| (std::cmp::Reverse(b.pattern.specificity()), b.index));
        matching
    }

    /// Applicable bindings for `path` against `snapshot`, in precedence order.
    pub fn resolve(&self, path: &NodePath, snapshot: &Snapshot) -> Vec<&Binding> {
        self.candidates(path)
            .into_iter()
            .filter(|b| {
                b.check
                    .as_ref()
                    .is_none_or(|check| check.evaluate(path, snapshot))
            })
            .collect()
    }

    /// Bindings one level below `parent`, in execution order.
    pub fn child_bindings(&self, parent: &NodePath) -> Vec<&Binding> {
        self.ordered()
            .filter(|b| b.pattern.is_child_of(parent))
            .collect()
    }

    pub fn diagnostics(&self) -> RegistryDiagnostics {
        let ids = |pred: &dyn Fn(&Binding) -> bool| {
            self.bindings
                .iter()
                .filter(|b| pred(b))
                .map(|b| b.id.clone())
                .collect::<Vec<_>>()
        };

        let shadowed = self
            .bindings
            .iter()
            .filter(|b| {
                self.bindings.iter().any(|earlier| {
                    earlier.index < b.index
                        && earlier.pattern == b.pattern
                        && earlier.check.is_none()
                })
            })
            .map(|b| b.id.clone())
            .collect();

        RegistryDiagnostics {
            total_bindings: self.bindings.len(),
            execution_order: self.ordered().map(|b| b.id.clone()).collect(),
            structural: ids(&|b| b.handler.is_structural()),
            read_only: ids(&|b| b.handler.reader().is_some() && b.handler.writer().is_none()),
            write_only: ids(&|b| b.handler.writer().is_some() && b.handler.reader().is_none()),
            shadowed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use crate::handler::{CommandBatch, WriteContext, Writer};
    use crate::path::KeyValue;
    use crate::snapshot::ConfigNode;
    use std::sync::Arc;

    struct Fixed(&'static str);

    impl Writer for Fixed {
        fn create(
            &self,
            _path: &NodePath,
            _after: &ConfigNode,
            _ctx: &WriteContext<'_>,
        ) -> Result<CommandBatch, HandlerError> {
            Ok(CommandBatch::from_iter([self.0]))
        }

        fn delete(
            &self,
            _path: &NodePath,
            _before: &ConfigNode,
            _ctx: &WriteContext<'_>,
        ) -> Result<CommandBatch, HandlerError> {
            Ok(CommandBatch::from_iter([format!("no {}", self.0)]))
        }
    }

    fn writer(line: &'static str) -> Handler {
        Handler::Write(Arc::new(Fixed(line)))
    }

    fn path(text: &str) -> NodePath {
        text.parse().expect("valid path")
    }

    #[test]
    fn containment_orders_parents_first() {
        let registry = Registry::builder()
            .add(Registration::new(
                "bgp",
                "/vrfs/vrf[*]/protocols/protocol[*]/bgp",
                writer("router bgp"),
            ))
            .add(Registration::new("vrf", "/vrfs/vrf[*]", writer("vrf")))
            .add(Registration::structural("vrfs", "/vrfs"))
            .build()
            .expect("build");

        let order = registry.ordered().map(|b| b.id()).collect::<Vec<_>>();
        assert_eq!(order, vec!["vrfs", "vrf", "bgp"]);
    }

    #[test]
    fn explicit_edges_order_unrelated_paths() {
        let registry = Registry::builder()
            .add(Registration::new("acl-bind", "/interfaces/interface[*]/acl", writer("ip access-group")).after("acl"))
            .add(Registration::new("acl", "/acls/acl[*]", writer("ip access-list")))
            .add(Registration::new("banner", "/system/banner", writer("banner")).before("acl"))
            .build()
            .expect("build");

        let order = registry.ordered().map(|b| b.id()).collect::<Vec<_>>();
        assert_eq!(order, vec!["banner", "acl", "acl-bind"]);
        assert!(registry.get("acl").map(Binding::rank) < registry.get("acl-bind").map(Binding::rank));
    }

    #[test]
    fn ordering_cycle_is_rejected_at_build() {
        let err = Registry::builder()
            .add(Registration::new("a", "/a", writer("a")).after("b"))
            .add(Registration::new("b", "/b", writer("b")).after("a"))
            .build()
            .expect_err("cycle");
        match err {
            RegistryError::OrderingCycle(ids) => {
                assert_eq!(ids.len(), 2);
                assert!(ids.contains(&"a".to_string()) && ids.contains(&"b".to_string()));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn edge_against_containment_is_a_cycle() {
        let err = Registry::builder()
            .add(Registration::new("vrf", "/vrfs/vrf[*]", writer("vrf")).after("bgp"))
            .add(Registration::new("bgp", "/vrfs/vrf[*]/bgp", writer("bgp")))
            .build()
            .expect_err("cycle");
        assert!(matches!(err, RegistryError::OrderingCycle(_)));
    }

    #[test]
    fn unknown_and_duplicate_registrations_are_rejected() {
        let err = Registry::builder()
            .add(Registration::new("a", "/a", writer("a")).after("missing"))
            .build()
            .expect_err("unknown");
        assert_eq!(
            err,
            RegistryError::UnknownRegistration {
                from: "a".to_string(),
                to: "missing".to_string()
            }
        );

        let err = Registry::builder()
            .add(Registration::new("a", "/a", writer("a")))
            .add(Registration::new("a", "/b", writer("b")))
            .build()
            .expect_err("duplicate");
        assert_eq!(err, RegistryError::DuplicateId("a".to_string()));

        let err = Registry::builder()
            .add(Registration::new("bad", "no-slash", writer("x")))
            .build()
            .expect_err("pattern");
        assert!(matches!(err, RegistryError::InvalidPattern { .. }));
    }

    #[test]
    fn exact_key_beats_wildcard() {
        let registry = Registry::builder()
            .add(Registration::new("any-vrf", "/vrfs/vrf[*]", writer("vrf")))
            .add(Registration::new("default-vrf", "/vrfs/vrf[default]", writer("global")))
            .build()
            .expect("build");

        let snapshot = Snapshot::new();
        let ids = registry
            .resolve(&path("/vrfs/vrf[default]"), &snapshot)
            .iter()
            .map(|b| b.id())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["default-vrf", "any-vrf"]);

        let ids = registry
            .resolve(&path("/vrfs/vrf[A]"), &snapshot)
            .iter()
            .map(|b| b.id())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["any-vrf"]);
    }

    #[test]
    fn checks_select_composite_member() {
        let registry = Registry::builder()
            .add(
                Registration::new("bgp", "/protocols/protocol[*]", writer("router bgp"))
                    .with_check(Check::key_equals("protocol", 0, KeyValue::tag("BGP"))),
            )
            .add(
                Registration::new("ospf", "/protocols/protocol[*]", writer("router ospf"))
                    .with_check(Check::key_equals("protocol", 0, KeyValue::tag("OSPF"))),
            )
            .build()
            .expect("build");

        let snapshot = Snapshot::new();
        let ospf = registry.resolve(&path("/protocols/protocol[@OSPF,1]"), &snapshot);
        assert_eq!(ospf.iter().map(|b| b.id()).collect::<Vec<_>>(), vec!["ospf"]);
        assert!(registry.resolve(&path("/protocols/protocol[@ISIS,1]"), &snapshot).is_empty());
        assert_eq!(registry.candidates(&path("/protocols/protocol[@ISIS,1]")).len(), 2);
    }

    #[test]
    fn child_bindings_follow_execution_order() {
        let registry = Registry::builder()
            .add(Registration::new("ntp", "/system/ntp", writer("ntp")).after("hostname"))
            .add(Registration::new("hostname", "/system/hostname", writer("hostname")))
            .add(Registration::new("vlan", "/vlans/vlan[*]", writer("vlan")))
            .build()
            .expect("build");

        let children = registry
            .child_bindings(&path("/system"))
            .iter()
            .map(|b| b.id())
            .collect::<Vec<_>>();
        assert_eq!(children, vec!["hostname", "ntp"]);
    }

    #[test]
    fn diagnostics_report_shadowed_bindings() {
        let registry = Registry::builder()
            .add(Registration::structural("vrfs", "/vrfs"))
            .add(Registration::new("vrf", "/vrfs/vrf[*]", writer("vrf")))
            .add(Registration::new("vrf-legacy", "/vrfs/vrf[*]", writer("ip vrf")))
            .build()
            .expect("build");

        let diag = registry.diagnostics();
        assert_eq!(diag.total_bindings, 3);
        assert_eq!(diag.structural, vec!["vrfs"]);
        assert_eq!(diag.write_only, vec!["vrf", "vrf-legacy"]);
        assert_eq!(diag.shadowed, vec!["vrf-legacy"]);
        assert!(diag.has_issues());
    }

    #[test]
    fn registration_policy_overrides_writer() {
        let registry = Registry::builder()
            .add(Registration::new("a", "/a", writer("a")))
            .add(Registration::new("b", "/b", writer("b")).update_policy(UpdatePolicy::Incremental))
            .add(Registration::structural("c", "/c"))
            .build()
            .expect("build");
        assert_eq!(registry.get("a").map(Binding::update_policy), Some(UpdatePolicy::Replace));
        assert_eq!(registry.get("b").map(Binding::update_policy), Some(UpdatePolicy::Incremental));
        assert_eq!(registry.get("c").map(Binding::update_policy), Some(UpdatePolicy::Replace));
    }
}
