#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use clireconcile::check::Check;
use clireconcile::error::{ExtractError, HandlerError, SessionError};
use clireconcile::extract::{extract_all, extract_one, required, split_sections};
use clireconcile::handler::{CommandBatch, Handler, Reader, UpdatePolicy, WriteContext, Writer};
use clireconcile::path::{Key, KeyValue, NodePath};
use clireconcile::registry::{Registration, Registry};
use clireconcile::session::{Session, SessionId};
use clireconcile::snapshot::{ConfigNode, Record, Snapshot, Value};
use clireconcile::template::{Bindings, Template};
use regex::Regex;

pub const SHOW_VRF: &str = "  Name                             Default RD            Protocols   Interfaces
  blue                             65001:10              ipv4        Gi0/1
  red                              65001:20              ipv4        Gi0/2
";

pub const SHOW_VRF_DETAIL: &str = "VRF blue (VRF Id = 2); default RD 65001:10; default VPNID <not set>
  Interfaces:
    Gi0/1
VRF red (VRF Id = 3); default RD 65001:20; default VPNID <not set>
  Interfaces:
    Gi0/2
";

/// Scripted device: answers reads from a table, records every batch.
#[derive(Debug, Default)]
pub struct Lab {
    pub answers: HashMap<&'static str, &'static str>,
    /// Batch containing the first line is answered with the second.
    pub responses: Vec<(&'static str, &'static str)>,
    /// Batch containing this line loses the connection.
    pub drop_on: Option<&'static str>,
    pub reads: Vec<String>,
    pub batches: Vec<Vec<String>>,
}

impl Lab {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vrfs() -> Self {
        let mut lab = Self::new();
        lab.answers.insert("show vrf", SHOW_VRF);
        lab.answers.insert("show vrf detail", SHOW_VRF_DETAIL);
        lab
    }
}

impl Session for Lab {
    fn id(&self) -> SessionId {
        SessionId::from("lab-pe1")
    }

    fn execute(&mut self, command: &str) -> impl Future<Output = Result<String, SessionError>> + Send {
        async move {
            self.reads.push(command.to_string());
            Ok(self.answers.get(command).copied().unwrap_or_default().to_string())
        }
    }

    fn execute_batch(
        &mut self,
        lines: &[String],
    ) -> impl Future<Output = Result<String, SessionError>> + Send {
        async move {
            self.batches.push(lines.to_vec());
            if let Some(trigger) = self.drop_on
                && lines.iter().any(|l| l == trigger)
            {
                return Err(SessionError::ConnectionLost("reset by peer".to_string()));
            }
            let response = self
                .responses
                .iter()
                .find(|(trigger, _)| lines.iter().any(|l| l == trigger))
                .map(|(_, response)| response.to_string())
                .unwrap_or_default();
            Ok(response)
        }
    }
}

fn vrf_name(path: &NodePath) -> Option<&str> {
    path.key_of("network-instance")
        .and_then(|key| key.get(0))
        .and_then(KeyValue::as_str)
}

/// `vrf definition` stanzas, read through `show vrf` and `show vrf detail`.
pub struct Vrf {
    listing: Regex,
    detail: Regex,
    create: Template,
}

impl Vrf {
    pub fn new() -> Self {
        Self {
            listing: Regex::new(r"^\s+(?P<name>\S+)\s+(?P<rd>\d+:\d+)\s").expect("listing regex"),
            detail: Regex::new(r"^VRF (?P<name>\S+) .*default RD (?P<rd>[^;]+);").expect("detail regex"),
            create: Template::parse("vrf definition {$name}\n rd {$rd}\n").expect("vrf template"),
        }
    }
}

impl Reader for Vrf {
    fn read_command(&self, _path: &NodePath) -> Option<String> {
        Some("show vrf detail".to_string())
    }

    fn read_one(&self, path: &NodePath, output: &str) -> Result<Option<ConfigNode>, HandlerError> {
        let Some(name) = vrf_name(path) else {
            return Ok(None);
        };
        for section in split_sections(output, |line| line.starts_with("VRF ")) {
            let Some(m) = extract_one(section, &self.detail) else {
                continue;
            };
            if required(&m, "name")? == name {
                let rd = required(&m, "rd")?;
                return Ok(Some(ConfigNode::container().with("rd", rd)));
            }
        }
        Ok(None)
    }

    fn list_command(&self, _parent: &NodePath) -> Option<String> {
        Some("show vrf".to_string())
    }

    fn read_all(&self, _parent: &NodePath, output: &str) -> Result<Vec<Key>, HandlerError> {
        extract_all(output, &self.listing)
            .iter()
            .map(|m| required(m, "name").map(Key::from))
            .collect::<Result<Vec<_>, ExtractError>>()
            .map_err(HandlerError::from)
    }
}

impl Writer for Vrf {
    fn create(
        &self,
        path: &NodePath,
        after: &ConfigNode,
        _ctx: &WriteContext<'_>,
    ) -> Result<CommandBatch, HandlerError> {
        let bindings = Bindings::from_node(after).set("name", vrf_name(path).unwrap_or_default());
        Ok(CommandBatch::render(&self.create, &bindings))
    }

    fn delete(
        &self,
        path: &NodePath,
        _before: &ConfigNode,
        _ctx: &WriteContext<'_>,
    ) -> Result<CommandBatch, HandlerError> {
        Ok(CommandBatch::from_iter([format!(
            "no vrf definition {}",
            vrf_name(path).unwrap_or_default()
        )]))
    }
}

/// BGP address family inside a VRF, keyed `protocol[@bgp,<asn>]`.
pub struct Bgp {
    create: Template,
    delete: Template,
}

impl Bgp {
    pub fn new() -> Self {
        Self {
            create: Template::parse(
                "router bgp {$as}\n address-family ipv4 vrf {$vrf}\n{% loop in $neighbors as $n %}  neighbor {$n.address} remote-as {$n.remote_as}\n{% endloop %}{% if ($import_policy) %}  distribute-list prefix {$import_policy} in\n{% endif %}",
            )
            .expect("bgp template"),
            delete: Template::parse("router bgp {$as}\n no address-family ipv4 vrf {$vrf}\n")
                .expect("bgp delete template"),
        }
    }

    fn bindings(path: &NodePath, node: &ConfigNode) -> Bindings {
        let asn = path
            .key_of("protocol")
            .and_then(|key| key.get(1))
            .and_then(KeyValue::as_int)
            .unwrap_or_default();
        Bindings::from_node(node)
            .set("as", asn)
            .set("vrf", vrf_name(path).unwrap_or_default())
    }

    fn check_policy(node: &ConfigNode, ctx: &WriteContext<'_>) -> Result<(), HandlerError> {
        let Some(policy) = node.get_str("import_policy") else {
            return Ok(());
        };
        if ctx.after.contains(&NodePath::root().entry("prefix-set", policy)) {
            Ok(())
        } else {
            Err(HandlerError::Precondition(format!(
                "prefix-set {policy} is not defined"
            )))
        }
    }
}

fn neighbors(node: &ConfigNode) -> Vec<Value> {
    node.get("neighbors")
        .and_then(Value::as_list)
        .map(<[Value]>::to_vec)
        .unwrap_or_default()
}

fn neighbor_field(neighbor: &Value, field: &str) -> String {
    neighbor.field(field).map(Value::to_string).unwrap_or_default()
}

impl Writer for Bgp {
    fn create(
        &self,
        path: &NodePath,
        after: &ConfigNode,
        ctx: &WriteContext<'_>,
    ) -> Result<CommandBatch, HandlerError> {
        Self::check_policy(after, ctx)?;
        Ok(CommandBatch::render(&self.create, &Self::bindings(path, after)))
    }

    fn delete(
        &self,
        path: &NodePath,
        before: &ConfigNode,
        _ctx: &WriteContext<'_>,
    ) -> Result<CommandBatch, HandlerError> {
        Ok(CommandBatch::render(&self.delete, &Self::bindings(path, before)))
    }

    /// Only the neighbor statements that changed.
    fn update(
        &self,
        path: &NodePath,
        before: &ConfigNode,
        after: &ConfigNode,
        ctx: &WriteContext<'_>,
    ) -> Result<CommandBatch, HandlerError> {
        Self::check_policy(after, ctx)?;
        let old = neighbors(before);
        let new = neighbors(after);
        let bindings = Self::bindings(path, after);

        let mut batch = CommandBatch::new();
        for gone in old.iter().filter(|n| !new.contains(n)) {
            batch.push(format!("  no neighbor {}", neighbor_field(gone, "address")));
        }
        for added in new.iter().filter(|n| !old.contains(n)) {
            batch.push(format!(
                "  neighbor {} remote-as {}",
                neighbor_field(added, "address"),
                neighbor_field(added, "remote_as")
            ));
        }
        if batch.is_empty() {
            return Ok(batch);
        }
        let mut framed = CommandBatch::from_iter([
            format!("router bgp {}", bindings.get("as").map(Value::to_string).unwrap_or_default()),
            format!(
                " address-family ipv4 vrf {}",
                bindings.get("vrf").map(Value::to_string).unwrap_or_default()
            ),
        ]);
        framed.extend(batch);
        Ok(framed)
    }
}

pub struct Ospf;

impl Writer for Ospf {
    fn create(
        &self,
        path: &NodePath,
        _after: &ConfigNode,
        _ctx: &WriteContext<'_>,
    ) -> Result<CommandBatch, HandlerError> {
        let process = path
            .key_of("protocol")
            .and_then(|key| key.get(1))
            .map(KeyValue::to_string)
            .unwrap_or_default();
        Ok(CommandBatch::from_iter([format!(
            "router ospf {process} vrf {}",
            vrf_name(path).unwrap_or_default()
        )]))
    }

    fn delete(
        &self,
        path: &NodePath,
        _before: &ConfigNode,
        _ctx: &WriteContext<'_>,
    ) -> Result<CommandBatch, HandlerError> {
        let process = path
            .key_of("protocol")
            .and_then(|key| key.get(1))
            .map(KeyValue::to_string)
            .unwrap_or_default();
        Ok(CommandBatch::from_iter([format!("no router ospf {process}")]))
    }
}

pub struct PrefixSet;

impl Writer for PrefixSet {
    fn create(
        &self,
        path: &NodePath,
        after: &ConfigNode,
        _ctx: &WriteContext<'_>,
    ) -> Result<CommandBatch, HandlerError> {
        let name = path.key_of("prefix-set").map(Key::to_string).unwrap_or_default();
        Ok(CommandBatch::from_iter([format!(
            "ip prefix-list {name} seq 5 permit {}",
            after.get_str("prefix").unwrap_or_default()
        )]))
    }

    fn delete(
        &self,
        path: &NodePath,
        _before: &ConfigNode,
        _ctx: &WriteContext<'_>,
    ) -> Result<CommandBatch, HandlerError> {
        let name = path.key_of("prefix-set").map(Key::to_string).unwrap_or_default();
        Ok(CommandBatch::from_iter([format!("no ip prefix-list {name}")]))
    }
}

pub fn registry() -> Registry {
    Registry::builder()
        .add(Registration::new(
            "vrf",
            "/network-instance[*]",
            Handler::read_write(Vrf::new()),
        ))
        .add(Registration::structural(
            "protocols",
            "/network-instance[*]/protocols",
        ))
        .add(
            Registration::new(
                "bgp",
                "/network-instance[*]/protocols/protocol[*]",
                Handler::Write(Arc::new(Bgp::new())),
            )
            .with_check(Check::key_equals("protocol", 0, KeyValue::tag("bgp")))
            .update_policy(UpdatePolicy::Incremental)
            .after("prefix-set"),
        )
        .add(
            Registration::new(
                "ospf",
                "/network-instance[*]/protocols/protocol[*]",
                Handler::Write(Arc::new(Ospf)),
            )
            .with_check(Check::key_equals("protocol", 0, KeyValue::tag("ospf"))),
        )
        .add(Registration::new(
            "prefix-set",
            "/prefix-set[*]",
            Handler::Write(Arc::new(PrefixSet)),
        ))
        .build()
        .expect("registry")
}

pub fn path(text: &str) -> NodePath {
    text.parse().expect("node path")
}

pub fn neighbor(address: &str, remote_as: i64) -> Value {
    let mut record = Record::new();
    record.insert("address".to_string(), address.into());
    record.insert("remote_as".to_string(), remote_as.into());
    Value::Record(record)
}

pub const BLUE: &str = "/network-instance[blue]";
pub const BLUE_BGP: &str = "/network-instance[blue]/protocols/protocol[@bgp,65001]";
pub const BLUE_OSPF: &str = "/network-instance[blue]/protocols/protocol[@ospf,10]";

pub fn vrf(name: &str, rd: &str) -> (NodePath, ConfigNode) {
    (
        NodePath::root().entry("network-instance", name),
        ConfigNode::container().with("rd", rd),
    )
}

pub fn bgp(neighbors: Vec<Value>) -> ConfigNode {
    ConfigNode::leaf().with("neighbors", neighbors)
}

/// `blue` with one BGP neighbor.
pub fn blue_with_bgp() -> Snapshot {
    let (vrf_path, vrf_node) = vrf("blue", "65001:10");
    Snapshot::new()
        .with(vrf_path, vrf_node)
        .with(path(BLUE_BGP), bgp(vec![neighbor("10.0.0.2", 65002)]))
}

pub fn framed(lines: &[&str]) -> Vec<String> {
    std::iter::once("configure terminal")
        .chain(lines.iter().copied())
        .chain(std::iter::once("end"))
        .map(str::to_string)
        .collect()
}
