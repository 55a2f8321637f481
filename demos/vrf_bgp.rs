use std::env;
use std::fs;
use std::process;
use std::sync::Arc;

use anyhow::{Context, bail};
use clireconcile::check::Check;
use clireconcile::config::EngineConfig;
use clireconcile::error::HandlerError;
use clireconcile::handler::{CommandBatch, Handler, WriteContext, Writer};
use clireconcile::path::{KeyValue, NodePath};
use clireconcile::registry::{Registration, Registry};
use clireconcile::session::{Engine, SessionReplayer, TxReport};
use clireconcile::snapshot::{ConfigNode, Snapshot};
use clireconcile::template::{Bindings, Template};

fn print_usage() {
    eprintln!(
        "Usage: cargo run --example vrf_bgp -- [--diagnostics] [--schema] [--replay <recording.jsonl>]"
    );
}

/// Renders create and delete batches from two templates over the node's
/// attributes plus the keys found along its path.
struct TemplateWriter {
    create: Template,
    delete: Template,
}

impl TemplateWriter {
    fn new(create: &str, delete: &str) -> anyhow::Result<Self> {
        Ok(Self {
            create: Template::parse(create)?,
            delete: Template::parse(delete)?,
        })
    }

    fn bindings(path: &NodePath, node: &ConfigNode) -> Bindings {
        let mut bindings = Bindings::from_node(node);
        for segment in path.segments() {
            if let Some(key) = &segment.key {
                for (i, value) in key.values().iter().enumerate() {
                    let text = match value {
                        KeyValue::Int(v) => v.to_string(),
                        KeyValue::Str(s) | KeyValue::Tag(s) => s.clone(),
                    };
                    bindings.insert(format!("{}_{i}", segment.name.replace('-', "_")), text);
                }
            }
        }
        bindings
    }
}

impl Writer for TemplateWriter {
    fn create(
        &self,
        path: &NodePath,
        after: &ConfigNode,
        _ctx: &WriteContext<'_>,
    ) -> Result<CommandBatch, HandlerError> {
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
}

fn build_registry() -> anyhow::Result<Registry> {
    let vrf = TemplateWriter::new(
        "vrf definition {$network_instance_0}\n rd {$rd}\n",
        "no vrf definition {$network_instance_0}\n",
    )?;
    let bgp = TemplateWriter::new(
        "router bgp {$protocol_1}\n address-family ipv4 vrf {$network_instance_0}\n{% loop in $neighbors as $n %}  neighbor {$n.address} remote-as {$n.remote_as}\n{% endloop %}",
        "router bgp {$protocol_1}\n no address-family ipv4 vrf {$network_instance_0}\n",
    )?;

    let registry = Registry::builder()
        .add(Registration::new(
            "vrf",
            "/network-instance[*]",
            Handler::Write(Arc::new(vrf)),
        ))
        .add(Registration::structural(
            "protocols",
            "/network-instance[*]/protocols",
        ))
        .add(
            Registration::new(
                "bgp",
                "/network-instance[*]/protocols/protocol[*]",
                Handler::Write(Arc::new(bgp)),
            )
            .with_check(Check::key_equals("protocol", 0, KeyValue::tag("bgp"))),
        )
        .build()?;
    Ok(registry)
}

const TARGET: &str = r#"{
  "/network-instance[blue]": {"kind": "container", "attributes": {"rd": "65001:10"}},
  "/network-instance[blue]/protocols": {"kind": "container"},
  "/network-instance[blue]/protocols/protocol[@bgp,65001]": {
    "kind": "leaf",
    "attributes": {"neighbors": [{"address": "10.0.0.2", "remote_as": 65002}]}
  }
}"#;

fn print_report(report: &TxReport) {
    println!(
        "session={} state={:?} executed={} skipped={}",
        report.session,
        report.state,
        report.executed.len(),
        report.skipped
    );
    for (idx, batch) in report.executed.iter().enumerate() {
        println!(
            "  batch[{idx}] path={} kind={:?} phase={:?} binding={}",
            batch.path, batch.kind, batch.phase, batch.binding
        );
    }
    if let Some(err) = &report.error {
        println!("  error={err}");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let mut replay = None;
    let mut diagnostics = false;
    let mut schema = false;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--diagnostics" => diagnostics = true,
            "--schema" => schema = true,
            "--replay" => replay = iter.next().cloned(),
            "--help" | "-h" => {
                print_usage();
                return Ok(());
            }
            unknown => {
                eprintln!("Unknown flag: {unknown}");
                print_usage();
                process::exit(2);
            }
        }
    }

    if schema {
        let schema = schemars::schema_for!(EngineConfig);
        println!("{}", serde_json::to_string_pretty(&schema)?);
        return Ok(());
    }

    let registry = build_registry()?;
    if diagnostics {
        let report = registry.diagnostics();
        println!("{}", serde_json::to_string_pretty(&report)?);
        if report.has_issues() {
            bail!("registry has shadowed bindings: {:?}", report.shadowed);
        }
    }

    let engine = Engine::new(Arc::new(registry), EngineConfig::for_profile("cisco"))?;
    let before = Snapshot::new();
    let after = Snapshot::from_json(TARGET)?;

    let Some(recording) = replay else {
        println!("dry-run profile={}", engine.profile().name);
        for batch in engine.preview(&before, &after)? {
            println!("# {} ({:?} {:?})", batch.path, batch.kind, batch.phase);
            for line in &batch.lines {
                println!("{line}");
            }
        }
        return Ok(());
    };

    let content = fs::read_to_string(&recording)
        .with_context(|| format!("failed to read recording '{recording}'"))?;
    let mut session = SessionReplayer::from_jsonl(&content)?;
    let report = engine.begin(&mut session).execute(&before, &after).await;
    print_report(&report);
    if !report.is_committed() {
        bail!("pass failed; inspect the report above");
    }
    Ok(())
}
