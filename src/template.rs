//! Command templates.
//!
//! Writers describe the command text they emit as a template which is
//! parsed once into a small AST and then evaluated against a [`Bindings`]
//! map:
//!
//! ```text
//! router bgp {$as}
//! {% if ($router_id) %} bgp router-id {$router_id}
//! {% endif %}{% loop in $neighbors as $n %} neighbor {$n.address} remote-as {$n.remote_as}
//! {% endloop %}
//! ```
//!
//! Unbound variables render as nothing and make conditionals false, so an
//! optional clause is simply a conditional block.

use std::collections::BTreeMap;
use std::mem;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::TemplateError;
use crate::snapshot::{ConfigNode, Value};

fn compile(pattern: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(re) => re,
        Err(err) => panic!("invalid template grammar regex {pattern}: {err}"),
    }
}

static TAG: Lazy<Regex> =
    Lazy::new(|| compile(r"\{\$([A-Za-z_][A-Za-z0-9_.]*)\}|\{%\s*(.*?)\s*%\}"));
static IF_TAG: Lazy<Regex> =
    Lazy::new(|| compile(r"^if\s*\(\s*(!?)\s*\$([A-Za-z_][A-Za-z0-9_.]*)\s*\)$"));
static LOOP_TAG: Lazy<Regex> = Lazy::new(|| {
    compile(r"^loop\s+in\s+\$([A-Za-z_][A-Za-z0-9_.]*)\s+as\s+\$([A-Za-z_][A-Za-z0-9_]*)$")
});

/// Named values a template is evaluated against.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bindings {
    values: BTreeMap<String, Value>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every attribute of `node` bound under its own name.
    pub fn from_node(node: &ConfigNode) -> Self {
        Self {
            values: node.attributes.clone(),
        }
    }

    pub fn set(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Binds the attributes of `node` as a record, reachable as `{$name.attr}`.
    pub fn set_node(self, name: impl Into<String>, node: &ConfigNode) -> Self {
        self.set(name, Value::Record(node.attributes.clone()))
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Literal(String),
    Variable(Vec<String>),
    If {
        negate: bool,
        var: Vec<String>,
        then: Vec<Node>,
        otherwise: Vec<Node>,
    },
    Loop {
        list: Vec<String>,
        item: String,
        body: Vec<Node>,
    },
}

enum Opener {
    If { negate: bool, var: Vec<String> },
    Loop { list: Vec<String>, item: String },
}

struct Frame {
    opener: Opener,
    parent: Vec<Node>,
    then: Option<Vec<Node>>,
}

fn var_path(text: &str) -> Vec<String> {
    text.split('.').map(str::to_string).collect()
}

/// Parsed command template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    nodes: Vec<Node>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut stack: Vec<Frame> = Vec::new();
        let mut current: Vec<Node> = Vec::new();
        let mut last = 0;

        for caps in TAG.captures_iter(source) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            if whole.start() > last {
                current.push(Node::Literal(source[last..whole.start()].to_string()));
            }
            last = whole.end();

            if let Some(var) = caps.get(1) {
                current.push(Node::Variable(var_path(var.as_str())));
                continue;
            }
            let directive = caps.get(2).map(|m| m.as_str()).unwrap_or_default();

            if let Some(m) = IF_TAG.captures(directive) {
                stack.push(Frame {
                    opener: Opener::If {
                        negate: &m[1] == "!",
                        var: var_path(&m[2]),
                    },
                    parent: mem::take(&mut current),
                    then: None,
                });
            } else if let Some(m) = LOOP_TAG.captures(directive) {
                stack.push(Frame {
                    opener: Opener::Loop {
                        list: var_path(&m[1]),
                        item: m[2].to_string(),
                    },
                    parent: mem::take(&mut current),
                    then: None,
                });
            } else if directive == "else" {
                match stack.last_mut() {
                    Some(frame) if matches!(frame.opener, Opener::If { .. }) && frame.then.is_none() => {
                        frame.then = Some(mem::take(&mut current));
                    }
                    _ => return Err(TemplateError::Unbalanced("else".to_string())),
                }
            } else if directive == "endif" || directive == "endloop" {
                let frame = match stack.pop() {
                    Some(frame) => frame,
                    None => return Err(TemplateError::Unbalanced(directive.to_string())),
                };
                let body = mem::take(&mut current);
                let node = match (frame.opener, directive) {
                    (Opener::If { negate, var }, "endif") => {
                        let (then, otherwise) = match frame.then {
                            Some(then) => (then, body),
                            None => (body, Vec::new()),
                        };
                        Node::If {
                            negate,
                            var,
                            then,
                            otherwise,
                        }
                    }
                    (Opener::Loop { list, item }, "endloop") => Node::Loop { list, item, body },
                    _ => return Err(TemplateError::Unbalanced(directive.to_string())),
                };
                current = frame.parent;
                current.push(node);
            } else {
                return Err(TemplateError::UnknownTag(directive.to_string()));
            }
        }

        if let Some(frame) = stack.last() {
            let name = match frame.opener {
                Opener::If { .. } => "if",
                Opener::Loop { .. } => "loop",
            };
            return Err(TemplateError::Unclosed(name.to_string()));
        }
        if last < source.len() {
            current.push(Node::Literal(source[last..].to_string()));
        }
        Ok(Self { nodes: current })
    }

    /// Evaluates the template. Never fails: unbound names are absent.
    pub fn render(&self, bindings: &Bindings) -> String {
        let mut scope = Scope {
            bindings,
            locals: Vec::new(),
        };
        let mut out = String::new();
        render_nodes(&self.nodes, &mut scope, &mut out);
        out
    }
}

/// Parses and renders in one step.
pub fn render(source: &str, bindings: &Bindings) -> Result<String, TemplateError> {
    Ok(Template::parse(source)?.render(bindings))
}

struct Scope<'b> {
    bindings: &'b Bindings,
    locals: Vec<(String, Value)>,
}

impl Scope<'_> {
    fn lookup(&self, path: &[String]) -> Option<Value> {
        let (head, rest) = path.split_first()?;
        let mut value = self
            .locals
            .iter()
            .rev()
            .find(|(name, _)| name == head)
            .map(|(_, v)| v)
            .or_else(|| self.bindings.get(head))?;
        for field in rest {
            value = value.field(field)?;
        }
        Some(value.clone())
    }
}

fn render_nodes(nodes: &[Node], scope: &mut Scope<'_>, out: &mut String) {
    for node in nodes {
        match node {
            Node::Literal(text) => out.push_str(text),
            Node::Variable(path) => {
                if let Some(value) = scope.lookup(path) {
                    out.push_str(&value.to_string());
                }
            }
            Node::If {
                negate,
                var,
                then,
                otherwise,
            } => {
                let truthy = scope.lookup(var).is_some_and(|v| v.is_truthy());
                if truthy != *negate {
                    render_nodes(then, scope, out);
                } else {
                    render_nodes(otherwise, scope, out);
                }
            }
            Node::Loop { list, item, body } => {
                let items = match scope.lookup(list) {
                    None | Some(Value::Null) => Vec::new(),
                    Some(Value::List(items)) => items,
                    Some(single) => vec![single],
                };
                for value in items {
                    scope.locals.push((item.clone(), value));
                    render_nodes(body, scope, out);
                    scope.locals.pop();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::Record;

    fn neighbor(address: &str, remote_as: i64) -> Value {
        let mut record = Record::new();
        record.insert("address".to_string(), address.into());
        record.insert("remote_as".to_string(), remote_as.into());
        Value::Record(record)
    }

    const BGP: &str = "router bgp {$as}\n{% if ($router_id) %} bgp router-id {$router_id}\n{% endif %}{% loop in $neighbors as $n %} neighbor {$n.address} remote-as {$n.remote_as}\n{% endloop %}";

    #[test]
    fn renders_scalars_conditionals_and_loops() {
        let bindings = Bindings::new()
            .set("as", 65001)
            .set("router_id", "1.1.1.1")
            .set(
                "neighbors",
                Value::List(vec![neighbor("10.0.0.2", 65002), neighbor("10.0.0.1", 65003)]),
            );
        let text = render(BGP, &bindings).expect("render");
        assert_eq!(
            text,
            "router bgp 65001\n bgp router-id 1.1.1.1\n neighbor 10.0.0.2 remote-as 65002\n neighbor 10.0.0.1 remote-as 65003\n"
        );
    }

    #[test]
    fn absent_bindings_render_empty_and_skip_blocks() {
        let bindings = Bindings::new().set("as", 65001);
        let text = render(BGP, &bindings).expect("render");
        assert_eq!(text, "router bgp 65001\n");

        let text = render("description {$missing.field}", &Bindings::new()).expect("render");
        assert_eq!(text, "description ");
    }

    #[test]
    fn else_branch_and_negation() {
        let tpl = Template::parse("{% if ($shutdown) %}shutdown{% else %}no shutdown{% endif %}")
            .expect("parse");
        assert_eq!(tpl.render(&Bindings::new().set("shutdown", true)), "shutdown");
        assert_eq!(tpl.render(&Bindings::new().set("shutdown", false)), "no shutdown");
        assert_eq!(tpl.render(&Bindings::new()), "no shutdown");

        let negated = Template::parse("{% if (!$vrf) %}global{% endif %}").expect("parse");
        assert_eq!(negated.render(&Bindings::new()), "global");
        assert_eq!(negated.render(&Bindings::new().set("vrf", "A")), "");
    }

    #[test]
    fn empty_collection_is_false() {
        let tpl = Template::parse("{% if ($vlans) %}has vlans{% endif %}").expect("parse");
        assert_eq!(tpl.render(&Bindings::new().set("vlans", Vec::<i64>::new())), "");
        assert_eq!(tpl.render(&Bindings::new().set("vlans", vec![10])), "has vlans");
    }

    #[test]
    fn loops_keep_given_order_and_duplicates() {
        let tpl = Template::parse("{% loop in $vlans as $v %}vlan {$v}\n{% endloop %}")
            .expect("parse");
        let text = tpl.render(&Bindings::new().set("vlans", vec![30, 10, 30]));
        assert_eq!(text, "vlan 30\nvlan 10\nvlan 30\n");
    }

    #[test]
    fn rendering_is_deterministic() {
        let bindings = Bindings::new()
            .set("as", 65001)
            .set("neighbors", Value::List(vec![neighbor("10.0.0.9", 1)]));
        let tpl = Template::parse(BGP).expect("parse");
        assert_eq!(tpl.render(&bindings), tpl.render(&bindings));
    }

    #[test]
    fn node_attributes_become_bindings() {
        let node = ConfigNode::leaf().with("name", "CUSTOMER_A").with("rd", "65000:1");
        let direct = render("vrf definition {$name}\n rd {$rd}", &Bindings::from_node(&node))
            .expect("render");
        assert_eq!(direct, "vrf definition CUSTOMER_A\n rd 65000:1");

        let nested = render("vrf {$vrf.name}", &Bindings::new().set_node("vrf", &node))
            .expect("render");
        assert_eq!(nested, "vrf CUSTOMER_A");
    }

    #[test]
    fn malformed_templates_are_rejected() {
        assert_eq!(
            Template::parse("{% if ($x) %}open"),
            Err(TemplateError::Unclosed("if".to_string()))
        );
        assert_eq!(
            Template::parse("{% endloop %}"),
            Err(TemplateError::Unbalanced("endloop".to_string()))
        );
        assert_eq!(
            Template::parse("{% loop in $x as $y %}{% endif %}"),
            Err(TemplateError::Unbalanced("endif".to_string()))
        );
        assert_eq!(
            Template::parse("{% include other %}"),
            Err(TemplateError::UnknownTag("include other".to_string()))
        );
    }
}
