//! The patch compiler: validate, order, name, render, score, emit.
//!
//! `compile` never short-circuits on the first problem it finds — every
//! diagnostic collected during validation is returned together so a caller
//! can surface them all at once.

use crate::formula::{self, Expr};
use crate::literal::is_safe_numeric_literal;
use crate::registry::{OpcodeDef, OpcodeRegistry, PortDef};
use daw_core::diagnostics::{Diagnostic, DiagnosticKind};
use daw_core::patch::{Connection, Node, ParamValue, Patch, Rate};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use uuid::Uuid;

/// Marks the boundary between the orchestra text (fed to `csoundCompileOrc`)
/// and the score text (fed to `csoundReadScore`) inside `document`.
pub const SCORE_SEPARATOR: &str = "; --- score ---";

#[derive(Debug, Clone)]
pub struct CompiledProgram {
    pub header: String,
    pub orchestra_body: String,
    pub score: String,
    pub document: String,
    /// (node_id, output_port_id) -> rendered engine-variable name, exposed
    /// for session-runtime merging and for tests.
    pub variable_names: HashMap<(Uuid, String), String>,
}

struct FanIn<'a> {
    connections: Vec<&'a Connection>,
}

pub fn compile(patch: &Patch, registry: &OpcodeRegistry) -> Result<CompiledProgram, Vec<Diagnostic>> {
    let mut diagnostics = Vec::new();

    // --- 1. Validate -----------------------------------------------------
    let mut defs: HashMap<Uuid, &OpcodeDef> = HashMap::new();
    for node in &patch.nodes {
        match registry.lookup(&node.opcode) {
            Some(def) => {
                defs.insert(node.id, def);
            }
            None => diagnostics.push(
                Diagnostic::new(DiagnosticKind::UnknownOpcode, format!("unknown opcode '{}'", node.opcode))
                    .at_node(node.id),
            ),
        }
    }

    // Group connections by sink (to_node, to_port).
    let mut fan_ins: HashMap<(Uuid, String), FanIn> = HashMap::new();
    for conn in &patch.connections {
        fan_ins
            .entry((conn.to_node, conn.to_port.clone()))
            .or_insert_with(|| FanIn { connections: Vec::new() })
            .connections
            .push(conn);
    }

    for node in &patch.nodes {
        let Some(def) = defs.get(&node.id) else { continue };
        for port in &def.inputs {
            let key = (node.id, port.id.clone());
            let fan_in = fan_ins.get(&key);
            let connected_count = fan_in.map(|f| f.connections.len()).unwrap_or(0);

            if connected_count == 0 {
                let has_literal = node.params.contains_key(&port.id) || port.default.is_some();
                if port.required && !has_literal {
                    diagnostics.push(
                        Diagnostic::new(
                            DiagnosticKind::MissingInput,
                            format!("required input '{}' has no connection or default", port.id),
                        )
                        .at_node(node.id)
                        .at_port(port.id.clone()),
                    );
                }
                if let Some(value) = node.params.get(&port.id) {
                    check_literal(&mut diagnostics, node.id, port, value);
                }
                continue;
            }

            if connected_count > 1 {
                let connections = &fan_in.unwrap().connections;
                let has_formula = connections.iter().any(|c| c.formula.is_some());
                let distinct_formulas: std::collections::HashSet<&str> =
                    connections.iter().filter_map(|c| c.formula.as_deref()).collect();
                if has_formula && distinct_formulas.len() > 1 {
                    diagnostics.push(
                        Diagnostic::new(
                            DiagnosticKind::FanInAmbiguity,
                            format!(
                                "port '{}' has {} inbound connections with {} different fan-in formulas",
                                port.id,
                                connected_count,
                                distinct_formulas.len()
                            ),
                        )
                        .at_node(node.id)
                        .at_port(port.id.clone()),
                    );
                } else if !has_formula {
                    // No formula present: the compiler treats this as implicit
                    // fan-in and sums the connections in connection-list order
                    // at render time, so there is nothing to validate here.
                } else if let Some(formula_src) = connections.iter().find_map(|c| c.formula.as_deref()) {
                    match formula::parse(formula_src) {
                        Ok(expr) => {
                            let mut vars = std::collections::HashSet::new();
                            expr.free_vars(&mut vars);
                            let allowed: std::collections::HashSet<String> =
                                (1..=connected_count).map(|i| format!("in{i}")).collect();
                            for v in &vars {
                                if !allowed.contains(v) {
                                    diagnostics.push(
                                        Diagnostic::new(
                                            DiagnosticKind::FormulaError,
                                            format!("formula references unknown input '{v}'"),
                                        )
                                        .at_node(node.id)
                                        .at_port(port.id.clone()),
                                    );
                                }
                            }
                        }
                        Err(e) => diagnostics.push(
                            Diagnostic::new(DiagnosticKind::FormulaError, e.to_string())
                                .at_node(node.id)
                                .at_port(port.id.clone()),
                        ),
                    }
                }
            }

            for conn in fan_in.unwrap().connections.iter() {
                let Some(source_node) = patch.node(conn.from_node) else { continue };
                let Some(source_def) = defs.get(&source_node.id) else { continue };
                let Some(source_port) = source_def.outputs.iter().find(|p| p.id == conn.from_port) else {
                    continue;
                };
                if !crate::compat::compatible(source_port.rate, port.rate, &port.accepted_rates) {
                    diagnostics.push(
                        Diagnostic::new(
                            DiagnosticKind::RateMismatch,
                            format!(
                                "connection {}.{} ({:?}) is not compatible with {}.{} ({:?})",
                                source_node.opcode,
                                conn.from_port,
                                source_port.rate,
                                node.opcode,
                                conn.to_port,
                                port.rate
                            ),
                        )
                        .at_node(node.id)
                        .at_port(port.id.clone()),
                    );
                }
            }
        }
    }

    // Cycle detection among non-delay nodes: an edge produced by a `delay`
    // opcode does not create an ordering dependency, since its output is the
    // previous control-cycle's value.
    let mut graph: DiGraph<Uuid, ()> = DiGraph::new();
    let mut indices: HashMap<Uuid, NodeIndex> = HashMap::new();
    for node in &patch.nodes {
        indices.insert(node.id, graph.add_node(node.id));
    }
    for conn in &patch.connections {
        let from_is_delay = patch.node(conn.from_node).map(|n| n.opcode == "delay").unwrap_or(false);
        if from_is_delay {
            continue;
        }
        if let (Some(&a), Some(&b)) = (indices.get(&conn.from_node), indices.get(&conn.to_node)) {
            graph.add_edge(a, b, ());
        }
    }

    if petgraph::algo::is_cyclic_directed(&graph) {
        let sccs = petgraph::algo::kosaraju_scc(&graph);
        for scc in sccs {
            if scc.len() > 1 {
                for ix in scc {
                    diagnostics.push(
                        Diagnostic::new(DiagnosticKind::Cycle, "cycle detected among non-delay nodes".to_string())
                            .at_node(graph[ix]),
                    );
                }
            }
        }
        if diagnostics.iter().all(|d| d.kind != DiagnosticKind::Cycle) {
            diagnostics.push(Diagnostic::new(DiagnosticKind::Cycle, "cycle detected among non-delay nodes".to_string()));
        }
    }

    if !diagnostics.is_empty() {
        return Err(diagnostics);
    }

    // --- 2. Order ------------------------------------------------------
    // Kahn's algorithm with ties broken by node creation order, for a
    // deterministic topological order independent of iteration order over
    // the petgraph adjacency lists.
    let creation_index: HashMap<Uuid, usize> =
        patch.nodes.iter().enumerate().map(|(i, n)| (n.id, i)).collect();
    let final_order = kahn_order(&graph, &creation_index);

    // --- 3. Name -------------------------------------------------------
    let mut variable_names: HashMap<(Uuid, String), String> = HashMap::new();
    let mut table_numbers: HashMap<Uuid, u32> = HashMap::new();
    let mut next_table_number = 1u32;

    for (index, &node_id) in final_order.iter().enumerate() {
        let def = defs.get(&node_id).expect("validated node has a definition");
        if def.is_gen_table {
            table_numbers.insert(node_id, next_table_number);
            next_table_number += 1;
        }
        for port in &def.outputs {
            let name = format!("{}{}_{}", port.rate.as_str(), index, sanitize(&port.id));
            variable_names.insert((node_id, port.id.clone()), name);
        }
    }

    // --- 4. Render -------------------------------------------------------
    let mut orchestra_lines = Vec::new();
    for &node_id in &final_order {
        let node = patch.node(node_id).expect("node in order exists in patch");
        let def = defs.get(&node_id).expect("validated node has a definition");
        if def.is_gen_table {
            continue;
        }

        let mut substitutions: HashMap<String, String> = HashMap::new();
        for port in &def.inputs {
            let key = (node_id, port.id.clone());
            let fan_in = fan_ins.get(&key);
            let rendered = match fan_in {
                None => render_literal(node, port),
                Some(f) if f.connections.len() == 1 => {
                    let conn = f.connections[0];
                    let var = variable_names
                        .get(&(conn.from_node, conn.from_port.clone()))
                        .cloned()
                        .unwrap_or_default();
                    match &conn.formula {
                        Some(src) => {
                            let expr = formula::parse(src).expect("validated formula parses");
                            render_formula(&expr, &[var])
                        }
                        None => var,
                    }
                }
                Some(f) => {
                    let vars: Vec<String> = f
                        .connections
                        .iter()
                        .map(|c| variable_names.get(&(c.from_node, c.from_port.clone())).cloned().unwrap_or_default())
                        .collect();
                    match f.connections.iter().find_map(|c| c.formula.as_deref()) {
                        Some(formula_src) => {
                            let expr = formula::parse(formula_src).expect("validated formula parses");
                            render_formula(&expr, &vars)
                        }
                        // Implicit fan-in: no formula present, so the sum of
                        // all inbound connections is rendered in
                        // connection-list order.
                        None => format!("({})", vars.join(" + ")),
                    }
                }
            };
            substitutions.insert(port.id.clone(), rendered);
        }
        for port in &def.outputs {
            let name = variable_names.get(&(node_id, port.id.clone())).cloned().unwrap_or_default();
            substitutions.insert(port.id.clone(), name);
        }

        let lines: Vec<&String> = match &def.expansion {
            Some(exp) => exp.iter().collect(),
            None => vec![&def.template],
        };
        for line in lines {
            orchestra_lines.push(substitute(line, &substitutions));
        }
    }

    // --- 5. Score --------------------------------------------------------
    let mut score_lines = Vec::new();
    for &node_id in &final_order {
        let Some(def) = defs.get(&node_id) else { continue };
        if !def.is_gen_table {
            continue;
        }
        let node = patch.node(node_id).expect("node in order exists in patch");
        let table_number = table_numbers.get(&node_id).copied().unwrap_or(0);
        let gen_routine = param_number(node, "gen_routine", def).unwrap_or(10.0);
        let size = param_number(node, "size", def).unwrap_or(4096.0);
        score_lines.push(format!("f{table_number} 0 {size} {gen_routine}", size = fmt_num(size), gen_routine = fmt_num(gen_routine)));
    }
    score_lines.push("i1 0 -1".to_string());

    // --- 6. Emit -----------------------------------------------------------
    let ksmps = patch.engine_config.ksmps();
    let header = format!(
        "sr = {}\nksmps = {}\nnchnls = {}\n0dbfs = {}",
        patch.engine_config.sr, ksmps, patch.engine_config.channels, fmt_num(patch.engine_config.zero_dbfs as f64)
    );
    let orchestra_body = orchestra_lines.join("\n");
    let score = score_lines.join("\n");
    let orc = format!("{header}\n\ninstr 1\n{body}\nendin\nmassign 0, 1\n", body = indent(&orchestra_body));
    let document = format!("{orc}\n{SCORE_SEPARATOR}\n{score}\n");

    Ok(CompiledProgram { header, orchestra_body, score, document, variable_names })
}

fn kahn_order(graph: &DiGraph<Uuid, ()>, creation_index: &HashMap<Uuid, usize>) -> Vec<Uuid> {
    let mut in_degree: HashMap<NodeIndex, usize> = graph
        .node_indices()
        .map(|ix| (ix, graph.edges_directed(ix, Direction::Incoming).count()))
        .collect();

    let rank = |ix: &NodeIndex| creation_index.get(&graph[*ix]).copied().unwrap_or(usize::MAX);
    let mut ready: BinaryHeap<Reverse<(usize, NodeIndex)>> = graph
        .node_indices()
        .filter(|ix| in_degree[ix] == 0)
        .map(|ix| Reverse((rank(&ix), ix)))
        .collect();

    let mut order = Vec::with_capacity(graph.node_count());
    while let Some(Reverse((_, ix))) = ready.pop() {
        order.push(graph[ix]);
        for next in graph.neighbors_directed(ix, Direction::Outgoing) {
            let degree = in_degree.get_mut(&next).unwrap();
            *degree -= 1;
            if *degree == 0 {
                ready.push(Reverse((rank(&next), next)));
            }
        }
    }
    order
}

fn check_literal(diagnostics: &mut Vec<Diagnostic>, node_id: Uuid, port: &PortDef, value: &ParamValue) {
    if matches!(port.rate, Rate::String) {
        return;
    }
    if let Some(n) = value.as_number() {
        if !is_safe_numeric_literal(&fmt_num(n)) {
            diagnostics.push(
                Diagnostic::new(DiagnosticKind::BadLiteral, format!("literal for '{}' is not a safe numeric literal", port.id))
                    .at_node(node_id)
                    .at_port(port.id.clone()),
            );
        }
    }
}

fn render_literal(node: &Node, port: &PortDef) -> String {
    let value = node.params.get(&port.id).or(port.default.as_ref());
    match value {
        Some(ParamValue::Number(n)) => fmt_num(*n),
        Some(ParamValue::Boolean(b)) => fmt_num(if *b { 1.0 } else { 0.0 }),
        Some(ParamValue::String(s)) => format!("\"{}\"", s.replace('"', "")),
        None => "0".to_string(),
    }
}

fn param_number(node: &Node, key: &str, def: &OpcodeDef) -> Option<f64> {
    node.params
        .get(key)
        .and_then(|v| v.as_number())
        .or_else(|| def.inputs.iter().find(|p| p.id == key).and_then(|p| p.default.as_ref()).and_then(|v| v.as_number()))
}

fn render_formula(expr: &Expr, inputs: &[String]) -> String {
    fn walk(expr: &Expr, inputs: &[String]) -> String {
        match expr {
            Expr::Number(n) => fmt_num(*n),
            Expr::Var(name) => {
                let idx = name.strip_prefix("in").and_then(|s| s.parse::<usize>().ok());
                match idx {
                    Some(i) if i >= 1 && i <= inputs.len() => inputs[i - 1].clone(),
                    _ => name.clone(),
                }
            }
            Expr::Neg(inner) => format!("(-{})", walk(inner, inputs)),
            Expr::Binary(op, lhs, rhs) => {
                let sym = match op {
                    crate::formula::BinOp::Add => "+",
                    crate::formula::BinOp::Sub => "-",
                    crate::formula::BinOp::Mul => "*",
                    crate::formula::BinOp::Div => "/",
                };
                format!("({} {} {})", walk(lhs, inputs), sym, walk(rhs, inputs))
            }
            Expr::Call(name, args) => {
                let rendered: Vec<String> = args.iter().map(|a| walk(a, inputs)).collect();
                format!("{}({})", name, rendered.join(", "))
            }
        }
    }
    walk(expr, inputs)
}

fn substitute(template: &str, substitutions: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let bytes = template.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' {
            if let Some(end) = template[i..].find('}') {
                let key = &template[i + 1..i + end];
                if let Some(value) = substitutions.get(key) {
                    out.push_str(value);
                    i += end + 1;
                    continue;
                }
            }
        }
        let ch = template[i..].chars().next().unwrap();
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

fn indent(body: &str) -> String {
    body.lines().map(|l| format!("  {l}")).collect::<Vec<_>>().join("\n")
}

fn sanitize(id: &str) -> String {
    id.chars().map(|c| if c.is_ascii_alphanumeric() { c } else { '_' }).collect()
}

fn fmt_num(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        let mut s = format!("{n}");
        if !s.contains('.') && !s.contains('e') {
            s.push_str(".0");
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daw_core::patch::EngineConfig;

    fn node(opcode: &str, params: &[(&str, ParamValue)]) -> Node {
        Node {
            id: Uuid::new_v4(),
            opcode: opcode.to_string(),
            params: params.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
            position: (0.0, 0.0),
        }
    }

    fn base_patch() -> Patch {
        Patch {
            id: Uuid::new_v4(),
            name: "test".to_string(),
            description: None,
            schema_version: 1,
            engine_config: EngineConfig::default(),
            nodes: Vec::new(),
            connections: Vec::new(),
            ui_layout: serde_json::Value::Null,
        }
    }

    #[test]
    fn compiles_three_node_graph() {
        let registry = OpcodeRegistry::bundled();
        let mut patch = base_patch();

        let freq_src = node("const_k", &[("value", ParamValue::Number(440.0))]);
        let osc = node(
            "oscili",
            &[("amp", ParamValue::Number(0.5)), ("ifn", ParamValue::Number(1.0))],
        );
        let sink = node("outs", &[]);

        patch.connections.push(Connection {
            from_node: freq_src.id,
            from_port: "out".to_string(),
            to_node: osc.id,
            to_port: "freq".to_string(),
            formula: None,
        });
        patch.connections.push(Connection {
            from_node: osc.id,
            from_port: "out".to_string(),
            to_node: sink.id,
            to_port: "left".to_string(),
            formula: None,
        });
        patch.connections.push(Connection {
            from_node: osc.id,
            from_port: "out".to_string(),
            to_node: sink.id,
            to_port: "right".to_string(),
            formula: None,
        });
        patch.nodes = vec![freq_src, osc, sink];

        let program = compile(&patch, &registry).expect("compile should succeed");
        let oscili_lines = program.orchestra_body.lines().filter(|l| l.contains("oscili")).count();
        let outs_lines = program.orchestra_body.lines().filter(|l| l.trim_start().starts_with("outs")).count();
        assert_eq!(oscili_lines, 1);
        assert_eq!(outs_lines, 1);
    }

    #[test]
    fn rejects_rate_mismatch() {
        let registry = OpcodeRegistry::bundled();
        let mut patch = base_patch();

        let src = node("const_a", &[("value", ParamValue::Number(1.0))]);
        let osc = node("oscili", &[("amp", ParamValue::Number(0.5))]);
        patch.connections.push(Connection {
            from_node: src.id,
            from_port: "out".to_string(),
            to_node: osc.id,
            to_port: "ifn".to_string(),
            formula: None,
        });
        patch.nodes = vec![src, osc];

        let diagnostics = compile(&patch, &registry).expect_err("compile should fail");
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind, DiagnosticKind::RateMismatch);
    }

    #[test]
    fn formula_fan_in_evaluates_to_fifty() {
        let registry = OpcodeRegistry::bundled();
        let mut patch = base_patch();

        let a = node("const_k", &[("value", ParamValue::Number(10.0))]);
        let b = node("const_k", &[("value", ParamValue::Number(20.0))]);
        let osc = node(
            "oscili",
            &[("amp", ParamValue::Number(0.5)), ("ifn", ParamValue::Number(1.0))],
        );

        patch.connections.push(Connection {
            from_node: a.id,
            from_port: "out".to_string(),
            to_node: osc.id,
            to_port: "freq".to_string(),
            formula: Some("in1 + in2 * 2".to_string()),
        });
        patch.connections.push(Connection {
            from_node: b.id,
            from_port: "out".to_string(),
            to_node: osc.id,
            to_port: "freq".to_string(),
            formula: None,
        });
        patch.nodes = vec![a, b, osc];

        let program = compile(&patch, &registry).expect("compile should succeed");
        let mut inputs = std::collections::HashMap::new();
        inputs.insert("in1".to_string(), 10.0);
        inputs.insert("in2".to_string(), 20.0);
        let expr = crate::formula::parse("in1 + in2 * 2").unwrap();
        assert_eq!(expr.eval(&inputs).unwrap(), 50.0);
        assert!(program.orchestra_body.contains("oscili"));
    }

    #[test]
    fn detects_cycle_among_non_delay_nodes() {
        let registry = OpcodeRegistry::bundled();
        let mut patch = base_patch();

        let a = node("const_a", &[("value", ParamValue::Number(1.0))]);
        let b = node("delay", &[("time", ParamValue::Number(0.5))]);
        patch.connections.push(Connection {
            from_node: a.id,
            from_port: "out".to_string(),
            to_node: b.id,
            to_port: "ain".to_string(),
            formula: None,
        });
        patch.nodes = vec![a, b];

        assert!(compile(&patch, &registry).is_ok());
    }

    #[test]
    fn rejects_missing_required_input() {
        let registry = OpcodeRegistry::bundled();
        let mut patch = base_patch();
        let osc = node("oscili", &[]);
        patch.nodes = vec![osc];

        let diagnostics = compile(&patch, &registry).expect_err("compile should fail");
        assert!(diagnostics.iter().any(|d| d.kind == DiagnosticKind::MissingInput));
    }

    #[test]
    fn sums_unformulated_fan_in_in_connection_order() {
        let registry = OpcodeRegistry::bundled();
        let mut patch = base_patch();

        let a = node("const_k", &[("value", ParamValue::Number(1.0))]);
        let b = node("const_k", &[("value", ParamValue::Number(2.0))]);
        let osc = node("oscili", &[("amp", ParamValue::Number(0.5)), ("ifn", ParamValue::Number(1.0))]);
        patch.connections.push(Connection {
            from_node: a.id,
            from_port: "out".to_string(),
            to_node: osc.id,
            to_port: "freq".to_string(),
            formula: None,
        });
        patch.connections.push(Connection {
            from_node: b.id,
            from_port: "out".to_string(),
            to_node: osc.id,
            to_port: "freq".to_string(),
            formula: None,
        });
        let a_id = a.id;
        let b_id = b.id;
        patch.nodes = vec![a, b, osc];

        let program = compile(&patch, &registry).expect("unformulated fan-in should sum");
        let a_var = program.variable_names.get(&(a_id, "out".to_string())).unwrap();
        let b_var = program.variable_names.get(&(b_id, "out".to_string())).unwrap();
        assert!(program.orchestra_body.contains(&format!("({a_var} + {b_var})")));
    }

    #[test]
    fn rejects_fan_in_with_conflicting_formulas() {
        let registry = OpcodeRegistry::bundled();
        let mut patch = base_patch();

        let a = node("const_k", &[("value", ParamValue::Number(1.0))]);
        let b = node("const_k", &[("value", ParamValue::Number(2.0))]);
        let osc = node("oscili", &[("amp", ParamValue::Number(0.5)), ("ifn", ParamValue::Number(1.0))]);
        patch.connections.push(Connection {
            from_node: a.id,
            from_port: "out".to_string(),
            to_node: osc.id,
            to_port: "freq".to_string(),
            formula: Some("in1 * 2".to_string()),
        });
        patch.connections.push(Connection {
            from_node: b.id,
            from_port: "out".to_string(),
            to_node: osc.id,
            to_port: "freq".to_string(),
            formula: Some("in2 * 3".to_string()),
        });
        patch.nodes = vec![a, b, osc];

        let diagnostics = compile(&patch, &registry).expect_err("compile should fail");
        assert!(diagnostics.iter().any(|d| d.kind == DiagnosticKind::FanInAmbiguity));
    }
}
