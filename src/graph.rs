use std::collections::{HashMap, HashSet, VecDeque};

use anyhow::{Result, bail};

use crate::dsl::ScriptDSL;

/// Order the script's nodes so every producer comes before its consumers.
///
/// Interface endpoints (input, output, push constants, vertex output and
/// descriptor bindings) are not part of the order.
pub fn topo_sort(script: &ScriptDSL) -> Result<Vec<String>> {
    let mut indeg: HashMap<&str, usize> = HashMap::with_capacity(script.nodes.len());
    for n in &script.nodes {
        if script.is_interface_node(&n.id) {
            bail!("node id {} is reserved for an interface endpoint", n.id);
        }
        if indeg.insert(n.id.as_str(), 0).is_some() {
            bail!("duplicate node id {}", n.id);
        }
    }

    let mut outgoing: HashMap<&str, Vec<&str>> = HashMap::new();
    for c in &script.connections {
        let from = c.from.node_id.as_str();
        let to = c.to.node_id.as_str();
        for id in [from, to] {
            if !indeg.contains_key(id) && !script.is_interface_node(id) {
                bail!("connection references missing node: {from} -> {to}");
            }
        }
        if !indeg.contains_key(from) {
            continue;
        }
        if let Some(d) = indeg.get_mut(to) {
            *d += 1;
            outgoing.entry(from).or_default().push(to);
        }
    }

    // Seed in declaration order so the result is stable.
    let mut q: VecDeque<&str> = script
        .nodes
        .iter()
        .map(|n| n.id.as_str())
        .filter(|id| indeg.get(id) == Some(&0))
        .collect();
    let mut order: Vec<String> = Vec::with_capacity(script.nodes.len());

    while let Some(n) = q.pop_front() {
        order.push(n.to_string());
        if let Some(nexts) = outgoing.get(n) {
            for m in nexts {
                if let Some(entry) = indeg.get_mut(m) {
                    *entry -= 1;
                    if *entry == 0 {
                        q.push_back(m);
                    }
                }
            }
        }
    }

    if order.len() != script.nodes.len() {
        bail!("cycle detected in graph (cannot topologically sort)");
    }
    Ok(order)
}

pub fn upstream_reachable(script: &ScriptDSL, start: &str) -> HashSet<String> {
    let mut incoming: HashMap<&str, Vec<&str>> = HashMap::new();
    for c in &script.connections {
        incoming
            .entry(c.to.node_id.as_str())
            .or_default()
            .push(c.from.node_id.as_str());
    }

    let mut visited: HashSet<String> = HashSet::new();
    let mut stack: Vec<&str> = vec![start];
    while let Some(n) = stack.pop() {
        if !visited.insert(n.to_string()) {
            continue;
        }
        if let Some(prevs) = incoming.get(n) {
            for p in prevs {
                stack.push(p);
            }
        }
    }
    visited
}
