//! The resource graph.
//!
//! Holds declared nodes and the references between them, and answers the
//! structural questions the planner needs: does every reference point at a
//! real node and output, is the graph acyclic, and in what order must nodes
//! be provisioned. The graph is purely structural; it performs no side
//! effects.

use std::collections::{BTreeSet, HashMap};
use tracing::debug;

use crate::error::{GraphError, KorralError, Result};

use super::node::ResourceNode;

/// A recorded reference edge between two nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphReference {
    /// Id of the node holding the reference.
    pub from: String,
    /// Configuration attribute (or hook parameter path) the reference
    /// appears under.
    pub attribute: String,
    /// Id of the referenced node.
    pub to: String,
    /// Name of the referenced output attribute.
    pub output: String,
}

/// The resource dependency graph.
///
/// Nodes keep their declaration order, which breaks ties between otherwise
/// independent nodes in [`ResourceGraph::topological_order`] so that plans
/// are deterministic and diff-friendly.
#[derive(Debug, Default)]
pub struct ResourceGraph {
    /// Nodes in declaration order.
    nodes: Vec<ResourceNode>,
    /// Node id to declaration index.
    index: HashMap<String, usize>,
    /// All reference edges.
    references: Vec<GraphReference>,
}

impl ResourceGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node to the graph.
    ///
    /// References embedded in the node's configuration and hook parameters
    /// are recorded automatically; their targets are checked by
    /// [`ResourceGraph::validate`], not here, so declaration order does not
    /// matter.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::DuplicateId`] if the id is already present.
    pub fn add_node(&mut self, node: ResourceNode) -> Result<()> {
        if self.index.contains_key(&node.id) {
            return Err(KorralError::Graph(GraphError::DuplicateId {
                id: node.id.clone(),
            }));
        }

        let embedded: Vec<GraphReference> = node
            .references()
            .into_iter()
            .map(|(attribute, reference)| GraphReference {
                from: node.id.clone(),
                attribute,
                to: reference.node.clone(),
                output: reference.output.clone(),
            })
            .collect();

        debug!(
            "Adding node '{}' ({}) with {} reference(s)",
            node.id,
            node.kind,
            embedded.len()
        );

        self.index.insert(node.id.clone(), self.nodes.len());
        self.nodes.push(node);
        self.references.extend(embedded);

        Ok(())
    }

    /// Adds an explicit reference edge between two existing nodes.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownNode`] if either id is absent.
    pub fn add_reference(
        &mut self,
        from: &str,
        attribute: &str,
        to: &str,
        output: &str,
    ) -> Result<()> {
        for id in [from, to] {
            if !self.index.contains_key(id) {
                return Err(KorralError::Graph(GraphError::UnknownNode {
                    id: id.to_string(),
                }));
            }
        }

        self.references.push(GraphReference {
            from: from.to_string(),
            attribute: attribute.to_string(),
            to: to.to_string(),
            output: output.to_string(),
        });

        Ok(())
    }

    /// Returns the node with the given id.
    #[must_use]
    pub fn node(&self, id: &str) -> Option<&ResourceNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    /// Returns true if a node with the given id exists.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Returns all nodes in declaration order.
    #[must_use]
    pub fn nodes(&self) -> &[ResourceNode] {
        &self.nodes
    }

    /// Returns all recorded reference edges.
    #[must_use]
    pub fn references(&self) -> &[GraphReference] {
        &self.references
    }

    /// Returns the number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns the ids of nodes that `id` references, without duplicates,
    /// in the order they first appear.
    #[must_use]
    pub fn dependencies_of(&self, id: &str) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for reference in self.references.iter().filter(|r| r.from == id) {
            if seen.insert(reference.to.as_str()) {
                out.push(reference.to.clone());
            }
        }
        out
    }

    /// Validates the structural invariants of the graph.
    ///
    /// Every reference must point at an existing node, and at a known output
    /// attribute where the target kind declares its output set (custom
    /// resources only reveal their outputs at provisioning time, so
    /// references into them are checked at apply). The reference graph must
    /// be acyclic.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::DanglingReference`] for a reference to a
    /// missing node or output, or [`GraphError::Cycle`] naming the nodes on
    /// the cycle.
    pub fn validate(&self) -> Result<()> {
        for reference in &self.references {
            let Some(target) = self.node(&reference.to) else {
                return Err(KorralError::Graph(GraphError::DanglingReference {
                    from: reference.from.clone(),
                    to: reference.to.clone(),
                    output: reference.output.clone(),
                }));
            };

            if let Some(outputs) = target.kind.known_outputs()
                && !outputs.contains(&reference.output.as_str()) {
                    return Err(KorralError::Graph(GraphError::DanglingReference {
                        from: reference.from.clone(),
                        to: reference.to.clone(),
                        output: reference.output.clone(),
                    }));
                }
        }

        self.topological_order().map(|_| ())
    }

    /// Computes a creation order: every node appears after all nodes it
    /// references. Ties between independent nodes are broken by declaration
    /// order.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::Cycle`] if the reference graph contains a
    /// cycle.
    pub fn topological_order(&self) -> Result<Vec<String>> {
        // Deduplicated dependency sets per node; a node referencing the same
        // target twice contributes a single edge.
        let mut depends_on: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); self.nodes.len()];
        for reference in &self.references {
            if let (Some(&from), Some(&to)) =
                (self.index.get(&reference.from), self.index.get(&reference.to))
            {
                depends_on[from].insert(to);
            }
        }

        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        let mut in_degree: Vec<usize> = vec![0; self.nodes.len()];
        for (from, deps) in depends_on.iter().enumerate() {
            in_degree[from] = deps.len();
            for &to in deps {
                dependents[to].push(from);
            }
        }

        // Kahn's algorithm; the ready set is ordered by declaration index.
        let mut ready: BTreeSet<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|&(_, &d)| d == 0)
            .map(|(i, _)| i)
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(next) = ready.pop_first() {
            order.push(self.nodes[next].id.clone());

            for &dependent in &dependents[next] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        if order.len() < self.nodes.len() {
            let remaining: Vec<String> = self
                .nodes
                .iter()
                .filter(|n| !order.contains(&n.id))
                .map(|n| n.id.clone())
                .collect();
            return Err(KorralError::Graph(GraphError::Cycle { nodes: remaining }));
        }

        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GraphError;
    use crate::graph::node::ResourceKind;
    use crate::graph::value::attrs_from_json;
    use serde_json::json;

    fn node(id: &str, kind: ResourceKind, config: serde_json::Value) -> ResourceNode {
        ResourceNode::new(
            id,
            kind,
            attrs_from_json(config.as_object().expect("config must be an object")),
        )
    }

    fn certificate_stack() -> ResourceGraph {
        let mut graph = ResourceGraph::new();
        graph
            .add_node(node(
                "device-policy",
                ResourceKind::Policy,
                json!({"policy_name": "device-policy"}),
            ))
            .expect("add policy");
        graph
            .add_node(node("collar", ResourceKind::Thing, json!({"thing_name": "elk-collar"})))
            .expect("add thing");
        graph
            .add_node(node("device-cert", ResourceKind::Custom, json!({})))
            .expect("add custom");
        graph
            .add_node(node(
                "cert-to-thing",
                ResourceKind::Attachment,
                json!({
                    "principal": "${device-cert.certificateArn}",
                    "thing": "${collar.thingName}",
                }),
            ))
            .expect("add thing attachment");
        graph
            .add_node(node(
                "cert-to-policy",
                ResourceKind::Attachment,
                json!({
                    "principal": "${device-cert.certificateArn}",
                    "policy": "${device-policy.policyName}",
                }),
            ))
            .expect("add policy attachment");
        graph
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut graph = ResourceGraph::new();
        graph
            .add_node(node("collar", ResourceKind::Thing, json!({})))
            .expect("first add");

        let err = graph
            .add_node(node("collar", ResourceKind::Thing, json!({})))
            .expect_err("duplicate must fail");
        assert!(matches!(
            err,
            KorralError::Graph(GraphError::DuplicateId { ref id }) if id == "collar"
        ));
    }

    #[test]
    fn test_add_reference_rejects_unknown_node() {
        let mut graph = ResourceGraph::new();
        graph
            .add_node(node("collar", ResourceKind::Thing, json!({})))
            .expect("add");

        let err = graph
            .add_reference("collar", "principal", "ghost", "arn")
            .expect_err("unknown target must fail");
        assert!(matches!(
            err,
            KorralError::Graph(GraphError::UnknownNode { ref id }) if id == "ghost"
        ));
    }

    #[test]
    fn test_topological_order_places_dependents_last() {
        let graph = certificate_stack();
        let order = graph.topological_order().expect("acyclic");

        assert_eq!(
            order,
            vec!["device-policy", "collar", "device-cert", "cert-to-thing", "cert-to-policy"]
        );

        for reference in graph.references() {
            let from = order.iter().position(|id| *id == reference.from).expect("from");
            let to = order.iter().position(|id| *id == reference.to).expect("to");
            assert!(to < from, "{} must come before {}", reference.to, reference.from);
        }
    }

    #[test]
    fn test_topological_order_is_deterministic() {
        let graph = certificate_stack();
        let first = graph.topological_order().expect("acyclic");
        let second = graph.topological_order().expect("acyclic");
        assert_eq!(first, second);
    }

    #[test]
    fn test_cycle_reported_as_cycle_not_dangling() {
        let mut graph = ResourceGraph::new();
        graph
            .add_node(node("a", ResourceKind::Thing, json!({"thing_name": "${b.thingName}"})))
            .expect("add a");
        graph
            .add_node(node("b", ResourceKind::Thing, json!({"thing_name": "${a.thingName}"})))
            .expect("add b");

        let err = graph.validate().expect_err("cycle must fail");
        match err {
            KorralError::Graph(GraphError::Cycle { nodes }) => {
                assert_eq!(nodes, vec!["a", "b"]);
            }
            other => panic!("expected cycle error, got: {other}"),
        }
    }

    #[test]
    fn test_reference_to_missing_node_is_dangling() {
        let mut graph = ResourceGraph::new();
        graph
            .add_node(node(
                "cert-to-thing",
                ResourceKind::Attachment,
                json!({"principal": "${ghost.certificateArn}", "thing": "elk-collar"}),
            ))
            .expect("add");

        let err = graph.validate().expect_err("dangling must fail");
        assert!(matches!(
            err,
            KorralError::Graph(GraphError::DanglingReference { ref to, .. }) if to == "ghost"
        ));
    }

    #[test]
    fn test_reference_to_unknown_output_is_dangling() {
        let mut graph = ResourceGraph::new();
        graph
            .add_node(node("collar", ResourceKind::Thing, json!({"thing_name": "elk-collar"})))
            .expect("add thing");
        graph
            .add_node(node(
                "cert-to-thing",
                ResourceKind::Attachment,
                json!({"principal": "${collar.certificateArn}", "thing": "elk-collar"}),
            ))
            .expect("add attachment");

        let err = graph.validate().expect_err("unknown output must fail");
        assert!(matches!(
            err,
            KorralError::Graph(GraphError::DanglingReference { ref output, .. })
                if output == "certificateArn"
        ));
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let mut graph = ResourceGraph::new();
        graph
            .add_node(node("collar", ResourceKind::Thing, json!({"thing_name": "${collar.thingName}"})))
            .expect("add");

        let err = graph.validate().expect_err("self reference must fail");
        assert!(matches!(err, KorralError::Graph(GraphError::Cycle { .. })));
    }

    #[test]
    fn test_dependencies_are_deduplicated() {
        let graph = certificate_stack();
        let deps = graph.dependencies_of("cert-to-policy");
        assert_eq!(deps, vec!["device-cert", "device-policy"]);
    }
}
