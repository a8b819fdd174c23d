//! # The cost tree of the inference graph
//!
//! A hypergraph rooted at the target cell, expanded attribute by attribute
//! through the hyperedges of the row. The minimum deletion cost of every
//! node is computed while the tree is built: children are complete before a
//! parent attaches its branch, so attaching can finalize the branch's
//! cheapest child and the parent's cost in the same call, and no second
//! propagation pass is needed.
//!
//! The cost models: to safely delete a cell, also delete, for every
//! constraint that could reconstruct it, its cheapest-to-remove accomplice.
//! Hyperedges of one node are treated as independently satisfiable, so the
//! cost is an upper bound, not a proven-minimal vertex cover.
//!

use std::collections::{BTreeSet, HashMap, VecDeque};

use super::{Error, Hyperedge, Result};
use crate::{
    cell::{Attribute, Cell, Value},
    io::Row,
};

/// Stable identifier of a node in the graph arena
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// One (hyperedge, children) branch of a node
#[derive(Clone, Debug)]
pub struct Branch {
    edge: Hyperedge,
    children: Vec<NodeId>,
    /// The cheapest child, fixed when the branch is attached
    min_child: Option<NodeId>,
}

impl Branch {
    pub fn edge(&self) -> &Hyperedge {
        &self.edge
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn min_child(&self) -> Option<NodeId> {
        self.min_child
    }
}

/// One cell of the row together with its branches and deletion cost
#[derive(Clone, Debug)]
pub struct Node {
    cell: Cell,
    branches: Vec<Branch>,
    cost: u64,
}

impl Node {
    pub fn cell(&self) -> &Cell {
        &self.cell
    }

    pub fn branches(&self) -> &[Branch] {
        &self.branches
    }

    /// ≥ 1: the cost of deleting the cell plus, per branch, its cheapest child
    pub fn cost(&self) -> u64 {
        self.cost
    }
}

/// The inference hypergraph of one (row, target attribute) query, with
/// per-node deletion costs and a cell-to-node index for O(1) lookup
#[derive(Clone, Debug)]
pub struct HyperGraph {
    nodes: Vec<Node>,
    root: NodeId,
    index: HashMap<Cell, NodeId>,
}

impl HyperGraph {
    /// Build the graph from the start attribute, memoizing nodes by column
    /// and carrying an immutable visited snapshot per recursive call.
    pub fn build(
        table: &str,
        row: &Row,
        key: &Value,
        start_column: &str,
        edges: &HashMap<Cell, Vec<Hyperedge>>,
    ) -> Result<HyperGraph> {
        let mut builder = GraphBuilder {
            table,
            row,
            key,
            edges,
            nodes: Vec::new(),
            memo: HashMap::new(),
            index: HashMap::new(),
        };
        let visited = BTreeSet::from([start_column.to_string()]);
        let root = builder.build_node(start_column, visited)?;
        log::debug!(
            "Hypergraph built: {} nodes, root cost {}",
            builder.nodes.len(),
            builder.nodes[root.index()].cost
        );
        Ok(HyperGraph {
            nodes: builder.nodes,
            root,
            index: builder.index,
        })
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node_of(&self, cell: &Cell) -> Option<NodeId> {
        self.index.get(cell).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    /// The minimal blocking set for the target cell: a breadth-first walk
    /// from the target's node, following each branch's precomputed cheapest
    /// child. The result always contains the target.
    pub fn optimal_delete(&self, target: &Cell) -> Result<BTreeSet<Cell>> {
        let start = self
            .node_of(target)
            .ok_or_else(|| Error::unknown_cell(target))?;
        let mut to_delete: BTreeSet<Cell> = BTreeSet::from([target.clone()]);
        let mut queue: VecDeque<NodeId> = VecDeque::from([start]);
        while let Some(id) = queue.pop_front() {
            for branch in self.node(id).branches() {
                if let Some(min_child) = branch.min_child() {
                    let cell = self.node(min_child).cell().clone();
                    if to_delete.insert(cell) {
                        queue.push_back(min_child);
                    }
                }
            }
        }
        Ok(to_delete)
    }
}

struct GraphBuilder<'a> {
    table: &'a str,
    row: &'a Row,
    key: &'a Value,
    edges: &'a HashMap<Cell, Vec<Hyperedge>>,
    nodes: Vec<Node>,
    memo: HashMap<String, NodeId>,
    index: HashMap<Cell, NodeId>,
}

impl<'a> GraphBuilder<'a> {
    fn build_node(&mut self, column: &str, visited: BTreeSet<String>) -> Result<NodeId> {
        let value = self
            .row
            .get(column)
            .ok_or_else(|| Error::missing_attribute(column))?;
        let cell = Cell::new(
            Attribute::new(self.table, column),
            self.key.clone(),
            value.clone(),
        );
        // a node already built in this traversal is reused, not rebuilt
        if let Some(id) = self.memo.get(column) {
            return Ok(*id);
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            cell: cell.clone(),
            branches: Vec::new(),
            cost: 1,
        });
        self.memo.insert(column.to_string(), id);
        self.index.insert(cell.clone(), id);

        let cell_edges: Vec<Hyperedge> = self.edges.get(&cell).cloned().unwrap_or_default();
        for edge in cell_edges {
            // a vacuous constraint contributes no deletion pressure
            if edge.is_empty() {
                continue;
            }
            let tail_columns = edge.columns();
            // a hyperedge whose tails are all on the current path adds no
            // new information and would loop
            if tail_columns.iter().all(|c| visited.contains(*c)) {
                continue;
            }
            // the snapshot is extended with the whole tail so sibling
            // branches of this hyperedge cannot re-expand each other
            let mut extended = visited.clone();
            extended.extend(tail_columns.iter().map(|c| c.to_string()));
            let mut children: Vec<NodeId> = Vec::new();
            for tail in edge.iter() {
                if !visited.contains(tail.column()) {
                    children.push(self.build_node(tail.column(), extended.clone())?);
                }
            }
            if !children.is_empty() {
                self.add_branch(id, edge.clone(), children);
            }
        }
        Ok(id)
    }

    /// Attach a branch and finalize costs in the same call: the children are
    /// fully built, so the cheapest child is definitive
    fn add_branch(&mut self, id: NodeId, edge: Hyperedge, children: Vec<NodeId>) {
        let min_child = children
            .iter()
            .copied()
            .min_by_key(|child| self.nodes[child.index()].cost);
        self.nodes[id.index()].branches.push(Branch {
            edge,
            children,
            min_child,
        });
        let cost = 1 + self.nodes[id.index()]
            .branches
            .iter()
            .filter_map(|branch| branch.min_child)
            .map(|child| self.nodes[child.index()].cost)
            .sum::<u64>();
        self.nodes[id.index()].cost = cost;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        builder::WithIterator,
        constraint::{ConstraintSet, DenialConstraint},
        hypergraph::HyperedgeBuilder,
    };

    fn constraint_set(dcs: &[&[(&str, &str, &str)]]) -> ConstraintSet {
        ConstraintSet::default().with_iter(
            dcs.iter()
                .enumerate()
                .map(|(i, triples)| DenialConstraint::parse(format!("dc{}", i), *triples).unwrap()),
        )
    }

    fn graph(row: &Row, constraints: &ConstraintSet, start: &str) -> HyperGraph {
        let builder = HyperedgeBuilder::new("adult_data", constraints);
        let key = Value::from(2);
        let edges = builder.build_hyperedge_map(row, &key, start).unwrap();
        HyperGraph::build("adult_data", row, &key, start, &edges).unwrap()
    }

    fn adult_row() -> Row {
        Row::from([
            ("education".to_string(), Value::from("Bachelors")),
            ("education_num".to_string(), Value::from(13)),
            ("occupation".to_string(), Value::from("Adm-clerical")),
            ("hours_per_week".to_string(), Value::from(40)),
        ])
    }

    #[test]
    fn test_leaf_cost_is_one() {
        let constraints = constraint_set(&[&[
            ("t1.education", "!=", "t2.education"),
            ("t1.education_num", "==", "t2.education_num"),
        ]]);
        let graph = graph(&adult_row(), &constraints, "education");
        assert_eq!(graph.len(), 2);
        let root = graph.node(graph.root());
        assert_eq!(root.cell().column(), "education");
        // one branch with one leaf child: cost 1 + 1
        assert_eq!(root.cost(), 2);
        let leaf = graph.node(root.branches()[0].min_child().unwrap());
        assert!(leaf.branches().is_empty());
        assert_eq!(leaf.cost(), 1);
    }

    #[test]
    fn test_cost_sums_over_hyperedges() {
        // two independent constraints on education: each contributes its
        // cheapest (leaf) child
        let constraints = constraint_set(&[
            &[
                ("t1.education", "!=", "t2.education"),
                ("t1.education_num", "==", "t2.education_num"),
            ],
            &[
                ("t1.education", "==", "t2.education"),
                ("t1.occupation", "!=", "t2.occupation"),
            ],
        ]);
        let graph = graph(&adult_row(), &constraints, "education");
        assert_eq!(graph.node(graph.root()).cost(), 3);
    }

    #[test]
    fn test_cost_monotonicity() {
        let constraints = constraint_set(&[
            &[
                ("t1.education", "!=", "t2.education"),
                ("t1.education_num", "==", "t2.education_num"),
            ],
            &[
                ("t1.education_num", "==", "t2.education_num"),
                ("t1.hours_per_week", ">", "t2.hours_per_week"),
                ("t1.occupation", "!=", "t2.occupation"),
            ],
        ]);
        let graph = graph(&adult_row(), &constraints, "education");
        for node in graph.iter() {
            assert!(node.cost() >= 1);
            for branch in node.branches() {
                let min_child_cost = branch
                    .children()
                    .iter()
                    .map(|c| graph.node(*c).cost())
                    .min()
                    .unwrap();
                assert!(node.cost() >= 1 + min_child_cost);
                // the annotated child is one of the cheapest
                assert_eq!(
                    graph.node(branch.min_child().unwrap()).cost(),
                    min_child_cost
                );
            }
        }
    }

    #[test]
    fn test_cyclic_constraints_terminate() {
        // education and education_num each constrain the other
        let constraints = constraint_set(&[
            &[
                ("t1.education", "!=", "t2.education"),
                ("t1.education_num", "==", "t2.education_num"),
            ],
            &[
                ("t1.education_num", "!=", "t2.education_num"),
                ("t1.education", "==", "t2.education"),
            ],
        ]);
        let graph = graph(&adult_row(), &constraints, "education");
        // the cycle is cut by the visited snapshot: education_num does not
        // re-expand education
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.node(graph.root()).cost(), 2);
    }

    #[test]
    fn test_optimal_delete_contains_target() {
        let constraints = constraint_set(&[
            &[
                ("t1.education", "!=", "t2.education"),
                ("t1.education_num", "==", "t2.education_num"),
            ],
            &[
                ("t1.education", "==", "t2.education"),
                ("t1.occupation", "!=", "t2.occupation"),
            ],
        ]);
        let row = adult_row();
        let graph = graph(&row, &constraints, "education");
        let target = Cell::new(Attribute::new("adult_data", "education"), 2, "Bachelors");
        let deleted = graph.optimal_delete(&target).unwrap();
        assert!(deleted.contains(&target));
        // target + the cheapest accomplice per hyperedge
        assert_eq!(deleted.len(), 3);
        // a subset of the cells reachable in the graph
        for cell in &deleted {
            assert!(graph.node_of(cell).is_some());
        }
    }

    #[test]
    fn test_optimal_delete_unknown_cell() {
        let constraints = constraint_set(&[&[
            ("t1.education", "!=", "t2.education"),
            ("t1.education_num", "==", "t2.education_num"),
        ]]);
        let graph = graph(&adult_row(), &constraints, "education");
        let stranger = Cell::new(Attribute::new("adult_data", "salary"), 2, 100);
        assert!(matches!(
            graph.optimal_delete(&stranger),
            Err(Error::UnknownCell(_))
        ));
    }

    #[test]
    fn test_missing_attribute_fails() {
        let constraints = constraint_set(&[&[
            ("t1.education", "!=", "t2.education"),
            ("t1.salary", "==", "t2.salary"),
        ]]);
        let builder = HyperedgeBuilder::new("adult_data", &constraints);
        let row = adult_row();
        let key = Value::from(2);
        let edges = builder.build_hyperedge_map(&row, &key, "education").unwrap();
        let result = HyperGraph::build("adult_data", &row, &key, "salary", &edges);
        assert!(matches!(result, Err(Error::MissingAttribute(_))));
    }
}
