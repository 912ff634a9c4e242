use crate::{
    backend::BackendType,
    config::Config,
    types::{IndexSet, NodeId, ValueId},
};
use derive_more::Debug;
use std::collections::VecDeque;
use thiserror::Error;

/// Error returned by [`GraphBuilder::build`] when the declared graph is
/// invalid.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum GraphError {
    /// The graph contains cycle(s).
    #[error("graph contains cycle(s)")]
    Cycle,
    /// Two nodes declare the same output value.
    #[error("{value} is produced by both {first} and {second}")]
    ValueProducedTwice {
        /// The value.
        value: ValueId,
        /// Node declared first.
        first: NodeId,
        /// Node declared second.
        second: NodeId,
    },
    /// A node references a value that was not declared on this builder.
    #[error("{0} is not declared in this graph")]
    UnknownValue(ValueId),
}

/// An operator instance of a [`Graph`].
#[must_use]
#[derive(Debug)]
pub struct Node<C: Config> {
    id: NodeId,
    name: String,
    op_type: String,
    backend: BackendType,
    kernel: C::Kernel,
    inputs: Vec<ValueId>,
    outputs: Vec<ValueId>,
    /// Distinct producers of `inputs`, in first-use order.
    input_nodes: Vec<NodeId>,
    /// Distinct consumers of `outputs`, in topological order.
    output_nodes: Vec<NodeId>,
}

impl<C: Config> Node<C> {
    /// Id of the node.
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Name given at construction.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Operator type, e.g. `"MatMul"`.
    #[must_use]
    pub fn op_type(&self) -> &str {
        &self.op_type
    }

    /// Backend assigned to run the node.
    #[must_use]
    pub fn backend(&self) -> BackendType {
        self.backend
    }

    /// The node's compute entry point.
    #[must_use]
    pub fn kernel(&self) -> &C::Kernel {
        &self.kernel
    }

    /// Values read by the node, in kernel argument order.
    #[must_use]
    pub fn inputs(&self) -> &[ValueId] {
        &self.inputs
    }

    /// Values written by the node, in kernel argument order.
    #[must_use]
    pub fn outputs(&self) -> &[ValueId] {
        &self.outputs
    }

    /// Nodes producing this node's inputs.
    #[must_use]
    pub fn input_nodes(&self) -> &[NodeId] {
        &self.input_nodes
    }

    /// Nodes consuming this node's outputs.
    #[must_use]
    pub fn output_nodes(&self) -> &[NodeId] {
        &self.output_nodes
    }
}

#[derive(Debug, Clone)]
struct ValueInfo {
    name: String,
    producer: Option<NodeId>,
}

/// A validated computation graph in topological order.
#[must_use]
#[derive(Debug)]
pub struct Graph<C: Config> {
    nodes: Vec<Node<C>>,
    values: Vec<ValueInfo>,
    topological_order: Vec<NodeId>,
}

impl<C: Config> Graph<C> {
    /// Start declaring a graph.
    pub fn builder() -> GraphBuilder<C> {
        GraphBuilder::default()
    }

    /// Node with the given id.
    ///
    /// # Panics
    /// If `id` does not belong to this graph.
    pub fn node(&self, id: NodeId) -> &Node<C> {
        &self.nodes[id.0]
    }

    /// Nodes in insertion order.
    #[must_use]
    pub fn nodes(&self) -> &[Node<C>] {
        &self.nodes
    }

    /// Number of nodes.
    #[must_use]
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Number of values.
    #[must_use]
    pub fn num_values(&self) -> usize {
        self.values.len()
    }

    /// Node ids ordered so that every producer precedes its consumers.
    #[must_use]
    pub fn topological_order(&self) -> &[NodeId] {
        &self.topological_order
    }

    /// Name of a value, if it belongs to this graph.
    #[must_use]
    pub fn value_name(&self, id: ValueId) -> Option<&str> {
        self.values.get(id.0).map(|info| info.name.as_str())
    }

    /// Node producing a value. `None` for graph inputs and unknown ids.
    #[must_use]
    pub fn producer(&self, id: ValueId) -> Option<NodeId> {
        self.values.get(id.0).and_then(|info| info.producer)
    }

    /// Whether `id` is a value of this graph.
    #[must_use]
    pub fn contains_value(&self, id: ValueId) -> bool {
        id.0 < self.values.len()
    }

    /// Values no node produces. They must be fed on every run.
    pub fn graph_inputs(&self) -> impl Iterator<Item = ValueId> + '_ {
        self.values
            .iter()
            .enumerate()
            .filter(|(_, info)| info.producer.is_none())
            .map(|(idx, _)| ValueId(idx))
    }
}

/// Incremental declaration of a [`Graph`].
#[must_use]
#[derive(Debug)]
pub struct GraphBuilder<C: Config> {
    values: IndexSet<String>,
    nodes: Vec<NodeDecl<C>>,
}

#[derive(Debug)]
struct NodeDecl<C: Config> {
    name: String,
    op_type: String,
    backend: BackendType,
    #[debug(skip)]
    kernel: C::Kernel,
    inputs: Vec<ValueId>,
    outputs: Vec<ValueId>,
}

impl<C: Config> Default for GraphBuilder<C> {
    fn default() -> Self {
        Self {
            values: IndexSet::default(),
            nodes: Vec::new(),
        }
    }
}

impl<C: Config> GraphBuilder<C> {
    /// Id of the value named `name`, declaring it on first use.
    pub fn value(&mut self, name: &str) -> ValueId {
        if let Some(idx) = self.values.get_index_of(name) {
            return ValueId(idx);
        }
        let (idx, _) = self.values.insert_full(name.to_owned());
        ValueId(idx)
    }

    /// Declare a node reading `inputs` and writing `outputs`.
    pub fn add_node(
        &mut self,
        name: impl Into<String>,
        op_type: impl Into<String>,
        backend: BackendType,
        kernel: C::Kernel,
        inputs: &[ValueId],
        outputs: &[ValueId],
    ) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(NodeDecl {
            name: name.into(),
            op_type: op_type.into(),
            backend,
            kernel,
            inputs: inputs.to_vec(),
            outputs: outputs.to_vec(),
        });
        id
    }

    /// Validate the declarations and order the nodes topologically.
    ///
    /// Nodes with no pending producers are emitted in insertion order (Kahn's
    /// algorithm with a FIFO worklist), so the order is stable for a given
    /// sequence of declarations.
    ///
    /// # Errors
    /// - [`GraphError::UnknownValue`] for a value id not issued by this
    ///   builder,
    /// - [`GraphError::ValueProducedTwice`] when two nodes write one value,
    /// - [`GraphError::Cycle`] when no topological order exists.
    pub fn build(self) -> Result<Graph<C>, GraphError> {
        let Self { values, nodes: decls } = self;
        let num_values = values.len();

        // Phase 1: resolve the producer of every value.
        let mut values: Vec<ValueInfo> = values
            .into_iter()
            .map(|name| ValueInfo {
                name,
                producer: None,
            })
            .collect();
        for (idx, decl) in decls.iter().enumerate() {
            let node = NodeId(idx);
            for &value in decl.inputs.iter().chain(&decl.outputs) {
                if value.0 >= num_values {
                    return Err(GraphError::UnknownValue(value));
                }
            }
            for &value in &decl.outputs {
                let info = &mut values[value.0];
                if let Some(first) = info.producer.filter(|&first| first != node) {
                    return Err(GraphError::ValueProducedTwice {
                        value,
                        first,
                        second: node,
                    });
                }
                info.producer = Some(node);
            }
        }

        // Phase 2: derive deduplicated producer -> consumer edges.
        let input_nodes: Vec<IndexSet<NodeId>> = decls
            .iter()
            .map(|decl| {
                decl.inputs
                    .iter()
                    .filter_map(|value| values[value.0].producer)
                    .collect()
            })
            .collect();
        let mut children: Vec<IndexSet<NodeId>> = vec![IndexSet::default(); decls.len()];
        for (idx, parents) in input_nodes.iter().enumerate() {
            for parent in parents {
                if parent.0 == idx {
                    // A node reading its own output can never become ready.
                    return Err(GraphError::Cycle);
                }
                children[parent.0].insert(NodeId(idx));
            }
        }

        // Phase 3: Kahn's algorithm over in-degrees.
        let mut parents_left: Vec<usize> = input_nodes.iter().map(IndexSet::len).collect();
        let mut ready: VecDeque<NodeId> = parents_left
            .iter()
            .enumerate()
            .filter(|&(_, &left)| left == 0)
            .map(|(idx, _)| NodeId(idx))
            .collect();
        let mut topological_order = Vec::with_capacity(decls.len());
        while let Some(node) = ready.pop_front() {
            topological_order.push(node);
            for child in &children[node.0] {
                let left = &mut parents_left[child.0];
                *left = left.checked_sub(1).expect("GraphBuilder::build: [1]");
                if *left == 0 {
                    ready.push_back(*child);
                }
            }
        }
        if topological_order.len() != decls.len() {
            return Err(GraphError::Cycle);
        }

        // Phase 4: order each node's consumers topologically.
        let mut position = vec![0; decls.len()];
        for (pos, id) in topological_order.iter().enumerate() {
            position[id.0] = pos;
        }
        let nodes = decls
            .into_iter()
            .zip(input_nodes)
            .zip(children)
            .enumerate()
            .map(|(idx, ((decl, input_nodes), children))| {
                let mut output_nodes: Vec<NodeId> = children.into_iter().collect();
                output_nodes.sort_unstable_by_key(|child| position[child.0]);
                Node {
                    id: NodeId(idx),
                    name: decl.name,
                    op_type: decl.op_type,
                    backend: decl.backend,
                    kernel: decl.kernel,
                    inputs: decl.inputs,
                    outputs: decl.outputs,
                    input_nodes: input_nodes.into_iter().collect(),
                    output_nodes,
                }
            })
            .collect();

        Ok(Graph {
            nodes,
            values,
            topological_order,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use derive_more::Debug;
    use crate::kernel::{Kernel, KernelContext, KernelError};

    #[derive(Debug)]
    struct Noop;

    #[derive(Debug)]
    struct TestConfig;

    impl Config for TestConfig {
        type Value = ();
        type Kernel = Noop;
    }

    impl Kernel<TestConfig> for Noop {
        fn compute(&self, _ctx: &mut KernelContext<'_, TestConfig>) -> Result<(), KernelError> {
            Ok(())
        }
    }

    fn add(
        builder: &mut GraphBuilder<TestConfig>,
        name: &str,
        inputs: &[ValueId],
        outputs: &[ValueId],
    ) -> NodeId {
        builder.add_node(name, "Noop", BackendType::Cpu, Noop, inputs, outputs)
    }

    #[test]
    fn orders_shuffled_declarations() {
        // Declared as D, C, A, B for the graph A -> C <- B, C -> D.
        let mut builder = Graph::<TestConfig>::builder();
        let (a, b, c, d) = (
            builder.value("a"),
            builder.value("b"),
            builder.value("c"),
            builder.value("d"),
        );
        let x = builder.value("x");
        let node_d = add(&mut builder, "D", &[c], &[d]);
        let node_c = add(&mut builder, "C", &[a, b], &[c]);
        let node_a = add(&mut builder, "A", &[x], &[a]);
        let node_b = add(&mut builder, "B", &[x], &[b]);
        let graph = builder.build().unwrap();

        assert_eq!(graph.topological_order(), [node_a, node_b, node_c, node_d]);
        assert_eq!(graph.node(node_c).input_nodes(), [node_a, node_b]);
        assert_eq!(graph.node(node_a).output_nodes(), [node_c]);
        assert_eq!(graph.graph_inputs().collect::<Vec<_>>(), [x]);
        assert_eq!(graph.producer(d), Some(node_d));
        assert_eq!(graph.value_name(x), Some("x"));
    }

    #[test]
    fn deduplicates_edges() {
        let mut builder = Graph::<TestConfig>::builder();
        let (x, y0, y1, z) = (
            builder.value("x"),
            builder.value("y0"),
            builder.value("y1"),
            builder.value("z"),
        );
        let split = add(&mut builder, "split", &[x], &[y0, y1]);
        let join = add(&mut builder, "join", &[y0, y1, y0], &[z]);
        let graph = builder.build().unwrap();
        assert_eq!(graph.node(join).input_nodes(), [split]);
        assert_eq!(graph.node(split).output_nodes(), [join]);
    }

    #[test]
    fn detects_cycles() {
        let mut builder = Graph::<TestConfig>::builder();
        let (a, b) = (builder.value("a"), builder.value("b"));
        add(&mut builder, "A", &[b], &[a]);
        add(&mut builder, "B", &[a], &[b]);
        assert_eq!(builder.build().unwrap_err(), GraphError::Cycle);

        let mut builder = Graph::<TestConfig>::builder();
        let a = builder.value("a");
        add(&mut builder, "self", &[a], &[a]);
        assert_eq!(builder.build().unwrap_err(), GraphError::Cycle);
    }

    #[test]
    fn rejects_second_producer() {
        let mut builder = Graph::<TestConfig>::builder();
        let a = builder.value("a");
        let first = add(&mut builder, "A0", &[], &[a]);
        let second = add(&mut builder, "A1", &[], &[a]);
        assert_eq!(
            builder.build().unwrap_err(),
            GraphError::ValueProducedTwice {
                value: a,
                first,
                second
            }
        );
    }

    #[test]
    fn rejects_foreign_values() {
        let mut builder = Graph::<TestConfig>::builder();
        add(&mut builder, "A", &[ValueId(3)], &[]);
        assert_eq!(
            builder.build().unwrap_err(),
            GraphError::UnknownValue(ValueId(3))
        );
    }
}
