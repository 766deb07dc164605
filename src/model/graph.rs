//! The model DAG.
//!
//! Nodes carry named input ports linked to upstream outputs. Begin feeds
//! the sample position in, End receives the shape value. `simplify` drops
//! every node End cannot reach through its inputs; the command-stream
//! lowering walks the surviving graph in dependency order and emits the
//! tape the kernels interpret.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::kernel::types::{Command, CommandKind};

pub type NodeId = u32;

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Graph entry; outputs the sample position.
    Begin,
    /// Graph exit; input "shape" is the model value.
    End,
    ConstantScalar(f32),
    ConstantVector([f32; 3]),
    Addition,
    Subtraction,
    Multiplication,
    Length,
    Min,
    Max,
    /// Reference into the primitive payload.
    Resource(u32),
    Transformation,
}

impl NodeKind {
    fn command_kind(&self) -> CommandKind {
        match self {
            NodeKind::Begin | NodeKind::End => CommandKind::End,
            NodeKind::ConstantScalar(_) => CommandKind::ConstantScalar,
            NodeKind::ConstantVector(_) => CommandKind::ConstantVector,
            NodeKind::Addition => CommandKind::AdditionScalar,
            NodeKind::Subtraction => CommandKind::SubtractionScalar,
            NodeKind::Multiplication => CommandKind::MultiplicationScalar,
            NodeKind::Length => CommandKind::Length,
            NodeKind::Min => CommandKind::MinScalar,
            NodeKind::Max => CommandKind::MaxScalar,
            NodeKind::Resource(_) => CommandKind::Resource,
            NodeKind::Transformation => CommandKind::Transformation,
        }
    }
}

/// Reference to an upstream node output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Source {
    pub node: NodeId,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    /// Input port name -> upstream node.
    pub inputs: BTreeMap<String, Source>,
}

#[derive(Debug, Default)]
pub struct Model {
    nodes: HashMap<NodeId, Node>,
    next_id: NodeId,
    begin: Option<NodeId>,
    end: Option<NodeId>,
}

impl Model {
    /// Fresh graph with Begin and End already present.
    pub fn new() -> Self {
        let mut model = Self::default();
        let begin = model.add_node(NodeKind::Begin);
        let end = model.add_node(NodeKind::End);
        model.begin = Some(begin);
        model.end = Some(end);
        model
    }

    pub fn add_node(&mut self, kind: NodeKind) -> NodeId {
        let id = self.next_id;
        self.next_id += 1;
        self.nodes.insert(
            id,
            Node {
                id,
                kind,
                inputs: BTreeMap::new(),
            },
        );
        id
    }

    pub fn begin_id(&self) -> NodeId {
        self.begin.expect("model has a Begin node")
    }

    pub fn end_id(&self) -> NodeId {
        self.end.expect("model has an End node")
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Link `from`'s output into `to`'s input port `port`.
    pub fn connect(&mut self, from: NodeId, to: NodeId, port: &str) -> bool {
        if !self.nodes.contains_key(&from) {
            return false;
        }
        match self.nodes.get_mut(&to) {
            Some(node) => {
                node.inputs.insert(port.to_string(), Source { node: from });
                true
            }
            None => false,
        }
    }

    fn reachable_from_end(&self) -> HashSet<NodeId> {
        let mut visited = HashSet::new();
        let mut stack = vec![self.end_id()];
        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            if let Some(node) = self.nodes.get(&id) {
                for source in node.inputs.values() {
                    stack.push(source.node);
                }
            }
        }
        visited
    }

    /// Remove every node End cannot reach through input links. Begin and
    /// End survive regardless. Returns the number of removed nodes.
    pub fn simplify(&mut self) -> usize {
        let mut keep = self.reachable_from_end();
        keep.insert(self.begin_id());
        keep.insert(self.end_id());

        let before = self.nodes.len();
        self.nodes.retain(|id, _| keep.contains(id));
        let removed = before - self.nodes.len();
        if removed > 0 {
            log::debug!("model simplification removed {removed} disconnected nodes");
        }
        removed
    }

    /// Lower the graph into the command tape: dependency order, one output
    /// register per node, End terminates the tape.
    pub fn to_commands(&self) -> Vec<Command> {
        let mut ordered = Vec::new();
        let mut visited = HashSet::new();
        self.post_order(self.end_id(), &mut visited, &mut ordered);

        let mut register_of: HashMap<NodeId, i32> = HashMap::new();
        let mut commands = Vec::new();

        for id in ordered {
            let node = &self.nodes[&id];
            let register = register_of.len() as i32;
            register_of.insert(id, register);

            let mut command = Command::new(node.kind.command_kind(), id as i32);
            command.output[0] = register;
            for (slot, source) in node.inputs.values().enumerate().take(command.args.len()) {
                command.args[slot] = register_of
                    .get(&source.node)
                    .copied()
                    .unwrap_or(-1);
            }
            match &node.kind {
                NodeKind::Begin => continue,
                NodeKind::ConstantScalar(v) => command.args[0] = v.to_bits() as i32,
                NodeKind::ConstantVector(v) => {
                    for (slot, component) in v.iter().enumerate() {
                        command.args[slot] = component.to_bits() as i32;
                    }
                }
                NodeKind::Resource(resource_id) => command.args[0] = *resource_id as i32,
                _ => {}
            }
            commands.push(command);
        }

        // End terminates the tape.
        if let Some(last) = commands.last_mut() {
            if last.id == self.end_id() as i32 {
                last.kind = CommandKind::End as i32;
            }
        }
        commands
    }

    fn post_order(&self, id: NodeId, visited: &mut HashSet<NodeId>, out: &mut Vec<NodeId>) {
        if !visited.insert(id) {
            return;
        }
        if let Some(node) = self.nodes.get(&id) {
            for source in node.inputs.values() {
                self.post_order(source.node, visited, out);
            }
            out.push(id);
        }
    }
}
