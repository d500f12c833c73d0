//! Per-transaction tree of call frames.

use serde::Serialize;

use crate::opcodes::CallType;

/// One call frame of a transaction.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct CallNode {
    pub call_type: CallType,
    /// Context of the frame that opened this one. Equal to `context` for the
    /// transaction frame.
    pub caller_context: u64,
    pub context: u64,
    pub depth: u64,
    /// Gas available when the frame was entered.
    pub gas: u64,
    /// Gas consumed by the frame, children included.
    pub gas_used: u64,
    /// Part of `gas_used` consumed by the children.
    pub subcalls_gas_used: u64,
    /// Index, in the batch execution trace, of the first step of the frame.
    pub first_step: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Indices of the child frames, in execution order.
    pub children: Vec<usize>,
    /// Gas left after the last priced step of the frame.
    #[serde(skip)]
    pub(crate) gas_left: u64,
    /// Step of the frame whose cost is only known once the next step of the
    /// frame shows up.
    #[serde(skip)]
    pub(crate) unpriced_step: Option<usize>,
}

impl CallNode {
    fn new(
        call_type: CallType,
        caller_context: u64,
        context: u64,
        depth: u64,
        gas: u64,
        first_step: usize,
    ) -> Self {
        Self {
            call_type,
            caller_context,
            context,
            depth,
            gas,
            gas_used: 0,
            subcalls_gas_used: 0,
            first_step,
            error: None,
            children: vec![],
            gas_left: gas,
            unpriced_step: None,
        }
    }
}

/// Arena of the call frames of one transaction. Node `0` is the transaction
/// frame.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct CallTree {
    nodes: Vec<CallNode>,
    #[serde(skip)]
    open: Vec<usize>,
}

impl CallTree {
    /// Creates a tree holding only the transaction frame.
    pub fn new(call_type: CallType, context: u64, gas: u64, first_step: usize) -> Self {
        Self {
            nodes: vec![CallNode::new(call_type, context, context, 1, gas, first_step)],
            open: vec![0],
        }
    }

    pub fn root(&self) -> Option<&CallNode> {
        self.nodes.first()
    }

    pub fn nodes(&self) -> &[CallNode] {
        &self.nodes
    }

    pub fn children(&self, node: usize) -> impl Iterator<Item = &CallNode> {
        self.nodes
            .get(node)
            .into_iter()
            .flat_map(|node| node.children.iter().map(|&child| &self.nodes[child]))
    }

    /// Number of frames currently open, the transaction frame included.
    pub fn open_frames(&self) -> usize {
        self.open.len()
    }

    pub fn current(&self) -> Option<&CallNode> {
        self.open.last().map(|&i| &self.nodes[i])
    }

    pub(crate) fn current_mut(&mut self) -> Option<&mut CallNode> {
        self.open.last().map(|&i| &mut self.nodes[i])
    }

    /// Open a child of the current frame and make it current.
    pub(crate) fn enter(
        &mut self,
        call_type: CallType,
        context: u64,
        depth: u64,
        gas: u64,
        first_step: usize,
    ) -> usize {
        let index = self.nodes.len();
        let caller_context = match self.open.last() {
            Some(&parent) => {
                self.nodes[parent].children.push(index);
                self.nodes[parent].context
            }
            None => context,
        };
        self.nodes.push(CallNode::new(
            call_type,
            caller_context,
            context,
            depth,
            gas,
            first_step,
        ));
        self.open.push(index);
        index
    }

    /// Close the current frame and add its consumption to its parent. The
    /// transaction frame is never closed here.
    pub(crate) fn exit(&mut self) -> Option<&CallNode> {
        if self.open.len() <= 1 {
            return None;
        }
        let closed = self.open.pop()?;
        let gas_used = {
            let node = &mut self.nodes[closed];
            node.gas_used = node.gas.saturating_sub(node.gas_left);
            node.gas_used
        };
        if let Some(&parent) = self.open.last() {
            self.nodes[parent].subcalls_gas_used += gas_used;
        }
        Some(&self.nodes[closed])
    }

    /// Close every frame still open, the transaction frame last, whose gas
    /// used is set to the transaction's.
    pub(crate) fn finish(&mut self, gas_left: u64, gas_used: u64) {
        while self.exit().is_some() {}
        if let Some(root) = self.nodes.first_mut() {
            root.gas_left = gas_left;
            root.gas_used = gas_used;
        }
        self.open.clear();
    }
}
