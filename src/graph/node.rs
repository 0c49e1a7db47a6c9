//! node.rs
//! Node model for contract programs: stable identifiers, the expression
//! sum type, and the structural metadata carried by each vertex.

use crate::program::ContractProgram;

/// A unique, stable identifier for a node.
///
/// Identifiers are drawn from one global space shared by a program and every
/// subprogram nested under it, so allocation vectors and profile records can
/// be indexed by id regardless of which DAG a node currently sits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct NodeId(pub u32);

impl NodeId {
    #[inline(always)]
    pub fn index(&self) -> usize {
        self.0 as usize
    }

    #[inline(always)]
    pub fn new(idx: usize) -> Self {
        Self(idx as u32)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The two branch subprograms owned by a conditional node.
///
/// Each branch is a complete `ContractProgram` with its own DAG, budget and
/// allocation vector. Branch member nodes keep their global ids, which is
/// what lets a flat conditional (single-node branches allocated in the outer
/// vector) and a deep one (members marked `in_subtree`) share one evaluator.
#[derive(Debug, Clone)]
pub struct ConditionalExpression {
    pub on_true: Box<ContractProgram>,
    pub on_false: Box<ContractProgram>,
}

/// The body subprogram owned by a bounded for-loop node.
#[derive(Debug, Clone)]
pub struct LoopExpression {
    /// Fixed iteration bound. The body DAG is already unrolled across it,
    /// so evaluating the body covers the whole loop.
    pub iterations: u32,
    pub body: Box<ContractProgram>,
}

/// The closed set of node behaviors.
///
/// Conditionals and loops own their subprograms directly; there is no
/// parent/child program pointer anywhere else in the crate.
#[derive(Debug, Clone)]
pub enum ExpressionKind {
    /// An ordinary anytime algorithm with a performance profile.
    Contract,
    Conditional(ConditionalExpression),
    Loop(LoopExpression),
}

impl ExpressionKind {
    /// Dispatch nodes route execution into owned subprograms. Every
    /// initializer pre-charges them the fixed overhead tau.
    #[inline(always)]
    pub fn is_dispatch(&self) -> bool {
        !matches!(self, ExpressionKind::Contract)
    }

    pub fn label(&self) -> &'static str {
        match self {
            ExpressionKind::Contract => "contract",
            ExpressionKind::Conditional(_) => "conditional",
            ExpressionKind::Loop(_) => "loop",
        }
    }

    /// Whether `id` names a node inside one of this expression's subprograms.
    pub fn owns_member(&self, id: NodeId) -> bool {
        match self {
            ExpressionKind::Contract => false,
            ExpressionKind::Conditional(expr) => {
                expr.on_true.contains_node(id) || expr.on_false.contains_node(id)
            }
            ExpressionKind::Loop(expr) => expr.body.contains_node(id),
        }
    }

    /// The owned subprograms, in branch order (true, false) for conditionals.
    pub fn subprograms(&self) -> Vec<&ContractProgram> {
        match self {
            ExpressionKind::Contract => Vec::new(),
            ExpressionKind::Conditional(expr) => vec![&expr.on_true, &expr.on_false],
            ExpressionKind::Loop(expr) => vec![&expr.body],
        }
    }
}

/// A single vertex of a program DAG.
///
/// Nodes are immutable after construction: evaluation state (visited marks,
/// realized qualities) always lives in call-local structures, never here.
#[derive(Debug, Clone)]
pub struct ProgramNode {
    pub id: NodeId,
    /// Dependency edges run parent -> child toward the single root, in the
    /// order the profile conditions on them.
    pub parents: Vec<NodeId>,
    /// Derived from the member parent lists by `ProgramDag::new`.
    pub children: Vec<NodeId>,
    pub kind: ExpressionKind,
    /// Member of an enclosing subprogram. Such nodes stay in the outer node
    /// list so vectors remain id-aligned, but they are never independently
    /// allocated there.
    pub in_subtree: bool,
    /// Marks the first node of the first unrolled loop iteration; later
    /// iteration copies reuse this node's profile velocity instead of
    /// drawing a fresh one.
    pub first_loop_iteration: bool,
}

impl ProgramNode {
    pub fn contract(id: NodeId, parents: Vec<NodeId>) -> Self {
        Self {
            id,
            parents,
            children: Vec::new(),
            kind: ExpressionKind::Contract,
            in_subtree: false,
            first_loop_iteration: false,
        }
    }

    pub fn conditional(id: NodeId, parents: Vec<NodeId>, expr: ConditionalExpression) -> Self {
        Self {
            id,
            parents,
            children: Vec::new(),
            kind: ExpressionKind::Conditional(expr),
            in_subtree: false,
            first_loop_iteration: false,
        }
    }

    pub fn bounded_loop(id: NodeId, parents: Vec<NodeId>, expr: LoopExpression) -> Self {
        Self {
            id,
            parents,
            children: Vec::new(),
            kind: ExpressionKind::Loop(expr),
            in_subtree: false,
            first_loop_iteration: false,
        }
    }

    #[inline(always)]
    pub fn is_dispatch(&self) -> bool {
        self.kind.is_dispatch()
    }
}
