//! Defines the core data structures for the program DAG.
pub mod dag;
pub mod node;

// Re-export key types for convenient access
pub use dag::{GraphError, ProgramDag};
pub use node::{ConditionalExpression, ExpressionKind, LoopExpression, NodeId, ProgramNode};
