pub mod builder;
pub mod model;

pub use builder::build_interaction_graph;
pub use model::{EdgeType, GraphEdge, GraphNode, InteractionGraph, NodeType};
