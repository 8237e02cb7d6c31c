pub mod node_graph;
pub mod nodes;
pub mod snapshot;
pub mod store;

pub use node_graph::{FastHashMap, NodeGraph};
pub use nodes::{EndpointNode, FactoryNode, NodeId, PriceState, SwapHistory, TokenDraft, TokenNode};
pub use snapshot::{NodeRecord, Snapshot, rebuild_graph};
pub use store::{NodeStore, Registered};
