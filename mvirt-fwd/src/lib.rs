//! User-space router data plane core.
//!
//! Longest-prefix-match FIBs and neighbor caches written by a single control
//! thread and read lock-free by packet workers running the forwarding pipeline.

pub mod config;
pub mod control;
pub mod error;
pub mod family;
pub mod fib;
pub mod hash;
pub mod neighbor;
pub mod packet;
pub mod pipeline;
pub mod port;
pub mod router;
pub mod trie;
pub mod worker;

pub use config::{PortConfig, RouterConfig};
pub use control::{
    Applied, ControlEvent, ControlHandle, ControlSync, EventOp, NeighborEvent, RouteEvent,
    RouteTable,
};
pub use error::{ErrorClass, FwdError, Result};
pub use family::{AddressFamily, MacAddr};
pub use fib::{Fib, FibReader, RouteEntry, RouteType};
pub use neighbor::{NeighborCache, NeighborReader, PortNeighbors};
pub use pipeline::{Decision, ForwardingPipeline};
pub use router::{Router, RouterReport};
pub use worker::{ChannelBackend, Frame, RecvResult, WorkerBackend, WorkerPool, WorkerStats};
