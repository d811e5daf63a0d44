//! churnd: the async side of the chaos agent.

pub mod adapter;
pub mod ingest;
pub mod presence;
pub mod runtime;
pub mod scheduler;
pub mod service;
pub mod sink;

pub use adapter::*;
pub use ingest::*;
pub use presence::*;
pub use runtime::*;
pub use scheduler::*;
pub use service::*;
pub use sink::*;
