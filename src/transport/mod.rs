//! Transport adapters
//!
//! Both transports resolve a session, hand the raw message to its dispatcher
//! under the request supervisor and write back the serialized response.

pub mod http;
pub mod stdio;
pub mod supervisor;

pub use http::{router, AppState, HttpServer, StatusDocument};
pub use stdio::StdioServer;
pub use supervisor::{RequestSupervisor, SupervisorStats};
