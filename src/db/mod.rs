//! The database access core (spec §2): wire codec, result parser,
//! connection worker, pool manager, and the service facade on top of them.

pub mod parser;
pub mod pool;
pub mod service;
pub mod wire;
pub mod worker;

pub use parser::{ColumnDescriptor, QueryResult, Row, Value};
pub use worker::WorkerHandle;
