//! rtpf - pattern-fragment query engine over an integer-indexed biomedical
//! knowledge graph.
//!
//! - `closure`: type and predicate/qualifier descendant closures
//! - `loader`: KGX JSON lines -> integer-keyed adjacency index
//! - `query`: one-hop pattern queries against that index
//! - `handler`: query-graph requests -> executor calls -> result message

pub mod closure;
pub mod config;
pub mod error;
pub mod handler;
pub mod loader;
pub mod metrics;
pub mod protocol;
pub mod query;
pub mod record;
pub mod signature;
pub mod store;
pub mod taxonomy;
pub mod trapi;

pub use closure::{redundantize, ClosureEngine, ClosureSnapshot, QualifierLattice};
pub use error::{PfError, Result};
pub use handler::{AppContext, RequestHandler};
pub use loader::{IndexBuilder, LoadStats};
pub use query::{InputRole, QueryExecutor, QueryResult};
pub use signature::{query_pattern, Signature};
pub use store::{Keyspace, KvStore, MemoryStore, RedisStore, WriteBatch};
pub use taxonomy::{BiolinkModel, Taxonomy};
