//! # Tessera — an immutable, content-addressed graph ledger
//!
//! Tessera stores RDF-style assertions ("flakes") across time. Writes
//! append signed-shape, hash-linked commits to pluggable content-addressed
//! storage; reads run against immutable snapshot values that resolve
//! persistent index nodes on demand through a shared cache.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use tessera::connection::{Connection, ConnectionConfig, ConnectionOptions};
//! use tessera::db::IndexingOptions;
//! use tessera::ledger::CommitOpts;
//! use tessera::nameservice::memory::MemoryNameService;
//! use tessera::storage::{memory::MemoryStore, Catalog};
//! use tessera::transact::{ObjectSpec, TxOp};
//! use tessera::flake::FlakeValue;
//!
//! # async fn demo() -> tessera::Result<()> {
//! let ns = Arc::new(MemoryNameService::new());
//! let conn = Connection::connect(ConnectionConfig {
//!     catalog: Arc::new(Catalog::new(Arc::new(MemoryStore::new()))),
//!     primary_publisher: ns.clone(),
//!     secondary_publishers: vec![],
//!     publications: vec![ns],
//!     options: ConnectionOptions::default(),
//!     indexing: IndexingOptions::default(),
//! });
//!
//! let ledger = conn.create_ledger("alice/main").await?;
//! let db = ledger.current_db()?.db().await?;
//! let staged = db.stage(&[TxOp::Assert {
//!     s: "ex:a".to_string(),
//!     p: "ex:p".to_string(),
//!     o: ObjectSpec::Value(FlakeValue::Int(1)),
//! }])?;
//! let db = ledger.commit(staged, CommitOpts::default()).await?;
//! assert_eq!(db.t, -1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **Flake layer**: the immutable 6-tuple, five cascaded orderings, and
//!   sorted runs ([`flake`]).
//! - **Index engine**: novelty buffers compacted into persistent
//!   content-addressed trees by an async indexer, with garbage collection
//!   of superseded roots ([`index`]).
//! - **Commit chain**: hash-linked commits in canonical JSON-LD
//!   ([`commit`]).
//! - **DB values**: immutable snapshots, deferred handles, time travel
//!   ([`db`]).
//! - **Ledger & branches**: the update protocols tying commits, indexes,
//!   and publication together ([`ledger`]).
//! - **Connection**: the keyed ledger cache with subscription fan-in and
//!   idle eviction ([`connection`]).

pub mod commit;
pub mod connection;
pub mod db;
pub mod error;
pub mod flake;
pub mod index;
pub mod ledger;
pub mod logging;
pub mod nameservice;
pub mod primitives;
pub mod storage;
pub mod transact;

pub use crate::db::async_db::{AsyncDb, DbHandle};
pub use crate::db::{Db, IndexingOptions};
pub use crate::error::{LedgerError, Result};
pub use crate::flake::{Flake, FlakeValue, Sid};
