pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod indexing;
pub mod lock;
pub mod log;
pub mod scan;
pub mod store;
pub mod tx;

pub use crate::config::Config;
pub use crate::engine::Engine;
pub use crate::error::{GraphError, Result};
pub use crate::store::props::PropertyValue;
pub use crate::store::records::{NodeId, PropId, RelId, TokenId, TxId, NO_PROP, NO_REL};
pub use crate::store::schema::SchemaRule;
pub use crate::tx::{CountDirection, WriteTransaction};
