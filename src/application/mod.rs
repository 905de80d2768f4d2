// Application layer - use cases and orchestration over the storage stores.

pub mod context;
pub mod service;

pub use context::*;
pub use service::*;

pub use crate::error::{LedgerError, ValidationError};
