//! Core types for coio database drivers.
//!
//! This crate holds the host-neutral pieces every driver shares:
//!
//! - [`Value`] and [`Param`] for column values and statement parameters
//! - [`Row`] and [`ResultSet`] with their keying and NULL modes
//! - [`Error`] and its classification helpers
//! - `Outcome` and `Cx` re-exported from asupersync for cancel-correct operations

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Cx, Outcome};

pub mod error;
pub mod row;
pub mod value;

pub use error::{
    AllocationError, ConfigError, ConnectionError, ConnectionErrorKind, Error, ProtocolError,
    QueryError, Result, UsageError,
};
pub use row::{ColumnInfo, Key, NullMode, ResultSet, Row, RowShape};
pub use value::{Param, Value};
