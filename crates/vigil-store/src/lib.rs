//! # vigil-store
//!
//! Entity persistence for the vigil compliance backend.
//!
//! - **Codecs**: [`CodecRegistry`] converts durations, timestamps, open JSON
//!   values, and typed `any` payloads to and from flat columns
//! - **Error taxonomy**: driver failures are classified by structured code
//!   (SQLite extended result codes, `PostgreSQL` SQLSTATE) into
//!   [`StoreError`] variants callers can match on
//! - **Conditions**: explicit [`Condition`] variants instead of positional
//!   argument lists; [`Preload`] is named on every read
//! - **Join tables**: [`JoinTable`] links an owner's association field to an
//!   attribute-carrying link table
//! - **Connection manager**: [`ConnectionManager`] stages configuration,
//!   connection, and additive migration; [`StoreBuilder`] runs them all
//! - **Backends**: an ephemeral, uniquely named in-process `SQLite`
//!   database (one connection), and `PostgreSQL` behind the `postgres`
//!   feature
//!
//! ```no_run
//! use vigil_store::{Condition, Database, Preload, StoreConfig};
//! # use vigil_store::{Entity, Record, Schema};
//! # struct Widget;
//! # impl Entity for Widget {
//! #     fn schema() -> &'static Schema { unimplemented!() }
//! #     fn to_record(&self) -> Record { unimplemented!() }
//! #     fn from_record(_: Record) -> vigil_store::Result<Self> { unimplemented!() }
//! # }
//!
//! let store = vigil_store::Store::builder(StoreConfig::ephemeral())
//!     .entity::<Widget>()
//!     .build()?;
//! let widget: Widget = store.get(&Condition::by_key("w1"), &Preload::None)?;
//! # Ok::<(), vigil_store::StoreError>(())
//! ```

#![deny(unsafe_code)]

mod backend;
pub mod classify;
pub mod codec;
pub mod condition;
pub mod dialect;
pub mod errors;
pub mod join;
pub mod manager;
mod mapping;
pub mod migrate;
pub mod schema;
pub mod store;
pub mod testing;
pub mod value;

pub use backend::Rows;
pub use classify::{BackendError, DriverCode, ErrorKind, classify};
pub use codec::{Codec, CodecError, CodecRegistry};
pub use condition::{Condition, ListOptions, Preload};
pub use dialect::Dialect;
pub use errors::{Result, StoreError};
pub use join::{JoinRegistry, JoinTable};
pub use manager::{
    BackendTarget, ConnectionManager, NetworkTarget, SslMode, Stage, StoreBuilder, StoreConfig,
};
pub use migrate::MigrationReport;
pub use schema::{Column, ColumnKind, Entity, Record, Reference, Schema, SqlType};
pub use store::{Database, Operation, Store};
pub use value::{AnyPayload, FieldValue, SqlValue};
