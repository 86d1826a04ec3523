//! Test helpers for code built on the store.
//!
//! Not gated on `cfg(test)` so downstream crates can use them from their own
//! tests.

use std::fmt;

use crate::condition::{Condition, ListOptions, Preload};
use crate::errors::{Result, StoreError};
use crate::manager::{StoreBuilder, StoreConfig};
use crate::schema::{Entity, Record};
use crate::store::{Database, Operation, Store};
use crate::value::SqlValue;

/// Build a fresh ephemeral store, letting `configure` register entities,
/// joins, codecs, and init callbacks.
pub fn new_in_memory_store(configure: impl FnOnce(StoreBuilder) -> StoreBuilder) -> Result<Store> {
    configure(Store::builder(StoreConfig::ephemeral())).build()
}

/// A [`Database`] that fails one operation with an injected error and
/// passes every other call through.
pub struct FaultyStore<D> {
    inner: D,
    fail_on: Operation,
    make_error: Box<dyn Fn() -> StoreError + Send + Sync>,
}

impl<D> fmt::Debug for FaultyStore<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaultyStore")
            .field("fail_on", &self.fail_on)
            .finish_non_exhaustive()
    }
}

impl<D: Database> FaultyStore<D> {
    /// Wrap `inner`, failing every `fail_on` call with `make_error()`.
    pub fn new(
        inner: D,
        fail_on: Operation,
        make_error: impl Fn() -> StoreError + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner,
            fail_on,
            make_error: Box::new(make_error),
        }
    }

    /// The wrapped database.
    pub fn inner(&self) -> &D {
        &self.inner
    }

    fn check(&self, op: Operation) -> Result<()> {
        if op == self.fail_on {
            Err((self.make_error)())
        } else {
            Ok(())
        }
    }
}

impl<D: Database> Database for FaultyStore<D> {
    fn create<E: Entity>(&self, entity: &mut E) -> Result<()> {
        self.check(Operation::Create)?;
        self.inner.create(entity)
    }

    fn save<E: Entity>(&self, entity: &mut E, condition: &Condition) -> Result<()> {
        self.check(Operation::Save)?;
        self.inner.save(entity, condition)
    }

    fn update<E: Entity>(&self, entity: &E, condition: &Condition) -> Result<()> {
        self.check(Operation::Update)?;
        self.inner.update(entity, condition)
    }

    fn delete<E: Entity>(&self, entity: &E, condition: &Condition) -> Result<()> {
        self.check(Operation::Delete)?;
        self.inner.delete(entity, condition)
    }

    fn get<E: Entity>(&self, condition: &Condition, preload: &Preload) -> Result<E> {
        self.check(Operation::Get)?;
        self.inner.get(condition, preload)
    }

    fn list<E: Entity>(
        &self,
        options: &ListOptions,
        condition: &Condition,
        preload: &Preload,
    ) -> Result<Vec<E>> {
        self.check(Operation::List)?;
        self.inner.list(options, condition, preload)
    }

    fn count<E: Entity>(&self, condition: &Condition) -> Result<i64> {
        self.check(Operation::Count)?;
        self.inner.count::<E>(condition)
    }

    fn raw<E: Entity>(&self, sql: &str, args: &[SqlValue]) -> Result<Vec<E>> {
        self.check(Operation::Raw)?;
        self.inner.raw(sql, args)
    }

    fn raw_records(&self, sql: &str, args: &[SqlValue]) -> Result<Vec<Record>> {
        self.check(Operation::Raw)?;
        self.inner.raw_records(sql, args)
    }
}
