//! Store construction: configuration, connection, and migration.
//!
//! [`ConnectionManager`] walks a fixed sequence of stages. Each step checks
//! the current [`Stage`] and refuses to run out of order, so join tables can
//! never be declared after the schema they alter has been migrated.
//!
//! ```text
//! Unconfigured → Configuring → Connected → Migrated → Ready
//! ```
//!
//! [`StoreBuilder`] drives the manager through every stage in one call.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use tracing::{debug, info};
use vigil_settings::DatabaseSettings;

use crate::backend::Backend;
use crate::backend::sqlite::SqliteBackend;
use crate::codec::{Codec, CodecRegistry};
use crate::errors::{Result, StoreError};
use crate::join::{JoinRegistry, JoinTable};
use crate::migrate::{self, MigrationReport};
use crate::schema::{Entity, Schema};
use crate::store::{Store, StoreInner};

pub use vigil_settings::SslMode;

/// Connection cap when none is configured.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Time to wait for a pooled connection when none is configured.
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Address and credentials of a networked backend.
#[derive(Clone, PartialEq, Eq)]
pub struct NetworkTarget {
    /// Server host name.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Database name.
    pub db_name: String,
    /// User name.
    pub user: String,
    /// Password.
    pub password: String,
    /// Transport security mode.
    pub ssl_mode: SslMode,
}

impl fmt::Debug for NetworkTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("db_name", &self.db_name)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

/// Which backend a store connects to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendTarget {
    /// A fresh, uniquely named in-process database. Always one connection.
    Ephemeral,
    /// A networked server.
    Network(NetworkTarget),
}

/// Everything needed to connect a store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreConfig {
    /// Backend selection.
    pub target: BackendTarget,
    /// Requested connection cap. Ignored by the ephemeral backend.
    pub max_connections: u32,
    /// Time to wait for a pooled connection.
    pub connection_timeout: Duration,
    /// Deadline applied to every operation, if any.
    pub operation_timeout: Option<Duration>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::ephemeral()
    }
}

impl StoreConfig {
    /// An ephemeral in-process store.
    pub fn ephemeral() -> Self {
        Self {
            target: BackendTarget::Ephemeral,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            operation_timeout: None,
        }
    }

    /// A networked store.
    pub fn network(target: NetworkTarget) -> Self {
        Self {
            target: BackendTarget::Network(target),
            ..Self::ephemeral()
        }
    }

    /// Build a configuration from loaded settings.
    pub fn from_settings(settings: &DatabaseSettings) -> Self {
        let target = if settings.in_memory {
            BackendTarget::Ephemeral
        } else {
            BackendTarget::Network(NetworkTarget {
                host: settings.host.clone(),
                port: settings.port,
                db_name: settings.db_name.clone(),
                user: settings.user.clone(),
                password: settings.password.clone(),
                ssl_mode: settings.ssl_mode,
            })
        };
        Self {
            target,
            max_connections: settings.max_conn,
            connection_timeout: Duration::from_millis(settings.connection_timeout_ms),
            operation_timeout: settings.operation_timeout_ms.map(Duration::from_millis),
        }
    }

    /// Set the requested connection cap.
    #[must_use]
    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// Set the per-operation deadline.
    #[must_use]
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }

    /// The cap the backend will actually use.
    pub fn effective_max_connections(&self) -> u32 {
        match self.target {
            BackendTarget::Ephemeral => 1,
            BackendTarget::Network(_) => self.max_connections.max(1),
        }
    }
}

/// Lifecycle stage of a [`ConnectionManager`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    /// Nothing set yet.
    Unconfigured,
    /// Configuration applied; entities, codecs, and joins may be added.
    Configuring,
    /// Pool established. Joins may still be added.
    Connected,
    /// Schema ensured for every registered table.
    Migrated,
    /// Handed over to a [`Store`]. A manager never reports this stage
    /// itself, since [`ConnectionManager::finish`] consumes it.
    Ready,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unconfigured => "unconfigured",
            Self::Configuring => "configuring",
            Self::Connected => "connected",
            Self::Migrated => "migrated",
            Self::Ready => "ready",
        };
        f.write_str(name)
    }
}

/// Owns the backend connection from configuration through migration.
pub struct ConnectionManager {
    stage: Stage,
    config: Option<StoreConfig>,
    schemas: Vec<&'static Schema>,
    joins: JoinRegistry,
    codecs: CodecRegistry,
    backend: Option<Backend>,
    report: MigrationReport,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("stage", &self.stage)
            .field("tables", &self.schemas.len())
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// A manager with the default codecs and nothing else.
    pub fn new() -> Self {
        Self {
            stage: Stage::Unconfigured,
            config: None,
            schemas: Vec::new(),
            joins: JoinRegistry::default(),
            codecs: CodecRegistry::with_defaults(),
            backend: None,
            report: MigrationReport::default(),
        }
    }

    /// Current stage.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    fn require(&self, allowed: &[Stage], action: &str) -> Result<()> {
        if allowed.contains(&self.stage) {
            Ok(())
        } else {
            Err(StoreError::Config(format!(
                "cannot {action} while {}",
                self.stage
            )))
        }
    }

    /// Apply a configuration. May be repeated until connected.
    pub fn configure(&mut self, config: StoreConfig) -> Result<()> {
        self.require(&[Stage::Unconfigured, Stage::Configuring], "configure")?;
        if config.target == BackendTarget::Ephemeral && config.max_connections > 1 {
            debug!(
                requested = config.max_connections,
                "ephemeral backend forces a single connection"
            );
        }
        self.config = Some(config);
        self.stage = Stage::Configuring;
        Ok(())
    }

    /// Register an entity type for migration and queries.
    pub fn register<E: Entity>(&mut self) -> Result<()> {
        self.register_schema(E::schema())
    }

    /// Register a table declaration. Registering the same table twice is a
    /// no-op; two different declarations for one table are an error.
    pub fn register_schema(&mut self, schema: &'static Schema) -> Result<()> {
        self.require(&[Stage::Configuring], "register entities")?;
        match self.schemas.iter().find(|s| s.table() == schema.table()) {
            Some(existing) if *existing == schema => Ok(()),
            Some(_) => Err(StoreError::Config(format!(
                "table {} registered with two different declarations",
                schema.table()
            ))),
            None => {
                schema.validate()?;
                self.schemas.push(schema);
                Ok(())
            }
        }
    }

    /// Declare a join table. Must happen before migration.
    pub fn register_join(&mut self, join: JoinTable) -> Result<()> {
        self.require(
            &[Stage::Configuring, Stage::Connected],
            "declare join tables",
        )?;
        self.joins.add(join)
    }

    /// Add or replace a codec. Must happen before migration.
    pub fn register_codec(&mut self, codec: impl Codec + 'static) -> Result<()> {
        self.require(&[Stage::Configuring, Stage::Connected], "register codecs")?;
        if let Some(previous) = self.codecs.register(codec) {
            debug!(codec = previous.name(), "replaced codec");
        }
        Ok(())
    }

    /// Establish the connection pool.
    pub fn connect(&mut self) -> Result<()> {
        self.require(&[Stage::Configuring], "connect")?;
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| StoreError::Config("no configuration applied".into()))?;

        let backend = match &config.target {
            BackendTarget::Ephemeral => {
                Backend::Sqlite(SqliteBackend::open_ephemeral(config.connection_timeout)?)
            }
            #[cfg(feature = "postgres")]
            BackendTarget::Network(target) => {
                Backend::Postgres(crate::backend::postgres::PostgresBackend::connect(
                    target,
                    config.effective_max_connections(),
                    config.connection_timeout,
                )?)
            }
            #[cfg(not(feature = "postgres"))]
            BackendTarget::Network(target) => {
                return Err(StoreError::Config(format!(
                    "cannot connect to {}:{}: built without postgres support",
                    target.host, target.port
                )));
            }
        };
        info!(
            dialect = ?backend.dialect(),
            max_connections = backend.max_connections(),
            "store connected"
        );
        self.backend = Some(backend);
        self.stage = Stage::Connected;
        Ok(())
    }

    /// Ensure the schema of every registered table. Failure is fatal: the
    /// manager stays connected but cannot become ready.
    pub fn migrate(&mut self) -> Result<&MigrationReport> {
        self.require(&[Stage::Connected], "migrate")?;
        let backend = self
            .backend
            .as_ref()
            .ok_or_else(|| StoreError::Config("not connected".into()))?;
        let specs = migrate::plan(&self.schemas, &self.joins)?;
        self.report = migrate::run(backend, &specs, &self.codecs)?;
        self.stage = Stage::Migrated;
        Ok(&self.report)
    }

    /// Hand the migrated backend over to a [`Store`].
    pub fn finish(mut self) -> Result<Store> {
        self.require(&[Stage::Migrated], "finish")?;
        let backend = self
            .backend
            .take()
            .ok_or_else(|| StoreError::Config("not connected".into()))?;
        let timeout = self.config.as_ref().and_then(|c| c.operation_timeout);

        let mut tables: HashMap<&'static str, &'static Schema> = self
            .schemas
            .iter()
            .map(|schema| (schema.table(), *schema))
            .collect();
        for join in self.joins.iter() {
            let _ = tables.entry(join.link().table()).or_insert(join.link());
        }

        debug!(tables = tables.len(), "handing backend to store");
        Ok(Store::from_inner(
            StoreInner {
                backend,
                codecs: self.codecs,
                tables,
                joins: self.joins,
                migration: self.report,
            },
            timeout,
        ))
    }
}

type InitFn = Box<dyn FnOnce(&Store) -> Result<()> + Send>;

/// Builds a [`Store`]: configure, register, connect, migrate, initialize.
pub struct StoreBuilder {
    config: StoreConfig,
    schemas: Vec<&'static Schema>,
    joins: Vec<Result<JoinTable>>,
    codecs: Vec<Box<dyn FnOnce(&mut ConnectionManager) -> Result<()> + Send>>,
    init: Option<InitFn>,
}

impl fmt::Debug for StoreBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreBuilder")
            .field("config", &self.config)
            .field("tables", &self.schemas.len())
            .field("joins", &self.joins.len())
            .finish_non_exhaustive()
    }
}

impl StoreBuilder {
    pub(crate) fn new(config: StoreConfig) -> Self {
        Self {
            config,
            schemas: Vec::new(),
            joins: Vec::new(),
            codecs: Vec::new(),
            init: None,
        }
    }

    /// Register an entity type.
    #[must_use]
    pub fn entity<E: Entity>(mut self) -> Self {
        self.schemas.push(E::schema());
        self
    }

    /// Declare that `Owner.field` is realized by rows of `Link` keyed on
    /// `owner_key`. Invalid declarations fail [`StoreBuilder::build`].
    #[must_use]
    pub fn join<Owner: Entity, Link: Entity>(
        mut self,
        field: &'static str,
        owner_key: &'static str,
    ) -> Self {
        self.joins.push(JoinTable::new::<Owner, Link>(field, owner_key));
        self
    }

    /// Add or replace a codec.
    #[must_use]
    pub fn codec(mut self, codec: impl Codec + 'static) -> Self {
        self.codecs
            .push(Box::new(move |manager| manager.register_codec(codec)));
        self
    }

    /// Run `init` once after migration, before the store is returned. An
    /// error aborts construction.
    #[must_use]
    pub fn on_ready(mut self, init: impl FnOnce(&Store) -> Result<()> + Send + 'static) -> Self {
        self.init = Some(Box::new(init));
        self
    }

    /// Connect, migrate, and initialize.
    pub fn build(self) -> Result<Store> {
        let mut manager = ConnectionManager::new();
        manager.configure(self.config)?;
        for schema in self.schemas {
            manager.register_schema(schema)?;
        }
        for register in self.codecs {
            register(&mut manager)?;
        }
        for join in self.joins {
            manager.register_join(join?)?;
        }
        manager.connect()?;
        let _ = manager.migrate()?;
        let store = manager.finish()?;

        if let Some(init) = self.init {
            init(&store)?;
        }
        info!(tables = store.tables().len(), "store ready");
        Ok(store)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
