//! SurrealDB connection setup
//!
//! Supports in-memory (tests), URL (`SURREALDB_URL`), cloud (WebSocket with
//! credentials) and local file-backed (`surrealkv://`) connections. Every
//! connection runs the schema migrations before it is handed out.

use surrealdb::engine::any::Any;
use surrealdb::opt::auth::{Database, Root};
use surrealdb::Surreal;
use tracing::info;

use crate::error::StateError;
use crate::migrations;
use crate::Result;

/// Default namespace for Avaliar data
pub const DEFAULT_NAMESPACE: &str = "avaliar";
/// Default database name
pub const DEFAULT_DATABASE: &str = "main";
/// Local persistence directory used when no remote endpoint is configured
pub const DEFAULT_LOCAL_PATH: &str = ".avaliar/db";

/// Remote endpoint; its presence selects the credentialed connection.
pub const ENDPOINT_ENV: &str = "SURREALDB_ENDPOINT";
/// Connection URL used without credentials (`ws://`, `surrealkv://`, `mem://`).
pub const URL_ENV: &str = "SURREALDB_URL";

/// Credentials and target of a remote SurrealDB.
#[derive(Debug, Clone)]
pub struct CloudConfig {
    /// e.g. `wss://xxx.aws-use1.surrealdb.cloud`
    pub endpoint: String,
    pub username: String,
    pub password: String,
    pub namespace: String,
    pub database: String,
    /// Sign in as a root user instead of a database user.
    pub is_root: bool,
}

impl CloudConfig {
    /// Database-user configuration in the default namespace and database.
    pub fn new(
        endpoint: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            username: username.into(),
            password: password.into(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            database: DEFAULT_DATABASE.to_string(),
            is_root: false,
        }
    }

    /// Read `SURREALDB_ENDPOINT`, `_USERNAME`, `_PASSWORD`, `_NAMESPACE`,
    /// `_DATABASE` and `_ROOT`.
    ///
    /// `Ok(None)` when no endpoint is set. An endpoint without credentials is
    /// a configuration error rather than a silent fallback to local storage.
    pub fn from_env() -> Result<Option<Self>> {
        let Ok(endpoint) = std::env::var(ENDPOINT_ENV) else {
            return Ok(None);
        };
        let mut config = Self::new(
            endpoint,
            required_var("SURREALDB_USERNAME")?,
            required_var("SURREALDB_PASSWORD")?,
        );
        if let Ok(namespace) = std::env::var("SURREALDB_NAMESPACE") {
            config.namespace = namespace;
        }
        if let Ok(database) = std::env::var("SURREALDB_DATABASE") {
            config.database = database;
        }
        config.is_root = std::env::var("SURREALDB_ROOT")
            .is_ok_and(|v| v.eq_ignore_ascii_case("true"));
        Ok(Some(config))
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name).map_err(|_| {
        StateError::Connection(format!("{ENDPOINT_ENV} is set but {name} is missing"))
    })
}

async fn open(url: &str, namespace: &str, database: &str) -> Result<Surreal<Any>> {
    let db = surrealdb::engine::any::connect(url)
        .await
        .map_err(|e| StateError::Connection(format!("Failed to connect to {}: {}", url, e)))?;

    db.use_ns(namespace)
        .use_db(database)
        .await
        .map_err(|e| StateError::Connection(e.to_string()))?;

    Ok(db)
}

/// Connect to an in-memory database and initialise the schema.
pub async fn connect_memory() -> Result<Surreal<Any>> {
    let db = open("mem://", DEFAULT_NAMESPACE, DEFAULT_DATABASE).await?;
    migrations::init_schema(&db).await?;
    info!("SurrealDB connected (in-memory)");
    Ok(db)
}

/// Connect to a remote SurrealDB with credentials.
pub async fn connect_cloud(config: &CloudConfig) -> Result<Surreal<Any>> {
    let db = surrealdb::engine::any::connect(&config.endpoint)
        .await
        .map_err(|e| StateError::Connection(e.to_string()))?;

    if config.is_root {
        db.signin(Root {
            username: &config.username,
            password: &config.password,
        })
        .await
        .map_err(|e| StateError::Connection(format!("Root auth failed: {e}")))?;
    } else {
        db.signin(Database {
            namespace: &config.namespace,
            database: &config.database,
            username: &config.username,
            password: &config.password,
        })
        .await
        .map_err(|e| StateError::Connection(format!("DB auth failed: {e}")))?;
    }

    db.use_ns(&config.namespace)
        .use_db(&config.database)
        .await
        .map_err(|e| StateError::Connection(e.to_string()))?;

    migrations::init_schema(&db).await?;
    info!(endpoint = %config.endpoint, "SurrealDB connected (cloud)");
    Ok(db)
}

/// Connect using the environment.
///
/// Resolution order: cloud credentials (`SURREALDB_ENDPOINT`, ...), then
/// `SURREALDB_URL`, then local persistence under `.avaliar/db`.
pub async fn connect_from_env() -> Result<Surreal<Any>> {
    if let Some(config) = CloudConfig::from_env()? {
        return connect_cloud(&config).await;
    }

    if let Ok(url) = std::env::var(URL_ENV) {
        let db = open(&url, DEFAULT_NAMESPACE, DEFAULT_DATABASE).await?;
        migrations::init_schema(&db).await?;
        info!("SurrealDB connected ({})", url);
        return Ok(db);
    }

    std::fs::create_dir_all(DEFAULT_LOCAL_PATH).map_err(|e| {
        StateError::Connection(format!(
            "Failed to create database directory {}: {}",
            DEFAULT_LOCAL_PATH, e
        ))
    })?;
    let url = format!("surrealkv://{}", DEFAULT_LOCAL_PATH);
    info!(
        "No cloud config or SURREALDB_URL found, using local persistence: {}",
        url
    );

    let db = open(&url, DEFAULT_NAMESPACE, DEFAULT_DATABASE).await?;
    migrations::init_schema(&db).await?;
    Ok(db)
}
