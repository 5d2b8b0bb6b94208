use crate::{
    config::{DatabaseConfig, DatabaseCredentials},
    database::{error::Error, schema::SchemaName},
};
use async_trait::async_trait;
use sqlx::{Connection, MySqlConnection, mysql::MySqlConnectOptions};
use std::{
    fmt,
    ops::{Deref, DerefMut},
};

/// Which credential set a connection is opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
}

/// An open MySQL session bound to one schema.
///
/// Owned by the request that opened it. Prefer [`SchemaConnection::close`] so
/// the server sees a clean `COM_QUIT`; dropping it only closes the socket.
pub struct SchemaConnection {
    conn: MySqlConnection,
    schema: SchemaName,
    mode: AccessMode,
}

impl SchemaConnection {
    pub fn schema(&self) -> &SchemaName {
        &self.schema
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    pub async fn close(self) -> Result<(), Error> {
        Connection::close(self.conn).await.map_err(Error::from)
    }
}

impl Deref for SchemaConnection {
    type Target = MySqlConnection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl DerefMut for SchemaConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

impl fmt::Debug for SchemaConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaConnection")
            .field("schema", &self.schema)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

/// Opens per-request connections with either the reader or the writer account.
///
/// Connections are never pooled: every call performs a fresh handshake and
/// the caller owns the result.
#[derive(Debug, Clone)]
pub struct ConnectionFactory {
    reader: DatabaseCredentials,
    writer: DatabaseCredentials,
    default_schema: SchemaName,
}

impl ConnectionFactory {
    pub fn new(config: &DatabaseConfig) -> Result<Self, Error> {
        Ok(Self {
            reader: config.reader.clone(),
            writer: config.writer.clone(),
            default_schema: SchemaName::parse(&config.default_schema)?,
        })
    }

    pub fn default_schema(&self) -> &SchemaName {
        &self.default_schema
    }

    /// Opens a read-only session on the default schema.
    pub async fn connect_default(&self) -> Result<SchemaConnection, Error> {
        self.open(AccessMode::Read, self.default_schema.clone()).await
    }

    /// Opens a read-only session on `schema`.
    pub async fn connect_reader(&self, schema: &str) -> Result<SchemaConnection, Error> {
        self.open(AccessMode::Read, SchemaName::parse(schema)?).await
    }

    /// Opens a session with the writer account on `schema`.
    pub async fn connect_writer(&self, schema: &str) -> Result<SchemaConnection, Error> {
        self.open(AccessMode::Write, SchemaName::parse(schema)?).await
    }

    /// Gets safe connection details for logging or display.
    pub fn connection_info(&self, mode: AccessMode, schema: &SchemaName) -> DatabaseConnectionInfo {
        DatabaseConnectionInfo::new(self.credentials(mode), schema)
    }

    fn credentials(&self, mode: AccessMode) -> &DatabaseCredentials {
        match mode {
            AccessMode::Read => &self.reader,
            AccessMode::Write => &self.writer,
        }
    }

    async fn open(&self, mode: AccessMode, schema: SchemaName) -> Result<SchemaConnection, Error> {
        let credentials = self.credentials(mode);
        let info = DatabaseConnectionInfo::new(credentials, &schema);

        let options = MySqlConnectOptions::new()
            .host(&credentials.host)
            .port(credentials.port)
            .username(&credentials.user)
            .password(&credentials.password);

        let conn = MySqlConnection::connect_with(&options).await?;
        let conn = select_schema(conn, &schema, &info).await?;

        tracing::debug!(database = %info, mode = ?mode, "Opened database connection");
        Ok(SchemaConnection { conn, schema, mode })
    }
}

/// The two driver calls schema selection needs.
#[async_trait]
pub(crate) trait SchemaSession: Send + Sized {
    /// Runs `statement` through the text protocol.
    async fn run(&mut self, statement: &str) -> Result<(), sqlx::Error>;

    async fn close(self) -> Result<(), sqlx::Error>;
}

#[async_trait]
impl SchemaSession for MySqlConnection {
    async fn run(&mut self, statement: &str) -> Result<(), sqlx::Error> {
        // USE is not available through prepared statements
        sqlx::Executor::execute(&mut *self, sqlx::raw_sql(statement)).await.map(|_| ())
    }

    async fn close(self) -> Result<(), sqlx::Error> {
        Connection::close(self).await
    }
}

/// Selects `schema` on a fresh session. The session is closed before the
/// error is returned if selection fails.
pub(crate) async fn select_schema<C: SchemaSession>(
    mut conn: C,
    schema: &SchemaName,
    info: &DatabaseConnectionInfo,
) -> Result<C, Error> {
    if let Err(e) = conn.run(&schema.use_statement()).await {
        if let Err(close_err) = conn.close().await {
            tracing::warn!(
                database = %info,
                "Failed to close connection after schema selection error: {}",
                close_err
            );
        }
        return Err(e.into());
    }
    Ok(conn)
}

/// A struct containing safe-to-display database connection information.
/// The password is never part of it.
#[derive(Debug, Clone)]
pub struct DatabaseConnectionInfo {
    pub host: String,
    pub port: u16,
    pub database_name: String,
    pub user: String,
}

impl DatabaseConnectionInfo {
    fn new(credentials: &DatabaseCredentials, schema: &SchemaName) -> Self {
        Self {
            host: credentials.host.clone(),
            port: credentials.port,
            database_name: schema.to_string(),
            user: credentials.user.clone(),
        }
    }
}

impl fmt::Display for DatabaseConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mysql://{}@{}:{}/{}", self.user, self.host, self.port, self.database_name)
    }
}
