use std::fmt;

use crate::database::error::Error;

/// Longest identifier MySQL accepts for a database name.
const MAX_SCHEMA_NAME_LEN: usize = 64;

/// A database (schema) name that is safe to splice into a statement.
///
/// Reference names come straight from request parameters, so only
/// `[A-Za-z0-9_]` is accepted instead of trying to escape arbitrary input.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SchemaName(String);

impl SchemaName {
    pub fn parse(name: &str) -> Result<Self, Error> {
        let valid = !name.is_empty()
            && name.len() <= MAX_SCHEMA_NAME_LEN
            && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_');

        if valid { Ok(Self(name.to_string())) } else { Err(Error::InvalidSchemaName(name.to_string())) }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `USE` statement selecting this schema.
    pub(crate) fn use_statement(&self) -> String {
        format!("USE `{}`", self.0)
    }
}

impl fmt::Display for SchemaName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SchemaName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
