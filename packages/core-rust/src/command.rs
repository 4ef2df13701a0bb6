//! Request topic parsing.
//!
//! Grammar below the base prefix (empty levels are ignored):
//!
//! ```text
//! <database>/<operation>
//! <database>/<collection>/<operation>[/<remainder...>]
//! ```

use std::fmt;

use crate::catalog::Operation;
use crate::topic::{BaseTopic, SEPARATOR};

/// Malformed request topic.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("topic {topic:?} is not under base prefix {prefix:?}")]
    BadPrefix { topic: String, prefix: String },
    #[error("missing database or operation in topic {topic:?}")]
    MissingSegments { topic: String },
}

/// Structured request decoded from a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandDescriptor {
    pub database: String,
    /// Present only when the topic has at least three levels below the base.
    pub collection: Option<String>,
    pub operation: String,
    /// Trailing levels after the operation, rejoined with `/`. Uninterpreted.
    pub remainder: Option<String>,
}

impl CommandDescriptor {
    /// Parses a request topic received under `base`.
    ///
    /// # Errors
    ///
    /// - `ParseError::BadPrefix` if `topic` is not under `base`
    /// - `ParseError::MissingSegments` if fewer than two levels follow the base
    pub fn parse(topic: &str, base: &BaseTopic) -> Result<Self, ParseError> {
        let rest = base.strip(topic).ok_or_else(|| ParseError::BadPrefix {
            topic: topic.to_string(),
            prefix: base.prefix().to_string(),
        })?;

        let mut levels = rest.split(SEPARATOR).filter(|level| !level.is_empty());
        let (Some(database), Some(second)) = (levels.next(), levels.next()) else {
            return Err(ParseError::MissingSegments {
                topic: topic.to_string(),
            });
        };

        let descriptor = match levels.next() {
            None => Self {
                database: database.to_string(),
                collection: None,
                operation: second.to_string(),
                remainder: None,
            },
            Some(operation) => {
                let remainder = levels.collect::<Vec<_>>().join("/");
                Self {
                    database: database.to_string(),
                    collection: Some(second.to_string()),
                    operation: operation.to_string(),
                    remainder: (!remainder.is_empty()).then_some(remainder),
                }
            }
        };
        Ok(descriptor)
    }
}

impl fmt::Display for CommandDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.database)?;
        if let Some(collection) = &self.collection {
            write!(f, "/{collection}")?;
        }
        write!(f, "/{}", self.operation)?;
        if let Some(remainder) = &self.remainder {
            write!(f, "/{remainder}")?;
        }
        Ok(())
    }
}

/// A descriptor whose operation has been resolved against the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub database: String,
    pub collection: Option<String>,
    pub operation: Operation,
    pub remainder: Option<String>,
}

impl From<CommandDescriptor> for Invocation {
    fn from(desc: CommandDescriptor) -> Self {
        Self {
            operation: Operation::resolve(&desc.operation),
            database: desc.database,
            collection: desc.collection,
            remainder: desc.remainder,
        }
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.collection {
            Some(collection) => write!(f, "{}.{collection}.{}", self.database, self.operation),
            None => write!(f, "{}.{}", self.database, self.operation),
        }
    }
}
