use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use strum::IntoStaticStr;

use crate::response::graphql_error::GraphQLError;

/// Failures that abort a resolution pass.
///
/// Everything a GraphQL client can be told about as a partial result (connector failures,
/// null propagation) is written into the response instead and never becomes a `ResolveError`.
#[derive(thiserror::Error, Debug, Clone, IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolveError {
    #[error("field set references buffer {0} but no fetch produced it")]
    UnknownBuffer(usize),
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    #[error("patch {0} is referenced by the plan but does not exist")]
    MissingPatch(usize),
    #[error("request was canceled")]
    Canceled,
    #[error("subscription failed: {0}")]
    Subscription(String),
    #[error("response receiver was dropped")]
    ChannelClosed,
}

impl ResolveError {
    pub fn error_code(&self) -> &'static str {
        self.into()
    }

    /// Renders the error as a complete response document with `"data":null`.
    pub fn to_graphql_bytes(&self) -> Bytes {
        let error = GraphQLError::from(self.to_string()).with_code(self.error_code());
        let mut buffer = BytesMut::with_capacity(64);
        buffer.put(&br#"{"errors":["#[..]);
        error.write_to(&mut buffer);
        buffer.put(&br#"],"data":null}"#[..]);
        buffer.freeze()
    }
}

/// Failure reported by a data source. Never fatal, see [`ResolveError`].
#[derive(thiserror::Error, Debug, Clone, IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum DataSourceError {
    #[error("{0}")]
    Failed(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("request was canceled")]
    Canceled,
    #[error("batch could not be created: {0}")]
    Batch(String),
}

impl DataSourceError {
    pub fn error_code(&self) -> &'static str {
        self.into()
    }

    pub fn to_graphql_error(&self) -> GraphQLError {
        GraphQLError::from(format!("failed to load from data source: {}", self))
            .with_code("DOWNSTREAM_SERVICE_ERROR")
    }
}
