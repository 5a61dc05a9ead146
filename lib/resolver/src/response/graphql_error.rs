use bytes::BufMut;
use serde::{de, Deserialize, Deserializer, Serialize};
use std::fmt;

use crate::{
    json_writer::{write_and_escape_string, write_u64},
    utils::consts::{CLOSE_BRACE, CLOSE_BRACKET, COLON, COMMA, OPEN_BRACE, OPEN_BRACKET},
};

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GraphQLError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locations: Option<Vec<GraphQLErrorLocation>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<GraphQLErrorPathSegment>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<GraphQLErrorExtensions>,
}

impl From<String> for GraphQLError {
    fn from(message: String) -> Self {
        GraphQLError {
            message,
            locations: None,
            path: None,
            extensions: None,
        }
    }
}

impl From<&str> for GraphQLError {
    fn from(message: &str) -> Self {
        message.to_string().into()
    }
}

impl GraphQLError {
    pub fn with_code(mut self, code: &str) -> Self {
        self.extensions = Some(GraphQLErrorExtensions {
            code: Some(code.to_string()),
        });
        self
    }

    /// Writes the error as a compact JSON object, in the same shape `serde` would produce.
    pub fn write_to<T: BufMut>(&self, buffer: &mut T) {
        buffer.put(OPEN_BRACE);
        write_and_escape_string(buffer, "message");
        buffer.put(COLON);
        write_and_escape_string(buffer, &self.message);

        if let Some(locations) = &self.locations {
            buffer.put(COMMA);
            write_and_escape_string(buffer, "locations");
            buffer.put(COLON);
            buffer.put(OPEN_BRACKET);
            for (i, location) in locations.iter().enumerate() {
                if i > 0 {
                    buffer.put(COMMA);
                }
                buffer.put(&br#"{"line":"#[..]);
                write_u64(buffer, location.line as u64);
                buffer.put(&br#","column":"#[..]);
                write_u64(buffer, location.column as u64);
                buffer.put(CLOSE_BRACE);
            }
            buffer.put(CLOSE_BRACKET);
        }

        if let Some(path) = &self.path {
            buffer.put(COMMA);
            write_and_escape_string(buffer, "path");
            buffer.put(COLON);
            write_path(buffer, path);
        }

        if let Some(code) = self.extensions.as_ref().and_then(|e| e.code.as_deref()) {
            buffer.put(COMMA);
            buffer.put(&br#""extensions":{"code":"#[..]);
            write_and_escape_string(buffer, code);
            buffer.put(CLOSE_BRACE);
        }

        buffer.put(CLOSE_BRACE);
    }
}

pub fn write_path<T: BufMut>(buffer: &mut T, path: &[GraphQLErrorPathSegment]) {
    buffer.put(OPEN_BRACKET);
    for (i, segment) in path.iter().enumerate() {
        if i > 0 {
            buffer.put(COMMA);
        }
        match segment {
            GraphQLErrorPathSegment::String(name) => write_and_escape_string(buffer, name),
            GraphQLErrorPathSegment::Index(index) => write_u64(buffer, *index as u64),
        }
    }
    buffer.put(CLOSE_BRACKET);
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct GraphQLErrorExtensions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct GraphQLErrorLocation {
    pub line: usize,
    pub column: usize,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum GraphQLErrorPathSegment {
    String(String),
    Index(usize),
}

impl fmt::Display for GraphQLErrorPathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphQLErrorPathSegment::String(name) => f.write_str(name),
            GraphQLErrorPathSegment::Index(index) => write!(f, "{}", index),
        }
    }
}

impl<'de> Deserialize<'de> for GraphQLErrorPathSegment {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct PathSegmentVisitor;

        impl<'de> de::Visitor<'de> for PathSegmentVisitor {
            type Value = GraphQLErrorPathSegment;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a string or an integer for a GraphQL path segment")
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(GraphQLErrorPathSegment::String(value.to_owned()))
            }

            fn visit_string<E>(self, value: String) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(GraphQLErrorPathSegment::String(value))
            }

            fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(GraphQLErrorPathSegment::Index(value as usize))
            }

            fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                if value < 0 {
                    return Err(E::custom(format!(
                        "path segment must be a non-negative integer, but got {}",
                        value
                    )));
                }
                Ok(GraphQLErrorPathSegment::Index(value as usize))
            }
        }

        deserializer.deserialize_any(PathSegmentVisitor)
    }
}
