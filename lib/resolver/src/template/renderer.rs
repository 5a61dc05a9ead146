use bytes::BufMut;

use crate::{
    json_writer::{write_and_escape_string, write_escaped, write_value},
    utils::consts::{CLOSE_BRACE, CLOSE_BRACKET, COLON, COMMA, NULL, OPEN_BRACE, OPEN_BRACKET},
    value::Value,
};

/// How a variable value is encoded into a fetch input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VariableRenderer {
    /// The value as JSON.
    #[default]
    Json,
    /// The JSON of the value, embedded as a JSON string literal.
    JsonString,
    /// Strings without quotes, everything else as JSON. Missing values render as nothing.
    Plain,
    /// Array elements joined with `,`, strings unquoted. Missing values render as nothing.
    Csv,
    /// The value as a GraphQL input literal, e.g. `{id: "1", tags: ["a"]}`.
    GraphQLLiteral,
    /// A GraphQL input literal escaped for the inside of a JSON string.
    GraphQLLiteralEscaped,
}

impl VariableRenderer {
    pub fn render<T: BufMut>(&self, buffer: &mut T, value: Option<&Value<'_>>) {
        let value = match value {
            Some(value) if !value.is_null() => value,
            _ => {
                if !matches!(self, VariableRenderer::Plain | VariableRenderer::Csv) {
                    buffer.put(NULL);
                }
                return;
            }
        };

        match self {
            VariableRenderer::Json => write_value(buffer, value),
            VariableRenderer::JsonString => {
                let mut json = Vec::new();
                write_value(&mut json, value);
                write_and_escape_string(buffer, &String::from_utf8_lossy(&json));
            }
            VariableRenderer::Plain => write_plain(buffer, value),
            VariableRenderer::Csv => match value {
                Value::Array(items) => {
                    for (i, item) in items.iter().enumerate() {
                        if i > 0 {
                            buffer.put(COMMA);
                        }
                        write_plain(buffer, item);
                    }
                }
                other => write_plain(buffer, other),
            },
            VariableRenderer::GraphQLLiteral => write_graphql_literal(buffer, value, false),
            VariableRenderer::GraphQLLiteralEscaped => write_graphql_literal(buffer, value, true),
        }
    }
}

fn write_plain<T: BufMut>(buffer: &mut T, value: &Value<'_>) {
    match value {
        Value::String(s) => buffer.put(s.as_bytes()),
        other => write_value(buffer, other),
    }
}

fn write_graphql_literal<T: BufMut>(buffer: &mut T, value: &Value<'_>, escape_quotes: bool) {
    match value {
        Value::String(s) => {
            let mut quoted = Vec::with_capacity(s.len() + 2);
            write_and_escape_string(&mut quoted, s);
            if escape_quotes {
                // the literal ends up inside a JSON string, e.g. the query of a GraphQL request
                write_escaped(buffer, &String::from_utf8_lossy(&quoted));
            } else {
                buffer.put(quoted.as_slice());
            }
        }
        Value::Array(items) => {
            buffer.put(OPEN_BRACKET);
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    buffer.put(COMMA);
                }
                write_graphql_literal(buffer, item, escape_quotes);
            }
            buffer.put(CLOSE_BRACKET);
        }
        Value::Object(entries) => {
            buffer.put(OPEN_BRACE);
            for (i, (key, item)) in entries.iter().enumerate() {
                if i > 0 {
                    buffer.put(COMMA);
                }
                buffer.put(key.as_bytes());
                buffer.put(COLON);
                write_graphql_literal(buffer, item, escape_quotes);
            }
            buffer.put(CLOSE_BRACE);
        }
        scalar => write_value(buffer, scalar),
    }
}
