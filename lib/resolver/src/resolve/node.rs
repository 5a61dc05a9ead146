use std::borrow::Cow;

use bytes::{BufMut, BytesMut};
use futures::{
    future::{self, BoxFuture},
    FutureExt,
};
use tracing::trace;

use crate::{
    buffer::{merge_buf_pair_errors, merge_buf_pairs, BufPair, PendingPatch},
    error::ResolveError,
    fetch::ResultSet,
    json_writer::{write_and_escape_string, write_bool, write_f64, write_i64, write_u64},
    plan::node::{Array, CustomNode, Field, FieldExport, Node, Null, Object, Scalar, StringNode},
    resolve::{
        state::{Outcome, ResolveState},
        Resolution,
    },
    response::graphql_error::GraphQLError,
    utils::{
        concurrency::ConcurrencyScope,
        consts::{
            CLOSE_BRACE, CLOSE_BRACKET, COLON, COMMA, EMPTY_ARRAY, EMPTY_OBJECT, NULL, OPEN_BRACE,
            OPEN_BRACKET,
        },
    },
    value::Value,
};

/// The value at `path`, absent when missing or null.
fn lookup<'v, 'a>(data: &'v Value<'a>, path: &[String]) -> Option<&'v Value<'a>> {
    let value = if path.is_empty() {
        Some(data)
    } else {
        data.get_path(path)
    };
    value.filter(|value| !value.is_null())
}

impl<'r> Resolution<'r> {
    /// Serializes `node` for `data` into `out`.
    ///
    /// A node whose data is missing or mistyped writes `null` when nullable. Otherwise it
    /// records an error and reports [`Outcome::NullBubble`] without writing anything, and the
    /// closest nullable ancestor is written as `null` instead.
    pub(crate) fn resolve_node<'s>(
        &'s self,
        state: &'s ResolveState,
        node: &'s Node,
        data: &'s Value<'s>,
        out: &'s mut BufPair,
    ) -> BoxFuture<'s, Result<Outcome, ResolveError>> {
        let outcome = match node {
            Node::Object(object) => return self.resolve_object(state, object, data, out).boxed(),
            Node::Array(array) => return self.resolve_array(state, array, data, out).boxed(),
            Node::Null(null) => self.resolve_null(state, null, data, out),
            Node::String(string) => self.resolve_string(state, string, data, out),
            Node::Boolean(scalar) => {
                self.resolve_scalar(state, scalar, data, out, |value, out| match value {
                    Value::Bool(b) => {
                        write_bool(out, *b);
                        true
                    }
                    _ => false,
                })
            }
            Node::Integer(scalar) => {
                self.resolve_scalar(state, scalar, data, out, |value, out| match value {
                    Value::F64(n) if n.fract() != 0.0 => false,
                    _ => write_number(value, out),
                })
            }
            Node::Float(scalar) => self.resolve_scalar(state, scalar, data, out, write_number),
            Node::BigInt(scalar) => {
                self.resolve_scalar(state, scalar, data, out, |value, out| match value {
                    Value::String(s) => {
                        write_and_escape_string(out, s);
                        true
                    }
                    _ => write_number(value, out),
                })
            }
            Node::Custom(custom) => self.resolve_custom(state, custom, data, out),
            Node::EmptyObject => {
                out.data.put(EMPTY_OBJECT);
                Outcome::Written
            }
            Node::EmptyArray => {
                out.data.put(EMPTY_ARRAY);
                Outcome::Written
            }
        };
        future::ready(Ok(outcome)).boxed()
    }

    async fn resolve_object(
        &self,
        state: &ResolveState,
        object: &Object,
        data: &Value<'_>,
        out: &mut BufPair,
    ) -> Result<Outcome, ResolveError> {
        let Some(data) = lookup(data, &object.path) else {
            return Ok(self.resolve_missing(state, object.nullable, out));
        };

        let unescaped;
        let data = match data.as_str().filter(|_| object.unescape_response_json) {
            Some(json) => match Value::parse(json.as_bytes()) {
                Ok(value) => {
                    unescaped = value;
                    &unescaped
                }
                Err(_) => return Ok(self.resolve_missing(state, object.nullable, out)),
            },
            None => data,
        };

        let mut state = state.enter_object(&object.path);
        if object.unescape_response_json {
            state = state.detach();
        }
        let mut results = ResultSet::default();
        if let Some(fetch) = &object.fetch {
            self.resolve_fetch(&state, fetch, data, !state.detached, &mut results).await?;
            for result in results.iter() {
                out.write_raw_errors(&result.errors);
            }
        }

        let data_start = out.data.len();
        let patches_start = out.patches.len();
        let total_fields: usize = object.field_sets.iter().map(|set| set.fields.len()).sum();
        let mut directive_skips = 0;
        let mut type_skipped = false;
        let mut written = false;
        let mut field_buf = self.resolver.pools.buf_pair();

        for field_set in &object.field_sets {
            let fetched;
            let fetch_state;
            let (set_data, set_state) = match field_set.buffer_id {
                Some(buffer_id) => match results.get(buffer_id) {
                    Some(buffer) => {
                        fetched = Value::parse(&buffer.result.data)?;
                        fetch_state = state.enter_fetch(buffer.fetch_id);
                        (&fetched, &fetch_state)
                    }
                    None if object.fetch.is_none() => (data, &state),
                    None => return Err(ResolveError::UnknownBuffer(buffer_id)),
                },
                None => (data, &state),
            };

            if let Some(type_names) = &field_set.on_type_names {
                let matches = set_data
                    .type_name()
                    .is_some_and(|type_name| type_names.iter().any(|t| t == type_name));
                if !matches {
                    trace!(path = %state.pointer(), "type condition not met, skipping field set");
                    type_skipped = true;
                    continue;
                }
            }

            for field in &field_set.fields {
                if self.skipped_by_directive(field) {
                    directive_skips += 1;
                    continue;
                }

                let field_start = out.data.len();
                out.data.put(if written { COMMA } else { OPEN_BRACE });
                write_and_escape_string(&mut out.data, &field.name);
                out.data.put(COLON);

                let field_state = set_state.field(&field.name, field.position);
                let outcome = self
                    .resolve_node(&field_state, &field.value, set_data, &mut field_buf)
                    .await?;

                match outcome {
                    Outcome::Written => {
                        merge_buf_pairs(&mut field_buf, out, false);
                        written = true;
                    }
                    Outcome::Skipped => {
                        out.data.truncate(field_start);
                        merge_buf_pair_errors(&mut field_buf, out);
                        field_buf.reset();
                        type_skipped = true;
                    }
                    Outcome::NullBubble => {
                        merge_buf_pair_errors(&mut field_buf, out);
                        field_buf.reset();
                        out.data.truncate(data_start);
                        out.patches.truncate(patches_start);
                        if object.nullable {
                            out.data.put(NULL);
                            return Ok(Outcome::Written);
                        }
                        return Ok(Outcome::NullBubble);
                    }
                }
            }
        }

        if written {
            out.data.put(CLOSE_BRACE);
            return Ok(Outcome::Written);
        }
        if total_fields > 0 && directive_skips == total_fields {
            out.data.put(EMPTY_OBJECT);
            return Ok(Outcome::Written);
        }
        if type_skipped && !object.nullable {
            return Ok(Outcome::Skipped);
        }
        if total_fields == 0 {
            out.data.put(EMPTY_OBJECT);
            return Ok(Outcome::Written);
        }
        Ok(self.resolve_missing(&state, object.nullable, out))
    }

    async fn resolve_array(
        &self,
        state: &ResolveState,
        array: &Array,
        data: &Value<'_>,
        out: &mut BufPair,
    ) -> Result<Outcome, ResolveError> {
        let items = match lookup(data, &array.path) {
            Some(Value::Array(items)) => items,
            _ => return Ok(self.resolve_missing(state, array.nullable, out)),
        };
        if items.is_empty() {
            out.data.put(EMPTY_ARRAY);
            return Ok(Outcome::Written);
        }

        let limit = array.stream.map(|stream| stream.initial_batch_size);
        let state = state.enter_list(&array.path, limit);
        let eager = match (&array.item, array.stream) {
            (None, _) => 0,
            (Some(_), Some(stream)) => stream.initial_batch_size.min(items.len()),
            (Some(_), None) => items.len(),
        };

        let data_start = out.data.len();
        let patches_start = out.patches.len();
        let mut has_previous = false;
        let mut bubbled = false;
        out.data.put(OPEN_BRACKET);

        if let Some(item) = array.item.as_deref().filter(|_| eager > 0) {
            if array.resolve_asynchronously && eager > 1 {
                let mut scope = ConcurrencyScope::new(self.resolver.config.max_concurrency);
                for (index, item_data) in items[..eager].iter().enumerate() {
                    let item_state = state.item(index);
                    scope.spawn(Box::pin(async move {
                        let mut item_buf = self.resolver.pools.buf_pair();
                        let outcome = self
                            .resolve_node(&item_state, item, item_data, &mut item_buf)
                            .await;
                        (index, outcome, item_buf)
                    }));
                }

                let mut slots: Vec<Option<_>> = (0..eager).map(|_| None).collect();
                for (index, outcome, item_buf) in scope.join_all().await {
                    slots[index] = Some((outcome, item_buf));
                }
                for (outcome, mut item_buf) in slots.into_iter().flatten() {
                    if append_item(outcome?, &mut item_buf, out, &mut has_previous) {
                        bubbled = true;
                        break;
                    }
                }
            } else {
                let mut item_buf = self.resolver.pools.buf_pair();
                for (index, item_data) in items[..eager].iter().enumerate() {
                    let item_state = state.item(index);
                    let outcome = self
                        .resolve_node(&item_state, item, item_data, &mut item_buf)
                        .await?;
                    if append_item(outcome, &mut item_buf, out, &mut has_previous) {
                        bubbled = true;
                        break;
                    }
                }
            }
        }

        if bubbled {
            trace!(path = %state.pointer(), "array item is null, nulling the array");
            out.data.truncate(data_start);
            out.patches.truncate(patches_start);
            if array.nullable {
                out.data.put(NULL);
                return Ok(Outcome::Written);
            }
            return Ok(Outcome::NullBubble);
        }

        if let Some(stream) = array.stream {
            for (index, item_data) in items.iter().enumerate().skip(eager) {
                out.patches.push(PendingPatch {
                    index: stream.patch_index,
                    path: state.item_path(index),
                    data: item_data.to_bytes(),
                });
            }
        }

        out.data.put(CLOSE_BRACKET);
        Ok(Outcome::Written)
    }

    fn resolve_null(
        &self,
        state: &ResolveState,
        null: &Null,
        data: &Value<'_>,
        out: &mut BufPair,
    ) -> Outcome {
        if let Some(defer) = null.defer {
            out.patches.push(PendingPatch {
                index: defer.patch_index,
                path: state.path.clone(),
                data: data.to_bytes(),
            });
        }
        out.data.put(NULL);
        Outcome::Written
    }

    fn resolve_string(
        &self,
        state: &ResolveState,
        string: &StringNode,
        data: &Value<'_>,
        out: &mut BufPair,
    ) -> Outcome {
        let Some(Value::String(value)) = lookup(data, &string.path) else {
            return self.resolve_missing(state, string.nullable, out);
        };

        let value: &str = if string.is_type_name {
            self.ctx.rename_type_name(value)
        } else {
            value
        };

        if string.unescape_response_json && Value::parse(value.as_bytes()).is_ok() {
            out.data.put(value.as_bytes());
        } else {
            write_and_escape_string(&mut out.data, value);
        }
        if let Some(export) = &string.export {
            self.export_field(export, &Value::String(Cow::Borrowed(value)));
        }
        Outcome::Written
    }

    fn resolve_scalar<F>(
        &self,
        state: &ResolveState,
        scalar: &Scalar,
        data: &Value<'_>,
        out: &mut BufPair,
        write: F,
    ) -> Outcome
    where
        F: FnOnce(&Value<'_>, &mut BytesMut) -> bool,
    {
        match lookup(data, &scalar.path) {
            Some(value) if write(value, &mut out.data) => {
                if let Some(export) = &scalar.export {
                    self.export_field(export, value);
                }
                Outcome::Written
            }
            _ => self.resolve_missing(state, scalar.nullable, out),
        }
    }

    /// Hands the raw JSON of the value to the node's resolver and writes what it returns.
    /// A failing resolver, or one returning invalid JSON, is treated like a missing value
    /// with its own error message.
    fn resolve_custom(
        &self,
        state: &ResolveState,
        custom: &CustomNode,
        data: &Value<'_>,
        out: &mut BufPair,
    ) -> Outcome {
        let Some(value) = lookup(data, &custom.path) else {
            return self.resolve_missing(state, custom.nullable, out);
        };

        let message = match custom.resolver.resolve(&value.to_bytes()) {
            Ok(rendered) if Value::parse(&rendered).is_ok() => {
                out.data.put(rendered.as_ref());
                return Outcome::Written;
            }
            Ok(_) => "custom resolver returned invalid JSON".to_string(),
            Err(err) => format!("failed to resolve value via custom resolver: {}", err),
        };
        self.write_error_at(state, message, out);
        if custom.nullable {
            out.data.put(NULL);
            return Outcome::Written;
        }
        Outcome::NullBubble
    }

    /// Stores the value in the request variables, as a JSON string when asked to.
    fn export_field(&self, export: &FieldExport, value: &Value<'_>) {
        let value = if export.as_string && !matches!(value, Value::String(_)) {
            let json = value.to_bytes();
            Value::String(Cow::Owned(String::from_utf8_lossy(&json).into_owned()))
        } else {
            value.clone().into_owned()
        };
        trace!(variable = ?export.path, "exporting field value");
        self.ctx.export_variable(export.path.as_slice(), value);
    }

    /// Writes `null` for a nullable position, or records why a non-nullable one is null.
    fn resolve_missing(&self, state: &ResolveState, nullable: bool, out: &mut BufPair) -> Outcome {
        if nullable {
            out.data.put(NULL);
            return Outcome::Written;
        }

        trace!(path = %state.pointer(), "non-nullable value is null");
        self.write_error_at(state, "unable to resolve".to_string(), out);
        Outcome::NullBubble
    }

    fn write_error_at(&self, state: &ResolveState, message: String, out: &mut BufPair) {
        out.write_error(&GraphQLError {
            message,
            locations: (state.position.line > 0).then(|| vec![state.position]),
            path: Some(state.path.clone()),
            extensions: None,
        });
    }

    fn skipped_by_directive(&self, field: &Field) -> bool {
        let skip = field
            .skip_variable
            .as_deref()
            .is_some_and(|name| self.ctx.bool_variable(name) == Some(true));
        let excluded = field
            .include_variable
            .as_deref()
            .is_some_and(|name| self.ctx.bool_variable(name) != Some(true));
        skip || excluded
    }
}

fn write_number(value: &Value<'_>, out: &mut BytesMut) -> bool {
    match value {
        Value::I64(n) => write_i64(out, *n),
        Value::U64(n) => write_u64(out, *n),
        Value::F64(n) => write_f64(out, *n),
        _ => return false,
    }
    true
}

/// Moves a resolved item into the array in `out`. Returns `true` when the item bubbled.
fn append_item(
    outcome: Outcome,
    item_buf: &mut BufPair,
    out: &mut BufPair,
    has_previous: &mut bool,
) -> bool {
    match outcome {
        Outcome::Written => {
            merge_buf_pairs(item_buf, out, *has_previous);
            *has_previous = true;
            false
        }
        Outcome::Skipped => {
            merge_buf_pair_errors(item_buf, out);
            item_buf.reset();
            false
        }
        Outcome::NullBubble => {
            merge_buf_pair_errors(item_buf, out);
            item_buf.reset();
            true
        }
    }
}
