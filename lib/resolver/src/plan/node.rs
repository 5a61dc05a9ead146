use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::{plan::fetch::Fetch, response::graphql_error::GraphQLErrorLocation};

/// One node of a response plan.
#[derive(Clone, Debug, PartialEq)]
pub enum Node {
    Object(Object),
    Array(Array),
    Null(Null),
    String(StringNode),
    Boolean(Scalar),
    Integer(Scalar),
    Float(Scalar),
    /// A number or string emitted verbatim.
    BigInt(Scalar),
    /// A value rendered by a caller supplied [`CustomResolve`].
    Custom(CustomNode),
    EmptyObject,
    EmptyArray,
}

impl Node {
    pub fn string(path: &[&str]) -> Node {
        Node::String(StringNode {
            path: to_path(path),
            ..Default::default()
        })
    }

    pub fn boolean(path: &[&str]) -> Node {
        Node::Boolean(Scalar::new(path))
    }

    pub fn integer(path: &[&str]) -> Node {
        Node::Integer(Scalar::new(path))
    }

    pub fn float(path: &[&str]) -> Node {
        Node::Float(Scalar::new(path))
    }

    pub fn big_int(path: &[&str]) -> Node {
        Node::BigInt(Scalar::new(path))
    }

    pub fn custom(path: &[&str], resolver: Arc<dyn CustomResolve>) -> Node {
        Node::Custom(CustomNode {
            path: to_path(path),
            nullable: false,
            resolver,
        })
    }

    /// Stores the resolved value in the request variables. No-op for kinds that cannot be
    /// exported.
    pub fn exported(mut self, export: FieldExport) -> Node {
        match &mut self {
            Node::String(string) => string.export = Some(export),
            Node::Boolean(scalar)
            | Node::Integer(scalar)
            | Node::Float(scalar)
            | Node::BigInt(scalar) => scalar.export = Some(export),
            _ => {}
        }
        self
    }

    /// Marks the node as nullable. No-op for kinds without nullability.
    pub fn nullable(mut self) -> Node {
        match &mut self {
            Node::Object(object) => object.nullable = true,
            Node::Array(array) => array.nullable = true,
            Node::String(string) => string.nullable = true,
            Node::Boolean(scalar)
            | Node::Integer(scalar)
            | Node::Float(scalar)
            | Node::BigInt(scalar) => scalar.nullable = true,
            Node::Custom(custom) => custom.nullable = true,
            Node::Null(_) | Node::EmptyObject | Node::EmptyArray => {}
        }
        self
    }
}

fn to_path(path: &[&str]) -> Vec<String> {
    path.iter().map(|s| s.to_string()).collect()
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Scalar {
    pub path: Vec<String>,
    pub nullable: bool,
    pub export: Option<FieldExport>,
}

impl Scalar {
    pub fn new(path: &[&str]) -> Self {
        Self {
            path: to_path(path),
            ..Default::default()
        }
    }
}

/// Copies a resolved value into the request variables, where fetches resolved later in the
/// same request read it as a context variable, e.g. for `@export(as: "id")`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FieldExport {
    /// Variable path the value is stored at.
    pub path: Vec<String>,
    /// Store the value as a JSON string instead of as is.
    pub as_string: bool,
}

impl FieldExport {
    pub fn new(path: &[&str]) -> Self {
        Self {
            path: to_path(path),
            as_string: false,
        }
    }

    pub fn as_string(mut self) -> Self {
        self.as_string = true;
        self
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct CustomResolveError(pub String);

/// Renders the raw JSON of a value into the JSON written to the response.
pub trait CustomResolve: Send + Sync {
    fn resolve(&self, value: &[u8]) -> Result<Bytes, CustomResolveError>;
}

#[derive(Clone)]
pub struct CustomNode {
    pub path: Vec<String>,
    pub nullable: bool,
    pub resolver: Arc<dyn CustomResolve>,
}

impl fmt::Debug for CustomNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomNode")
            .field("path", &self.path)
            .field("nullable", &self.nullable)
            .finish_non_exhaustive()
    }
}

impl PartialEq for CustomNode {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
            && self.nullable == other.nullable
            && Arc::ptr_eq(&self.resolver, &other.resolver)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct StringNode {
    pub path: Vec<String>,
    pub nullable: bool,
    /// The value is a `__typename` and goes through the request's rename table.
    pub is_type_name: bool,
    /// A string holding JSON is emitted as that JSON.
    pub unescape_response_json: bool,
    pub export: Option<FieldExport>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Null {
    pub defer: Option<DeferMarker>,
}

/// Placeholder left behind by a deferred field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeferMarker {
    pub patch_index: usize,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Object {
    pub nullable: bool,
    pub path: Vec<String>,
    pub field_sets: Vec<FieldSet>,
    /// Executed before any buffer tagged field set is read.
    pub fetch: Option<Fetch>,
    /// The data at `path` is a string holding the object as JSON.
    pub unescape_response_json: bool,
}

impl Object {
    pub fn new(field_sets: Vec<FieldSet>) -> Self {
        Self {
            field_sets,
            ..Default::default()
        }
    }

    pub fn with_path(mut self, path: &[&str]) -> Self {
        self.path = to_path(path);
        self
    }

    pub fn with_fetch(mut self, fetch: Fetch) -> Self {
        self.fetch = Some(fetch);
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn into_node(self) -> Node {
        Node::Object(self)
    }
}

/// Fields sharing a data origin and a type condition.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FieldSet {
    /// Read from the result of the fetch with this buffer id instead of the object's own data.
    pub buffer_id: Option<usize>,
    /// Only resolved when the data's `__typename` is one of these.
    pub on_type_names: Option<Vec<String>>,
    pub fields: Vec<Field>,
}

impl FieldSet {
    pub fn new(fields: Vec<Field>) -> Self {
        Self {
            fields,
            ..Default::default()
        }
    }

    pub fn with_buffer(mut self, buffer_id: usize) -> Self {
        self.buffer_id = Some(buffer_id);
        self
    }

    pub fn on_type_names(mut self, type_names: &[&str]) -> Self {
        self.on_type_names = Some(to_path(type_names));
        self
    }
}

pub type Position = GraphQLErrorLocation;

#[derive(Clone, Debug, PartialEq)]
pub struct Field {
    pub name: String,
    pub value: Node,
    pub position: Position,
    pub defer: bool,
    pub stream: Option<StreamField>,
    /// `@skip(if: $var)`
    pub skip_variable: Option<String>,
    /// `@include(if: $var)`
    pub include_variable: Option<String>,
}

impl Field {
    pub fn new(name: &str, value: Node) -> Self {
        Self {
            name: name.to_string(),
            value,
            position: Position::default(),
            defer: false,
            stream: None,
            skip_variable: None,
            include_variable: None,
        }
    }

    pub fn at(mut self, line: usize, column: usize) -> Self {
        self.position = Position { line, column };
        self
    }

    pub fn deferred(mut self) -> Self {
        self.defer = true;
        self
    }

    pub fn streamed(mut self, initial_batch_size: usize) -> Self {
        self.stream = Some(StreamField { initial_batch_size });
        self
    }

    pub fn skip_if(mut self, variable: &str) -> Self {
        self.skip_variable = Some(variable.to_string());
        self
    }

    pub fn include_if(mut self, variable: &str) -> Self {
        self.include_variable = Some(variable.to_string());
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamField {
    pub initial_batch_size: usize,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Array {
    pub path: Vec<String>,
    pub nullable: bool,
    /// Resolve items concurrently instead of one after another.
    pub resolve_asynchronously: bool,
    /// Template reused for every item. Taken away when every item is streamed.
    pub item: Option<Box<Node>>,
    pub stream: Option<StreamMarker>,
}

impl Array {
    pub fn new(path: &[&str], item: Node) -> Self {
        Self {
            path: to_path(path),
            item: Some(Box::new(item)),
            ..Default::default()
        }
    }

    pub fn asynchronous(mut self) -> Self {
        self.resolve_asynchronously = true;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn into_node(self) -> Node {
        Node::Array(self)
    }
}

/// Items past `initial_batch_size` are delivered through the patch at `patch_index`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamMarker {
    pub initial_batch_size: usize,
    pub patch_index: usize,
}
