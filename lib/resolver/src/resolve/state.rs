use std::fmt::Write;

use crate::{
    plan::node::Position, response::graphql_error::GraphQLErrorPathSegment,
    utils::consts::DATA_FIELD_NAME,
};

/// What resolving a node did to its output buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Written,
    /// A non-nullable value is missing. The nearest nullable ancestor turns into `null`.
    NullBubble,
    /// Every field set was skipped by its type condition. Nothing was written.
    Skipped,
}

/// One step of the data path walked since the last fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ResponseElement {
    Field(String),
    /// The items of an array, or only the first ones when the rest is streamed later.
    List(Option<usize>),
}

/// Where the resolver currently is, in the response and in the fetched data.
///
/// `fetch_key` and `positions` together identify the current object within the results of
/// the last fetch, which is how the data loader hands every object its own result.
#[derive(Debug, Clone, Default)]
pub(crate) struct ResolveState {
    pub path: Vec<GraphQLErrorPathSegment>,
    pub position: Position,
    pub elements: Vec<ResponseElement>,
    pub positions: Vec<usize>,
    pub fetch_key: Vec<usize>,
    /// Identity of the last fetch entered, see [`LeafFetch::id`](crate::fetch::LeafFetch::id).
    pub last_fetch: Option<usize>,
    /// The data in scope was unescaped from a string. The data loader cannot walk to it.
    pub detached: bool,
}

impl ResolveState {
    pub fn at(path: Vec<GraphQLErrorPathSegment>) -> Self {
        Self {
            path,
            ..Default::default()
        }
    }

    pub fn field(&self, name: &str, position: Position) -> Self {
        let mut next = self.clone();
        next.path
            .push(GraphQLErrorPathSegment::String(name.to_string()));
        next.position = position;
        next
    }

    pub fn item(&self, index: usize) -> Self {
        let mut next = self.clone();
        next.path.push(GraphQLErrorPathSegment::Index(index));
        next.positions.push(index);
        next
    }

    pub fn item_path(&self, index: usize) -> Vec<GraphQLErrorPathSegment> {
        let mut path = self.path.clone();
        path.push(GraphQLErrorPathSegment::Index(index));
        path
    }

    /// Steps into the data at `path`, as an object does.
    pub fn enter_object(&self, path: &[String]) -> Self {
        let mut next = self.clone();
        next.elements
            .extend(path.iter().cloned().map(ResponseElement::Field));
        next
    }

    /// Steps into the items at `path`, as an array does. Items past `limit` are not resolved
    /// with the rest.
    pub fn enter_list(&self, path: &[String], limit: Option<usize>) -> Self {
        let mut next = self.enter_object(path);
        next.elements.push(ResponseElement::List(limit));
        next
    }

    /// Steps into data unescaped from a string.
    pub fn detach(mut self) -> Self {
        self.detached = true;
        self
    }

    /// Continues from the result of the fetch identified by `fetch_id`.
    pub fn enter_fetch(&self, fetch_id: usize) -> Self {
        Self {
            path: self.path.clone(),
            position: self.position,
            elements: Vec::new(),
            positions: Vec::new(),
            fetch_key: self.key(),
            last_fetch: Some(fetch_id),
            detached: self.detached,
        }
    }

    pub fn key(&self) -> Vec<usize> {
        let mut key = Vec::with_capacity(self.fetch_key.len() + self.positions.len());
        key.extend_from_slice(&self.fetch_key);
        key.extend_from_slice(&self.positions);
        key
    }

    pub fn pointer(&self) -> String {
        pointer(&self.path)
    }
}

/// JSON pointer of a response path, rooted at `/data`.
pub(crate) fn pointer(path: &[GraphQLErrorPathSegment]) -> String {
    let mut pointer = String::with_capacity(5 + path.len() * 8);
    pointer.push('/');
    pointer.push_str(DATA_FIELD_NAME);
    for segment in path {
        pointer.push('/');
        match segment {
            GraphQLErrorPathSegment::String(name) => {
                pointer.push_str(&name.replace('~', "~0").replace('/', "~1"))
            }
            GraphQLErrorPathSegment::Index(index) => {
                let _ = write!(pointer, "{}", index);
            }
        }
    }
    pointer
}
