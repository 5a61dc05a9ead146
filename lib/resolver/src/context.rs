use std::borrow::Cow;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use http::HeaderMap;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{
    error::ResolveError,
    hooks::{AfterFetchHook, BeforeFetchHook},
    value::Value,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameTypeName {
    pub from: String,
    pub to: String,
}

/// Request scoped inputs of a resolution: variables, transport headers, hooks and the
/// cancellation signals every data source call is bound to.
pub struct Context {
    variables: Value<'static>,
    /// Copy of `variables` with the exported field values applied. Set by the first export.
    exported: Mutex<Option<Value<'static>>>,
    headers: HeaderMap,
    rename_type_names: Vec<RenameTypeName>,
    before_fetch_hook: Option<Arc<dyn BeforeFetchHook>>,
    after_fetch_hook: Option<Arc<dyn AfterFetchHook>>,
    cancellation_token: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    pub fn new() -> Self {
        Self {
            variables: Value::Object(Vec::new()),
            exported: Mutex::new(None),
            headers: HeaderMap::new(),
            rename_type_names: Vec::new(),
            before_fetch_hook: None,
            after_fetch_hook: None,
            cancellation_token: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Sets the request variables from their JSON representation.
    pub fn with_variables(mut self, variables: &[u8]) -> Result<Self, ResolveError> {
        self.variables = Value::parse(variables)?.into_owned();
        Ok(self)
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_rename_type_names(mut self, renames: Vec<RenameTypeName>) -> Self {
        self.rename_type_names = renames;
        self
    }

    pub fn with_before_fetch_hook(mut self, hook: Arc<dyn BeforeFetchHook>) -> Self {
        self.before_fetch_hook = Some(hook);
        self
    }

    pub fn with_after_fetch_hook(mut self, hook: Arc<dyn AfterFetchHook>) -> Self {
        self.after_fetch_hook = Some(hook);
        self
    }

    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// The request variable at `path`, including values exported by fields resolved so far.
    pub fn variable<S: AsRef<str>>(&self, path: &[S]) -> Option<Cow<'_, Value<'static>>> {
        let exported = self.exported.lock().unwrap_or_else(PoisonError::into_inner);
        match exported.as_ref() {
            Some(variables) => variables.get_path(path).cloned().map(Cow::Owned),
            None => self.variables.get_path(path).map(Cow::Borrowed),
        }
    }

    /// Stores a resolved field value in the request variables.
    pub(crate) fn export_variable<S: AsRef<str>>(&self, path: &[S], value: Value<'static>) {
        let mut exported = self.exported.lock().unwrap_or_else(PoisonError::into_inner);
        exported
            .get_or_insert_with(|| self.variables.clone())
            .set_path(path, value);
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn before_fetch_hook(&self) -> Option<&Arc<dyn BeforeFetchHook>> {
        self.before_fetch_hook.as_ref()
    }

    pub fn after_fetch_hook(&self) -> Option<&Arc<dyn AfterFetchHook>> {
        self.after_fetch_hook.as_ref()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    pub fn is_canceled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn rename_type_name<'a>(&'a self, type_name: &'a str) -> &'a str {
        self.rename_type_names
            .iter()
            .find(|rename| rename.from == type_name)
            .map(|rename| rename.to.as_str())
            .unwrap_or(type_name)
    }

    /// Reads a boolean variable, used by `@skip` and `@include`.
    pub fn bool_variable(&self, name: &str) -> Option<bool> {
        self.variable(&[name]).and_then(|v| v.as_bool())
    }
}
