use std::borrow::Cow;

use crate::{context::Context, template::renderer::VariableRenderer, value::Value};

/// Where a variable reads its value from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableSource {
    /// The data of the object the fetch belongs to.
    Object,
    /// The variables of the request.
    Context,
    /// A transport header of the request. The path holds the header name.
    Header,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub source: VariableSource,
    pub path: Vec<String>,
    pub renderer: VariableRenderer,
}

impl Variable {
    pub fn object(path: &[&str], renderer: VariableRenderer) -> Self {
        Self::new(VariableSource::Object, path, renderer)
    }

    pub fn context(path: &[&str], renderer: VariableRenderer) -> Self {
        Self::new(VariableSource::Context, path, renderer)
    }

    pub fn header(name: &str, renderer: VariableRenderer) -> Self {
        Self::new(VariableSource::Header, &[name], renderer)
    }

    fn new(source: VariableSource, path: &[&str], renderer: VariableRenderer) -> Self {
        Self {
            source,
            path: path.iter().map(|s| s.to_string()).collect(),
            renderer,
        }
    }

    /// Looks the variable up. `None` when the value is missing or JSON `null`.
    pub(crate) fn resolve<'v>(
        &self,
        ctx: &'v Context,
        data: &'v Value<'v>,
    ) -> Option<VariableValue<'v>> {
        match self.source {
            VariableSource::Object => data
                .get_path(self.path.as_slice())
                .filter(|v| !v.is_null())
                .map(VariableValue::Borrowed),
            VariableSource::Context => match ctx.variable(self.path.as_slice())? {
                Cow::Borrowed(value) if !value.is_null() => Some(VariableValue::Borrowed(value)),
                Cow::Owned(value) if !value.is_null() => Some(VariableValue::Owned(value)),
                _ => None,
            },
            VariableSource::Header => {
                let name = self.path.first()?;
                let mut joined: Option<String> = None;
                // HeaderMap lookups are case-insensitive
                for value in ctx.headers().get_all(name.as_str()) {
                    let value = String::from_utf8_lossy(value.as_bytes());
                    match joined.as_mut() {
                        Some(joined) => {
                            joined.push(',');
                            joined.push_str(&value);
                        }
                        None => joined = Some(value.into_owned()),
                    }
                }
                joined.map(|s| VariableValue::Owned(Value::String(Cow::Owned(s))))
            }
        }
    }
}

pub(crate) enum VariableValue<'v> {
    Borrowed(&'v Value<'v>),
    Owned(Value<'static>),
}

impl<'v> VariableValue<'v> {
    pub(crate) fn as_value(&self) -> &Value<'v> {
        match self {
            VariableValue::Borrowed(value) => value,
            VariableValue::Owned(value) => value,
        }
    }
}
