pub mod renderer;
pub mod variable;

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    context::Context,
    template::variable::{Variable, VariableSource},
    utils::consts::NULL,
    value::Value,
};

#[derive(Debug, Clone, PartialEq)]
pub enum TemplateSegment {
    Static(Bytes),
    Variable(Variable),
}

/// Static bytes interleaved with variables, rendered into the input of a fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputTemplate {
    pub segments: Vec<TemplateSegment>,
}

impl InputTemplate {
    pub fn new(segments: Vec<TemplateSegment>) -> Self {
        Self { segments }
    }

    pub fn static_input(input: &'static str) -> Self {
        Self::new(vec![TemplateSegment::Static(Bytes::from_static(
            input.as_bytes(),
        ))])
    }

    pub fn push_static(mut self, input: &'static str) -> Self {
        self.segments
            .push(TemplateSegment::Static(Bytes::from_static(input.as_bytes())));
        self
    }

    pub fn push_variable(mut self, variable: Variable) -> Self {
        self.segments.push(TemplateSegment::Variable(variable));
        self
    }

    /// Renders the template against the object data in scope.
    ///
    /// With `null_on_variable_null`, a missing or null object variable turns the whole output
    /// into `null`.
    pub fn render(
        &self,
        ctx: &Context,
        data: &Value<'_>,
        null_on_variable_null: bool,
        out: &mut BytesMut,
    ) {
        let start = out.len();
        for segment in &self.segments {
            match segment {
                TemplateSegment::Static(bytes) => out.put(bytes.as_ref()),
                TemplateSegment::Variable(variable) => {
                    let value = variable.resolve(ctx, data);
                    if value.is_none()
                        && null_on_variable_null
                        && variable.source == VariableSource::Object
                    {
                        out.truncate(start);
                        out.put(NULL);
                        return;
                    }
                    variable
                        .renderer
                        .render(out, value.as_ref().map(|v| v.as_value()));
                }
            }
        }
    }

    /// Renders a template that only depends on the request, e.g. a subscription trigger.
    pub fn render_for_request(&self, ctx: &Context) -> Bytes {
        let mut out = BytesMut::new();
        self.render(ctx, &Value::Null, false, &mut out);
        out.freeze()
    }
}

impl From<Variable> for TemplateSegment {
    fn from(variable: Variable) -> Self {
        TemplateSegment::Variable(variable)
    }
}
