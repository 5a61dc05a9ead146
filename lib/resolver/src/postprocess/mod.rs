//! Rewrites plans for incremental delivery, before they are executed.

mod defer;
mod stream;

use tracing::{debug, instrument};

use crate::plan::{
    node::Node,
    response::{GraphQLResponsePatch, GraphQLStreamingResponse, Plan},
};

/// Applies the `@defer` and then the `@stream` rewrite to a plan.
///
/// A synchronous plan that ends up with patches becomes a streaming one, a plan without
/// deferred or streamed fields is returned as it came. Subscriptions are not rewritten.
#[instrument(level = "trace", skip_all)]
pub fn process(plan: Plan) -> Plan {
    match plan {
        Plan::Synchronous(mut response) => {
            let mut patches = Vec::new();
            rewrite(&mut response.data, &mut patches);
            if patches.is_empty() {
                return Plan::Synchronous(response);
            }
            debug!(patches = patches.len(), "plan is delivered incrementally");
            Plan::Streaming(GraphQLStreamingResponse {
                initial_response: response,
                patches,
                flush_interval: None,
            })
        }
        Plan::Streaming(mut response) => {
            rewrite(&mut response.initial_response.data, &mut response.patches);
            Plan::Streaming(response)
        }
        subscription @ Plan::Subscription(_) => subscription,
    }
}

fn rewrite(root: &mut Node, patches: &mut Vec<GraphQLResponsePatch>) {
    let existing = patches.len();
    defer::process_node(root, patches);
    for_each_patch(patches, existing, defer::process_node);
    stream::process_node(root, patches);
    for_each_patch(patches, existing, stream::process_node);
}

/// Runs `process` on the value of every patch from `from` on, including the patches it adds.
fn for_each_patch(
    patches: &mut Vec<GraphQLResponsePatch>,
    from: usize,
    process: fn(&mut Node, &mut Vec<GraphQLResponsePatch>),
) {
    let mut index = from;
    while index < patches.len() {
        let mut value = std::mem::replace(&mut patches[index].value, Node::EmptyObject);
        process(&mut value, patches);
        patches[index].value = value;
        index += 1;
    }
}
