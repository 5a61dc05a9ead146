use std::sync::Arc;
use std::time::Duration;

use crate::{
    connector::SubscriptionDataSource,
    plan::{
        fetch::{Fetch, ProcessResponseConfig},
        node::Node,
    },
    template::InputTemplate,
};

#[derive(Clone, Debug, PartialEq)]
pub struct GraphQLResponse {
    pub data: Node,
}

impl GraphQLResponse {
    pub fn new(data: Node) -> Self {
        Self { data }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum PatchOperation {
    /// Replaces a deferred placeholder.
    Replace,
    /// Appends a streamed list item.
    Add,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GraphQLResponsePatch {
    pub operation: PatchOperation,
    pub value: Node,
    /// Executed before `value` is resolved, its result is read from buffer `0`.
    pub fetch: Option<Fetch>,
}

/// A response delivered incrementally: the initial response, then patches.
#[derive(Clone, Debug, PartialEq)]
pub struct GraphQLStreamingResponse {
    pub initial_response: GraphQLResponse,
    /// Ordered by discovery. Indexes are referenced from the plan and never change.
    pub patches: Vec<GraphQLResponsePatch>,
    /// Overrides the configured flush interval.
    pub flush_interval: Option<Duration>,
}

#[derive(Clone)]
pub struct SubscriptionTrigger {
    pub input: InputTemplate,
    pub source: Arc<dyn SubscriptionDataSource>,
    pub process_response_config: ProcessResponseConfig,
}

impl std::fmt::Debug for SubscriptionTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionTrigger")
            .field("input", &self.input)
            .field("process_response_config", &self.process_response_config)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Debug)]
pub struct GraphQLSubscription {
    pub trigger: SubscriptionTrigger,
    pub response: GraphQLResponse,
}

/// A prepared plan, as handed over by the planner.
#[derive(Clone, Debug)]
pub enum Plan {
    Synchronous(GraphQLResponse),
    Streaming(GraphQLStreamingResponse),
    Subscription(GraphQLSubscription),
}
