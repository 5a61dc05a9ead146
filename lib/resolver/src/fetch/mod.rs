pub mod batch;
pub(crate) mod extract;
pub(crate) mod single_flight;

use bytes::{Bytes, BytesMut};
use tokio::time::{timeout_at, Instant};
use tracing::{instrument, trace, warn};

use crate::{
    error::{DataSourceError, ResolveError},
    fetch::extract::extract_response,
    hooks::{run_hook, HookContext},
    plan::fetch::{BatchFetch, Fetch, SingleFetch},
    resolve::{state::ResolveState, Resolution},
    response::graphql_error::GraphQLError,
    utils::{concurrency::ConcurrencyScope, consts::NULL},
    value::Value,
};

/// What one fetch produced for one object: its data and the comma separated errors to
/// forward.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct FetchResult {
    /// Empty when there is no data.
    pub data: Bytes,
    pub errors: Bytes,
}

impl FetchResult {
    pub fn null() -> Self {
        Self {
            data: Bytes::from_static(NULL),
            errors: Bytes::new(),
        }
    }

    pub fn from_error(error: &GraphQLError) -> Self {
        let mut errors = BytesMut::new();
        error.write_to(&mut errors);
        Self {
            data: Bytes::new(),
            errors: errors.freeze(),
        }
    }
}

/// Fetch results of one object, by buffer id, in the order the fetches are declared.
#[derive(Debug, Default)]
pub(crate) struct ResultSet {
    buffers: Vec<Buffer>,
}

#[derive(Debug)]
pub(crate) struct Buffer {
    pub buffer_id: usize,
    /// [`LeafFetch::id`] of the fetch that produced the result.
    pub fetch_id: usize,
    pub result: FetchResult,
}

impl ResultSet {
    pub fn insert(&mut self, fetch: LeafFetch<'_>, result: FetchResult) {
        let buffer = Buffer {
            buffer_id: fetch.buffer_id(),
            fetch_id: fetch.id(),
            result,
        };
        match self
            .buffers
            .iter_mut()
            .find(|existing| existing.buffer_id == buffer.buffer_id)
        {
            Some(existing) => *existing = buffer,
            None => self.buffers.push(buffer),
        }
    }

    pub fn get(&self, buffer_id: usize) -> Option<&Buffer> {
        self.buffers
            .iter()
            .find(|buffer| buffer.buffer_id == buffer_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FetchResult> {
        self.buffers.iter().map(|buffer| &buffer.result)
    }
}

#[derive(Clone, Copy)]
pub(crate) enum LeafFetch<'a> {
    Single(&'a SingleFetch),
    Batch(&'a BatchFetch),
}

impl<'a> LeafFetch<'a> {
    pub fn single(&self) -> &'a SingleFetch {
        match self {
            LeafFetch::Single(single) => single,
            LeafFetch::Batch(batch) => &batch.fetch,
        }
    }

    pub fn buffer_id(&self) -> usize {
        self.single().buffer_id
    }

    /// Tells the fetch apart from every other fetch of the plan being resolved, including
    /// the ones using the same buffer id elsewhere in the tree.
    pub fn id(&self) -> usize {
        self.single() as *const SingleFetch as usize
    }
}

fn leaves<'a>(fetch: &'a Fetch, out: &mut Vec<LeafFetch<'a>>) {
    match fetch {
        Fetch::Single(single) => out.push(LeafFetch::Single(single)),
        Fetch::Batch(batch) => out.push(LeafFetch::Batch(batch)),
        Fetch::Parallel(fetches) => {
            for fetch in fetches {
                leaves(fetch, out);
            }
        }
    }
}

impl Resolution<'_> {
    /// Executes `fetch` for the object at `state` and stores what every leaf fetch produced.
    ///
    /// Members of a parallel fetch run concurrently. A data source failure is recorded as an
    /// error of its result, only internal failures abort.
    #[instrument(level = "trace", skip_all)]
    pub(crate) async fn resolve_fetch(
        &self,
        state: &ResolveState,
        fetch: &Fetch,
        data: &Value<'_>,
        allow_loader: bool,
        results: &mut ResultSet,
    ) -> Result<(), ResolveError> {
        let mut fetches = Vec::new();
        leaves(fetch, &mut fetches);

        if let [leaf] = fetches.as_slice() {
            let result = self.resolve_leaf_fetch(state, *leaf, data, allow_loader).await?;
            results.insert(*leaf, result);
            return Ok(());
        }

        let mut scope = ConcurrencyScope::new(self.resolver.config.max_concurrency);
        for (index, leaf) in fetches.iter().copied().enumerate() {
            scope.spawn(Box::pin(async move {
                (
                    index,
                    self.resolve_leaf_fetch(state, leaf, data, allow_loader).await,
                )
            }));
        }

        let mut slots: Vec<Option<Result<FetchResult, ResolveError>>> =
            (0..fetches.len()).map(|_| None).collect();
        for (index, result) in scope.join_all().await {
            slots[index] = Some(result);
        }
        for (leaf, result) in fetches.iter().zip(slots) {
            if let Some(result) = result {
                results.insert(*leaf, result?);
            }
        }

        Ok(())
    }

    async fn resolve_leaf_fetch(
        &self,
        state: &ResolveState,
        fetch: LeafFetch<'_>,
        data: &Value<'_>,
        allow_loader: bool,
    ) -> Result<FetchResult, ResolveError> {
        if allow_loader && !fetch.single().disable_data_loader {
            if let Some(loader) = &self.loader {
                if let Some(result) = loader.load(self, state, fetch).await? {
                    return Ok(result);
                }
            }
        }

        let input = self.render_input(fetch.single(), data);
        Ok(match fetch {
            LeafFetch::Single(single) => self.load_source(state, single, input, false).await,
            LeafFetch::Batch(batch) => self
                .load_batch(state, batch, std::slice::from_ref(&input))
                .await
                .pop()
                .unwrap_or_default(),
        })
    }

    /// Renders the fetch input for the object data in scope.
    pub(crate) fn render_input(&self, fetch: &SingleFetch, data: &Value<'_>) -> Bytes {
        let mut scratch = self.resolver.pools.scratch();
        fetch.input.render(
            self.ctx,
            data,
            fetch.set_template_output_to_null_on_variable_null,
            &mut scratch,
        );
        Bytes::copy_from_slice(&scratch)
    }

    /// Calls the data source of `fetch` with a rendered input, running the fetch hooks around
    /// it. Never fails: every failure becomes an error of the result.
    pub(crate) async fn load_source(
        &self,
        state: &ResolveState,
        fetch: &SingleFetch,
        input: Bytes,
        batched: bool,
    ) -> FetchResult {
        if input.as_ref() == NULL {
            trace!(buffer_id = fetch.buffer_id, "input rendered to null, skipping the call");
            return FetchResult::null();
        }

        let hook_ctx = (self.ctx.before_fetch_hook().is_some()
            || self.ctx.after_fetch_hook().is_some())
        .then(|| HookContext {
            current_path: state.pointer(),
        });

        if let (Some(hook), Some(hook_ctx)) = (self.ctx.before_fetch_hook(), &hook_ctx) {
            run_hook("before_fetch", &hook_ctx.current_path, || {
                hook.on_before_fetch(hook_ctx, &input)
            });
        }

        let (response, shared) = self.call_data_source(fetch, input).await;

        match response {
            Ok(bytes) => {
                if let (Some(hook), Some(hook_ctx)) = (self.ctx.after_fetch_hook(), &hook_ctx) {
                    run_hook("after_fetch", &hook_ctx.current_path, || {
                        hook.on_data(hook_ctx, &bytes, shared)
                    });
                }
                extract_response(&bytes, fetch.process_response_config, batched)
            }
            Err(err) => {
                warn!(error = %err, buffer_id = fetch.buffer_id, "data source call failed");
                let result = FetchResult::from_error(&err.to_graphql_error());
                if let (Some(hook), Some(hook_ctx)) = (self.ctx.after_fetch_hook(), &hook_ctx) {
                    run_hook("after_fetch", &hook_ctx.current_path, || {
                        hook.on_error(hook_ctx, &result.errors, shared)
                    });
                }
                result
            }
        }
    }

    /// Bounds the call by the request's cancellation, its deadline and the configured fetch
    /// timeout, whichever comes first.
    async fn call_data_source(
        &self,
        fetch: &SingleFetch,
        input: Bytes,
    ) -> (Result<Bytes, DataSourceError>, bool) {
        let config = &self.resolver.config;
        let call = async {
            if config.dedupe.enabled && !fetch.disallow_single_flight {
                self.resolver.single_flight(self.ctx, fetch, input).await
            } else {
                (fetch.data_source.load(self.ctx, input).await, false)
            }
        };

        let started = Instant::now();
        let deadline = match (self.ctx.deadline(), config.fetch_timeout) {
            (Some(deadline), Some(timeout)) => Some(deadline.min(started + timeout)),
            (Some(deadline), None) => Some(deadline),
            (None, Some(timeout)) => Some(started + timeout),
            (None, None) => None,
        };

        let bounded = async {
            match deadline {
                Some(deadline) => match timeout_at(deadline, call).await {
                    Ok(response) => response,
                    Err(_) => (
                        Err(DataSourceError::Timeout(
                            deadline.saturating_duration_since(started),
                        )),
                        false,
                    ),
                },
                None => call.await,
            }
        };

        tokio::select! {
            biased;
            _ = self.ctx.cancellation_token().cancelled() => {
                (Err(DataSourceError::Canceled), false)
            }
            response = bounded => response,
        }
    }
}
