use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use ahash::AHashMap;
use bytes::Bytes;
use tokio::sync::OnceCell;
use tracing::trace;

use crate::{
    error::ResolveError,
    fetch::{FetchResult, LeafFetch},
    resolve::{
        state::{ResolveState, ResponseElement},
        Resolution,
    },
    utils::{concurrency::ConcurrencyScope, consts::NULL, fingerprint::input_hash},
    value::Value,
};

/// Results of one fetch, for every object that needs them.
///
/// Keys are absolute: the key of the parent result followed by the list positions walked
/// since. Errors of a deduplicated call are kept by the first key only.
#[derive(Debug, Default)]
pub(crate) struct FetchState {
    results: BTreeMap<Vec<usize>, FetchResult>,
}

type FetchCell = Arc<OnceCell<Result<Arc<FetchState>, ResolveError>>>;

/// Executes every fetch once per resolution pass for all objects that need it.
///
/// The first object asking for a fetch collects the inputs of all its siblings by walking
/// the data the parent fetch returned, and dispatches them together. Everybody else waits
/// for that dispatch and reads their own result from it. Fetches are told apart by
/// [`LeafFetch::id`], so a buffer id used at several places of the plan is loaded once per
/// place.
pub(crate) struct DataLoader {
    initial_data: Bytes,
    fetches: Mutex<AHashMap<usize, FetchCell>>,
}

impl DataLoader {
    pub fn new(initial_data: Bytes) -> Self {
        Self {
            initial_data,
            fetches: Mutex::new(AHashMap::new()),
        }
    }

    /// Result of `fetch` for the object at `state`.
    ///
    /// `None` when the loader cannot reach the object: its data was unescaped from a string,
    /// the parent fetch did not go through the loader, or walking the parent data did not
    /// lead to it. The caller is expected to fetch directly then.
    pub async fn load(
        &self,
        resolution: &Resolution<'_>,
        state: &ResolveState,
        fetch: LeafFetch<'_>,
    ) -> Result<Option<FetchResult>, ResolveError> {
        if state.detached {
            return Ok(None);
        }
        let parent = match state.last_fetch {
            None => None,
            Some(parent_id) => match self.loaded(parent_id) {
                Some(parent) => Some(parent),
                None => {
                    trace!(
                        buffer_id = fetch.buffer_id(),
                        "parent was not loaded by the data loader"
                    );
                    return Ok(None);
                }
            },
        };

        let cell = self.cell(fetch.id());
        let loaded = cell
            .get_or_init(|| self.dispatch(resolution, state, fetch, parent))
            .await
            .clone()?;

        let result = loaded.results.get(&state.key()).cloned();
        if result.is_none() {
            trace!(
                buffer_id = fetch.buffer_id(),
                path = %state.pointer(),
                "object was not reached by the data loader"
            );
        }
        Ok(result)
    }

    fn cell(&self, fetch_id: usize) -> FetchCell {
        self.fetches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(fetch_id)
            .or_default()
            .clone()
    }

    fn loaded(&self, fetch_id: usize) -> Option<Arc<FetchState>> {
        let cell = self
            .fetches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&fetch_id)
            .cloned()?;
        cell.get().and_then(|loaded| loaded.as_ref().ok()).cloned()
    }

    async fn dispatch(
        &self,
        resolution: &Resolution<'_>,
        state: &ResolveState,
        fetch: LeafFetch<'_>,
        parent: Option<Arc<FetchState>>,
    ) -> Result<Arc<FetchState>, ResolveError> {
        let single = fetch.single();
        let mut keys: Vec<Vec<usize>> = Vec::new();
        let mut inputs: Vec<Bytes> = Vec::new();
        {
            let mut collect = |key: &[usize], item: &Value<'_>| {
                keys.push(key.to_vec());
                inputs.push(resolution.render_input(single, item));
            };
            match &parent {
                None => {
                    let data = Value::parse(&self.initial_data)?;
                    walk(&data, &state.elements, &mut Vec::new(), &mut collect);
                }
                Some(parent) => {
                    for (key, result) in &parent.results {
                        let data = Value::parse(&result.data)?;
                        walk(&data, &state.elements, &mut key.clone(), &mut collect);
                    }
                }
            }
        }

        trace!(
            buffer_id = single.buffer_id,
            items = inputs.len(),
            "dispatching fetch for all objects"
        );

        let mut loaded = FetchState::default();
        match fetch {
            LeafFetch::Batch(batch) => {
                let results = resolution.load_batch(state, batch, &inputs).await;
                loaded.results.extend(keys.into_iter().zip(results));
            }
            LeafFetch::Single(single) => {
                let mut unique: Vec<Bytes> = Vec::new();
                let mut seen: AHashMap<u64, usize> = AHashMap::new();
                let assignments: Vec<Option<usize>> = inputs
                    .into_iter()
                    .map(|input| {
                        if input.as_ref() == NULL {
                            return None;
                        }
                        let index = *seen.entry(input_hash(&input)).or_insert_with(|| {
                            unique.push(input.clone());
                            unique.len() - 1
                        });
                        Some(index)
                    })
                    .collect();

                let mut scope = ConcurrencyScope::new(resolution.resolver.config.max_concurrency);
                for (index, input) in unique.into_iter().enumerate() {
                    scope.spawn(Box::pin(async move {
                        (
                            index,
                            resolution.load_source(state, single, input, false).await,
                        )
                    }));
                }

                let mut responses = vec![FetchResult::default(); scope.len()];
                for (index, response) in scope.join_all().await {
                    responses[index] = response;
                }

                let mut reported = vec![false; responses.len()];
                for (key, assignment) in keys.into_iter().zip(assignments) {
                    let result = match assignment {
                        None => FetchResult::null(),
                        Some(index) => {
                            let mut result = responses[index].clone();
                            if reported[index] {
                                result.errors = Bytes::new();
                            }
                            reported[index] = true;
                            result
                        }
                    };
                    loaded.results.insert(key, result);
                }
            }
        }

        Ok(Arc::new(loaded))
    }
}

/// Visits every value reached by following `elements` from `value`, with the list positions
/// taken on the way appended to `key`. Nulls are not visited.
fn walk<F>(value: &Value<'_>, elements: &[ResponseElement], key: &mut Vec<usize>, visit: &mut F)
where
    F: FnMut(&[usize], &Value<'_>),
{
    if value.is_null() {
        return;
    }
    match elements.split_first() {
        None => visit(key, value),
        Some((ResponseElement::Field(name), rest)) => {
            if let Some(next) = value.get_path(std::slice::from_ref(name)) {
                walk(next, rest, key, visit);
            }
        }
        Some((ResponseElement::List(limit), rest)) => {
            if let Value::Array(items) = value {
                let limit = limit.unwrap_or(items.len());
                for (index, item) in items.iter().enumerate().take(limit) {
                    key.push(index);
                    walk(item, rest, key, visit);
                    key.pop();
                }
            }
        }
    }
}
