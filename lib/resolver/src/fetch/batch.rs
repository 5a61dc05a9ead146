use std::collections::hash_map::Entry;

use ahash::AHashMap;
use bytes::{Bytes, BytesMut};
use tracing::{trace, warn};

use crate::{
    connector::{Batch, BatchFactory},
    error::DataSourceError,
    fetch::FetchResult,
    plan::fetch::BatchFetch,
    resolve::{state::ResolveState, Resolution},
    response::graphql_error::GraphQLError,
    utils::{
        consts::{COMMA, NULL},
        fingerprint::input_hash,
    },
    value::Value,
};

/// Joins per-item inputs into one call, e.g. the `representations` of an `_entities` query.
///
/// Identical inputs are sent once and `null` inputs are left out.
#[derive(Debug, Clone)]
pub struct EntityBatchFactory {
    prefix: Bytes,
    suffix: Bytes,
}

impl EntityBatchFactory {
    pub fn new(prefix: impl Into<Bytes>, suffix: impl Into<Bytes>) -> Self {
        Self {
            prefix: prefix.into(),
            suffix: suffix.into(),
        }
    }
}

impl BatchFactory for EntityBatchFactory {
    fn create_batch(&self, inputs: &[Bytes]) -> Result<Batch, DataSourceError> {
        let items_len: usize = inputs.iter().map(|i| i.len() + 1).sum();
        let mut input =
            BytesMut::with_capacity(self.prefix.len() + self.suffix.len() + items_len);
        let mut out_to_in_positions: Vec<Vec<usize>> = Vec::new();
        let mut seen: AHashMap<u64, usize> = AHashMap::new();

        input.extend_from_slice(&self.prefix);
        for (position, item) in inputs.iter().enumerate() {
            if item.is_empty() || item.as_ref() == NULL {
                continue;
            }
            match seen.entry(input_hash(item)) {
                Entry::Occupied(existing) => out_to_in_positions[*existing.get()].push(position),
                Entry::Vacant(vacant) => {
                    if !out_to_in_positions.is_empty() {
                        input.extend_from_slice(COMMA);
                    }
                    input.extend_from_slice(item);
                    vacant.insert(out_to_in_positions.len());
                    out_to_in_positions.push(vec![position]);
                }
            }
        }
        input.extend_from_slice(&self.suffix);

        Ok(Batch {
            input: input.freeze(),
            out_to_in_positions,
        })
    }
}

/// Splits a batched response back into one result per input position.
///
/// The response data must be an array with one element per batch output. When it is not,
/// every position that took part in the batch gets an error instead of data. Errors of the
/// call itself go to the first position so they are reported once.
pub(crate) fn demultiplex(
    response: FetchResult,
    batch: &Batch,
    positions: usize,
) -> Vec<FetchResult> {
    let mut results = vec![FetchResult::default(); positions];
    let first_position = batch
        .out_to_in_positions
        .iter()
        .flatten()
        .next()
        .copied();

    if let Some(first) = first_position.and_then(|p| results.get_mut(p)) {
        first.errors = response.errors.clone();
    }

    if response.data.is_empty() {
        return results;
    }

    let items = match Value::parse(&response.data) {
        Ok(Value::Array(items)) => items,
        _ => {
            warn!("batched response data is not an array");
            return fail_all(results, batch, "batched response is not a list".to_string());
        }
    };

    if items.len() != batch.out_to_in_positions.len() {
        warn!(
            expected = batch.out_to_in_positions.len(),
            received = items.len(),
            "batched response has the wrong number of items"
        );
        let message = format!(
            "batched response returned {} items, expected {}",
            items.len(),
            batch.out_to_in_positions.len()
        );
        return fail_all(results, batch, message);
    }

    for (item, in_positions) in items.iter().zip(&batch.out_to_in_positions) {
        let data = item.to_bytes();
        for position in in_positions {
            if let Some(result) = results.get_mut(*position) {
                result.data = data.clone();
            }
        }
    }

    results
}

fn fail_all(mut results: Vec<FetchResult>, batch: &Batch, message: String) -> Vec<FetchResult> {
    let error = DataSourceError::InvalidResponse(message).to_graphql_error();
    for position in batch.out_to_in_positions.iter().flatten() {
        if let Some(result) = results.get_mut(*position) {
            result.data = Bytes::new();
            result.append_error(&error);
        }
    }
    results
}

impl Resolution<'_> {
    /// Loads all `inputs` with one batched call and returns a result per input position.
    pub(crate) async fn load_batch(
        &self,
        state: &ResolveState,
        batch: &BatchFetch,
        inputs: &[Bytes],
    ) -> Vec<FetchResult> {
        let created = match batch.batch_factory.create_batch(inputs) {
            Ok(created) => created,
            Err(err) => {
                warn!(error = %err, buffer_id = batch.fetch.buffer_id, "failed to create batch");
                let mut results = vec![FetchResult::default(); inputs.len()];
                if let Some(first) = results.first_mut() {
                    first.append_error(&err.to_graphql_error());
                }
                return results;
            }
        };

        if created.out_to_in_positions.is_empty() {
            trace!(
                buffer_id = batch.fetch.buffer_id,
                "every batch input is null, skipping the call"
            );
            return vec![FetchResult::null(); inputs.len()];
        }

        let response = self
            .load_source(state, &batch.fetch, created.input.clone(), true)
            .await;
        demultiplex(response, &created, inputs.len())
    }
}

impl FetchResult {
    pub(crate) fn append_error(&mut self, error: &GraphQLError) {
        let mut errors = BytesMut::from(self.errors.as_ref());
        if !errors.is_empty() {
            errors.extend_from_slice(b",");
        }
        error.write_to(&mut errors);
        self.errors = errors.freeze();
    }
}
