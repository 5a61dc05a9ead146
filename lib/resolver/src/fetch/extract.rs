use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    error::DataSourceError,
    fetch::FetchResult,
    json_writer::write_value,
    plan::fetch::ProcessResponseConfig,
    utils::consts::{COMMA, DATA_FIELD_NAME, ENTITIES_FIELD_NAME, ERRORS_FIELD_NAME},
    value::Value,
};

/// Splits a raw data source response into the data the plan reads and the errors forwarded
/// to the client.
///
/// With entity extraction, a batched call keeps the whole `_entities` array so it can be
/// demultiplexed. A single call reads its one entity.
pub(crate) fn extract_response(
    response: &Bytes,
    config: ProcessResponseConfig,
    batched: bool,
) -> FetchResult {
    if response.is_empty() {
        return FetchResult::default();
    }

    let value = match Value::parse(response) {
        Ok(value) => value,
        Err(err) => {
            return FetchResult::from_error(
                &DataSourceError::InvalidResponse(err.to_string()).to_graphql_error(),
            )
        }
    };

    if !config.extract_graphql_response {
        return FetchResult {
            data: response.clone(),
            errors: Bytes::new(),
        };
    }

    let mut errors = BytesMut::new();
    if let Some(Value::Array(items)) = value.get(ERRORS_FIELD_NAME) {
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                errors.put(COMMA);
            }
            write_value(&mut errors, item);
        }
    }

    let mut data = value.get(DATA_FIELD_NAME).filter(|data| !data.is_null());
    if config.extract_federation_entities {
        data = data.and_then(|data| data.get(ENTITIES_FIELD_NAME));
        if !batched {
            data = data
                .and_then(|entities| entities.as_array())
                .and_then(|entities| entities.first());
        }
    }

    FetchResult {
        data: data.map(|data| data.to_bytes()).unwrap_or_default(),
        errors: errors.freeze(),
    }
}
