use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::OnceCell;
use tracing::trace;

use crate::{
    context::Context,
    error::DataSourceError,
    plan::fetch::SingleFetch,
    resolve::Resolver,
    utils::fingerprint::{call_fingerprint, ABuildHasher},
};

pub(crate) type SharedResponse = Arc<OnceCell<Result<Bytes, DataSourceError>>>;

/// Calls currently in flight, by [`call_fingerprint`].
pub(crate) type InFlightCalls = DashMap<u64, SharedResponse, ABuildHasher>;

impl Resolver {
    /// Loads through the data source unless an identical call is already in flight, in which
    /// case its response is shared. The flag tells whether the response was shared.
    pub(crate) async fn single_flight(
        &self,
        ctx: &Context,
        fetch: &SingleFetch,
        input: Bytes,
    ) -> (Result<Bytes, DataSourceError>, bool) {
        let fingerprint = call_fingerprint(
            fetch.source_id(),
            &input,
            ctx.headers(),
            &self.config.dedupe.fingerprint_headers,
        );
        let cell = self
            .in_flight
            .entry(fingerprint)
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let mut leader = false;
        let response = cell
            .get_or_init(|| {
                leader = true;
                fetch.data_source.load(ctx, input)
            })
            .await
            .clone();

        if leader {
            self.in_flight.remove(&fingerprint);
        } else {
            trace!(fingerprint, "shared response of an in-flight call");
        }

        (response, !leader)
    }
}
