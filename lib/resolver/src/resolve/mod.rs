mod node;
pub(crate) mod state;
mod streaming;
mod subscription;

use bytes::{BufMut, Bytes, BytesMut};
use dashmap::DashMap;
use hive_router_resolver_config::ResolverConfig;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::{
    buffer::{BufPair, PendingPatch, Pools},
    context::Context,
    error::ResolveError,
    fetch::single_flight::InFlightCalls,
    loader::DataLoader,
    plan::{node::Node, response::GraphQLResponse},
    resolve::state::{Outcome, ResolveState},
    utils::{
        consts::{CLOSE_BRACE, CLOSE_BRACKET, COMMA, EMPTY_OBJECT, NULL, OPEN_BRACE},
        fingerprint::ABuildHasher,
    },
    value::Value,
};

/// Buffers kept around per pool once released.
const MAX_IDLE_BUFFERS: usize = 1024;

/// Executes response plans. One instance is shared by all requests: it owns the buffer pools,
/// the table of in-flight data source calls and the shutdown signal of subscriptions.
pub struct Resolver {
    pub(crate) config: ResolverConfig,
    pub(crate) pools: Pools,
    pub(crate) in_flight: InFlightCalls,
    shutdown: CancellationToken,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new(ResolverConfig::default())
    }
}

impl Resolver {
    pub fn new(config: ResolverConfig) -> Self {
        debug!(
            data_loader = config.data_loader.enabled,
            dedupe = config.dedupe.enabled,
            max_concurrency = config.max_concurrency,
            log_filter = %config.log.env_filter(),
            "creating resolver"
        );
        Self {
            config,
            pools: Pools::new(MAX_IDLE_BUFFERS),
            in_flight: DashMap::with_hasher(ABuildHasher::default()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Stops every running subscription. Requests that are not subscriptions are unaffected.
    pub fn shutdown(&self) {
        debug!("shutting down resolver");
        self.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Resolves `response` against `data`, the result of the root fetch if the caller already
    /// has it, and returns the response document.
    #[instrument(level = "trace", skip_all)]
    pub async fn resolve_graphql_response(
        &self,
        ctx: &Context,
        response: &GraphQLResponse,
        data: Option<Bytes>,
    ) -> Result<Bytes, ResolveError> {
        let resolved = self
            .resolve_document(ctx, &response.data, data.unwrap_or_default(), &[])
            .await?;
        Ok(resolved.document)
    }

    /// Resolves `node` from the root and renders a complete response document.
    /// `initial_errors` are reported ahead of everything the resolution adds.
    pub(crate) async fn resolve_document(
        &self,
        ctx: &Context,
        node: &Node,
        data: Bytes,
        initial_errors: &[u8],
    ) -> Result<ResolvedDocument, ResolveError> {
        if ctx.is_canceled() {
            return Err(ResolveError::Canceled);
        }

        let data = if data.is_empty() {
            Bytes::from_static(EMPTY_OBJECT)
        } else {
            data
        };
        let resolution = Resolution::new(self, ctx, data.clone());
        let value = Value::parse(&data)?;
        let state = ResolveState::default();

        let mut buf = self.pools.buf_pair();
        buf.write_raw_errors(initial_errors);
        let outcome = resolution
            .resolve_node(&state, node, &value, &mut buf)
            .await?;

        let mut document = BytesMut::with_capacity(buf.data.len() + buf.errors.len() + 24);
        write_document(&mut document, &buf, outcome);

        Ok(ResolvedDocument {
            document: document.freeze(),
            patches: std::mem::take(&mut buf.patches),
        })
    }
}

pub(crate) struct ResolvedDocument {
    pub document: Bytes,
    pub patches: Vec<PendingPatch>,
}

/// Writes `{"errors":[..],"data":..}`. `errors` is left out when there are none and `data`
/// when nothing was resolved. A root that had to be nulled is written as `"data":null`.
fn write_document(out: &mut BytesMut, buf: &BufPair, outcome: Outcome) {
    out.put(OPEN_BRACE);
    let mut has_previous = false;
    if buf.has_errors() {
        out.put(&br#""errors":["#[..]);
        out.put(buf.errors.as_ref());
        out.put(CLOSE_BRACKET);
        has_previous = true;
    }

    let data: Option<&[u8]> = match outcome {
        Outcome::Written if buf.has_data() => Some(buf.data.as_ref()),
        Outcome::Written => None,
        Outcome::NullBubble | Outcome::Skipped => Some(NULL),
    };
    if let Some(data) = data {
        if has_previous {
            out.put(COMMA);
        }
        out.put(&br#""data":"#[..]);
        out.put(data);
    }
    out.put(CLOSE_BRACE);
}

/// One resolution pass over a plan tree: the request it belongs to and the data loader
/// caching its fetches.
pub(crate) struct Resolution<'r> {
    pub(crate) resolver: &'r Resolver,
    pub(crate) ctx: &'r Context,
    pub(crate) loader: Option<DataLoader>,
}

impl<'r> Resolution<'r> {
    pub fn new(resolver: &'r Resolver, ctx: &'r Context, initial_data: Bytes) -> Self {
        Self {
            resolver,
            ctx,
            loader: resolver
                .config
                .data_loader
                .enabled
                .then(|| DataLoader::new(initial_data)),
        }
    }
}
