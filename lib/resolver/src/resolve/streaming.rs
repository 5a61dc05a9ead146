use std::collections::VecDeque;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::{sync::mpsc, time::Instant};
use tracing::{instrument, trace};

use crate::{
    buffer::{BufPair, PendingPatch},
    context::Context,
    error::ResolveError,
    fetch::ResultSet,
    json_writer::write_and_escape_string,
    plan::response::{GraphQLResponsePatch, GraphQLStreamingResponse},
    resolve::{
        state::{pointer, Outcome, ResolveState},
        Resolution, ResolvedDocument, Resolver,
    },
    response::graphql_error::GraphQLErrorPathSegment,
    utils::consts::{CLOSE_BRACE, CLOSE_BRACKET, COMMA, NULL, OPEN_BRACKET},
    value::Value,
};

/// Patch documents waiting to be sent together as one JSON array.
struct PatchBatch {
    buffer: BytesMut,
    len: usize,
    last_flush: Instant,
}

impl PatchBatch {
    fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
            len: 0,
            last_flush: Instant::now(),
        }
    }

    fn push(&mut self, document: &[u8]) {
        self.buffer.put(if self.len == 0 { OPEN_BRACKET } else { COMMA });
        self.buffer.put(document);
        self.len += 1;
    }

    async fn flush(&mut self, sender: &mpsc::Sender<Bytes>) -> Result<(), ResolveError> {
        if self.len == 0 {
            return Ok(());
        }
        self.buffer.put(CLOSE_BRACKET);
        trace!(patches = self.len, "flushing patches");
        self.len = 0;
        self.last_flush = Instant::now();
        send(sender, self.buffer.split().freeze()).await
    }
}

pub(crate) async fn send(
    sender: &mpsc::Sender<Bytes>,
    document: Bytes,
) -> Result<(), ResolveError> {
    sender
        .send(document)
        .await
        .map_err(|_| ResolveError::ChannelClosed)
}

impl Resolver {
    /// Sends the initial response document, then every patch discovered while resolving it,
    /// as arrays of patch documents.
    ///
    /// Patches are resolved in the order they were discovered, including the ones discovered
    /// while resolving other patches.
    #[instrument(level = "trace", skip_all, fields(patches = response.patches.len()))]
    pub async fn resolve_streaming_response(
        &self,
        ctx: &Context,
        response: &GraphQLStreamingResponse,
        data: Option<Bytes>,
        sender: &mpsc::Sender<Bytes>,
    ) -> Result<(), ResolveError> {
        let initial = self
            .resolve_document(
                ctx,
                &response.initial_response.data,
                data.unwrap_or_default(),
                &[],
            )
            .await?;
        send(sender, initial.document).await?;

        let flush_interval = response
            .flush_interval
            .unwrap_or(self.config.streaming.flush_interval);
        let mut queue: VecDeque<PendingPatch> = initial.patches.into();
        let mut batch = PatchBatch::new();

        while let Some(pending) = queue.pop_front() {
            if ctx.is_canceled() {
                return Err(ResolveError::Canceled);
            }
            let patch = response
                .patches
                .get(pending.index)
                .ok_or(ResolveError::MissingPatch(pending.index))?;

            let resolved = self.resolve_patch(ctx, patch, &pending).await?;
            queue.extend(resolved.patches);
            batch.push(&resolved.document);

            if flush_interval.is_zero() || batch.last_flush.elapsed() >= flush_interval {
                batch.flush(sender).await?;
            }
        }

        batch.flush(sender).await
    }

    #[instrument(level = "trace", skip_all, fields(patch_index = pending.index))]
    async fn resolve_patch(
        &self,
        ctx: &Context,
        patch: &GraphQLResponsePatch,
        pending: &PendingPatch,
    ) -> Result<ResolvedDocument, ResolveError> {
        let resolution = Resolution::new(self, ctx, pending.data.clone());
        let data = Value::parse(&pending.data)?;
        let state = ResolveState::at(pending.path.clone());
        let mut buf = self.pools.buf_pair();

        let mut results = ResultSet::default();
        let fetched;
        let (data, state) = match &patch.fetch {
            Some(fetch) => {
                resolution
                    .resolve_fetch(&state, fetch, &data, true, &mut results)
                    .await?;
                for result in results.iter() {
                    buf.write_raw_errors(&result.errors);
                }
                let buffer = results.get(0).ok_or(ResolveError::UnknownBuffer(0))?;
                fetched = Value::parse(&buffer.result.data)?;
                (&fetched, state.enter_fetch(buffer.fetch_id))
            }
            None => (&data, state),
        };

        let outcome = resolution
            .resolve_node(&state, &patch.value, data, &mut buf)
            .await?;

        let mut document = BytesMut::with_capacity(buf.data.len() + buf.errors.len() + 48);
        write_patch_document(&mut document, patch, &pending.path, &buf, outcome);

        Ok(ResolvedDocument {
            document: document.freeze(),
            patches: std::mem::take(&mut buf.patches),
        })
    }
}

/// `{"op":"replace","path":"/data/..","value":..,"errors":[..]}`
fn write_patch_document(
    out: &mut BytesMut,
    patch: &GraphQLResponsePatch,
    path: &[GraphQLErrorPathSegment],
    buf: &BufPair,
    outcome: Outcome,
) {
    out.put(&br#"{"op":"#[..]);
    write_and_escape_string(out, patch.operation.as_ref());
    out.put(&br#","path":"#[..]);
    write_and_escape_string(out, &pointer(path));
    out.put(&br#","value":"#[..]);
    match outcome {
        Outcome::Written if buf.has_data() => out.put(buf.data.as_ref()),
        _ => out.put(NULL),
    }
    if buf.has_errors() {
        out.put(&br#","errors":["#[..]);
        out.put(buf.errors.as_ref());
        out.put(CLOSE_BRACKET);
    }
    out.put(CLOSE_BRACE);
}
