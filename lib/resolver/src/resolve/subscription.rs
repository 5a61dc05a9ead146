use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

use crate::{
    context::Context,
    error::ResolveError,
    fetch::extract::extract_response,
    plan::response::GraphQLSubscription,
    resolve::{streaming::send, Resolver},
};

/// Events buffered between the subscription source and the resolver.
const EVENT_BUFFER: usize = 32;

impl Resolver {
    /// Starts the subscription source and sends one response document per event.
    ///
    /// Returns once the source is done, the request is canceled or the resolver shuts down.
    /// The source is canceled on the way out in every case.
    #[instrument(level = "trace", skip_all)]
    pub async fn resolve_subscription(
        &self,
        ctx: &Context,
        subscription: &GraphQLSubscription,
        sender: &mpsc::Sender<Bytes>,
    ) -> Result<(), ResolveError> {
        let trigger = &subscription.trigger;
        let input = trigger.input.render_for_request(ctx);
        let cancel = self.shutdown.child_token();
        let (events_tx, mut events) = mpsc::channel::<Bytes>(EVENT_BUFFER);

        let producer = trigger.source.start(cancel.clone(), input, events_tx);

        let consumer = async {
            let result = loop {
                let event = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break Ok(()),
                    _ = ctx.cancellation_token().cancelled() => break Ok(()),
                    event = events.recv() => event,
                };
                let Some(event) = event else {
                    debug!("subscription source closed");
                    break Ok(());
                };

                let extracted = extract_response(&event, trigger.process_response_config, false);
                let resolved = match self
                    .resolve_document(
                        ctx,
                        &subscription.response.data,
                        extracted.data,
                        &extracted.errors,
                    )
                    .await
                {
                    Ok(resolved) => resolved,
                    Err(err) => break Err(err),
                };
                if let Err(err) = send(sender, resolved.document).await {
                    break Err(err);
                }
            };
            cancel.cancel();
            result
        };

        let (started, consumed) = tokio::join!(producer, consumer);
        if let Err(err) = started {
            warn!(error = %err, "subscription source failed");
            return Err(ResolveError::Subscription(err.to_string()));
        }
        consumed
    }
}
