use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{context::Context, error::DataSourceError};

/// A backend the resolver loads data from. The input is the rendered fetch template, the output
/// the raw response body.
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn load(&self, ctx: &Context, input: Bytes) -> Result<Bytes, DataSourceError>;
}

/// A backend that pushes events.
///
/// `start` pushes raw event payloads into `next` until `cancel` fires, then drops the sender.
/// Implementations may either run until canceled or hand the sender to a background task and
/// return right away.
#[async_trait]
pub trait SubscriptionDataSource: Send + Sync {
    async fn start(
        &self,
        cancel: CancellationToken,
        input: Bytes,
        next: mpsc::Sender<Bytes>,
    ) -> Result<(), DataSourceError>;
}

/// One combined backend call built from N per-item inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub input: Bytes,
    /// For every element of the response array, the input positions it answers.
    pub out_to_in_positions: Vec<Vec<usize>>,
}

pub trait BatchFactory: Send + Sync {
    fn create_batch(&self, inputs: &[Bytes]) -> Result<Batch, DataSourceError>;
}
