//! Byte-exact copy from the upstream body to the downstream client.

use futures::StreamExt;
use tracing::trace;

use crate::upstream::{ByteStream, UpstreamError};

use super::downstream::Downstream;

#[derive(Debug)]
pub enum RelayOutcome {
    DownstreamClosed,
    /// Upstream ended the body cleanly after `bytes` bytes.
    UpstreamEnded { bytes: u64 },
    UpstreamFailed(UpstreamError),
}

/// Pump chunks in arrival order until either side finishes. Chunks are never
/// parsed, split or merged.
pub async fn relay(body: &mut ByteStream, downstream: &Downstream) -> RelayOutcome {
    let mut bytes = 0u64;
    loop {
        let next = tokio::select! {
            biased;
            _ = downstream.closed().cancelled() => return RelayOutcome::DownstreamClosed,
            next = body.next() => next,
        };

        match next {
            Some(Ok(chunk)) => {
                if chunk.is_empty() {
                    continue;
                }
                bytes += chunk.len() as u64;
                trace!(len = chunk.len(), "relaying chunk");
                if !downstream.send(chunk).await {
                    return RelayOutcome::DownstreamClosed;
                }
            }
            Some(Err(e)) => return RelayOutcome::UpstreamFailed(e),
            None => return RelayOutcome::UpstreamEnded { bytes },
        }
    }
}
