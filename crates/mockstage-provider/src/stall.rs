//! Stall detection for streamed calls: a bounded wait for the first
//! fragment and between subsequent fragments. Exceeding either surfaces
//! as `ProviderUnavailable` and ends the stream.

use std::time::Duration;

use mockstage_schema::ProviderError;
use tokio_stream::StreamExt;

use crate::ChunkStream;

#[derive(Debug, Clone, Copy)]
pub struct StallTimeouts {
    pub first_fragment: Duration,
    pub between_fragments: Duration,
}

impl Default for StallTimeouts {
    fn default() -> Self {
        Self {
            first_fragment: Duration::from_secs(30),
            between_fragments: Duration::from_secs(20),
        }
    }
}

pub fn with_stall_timeout(inner: ChunkStream, timeouts: StallTimeouts) -> ChunkStream {
    let stream = async_stream::stream! {
        let mut inner = inner;
        let mut wait = timeouts.first_fragment;

        loop {
            match tokio::time::timeout(wait, inner.next()).await {
                Ok(Some(item)) => {
                    let done = item.is_err();
                    yield item;
                    if done {
                        return;
                    }
                    wait = timeouts.between_fragments;
                }
                Ok(None) => return,
                Err(_) => {
                    yield Err(ProviderError::ProviderUnavailable(format!(
                        "no stream data for {}s",
                        wait.as_secs()
                    )));
                    return;
                }
            }
        }
    };
    Box::pin(stream)
}
