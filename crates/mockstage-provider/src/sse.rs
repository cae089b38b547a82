//! Server-sent-events decoding, independent of the transport carrying it.
//!
//! Providers feed the response byte stream through [`data_events`] and map
//! each `data:` payload onto their own chunk shape. Keeping the framing
//! here makes the decoders unit-testable without a network.

use bytes::BytesMut;
use futures_core::Stream;
use mockstage_schema::ProviderError;
use tokio_stream::StreamExt;

/// Decode an SSE byte stream into the sequence of `data:` payloads.
///
/// Events are delimited by a blank line; multi-line events are walked
/// line by line. Buffering stays in bytes and each event is decoded only
/// once it is complete, so a multi-byte character split across network
/// reads survives intact. The OpenAI-style `[DONE]` sentinel is
/// swallowed. A transport error ends the stream with
/// `ProviderUnavailable`.
pub fn data_events(
    byte_stream: impl Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
) -> impl Stream<Item = Result<String, ProviderError>> + Send {
    async_stream::stream! {
        tokio::pin!(byte_stream);
        let mut buffer = BytesMut::new();

        while let Some(chunk_result) = byte_stream.next().await {
            match chunk_result {
                Ok(bytes) => {
                    buffer.extend_from_slice(&bytes);

                    while let Some(pos) = buffer.windows(2).position(|w| w == b"\n\n") {
                        let event = buffer.split_to(pos + 2);
                        let event_text = String::from_utf8_lossy(&event[..pos]);

                        for line in event_text.lines() {
                            let Some(data) = line.strip_prefix("data: ") else {
                                continue;
                            };
                            if data == "[DONE]" {
                                continue;
                            }
                            yield Ok(data.to_string());
                        }
                    }
                }
                Err(e) => {
                    yield Err(ProviderError::ProviderUnavailable(format!("stream error: {e}")));
                    return;
                }
            }
        }
    }
}
