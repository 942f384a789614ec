use crate::fetch::ByteStream;
use crate::transform::{TranscodeOptions, Transcoder, TransformRequest};
use crate::ProxyError;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use std::sync::Arc;

/// Turns an upstream body stream into the encoded output for one request.
#[derive(Clone)]
pub struct TransformPipeline {
    transcoder: Arc<dyn Transcoder>,
    max_input_size: usize,
}

impl TransformPipeline {
    pub fn new(transcoder: Arc<dyn Transcoder>, max_input_size: usize) -> Self {
        Self { transcoder, max_input_size }
    }

    /// Drains `stream` under the input size limit, then transcodes on the
    /// blocking pool.
    ///
    /// The decoders need random access to the source, so chunks are gathered
    /// as they arrive into a buffer that never exceeds `max_input_size`; an
    /// oversized body is rejected at the chunk that crosses the limit rather
    /// than after the download completes. The returned buffer is the whole
    /// encoded image; nothing is handed out before the encoder finishes.
    ///
    /// # Errors
    /// - `UpstreamFetch` when the body stream fails mid-way
    /// - `InputTooLarge` when the body exceeds `max_input_size`
    /// - `Transform` when decoding or encoding fails
    pub async fn transform(&self, mut stream: ByteStream, req: &TransformRequest) -> Result<Bytes, ProxyError> {
        let mut buf = BytesMut::with_capacity(8192);

        while let Some(chunk) = stream.next().await.transpose()? {
            if buf.len() + chunk.len() > self.max_input_size {
                return Err(ProxyError::InputTooLarge { limit: self.max_input_size });
            }
            buf.extend_from_slice(&chunk);
        }

        let input = buf.freeze();
        let options = TranscodeOptions::from(req);
        let transcoder = Arc::clone(&self.transcoder);

        tracing::debug!("Transcoding {} source bytes with {:?}", input.len(), options);

        let encoded = tokio::task::spawn_blocking(move || transcoder.transcode(&input, &options))
            .await
            .map_err(|e| ProxyError::Internal(format!("transcode task failed: {}", e)))??;

        Ok(Bytes::from(encoded))
    }
}
