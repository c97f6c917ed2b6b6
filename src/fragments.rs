//! Incremental decoding of streamed answer bodies.
//!
//! The backend writes raw UTF-8 text with no framing, so a chunk boundary can
//! fall in the middle of a multi-byte code point. `Utf8Decoder` holds such a
//! partial sequence back until the rest of it arrives.

use futures_util::stream::{self, BoxStream, Stream, StreamExt};

use crate::error::ClientError;

/// Lazy, finite sequence of decoded text fragments. Dropping it cancels the
/// underlying request.
pub type FragmentStream = BoxStream<'static, Result<String, ClientError>>;

const REPLACEMENT: char = '\u{FFFD}';

#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    /// Feed one chunk and return every complete character decoded so far.
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    break;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match err.error_len() {
                        // Incomplete sequence at the end: wait for the next chunk
                        None => {
                            self.pending.drain(..valid);
                            break;
                        }
                        Some(invalid) => {
                            out.push(REPLACEMENT);
                            self.pending.drain(..valid + invalid);
                        }
                    }
                }
            }
        }

        out
    }

    /// Flush whatever is left once the stream has ended.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            return String::new();
        }
        let tail = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        tail
    }
}

/// Turn a byte-chunk stream into a stream of decoded text fragments.
///
/// A transport error ends the sequence after being yielded once.
pub fn decode_fragments<S, B, E>(bytes: S) -> FragmentStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: Into<ClientError> + Send,
{
    let state = (Box::pin(bytes), Utf8Decoder::default(), false);

    stream::unfold(state, |(mut bytes, mut decoder, done)| async move {
        if done {
            return None;
        }
        loop {
            match bytes.next().await {
                Some(Ok(chunk)) => {
                    let text = decoder.push(chunk.as_ref());
                    if !text.is_empty() {
                        return Some((Ok(text), (bytes, decoder, false)));
                    }
                }
                Some(Err(err)) => return Some((Err(err.into()), (bytes, decoder, true))),
                None => {
                    let tail = decoder.finish();
                    if tail.is_empty() {
                        return None;
                    }
                    return Some((Ok(tail), (bytes, decoder, true)));
                }
            }
        }
    })
    .boxed()
}
