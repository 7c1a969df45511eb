/// Chunk codec — turns raw socket bytes into text without framing.
///
/// The chat protocol has no delimiter of its own: whatever arrived is one
/// logical unit. The decoder yields all complete UTF-8 text currently
/// buffered, holding back only a multi-byte sequence cut off at the end.
use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::Decoder;

/// Separator between lines queued in the same tick.
const LINE_SEPARATOR: &[u8] = b"\n";

/// Codec error: undecodable text or an I/O error from the framed stream.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("invalid UTF-8 at byte {0}")]
    InvalidUtf8(usize),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A tokio decoder that yields every complete UTF-8 chunk in the buffer.
#[derive(Debug, Default)]
pub struct ChunkCodec;

impl Decoder for ChunkCodec {
    type Item = String;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        let valid = match std::str::from_utf8(&src[..]) {
            Ok(_) => src.len(),
            // `error_len() == None` means the input ended mid-sequence.
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(e) => return Err(CodecError::InvalidUtf8(e.valid_up_to())),
        };

        if valid == 0 {
            return Ok(None);
        }

        let head = src.split_to(valid);
        let text = std::str::from_utf8(&head)
            .map_err(|e| CodecError::InvalidUtf8(e.valid_up_to()))?;
        Ok(Some(text.to_owned()))
    }
}

/// Join queued lines into the exact bytes written by one flush.
///
/// Lines are separated by `\n`; there is no trailing newline.
pub fn encode_batch<S: AsRef<str>>(lines: &[S]) -> Bytes {
    let len = lines.iter().map(|l| l.as_ref().len() + 1).sum::<usize>();
    let mut dst = BytesMut::with_capacity(len);
    for (i, line) in lines.iter().enumerate() {
        if i > 0 {
            dst.put_slice(LINE_SEPARATOR);
        }
        dst.put_slice(line.as_ref().as_bytes());
    }
    dst.freeze()
}
