use bytes::{Buf, BytesMut};
use encoding_rs::{DecoderResult, Encoding};
use std::io;
use tokio_util::codec::Decoder;

/// Converts a declared charset to UTF-8.
///
/// Unlike a lossy decode, the first malformed sequence is an error so an
/// unreadable upload never turns into a batch full of U+FFFD.
pub struct Transcoder {
    encoding: &'static Encoding,
    decoder: encoding_rs::Decoder,
    finished: bool,
}

impl Transcoder {
    pub fn new(encoding: &'static Encoding) -> Self {
        Self {
            encoding,
            decoder: encoding.new_decoder_with_bom_removal(),
            finished: false,
        }
    }

    fn transcode(&mut self, src: &mut BytesMut, last: bool) -> io::Result<Option<BytesMut>> {
        let capacity = self
            .decoder
            .max_utf8_buffer_length_without_replacement(src.len())
            .unwrap_or_else(|| src.len() * 3 + 16);
        let mut out = String::with_capacity(capacity);

        let (result, read) =
            self.decoder
                .decode_to_string_without_replacement(&src[..], &mut out, last);
        if let DecoderResult::Malformed(..) = result {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("malformed {} input", self.encoding.name()),
            ));
        }
        src.advance(read);

        if out.is_empty() {
            Ok(None)
        } else {
            Ok(Some(BytesMut::from(out.as_bytes())))
        }
    }
}

impl Decoder for Transcoder {
    type Item = BytesMut;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }
        self.transcode(src, false)
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // the decoder must not be fed again once it has seen `last = true`
        if self.finished {
            return Ok(None);
        }
        self.finished = true;
        let out = self.transcode(buf, true)?;
        buf.clear();
        Ok(out)
    }
}
