use crate::codec::Encoding;
use crate::error::CompressionError;
use bytes::{Bytes, BytesMut};
use compression_codecs::EncodeV2;
use compression_core::util::{PartialBuffer, WriteBuffer};
use std::io;

const OUTPUT_BUFFER_SIZE: usize = 8 * 1024; // 8KB output buffer

/// A streaming encoder with its scratch buffer.
///
/// Every call returns whatever compressed output the encoder produced, which
/// may be empty while the encoder is still gathering input.
pub(crate) struct Compressor {
    encoding: Encoding,
    encoder: Box<dyn EncodeV2 + Send>,
    output_buffer: Vec<u8>,
    always_flush: bool,
}

impl Compressor {
    pub(crate) fn new(
        encoding: Encoding,
        encoder: Box<dyn EncodeV2 + Send>,
        always_flush: bool,
    ) -> Self {
        Self {
            encoding,
            encoder,
            output_buffer: vec![0u8; OUTPUT_BUFFER_SIZE],
            always_flush,
        }
    }

    pub(crate) fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Compresses a chunk of input data.
    pub(crate) fn encode(&mut self, input: &[u8]) -> Result<Bytes, CompressionError> {
        let encoding = self.encoding;
        let mut input_buf = PartialBuffer::new(input);
        let mut all_output = BytesMut::new();

        // Keep encoding until all input is consumed
        loop {
            let consumed_before = input_buf.written_len();
            let mut output = WriteBuffer::new_initialized(self.output_buffer.as_mut_slice());

            self.encoder
                .encode(&mut input_buf, &mut output)
                .map_err(|e| encode_error(encoding, e))?;

            let written = output.written_len();
            if written > 0 {
                all_output.extend_from_slice(&self.output_buffer[..written]);
            }

            if input_buf.written_len() >= input.len() {
                break;
            }

            // No progress on either side means the encoder is stuck
            if written == 0 && input_buf.written_len() == consumed_before {
                return Err(encode_error(
                    encoding,
                    io::Error::new(io::ErrorKind::WriteZero, "encoder made no progress"),
                ));
            }
        }

        if self.always_flush {
            let flushed = self.flush()?;
            all_output.extend_from_slice(&flushed);
        }

        Ok(all_output.freeze())
    }

    /// Forces the encoder to emit everything it has buffered.
    pub(crate) fn flush(&mut self) -> Result<Bytes, CompressionError> {
        let encoding = self.encoding;
        let mut all_output = BytesMut::new();
        loop {
            let mut output = WriteBuffer::new_initialized(self.output_buffer.as_mut_slice());
            let done = self
                .encoder
                .flush(&mut output)
                .map_err(|e| encode_error(encoding, e))?;

            let written = output.written_len();
            if written > 0 {
                all_output.extend_from_slice(&self.output_buffer[..written]);
            }
            if done {
                return Ok(all_output.freeze());
            }
        }
    }

    /// Finishes the stream, returning the trailing output.
    pub(crate) fn finish(&mut self) -> Result<Bytes, CompressionError> {
        let encoding = self.encoding;
        let mut all_output = BytesMut::new();
        loop {
            let mut output = WriteBuffer::new_initialized(self.output_buffer.as_mut_slice());
            let done = self
                .encoder
                .finish(&mut output)
                .map_err(|e| encode_error(encoding, e))?;

            let written = output.written_len();
            if written > 0 {
                all_output.extend_from_slice(&self.output_buffer[..written]);
            }
            if done {
                return Ok(all_output.freeze());
            }
        }
    }
}

fn encode_error(encoding: Encoding, source: io::Error) -> CompressionError {
    CompressionError::Encode { encoding, source }
}
