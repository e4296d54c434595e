//! Per-message deflate and inflate transforms
//!
//! Raw deflate streams (RFC 7692): an outgoing message ends with a sync
//! flush whose `00 00 FF FF` trailer is stripped; the trailer is appended
//! back before inflating the end of an incoming message. Streams survive
//! across messages unless no-context-takeover was negotiated.

use flate2::{Compress, Compression, Decompress};
use flate2::{FlushCompress, FlushDecompress, Status};

use websocket::error::ErrorEnum;
use websocket::extension::DeflateParams;
use websocket::Role;

/// The sync-flush trailer elided on the wire
const TAIL: &'static [u8] = &[0x00, 0x00, 0xFF, 0xFF];
/// Output is grown in steps of this many bytes
const GROW: usize = 4096;

// zlib cannot produce 8-bit windows, the negotiated value widens to 9
fn zlib_window(bits: u8) -> u8 {
    if bits < 9 { 9 } else { bits }
}

impl DeflateParams {
    /// Window bits and takeover flag for the compressing direction
    fn encoder_side(&self, role: Role) -> (u8, bool) {
        match role {
            Role::Client => (self.client_max_window_bits,
                             self.client_no_context_takeover),
            Role::Server => (self.server_max_window_bits,
                             self.server_no_context_takeover),
        }
    }

    /// Window bits and takeover flag for the inflating direction
    fn decoder_side(&self, role: Role) -> (u8, bool) {
        match role {
            Role::Client => (self.server_max_window_bits,
                             self.server_no_context_takeover),
            Role::Server => (self.client_max_window_bits,
                             self.client_no_context_takeover),
        }
    }
}

/// Outgoing message compressor
pub struct Deflate {
    stream: Compress,
    reset_after_message: bool,
}

impl Deflate {
    pub fn new(params: &DeflateParams, role: Role, level: u32) -> Deflate {
        let (bits, no_takeover) = params.encoder_side(role);
        Deflate {
            stream: Compress::new_with_window_bits(
                Compression::new(level), false, zlib_window(bits)),
            reset_after_message: no_takeover,
        }
    }

    /// Compress one fragment; on `end_of_message` the stream is sync
    /// flushed and the wire trailer stripped
    pub fn compress(&mut self, mut input: &[u8], end_of_message: bool)
        -> Result<Vec<u8>, ErrorEnum>
    {
        let flush = if end_of_message { FlushCompress::Sync }
                    else { FlushCompress::None };
        let mut out = Vec::with_capacity(input.len() / 2 + 16);
        loop {
            out.reserve(GROW);
            let before = self.stream.total_in();
            let status = self.stream.compress_vec(input, &mut out, flush)
                .map_err(|e| ErrorEnum::Compression(e.to_string()))?;
            let consumed = (self.stream.total_in() - before) as usize;
            input = &input[consumed..];
            match status {
                Status::StreamEnd => break,
                Status::Ok | Status::BufError => {
                    if input.is_empty() && out.len() < out.capacity() {
                        break;
                    }
                }
            }
        }
        if end_of_message {
            if out.ends_with(TAIL) {
                let stripped = out.len() - TAIL.len();
                out.truncate(stripped);
            }
            if out.is_empty() {
                // an empty deflate block so the frame is non-empty
                out.push(0x00);
            }
            if self.reset_after_message {
                self.stream.reset();
            }
        }
        Ok(out)
    }
}

/// Incoming message decompressor
pub struct Inflate {
    stream: Decompress,
    reset_after_message: bool,
}

impl Inflate {
    pub fn new(params: &DeflateParams, role: Role) -> Inflate {
        let (bits, no_takeover) = params.decoder_side(role);
        Inflate {
            stream: Decompress::new_with_window_bits(
                false, zlib_window(bits)),
            reset_after_message: no_takeover,
        }
    }

    fn run(&mut self, mut input: &[u8], out: &mut Vec<u8>,
        limit: usize, step: usize)
        -> Result<(), ErrorEnum>
    {
        loop {
            if out.len() > limit {
                return Err(ErrorEnum::TooLong);
            }
            out.reserve(step);
            let before = self.stream.total_in();
            let status = self.stream
                .decompress_vec(input, out, FlushDecompress::None)
                .map_err(|e| ErrorEnum::Compression(e.to_string()))?;
            let consumed = (self.stream.total_in() - before) as usize;
            input = &input[consumed..];
            match status {
                Status::StreamEnd => return Ok(()),
                Status::Ok | Status::BufError => {
                    if input.is_empty() && out.len() < out.capacity() {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Inflate one fragment of a compressed message into `out`
    ///
    /// `limit` bounds the decompressed size (`TooLong` beyond it), `step`
    /// is the output growth granularity.
    pub fn decompress(&mut self, input: &[u8], out: &mut Vec<u8>,
        limit: usize, step: usize)
        -> Result<(), ErrorEnum>
    {
        self.run(input, out, limit, step)
    }

    /// Feed the elided trailer at the end of a message
    pub fn finish_message(&mut self, out: &mut Vec<u8>,
        limit: usize, step: usize)
        -> Result<(), ErrorEnum>
    {
        self.run(TAIL, out, limit, step)?;
        if self.reset_after_message {
            self.stream.reset(false);
        }
        Ok(())
    }
}
