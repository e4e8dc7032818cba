//! Thin helpers for producing LZ4-framed test fixtures and for the trace
//! file replay path, which feeds a whole saved capture through the same
//! [`super::StreamDecoder`] used for live TCP ingestion.

/// Encode `payload` as one wire frame: `lz4_size: u16` followed by the
/// compressed bytes, compressed against `dict` for dictionary continuity
/// with the previous frame (mirrors the client's encoder, spec §4.1).
pub fn encode_frame(payload: &[u8], dict: &[u8]) -> Vec<u8> {
    let compressed = if dict.is_empty() {
        lz4_flex::block::compress(payload)
    } else {
        lz4_flex::block::compress_with_dict(payload, dict)
    };
    let mut framed = Vec::with_capacity(2 + compressed.len());
    framed.extend_from_slice(&(compressed.len() as u16).to_le_bytes());
    framed.extend_from_slice(&compressed);
    framed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{PollOutcome, StreamDecoder};
    use std::io::Cursor;

    #[test]
    fn encode_frame_round_trips_through_stream_decoder() {
        let payload = b"zone begin thread=7 t=100".to_vec();
        let frame = encode_frame(&payload, &[]);

        let mut decoder = StreamDecoder::new(true, 4096);
        let mut cur = Cursor::new(frame);
        assert_eq!(decoder.poll(&mut cur).unwrap(), PollOutcome::Progressed);
        assert_eq!(decoder.available(), payload.as_slice());
    }
}
