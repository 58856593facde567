//! PCMU (G.711 mu-law) decoding and PCM helpers.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

/// Decode one mu-law byte to a linear 16-bit sample.
pub fn ulaw_to_linear(byte: u8) -> i16 {
    let u = !byte;
    let sign = u & 0x80 != 0;
    let mut t = (((u & 0x0F) as i32) << 3) + 0x84;
    t <<= (u & 0x70) >> 4;
    if sign { (0x84 - t) as i16 } else { (t - 0x84) as i16 }
}

pub fn decode_ulaw(data: &[u8]) -> Vec<i16> {
    data.iter().map(|&b| ulaw_to_linear(b)).collect()
}

pub fn pcm16_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

pub fn encode_pcm16_base64(samples: &[i16]) -> String {
    BASE64.encode(pcm16_to_le_bytes(samples))
}

/// Minimal RIFF/WAVE header for a 16-bit PCM stream of unknown length.
pub fn wav_header(sample_rate: u32, channels: u16) -> Vec<u8> {
    let byte_rate = sample_rate * u32::from(channels) * 2;
    let block_align = channels * 2;
    let mut header = Vec::with_capacity(44);
    header.extend_from_slice(b"RIFF");
    header.extend_from_slice(&u32::MAX.to_le_bytes());
    header.extend_from_slice(b"WAVE");
    header.extend_from_slice(b"fmt ");
    header.extend_from_slice(&16u32.to_le_bytes());
    header.extend_from_slice(&1u16.to_le_bytes()); // PCM
    header.extend_from_slice(&channels.to_le_bytes());
    header.extend_from_slice(&sample_rate.to_le_bytes());
    header.extend_from_slice(&byte_rate.to_le_bytes());
    header.extend_from_slice(&block_align.to_le_bytes());
    header.extend_from_slice(&16u16.to_le_bytes());
    header.extend_from_slice(b"data");
    header.extend_from_slice(&u32::MAX.to_le_bytes());
    header
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ulaw_edge_values() {
        assert_eq!(ulaw_to_linear(0xFF), 0);
        assert_eq!(ulaw_to_linear(0x00), -32124);
        assert_eq!(ulaw_to_linear(0x80), 32124);
    }

    #[test]
    fn ulaw_decoding_is_antisymmetric() {
        for byte in 0u8..128 {
            let negative = ulaw_to_linear(byte);
            let positive = ulaw_to_linear(byte | 0x80);
            assert_eq!(negative, -positive, "byte {byte:#04x}");
        }
    }

    #[test]
    fn wav_header_layout() {
        let header = wav_header(8000, 2);
        assert_eq!(header.len(), 44);
        assert_eq!(&header[0..4], b"RIFF");
        assert_eq!(&header[8..12], b"WAVE");
        // block align: 2 channels * 2 bytes
        assert_eq!(u16::from_le_bytes([header[32], header[33]]), 4);
    }

    #[test]
    fn pcm16_base64_round_trip() {
        use base64::Engine as _;
        let samples = [0i16, -1, 256];
        let encoded = encode_pcm16_base64(&samples);
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .unwrap();
        assert_eq!(decoded, pcm16_to_le_bytes(&samples));
    }
}
