//! GDB Remote Serial Protocol packet framing.
//!
//! A packet on the wire looks like `$payload#cs` where `cs` is a 2-hex-digit
//! checksum of the unescaped payload. [`PacketParser`] is the inbound half:
//! it is fed arbitrarily-chunked bytes off a TCP socket and hands back
//! complete, checksum-verified, unescaped payload strings, carrying a
//! trailing partial packet across calls. [`encode_packet`] is the outbound
//! half. Neither side touches a socket; this crate is pure framing logic.

/// Bytes that must be escape-encoded (`}` followed by the byte XOR `0x20`)
/// when they appear in a packet payload.
const ESCAPED: [u8; 4] = [b'}', b'#', b'$', b'*'];

/// Accumulates a trailing partial packet between reads and yields complete,
/// checksum-verified packets as they arrive.
#[derive(Debug, Default)]
pub struct PacketParser {
    pending: Vec<u8>,
}

impl PacketParser {
    pub fn new() -> Self {
        PacketParser::default()
    }

    /// Feeds newly-received bytes in and returns every complete packet they
    /// produced, in order. A packet with a bad checksum, or payload bytes
    /// `>= 0x80`, is silently dropped — it never reaches the caller.
    pub fn process_bytes(&mut self, data: &[u8]) -> Vec<String> {
        if data.is_empty() {
            return Vec::new();
        }

        let mut segments: Vec<Vec<u8>> = data.split(|&b| b == b'$').map(<[u8]>::to_vec).collect();
        let mut first = std::mem::take(&mut self.pending);
        first.extend_from_slice(&segments[0]);
        segments[0] = first;

        let last = segments.len() - 1;
        let mut out = Vec::new();
        for (i, segment) in segments.into_iter().enumerate() {
            match find_checksum_delim(&segment) {
                Some(hash_idx) => {
                    let payload = &segment[..hash_idx];
                    let checksum_field = &segment[hash_idx + 1..];
                    if let Some(packet) = decode_segment(payload, checksum_field) {
                        out.push(packet);
                    }
                    if i == last {
                        self.pending.clear();
                    }
                }
                None if i == last => self.pending = segment,
                None => {}
            }
        }
        out
    }
}

/// A segment is complete iff it contains `#` at an index with at least two
/// bytes following (room for the two checksum digits).
fn find_checksum_delim(segment: &[u8]) -> Option<usize> {
    if segment.len() < 2 {
        return None;
    }
    segment[..segment.len() - 2].iter().position(|&b| b == b'#')
}

fn decode_segment(payload: &[u8], checksum_field: &[u8]) -> Option<String> {
    if !payload.iter().all(|&b| b < 0x80) {
        return None;
    }
    let unescaped = unescape(payload);
    if !verify_checksum(&unescaped, checksum_field) {
        return None;
    }
    String::from_utf8(unescaped).ok()
}

/// Splits on `}`; for every run after the first, XORs its leading byte with
/// `0x20` and appends the rest unchanged.
fn unescape(payload: &[u8]) -> Vec<u8> {
    let mut parts = payload.split(|&b| b == b'}');
    let mut out = Vec::with_capacity(payload.len());
    if let Some(first) = parts.next() {
        out.extend_from_slice(first);
    }
    for run in parts {
        if let Some((&escaped, rest)) = run.split_first() {
            out.push(escaped ^ 0x20);
            out.extend_from_slice(rest);
        }
    }
    out
}

fn verify_checksum(payload: &[u8], checksum_field: &[u8]) -> bool {
    let Some(hex) = checksum_field.get(..2).and_then(|b| std::str::from_utf8(b).ok()) else {
        return false;
    };
    let Ok(expected) = u8::from_str_radix(hex, 16) else {
        return false;
    };
    checksum(payload) == expected
}

fn checksum(payload: &[u8]) -> u8 {
    payload.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Frames `payload` as `$<escaped>#<cs>`, escaping `}`, `#`, `$`, and `*`,
/// and computing the checksum over the *unescaped* payload bytes.
pub fn encode_packet(payload: &str) -> Vec<u8> {
    let cs = checksum(payload.as_bytes());
    let mut out = Vec::with_capacity(payload.len() + 4);
    out.push(b'$');
    for b in payload.bytes() {
        if ESCAPED.contains(&b) {
            out.push(b'}');
            out.push(b ^ 0x20);
        } else {
            out.push(b);
        }
    }
    out.push(b'#');
    out.extend(format!("{cs:02x}").into_bytes());
    out
}

/// True if a literal `0x03` (the debugger's async interrupt request) appears
/// anywhere in `data`, regardless of framing.
pub fn contains_interrupt(data: &[u8]) -> bool {
    data.contains(&0x03)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s1_packet_decode() {
        let mut p = PacketParser::new();
        let out = p.process_bytes(b"$qSupported#37");
        assert_eq!(out, vec!["qSupported".to_string()]);
    }

    #[test]
    fn s2_split_across_reads() {
        let mut p = PacketParser::new();
        assert!(p.process_bytes(b"$qSu").is_empty());
        let out = p.process_bytes(b"pported#37");
        assert_eq!(out, vec!["qSupported".to_string()]);
    }

    #[test]
    fn arbitrary_chunk_boundaries_yield_same_packets() {
        let stream = b"$qSupported#37$?#3f$g#67";
        let whole = {
            let mut p = PacketParser::new();
            p.process_bytes(stream)
        };
        let chunked = {
            let mut p = PacketParser::new();
            let mut out = Vec::new();
            for chunk in stream.chunks(3) {
                out.extend(p.process_bytes(chunk));
            }
            out
        };
        assert_eq!(whole, chunked);
        assert_eq!(whole, vec!["qSupported", "?", "g"]);
    }

    #[test]
    fn bad_checksum_is_dropped_silently() {
        let mut p = PacketParser::new();
        // correct checksum for "qSupported" is 0x37; corrupt one digit.
        let out = p.process_bytes(b"$qSupported#38");
        assert!(out.is_empty());
    }

    #[test]
    fn escape_is_invisible_to_semantics() {
        let payload = "a}b#c$d*e";
        let encoded = encode_packet(payload);
        let mut p = PacketParser::new();
        let decoded = p.process_bytes(&encoded);
        assert_eq!(decoded, vec![payload.to_string()]);
    }

    #[test]
    fn encode_then_decode_round_trips_for_ascii_payloads() {
        for payload in ["", "OK", "S05", "m200000,10", "}}}###$$$***"] {
            let mut p = PacketParser::new();
            let out = p.process_bytes(&encode_packet(payload));
            assert_eq!(out, vec![payload.to_string()]);
        }
    }

    #[test]
    fn interrupt_byte_detected_anywhere_in_stream() {
        assert!(contains_interrupt(b"\x03"));
        assert!(contains_interrupt(b"garbage\x03more"));
        assert!(!contains_interrupt(b"$qSupported#37"));
    }

    #[test]
    fn incomplete_segment_is_never_emitted_as_partial_packet() {
        let mut p = PacketParser::new();
        // "#" present but only one byte follows it so far -> incomplete.
        let out = p.process_bytes(b"$qSupported#3");
        assert!(out.is_empty());
        let out = p.process_bytes(b"7");
        assert_eq!(out, vec!["qSupported".to_string()]);
    }
}
