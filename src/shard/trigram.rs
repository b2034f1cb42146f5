//! Trigram extraction, case folding and posting-list delta encoding
//! (spec §4.2's "Trigram extraction", "Case bits" and "Newline index").

use std::collections::{HashMap, HashSet};

/// A trigram is three consecutive content bytes, folded to lowercase before
/// being used as a posting-list key. Case is recovered at search time via the
/// per-document case-bit vector rather than by keeping cased trigrams.
pub type Trigram = [u8; 3];

/// Lower-case `content` and record, per byte, whether the original was
/// uppercase. The returned `Vec<u8>` has the same length as `content`, packed
/// one bit per original byte (bit 1 = was uppercase).
pub fn case_fold(content: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let mut lowered = Vec::with_capacity(content.len());
    let mut case_bits = vec![0u8; content.len().div_ceil(8)];

    for (i, &b) in content.iter().enumerate() {
        if b.is_ascii_uppercase() {
            case_bits[i / 8] |= 1 << (i % 8);
            lowered.push(b.to_ascii_lowercase());
        } else {
            lowered.push(b);
        }
    }

    (lowered, case_bits)
}

pub fn case_bit(case_bits: &[u8], offset: usize) -> bool {
    case_bits
        .get(offset / 8)
        .map(|byte| byte & (1 << (offset % 8)) != 0)
        .unwrap_or(false)
}

/// Sorted offsets of every `\n` byte in `content`, used to translate a byte
/// offset into a (line number, line range) pair at search time.
pub fn newline_index(content: &[u8]) -> Vec<u32> {
    content
        .iter()
        .enumerate()
        .filter(|(_, &b)| b == b'\n')
        .map(|(i, _)| i as u32)
        .collect()
}

/// Every `(trigram, absolute_offset)` pair occurring in `content`, folded to
/// lowercase. Offsets are relative to the start of `content`; the caller adds
/// the document's base offset into the shard's content blob.
pub fn extract(content: &[u8]) -> Vec<(Trigram, u32)> {
    if content.len() < 3 {
        return Vec::new();
    }

    let mut out = Vec::with_capacity(content.len().saturating_sub(2));
    for (i, window) in content.windows(3).enumerate() {
        let mut t: Trigram = [window[0], window[1], window[2]];
        t[0] = t[0].to_ascii_lowercase();
        t[1] = t[1].to_ascii_lowercase();
        t[2] = t[2].to_ascii_lowercase();
        out.push((t, i as u32));
    }
    out
}

/// Count of *distinct* trigrams in `content`, used by the intake size/trigram
/// ceiling check. Does not allocate the full offset list.
///
/// Content shorter than 3 bytes has no true trigram window, but still counts
/// as 1 for any non-empty content: spec's `trigram_max = 0` boundary case
/// requires every non-empty document to be skipped, which only holds if a
/// 1- or 2-byte document reports a nonzero count here.
pub fn distinct_trigram_count(content: &[u8]) -> u64 {
    if content.is_empty() {
        return 0;
    }
    if content.len() < 3 {
        return 1;
    }
    let mut seen: HashSet<Trigram> = HashSet::new();
    for window in content.windows(3) {
        let t: Trigram = [
            window[0].to_ascii_lowercase(),
            window[1].to_ascii_lowercase(),
            window[2].to_ascii_lowercase(),
        ];
        seen.insert(t);
    }
    seen.len() as u64
}

/// Group `(trigram, offset)` pairs into per-trigram sorted offset lists.
pub fn group_postings(pairs: impl IntoIterator<Item = (Trigram, u32)>) -> HashMap<Trigram, Vec<u32>> {
    let mut map: HashMap<Trigram, Vec<u32>> = HashMap::new();
    for (t, offset) in pairs {
        map.entry(t).or_default().push(offset);
    }
    for offsets in map.values_mut() {
        offsets.sort_unstable();
    }
    map
}

/// Encode a sorted list of offsets as successive differences, each a LEB128
/// variable-length unsigned integer. The first delta is the offset itself.
pub fn encode_deltas(offsets: &[u32]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut prev = 0u32;
    for &offset in offsets {
        let delta = offset - prev;
        write_varint(&mut out, delta as u64);
        prev = offset;
    }
    out
}

/// Inverse of [`encode_deltas`].
pub fn decode_deltas(mut bytes: &[u8]) -> Vec<u32> {
    let mut out = Vec::new();
    let mut prev = 0u32;
    while !bytes.is_empty() {
        let (delta, rest) = read_varint(bytes);
        bytes = rest;
        prev += delta as u32;
        out.push(prev);
    }
    out
}

fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

fn read_varint(bytes: &[u8]) -> (u64, &[u8]) {
    let mut value = 0u64;
    let mut shift = 0;
    let mut i = 0;
    loop {
        let byte = bytes[i];
        value |= ((byte & 0x7f) as u64) << shift;
        i += 1;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    (value, &bytes[i..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_delta_encoding() {
        let offsets = vec![3u32, 3, 17, 1000, 1001, 1_000_000];
        let encoded = encode_deltas(&offsets);
        assert_eq!(decode_deltas(&encoded), offsets);
    }

    #[test]
    fn extract_covers_every_window() {
        let pairs = extract(b"abcd");
        assert_eq!(pairs, vec![([b'a', b'b', b'c'], 0), ([b'b', b'c', b'd'], 1)]);
    }

    #[test]
    fn extract_short_content_is_empty() {
        assert!(extract(b"ab").is_empty());
    }

    #[test]
    fn distinct_trigram_count_is_nonzero_for_any_non_empty_content() {
        assert_eq!(distinct_trigram_count(b""), 0);
        assert_eq!(distinct_trigram_count(b"a"), 1);
        assert_eq!(distinct_trigram_count(b"ab"), 1);
        assert_eq!(distinct_trigram_count(b"abc"), 1);
    }

    #[test]
    fn case_fold_records_uppercase_bits() {
        let (lowered, bits) = case_fold(b"Ab");
        assert_eq!(lowered, b"ab");
        assert!(case_bit(&bits, 0));
        assert!(!case_bit(&bits, 1));
    }

    #[test]
    fn trigram_is_case_insensitive() {
        let lower = extract(b"abc");
        let upper = extract(b"ABC");
        assert_eq!(lower, upper);
    }

    #[test]
    fn newline_index_finds_every_break() {
        assert_eq!(newline_index(b"a\nb\nc"), vec![1, 3]);
    }
}
