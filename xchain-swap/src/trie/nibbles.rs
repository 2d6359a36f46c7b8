// Nibble paths and the hex-prefix ("compact") encoding used in trie nodes.

use super::ProofError;

pub fn bytes_to_nibbles(bytes: &[u8]) -> Vec<u8> {
    bytes.iter().flat_map(|b| [b >> 4, b & 0x0f]).collect()
}

pub fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

/// Flag nibble: bit 1 marks a leaf, bit 0 an odd-length path. Odd paths
/// share the first byte with the flag; even paths pad it with zero.
pub fn compact_encode(nibbles: &[u8], is_leaf: bool) -> Vec<u8> {
    let odd = nibbles.len() % 2 == 1;
    let flag = (if is_leaf { 2 } else { 0 }) + u8::from(odd);

    let mut out = Vec::with_capacity(nibbles.len() / 2 + 1);
    let rest = if odd {
        out.push((flag << 4) | nibbles[0]);
        &nibbles[1..]
    } else {
        out.push(flag << 4);
        nibbles
    };
    for pair in rest.chunks(2) {
        out.push((pair[0] << 4) | pair[1]);
    }
    out
}

/// Inverse of `compact_encode`. Returns the nibble path and the leaf flag.
pub fn compact_decode(encoded: &[u8]) -> Result<(Vec<u8>, bool), ProofError> {
    let first = *encoded
        .first()
        .ok_or_else(|| ProofError::MalformedNode("empty hex-prefix path".to_string()))?;
    let flag = first >> 4;
    if flag > 3 {
        return Err(ProofError::MalformedNode(format!("invalid hex-prefix flag {}", flag)));
    }
    let is_leaf = flag & 2 != 0;
    let odd = flag & 1 != 0;

    let mut nibbles = Vec::with_capacity(encoded.len() * 2);
    if odd {
        nibbles.push(first & 0x0f);
    } else if first & 0x0f != 0 {
        return Err(ProofError::MalformedNode("non-zero padding in even path".to_string()));
    }
    nibbles.extend(bytes_to_nibbles(&encoded[1..]));
    Ok((nibbles, is_leaf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_bytes_into_nibbles() {
        assert_eq!(bytes_to_nibbles(&[0x12, 0xab]), vec![1, 2, 0xa, 0xb]);
        assert!(bytes_to_nibbles(&[]).is_empty());
    }

    #[test]
    fn hex_prefix_vectors() {
        // Extension, even and odd
        assert_eq!(compact_encode(&[1, 2, 3, 4, 5], false), vec![0x11, 0x23, 0x45]);
        assert_eq!(compact_encode(&[0, 1, 2, 3, 4, 5], false), vec![0x00, 0x01, 0x23, 0x45]);
        // Leaf, even and odd
        assert_eq!(compact_encode(&[0, 0xf, 1, 0xc, 0xb, 8], true), vec![0x20, 0x0f, 0x1c, 0xb8]);
        assert_eq!(compact_encode(&[0xf, 1, 0xc, 0xb, 8], true), vec![0x3f, 0x1c, 0xb8]);
        // Empty leaf path
        assert_eq!(compact_encode(&[], true), vec![0x20]);
    }

    #[test]
    fn decode_inverts_encode() {
        for (path, leaf) in [(vec![1u8, 2, 3], true), (vec![0xa, 0xb], false), (vec![], true)] {
            let (decoded, is_leaf) = compact_decode(&compact_encode(&path, leaf)).unwrap();
            assert_eq!(decoded, path);
            assert_eq!(is_leaf, leaf);
        }
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(compact_decode(&[]).is_err());
        assert!(compact_decode(&[0x40]).is_err());
        assert!(compact_decode(&[0x05]).is_err());
    }

    #[test]
    fn prefix_length() {
        assert_eq!(common_prefix_len(&[1, 2, 3], &[1, 2, 4]), 2);
        assert_eq!(common_prefix_len(&[1, 2], &[1, 2, 4]), 2);
        assert_eq!(common_prefix_len(&[5], &[1]), 0);
    }
}
