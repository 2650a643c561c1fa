//! Stacks c32check address encoding.
//!
//! Hand-rolled rather than pulled in via the full Clarity VM crate family:
//! this is a narrow, fully-specified checksum codec, the same call the
//! teacher makes for Taproot script-tree construction instead of a heavier
//! descriptor crate.

use sha2::{Digest, Sha256};

const C32_ALPHABET: &[u8] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

fn c32_encode(mut data: Vec<u8>) -> String {
    // Count leading zero bytes; c32 represents each as a leading '0' digit.
    let leading_zeros = data.iter().take_while(|&&b| b == 0).count();

    // Treat the bytes as a big base-256 integer and repeatedly divide by 32.
    let mut digits = Vec::new();
    let mut carry_buf = std::mem::take(&mut data);
    while carry_buf.iter().any(|&b| b != 0) {
        let mut remainder: u32 = 0;
        for byte in carry_buf.iter_mut() {
            let acc = (remainder << 8) | *byte as u32;
            *byte = (acc / 32) as u8;
            remainder = acc % 32;
        }
        digits.push(C32_ALPHABET[remainder as usize]);
    }

    let mut out: Vec<u8> = std::iter::repeat(b'0').take(leading_zeros).collect();
    out.extend(digits.into_iter().rev());
    if out.is_empty() {
        out.push(b'0');
    }
    String::from_utf8(out).expect("c32 alphabet is ASCII")
}

fn c32_decode(input: &str) -> Result<Vec<u8>, String> {
    let leading_zeros = input.chars().take_while(|&c| c == '0').count();

    let mut acc: Vec<u8> = vec![0];
    for ch in input.chars() {
        let normalized = ch.to_ascii_uppercase();
        let normalized = match normalized {
            'O' => '0',
            'I' | 'L' => '1',
            c => c,
        };
        let value = C32_ALPHABET
            .iter()
            .position(|&c| c == normalized as u8)
            .ok_or_else(|| format!("invalid c32 character: {ch}"))? as u32;

        let mut carry = value;
        for byte in acc.iter_mut().rev() {
            let x = (*byte as u32) * 32 + carry;
            *byte = (x & 0xff) as u8;
            carry = x >> 8;
        }
        while carry > 0 {
            acc.insert(0, (carry & 0xff) as u8);
            carry >>= 8;
        }
    }

    // Strip the leading zero bytes introduced by the above, then add back
    // exactly `leading_zeros` real zero bytes.
    let first_nonzero = acc.iter().position(|&b| b != 0).unwrap_or(acc.len());
    let mut result: Vec<u8> = std::iter::repeat(0u8).take(leading_zeros).collect();
    result.extend_from_slice(&acc[first_nonzero..]);
    Ok(result)
}

fn double_sha256_checksum(version: u8, payload: &[u8]) -> [u8; 4] {
    let mut first = Sha256::new();
    first.update([version]);
    first.update(payload);
    let h1 = first.finalize();
    let h2 = Sha256::digest(h1);
    [h2[0], h2[1], h2[2], h2[3]]
}

/// `S || version-digit || c32encode(hash160 || checksum)`, where `checksum`
/// is the first 4
/// bytes of `sha256(sha256(version || hash160))`, and the version is
/// encoded as a single extra c32 digit prepended to that string per the
/// Stacks c32check definition.
pub fn c32check_address(version: u8, hash160: &[u8; 20]) -> String {
    let checksum = double_sha256_checksum(version, hash160);
    let mut data = hash160.to_vec();
    data.extend_from_slice(&checksum);
    let c32_data = c32_encode(data);
    let version_char = C32_ALPHABET[version as usize];
    format!("S{}{}", version_char as char, c32_data)
}

/// Decodes and checksum-verifies a c32check Stacks address, returning
/// `(version, hash160)`.
pub fn decode_c32check_address(address: &str) -> Result<(u8, [u8; 20]), String> {
    let rest = address
        .strip_prefix('S')
        .ok_or_else(|| "address must start with S".to_string())?;
    let mut chars = rest.chars();
    let version_char = chars.next().ok_or_else(|| "address too short".to_string())?;
    let version = C32_ALPHABET
        .iter()
        .position(|&c| c == version_char.to_ascii_uppercase() as u8)
        .ok_or_else(|| "invalid version digit".to_string())? as u8;

    let data = c32_decode(chars.as_str())?;
    if data.len() < 24 {
        return Err("decoded address too short".to_string());
    }
    let (hash_bytes, checksum_bytes) = data.split_at(data.len() - 4);
    let mut hash160 = [0u8; 20];
    let offset = hash_bytes.len().saturating_sub(20);
    hash160.copy_from_slice(&hash_bytes[offset..]);

    let expected = double_sha256_checksum(version, &hash160);
    if expected != checksum_bytes {
        return Err("checksum mismatch".to_string());
    }
    Ok((version, hash160))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let hash160 = [0x11u8; 20];
        let addr = c32check_address(22, &hash160);
        assert!(addr.starts_with('S'));
        let (version, decoded) = decode_c32check_address(&addr).unwrap();
        assert_eq!(version, 22);
        assert_eq!(decoded, hash160);
    }

    #[test]
    fn rejects_tampered_checksum() {
        let hash160 = [0x22u8; 20];
        let mut addr = c32check_address(22, &hash160);
        // Flip the last character.
        let last = addr.pop().unwrap();
        let replacement = if last == '0' { '1' } else { '0' };
        addr.push(replacement);
        assert!(decode_c32check_address(&addr).is_err());
    }
}
