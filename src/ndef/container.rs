use std::ops::Range;

/// NDEF message TLV tag
pub const NDEF_TLV_TAG: u8 = 0x03;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerShape {
    /// Two-byte big-endian total length at offset 0
    Nlen,
    /// `03 <len>` or `03 FF <len16>`
    Tlv,
}

/// Locate a complete NDEF message inside a file buffer.
///
/// The NLEN reading wins when it fits the buffer; the TLV reading is
/// tried only when it does not and the first byte is the NDEF TLV tag.
pub fn locate(buf: &[u8]) -> Option<(ContainerShape, Range<usize>)> {
    if buf.len() < 2 {
        return None;
    }

    let nlen = u16::from_be_bytes([buf[0], buf[1]]) as usize;
    if nlen > 0 && buf.len() >= nlen + 2 {
        return Some((ContainerShape::Nlen, 2..2 + nlen));
    }

    if buf[0] == NDEF_TLV_TAG {
        let (len, start) = if buf[1] == 0xFF {
            if buf.len() < 4 {
                return None;
            }
            (u16::from_be_bytes([buf[2], buf[3]]) as usize, 4)
        } else {
            (buf[1] as usize, 2)
        };
        if len > 0 && buf.len() >= start + len {
            return Some((ContainerShape::Tlv, start..start + len));
        }
    }

    None
}

/// `NLEN ++ message`
pub fn wrap_nlen(message: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(message.len() + 2);
    out.extend_from_slice(&(message.len() as u16).to_be_bytes());
    out.extend_from_slice(message);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nlen_shape() {
        let buf = wrap_nlen(&[1, 2, 3]);
        assert_eq!(locate(&buf), Some((ContainerShape::Nlen, 2..5)));
        assert_eq!(locate(&buf[..4]), None);
    }

    #[test]
    fn zero_length_means_no_message() {
        assert_eq!(locate(&[0x00, 0x00, 0xD1]), None);
    }

    #[test]
    fn tlv_shape_short_and_long() {
        assert_eq!(locate(&[0x03, 0x02, 0xAA, 0xBB, 0xFE]), Some((ContainerShape::Tlv, 2..4)));

        let mut long = vec![0x03, 0xFF, 0x01, 0x00];
        long.extend(std::iter::repeat(0x55).take(256));
        assert_eq!(locate(&long), Some((ContainerShape::Tlv, 4..260)));
        assert_eq!(locate(&long[..100]), None);
    }
}
