//! Deserialize data from the envelope wire protocol.
use bytes::Bytes;
use nom::{
    IResult,
    bytes::complete::take,
    multi::many_m_n,
    number::complete::{be_i16, be_i32, be_u8, be_u32, be_u64},
};
use nombytes::NomBytes;

use crate::constants::{MAX_ENVELOPE_PAYLOAD_SIZE, MAX_PROTOCOL_ARRAY_SIZE};

/// Convert bytes to a validated UTF-8 string.
/// Returns an error if the bytes are not valid UTF-8.
pub fn bytes_to_string(bytes: &Bytes) -> Result<String, nom::Err<nom::error::Error<NomBytes>>> {
    std::str::from_utf8(bytes)
        .map(|s| s.to_string())
        .map_err(|_| {
            nom::Err::Failure(nom::error::Error::new(
                NomBytes::from(bytes.as_ref()),
                nom::error::ErrorKind::Verify,
            ))
        })
}

/// Parse an i16-length-prefixed string payload.
pub fn parse_string(s: NomBytes) -> IResult<NomBytes, Bytes> {
    let (s, length) = be_i16(s)?;
    let (s, string) = take(length as u16)(s)?;
    Ok((s, string.into_bytes()))
}

/// Parse a u8 frame tag.
pub fn parse_tag(s: NomBytes) -> IResult<NomBytes, u8> {
    be_u8(s)
}

/// Parse a u64 id field.
pub fn parse_u64(s: NomBytes) -> IResult<NomBytes, u64> {
    be_u64(s)
}

/// Parse a u32-length-prefixed byte payload with size validation.
pub fn parse_payload(s: NomBytes) -> IResult<NomBytes, Bytes> {
    let (s, length) = be_u32(s)?;

    if length > MAX_ENVELOPE_PAYLOAD_SIZE {
        return Err(nom::Err::Failure(nom::error::Error::new(
            s,
            nom::error::ErrorKind::TooLarge,
        )));
    }

    let (s, payload) = take(length)(s)?;
    Ok((s, payload.into_bytes()))
}

/// Parse an i32-length-prefixed protocol array with size validation.
pub fn parse_array<O, E, F>(f: F) -> impl FnMut(NomBytes) -> IResult<NomBytes, Vec<O>, E>
where
    F: nom::Parser<NomBytes, O, E> + Copy,
    E: nom::error::ParseError<NomBytes>,
{
    move |input: NomBytes| {
        let i = input.clone();
        let (i, length) = be_i32(i)?;

        // Null array
        if length == -1 {
            return Ok((i, vec![]));
        }

        if !(0..=MAX_PROTOCOL_ARRAY_SIZE).contains(&length) {
            return Err(nom::Err::Failure(E::from_error_kind(
                i,
                nom::error::ErrorKind::TooLarge,
            )));
        }

        many_m_n(length as usize, length as usize, f)(i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tag() {
        let input = NomBytes::from(&[0x51u8, 0xFF][..]);
        let (rest, tag) = parse_tag(input).unwrap();
        assert_eq!(tag, 0x51);
        assert_eq!(rest.to_bytes().as_ref(), &[0xFF]);
    }

    #[test]
    fn test_parse_u64() {
        let input = NomBytes::from(&[0, 0, 0, 0, 0, 0, 0, 42][..]);
        let (_, value) = parse_u64(input).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_parse_string() {
        let input = NomBytes::from(&[0x00, 0x02, b'h', b'i'][..]);
        let (_, s) = parse_string(input).unwrap();
        assert_eq!(s.as_ref(), b"hi");
    }

    #[test]
    fn test_parse_payload() {
        let input = NomBytes::from(&[0x00, 0x00, 0x00, 0x03, 1, 2, 3, 9][..]);
        let (rest, payload) = parse_payload(input).unwrap();
        assert_eq!(payload.as_ref(), &[1, 2, 3]);
        assert_eq!(rest.to_bytes().as_ref(), &[9]);
    }

    #[test]
    fn test_parse_payload_rejects_oversize() {
        let input = NomBytes::from(&[0xFF, 0xFF, 0xFF, 0xFF, 0][..]);
        assert!(parse_payload(input).is_err());
    }

    #[test]
    fn test_parse_payload_truncated() {
        let input = NomBytes::from(&[0x00, 0x00, 0x00, 0x05, 1, 2][..]);
        assert!(parse_payload(input).is_err());
    }

    #[test]
    fn test_parse_array_null() {
        let input = NomBytes::from(&[0xFF, 0xFF, 0xFF, 0xFF][..]);
        let (_, values) = parse_array(be_i16::<_, nom::error::Error<NomBytes>>)(input).unwrap();
        assert!(values.is_empty());
    }

    #[test]
    fn test_parse_array_values() {
        let input = NomBytes::from(&[0x00, 0x00, 0x00, 0x02, 0x00, 0x0A, 0x00, 0x14][..]);
        let (_, values) = parse_array(be_i16::<_, nom::error::Error<NomBytes>>)(input).unwrap();
        assert_eq!(values, vec![10, 20]);
    }

    #[test]
    fn test_bytes_to_string_rejects_invalid_utf8() {
        let bytes = Bytes::from(vec![0xFF, 0xFE]);
        assert!(bytes_to_string(&bytes).is_err());
    }
}
