//! Decoder for the OSC subset used by TUIO.
//!
//! An incoming UDP datagram is either a single OSC packet containing one or
//! more back-to-back messages, or a `#bundle` container:
//!
//! ```text
//! message: [address \0 pad4][,typetags \0 pad4][args...]
//! bundle:  ["#bundle\0"][timetag:8][len:4 BE][element]...
//! ```
//!
//! Arguments are typed by the tag string: `i` = int32 BE, `f` = float32 BE,
//! `s` = NUL-terminated string padded to a 4-byte boundary. Bundles may nest.
//!
//! Decoding is deliberately lenient: a malformed element stops parsing of
//! that message or bundle only. The decoder always returns every complete
//! message it managed to extract, alongside the errors it ran into, so a
//! single corrupt tracker packet can never take down the ingest path.

use thiserror::Error;
use tracing::trace;

/// The 8-byte marker that opens an OSC bundle.
pub const BUNDLE_MARKER: &[u8; 8] = b"#bundle\0";

/// A single decoded OSC argument.
#[derive(Debug, Clone, PartialEq)]
pub enum OscArg {
    Int(i32),
    Float(f32),
    Str(String),
}

impl OscArg {
    /// Returns the argument as an `i32`, truncating floats.
    ///
    /// TUIO senders are supposed to emit int32 session ids, but some emit
    /// floats; accepting both mirrors what deployed trackers actually send.
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            OscArg::Int(v) => Some(*v),
            OscArg::Float(v) if v.is_finite() => Some(*v as i32),
            _ => None,
        }
    }

    /// Returns the argument as an `f32`, widening ints.
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            OscArg::Float(v) => Some(*v),
            OscArg::Int(v) => Some(*v as f32),
            OscArg::Str(_) => None,
        }
    }

    /// Returns the argument as a string slice.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            OscArg::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// One decoded OSC message: an address pattern plus its typed arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct OscMessage {
    pub address: String,
    pub args: Vec<OscArg>,
}

/// Errors encountered while decoding a packet.
///
/// These are collected, not propagated: see [`decode_packet`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OscError {
    /// The buffer ended before the element described by `context` was complete.
    #[error("truncated packet while reading {context} at offset {offset}")]
    Truncated { context: &'static str, offset: usize },

    /// A string field had no terminating NUL before the end of the buffer.
    #[error("unterminated string for {context} at offset {offset}")]
    UnterminatedString { context: &'static str, offset: usize },

    /// The type-tag string did not begin with `,`.
    #[error("type tag string missing ',' prefix at offset {0}")]
    MissingTypeTagPrefix(usize),

    /// An argument carried a type tag this decoder does not understand.
    #[error("unknown type tag '{tag}' at offset {offset}")]
    UnknownTypeTag { tag: char, offset: usize },

    /// A bundle element's declared length overruns the remaining buffer.
    #[error("bundle element length {declared} overruns buffer at offset {offset}")]
    ElementOverrun { declared: usize, offset: usize },
}

/// The result of decoding one UDP datagram.
///
/// `messages` holds every complete message extracted, in wire order
/// (bundles are flattened depth-first). `errors` holds whatever went wrong
/// along the way; the two are independent, so a packet can yield both.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DecodedPacket {
    pub messages: Vec<OscMessage>,
    pub errors: Vec<OscError>,
}

/// Returns `true` when `buf` begins with the [`BUNDLE_MARKER`].
pub fn is_bundle(buf: &[u8]) -> bool {
    buf.len() >= BUNDLE_MARKER.len() && &buf[..BUNDLE_MARKER.len()] == BUNDLE_MARKER
}

/// Decodes one UDP datagram into its constituent OSC messages.
///
/// Never fails as a whole: malformed content truncates the affected
/// message or bundle and is reported in [`DecodedPacket::errors`].
pub fn decode_packet(buf: &[u8]) -> DecodedPacket {
    let mut out = DecodedPacket::default();
    if is_bundle(buf) {
        decode_bundle(buf, &mut out);
    } else {
        decode_messages(buf, &mut out);
    }
    out
}

// ── Bundle decoding ───────────────────────────────────────────────────────────

/// Walks a `#bundle` container: 8-byte marker, 8-byte timetag (ignored),
/// then `[u32 BE length][element]` entries. Elements recurse when they are
/// bundles themselves.
fn decode_bundle(buf: &[u8], out: &mut DecodedPacket) {
    // marker (8) + timetag (8)
    if buf.len() < 16 {
        out.errors.push(OscError::Truncated {
            context: "bundle timetag",
            offset: buf.len(),
        });
        return;
    }
    let mut offset = 16;

    while offset + 4 <= buf.len() {
        let declared =
            u32::from_be_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
                as usize;
        offset += 4;

        if declared == 0 {
            break;
        }
        if offset + declared > buf.len() {
            trace!("bundle element overrun: {declared} bytes declared at offset {offset}");
            out.errors.push(OscError::ElementOverrun {
                declared,
                offset: offset - 4,
            });
            break;
        }

        let element = &buf[offset..offset + declared];
        offset += declared;

        if is_bundle(element) {
            decode_bundle(element, out);
        } else {
            decode_messages(element, out);
        }
    }
}

// ── Message decoding ──────────────────────────────────────────────────────────

/// Rounds `n` up to the next 4-byte boundary.
fn align4(n: usize) -> usize {
    (n + 3) & !3
}

/// Reads a NUL-terminated string starting at `offset` and returns it together
/// with the 4-byte-aligned offset past its padding.
fn read_padded_str<'a>(
    buf: &'a [u8],
    offset: usize,
    context: &'static str,
) -> Result<(&'a str, usize), OscError> {
    if offset >= buf.len() {
        return Err(OscError::Truncated { context, offset });
    }
    let nul = buf[offset..]
        .iter()
        .position(|&b| b == 0)
        .map(|p| offset + p)
        .ok_or(OscError::UnterminatedString { context, offset })?;
    let s = std::str::from_utf8(&buf[offset..nul])
        .map_err(|_| OscError::UnterminatedString { context, offset })?;
    Ok((s, align4(nul + 1)))
}

/// Decodes back-to-back messages from `buf` until it is exhausted.
///
/// The first error stops this message sequence (the rest of the buffer can
/// no longer be framed reliably) but anything decoded before it is kept.
fn decode_messages(buf: &[u8], out: &mut DecodedPacket) {
    let mut offset = 0;

    while offset < buf.len() {
        match decode_one_message(buf, offset) {
            Ok((msg, next)) => {
                out.messages.push(msg);
                offset = next;
            }
            Err(e) => {
                trace!("message decode stopped: {e}");
                out.errors.push(e);
                return;
            }
        }
    }
}

/// Decodes one message starting at `offset`; returns it and the offset of
/// the next message.
fn decode_one_message(buf: &[u8], offset: usize) -> Result<(OscMessage, usize), OscError> {
    let (address, mut offset) = read_padded_str(buf, offset, "address")?;
    let address = address.to_string();

    let tag_offset = offset;
    let (tags, args_offset) = read_padded_str(buf, offset, "type tags")?;
    if !tags.starts_with(',') {
        return Err(OscError::MissingTypeTagPrefix(tag_offset));
    }
    offset = args_offset;

    let mut args = Vec::with_capacity(tags.len() - 1);
    for tag in tags.chars().skip(1) {
        match tag {
            'i' => {
                let bytes = read_exact4(buf, offset, "int32 argument")?;
                args.push(OscArg::Int(i32::from_be_bytes(bytes)));
                offset += 4;
            }
            'f' => {
                let bytes = read_exact4(buf, offset, "float32 argument")?;
                args.push(OscArg::Float(f32::from_be_bytes(bytes)));
                offset += 4;
            }
            's' => {
                let (s, next) = read_padded_str(buf, offset, "string argument")?;
                args.push(OscArg::Str(s.to_string()));
                offset = next;
            }
            other => {
                return Err(OscError::UnknownTypeTag { tag: other, offset });
            }
        }
    }

    Ok((OscMessage { address, args }, offset))
}

/// Reads exactly four bytes at `offset`.
fn read_exact4(buf: &[u8], offset: usize, context: &'static str) -> Result<[u8; 4], OscError> {
    if buf.len() < offset + 4 {
        return Err(OscError::Truncated { context, offset });
    }
    Ok([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    /// Appends `s` as a NUL-terminated, 4-byte-padded OSC string.
    fn push_osc_str(buf: &mut Vec<u8>, s: &str) {
        buf.extend_from_slice(s.as_bytes());
        buf.push(0);
        while buf.len() % 4 != 0 {
            buf.push(0);
        }
    }

    /// Builds a single OSC message with the given address and arguments.
    fn build_message(address: &str, args: &[OscArg]) -> Vec<u8> {
        let mut buf = Vec::new();
        push_osc_str(&mut buf, address);
        let tags: String = std::iter::once(',')
            .chain(args.iter().map(|a| match a {
                OscArg::Int(_) => 'i',
                OscArg::Float(_) => 'f',
                OscArg::Str(_) => 's',
            }))
            .collect();
        push_osc_str(&mut buf, &tags);
        for arg in args {
            match arg {
                OscArg::Int(v) => buf.extend_from_slice(&v.to_be_bytes()),
                OscArg::Float(v) => buf.extend_from_slice(&v.to_be_bytes()),
                OscArg::Str(s) => push_osc_str(&mut buf, s),
            }
        }
        buf
    }

    /// Wraps elements into a `#bundle` with a zeroed timetag.
    fn build_bundle(elements: &[Vec<u8>]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(BUNDLE_MARKER);
        buf.extend_from_slice(&[0u8; 8]); // timetag, ignored
        for el in elements {
            buf.extend_from_slice(&(el.len() as u32).to_be_bytes());
            buf.extend_from_slice(el);
        }
        buf
    }

    fn tuio_set(id: i32, x: f32, y: f32) -> Vec<u8> {
        build_message(
            "/tuio/2Dcur",
            &[
                OscArg::Str("set".to_string()),
                OscArg::Int(id),
                OscArg::Float(x),
                OscArg::Float(y),
                OscArg::Float(0.0),
                OscArg::Float(0.0),
                OscArg::Float(0.0),
            ],
        )
    }

    #[test]
    fn test_decode_single_set_message() {
        let packet = tuio_set(3, 0.25, 0.75);
        let decoded = decode_packet(&packet);

        assert!(decoded.errors.is_empty());
        assert_eq!(decoded.messages.len(), 1);
        let msg = &decoded.messages[0];
        assert_eq!(msg.address, "/tuio/2Dcur");
        assert_eq!(msg.args[0], OscArg::Str("set".to_string()));
        assert_eq!(msg.args[1], OscArg::Int(3));
        assert_eq!(msg.args[2], OscArg::Float(0.25));
        assert_eq!(msg.args[3], OscArg::Float(0.75));
    }

    #[test]
    fn test_decode_back_to_back_messages_in_one_packet() {
        let mut packet = build_message(
            "/tuio/2Dcur",
            &[OscArg::Str("alive".to_string()), OscArg::Int(1), OscArg::Int(2)],
        );
        packet.extend_from_slice(&tuio_set(1, 0.1, 0.2));
        packet.extend_from_slice(&build_message(
            "/tuio/2Dcur",
            &[OscArg::Str("fseq".to_string()), OscArg::Int(99)],
        ));

        let decoded = decode_packet(&packet);
        assert!(decoded.errors.is_empty());
        assert_eq!(decoded.messages.len(), 3);
        assert_eq!(decoded.messages[0].args[0], OscArg::Str("alive".to_string()));
        assert_eq!(decoded.messages[2].args[1], OscArg::Int(99));
    }

    #[test]
    fn test_decode_bundle_with_alive_set_fseq() {
        // The framing a real TUIO tracker produces every frame.
        let bundle = build_bundle(&[
            build_message(
                "/tuio/2Dcur",
                &[OscArg::Str("alive".to_string()), OscArg::Int(7)],
            ),
            tuio_set(7, 0.5, 0.5),
            build_message(
                "/tuio/2Dcur",
                &[OscArg::Str("fseq".to_string()), OscArg::Int(1234)],
            ),
        ]);

        let decoded = decode_packet(&bundle);
        assert!(decoded.errors.is_empty());
        assert_eq!(decoded.messages.len(), 3);
    }

    #[test]
    fn test_decode_nested_bundle_flattens_depth_first() {
        let inner = build_bundle(&[tuio_set(1, 0.1, 0.1)]);
        let outer = build_bundle(&[
            build_message(
                "/tuio/2Dcur",
                &[OscArg::Str("alive".to_string()), OscArg::Int(1)],
            ),
            inner,
        ]);

        let decoded = decode_packet(&outer);
        assert!(decoded.errors.is_empty());
        assert_eq!(decoded.messages.len(), 2);
        assert_eq!(decoded.messages[1].args[0], OscArg::Str("set".to_string()));
    }

    #[test]
    fn test_bundle_element_overrun_keeps_earlier_messages() {
        let mut bundle = build_bundle(&[tuio_set(1, 0.3, 0.3)]);
        // Declare a 1000-byte element that is not there.
        bundle.extend_from_slice(&1000u32.to_be_bytes());
        bundle.extend_from_slice(&[0u8; 4]);

        let decoded = decode_packet(&bundle);
        assert_eq!(decoded.messages.len(), 1);
        assert!(matches!(
            decoded.errors.as_slice(),
            [OscError::ElementOverrun { declared: 1000, .. }]
        ));
    }

    #[test]
    fn test_bundle_zero_length_element_ends_parsing_silently() {
        let mut bundle = build_bundle(&[tuio_set(1, 0.3, 0.3)]);
        bundle.extend_from_slice(&0u32.to_be_bytes());

        let decoded = decode_packet(&bundle);
        assert_eq!(decoded.messages.len(), 1);
        assert!(decoded.errors.is_empty());
    }

    #[test]
    fn test_bundle_shorter_than_timetag_reports_truncated() {
        let decoded = decode_packet(b"#bundle\0\0\0\0\0");
        assert!(decoded.messages.is_empty());
        assert!(matches!(
            decoded.errors.as_slice(),
            [OscError::Truncated { context: "bundle timetag", .. }]
        ));
    }

    #[test]
    fn test_truncated_int_argument_reports_error_without_message() {
        let mut packet = Vec::new();
        push_osc_str(&mut packet, "/tuio/2Dcur");
        push_osc_str(&mut packet, ",i");
        packet.extend_from_slice(&[0x00, 0x01]); // only 2 of 4 bytes

        let decoded = decode_packet(&packet);
        assert!(decoded.messages.is_empty());
        assert!(matches!(
            decoded.errors.as_slice(),
            [OscError::Truncated { context: "int32 argument", .. }]
        ));
    }

    #[test]
    fn test_unknown_type_tag_stops_message() {
        let mut packet = Vec::new();
        push_osc_str(&mut packet, "/tuio/2Dcur");
        push_osc_str(&mut packet, ",ib"); // 'b' (blob) is not supported
        packet.extend_from_slice(&5i32.to_be_bytes());
        packet.extend_from_slice(&[0u8; 8]);

        let decoded = decode_packet(&packet);
        assert!(decoded.messages.is_empty());
        assert!(matches!(
            decoded.errors.as_slice(),
            [OscError::UnknownTypeTag { tag: 'b', .. }]
        ));
    }

    #[test]
    fn test_type_tags_without_comma_prefix_reports_error() {
        let mut packet = Vec::new();
        push_osc_str(&mut packet, "/tuio/2Dcur");
        push_osc_str(&mut packet, "if"); // missing ','

        let decoded = decode_packet(&packet);
        assert!(decoded.messages.is_empty());
        assert!(matches!(
            decoded.errors.as_slice(),
            [OscError::MissingTypeTagPrefix(_)]
        ));
    }

    #[test]
    fn test_address_without_nul_reports_unterminated() {
        let decoded = decode_packet(b"/tuio/2Dcur");
        assert!(decoded.messages.is_empty());
        assert!(matches!(
            decoded.errors.as_slice(),
            [OscError::UnterminatedString { context: "address", .. }]
        ));
    }

    #[test]
    fn test_empty_packet_yields_nothing() {
        let decoded = decode_packet(&[]);
        assert!(decoded.messages.is_empty());
        assert!(decoded.errors.is_empty());
    }

    #[test]
    fn test_message_with_no_arguments() {
        let packet = build_message("/tuio/2Dcur", &[]);
        let decoded = decode_packet(&packet);
        assert!(decoded.errors.is_empty());
        assert_eq!(decoded.messages.len(), 1);
        assert!(decoded.messages[0].args.is_empty());
    }

    #[test]
    fn test_is_bundle_requires_full_marker() {
        assert!(is_bundle(b"#bundle\0rest"));
        assert!(!is_bundle(b"#bundle")); // marker includes the NUL
        assert!(!is_bundle(b"/tuio/2Dcur\0"));
    }

    #[test]
    fn test_arg_as_i32_truncates_floats() {
        assert_eq!(OscArg::Float(3.9).as_i32(), Some(3));
        assert_eq!(OscArg::Int(-2).as_i32(), Some(-2));
        assert_eq!(OscArg::Str("x".to_string()).as_i32(), None);
        assert_eq!(OscArg::Float(f32::NAN).as_i32(), None);
    }

    #[test]
    fn test_arg_as_f32_widens_ints() {
        assert_eq!(OscArg::Int(4).as_f32(), Some(4.0));
        assert_eq!(OscArg::Float(0.5).as_f32(), Some(0.5));
        assert_eq!(OscArg::Str("x".to_string()).as_f32(), None);
    }
}
