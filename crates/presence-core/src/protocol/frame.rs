//! Binary codec for the 8-byte presence frame sent to the downstream device.
//!
//! Wire format:
//! ```text
//! [0x1C][zone:1][0x64][state:1][0x00][0x00][0xFF][checksum:1]
//! ```
//! `state` is `0x00` when the zone is occupied and `0x01` when it is empty.
//! The checksum is chosen so that the sum of all eight bytes is a multiple
//! of 256, which lets the receiving device validate a frame with a single
//! additive pass.

/// Total size of a presence frame in bytes.
pub const FRAME_LEN: usize = 8;

/// One encoded presence frame.
pub type Frame = [u8; FRAME_LEN];

/// Leading marker byte of every frame.
pub const FRAME_HEADER: u8 = 0x1C;

/// Fixed function byte identifying the presence report.
pub const FRAME_FUNCTION: u8 = 0x64;

/// Encodes one zone's occupancy into a presence frame.
///
/// Zone ids outside the device's 1..=255 range are clamped rather than
/// rejected; the occupancy engine may legitimately produce larger grid ids,
/// and the device protocol has no way to express them.
///
/// # Examples
///
/// ```rust
/// use presence_core::protocol::frame;
///
/// let f = frame::encode(2, true);
/// assert_eq!(f, [0x1C, 0x02, 0x64, 0x00, 0x00, 0x00, 0xFF, 0x7F]);
/// assert!(frame::verify(&f));
/// ```
pub fn encode(zone_id: u16, occupied: bool) -> Frame {
    let mut frame: Frame = [0u8; FRAME_LEN];
    frame[0] = FRAME_HEADER;
    frame[1] = zone_id.clamp(1, 255) as u8;
    frame[2] = FRAME_FUNCTION;
    frame[3] = if occupied { 0x00 } else { 0x01 };
    frame[4] = 0x00;
    frame[5] = 0x00;
    frame[6] = 0xFF;
    frame[7] = checksum(&frame);
    frame
}

/// Computes the additive checksum over the first seven bytes.
///
/// `checksum = (0x100 − (sum(byte0..=byte6) mod 0x100)) mod 0x100`
pub fn checksum(frame: &[u8]) -> u8 {
    let sum: u32 = frame.iter().take(7).map(|&b| b as u32).sum();
    ((0x100 - (sum % 0x100)) % 0x100) as u8
}

/// Returns `true` when `frame` is exactly [`FRAME_LEN`] bytes and its last
/// byte matches the checksum recomputed over the first seven.
pub fn verify(frame: &[u8]) -> bool {
    frame.len() == FRAME_LEN && frame[7] == checksum(frame)
}

/// Formats a frame as space-separated uppercase hex pairs, e.g.
/// `"1C 02 64 00 00 00 FF 7F"`. This is the representation shown on the
/// dashboard and written to the frame history.
pub fn to_hex(frame: &Frame) -> String {
    frame
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

// ── Tests ─────────────────────────────────────────────────────────────────────
