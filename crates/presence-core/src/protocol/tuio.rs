//! TUIO 2Dcur command extraction.
//!
//! TUIO rides on OSC: every cursor update arrives as an OSC message on the
//! `/tuio/2Dcur` address whose first argument names the command. Only the
//! 2Dcur profile is interpreted; messages for other profiles pass through
//! the decoder but produce no command here.

use crate::protocol::osc::OscMessage;

/// The OSC address of the TUIO 2D cursor profile.
pub const TUIO_2DCUR_ADDRESS: &str = "/tuio/2Dcur";

/// A recognised TUIO 2Dcur command.
#[derive(Debug, Clone, PartialEq)]
pub enum TuioCommand {
    /// `set s_id x y [X Y m]` — upsert one cursor. Velocity and acceleration
    /// trailers are not tracked and are dropped during extraction.
    Set { id: i32, x: f32, y: f32 },
    /// `alive s_id*` — the full list of live session ids for this frame.
    Alive(Vec<i32>),
    /// `fseq n` — frame sequence counter. Carried for completeness; the
    /// tracker ignores it.
    Fseq(i32),
}

/// Extracts a [`TuioCommand`] from a decoded OSC message.
///
/// Returns `None` for non-2Dcur addresses, unknown commands, and `set`
/// messages with missing or non-numeric fields — all of which are skipped
/// silently, the way a tracker-facing ingest path has to be.
pub fn parse_command(msg: &OscMessage) -> Option<TuioCommand> {
    if msg.address != TUIO_2DCUR_ADDRESS {
        return None;
    }
    let command = msg.args.first()?.as_str()?;

    match command {
        "set" => {
            if msg.args.len() < 4 {
                return None;
            }
            let id = msg.args[1].as_i32()?;
            let x = msg.args[2].as_f32()?;
            let y = msg.args[3].as_f32()?;
            if !x.is_finite() || !y.is_finite() {
                return None;
            }
            Some(TuioCommand::Set { id, x, y })
        }
        "alive" => {
            let ids = msg.args[1..]
                .iter()
                .filter_map(|a| a.as_i32())
                .collect();
            Some(TuioCommand::Alive(ids))
        }
        "fseq" => {
            let n = msg.args.get(1).and_then(|a| a.as_i32())?;
            Some(TuioCommand::Fseq(n))
        }
        _ => None,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
