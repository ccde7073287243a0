//! Wire protocols: the inbound OSC/TUIO decoder and the outbound presence
//! frame codec.

pub mod frame;
pub mod osc;
pub mod tuio;

pub use frame::{encode, verify, Frame};
pub use osc::{decode_packet, DecodedPacket, OscArg, OscError, OscMessage};
pub use tuio::{parse_command, TuioCommand};
