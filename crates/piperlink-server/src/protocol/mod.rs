//! Wyoming wire protocol: framing, raw events and typed messages.

mod codec;
mod error;
mod event;
mod messages;

pub use codec::{read_event, write_event, MAX_DATA_BYTES, MAX_HEADER_BYTES, MAX_PAYLOAD_BYTES};
pub use error::ProtocolError;
pub use event::{Event, Header, PROTOCOL_VERSION};
pub use messages::{
    Attribution, ClientEvent, Info, ServerEvent, Synthesize, SynthesizeVoice, TtsProgram,
    TtsSpeaker, TtsVoice,
};
