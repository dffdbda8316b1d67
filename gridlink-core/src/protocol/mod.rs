//! Wire protocol: envelope framing, message assembly, and the logical
//! message codec.
//!
//! A logical message travels as one or more fixed-header envelopes on an
//! ordered byte stream. The [`frame_message`] send path packs a block chain
//! into envelopes; the [`MessageAssembler`] receive path validates and
//! reassembles them, handing complete messages to a [`MessageSink`] in
//! arrival order.

pub mod constants;

mod codec;
mod envelope;
mod framer;
mod message;

pub use codec::{Envelope, EnvelopeCodec};
pub use envelope::EnvelopeHeader;
pub use framer::{frame_message, AssembledMessage, MessageAssembler, MessageSink};
pub use message::{Message, NvPair, NvValue};
