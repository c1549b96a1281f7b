pub mod builder;
pub mod codec;
pub mod commands;
pub mod packet;
pub mod stream_parser;

pub use builder::CommandBuilder;
pub use codec::SensorCodec;
pub use commands::{
    CATALOG, Command, CommandDescriptor, LedColor, LedMode, Opcode, build_command,
};
pub use packet::{Packet, checksum, parse_one};
pub use stream_parser::{DrainPackets, ParserState, StreamParser};
