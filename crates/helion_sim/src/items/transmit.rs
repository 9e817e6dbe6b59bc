//! # Transmit
//!
//! Emits data packets onto the lanes: the payload travels as a `data`
//! lane packet headed by a packed `(channel, length)` word, addressed to
//! a configured target star.

use helion_core::coord::Coord;
use helion_core::save::{SaveReader, SaveResult, SaveWriter};
use helion_core::Word;
use helion_db::io::{Io, IoErr};
use helion_db::items::{ImId, Item};
use helion_vm::vm_pack;

use crate::chunk::{Chunk, ChunkApi};
use crate::items::{check_args, ActiveState};

/// Channels per star pair.
pub const CHANNEL_MAX: u8 = 16;
/// Payload words per data packet.
pub const PACKET_MAX: usize = 4;
/// Data packet travel speed.
pub const TRANSMIT_SPEED: u32 = 100;

/// Packs a data-packet header word.
#[must_use]
pub fn packet_pack(channel: u8, len: usize) -> Word {
    vm_pack(u32::from(channel), len as u32)
}

/// Unpacks a data-packet header word.
#[must_use]
pub fn packet_unpack(word: Word) -> (u8, usize) {
    let (channel, len) = helion_vm::vm_unpack(word);
    (channel.min(u32::from(CHANNEL_MAX - 1)) as u8, (len as usize).min(PACKET_MAX))
}

/// Transmitter state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Transmit {
    /// Own id.
    pub id: ImId,
    /// Emission channel.
    pub channel: u8,
    /// Destination star; nil until configured.
    pub target: Coord,
}

impl Transmit {
    /// Unconfigured transmitter.
    #[must_use]
    pub fn new(id: ImId) -> Self {
        Self { id, ..Self::default() }
    }

    /// Serialises the transmitter.
    pub fn save(&self, writer: &mut SaveWriter) {
        writer.write_u16(self.id.to_u16());
        writer.write_u8(self.channel);
        writer.write_u64(self.target.to_u64());
    }

    /// Deserialises a transmitter.
    pub fn load(reader: &mut SaveReader<'_>) -> SaveResult<Self> {
        Ok(Self {
            id: ImId::from_u16(reader.read_u16()?),
            channel: reader.read_u8()?,
            target: Coord::from_u64(reader.read_u64()?),
        })
    }
}

fn get(chunk: &mut Chunk, id: ImId) -> Option<&mut Transmit> {
    match chunk.state_mut(id)? {
        ActiveState::Transmit(state) => Some(state),
        _ => None,
    }
}

fn io_channel(api: &mut ChunkApi<'_>, id: ImId, args: &[Word]) {
    if !check_args(api, id, Io::Channel, args.len(), 1) {
        return;
    }
    if !(0..Word::from(CHANNEL_MAX)).contains(&args[0]) {
        api.log(id, Io::Channel.as_word(), IoErr::A0Invalid.as_word());
        return;
    }
    if let Some(transmit) = get(api.chunk, id) {
        transmit.channel = args[0] as u8;
    }
}

fn io_target(api: &mut ChunkApi<'_>, id: ImId, args: &[Word]) {
    if !check_args(api, id, Io::Target, args.len(), 1) {
        return;
    }
    if !Coord::validate(args[0]) {
        api.log(id, Io::Target.as_word(), IoErr::A0Invalid.as_word());
        return;
    }
    if let Some(transmit) = get(api.chunk, id) {
        transmit.target = Coord::from_word(args[0]);
    }
}

fn io_transmit(api: &mut ChunkApi<'_>, id: ImId, args: &[Word]) {
    if !check_args(api, id, Io::Transmit, args.len(), 1) {
        return;
    }

    let Some(transmit) = get(api.chunk, id) else { return };
    if transmit.target.is_nil() {
        api.log(id, Io::Transmit.as_word(), IoErr::InvalidState.as_word());
        return;
    }

    let target = transmit.target;
    let channel = transmit.channel;
    let len = args.len().min(PACKET_MAX);

    let mut packet = Vec::with_capacity(1 + len);
    packet.push(packet_pack(channel, len));
    packet.extend_from_slice(&args[..len]);

    api.lanes_launch(Item::Data, TRANSMIT_SPEED, target, packet);
}

/// IO entry point.
pub fn io(api: &mut ChunkApi<'_>, io: Io, src: ImId, dst: ImId, args: &[Word]) {
    match io {
        Io::Ping => {
            api.io(Io::Pong, dst, src, &[]);
        }
        Io::State => {
            let value = get(api.chunk, dst).map_or(0, |t| t.target.to_u64() as Word);
            api.io(Io::Return, dst, src, &[value]);
        }
        Io::Reset => {
            if let Some(transmit) = get(api.chunk, dst) {
                transmit.target = Coord::nil();
                transmit.channel = 0;
            }
        }
        Io::Channel => io_channel(api, dst, args),
        Io::Target => io_target(api, dst, args),
        Io::Transmit => io_transmit(api, dst, args),
        _ => {}
    }
}
