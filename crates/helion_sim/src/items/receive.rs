//! # Receive
//!
//! Listens for data packets from one `(star, channel)` pair. The chunk's
//! listener set routes matching arrivals into a depth-1 ring: saturating
//! the link drops the older packet, and `io-receive` pops at most one.

use helion_core::coord::Coord;
use helion_core::save::{SaveReader, SaveResult, SaveWriter};
use helion_core::Word;
use helion_db::io::Io;
use helion_db::items::ImId;

use crate::chunk::{Chunk, ChunkApi};
use crate::items::transmit::{packet_unpack, CHANNEL_MAX, PACKET_MAX};
use crate::items::{check_args, ActiveState};

/// Buffered packets; older ones are dropped.
pub const RECEIVE_CAP: usize = 1;

/// One buffered packet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RxPacket {
    /// Channel it arrived on.
    pub channel: u8,
    /// Payload length.
    pub len: u8,
    /// Payload words.
    pub data: [Word; PACKET_MAX],
}

/// Receiver state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Receive {
    /// Own id.
    pub id: ImId,
    /// Listened channel.
    pub channel: u8,
    /// Listened-from star; nil until configured.
    pub target: Coord,
    head: u8,
    tail: u8,
    buffer: [RxPacket; RECEIVE_CAP],
}

impl Receive {
    /// Unconfigured receiver.
    #[must_use]
    pub fn new(id: ImId) -> Self {
        Self { id, ..Self::default() }
    }

    /// Serialises the receiver.
    pub fn save(&self, writer: &mut SaveWriter) {
        writer.write_u16(self.id.to_u16());
        writer.write_u8(self.channel);
        writer.write_u64(self.target.to_u64());
        writer.write_u8(self.head);
        writer.write_u8(self.tail);
        for packet in &self.buffer {
            writer.write_u8(packet.channel);
            writer.write_u8(packet.len);
            for &word in &packet.data {
                writer.write_word(word);
            }
        }
    }

    /// Deserialises a receiver.
    pub fn load(reader: &mut SaveReader<'_>) -> SaveResult<Self> {
        let id = ImId::from_u16(reader.read_u16()?);
        let channel = reader.read_u8()?;
        let target = Coord::from_u64(reader.read_u64()?);
        let head = reader.read_u8()?;
        let tail = reader.read_u8()?;
        let mut buffer = [RxPacket::default(); RECEIVE_CAP];
        for packet in &mut buffer {
            packet.channel = reader.read_u8()?;
            packet.len = reader.read_u8()?;
            for word in &mut packet.data {
                *word = reader.read_word()?;
            }
        }
        Ok(Self { id, channel, target, head, tail, buffer })
    }
}

fn get(chunk: &mut Chunk, id: ImId) -> Option<&mut Receive> {
    match chunk.state_mut(id)? {
        ActiveState::Receive(state) => Some(state),
        _ => None,
    }
}

fn listen(api: &mut ChunkApi<'_>, id: ImId) {
    let Some(receive) = get(api.chunk, id) else { return };
    if receive.target.is_nil() {
        return;
    }
    let (target, channel) = (receive.target, receive.channel);
    api.chunk.lanes_listen(id, target, channel);
}

fn unlisten(api: &mut ChunkApi<'_>, id: ImId) {
    let Some(receive) = get(api.chunk, id) else { return };
    if receive.target.is_nil() {
        return;
    }
    let (target, channel) = (receive.target, receive.channel);
    api.chunk.lanes_unlisten(id, target, channel);
}

fn reset(api: &mut ChunkApi<'_>, id: ImId) {
    unlisten(api, id);
    if let Some(receive) = get(api.chunk, id) {
        receive.channel = 0;
        receive.target = Coord::nil();
        receive.head = 0;
        receive.tail = 0;
        receive.buffer = [RxPacket::default(); RECEIVE_CAP];
    }
}

fn io_channel(api: &mut ChunkApi<'_>, id: ImId, args: &[Word]) {
    if !check_args(api, id, Io::Channel, args.len(), 1) {
        return;
    }
    if !(0..Word::from(CHANNEL_MAX)).contains(&args[0]) {
        return;
    }

    unlisten(api, id);
    if let Some(receive) = get(api.chunk, id) {
        receive.channel = args[0] as u8;
    }
    listen(api, id);
}

fn io_target(api: &mut ChunkApi<'_>, id: ImId, args: &[Word]) {
    if !check_args(api, id, Io::Target, args.len(), 1) {
        return;
    }

    unlisten(api, id);
    if let Some(receive) = get(api.chunk, id) {
        receive.target = Coord::from_word(args[0]);
    }
    listen(api, id);
}

/// Pops one buffered packet back to `src`; an empty buffer replies with
/// a zero-length `recv`.
fn io_receive(api: &mut ChunkApi<'_>, id: ImId, src: ImId) {
    let mut data = [0; PACKET_MAX];
    let mut len = 0;

    if let Some(receive) = get(api.chunk, id) {
        if receive.tail < receive.head {
            let packet = receive.buffer[usize::from(receive.tail) % RECEIVE_CAP];
            len = usize::from(packet.len);
            data = packet.data;
            receive.tail += 1;
        }
    }

    api.io(Io::Recv, id, src, &data[..len]);
}

/// Inbound packet delivery from the listener set. `args[0]` is the
/// packed header.
fn io_recv(api: &mut ChunkApi<'_>, id: ImId, args: &[Word]) {
    if args.is_empty() {
        return;
    }
    let (channel, len) = packet_unpack(args[0]);
    let len = len.min(args.len() - 1);

    let Some(receive) = get(api.chunk, id) else { return };

    // Cursor renormalisation keeps the u8 cursors from wrapping apart.
    if receive.head == u8::MAX {
        receive.head %= RECEIVE_CAP as u8;
        receive.tail %= RECEIVE_CAP as u8;
    }

    // Depth 1: an unread packet gets overwritten, the newest wins.
    if receive.head - receive.tail >= RECEIVE_CAP as u8 {
        receive.tail = receive.head - RECEIVE_CAP as u8 + 1;
    }

    let slot = &mut receive.buffer[usize::from(receive.head) % RECEIVE_CAP];
    slot.channel = channel;
    slot.len = len as u8;
    slot.data = [0; PACKET_MAX];
    slot.data[..len].copy_from_slice(&args[1..=len]);
    receive.head += 1;
}

/// IO entry point.
pub fn io(api: &mut ChunkApi<'_>, io: Io, src: ImId, dst: ImId, args: &[Word]) {
    match io {
        Io::Ping => {
            api.io(Io::Pong, dst, src, &[]);
        }
        Io::State => {
            let value = get(api.chunk, dst).map_or(0, |r| r.target.to_u64() as Word);
            api.io(Io::Return, dst, src, &[value]);
        }
        Io::Reset => reset(api, dst),
        Io::Channel => io_channel(api, dst, args),
        Io::Target => io_target(api, dst, args),
        Io::Receive => io_receive(api, dst, src),
        Io::Recv => io_recv(api, dst, args),
        _ => {}
    }
}
