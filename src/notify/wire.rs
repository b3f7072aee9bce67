//! Control channel wire format.
//!
//! Every frame starts with a 16-byte little-endian [`MessageHeader`]. Event
//! frames carry a 56-byte [`EventPayload`] laid out like the C structure the
//! userspace listeners expect:
//!
//! ```text
//! offset  0  id         u32
//! offset  4  label      [u8; 42]  NUL padded
//! offset 46  (padding)
//! offset 48  nr         i32
//! offset 52  event      u8
//! offset 53  simulated  u8
//! offset 54  (padding)
//! ```
//!
//! The device id travels in the upper half of `msg_type`, the message kind in
//! the lower half.

use arrayvec::ArrayVec;
use axerrno::{ax_err, ax_err_type, AxResult};

/// Size of the label field, including the terminating NUL.
pub const LABEL_LEN: usize = 42;

/// Largest frame the channel produces.
pub const FRAME_LEN: usize = MessageHeader::SIZE + EventPayload::SIZE;

/// Message kinds carried in the low 16 bits of `msg_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MessageKind {
    Register = 1,
    Unregister = 2,
    Event = 3,
    Enable = 4,
    Disable = 5,
}

impl MessageKind {
    pub const fn from_u16(raw: u16) -> Option<Self> {
        match raw {
            1 => Some(Self::Register),
            2 => Some(Self::Unregister),
            3 => Some(Self::Event),
            4 => Some(Self::Enable),
            5 => Some(Self::Disable),
            _ => None,
        }
    }

    #[inline]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Total frame length, header included.
    pub len: u32,
    /// Kind in bits 15:0, device id in bits 31:16.
    pub msg_type: u32,
    pub seq: u32,
    /// Sender identity; 0 for frames produced here.
    pub pid: u32,
}

impl MessageHeader {
    pub const SIZE: usize = 16;

    pub const fn new(kind: MessageKind, device: u16, payload_len: usize) -> Self {
        Self {
            len: (Self::SIZE + payload_len) as u32,
            msg_type: ((device as u32) << 16) | kind.as_u16() as u32,
            seq: 0,
            pid: 0,
        }
    }

    pub const fn with_seq(mut self, seq: u32) -> Self {
        self.seq = seq;
        self
    }

    pub const fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    /// Decoded message kind, `None` for unknown values.
    pub const fn kind(&self) -> Option<MessageKind> {
        MessageKind::from_u16(self.msg_type as u16)
    }

    pub const fn device(&self) -> u16 {
        (self.msg_type >> 16) as u16
    }

    pub fn serialize(&self, buffer: &mut [u8; Self::SIZE]) {
        buffer[0..4].copy_from_slice(&self.len.to_le_bytes());
        buffer[4..8].copy_from_slice(&self.msg_type.to_le_bytes());
        buffer[8..12].copy_from_slice(&self.seq.to_le_bytes());
        buffer[12..16].copy_from_slice(&self.pid.to_le_bytes());
    }

    pub fn deserialize(buffer: &[u8; Self::SIZE]) -> Self {
        Self {
            len: read_u32(buffer, 0),
            msg_type: read_u32(buffer, 4),
            seq: read_u32(buffer, 8),
            pid: read_u32(buffer, 12),
        }
    }
}

/// Payload of an EVENT frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventPayload {
    /// Subscriber the event is addressed to.
    pub id: u32,
    label: [u8; LABEL_LEN],
    /// Slot number of the reporting engine.
    pub nr: i32,
    /// `true` when the unit appeared or became healthy.
    pub event: bool,
    /// `true` for events injected through the simulation interface.
    pub simulated: bool,
}

impl EventPayload {
    pub const SIZE: usize = 56;

    const NR_OFF: usize = 48;
    const EVENT_OFF: usize = 52;
    const SIMULATED_OFF: usize = 53;

    /// Builds a payload. Fails with `InvalidInput` if `label` does not leave
    /// room for the terminating NUL.
    pub fn new(id: u32, label: &str, nr: i32, event: bool, simulated: bool) -> AxResult<Self> {
        let bytes = label.as_bytes();
        if bytes.len() >= LABEL_LEN {
            return ax_err!(InvalidInput, "event label too long");
        }

        let mut raw = [0u8; LABEL_LEN];
        raw[..bytes.len()].copy_from_slice(bytes);
        Ok(Self {
            id,
            label: raw,
            nr,
            event,
            simulated,
        })
    }

    /// Label up to the first NUL; empty if it is not valid UTF-8.
    pub fn label(&self) -> &str {
        let end = self.label.iter().position(|&b| b == 0).unwrap_or(LABEL_LEN);
        core::str::from_utf8(&self.label[..end]).unwrap_or("")
    }

    pub fn serialize(&self, buffer: &mut [u8; Self::SIZE]) {
        buffer.fill(0);
        buffer[0..4].copy_from_slice(&self.id.to_le_bytes());
        buffer[4..4 + LABEL_LEN].copy_from_slice(&self.label);
        buffer[Self::NR_OFF..Self::NR_OFF + 4].copy_from_slice(&self.nr.to_le_bytes());
        buffer[Self::EVENT_OFF] = self.event as u8;
        buffer[Self::SIMULATED_OFF] = self.simulated as u8;
    }

    pub fn deserialize(buffer: &[u8; Self::SIZE]) -> Self {
        let mut label = [0u8; LABEL_LEN];
        label.copy_from_slice(&buffer[4..4 + LABEL_LEN]);
        Self {
            id: read_u32(buffer, 0),
            label,
            nr: read_u32(buffer, Self::NR_OFF) as i32,
            event: buffer[Self::EVENT_OFF] != 0,
            simulated: buffer[Self::SIMULATED_OFF] != 0,
        }
    }
}

/// Encodes a complete EVENT frame.
pub fn encode_event(device: u16, seq: u32, payload: &EventPayload) -> [u8; FRAME_LEN] {
    let mut head = [0u8; MessageHeader::SIZE];
    MessageHeader::new(MessageKind::Event, device, EventPayload::SIZE)
        .with_seq(seq)
        .serialize(&mut head);
    let mut body = [0u8; EventPayload::SIZE];
    payload.serialize(&mut body);

    let mut frame = [0u8; FRAME_LEN];
    frame[..MessageHeader::SIZE].copy_from_slice(&head);
    frame[MessageHeader::SIZE..].copy_from_slice(&body);
    frame
}

/// Decoded inbound control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    /// Subscribe `pid` to events.
    Register { pid: u32 },
    /// Drop the current subscription.
    Unregister { pid: u32 },
    /// Enable the engine `device`, giving it its slot number.
    Enable { device: u16, slot: u32 },
    /// Disable the engine `device`.
    Disable { device: u16 },
}

impl ControlMessage {
    /// Decodes one inbound frame.
    ///
    /// Short or inconsistent frames fail with `InvalidData`; unknown kinds and
    /// outbound-only EVENT frames fail with `InvalidInput`.
    pub fn decode(frame: &[u8]) -> AxResult<Self> {
        let head: &[u8; MessageHeader::SIZE] = frame
            .get(..MessageHeader::SIZE)
            .and_then(|h| h.try_into().ok())
            .ok_or_else(|| ax_err_type!(InvalidData, "control frame shorter than header"))?;
        let header = MessageHeader::deserialize(head);

        let len = header.len as usize;
        if len < MessageHeader::SIZE || len > frame.len() {
            warn!("control frame length {} does not match {} received bytes", len, frame.len());
            return ax_err!(InvalidData, "control frame length mismatch");
        }

        let pid = header.pid;
        let device = header.device();
        match header.kind() {
            Some(MessageKind::Register) => Ok(Self::Register { pid }),
            Some(MessageKind::Unregister) => Ok(Self::Unregister { pid }),
            Some(MessageKind::Disable) => Ok(Self::Disable { device }),
            Some(MessageKind::Enable) => {
                if len < MessageHeader::SIZE + 4 {
                    return ax_err!(InvalidData, "enable frame without slot number");
                }
                let slot = read_u32(frame, MessageHeader::SIZE);
                Ok(Self::Enable { device, slot })
            }
            Some(MessageKind::Event) => ax_err!(InvalidInput, "event frames are outbound only"),
            None => {
                warn!("unknown control message type {:#x}", header.msg_type);
                ax_err!(InvalidInput, "unknown control message kind")
            }
        }
    }

    /// Encodes the message the way a userspace listener sends it.
    pub fn encode(&self, seq: u32) -> ArrayVec<u8, FRAME_LEN> {
        let (kind, device, pid, slot) = match *self {
            Self::Register { pid } => (MessageKind::Register, 0, pid, None),
            Self::Unregister { pid } => (MessageKind::Unregister, 0, pid, None),
            Self::Enable { device, slot } => (MessageKind::Enable, device, 0, Some(slot)),
            Self::Disable { device } => (MessageKind::Disable, device, 0, None),
        };
        let payload_len = if slot.is_some() { 4 } else { 0 };

        let mut head = [0u8; MessageHeader::SIZE];
        MessageHeader::new(kind, device, payload_len)
            .with_seq(seq)
            .with_pid(pid)
            .serialize(&mut head);

        let mut frame = ArrayVec::new();
        frame.extend(head);
        if let Some(slot) = slot {
            frame.extend(slot.to_le_bytes());
        }
        frame
    }
}

#[inline]
fn read_u32(buffer: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([buffer[off], buffer[off + 1], buffer[off + 2], buffer[off + 3]])
}
