//! # Gecko Gripper Equipment Communications Module
//!
//! The gripper speaks over a joint-state style transport: every message is a list of names plus a
//! parallel array of `f64` "slots". Inbound telemetry packs raw bytes into the bit patterns of the
//! slots (most significant byte first), outbound commands use the names and a single numeric
//! parameter per name.
//!
//! Inbound layout:
//!
//! | Slot | Bytes | Content |
//! |------|-------|---------|
//! | 0 | 0..3 | Magic `FF FF FD` |
//! | 0 | 3 | Packet type, `0x00` status, `0x01` science |
//! | 0 | 4..8 | Last status read time, `i32` |
//! | 1 | 0..2 | Status word, high byte then low byte |
//! | 1 | 2..4 | Delay in ms, `i16` |
//! | 1 | 4..6 | Experiment index, `i16` |
//! | 1 | 6 | Error code |

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::fmt;

use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Magic bytes at the start of the header slot.
pub const HEADER_MAGIC: [u8; 3] = [0xFF, 0xFF, 0xFD];

/// Packet type of a status packet.
pub const PACKET_TYPE_STATUS: u8 = 0x00;

/// Packet type of a science packet, which this codec does not decode.
pub const PACKET_TYPE_SCIENCE: u8 = 0x01;

/// Number of slots in a status packet.
pub const STATUS_PACKET_NUM_SLOTS: usize = 2;

/// Number of bytes carried by a single slot.
pub const BYTES_PER_SLOT: usize = 8;

/// Status word flag masks.
pub mod mask {
    pub const OVERTEMPERATURE: u16 = 0x8000;
    pub const EXPERIMENT_IN_PROGRESS: u16 = 0x0100;
    pub const FILE_IS_OPEN: u16 = 0x0020;
    pub const AUTOMATIC_MODE_ENABLE: u16 = 0x0008;
    pub const WRIST_LOCK: u16 = 0x0002;
    pub const ADHESIVE_ENGAGE: u16 = 0x0001;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Flags carried by the status word.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusFlags {
    /// The gripper has no temperature sensor, this flag is kept for protocol fidelity only.
    pub overtemperature: bool,
    pub experiment_in_progress: bool,
    pub file_is_open: bool,
    pub automatic_mode_enable: bool,
    pub wrist_lock: bool,
    pub adhesive_engage: bool
}

/// A decoded status packet.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusPacket {
    pub last_status_read_time: i32,

    /// The raw status word, used for change detection
    pub status_word: u16,

    pub flags: StatusFlags,

    /// Delay between records in milliseconds
    pub delay_ms: i16,

    pub exp_idx: i16,

    /// Decoded error status, `None` if the code is not a known one
    pub error_status: Option<ErrorStatus>,

    /// Raw error code
    pub error_code: u8
}

/// Outbound gripper message, names and positions are parallel arrays.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JointMsg {
    pub name: Vec<String>,
    pub position: Vec<f64>
}

/// Builder for a batch of gripper commands sent in a single message.
///
/// Order is preserved, the firmware is sensitive to it (engage must come before lock).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CmdBatch {
    cmds: Vec<(GripperCmd, f64)>
}

/// Control error feedback from the robot's controller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CtrlFeedback {
    /// Position error in meters
    pub error_position_m: f64
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Errors reported by the gripper firmware. Wire codes are 0 to 15 in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorStatus {
    NoError,
    ResultError,
    InstructionError,
    CRCError,
    DataRangeError,
    DataLenError,
    DataLimError,
    AccessError,
    InstrReadError,
    InstrWriteError,
    InstrTOFInit,
    InstrTOFRead,
    InstrSDInit,
    InstrSDOpen,
    InstrSDWrite,
    InstrSDRead
}

/// Primitive gripper commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GripperCmd {
    Open,
    Close,
    Engage,
    Disengage,
    Lock,
    Unlock,
    EnableAuto,
    DisableAuto,
    MarkGripper,
    SetDelay,
    OpenExp,
    NextRecord,
    SeekRecord,
    CloseExp,
    Status,
    Record,
    Exp,
    Delay
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Packet header does not start with the expected magic bytes")]
    InvalidHeader,

    #[error("Packet type 0x{0:02X} is not supported")]
    Unsupported(u8),

    #[error("Packet is truncated, expected {expected} slots but found {found}")]
    Truncated { expected: usize, found: usize },

    #[error("Byte payload of length {0} is not a whole number of slots")]
    MisalignedBytes(usize)
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl StatusFlags {
    /// Extract the flags from a status word.
    pub fn from_word(word: u16) -> Self {
        Self {
            overtemperature: word & mask::OVERTEMPERATURE != 0,
            experiment_in_progress: word & mask::EXPERIMENT_IN_PROGRESS != 0,
            file_is_open: word & mask::FILE_IS_OPEN != 0,
            automatic_mode_enable: word & mask::AUTOMATIC_MODE_ENABLE != 0,
            wrist_lock: word & mask::WRIST_LOCK != 0,
            adhesive_engage: word & mask::ADHESIVE_ENGAGE != 0
        }
    }

    /// Build the status word holding these flags.
    pub fn to_word(&self) -> u16 {
        let mut word = 0;
        let bits = [
            (self.overtemperature, mask::OVERTEMPERATURE),
            (self.experiment_in_progress, mask::EXPERIMENT_IN_PROGRESS),
            (self.file_is_open, mask::FILE_IS_OPEN),
            (self.automatic_mode_enable, mask::AUTOMATIC_MODE_ENABLE),
            (self.wrist_lock, mask::WRIST_LOCK),
            (self.adhesive_engage, mask::ADHESIVE_ENGAGE)
        ];
        for (set, m) in bits.iter() {
            if *set {
                word |= m;
            }
        }
        word
    }
}

impl StatusPacket {
    /// Build a status packet from its fields, the status word is derived from the flags.
    pub fn new(
        last_status_read_time: i32,
        flags: StatusFlags,
        delay_ms: i16,
        exp_idx: i16,
        error_status: ErrorStatus
    ) -> Self {
        Self {
            last_status_read_time,
            status_word: flags.to_word(),
            flags,
            delay_ms,
            exp_idx,
            error_status: Some(error_status),
            error_code: error_status.code()
        }
    }

    /// Encode the packet into its slot form.
    pub fn to_slots(&self) -> [f64; STATUS_PACKET_NUM_SLOTS] {
        let mut header = [0u8; BYTES_PER_SLOT];
        header[0..3].copy_from_slice(&HEADER_MAGIC);
        header[3] = PACKET_TYPE_STATUS;
        BigEndian::write_i32(&mut header[4..8], self.last_status_read_time);

        let mut status = [0u8; BYTES_PER_SLOT];
        BigEndian::write_u16(&mut status[0..2], self.status_word);
        BigEndian::write_i16(&mut status[2..4], self.delay_ms);
        BigEndian::write_i16(&mut status[4..6], self.exp_idx);
        status[6] = self.error_code;

        [bytes_to_slot(&header), bytes_to_slot(&status)]
    }
}

impl ErrorStatus {
    /// Get the error status matching a wire code.
    pub fn from_code(code: u8) -> Option<Self> {
        use ErrorStatus::*;
        let status = match code {
            0 => NoError,
            1 => ResultError,
            2 => InstructionError,
            3 => CRCError,
            4 => DataRangeError,
            5 => DataLenError,
            6 => DataLimError,
            7 => AccessError,
            8 => InstrReadError,
            9 => InstrWriteError,
            10 => InstrTOFInit,
            11 => InstrTOFRead,
            12 => InstrSDInit,
            13 => InstrSDOpen,
            14 => InstrSDWrite,
            15 => InstrSDRead,
            _ => return None
        };
        Some(status)
    }

    /// The wire code of this error status.
    pub fn code(&self) -> u8 {
        *self as u8
    }
}

impl Default for ErrorStatus {
    fn default() -> Self {
        ErrorStatus::NoError
    }
}

impl fmt::Display for ErrorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ErrorStatus::*;
        let label = match self {
            NoError => "No Error",
            ResultError => "Result Error",
            InstructionError => "Instruction Error",
            CRCError => "CRC Error",
            DataRangeError => "Data Range Error",
            DataLenError => "Data Length Error",
            DataLimError => "Data Limit Error",
            AccessError => "Access Error",
            InstrReadError => "Instruction Read Error",
            InstrWriteError => "Instruction Write Error",
            InstrTOFInit => "TOF Init Error",
            InstrTOFRead => "TOF Read Error",
            InstrSDInit => "SD Init Error",
            InstrSDOpen => "SD Open Error",
            InstrSDWrite => "SD Write Error",
            InstrSDRead => "SD Read Error"
        };
        write!(f, "{}", label)
    }
}

impl GripperCmd {
    /// Name of the command as understood by the gripper firmware.
    pub fn name(&self) -> &'static str {
        use GripperCmd::*;
        match self {
            Open => "gecko_gripper_open",
            Close => "gecko_gripper_close",
            Engage => "gecko_gripper_engage",
            Disengage => "gecko_gripper_disengage",
            Lock => "gecko_gripper_lock",
            Unlock => "gecko_gripper_unlock",
            EnableAuto => "gecko_gripper_enable_auto",
            DisableAuto => "gecko_gripper_disable_auto",
            MarkGripper => "gecko_gripper_mark_gripper",
            SetDelay => "gecko_gripper_set_delay",
            OpenExp => "gecko_gripper_open_exp",
            NextRecord => "gecko_gripper_next_record",
            SeekRecord => "gecko_gripper_seek_record",
            CloseExp => "gecko_gripper_close_exp",
            Status => "gecko_gripper_status",
            Record => "gecko_gripper_record",
            Exp => "gecko_gripper_exp",
            Delay => "gecko_gripper_delay"
        }
    }

    /// Get the command from its firmware name.
    pub fn from_name(name: &str) -> Option<Self> {
        use GripperCmd::*;
        [
            Open, Close, Engage, Disengage, Lock, Unlock, EnableAuto, DisableAuto, MarkGripper,
            SetDelay, OpenExp, NextRecord, SeekRecord, CloseExp, Status, Record, Exp, Delay
        ]
            .iter()
            .find(|c| c.name() == name)
            .copied()
    }
}

impl CmdBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a command with no parameter.
    pub fn with(self, cmd: GripperCmd) -> Self {
        self.with_param(cmd, 0.0)
    }

    /// Append a command with a parameter.
    pub fn with_param(mut self, cmd: GripperCmd, param: f64) -> Self {
        self.cmds.push((cmd, param));
        self
    }

    pub fn cmds(&self) -> &[(GripperCmd, f64)] {
        &self.cmds
    }

    pub fn is_empty(&self) -> bool {
        self.cmds.is_empty()
    }

    /// Build the outbound message.
    pub fn to_msg(&self) -> JointMsg {
        JointMsg {
            name: self.cmds.iter().map(|(c, _)| String::from(c.name())).collect(),
            position: self.cmds.iter().map(|(_, p)| *p).collect()
        }
    }
}

impl From<GripperCmd> for CmdBatch {
    fn from(cmd: GripperCmd) -> Self {
        CmdBatch::new().with(cmd)
    }
}

impl JointMsg {
    /// Iterate over the (name, parameter) pairs of the message.
    pub fn cmds(&self) -> impl Iterator<Item = (&str, f64)> {
        self.name
            .iter()
            .map(|n| n.as_str())
            .zip(self.position.iter().copied().chain(std::iter::repeat(0.0)))
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Decode an inbound telemetry message.
pub fn decode(slots: &[f64]) -> Result<StatusPacket, DecodeError> {
    // Header check, an empty message has no header at all
    let header = match slots.first() {
        Some(s) => slot_to_bytes(*s),
        None => return Err(DecodeError::InvalidHeader)
    };

    if header[0..3] != HEADER_MAGIC {
        return Err(DecodeError::InvalidHeader)
    }

    match header[3] {
        PACKET_TYPE_STATUS => (),
        t => return Err(DecodeError::Unsupported(t))
    }

    let status = match slots.get(1) {
        Some(s) => slot_to_bytes(*s),
        None => return Err(DecodeError::Truncated {
            expected: STATUS_PACKET_NUM_SLOTS,
            found: slots.len()
        })
    };

    let status_word = BigEndian::read_u16(&status[0..2]);
    let error_code = status[6];

    Ok(StatusPacket {
        last_status_read_time: BigEndian::read_i32(&header[4..8]),
        status_word,
        flags: StatusFlags::from_word(status_word),
        delay_ms: BigEndian::read_i16(&status[2..4]),
        exp_idx: BigEndian::read_i16(&status[4..6]),
        error_status: ErrorStatus::from_code(error_code),
        error_code
    })
}

/// Convert a slot into its 8 bytes, most significant first.
pub fn slot_to_bytes(slot: f64) -> [u8; BYTES_PER_SLOT] {
    let mut bytes = [0u8; BYTES_PER_SLOT];
    BigEndian::write_u64(&mut bytes, slot.to_bits());
    bytes
}

/// Convert 8 bytes, most significant first, into a slot.
pub fn bytes_to_slot(bytes: &[u8; BYTES_PER_SLOT]) -> f64 {
    f64::from_bits(BigEndian::read_u64(bytes))
}

/// Flatten slots into raw bytes for transport.
///
/// The header slot is a NaN bit pattern, which JSON cannot carry, so telemetry travels as bytes.
pub fn slots_to_bytes(slots: &[f64]) -> Vec<u8> {
    slots.iter().flat_map(|s| slot_to_bytes(*s).to_vec()).collect()
}

/// Rebuild slots from raw transport bytes.
pub fn slots_from_bytes(bytes: &[u8]) -> Result<Vec<f64>, DecodeError> {
    if bytes.len() % BYTES_PER_SLOT != 0 {
        return Err(DecodeError::MisalignedBytes(bytes.len()))
    }

    Ok(bytes
        .chunks(BYTES_PER_SLOT)
        .map(|c| f64::from_bits(BigEndian::read_u64(c)))
        .collect())
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn raw_slots(header: [u8; 8], status: [u8; 8]) -> Vec<f64> {
        vec![bytes_to_slot(&header), bytes_to_slot(&status)]
    }

    #[test]
    fn test_status_word_0101() {
        let slots = raw_slots(
            [0xFF, 0xFF, 0xFD, 0x00, 0x00, 0x00, 0x01, 0x2C],
            [0x01, 0x01, 0x00, 0xFA, 0x00, 0x03, 0x00, 0x00]
        );
        let pkt = decode(&slots).unwrap();

        assert_eq!(pkt.last_status_read_time, 300);
        assert_eq!(pkt.status_word, 0x0101);
        assert_eq!(pkt.delay_ms, 250);
        assert_eq!(pkt.exp_idx, 3);
        assert_eq!(pkt.error_status, Some(ErrorStatus::NoError));
        assert_eq!(pkt.flags, StatusFlags {
            experiment_in_progress: true,
            adhesive_engage: true,
            ..Default::default()
        });
    }

    #[test]
    fn test_each_mask_toggles_one_flag() {
        let masks = [
            mask::OVERTEMPERATURE,
            mask::EXPERIMENT_IN_PROGRESS,
            mask::FILE_IS_OPEN,
            mask::AUTOMATIC_MODE_ENABLE,
            mask::WRIST_LOCK,
            mask::ADHESIVE_ENGAGE
        ];
        let base = StatusFlags::from_word(0);
        assert_eq!(base, StatusFlags::default());

        for (i, m) in masks.iter().enumerate() {
            let flags = StatusFlags::from_word(*m);
            let set = [
                flags.overtemperature,
                flags.experiment_in_progress,
                flags.file_is_open,
                flags.automatic_mode_enable,
                flags.wrist_lock,
                flags.adhesive_engage
            ];
            for (j, s) in set.iter().enumerate() {
                assert_eq!(*s, i == j, "mask 0x{:04X}, flag {}", m, j);
            }
            assert_eq!(flags.to_word(), *m);
        }
    }

    #[test]
    fn test_negative_fields() {
        let flags = StatusFlags { file_is_open: true, ..Default::default() };
        let pkt = StatusPacket::new(-1, flags, -1, -1, ErrorStatus::InstrSDOpen);
        let decoded = decode(&pkt.to_slots()).unwrap();
        assert_eq!(decoded, pkt);
        assert_eq!(decoded.error_code, 13);
    }

    #[test]
    fn test_bad_header() {
        assert_eq!(decode(&[]), Err(DecodeError::InvalidHeader));
        assert_eq!(decode(&[0.0, 0.0]), Err(DecodeError::InvalidHeader));
        let slots = raw_slots([0xFF, 0xFF, 0xFE, 0, 0, 0, 0, 0], [0; 8]);
        assert_eq!(decode(&slots), Err(DecodeError::InvalidHeader));
    }

    #[test]
    fn test_science_and_unknown_types() {
        let slots = raw_slots([0xFF, 0xFF, 0xFD, 0x01, 0, 0, 0, 0], [0; 8]);
        assert_eq!(decode(&slots), Err(DecodeError::Unsupported(PACKET_TYPE_SCIENCE)));
        let slots = raw_slots([0xFF, 0xFF, 0xFD, 0x42, 0, 0, 0, 0], [0; 8]);
        assert_eq!(decode(&slots), Err(DecodeError::Unsupported(0x42)));
    }

    #[test]
    fn test_truncated() {
        let slots = vec![bytes_to_slot(&[0xFF, 0xFF, 0xFD, 0x00, 0, 0, 0, 0])];
        assert_eq!(
            decode(&slots),
            Err(DecodeError::Truncated { expected: 2, found: 1 })
        );
    }

    #[test]
    fn test_unknown_error_code() {
        let slots = raw_slots([0xFF, 0xFF, 0xFD, 0x00, 0, 0, 0, 0], [0, 0, 0, 0, 0, 0, 42, 0]);
        let pkt = decode(&slots).unwrap();
        assert_eq!(pkt.error_status, None);
        assert_eq!(pkt.error_code, 42);
    }

    #[test]
    fn test_error_codes() {
        for code in 0..16u8 {
            assert_eq!(ErrorStatus::from_code(code).unwrap().code(), code);
        }
        assert_eq!(ErrorStatus::from_code(16), None);
        assert_eq!(ErrorStatus::CRCError.to_string(), "CRC Error");
    }

    #[test]
    fn test_byte_transport() {
        let pkt = StatusPacket::new(7, StatusFlags::default(), 100, 2, ErrorStatus::NoError);
        let bytes = slots_to_bytes(&pkt.to_slots());
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[0..4], &[0xFF, 0xFF, 0xFD, 0x00]);
        assert_eq!(decode(&slots_from_bytes(&bytes).unwrap()).unwrap(), pkt);
        assert_eq!(slots_from_bytes(&bytes[..15]), Err(DecodeError::MisalignedBytes(15)));
    }

    #[test]
    fn test_batch_order() {
        let msg = CmdBatch::new()
            .with(GripperCmd::Engage)
            .with(GripperCmd::Lock)
            .with_param(GripperCmd::SetDelay, 250.0)
            .to_msg();
        assert_eq!(msg.name, vec![
            "gecko_gripper_engage",
            "gecko_gripper_lock",
            "gecko_gripper_set_delay"
        ]);
        assert_eq!(msg.position, vec![0.0, 0.0, 250.0]);
        assert_eq!(GripperCmd::from_name("gecko_gripper_lock"), Some(GripperCmd::Lock));
    }
}
