//! Commands understood by the P18A firmware
//!
//! Once the board has been steered into its command table (see
//! [`Programmer::command_start`]), each operation is started by a single
//! command byte, optionally followed by big-endian parameters. Most commands
//! acknowledge with a fixed reply byte before or after their payload.
//!
//! [`Programmer::command_start`]: crate::programmer::Programmer::command_start

use strum::Display;

/// Jump from the idle loop into the command table.
pub(crate) const JUMP_COMMAND_TABLE: u8 = b'P';

#[derive(Copy, Clone, Debug, PartialEq, Eq, Display)]
#[repr(u8)]
#[non_exhaustive]
pub enum CommandType {
    /// Return to the idle loop; the board echoes `'Q'`
    CommandTable = 1,
    InitVariables = 3,
    VoltagesOn = 4,
    VoltagesOff = 5,
    CycleVoltages = 6,
    ProgramRom = 7,
    ProgramEeprom = 8,
    ProgramConfig = 9,
    ProgramCalibration = 10,
    ReadRom = 11,
    ReadEeprom = 12,
    ReadConfig = 13,
    EraseChip = 14,
    BlankCheckRom = 15,
    BlankCheckEeprom = 16,
    CommitFuse18F = 17,
    DetectChipInSocket = 18,
    DetectChipOutOfSocket = 19,
    QueryProtocol = 21,
}

impl CommandType {
    /// The acknowledgement byte the firmware answers with.
    ///
    /// [ReadRom], [ReadEeprom] and [QueryProtocol] reply with raw data
    /// instead and never go through the acknowledgement path.
    ///
    /// [ReadRom]: CommandType::ReadRom
    /// [ReadEeprom]: CommandType::ReadEeprom
    /// [QueryProtocol]: CommandType::QueryProtocol
    pub fn ack(&self) -> u8 {
        match self {
            CommandType::CommandTable => b'Q',
            CommandType::InitVariables => b'I',
            CommandType::VoltagesOn | CommandType::CycleVoltages => b'V',
            CommandType::VoltagesOff => b'v',
            CommandType::ReadConfig => b'C',
            CommandType::DetectChipInSocket | CommandType::DetectChipOutOfSocket => b'A',
            _ => b'Y',
        }
    }
}
