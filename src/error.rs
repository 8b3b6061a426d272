//! Library and application errors

use std::io;

use miette::Diagnostic;
use thiserror::Error;

use crate::command::CommandType;

#[derive(Debug, Error, Diagnostic)]
#[non_exhaustive]
pub enum Error {
    #[error("Error while talking to the programmer")]
    #[diagnostic(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    #[diagnostic(transparent)]
    Hex(#[from] HexError),
    #[error(transparent)]
    #[diagnostic(transparent)]
    ChipDb(#[from] ChipDbError),
    #[error("The programmer did not identify itself")]
    #[diagnostic(
        code(picflash::handshake),
        help("Power-cycle the programmer and make sure nothing else holds the serial port")
    )]
    HandshakeFailed,
    #[error("The programmer speaks protocol '{0}'")]
    #[diagnostic(
        code(picflash::protocol),
        help("Only firmware speaking protocol P18A is supported")
    )]
    UnsupportedProtocol(String),
    #[error("Command {command} replied {received:#04x}, expected {expected:#04x}")]
    #[diagnostic(code(picflash::unexpected_reply))]
    UnexpectedReply {
        command: CommandType,
        expected: u8,
        received: u8,
    },
    #[error("Command {0} failed")]
    #[diagnostic(code(picflash::command_failed))]
    CommandFailed(CommandType),
    #[error("Calibration programming failed")]
    #[diagnostic(code(picflash::calibration))]
    CalibrationFailed,
    #[error("Fuse programming failed")]
    #[diagnostic(code(picflash::fuse))]
    FuseFailed,
    #[error("No chip detected in the programming socket")]
    #[diagnostic(
        code(picflash::socket),
        help("Insert the chip with pin 1 at the indicated position, or pass --icsp")
    )]
    ChipNotDetected,
    #[error("Unsupported core type '{0}'")]
    #[diagnostic(code(picflash::core_type))]
    UnsupportedCoreType(String),
    #[error("Unsupported power sequence '{0}'")]
    #[diagnostic(code(picflash::power_sequence))]
    UnsupportedPowerSequence(String),
    #[error("Unsupported instruction width ({0} bits)")]
    #[diagnostic(code(picflash::core_bits))]
    UnsupportedCoreBits(u8),
    #[error("Invalid ROM payload of {0} words")]
    #[diagnostic(
        code(picflash::rom_size),
        help("ROM data must fit the chip and be a multiple of 32 bytes")
    )]
    InvalidRomSize(usize),
    #[error("Invalid EEPROM payload of {0} bytes")]
    #[diagnostic(code(picflash::eeprom_size))]
    InvalidEepromSize(usize),
    #[error("Expected {expected} fuse values for a {bits} bit core, got {got}")]
    #[diagnostic(code(picflash::fuse_count))]
    InvalidFuseCount {
        bits: u8,
        expected: &'static str,
        got: usize,
    },
    #[error("{0} verification failed")]
    #[diagnostic(code(picflash::verification))]
    VerificationFailed(String),
    #[error("Invalid argument ({0})")]
    #[diagnostic(code(picflash::argument))]
    InvalidArgument(String),
    #[error(transparent)]
    #[diagnostic(code(picflash::io))]
    Io(#[from] io::Error),
}

#[derive(Debug, Error, Diagnostic)]
#[non_exhaustive]
pub enum ConnectionError {
    #[error("Failed to open serial port: {0}")]
    #[diagnostic(
        code(picflash::serial_open),
        help("Make sure the programmer is attached and the port name is correct")
    )]
    OpenFailed(#[source] serialport::Error),
    #[error("IO error while using serial port: {0}")]
    #[diagnostic(code(picflash::serial_error))]
    Serial(#[from] serialport::Error),
    #[error("Timed out waiting for the programmer to respond")]
    #[diagnostic(code(picflash::timeout))]
    Timeout,
    #[error("Serial port is not open")]
    #[diagnostic(code(picflash::not_open))]
    NotOpen,
    #[error("IO error while using serial port: {0}")]
    #[diagnostic(code(picflash::serial_io))]
    Io(#[from] io::Error),
}

#[derive(Debug, Error, Diagnostic)]
#[non_exhaustive]
pub enum HexError {
    #[error("Invalid record format at line {line}")]
    #[diagnostic(code(picflash::hex_format))]
    BadFormat { line: usize },
    #[error("Bad checksum for record at line {line}")]
    #[diagnostic(code(picflash::hex_checksum))]
    BadChecksum { line: usize },
    #[error("Record type {kind} at line {line} is not supported")]
    #[diagnostic(
        code(picflash::hex_record),
        help("Only record types 00, 01, 02 and 04 are understood")
    )]
    UnsupportedRecord { line: usize, kind: u8 },
    #[error("Data at address {addr:#x} overlaps an existing segment")]
    #[diagnostic(code(picflash::hex_overlap))]
    Overlap { addr: u32 },
    #[error("The byte count must be even ({0})")]
    #[diagnostic(code(picflash::hex_odd))]
    OddSize(usize),
    #[error(transparent)]
    #[diagnostic(code(picflash::hex_io))]
    Io(#[from] io::Error),
}

#[derive(Debug, Error, Diagnostic)]
#[non_exhaustive]
pub enum ChipDbError {
    #[error("Opening chip database '{path}' failed")]
    #[diagnostic(code(picflash::chipdb_open))]
    FileOpen {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("Chip type '{0}' is unknown")]
    #[diagnostic(
        code(picflash::unknown_chip),
        help("Use the `list` command to print the known chip names")
    )]
    ChipNotFound(String),
    #[error("Malformed value for {key} at line {line}")]
    #[diagnostic(code(picflash::chipdb_parse))]
    Parse { key: String, line: usize },
    #[error(transparent)]
    #[diagnostic(code(picflash::chipdb_io))]
    Io(#[from] io::Error),
}
