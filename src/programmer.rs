//! P18A protocol engine
//!
//! [`Programmer`] drives a K128/K149/K150 board over a [`Transport`]. The
//! link is half duplex and strictly request/response: every command owns
//! the line until its reply (or its last streamed acknowledgement) has been
//! consumed, and replies are gathered by polling the transport's short read
//! timeout until the expected byte count is in.
//!
//! Programming voltages are stateful on the board; callers are expected to
//! pair every [`set_programming_voltages(true)`] with a matching
//! `false` call on all of their exit paths.
//!
//! [`set_programming_voltages(true)`]: Programmer::set_programming_voltages

use log::{debug, info};

use crate::command::{CommandType, JUMP_COMMAND_TABLE};
use crate::error::{ConnectionError, Error};
use crate::hex::hex_dump;
use crate::interface::Transport;
use crate::progress::{reborrow_progress, ProgressCallbacks};
use crate::target::Properties;

/// Consecutive empty polls tolerated before a reply is considered lost
/// (the transport returns after ~100 ms when the line is silent).
const MAX_IDLE_READS: usize = 100;
/// Polls granted to the protocol identification query
const PROTOCOL_QUERY_READS: usize = 10;
/// ROM data is streamed in chunks of this many bytes, one ack per chunk
const ROM_CHUNK: usize = 32;
/// Payload length of a configuration read
const CONFIG_READOUT_LEN: usize = 26;

/// Decoded payload of a configuration read
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigReadout {
    pub chip_id: u16,
    pub id_bytes: [u8; 8],
    pub fuses: Vec<u16>,
    /// Oscillator calibration word, for chips that keep one in ROM
    pub calibration: Option<u16>,
}

pub struct Programmer<P: Transport> {
    port: P,
    buffer: Vec<u8>,
    version: u8,
    protocol: String,
    vpp_enabled: bool,
    props: Properties,
}

impl<P: Transport> Programmer<P> {
    pub fn new(port: P) -> Self {
        Programmer {
            port,
            buffer: Vec::new(),
            version: 0,
            protocol: String::new(),
            vpp_enabled: false,
            props: Properties::default(),
        }
    }

    /// Stores the resolved chip parameters the following commands run
    /// against.
    pub fn configure(&mut self, props: Properties) {
        self.props = props;
    }

    pub fn properties(&self) -> &Properties {
        &self.props
    }

    #[cfg(test)]
    pub(crate) fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    pub fn version_name(&self) -> &'static str {
        match self.version {
            0 => "K128",
            1 => "K149-A",
            2 => "K149-B",
            3 => "K150",
            _ => "",
        }
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// Opens and resets the transport, consumes the board's greeting and
    /// checks that the firmware speaks P18A.
    pub fn connect(&mut self) -> Result<(), Error> {
        self.port.open()?;
        if !self.port.is_open() {
            return Err(ConnectionError::NotOpen.into());
        }
        self.port.reset()?;

        self.fill(2)?;
        if self.buffer[0] != b'B' {
            return Err(Error::HandshakeFailed);
        }
        self.version = self.buffer[1];

        self.command_start()?;
        self.send(&[CommandType::QueryProtocol as u8])?;
        self.fill_bounded(4, Some(PROTOCOL_QUERY_READS), None)?;
        let protocol = String::from_utf8_lossy(&self.buffer).into_owned();
        if protocol != "P18A" {
            return Err(Error::UnsupportedProtocol(protocol));
        }
        self.protocol = protocol;
        self.command_end()?;

        info!(
            "Programmer {} speaks protocol {}",
            self.version_name(),
            self.protocol
        );
        Ok(())
    }

    pub fn disconnect(&mut self) {
        self.port.close();
    }

    /// Steers the board from its idle loop into the command table: request
    /// the idle acknowledgement (discarding anything else on the line),
    /// then jump in with `'P'`.
    pub fn command_start(&mut self) -> Result<(), Error> {
        self.send(&[CommandType::CommandTable as u8])?;
        loop {
            self.fill(1)?;
            if self.buffer[0] == b'Q' {
                break;
            }
            debug!("discarding stray byte {:#04x}", self.buffer[0]);
        }

        self.send(&[JUMP_COMMAND_TABLE])?;
        self.fill(1)?;
        if self.buffer[0] != JUMP_COMMAND_TABLE {
            return Err(Error::UnexpectedReply {
                command: CommandType::CommandTable,
                expected: JUMP_COMMAND_TABLE,
                received: self.buffer[0],
            });
        }
        Ok(())
    }

    /// Returns the board to its idle loop.
    pub fn command_end(&mut self) -> Result<(), Error> {
        self.send(&[CommandType::CommandTable as u8])?;
        self.expect(CommandType::CommandTable)
    }

    /// Blocks until the user has put a chip into the socket. A no-op for
    /// parts without a socket image (ICSP-only).
    pub fn wait_until_chip_in_socket(&mut self) -> Result<(), Error> {
        if self.props.socket_hint.is_empty() {
            return Ok(());
        }
        info!(
            "Waiting for user to insert chip into socket with pin 1 at {}",
            self.props.socket_hint
        );

        self.command_start()?;
        self.send(&[CommandType::DetectChipInSocket as u8])?;
        self.fill_bounded(2, None, None)?;
        if self.buffer[0] != b'A' {
            return Err(Error::UnexpectedReply {
                command: CommandType::DetectChipInSocket,
                expected: b'A',
                received: self.buffer[0],
            });
        }
        let present = self.buffer[1] == b'Y';
        self.command_end()?;
        if present {
            Ok(())
        } else {
            Err(Error::ChipNotDetected)
        }
    }

    /// Blocks until the socket is empty again. A no-op for ICSP-only parts.
    pub fn wait_until_chip_out_of_socket(&mut self) -> Result<(), Error> {
        if self.props.socket_hint.is_empty() {
            return Ok(());
        }
        info!("Waiting until chip is out of the socket");

        self.command_start()?;
        self.send(&[CommandType::DetectChipOutOfSocket as u8])?;
        self.fill_bounded(2, None, None)?;
        if self.buffer[0] != b'A' {
            return Err(Error::UnexpectedReply {
                command: CommandType::DetectChipOutOfSocket,
                expected: b'A',
                received: self.buffer[0],
            });
        }
        let removed = self.buffer[1] == b'Y';
        self.command_end()?;
        if removed {
            Ok(())
        } else {
            Err(Error::CommandFailed(CommandType::DetectChipOutOfSocket))
        }
    }

    /// Transmits the chip parameter block. ICSP wiring remaps the power
    /// sequence code, see [`Properties::power_sequence_effective`].
    pub fn initialize_programming_variables(&mut self, icsp_mode: bool) -> Result<(), Error> {
        info!("Initializing programming interface");

        let rom = (self.props.rom_size as u16).to_be_bytes();
        let eeprom = (self.props.eeprom_size as u16).to_be_bytes();
        let msg = [
            CommandType::InitVariables as u8,
            rom[0],
            rom[1],
            eeprom[0],
            eeprom[1],
            self.props.core_type,
            self.props.init_flags(),
            self.props.program_delay,
            self.props.power_sequence_effective(icsp_mode),
            self.props.erase_mode,
            self.props.program_tries,
            self.props.panel_sizing,
        ];
        self.send(&msg)?;
        self.expect(CommandType::InitVariables)
    }

    pub fn set_programming_voltages(&mut self, on: bool) -> Result<(), Error> {
        let command = if on {
            CommandType::VoltagesOn
        } else {
            CommandType::VoltagesOff
        };
        self.send(&[command as u8])?;
        self.expect(command)?;
        self.vpp_enabled = on;
        Ok(())
    }

    /// Drops and reasserts the programming voltages in one firmware
    /// operation. On failure the board is returned to its idle loop and the
    /// voltage state is considered off.
    pub fn cycle_programming_voltages(&mut self) -> Result<(), Error> {
        self.send(&[CommandType::CycleVoltages as u8])?;
        self.fill(1)?;
        if self.buffer[0] != b'V' {
            self.command_end()?;
            self.vpp_enabled = false;
            return Err(Error::CommandFailed(CommandType::CycleVoltages));
        }
        self.vpp_enabled = true;
        Ok(())
    }

    /// Streams a ROM image, 32 bytes per acknowledged chunk. The image
    /// must fit the chip and its length must be a multiple of the chunk
    /// size; the board closes the transfer with `'P'`.
    pub fn program_rom(
        &mut self,
        data: &[u8],
        mut progress: Option<&mut dyn ProgressCallbacks>,
    ) -> Result<(), Error> {
        debug_assert!(self.vpp_enabled);

        let words = data.len() / 2;
        if words > self.props.rom_size as usize || data.len() % ROM_CHUNK != 0 {
            return Err(Error::InvalidRomSize(words));
        }

        let size = (words as u16).to_be_bytes();
        self.send(&[CommandType::ProgramRom as u8, size[0], size[1]])?;
        self.expect(CommandType::ProgramRom)?;

        if let Some(p) = progress.as_mut() {
            p.init(data.len(), "writing ROM");
        }
        for (index, chunk) in data.chunks(ROM_CHUNK).enumerate() {
            self.send(chunk)?;
            self.expect(CommandType::ProgramRom)?;
            if let Some(p) = progress.as_mut() {
                p.update((index + 1) * ROM_CHUNK);
            }
        }
        if let Some(p) = progress.as_mut() {
            p.finish();
        }

        self.fill(1)?;
        if self.buffer[0] != b'P' {
            return Err(Error::UnexpectedReply {
                command: CommandType::ProgramRom,
                expected: b'P',
                received: self.buffer[0],
            });
        }
        Ok(())
    }

    /// Streams an EEPROM image two bytes at a time; a zero word closes the
    /// transfer and the board answers `'P'`.
    pub fn program_eeprom(
        &mut self,
        data: &[u8],
        mut progress: Option<&mut dyn ProgressCallbacks>,
    ) -> Result<(), Error> {
        debug_assert!(self.vpp_enabled);

        if data.len() > self.props.eeprom_size as usize || data.len() % 2 != 0 {
            return Err(Error::InvalidEepromSize(data.len()));
        }

        let size = (data.len() as u16).to_be_bytes();
        self.send(&[CommandType::ProgramEeprom as u8, size[0], size[1]])?;
        self.expect(CommandType::ProgramEeprom)?;

        if let Some(p) = progress.as_mut() {
            p.init(data.len(), "writing EEPROM");
        }
        for (index, pair) in data.chunks(2).enumerate() {
            self.send(pair)?;
            self.expect(CommandType::ProgramEeprom)?;
            if let Some(p) = progress.as_mut() {
                p.update(2 * (index + 1));
            }
        }
        if let Some(p) = progress.as_mut() {
            p.finish();
        }

        self.send(&[0, 0])?;
        self.fill(1)?;
        if self.buffer[0] != b'P' {
            return Err(Error::UnexpectedReply {
                command: CommandType::ProgramEeprom,
                expected: b'P',
                received: self.buffer[0],
            });
        }
        Ok(())
    }

    /// Writes the ID bytes and fuse words. The message layout depends on
    /// the core family: 18F parts take eight ID bytes and exactly seven
    /// fuses, everything else takes four ID bytes and one fuse (two for
    /// the odd 14 bit parts that have a second one).
    pub fn program_config(&mut self, id: &[u8], fuses: &[u16]) -> Result<(), Error> {
        debug_assert!(self.vpp_enabled);

        let mut msg = vec![CommandType::ProgramConfig as u8, b'0', b'0'];
        match self.props.core_bits {
            16 => {
                if fuses.len() != 7 {
                    return Err(Error::InvalidFuseCount {
                        bits: self.props.core_bits,
                        expected: "7",
                        got: fuses.len(),
                    });
                }
                let mut id_data = id.to_vec();
                id_data.resize(8, 0);
                msg.extend_from_slice(&id_data);
                for fuse in fuses {
                    msg.extend_from_slice(&fuse.to_le_bytes());
                }
            }
            _ => {
                if fuses.is_empty() || fuses.len() > 2 {
                    return Err(Error::InvalidFuseCount {
                        bits: self.props.core_bits,
                        expected: "1 or 2",
                        got: fuses.len(),
                    });
                }
                let mut id_data = id.to_vec();
                id_data.resize(4, 0);
                msg.extend_from_slice(&id_data);
                msg.extend_from_slice(b"FFFF");
                msg.extend_from_slice(&fuses[0].to_le_bytes());
                msg.extend_from_slice(&[0xff; 12]);
            }
        }

        self.send(&msg)?;
        self.expect(CommandType::ProgramConfig)
    }

    /// Second fuse programming phase of the 18F parts; nothing to do on
    /// the smaller cores.
    pub fn commit_18f_fuse(&mut self) -> Result<(), Error> {
        debug_assert!(self.vpp_enabled);

        if self.props.core_bits != 16 {
            return Ok(());
        }
        self.send(&[CommandType::CommitFuse18F as u8])?;
        self.expect(CommandType::CommitFuse18F)
    }

    /// Writes the oscillator calibration word together with its fuse. The
    /// board reports which of the two failed.
    pub fn program_calibration(&mut self, cal: u16, fuse: u16) -> Result<(), Error> {
        debug_assert!(self.vpp_enabled);

        let cal = cal.to_be_bytes();
        let fuse = fuse.to_be_bytes();
        self.send(&[
            CommandType::ProgramCalibration as u8,
            cal[0],
            cal[1],
            fuse[0],
            fuse[1],
        ])?;
        self.fill(1)?;
        match self.buffer[0] {
            b'Y' => Ok(()),
            b'C' => Err(Error::CalibrationFailed),
            b'F' => Err(Error::FuseFailed),
            _ => Err(Error::CommandFailed(CommandType::ProgramCalibration)),
        }
    }

    pub fn erase_chip(&mut self) -> Result<(), Error> {
        debug_assert!(self.vpp_enabled);

        self.send(&[CommandType::EraseChip as u8])?;
        self.expect(CommandType::EraseChip)
    }

    /// Firmware-side ROM blank check. The board emits `'B'` while it is
    /// still scanning. Known to report `'N'` spuriously on some firmware
    /// revisions; the workflows read the region back instead.
    pub fn is_blank_rom(&mut self) -> Result<bool, Error> {
        let high = (self.props.rom_blank >> 8) as u8;
        self.send(&[CommandType::BlankCheckRom as u8, high])?;
        loop {
            self.fill(1)?;
            match self.buffer[0] {
                b'B' => continue,
                b'Y' => return Ok(true),
                b'N' | b'C' => return Ok(false),
                received => {
                    return Err(Error::UnexpectedReply {
                        command: CommandType::BlankCheckRom,
                        expected: b'Y',
                        received,
                    })
                }
            }
        }
    }

    /// Firmware-side EEPROM blank check, with the same reliability caveat
    /// as [`is_blank_rom`](Programmer::is_blank_rom).
    pub fn is_blank_eeprom(&mut self) -> Result<bool, Error> {
        self.send(&[CommandType::BlankCheckEeprom as u8])?;
        self.fill(1)?;
        match self.buffer[0] {
            b'Y' => Ok(true),
            b'N' => Ok(false),
            received => Err(Error::UnexpectedReply {
                command: CommandType::BlankCheckEeprom,
                expected: b'Y',
                received,
            }),
        }
    }

    /// Reads the whole ROM, two bytes per word.
    pub fn read_rom(
        &mut self,
        mut progress: Option<&mut dyn ProgressCallbacks>,
    ) -> Result<Vec<u8>, Error> {
        debug_assert!(self.vpp_enabled);

        let size = 2 * self.props.rom_size as usize;
        self.send(&[CommandType::ReadRom as u8])?;

        if let Some(p) = progress.as_mut() {
            p.init(size, "reading ROM");
        }
        let result = self.fill_bounded(size, Some(MAX_IDLE_READS), reborrow_progress(&mut progress));
        if let Some(p) = progress.as_mut() {
            p.finish();
        }
        result?;

        if self.buffer.len() != size {
            return Err(Error::CommandFailed(CommandType::ReadRom));
        }
        Ok(self.buffer.clone())
    }

    /// Reads the whole EEPROM, one byte per address.
    pub fn read_eeprom(
        &mut self,
        mut progress: Option<&mut dyn ProgressCallbacks>,
    ) -> Result<Vec<u8>, Error> {
        debug_assert!(self.vpp_enabled);

        let size = self.props.eeprom_size as usize;
        self.send(&[CommandType::ReadEeprom as u8])?;

        if let Some(p) = progress.as_mut() {
            p.init(size, "reading EEPROM");
        }
        let result = self.fill_bounded(size, Some(MAX_IDLE_READS), reborrow_progress(&mut progress));
        if let Some(p) = progress.as_mut() {
            p.finish();
        }
        result?;

        if self.buffer.len() != size {
            return Err(Error::CommandFailed(CommandType::ReadEeprom));
        }
        Ok(self.buffer.clone())
    }

    /// Reads the configuration block: chip id, ID bytes, as many fuses as
    /// the chip has, and the calibration word where one exists. Fuse pairs
    /// come back little endian, unlike everything else on this wire.
    pub fn read_config(&mut self) -> Result<ConfigReadout, Error> {
        debug_assert!(self.vpp_enabled);

        self.send(&[CommandType::ReadConfig as u8])?;
        self.expect(CommandType::ReadConfig)?;
        self.fill(CONFIG_READOUT_LEN)?;

        let chip_id = u16::from_le_bytes([self.buffer[0], self.buffer[1]]);
        let mut id_bytes = [0u8; 8];
        id_bytes.copy_from_slice(&self.buffer[2..10]);
        let fuses = (0..self.props.fuse_blank.len())
            .map(|i| u16::from_le_bytes([self.buffer[10 + 2 * i], self.buffer[11 + 2 * i]]))
            .collect();
        let calibration = self
            .props
            .cal_word_in_rom
            .then(|| u16::from_le_bytes([self.buffer[24], self.buffer[25]]));

        Ok(ConfigReadout {
            chip_id,
            id_bytes,
            fuses,
            calibration,
        })
    }

    fn send(&mut self, msg: &[u8]) -> Result<(), Error> {
        self.port.write_data(msg)?;
        Ok(())
    }

    /// Reads one reply byte and matches it against the command's
    /// acknowledgement.
    fn expect(&mut self, command: CommandType) -> Result<(), Error> {
        self.fill(1)?;
        let received = self.buffer[0];
        let expected = command.ack();
        if received != expected {
            return Err(Error::UnexpectedReply {
                command,
                expected,
                received,
            });
        }
        Ok(())
    }

    fn fill(&mut self, count: usize) -> Result<(), Error> {
        self.fill_bounded(count, Some(MAX_IDLE_READS), None)
    }

    /// Polls the transport until `count` bytes sit in the receive buffer.
    /// `max_idle` bounds the number of consecutive empty polls; `None`
    /// waits forever (chip insertion).
    fn fill_bounded(
        &mut self,
        count: usize,
        max_idle: Option<usize>,
        mut progress: Option<&mut dyn ProgressCallbacks>,
    ) -> Result<(), Error> {
        self.buffer.clear();
        let mut idle = 0;
        while self.buffer.len() < count {
            let before = self.buffer.len();
            self.port.read_data(&mut self.buffer)?;
            if self.buffer.len() == before {
                idle += 1;
                if let Some(limit) = max_idle {
                    if idle >= limit {
                        return Err(ConnectionError::Timeout.into());
                    }
                }
            } else {
                idle = 0;
                if let Some(p) = progress.as_mut() {
                    p.update(self.buffer.len());
                }
            }
        }
        if log::log_enabled!(log::Level::Debug) {
            debug!("received:\n{}", hex_dump(&self.buffer));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::mock::MockTransport;

    fn props_14bit() -> Properties {
        Properties {
            socket_hint: "socket pin 2".into(),
            rom_size: 16,
            rom_blank: 0x3FFF,
            eeprom_base: 0x4200,
            eeprom_size: 2,
            config_base: 0x400e,
            core_type: 6,
            core_bits: 14,
            program_delay: 20,
            power_sequence: 2,
            erase_mode: 1,
            program_tries: 1,
            fuse_blank: vec![0x3FFF],
            flash_chip: true,
            ..Properties::default()
        }
    }

    fn programmer(props: Properties) -> Programmer<MockTransport> {
        let mut programmer = Programmer::new(MockTransport::default());
        programmer.configure(props);
        programmer
    }

    fn power_on(programmer: &mut Programmer<MockTransport>) {
        programmer.port.reply(b"V");
        programmer.set_programming_voltages(true).unwrap();
        programmer.port.written.clear();
    }

    #[test]
    fn connect_handshakes_and_queries_the_protocol() {
        let mut programmer = programmer(props_14bit());
        programmer.port.reply(b"B\x03");
        programmer.port.reply(b"Q");
        programmer.port.reply(b"P");
        programmer.port.reply(b"P18A");
        programmer.port.reply(b"Q");

        programmer.connect().unwrap();
        assert_eq!(programmer.version_name(), "K150");
        assert_eq!(programmer.protocol(), "P18A");
        assert_eq!(programmer.port.resets, 1);
        assert_eq!(programmer.port.written, [1, b'P', 21, 1]);
    }

    #[test]
    fn connect_rejects_unknown_protocols() {
        let mut programmer = programmer(props_14bit());
        programmer.port.reply(b"B\x02");
        programmer.port.reply(b"Q");
        programmer.port.reply(b"P");
        programmer.port.reply(b"P16X");

        let err = programmer.connect().unwrap_err();
        assert!(matches!(err, Error::UnsupportedProtocol(p) if p == "P16X"));
    }

    #[test]
    fn connect_rejects_a_bad_greeting() {
        let mut programmer = programmer(props_14bit());
        programmer.port.reply(b"X\x03");
        assert!(matches!(
            programmer.connect().unwrap_err(),
            Error::HandshakeFailed
        ));
    }

    #[test]
    fn command_start_discards_stray_bytes() {
        let mut programmer = programmer(props_14bit());
        programmer.port.reply(b"x");
        programmer.port.reply(b"y");
        programmer.port.reply(b"Q");
        programmer.port.reply(b"P");

        programmer.command_start().unwrap();
        assert_eq!(programmer.port.written, [1, b'P']);
    }

    #[test]
    fn lost_replies_time_out() {
        let mut programmer = programmer(props_14bit());
        assert!(matches!(
            programmer.command_end().unwrap_err(),
            Error::Connection(ConnectionError::Timeout)
        ));
    }

    #[test]
    fn init_message_carries_the_chip_parameters() {
        let mut programmer = programmer(props_14bit());
        programmer.port.reply(b"I");
        programmer.initialize_programming_variables(false).unwrap();
        assert_eq!(
            programmer.port.written,
            [3, 0, 16, 0, 2, 6, 0, 20, 2, 1, 1, 0]
        );
    }

    #[test]
    fn init_message_remaps_the_power_sequence_for_icsp() {
        let mut programmer = programmer(props_14bit());
        programmer.port.reply(b"I");
        programmer.initialize_programming_variables(true).unwrap();
        assert_eq!(programmer.port.written[8], 1);
    }

    #[test]
    fn program_rom_streams_acknowledged_chunks() {
        let mut programmer = programmer(props_14bit());
        power_on(&mut programmer);

        let data = [0xA5u8; 32];
        programmer.port.reply(b"Y");
        programmer.port.reply(b"Y");
        programmer.port.reply(b"P");
        programmer.program_rom(&data, None).unwrap();

        let mut expected = vec![7, 0, 16];
        expected.extend_from_slice(&data);
        assert_eq!(programmer.port.written, expected);
    }

    #[test]
    fn program_rom_checks_the_payload_size() {
        let mut programmer = programmer(props_14bit());
        power_on(&mut programmer);

        // not a multiple of the chunk size
        assert!(matches!(
            programmer.program_rom(&[0u8; 34], None).unwrap_err(),
            Error::InvalidRomSize(17)
        ));
        // larger than the chip
        assert!(matches!(
            programmer.program_rom(&[0u8; 64], None).unwrap_err(),
            Error::InvalidRomSize(32)
        ));
        assert!(programmer.port.written.is_empty());
    }

    #[test]
    fn program_eeprom_closes_the_stream_with_a_zero_word() {
        let mut programmer = programmer(props_14bit());
        power_on(&mut programmer);

        programmer.port.reply(b"Y");
        programmer.port.reply(b"Y");
        programmer.port.reply(b"P");
        programmer.program_eeprom(&[0xAB, 0xCD], None).unwrap();
        assert_eq!(programmer.port.written, [8, 0, 2, 0xAB, 0xCD, 0, 0]);
    }

    #[test]
    fn program_config_shapes_the_small_core_message() {
        let mut programmer = programmer(props_14bit());
        power_on(&mut programmer);

        programmer.port.reply(b"Y");
        programmer.program_config(&[0x12, 0x34], &[0x3F2A]).unwrap();

        let mut expected = vec![9, b'0', b'0', 0x12, 0x34, 0, 0];
        expected.extend_from_slice(b"FFFF");
        expected.extend_from_slice(&[0x2A, 0x3F]);
        expected.extend_from_slice(&[0xFF; 12]);
        assert_eq!(programmer.port.written, expected);
    }

    #[test]
    fn program_config_shapes_the_18f_message() {
        let mut props = props_14bit();
        props.core_bits = 16;
        props.core_type = 1;
        props.fuse_blank = vec![0x0025; 7];
        let mut programmer = programmer(props);
        power_on(&mut programmer);

        let fuses = [0x0100u16, 0x0200, 0x0300, 0x0400, 0x0500, 0x0600, 0x0700];
        programmer.port.reply(b"Y");
        programmer.program_config(&[0xAA], &fuses).unwrap();

        let mut expected = vec![9, b'0', b'0', 0xAA, 0, 0, 0, 0, 0, 0, 0];
        for fuse in fuses {
            expected.extend_from_slice(&fuse.to_le_bytes());
        }
        assert_eq!(programmer.port.written, expected);

        programmer.port.written.clear();
        assert!(matches!(
            programmer.program_config(&[], &fuses[..3]).unwrap_err(),
            Error::InvalidFuseCount { bits: 16, got: 3, .. }
        ));
    }

    #[test]
    fn commit_fuse_is_a_noop_on_small_cores() {
        let mut programmer = programmer(props_14bit());
        power_on(&mut programmer);
        programmer.commit_18f_fuse().unwrap();
        assert!(programmer.port.written.is_empty());
    }

    #[test]
    fn calibration_replies_are_classified() {
        let mut programmer = programmer(props_14bit());
        power_on(&mut programmer);

        programmer.port.reply(b"C");
        assert!(matches!(
            programmer.program_calibration(0x3444, 0x3FFF).unwrap_err(),
            Error::CalibrationFailed
        ));
        programmer.port.reply(b"F");
        assert!(matches!(
            programmer.program_calibration(0x3444, 0x3FFF).unwrap_err(),
            Error::FuseFailed
        ));
        programmer.port.reply(b"Y");
        programmer.program_calibration(0x3444, 0x3FFF).unwrap();
    }

    #[test]
    fn blank_check_polls_through_busy_bytes() {
        let mut programmer = programmer(props_14bit());
        programmer.port.reply(b"B");
        programmer.port.reply(b"B");
        programmer.port.reply(b"Y");
        assert!(programmer.is_blank_rom().unwrap());
        assert_eq!(programmer.port.written, [15, 0x3F]);

        programmer.port.reply(b"N");
        assert!(!programmer.is_blank_rom().unwrap());
    }

    #[test]
    fn read_rom_accumulates_the_full_image() {
        let mut programmer = programmer(props_14bit());
        power_on(&mut programmer);

        let image: Vec<u8> = (0..32).collect();
        programmer.port.reply(&image[..20]);
        programmer.port.reply(&image[20..]);
        let data = programmer.read_rom(None).unwrap();
        assert_eq!(data, image);
        assert_eq!(programmer.port.written, [11]);
    }

    #[test]
    fn read_config_decodes_the_block() {
        let mut props = props_14bit();
        props.cal_word_in_rom = true;
        let mut programmer = programmer(props);
        power_on(&mut programmer);

        let mut block = vec![0x60, 0x10]; // chip id, little endian
        block.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        block.extend_from_slice(&[0xFF, 0x3F]); // one fuse
        block.extend_from_slice(&[0u8; 12]);
        block.extend_from_slice(&[0x44, 0x34]); // calibration word
        assert_eq!(block.len(), 26);

        programmer.port.reply(b"C");
        programmer.port.reply(&block);
        let readout = programmer.read_config().unwrap();
        assert_eq!(readout.chip_id, 0x1060);
        assert_eq!(readout.id_bytes, [1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(readout.fuses, [0x3FFF]);
        assert_eq!(readout.calibration, Some(0x3444));
    }

    #[test]
    fn socket_wait_is_skipped_without_a_socket_hint() {
        let mut props = props_14bit();
        props.socket_hint.clear();
        let mut programmer = programmer(props);
        programmer.wait_until_chip_in_socket().unwrap();
        assert!(programmer.port.written.is_empty());
    }

    #[test]
    fn socket_wait_reports_an_absent_chip() {
        let mut programmer = programmer(props_14bit());
        programmer.port.reply(b"Q");
        programmer.port.reply(b"P");
        programmer.port.reply(b"AN");
        programmer.port.reply(b"Q");
        assert!(matches!(
            programmer.wait_until_chip_in_socket().unwrap_err(),
            Error::ChipNotDetected
        ));
        assert_eq!(programmer.port.written, [1, b'P', 18, 1]);
    }
}
