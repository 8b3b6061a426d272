//! Types and functions for the command-line interface
//!
//! The argument structs and scenario drivers below are what the [picflash]
//! binary is built from. The drivers are generic over the transport so the
//! whole chain from argument handling down to the wire can run against a
//! scripted port.
//!
//! [picflash]: https://crates.io/crates/picflash

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::Duration;

use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};

use crate::chipdb;
use crate::error::{Error, HexError};
use crate::hex::{hex_dump, HexStore};
use crate::interface::Transport;
use crate::programmer::{ConfigReadout, Programmer};
use crate::progress::{reborrow_progress, ProgressCallbacks};
use crate::target::Properties;

/// Settling time after a chip has been seen in the socket
const CHIP_SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Connection to the programmer board
#[derive(Debug, Args)]
pub struct ConnectArgs {
    /// Serial port the programmer is attached to
    #[arg(
        short = 'p',
        long = "port",
        value_name = "TTY",
        default_value = "/dev/ttyUSB0",
        env = "PICFLASH_PORT"
    )]
    pub port: String,
}

/// Target chip selection
#[derive(Debug, Args)]
pub struct ChipArgs {
    /// Name of the target chip, as listed in the database
    #[arg(short = 't', long = "chip", value_name = "CHIPNAME")]
    pub chip: Option<String>,
    /// Chip database file
    #[arg(
        short = 'd',
        long = "datfile",
        value_name = "FILE",
        default_value = "picpro.dat"
    )]
    pub datfile: PathBuf,
    /// Target is wired to the ICSP connector instead of the socket
    #[arg(long)]
    pub icsp: bool,
}

/// ID bytes for the target chip, given as 2 to 16 hex characters
#[derive(Debug, Clone, Default)]
pub struct ChipId(pub Vec<u8>);

/// Memory regions addressed by an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Region {
    Rom,
    Eeprom,
    Config,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum VerifyRegion {
    Rom,
    Eeprom,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum BlankRegion {
    Rom,
    Eeprom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum DumpRegion {
    Rom,
    Eeprom,
    Config,
    All,
    /// Pretty-print the segments of the input file; no device access
    Hex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ConvertMode {
    Raw2hex,
    Hex2raw,
}

/// Region selection broken out into flags
#[derive(Debug, Clone, Copy, Default)]
pub struct RegionSelection {
    pub rom: bool,
    pub eeprom: bool,
    pub config: bool,
}

impl From<Region> for RegionSelection {
    fn from(region: Region) -> Self {
        match region {
            Region::Rom => RegionSelection { rom: true, ..Default::default() },
            Region::Eeprom => RegionSelection { eeprom: true, ..Default::default() },
            Region::Config => RegionSelection { config: true, ..Default::default() },
            Region::All => RegionSelection { rom: true, eeprom: true, config: true },
        }
    }
}

impl From<VerifyRegion> for RegionSelection {
    fn from(region: VerifyRegion) -> Self {
        match region {
            VerifyRegion::Rom => RegionSelection { rom: true, ..Default::default() },
            VerifyRegion::Eeprom => RegionSelection { eeprom: true, ..Default::default() },
            VerifyRegion::All => RegionSelection { rom: true, eeprom: true, ..Default::default() },
        }
    }
}

impl From<DumpRegion> for RegionSelection {
    fn from(region: DumpRegion) -> Self {
        match region {
            DumpRegion::Rom => RegionSelection { rom: true, ..Default::default() },
            DumpRegion::Eeprom => RegionSelection { eeprom: true, ..Default::default() },
            DumpRegion::Config => RegionSelection { config: true, ..Default::default() },
            DumpRegion::All => RegionSelection { rom: true, eeprom: true, config: true },
            DumpRegion::Hex => RegionSelection::default(),
        }
    }
}

/// [ProgressCallbacks] implementation drawing a terminal progress bar
#[derive(Default)]
pub struct CliProgress {
    bar: Option<ProgressBar>,
}

impl CliProgress {
    pub fn new() -> Self {
        CliProgress::default()
    }
}

impl ProgressCallbacks for CliProgress {
    fn init(&mut self, total: usize, message: &'static str) {
        let bar = ProgressBar::new(total as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}")
                .unwrap()
                .progress_chars("#>-"),
        );
        bar.set_message(message);
        self.bar = Some(bar);
    }

    fn update(&mut self, current: usize) {
        if let Some(bar) = &self.bar {
            bar.set_position(current as u64);
        }
    }

    fn finish(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}

/// Looks the target chip up in the database and resolves its programming
/// properties.
pub fn load_chip(args: &ChipArgs) -> Result<Properties, Error> {
    let Some(chip) = args.chip.as_deref() else {
        return Err(Error::InvalidArgument("missing chip name (-t)".into()));
    };
    let info = chipdb::lookup_file(&args.datfile, chip)?;
    info!(
        "Chip type {} found in database with ID {}",
        info.chip_name, info.chip_id
    );
    Properties::from_chip(&info)
}

/// Prints the chip names matching `filter` ("all" or empty selects every
/// chip).
pub fn list_chips(datfile: &Path, filter: &str) -> Result<(), Error> {
    let filter = if filter.eq_ignore_ascii_case("all") { "" } else { filter };
    for name in chipdb::list_file(datfile, filter)? {
        println!("{name}");
    }
    Ok(())
}

/// Byte images shaped for the device, derived from a HEX image and the
/// chip's memory layout.
pub(crate) struct DeviceImages {
    pub rom: Vec<u8>,
    pub eeprom: Vec<u8>,
    pub fuses: Vec<u16>,
}

/// Builds the ROM, EEPROM and fuse images the board expects.
///
/// ROM words are stored little endian by the device, so extraction swaps
/// bytes. EEPROM content of the 12 and 14 bit cores sits one byte per word
/// in the HEX image and only the low byte travels; the 16 bit cores map it
/// byte for byte. The first fuse word from the image replaces the first
/// blank fuse value.
pub(crate) fn shape_images(hex: &HexStore, props: &Properties) -> Result<DeviceImages, Error> {
    let rom = hex.range_of_data(props.rom_base, props.rom_size as usize, props.rom_blank, true);

    let eeprom = match props.core_bits {
        12 | 14 => hex
            .range_of_data(props.eeprom_base, props.eeprom_size as usize, 0xffff, false)
            .chunks_exact(2)
            .map(|word| word[0])
            .collect(),
        16 => hex.range_of_data(props.eeprom_base, props.eeprom_size as usize / 2, 0xffff, false),
        bits => return Err(Error::UnsupportedCoreBits(bits)),
    };

    let mut fuses = props.fuse_blank.clone();
    if !fuses.is_empty() {
        let fuse_data =
            hex.range_of_data(props.config_base, props.fuse_blank.len(), props.rom_blank, true);
        fuses[0] = u16::from_be_bytes([fuse_data[0], fuse_data[1]]);
    }

    Ok(DeviceImages { rom, eeprom, fuses })
}

/// Connects, reports the board version and protocol, disconnects.
pub fn ping<P: Transport>(programmer: &mut Programmer<P>) -> Result<(), Error> {
    programmer.connect()?;
    programmer.disconnect();
    Ok(())
}

/// Init + socket handling common to every on-device scenario.
fn prepare<P: Transport>(programmer: &mut Programmer<P>, icsp: bool) -> Result<(), Error> {
    programmer.initialize_programming_variables(icsp)?;
    if icsp || programmer.properties().socket_hint.is_empty() {
        info!("Accessing chip connected to ICSP port");
    } else {
        programmer.wait_until_chip_in_socket()?;
        sleep(CHIP_SETTLE_DELAY);
    }
    Ok(())
}

/// Full-chip erase.
pub fn erase<P: Transport>(programmer: &mut Programmer<P>, icsp: bool) -> Result<(), Error> {
    prepare(programmer, icsp)?;
    programmer.set_programming_voltages(true)?;
    info!("Erasing chip");
    let result = programmer.erase_chip();
    let off = programmer.set_programming_voltages(false);
    result?;
    off?;
    info!("Erasure succeeded");
    Ok(())
}

/// Programs the selected regions from `hex`, then reads every programmed
/// region back and compares. All mismatches are reported before the
/// operation fails.
pub fn program<P: Transport>(
    programmer: &mut Programmer<P>,
    hex: &HexStore,
    id: &[u8],
    icsp: bool,
    regions: RegionSelection,
    mut progress: Option<&mut dyn ProgressCallbacks>,
) -> Result<(), Error> {
    let images = shape_images(hex, programmer.properties())?;

    prepare(programmer, icsp)?;
    programmer.set_programming_voltages(true)?;
    let result = program_regions(programmer, &images, id, regions, reborrow_progress(&mut progress));
    let off = programmer.set_programming_voltages(false);
    let failed = result?;
    off?;

    if failed.is_empty() {
        Ok(())
    } else {
        Err(Error::VerificationFailed(failed.join(", ")))
    }
}

fn program_regions<P: Transport>(
    programmer: &mut Programmer<P>,
    images: &DeviceImages,
    id: &[u8],
    regions: RegionSelection,
    mut progress: Option<&mut dyn ProgressCallbacks>,
) -> Result<Vec<&'static str>, Error> {
    let props = programmer.properties().clone();

    if props.flash_chip && regions.rom && regions.eeprom && regions.config {
        info!("Erasing chip");
        if let Err(e) = programmer.erase_chip() {
            warn!("Erasure failed: {e}");
        }
        programmer.cycle_programming_voltages()?;
    }

    if regions.rom {
        info!("Programming ROM");
        if let Err(e) = programmer.program_rom(&images.rom, reborrow_progress(&mut progress)) {
            error!("ROM programming failed: {e}");
        }
    }
    if regions.eeprom && props.eeprom_size > 0 {
        info!("Programming EEPROM");
        if let Err(e) = programmer.program_eeprom(&images.eeprom, reborrow_progress(&mut progress)) {
            error!("EEPROM programming failed: {e}");
        }
    }
    if regions.config {
        info!("Programming ID and fuses");
        if let Err(e) = programmer.program_config(id, &images.fuses) {
            error!("Programming ID and fuses failed: {e}");
        }
    }

    let mut failed = readback_compare(
        programmer,
        regions.rom.then_some(images.rom.as_slice()),
        (regions.eeprom && props.eeprom_size > 0).then_some(images.eeprom.as_slice()),
        reborrow_progress(&mut progress),
    );

    if failed.is_empty() && props.core_bits == 16 && regions.config {
        info!("Committing fuse data");
        if let Err(e) = programmer.commit_18f_fuse() {
            warn!("Fuse commit failed: {e}");
        }
    }
    if failed.is_empty() && regions.config {
        info!("Verifying CONFIG");
        match programmer.read_config() {
            Ok(readout) if readout.fuses == images.fuses => info!("CONFIG verified"),
            _ => {
                error!("CONFIG verification failed");
                failed.push("CONFIG");
            }
        }
    }

    Ok(failed)
}

/// Reads the given regions back and compares them with their expected
/// images; a read error counts as a mismatch.
fn readback_compare<P: Transport>(
    programmer: &mut Programmer<P>,
    rom: Option<&[u8]>,
    eeprom: Option<&[u8]>,
    mut progress: Option<&mut dyn ProgressCallbacks>,
) -> Vec<&'static str> {
    let mut failed = Vec::new();

    if let Some(expected) = rom {
        info!("Verifying ROM");
        match programmer.read_rom(reborrow_progress(&mut progress)) {
            Ok(data) if data == expected => info!("ROM verified"),
            _ => {
                error!("ROM verification failed");
                failed.push("ROM");
            }
        }
    }
    if let Some(expected) = eeprom {
        info!("Verifying EEPROM");
        match programmer.read_eeprom(reborrow_progress(&mut progress)) {
            Ok(data) if data == expected => info!("EEPROM verified"),
            _ => {
                error!("EEPROM verification failed");
                failed.push("EEPROM");
            }
        }
    }

    failed
}

/// Reads the selected regions back and compares them with `hex`.
pub fn verify<P: Transport>(
    programmer: &mut Programmer<P>,
    hex: &HexStore,
    icsp: bool,
    regions: RegionSelection,
    mut progress: Option<&mut dyn ProgressCallbacks>,
) -> Result<(), Error> {
    let images = shape_images(hex, programmer.properties())?;
    let eeprom_size = programmer.properties().eeprom_size;

    prepare(programmer, icsp)?;
    programmer.set_programming_voltages(true)?;
    let failed = readback_compare(
        programmer,
        regions.rom.then_some(images.rom.as_slice()),
        (regions.eeprom && eeprom_size > 0).then_some(images.eeprom.as_slice()),
        reborrow_progress(&mut progress),
    );
    programmer.set_programming_voltages(false)?;

    if failed.is_empty() {
        Ok(())
    } else {
        Err(Error::VerificationFailed(failed.join(", ")))
    }
}

/// Blank check by readback: the firmware's own blank-check commands answer
/// `'N'` spuriously on common board revisions, so the region is read back
/// and compared against a synthetic blank image instead. Prints `TRUE` or
/// `FALSE`; a non-blank chip is not an error.
pub fn isblank<P: Transport>(
    programmer: &mut Programmer<P>,
    icsp: bool,
    region: BlankRegion,
    mut progress: Option<&mut dyn ProgressCallbacks>,
) -> Result<(), Error> {
    let props = programmer.properties().clone();
    let blank = HexStore::new();

    prepare(programmer, icsp)?;
    programmer.set_programming_voltages(true)?;
    let result = (|| -> Result<(), Error> {
        match region {
            BlankRegion::Rom => {
                info!("Checking that ROM ({} B) is blank", 2 * props.rom_size);
                let expected =
                    blank.range_of_data(props.rom_base, props.rom_size as usize, props.rom_blank, true);
                let data = programmer.read_rom(reborrow_progress(&mut progress))?;
                println!("{}", if data == expected { "TRUE" } else { "FALSE" });
            }
            BlankRegion::Eeprom => {
                if props.eeprom_size == 0 {
                    warn!("Chip has no EEPROM");
                    return Ok(());
                }
                info!("Checking that EEPROM ({} B) is blank", props.eeprom_size);
                let expected = vec![0xff; props.eeprom_size as usize];
                let data = programmer.read_eeprom(reborrow_progress(&mut progress))?;
                println!("{}", if data == expected { "TRUE" } else { "FALSE" });
            }
        }
        Ok(())
    })();
    let off = programmer.set_programming_voltages(false);
    result?;
    off?;
    Ok(())
}

/// Reads the selected regions into an Intel-HEX file, or hex dumps them to
/// stdout when no output file is given.
pub fn dump<P: Transport>(
    programmer: &mut Programmer<P>,
    icsp: bool,
    regions: RegionSelection,
    output: Option<&Path>,
    mut progress: Option<&mut dyn ProgressCallbacks>,
) -> Result<(), Error> {
    let props = programmer.properties().clone();

    prepare(programmer, icsp)?;
    programmer.set_programming_voltages(true)?;
    let result = (|| -> Result<(), Error> {
        let mut hex = HexStore::new();

        if regions.rom {
            let data = programmer.read_rom(reborrow_progress(&mut progress))?;
            match output {
                Some(_) => hex.load_raw(props.rom_base, &data, true)?,
                None => print!("{}", hex_dump(&data)),
            }
        }
        if regions.eeprom {
            let data = programmer.read_eeprom(reborrow_progress(&mut progress))?;
            if output.is_some() {
                match props.core_bits {
                    12 | 14 => hex.load_raw_le8(props.eeprom_base, &data)?,
                    16 => hex.load_raw(props.eeprom_base, &data, false)?,
                    bits => return Err(Error::UnsupportedCoreBits(bits)),
                }
            } else {
                print!("{}", hex_dump(&data));
            }
        }
        if regions.config {
            let readout = programmer.read_config()?;
            print_config(&readout);
            if output.is_some() {
                let mut bytes = Vec::with_capacity(2 * readout.fuses.len());
                for fuse in &readout.fuses {
                    bytes.extend_from_slice(&fuse.to_be_bytes());
                }
                hex.load_raw(props.config_base, &bytes, true)?;
            }
        }

        if let Some(path) = output {
            hex.save_hex_file(path)?;
        }
        Ok(())
    })();
    let off = programmer.set_programming_voltages(false);
    result?;
    off?;
    Ok(())
}

fn print_config(readout: &ConfigReadout) {
    println!("Chip ID: {:04X}", readout.chip_id);
    print!("IDs    :");
    for b in readout.id_bytes {
        print!(" {b:02X}");
    }
    println!();
    if let Some(cal) = readout.calibration {
        println!("Cal    : {cal:04X}");
    }
    print!("Fuses  :");
    for fuse in &readout.fuses {
        print!(" {fuse:04X}");
    }
    println!();
}

/// Pretty-prints the segments of a HEX file; no device access.
pub fn dump_hex_file(input: &Path) -> Result<(), Error> {
    let mut hex = HexStore::new();
    hex.load_hex_file(input)?;
    for (addr, data) in hex.segments() {
        println!("{addr:06X} :");
        print!("{}", hex_dump(data));
    }
    Ok(())
}

/// Shows the byte images a `program` run would send, without touching any
/// device.
pub fn dryrun(
    props: &Properties,
    hex: &HexStore,
    id: &[u8],
    icsp: bool,
    regions: RegionSelection,
) -> Result<(), Error> {
    let images = shape_images(hex, props)?;

    if icsp || props.socket_hint.is_empty() {
        println!("\nAccessing chip connected to ICSP port.");
    } else {
        println!("\nInsert chip into socket with pin 1 at {}.", props.socket_hint);
    }

    if regions.rom {
        println!(
            "\nProgramming ROM ({:06X} : {}KB)",
            props.rom_base,
            props.rom_size >> 9
        );
        print!("{}", hex_dump(&images.rom));
    }
    if regions.eeprom && props.eeprom_size > 0 {
        println!(
            "\nProgramming EEPROM ({:06X} : {}B)",
            props.eeprom_base, props.eeprom_size
        );
        print!("{}", hex_dump(&images.eeprom));
    }
    if regions.config {
        println!("\nProgramming ID");
        print!("{}", hex_dump(id));
        println!(
            "\nProgramming fuses ({:06X} : {}B)",
            props.config_base,
            2 * images.fuses.len()
        );
        for fuse in &images.fuses {
            print!("{fuse:04X} ");
        }
        println!();
    }
    Ok(())
}

/// Extracts an address range from a HEX file into a raw binary file. Both
/// range ends are included: 0000-0FFF covers 0x1000 bytes.
pub fn convert_hex2raw(
    input: &Path,
    output: &Path,
    range: (u32, u32),
    blank: u16,
    swab: bool,
) -> Result<(), Error> {
    let mut hex = HexStore::new();
    hex.load_hex_file(input)?;

    info!("Converting HEX segment from address {:X} to raw data", range.0);
    let words = (range.1 - range.0 + 1) as usize / 2;
    let data = hex.range_of_data(range.0, words, blank, swab);

    let mut file = File::create(output)?;
    file.write_all(&data)?;
    Ok(())
}

/// Wraps a raw binary file into a HEX segment at the start of the range;
/// input beyond the range is dropped.
pub fn convert_raw2hex(
    input: &Path,
    output: &Path,
    range: (u32, u32),
    swab: bool,
) -> Result<(), Error> {
    let mut data = Vec::new();
    File::open(input)?.read_to_end(&mut data)?;

    info!("Converting raw data to HEX at address {:X}", range.0);
    let size = 2 * ((range.1 - range.0 + 1) as usize / 2);
    data.truncate(size);
    if data.len() % 2 != 0 {
        return Err(HexError::OddSize(data.len()).into());
    }

    let mut hex = HexStore::new();
    hex.load_raw(range.0, &data, swab)?;
    hex.save_hex_file(output)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::mock::MockTransport;
    use crate::programmer::Programmer;

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

    /// Blank images for a blank store and the properties above.
    fn blank_images() -> (Vec<u8>, Vec<u8>) {
        let rom: Vec<u8> = [0xFF, 0x3F].iter().copied().cycle().take(32).collect();
        let eeprom = vec![0xFF, 0xFF];
        (rom, eeprom)
    }

    #[test]
    fn program_all_runs_the_full_command_sequence() {
        let (rom, eeprom) = blank_images();
        let mut programmer = programmer(props_14bit());
        let port = programmer.port_mut();
        port.reply(b"I"); // init
        port.reply(b"V"); // voltages on
        port.reply(b"Y"); // erase
        port.reply(b"V"); // cycle voltages
        port.reply(b"Y"); // rom command
        port.reply(b"Y"); // rom chunk
        port.reply(b"P"); // rom done
        port.reply(b"Y"); // eeprom command
        port.reply(b"Y"); // eeprom pair
        port.reply(b"P"); // eeprom done
        port.reply(b"Y"); // config
        port.reply(&rom); // rom readback
        port.reply(&eeprom); // eeprom readback
        port.reply(b"C"); // config readback ack
        // blank-filled fuse extraction swaps the fill word, hence 0xFF3F
        let mut block = vec![0x60, 0x10];
        block.extend_from_slice(&[0u8; 8]);
        block.extend_from_slice(&[0x3F, 0xFF]);
        block.extend_from_slice(&[0u8; 14]);
        port.reply(&block);
        port.reply(b"v"); // voltages off

        let hex = HexStore::new();
        program(
            &mut programmer,
            &hex,
            &[],
            true,
            Region::All.into(),
            None,
        )
        .unwrap();

        let mut expected = vec![3, 0, 16, 0, 2, 6, 0, 20, 1, 1, 1, 0];
        expected.push(4);
        expected.push(14);
        expected.push(6);
        expected.extend_from_slice(&[7, 0, 16]);
        expected.extend_from_slice(&rom);
        expected.extend_from_slice(&[8, 0, 2]);
        expected.extend_from_slice(&eeprom);
        expected.extend_from_slice(&[0, 0]);
        expected.extend_from_slice(&[9, b'0', b'0', 0, 0, 0, 0]);
        expected.extend_from_slice(b"FFFF");
        expected.extend_from_slice(&[0x3F, 0xFF]);
        expected.extend_from_slice(&[0xFF; 12]);
        expected.push(11);
        expected.push(12);
        expected.push(13);
        expected.push(5);
        assert_eq!(programmer.port_mut().written, expected);
    }

    #[test]
    fn verification_mismatch_fails_but_voltages_go_off() {
        let mut programmer = programmer(props_14bit());
        let port = programmer.port_mut();
        port.reply(b"I");
        port.reply(b"V");
        port.reply(b"Y");
        port.reply(b"V");
        port.reply(b"Y");
        port.reply(b"Y");
        port.reply(b"P");
        port.reply(b"Y");
        port.reply(b"Y");
        port.reply(b"P");
        port.reply(b"Y");
        port.reply(&[0u8; 32]); // rom readback differs from the blank image
        port.reply(&[0xFF, 0xFF]); // eeprom readback matches
        port.reply(b"v");

        let hex = HexStore::new();
        let err = program(&mut programmer, &hex, &[], true, Region::All.into(), None)
            .unwrap_err();
        assert!(matches!(err, Error::VerificationFailed(failed) if failed == "ROM"));
        // the cleanup path still powered the chip down
        assert_eq!(*programmer.port_mut().written.last().unwrap(), 5);
    }

    #[test]
    fn verify_compares_every_requested_region() {
        let (rom, eeprom) = blank_images();
        let mut programmer = programmer(props_14bit());
        let port = programmer.port_mut();
        port.reply(b"I");
        port.reply(b"V");
        port.reply(&rom);
        port.reply(&eeprom);
        port.reply(b"v");

        let hex = HexStore::new();
        verify(&mut programmer, &hex, true, VerifyRegion::All.into(), None).unwrap();
        assert_eq!(
            programmer.port_mut().written,
            [3, 0, 16, 0, 2, 6, 0, 20, 1, 1, 1, 0, 4, 11, 12, 5]
        );
    }

    #[test]
    fn isblank_reads_back_instead_of_trusting_the_firmware() {
        let (rom, _) = blank_images();
        let mut programmer = programmer(props_14bit());
        let port = programmer.port_mut();
        port.reply(b"I");
        port.reply(b"V");
        port.reply(&rom);
        port.reply(b"v");

        isblank(&mut programmer, true, BlankRegion::Rom, None).unwrap();
        // no blank-check command bytes (15/16) on the wire, only a read
        assert_eq!(
            programmer.port_mut().written,
            [3, 0, 16, 0, 2, 6, 0, 20, 1, 1, 1, 0, 4, 11, 5]
        );
    }

    #[test]
    fn eeprom_image_keeps_only_the_low_bytes_on_small_cores() {
        let mut hex = HexStore::new();
        hex.load_raw(0x4200, &[0xAB, 0x00, 0xCD, 0x00], false).unwrap();
        let mut props = props_14bit();
        props.eeprom_size = 4;

        let images = shape_images(&hex, &props).unwrap();
        assert_eq!(images.eeprom, [0xAB, 0xCD, 0xFF, 0xFF]);
    }

    #[test]
    fn eeprom_image_is_byte_for_byte_on_18f_cores() {
        let mut hex = HexStore::new();
        hex.load_raw(0xf00000, &[0x01, 0x02, 0x03, 0x04], false).unwrap();
        let mut props = props_14bit();
        props.core_bits = 16;
        props.core_type = 1;
        props.eeprom_base = 0xf00000;
        props.eeprom_size = 4;

        let images = shape_images(&hex, &props).unwrap();
        assert_eq!(images.eeprom, [0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn first_fuse_comes_from_the_image() {
        let mut hex = HexStore::new();
        // config words sit little endian in the image, as on the chip
        hex.load_raw(0x400e, &[0x2A, 0x3F], false).unwrap();
        let props = props_14bit();

        let images = shape_images(&hex, &props).unwrap();
        assert_eq!(images.fuses, [0x3F2A]);
    }

    #[test]
    fn rom_image_is_byte_swapped_and_blank_filled() {
        let mut hex = HexStore::new();
        hex.load_raw(0, &[0x12, 0x34], false).unwrap();
        let props = props_14bit();

        let images = shape_images(&hex, &props).unwrap();
        assert_eq!(&images.rom[..4], &[0x34, 0x12, 0xFF, 0x3F]);
        assert_eq!(images.rom.len(), 32);
    }
}
