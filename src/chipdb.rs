//! Chip database
//!
//! Descriptions of every chip the K150-family boards can handle live in a
//! line-oriented `picpro.dat` file shipped alongside the firmware: records
//! of `KEY=VALUE` lines separated by blank lines, with free-form fuse LIST
//! blocks in between. Only the typed keys below matter for programming; the
//! fuse lists are presentation data and are skipped.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use log::{debug, warn};

use crate::error::ChipDbError;

/// Typed view of one chip record from the database. Names and keyed tokens
/// come out upper-cased; sizes are word counts for ROM and byte counts for
/// EEPROM.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChipInfo {
    pub chip_name: String,
    pub chip_id: String,
    pub socket_image: String,
    pub erase_mode: u8,
    pub power_sequence: String,
    pub program_delay: u8,
    pub program_tries: u8,
    pub over_program: u8,
    pub core_type: String,
    pub rom_size: u32,
    pub eeprom_size: u32,
    pub fuse_blank: Vec<u16>,
    pub panel_sizing: u8,
    pub include: bool,
    pub flash_chip: bool,
    pub cp_warn: bool,
    pub cal_word: bool,
    pub band_gap: bool,
    pub icsp_only: bool,
}

/// Scans the database for `chipname` (case-insensitive) and returns its
/// record. The scan only looks at `CHIPNAME` lines until the name matches,
/// then captures key/value pairs up to the next blank line.
pub fn lookup<R: BufRead>(reader: R, chipname: &str) -> Result<ChipInfo, ChipDbError> {
    let target = chipname.to_ascii_uppercase();
    let mut info = ChipInfo {
        chip_name: target.clone(),
        ..ChipInfo::default()
    };
    let mut found = false;

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        let lno = index + 1;

        if line.is_empty() {
            if found {
                break;
            }
            continue;
        }
        if line.starts_with("LIST") {
            continue;
        }
        let Some((key, value)) = split_assignment(line) else {
            if found {
                warn!("unparsable chip database line {lno}");
            }
            continue;
        };

        if !found {
            if key == "CHIPNAME" && value.to_ascii_uppercase() == target {
                found = true;
            }
            continue;
        }

        debug!("{key}={value}");
        match key.as_str() {
            "CHIPID" => info.chip_id = value,
            "SOCKETIMAGE" => info.socket_image = value.to_ascii_uppercase(),
            "ERASEMODE" => info.erase_mode = parse_int(&value, &key, lno)?,
            "POWERSEQUENCE" => info.power_sequence = value.to_ascii_uppercase(),
            "PROGRAMDELAY" => info.program_delay = parse_int(&value, &key, lno)?,
            "PROGRAMTRIES" => info.program_tries = parse_int(&value, &key, lno)?,
            "OVERPROGRAM" => info.over_program = parse_int(&value, &key, lno)?,
            "PANELSIZING" => info.panel_sizing = parse_int(&value, &key, lno)?,
            "CORETYPE" => info.core_type = value.to_ascii_uppercase(),
            "ROMSIZE" => info.rom_size = parse_hex(&value, &key, lno)?,
            "EEPROMSIZE" => info.eeprom_size = parse_hex(&value, &key, lno)?,
            "FUSEBLANK" => {
                info.fuse_blank = value
                    .split_whitespace()
                    .map(|word| parse_hex(word, &key, lno).map(|v| v as u16))
                    .collect::<Result<_, _>>()?;
            }
            "INCLUDE" => info.include = parse_flag(&value),
            "FLASHCHIP" => info.flash_chip = parse_flag(&value),
            "CPWARN" => info.cp_warn = parse_flag(&value),
            "CALWORD" => info.cal_word = parse_flag(&value),
            "BANDGAP" => info.band_gap = parse_flag(&value),
            "ICSPONLY" => info.icsp_only = parse_flag(&value),
            _ => {}
        }
    }

    if !found {
        return Err(ChipDbError::ChipNotFound(target));
    }
    Ok(info)
}

pub fn lookup_file<P: AsRef<Path>>(path: P, chipname: &str) -> Result<ChipInfo, ChipDbError> {
    lookup(BufReader::new(open(path)?), chipname)
}

/// Collects every chip name whose upper-cased form contains `filter` as a
/// substring; an empty filter selects them all.
pub fn list<R: BufRead>(reader: R, filter: &str) -> Result<Vec<String>, ChipDbError> {
    let filter = filter.to_ascii_uppercase();
    let mut names = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if let Some((key, value)) = split_assignment(line.trim()) {
            if key == "CHIPNAME" {
                let name = value.to_ascii_uppercase();
                if filter.is_empty() || name.contains(&filter) {
                    names.push(name);
                }
            }
        }
    }
    Ok(names)
}

pub fn list_file<P: AsRef<Path>>(path: P, filter: &str) -> Result<Vec<String>, ChipDbError> {
    list(BufReader::new(open(path)?), filter)
}

fn open<P: AsRef<Path>>(path: P) -> Result<File, ChipDbError> {
    File::open(&path).map_err(|source| ChipDbError::FileOpen {
        path: path.as_ref().display().to_string(),
        source,
    })
}

/// Splits a `KEY=VALUE` line on the first `=` outside double quotes; the
/// key comes back upper-cased, the value unwrapped from quotes.
fn split_assignment(line: &str) -> Option<(String, String)> {
    let mut in_quotes = false;
    for (i, c) in line.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            '=' if !in_quotes => {
                let key = line[..i].trim().to_ascii_uppercase();
                let value = unwrap_quotes(line[i + 1..].trim());
                return Some((key, value.to_string()));
            }
            _ => {}
        }
    }
    None
}

fn unwrap_quotes(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

fn parse_int(value: &str, key: &str, line: usize) -> Result<u8, ChipDbError> {
    value.parse().map_err(|_| ChipDbError::Parse {
        key: key.to_string(),
        line,
    })
}

fn parse_hex(value: &str, key: &str, line: usize) -> Result<u32, ChipDbError> {
    u32::from_str_radix(value, 16).map_err(|_| ChipDbError::Parse {
        key: key.to_string(),
        line,
    })
}

fn parse_flag(value: &str) -> bool {
    value.eq_ignore_ascii_case("Y")
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    const SAMPLE: &str = "\
CHIPname=10F200
INCLUDE=Y
SocketImage=8pin
EraseMode=0
FlashChip=Y
PowerSequence=Vpp1Vcc
ProgramDelay=2
ProgramTries=1
OverProgram=0
CoreType=bit12_a
ROMsize=100
EEPROMsize=0
FUSEblank=0FFF
CPwarn=N
CALword=Y
BandGap=N
ICSPonly=Y
ChipID=0000

CHIPname=16F628
INCLUDE=Y
SocketImage=18pin
EraseMode=1
FlashChip=Y
PowerSequence=VccFastVpp1
ProgramDelay=20
ProgramTries=1
OverProgram=11
CoreType=bit14_b
ROMsize=800
EEPROMsize=80
FUSEblank=3FFF
CPwarn=N
CALword=N
BandGap=Y
ICSPonly=N
ChipID=1060
LIST FUSES1
LIST1 \"Oscillator\" 3FFC \"LP\"=3FFC \"XT\"=3FFD
LIST1 \"Watchdog Timer\" 3FFB \"On\"=3FFF \"Off\"=3FFB

CHIPname=18F252
CoreType=bit16_a
ROMsize=4000
EEPROMsize=100
FUSEblank=0025 000F 0100 0085 C00F E00F 400F
";

    #[test]
    fn looks_up_a_record_by_name() {
        let info = lookup(Cursor::new(SAMPLE), "16f628").unwrap();
        assert_eq!(info.chip_name, "16F628");
        assert_eq!(info.chip_id, "1060");
        assert_eq!(info.socket_image, "18PIN");
        assert_eq!(info.erase_mode, 1);
        assert_eq!(info.power_sequence, "VCCFASTVPP1");
        assert_eq!(info.program_delay, 20);
        assert_eq!(info.program_tries, 1);
        assert_eq!(info.over_program, 11);
        assert_eq!(info.core_type, "BIT14_B");
        assert_eq!(info.rom_size, 0x800);
        assert_eq!(info.eeprom_size, 0x80);
        assert_eq!(info.fuse_blank, [0x3FFF]);
        assert!(info.include && info.flash_chip && info.band_gap);
        assert!(!info.cp_warn && !info.cal_word && !info.icsp_only);
    }

    #[test]
    fn capture_stops_at_the_record_boundary() {
        // the 10F200 record must not pick up fields of the next chip
        let info = lookup(Cursor::new(SAMPLE), "10F200").unwrap();
        assert_eq!(info.core_type, "BIT12_A");
        assert_eq!(info.rom_size, 0x100);
        assert!(info.icsp_only);
        assert_eq!(info.fuse_blank, [0x0FFF]);
    }

    #[test]
    fn multi_word_fuse_blank_keeps_order() {
        let info = lookup(Cursor::new(SAMPLE), "18F252").unwrap();
        assert_eq!(
            info.fuse_blank,
            [0x0025, 0x000F, 0x0100, 0x0085, 0xC00F, 0xE00F, 0x400F]
        );
    }

    #[test]
    fn unknown_chip_is_reported() {
        let err = lookup(Cursor::new(SAMPLE), "16F84").unwrap_err();
        assert!(matches!(err, ChipDbError::ChipNotFound(name) if name == "16F84"));
    }

    #[test]
    fn malformed_number_is_reported_with_its_line() {
        let db = "CHIPname=16F84\nROMsize=zzz\n";
        let err = lookup(Cursor::new(db), "16F84").unwrap_err();
        assert!(matches!(err, ChipDbError::Parse { key, line: 2 } if key == "ROMSIZE"));
    }

    #[test]
    fn list_filters_by_substring() {
        let all = list(Cursor::new(SAMPLE), "").unwrap();
        assert_eq!(all, ["10F200", "16F628", "18F252"]);

        let filtered = list(Cursor::new(SAMPLE), "16f").unwrap();
        assert_eq!(filtered, ["16F628"]);
    }

    #[test]
    fn quoted_values_are_unwrapped() {
        let db = "CHIPname=\"16F84\"\nChipID=\"0560\"\n";
        let info = lookup(Cursor::new(db), "16F84").unwrap();
        assert_eq!(info.chip_id, "0560");
    }
}
