//! Sparse Intel-HEX image store
//!
//! [`HexStore`] keeps firmware bytes as a set of non-overlapping segments
//! keyed by their base address. Images come in from Intel-HEX files (record
//! types 00, 01, 02 and 04) or from raw byte runs, and go out as padded,
//! optionally byte-swapped ranges sized for the target memory.
//!
//! Word order inside a segment is big endian; the PIC side stores ROM words
//! little endian, which is why extraction and insertion take a `swap_bytes`
//! flag instead of hiding the conversion.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use log::debug;

use crate::error::HexError;

const RECORD_DATA: u8 = 0;
const RECORD_EOF: u8 = 1;
const RECORD_EXT_SEGMENT: u8 = 2;
const RECORD_EXT_LINEAR: u8 = 4;

/// Bytes per emitted data record
const RECORD_PAYLOAD: usize = 16;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HexStore {
    segments: BTreeMap<u32, Vec<u8>>,
}

impl HexStore {
    pub fn new() -> Self {
        HexStore::default()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Segments in ascending address order
    pub fn segments(&self) -> impl Iterator<Item = (u32, &[u8])> {
        self.segments.iter().map(|(&addr, data)| (addr, data.as_slice()))
    }

    /// Replaces the store content with the records read from `reader`.
    ///
    /// The load ends at the first EOF record; a parse or checksum error
    /// aborts it, leaving the segments read so far in place.
    pub fn load_hex<R: BufRead>(&mut self, reader: R) -> Result<(), HexError> {
        self.segments.clear();
        let mut ext_address: u32 = 0;
        let mut lno = 0;

        for line in reader.lines() {
            let line = line?;
            lno += 1;
            let line = sanitize(&line);
            if line.is_empty() {
                continue;
            }
            let raw = line.as_bytes();
            if raw.len() < 3 || raw[0] != b':' {
                return Err(HexError::BadFormat { line: lno });
            }

            let mut sum: u32 = 0;
            let reclen = hex_field(raw, 1, 2, lno)? as usize;
            sum += reclen as u32;
            if raw.len() != 2 * (reclen + 5) + 1 {
                return Err(HexError::BadFormat { line: lno });
            }

            let recaddr = hex_field(raw, 3, 4, lno)?;
            sum += (recaddr >> 8) + (recaddr & 0xff);
            let rectype = hex_field(raw, 7, 2, lno)? as u8;
            sum += rectype as u32;

            match rectype {
                RECORD_DATA => {
                    if reclen % 2 != 0 {
                        return Err(HexError::BadFormat { line: lno });
                    }
                    let mut data = Vec::with_capacity(reclen);
                    for i in 0..reclen {
                        let b = hex_field(raw, 9 + 2 * i, 2, lno)?;
                        sum += b;
                        data.push(b as u8);
                    }
                    self.segments.entry(ext_address | recaddr).or_insert(data);
                }
                RECORD_EOF => {
                    if reclen != 0 {
                        return Err(HexError::BadFormat { line: lno });
                    }
                    debug!("loaded {} segment(s)", self.segments.len());
                    return Ok(());
                }
                RECORD_EXT_SEGMENT | RECORD_EXT_LINEAR => {
                    if reclen != 2 {
                        return Err(HexError::BadFormat { line: lno });
                    }
                    let shift = hex_field(raw, 9, 4, lno)?;
                    sum += (shift >> 8) + (shift & 0xff);
                    ext_address = if rectype == RECORD_EXT_SEGMENT {
                        shift << 4
                    } else {
                        shift << 16
                    };
                }
                kind => {
                    return Err(HexError::UnsupportedRecord { line: lno, kind });
                }
            }

            let crc = hex_field(raw, raw.len() - 2, 2, lno)?;
            if crc != (!sum).wrapping_add(1) & 0xff {
                return Err(HexError::BadChecksum { line: lno });
            }
        }

        // ran out of lines without an EOF record
        Err(HexError::BadFormat { line: lno })
    }

    pub fn load_hex_file<P: AsRef<Path>>(&mut self, path: P) -> Result<(), HexError> {
        let file = File::open(path)?;
        self.load_hex(BufReader::new(file))
    }

    /// Writes the whole store as Intel-HEX records.
    ///
    /// Segments are walked in ascending address order, 16 data bytes per
    /// record, with a type-04 record emitted whenever the upper address
    /// half changes from the previously emitted extension.
    pub fn save_hex<W: Write>(&self, mut writer: W) -> Result<(), HexError> {
        let mut ext_addr: u32 = 0;
        for (&base, data) in &self.segments {
            let mut addr = base;
            for chunk in data.chunks(RECORD_PAYLOAD) {
                let record = hex_record(&mut ext_addr, addr, chunk);
                writer.write_all(record.as_bytes())?;
                addr += chunk.len() as u32;
            }
        }
        writer.write_all(b":00000001FF\n")?;
        writer.flush()?;
        Ok(())
    }

    pub fn save_hex_file<P: AsRef<Path>>(&self, path: P) -> Result<(), HexError> {
        let file = File::create(path)?;
        self.save_hex(file)
    }

    /// Inserts a run of bytes as a new segment at `addr`.
    ///
    /// The run must have even length and must not overlap an existing
    /// segment; exact abutment is fine. With `swap_bytes` the two bytes of
    /// each word are exchanged on the way in.
    pub fn load_raw(&mut self, addr: u32, data: &[u8], swap_bytes: bool) -> Result<(), HexError> {
        if data.len() % 2 != 0 {
            return Err(HexError::OddSize(data.len()));
        }
        let end = addr + data.len() as u32;
        for (&base, bytes) in &self.segments {
            let seg_end = base + bytes.len() as u32;
            if addr < seg_end && end > base {
                return Err(HexError::Overlap { addr });
            }
        }
        let mut bytes = data.to_vec();
        if swap_bytes {
            swap_words(&mut bytes);
        }
        self.segments.insert(addr, bytes);
        Ok(())
    }

    /// Inserts one byte per word: each input byte `b` lands as the pair
    /// `(b, 0x00)`, doubling the address footprint. This is how EEPROM
    /// content of the 12 and 14 bit cores is laid out in a HEX image.
    pub fn load_raw_le8(&mut self, addr: u32, data: &[u8]) -> Result<(), HexError> {
        let mut expanded = Vec::with_capacity(2 * data.len());
        for &b in data {
            expanded.push(b);
            expanded.push(0x00);
        }
        self.load_raw(addr, &expanded, false)
    }

    /// Extracts exactly `2 * word_count` bytes covering the addresses from
    /// `lower` (which must be even) upward. Gaps are filled with
    /// `blank_word`, most significant byte first. With `swap_bytes` every
    /// extracted word comes out with its two bytes exchanged.
    pub fn range_of_data(
        &self,
        lower: u32,
        word_count: usize,
        blank_word: u16,
        swap_bytes: bool,
    ) -> Vec<u8> {
        debug_assert!(lower % 2 == 0);

        let upper = lower + 2 * word_count as u32;
        let blank = blank_word.to_be_bytes();
        let mut out = Vec::with_capacity(2 * word_count);
        let mut addr = lower;

        // Start from the first segment at or past `lower`, stepping back one
        // segment in case the previous one extends into the range.
        if let Some(&first) = self.segments.range(lower..).next().map(|(k, _)| k) {
            let start = if first > lower {
                self.segments
                    .range(..first)
                    .next_back()
                    .map(|(&prev, _)| prev)
                    .unwrap_or(first)
            } else {
                first
            };

            for (&base, bytes) in self.segments.range(start..) {
                if base >= upper {
                    break;
                }
                let seg_end = base + bytes.len() as u32;
                if seg_end > addr {
                    while addr < base {
                        out.extend_from_slice(&blank);
                        addr += 2;
                    }
                    let mut shift = addr.saturating_sub(base) as usize;
                    while shift < bytes.len() && addr < upper {
                        out.push(bytes[shift]);
                        out.push(bytes[shift + 1]);
                        shift += 2;
                        addr += 2;
                    }
                }
                if addr == upper {
                    break;
                }
            }
        }

        while addr < upper {
            out.extend_from_slice(&blank);
            addr += 2;
        }

        if swap_bytes {
            swap_words(&mut out);
        }
        out
    }
}

fn swap_words(data: &mut [u8]) {
    for pair in data.chunks_exact_mut(2) {
        pair.swap(0, 1);
    }
}

/// Strips leading blanks and any control characters from a record line.
fn sanitize(line: &str) -> String {
    line.trim_start()
        .chars()
        .filter(|c| c.is_ascii() && !c.is_ascii_control())
        .collect()
}

fn hex_field(raw: &[u8], pos: usize, len: usize, line: usize) -> Result<u32, HexError> {
    let text = std::str::from_utf8(&raw[pos..pos + len])
        .map_err(|_| HexError::BadFormat { line })?;
    u32::from_str_radix(text, 16).map_err(|_| HexError::BadFormat { line })
}

fn push_hex(record: &mut String, byte: u8) {
    const DIGITS: &[u8; 16] = b"0123456789ABCDEF";
    record.push(DIGITS[usize::from(byte >> 4)] as char);
    record.push(DIGITS[usize::from(byte & 0xf)] as char);
}

fn crc(sum: u32) -> u8 {
    ((!sum).wrapping_add(1) & 0xff) as u8
}

fn hex_record(ext_addr: &mut u32, addr: u32, data: &[u8]) -> String {
    let mut record = String::new();

    let ext = (addr >> 16) & 0xffff;
    if ext != *ext_addr {
        let sum = 6 + (ext >> 8) + (ext & 0xff);
        record.push_str(":02000004");
        push_hex(&mut record, (ext >> 8) as u8);
        push_hex(&mut record, ext as u8);
        push_hex(&mut record, crc(sum));
        record.push('\n');
        *ext_addr = ext;
    }

    let mut sum: u32 = 0;
    record.push(':');
    push_hex(&mut record, data.len() as u8);
    sum += data.len() as u32;
    push_hex(&mut record, (addr >> 8) as u8);
    push_hex(&mut record, addr as u8);
    sum += (addr >> 8 & 0xff) + (addr & 0xff);
    push_hex(&mut record, RECORD_DATA);
    for &b in data {
        push_hex(&mut record, b);
        sum += b as u32;
    }
    push_hex(&mut record, crc(sum));
    record.push('\n');
    record
}

/// Renders bytes 16 to a line with a printable-ASCII gutter, the format
/// used for memory dumps and `--debug` buffer traces.
pub fn hex_dump(data: &[u8]) -> String {
    let mut out = String::new();
    for chunk in data.chunks(16) {
        for b in chunk {
            out.push_str(&format!("{b:02x} "));
        }
        for _ in chunk.len()..16 {
            out.push_str("   ");
        }
        out.push(' ');
        for &b in chunk {
            out.push(if (33..127).contains(&b) { b as char } else { '.' });
        }
        out.push('\n');
    }
    out
}
