//! Static chip-family tables and derived programming properties
//!
//! The chip database names its core type, power sequence and socket image
//! with keyed tokens; the closed tables below map those tokens onto the
//! codes and memory layout the firmware works with. [`Properties`] is the
//! resolved, immutable parameter block a programming session runs against.

use crate::chipdb::ChipInfo;
use crate::error::Error;

pub struct CoreType {
    pub name: &'static str,
    /// Core type code transmitted in the init message
    pub value: u8,
    /// Instruction width in bits
    pub bits: u8,
    pub rom_base: u32,
    pub eeprom_base: u32,
    pub config_base: u32,
}

pub const CORE_TYPES: &[CoreType] = &[
    CoreType { name: "BIT16_C", value: 0,  bits: 16, rom_base: 0x000000, eeprom_base: 0xf00000, config_base: 0x300000 },
    CoreType { name: "BIT16_A", value: 1,  bits: 16, rom_base: 0x000000, eeprom_base: 0xf00000, config_base: 0x300000 },
    CoreType { name: "BIT16_B", value: 2,  bits: 16, rom_base: 0x000000, eeprom_base: 0xf00000, config_base: 0x300000 },
    CoreType { name: "BIT14_G", value: 3,  bits: 14, rom_base: 0x000000, eeprom_base: 0x004200, config_base: 0x00400e },
    CoreType { name: "BIT12_A", value: 4,  bits: 12, rom_base: 0x000000, eeprom_base: 0x004200, config_base: 0x00400e },
    CoreType { name: "BIT14_A", value: 5,  bits: 14, rom_base: 0x000000, eeprom_base: 0x004200, config_base: 0x00400e },
    CoreType { name: "BIT14_B", value: 6,  bits: 14, rom_base: 0x000000, eeprom_base: 0x004200, config_base: 0x00400e },
    CoreType { name: "BIT14_C", value: 7,  bits: 14, rom_base: 0x000000, eeprom_base: 0x004200, config_base: 0x00400e },
    CoreType { name: "BIT12_B", value: 8,  bits: 14, rom_base: 0x000000, eeprom_base: 0x004200, config_base: 0x00400e },
    CoreType { name: "BIT14_E", value: 9,  bits: 14, rom_base: 0x000000, eeprom_base: 0x004200, config_base: 0x00400e },
    CoreType { name: "BIT14_F", value: 10, bits: 14, rom_base: 0x000000, eeprom_base: 0x004200, config_base: 0x00400e },
    CoreType { name: "BIT12_C", value: 11, bits: 12, rom_base: 0x000000, eeprom_base: 0x004200, config_base: 0x001ffe },
];

pub struct PowerSequence {
    pub name: &'static str,
    /// Power sequence code transmitted in the init message
    pub value: u8,
    /// The FAST variants share their code with the plain one but ask for a
    /// delay between VCC and VPP
    pub vcc_vpp_delay: bool,
}

pub const POWER_SEQUENCES: &[PowerSequence] = &[
    PowerSequence { name: "VCC",         value: 0, vcc_vpp_delay: false },
    PowerSequence { name: "VCCVPP1",     value: 1, vcc_vpp_delay: false },
    PowerSequence { name: "VCCVPP2",     value: 2, vcc_vpp_delay: false },
    PowerSequence { name: "VPP1VCC",     value: 3, vcc_vpp_delay: false },
    PowerSequence { name: "VPP2VCC",     value: 4, vcc_vpp_delay: false },
    PowerSequence { name: "VCCFASTVPP1", value: 1, vcc_vpp_delay: true },
    PowerSequence { name: "VCCFASTVPP2", value: 2, vcc_vpp_delay: true },
];

/// Socket image token to pin-1 position, as shown to the user when a chip
/// has to go into the ZIF socket.
pub const SOCKET_HINTS: &[(&str, &str)] = &[
    ("0PIN", ""),
    ("8PIN", "socket pin 13"),
    ("14PIN", "socket pin 13"),
    ("18PIN", "socket pin 2"),
    ("28NPIN", "socket pin 1"),
    ("40PIN", "socket pin 1"),
];

/// Resolved programming parameters for one chip.
#[derive(Debug, Clone, Default)]
pub struct Properties {
    /// Pin-1 position prompt; empty for ICSP-only parts
    pub socket_hint: String,
    pub rom_base: u32,
    /// ROM size in words
    pub rom_size: u32,
    /// Value of an erased program word
    pub rom_blank: u16,
    pub eeprom_base: u32,
    /// EEPROM size in bytes
    pub eeprom_size: u32,
    pub config_base: u32,
    pub core_type: u8,
    pub core_bits: u8,
    pub program_delay: u8,
    pub power_sequence: u8,
    pub erase_mode: u8,
    pub program_tries: u8,
    /// Parsed from the database but not transmitted by this protocol
    pub over_program: u8,
    pub panel_sizing: u8,
    pub fuse_blank: Vec<u16>,
    pub cal_word_in_rom: bool,
    pub band_gap_fuse: bool,
    pub single_panel_access_18f: bool,
    pub vcc_vpp_delay: bool,
    pub flash_chip: bool,
}

impl Properties {
    /// Resolves a database record against the static tables.
    pub fn from_chip(info: &ChipInfo) -> Result<Self, Error> {
        let core = CORE_TYPES
            .iter()
            .find(|core| core.name == info.core_type)
            .ok_or_else(|| Error::UnsupportedCoreType(info.core_type.clone()))?;
        let power = POWER_SEQUENCES
            .iter()
            .find(|power| power.name == info.power_sequence)
            .ok_or_else(|| Error::UnsupportedPowerSequence(info.power_sequence.clone()))?;

        let socket_hint = if info.icsp_only {
            String::new()
        } else {
            SOCKET_HINTS
                .iter()
                .find(|(name, _)| *name == info.socket_image)
                .map(|(_, hint)| hint.to_string())
                .unwrap_or_default()
        };

        Ok(Properties {
            socket_hint,
            rom_base: core.rom_base,
            rom_size: info.rom_size,
            rom_blank: (!(!0u32 << core.bits) & 0xffff) as u16,
            eeprom_base: core.eeprom_base,
            eeprom_size: info.eeprom_size,
            config_base: core.config_base,
            core_type: core.value,
            core_bits: core.bits,
            program_delay: info.program_delay,
            power_sequence: power.value,
            erase_mode: info.erase_mode,
            program_tries: info.program_tries,
            over_program: info.over_program,
            panel_sizing: info.panel_sizing,
            fuse_blank: info.fuse_blank.clone(),
            cal_word_in_rom: info.cal_word,
            band_gap_fuse: info.band_gap,
            single_panel_access_18f: core.value == 1,
            vcc_vpp_delay: power.vcc_vpp_delay,
            flash_chip: info.flash_chip,
        })
    }

    /// Power sequence code for the init message. ICSP wiring has no socket
    /// VCC switching, so the VPP2-relative codes fall back to their VPP1
    /// counterparts.
    pub fn power_sequence_effective(&self, icsp_mode: bool) -> u8 {
        if !icsp_mode {
            return self.power_sequence;
        }
        match self.power_sequence {
            2 => 1,
            4 => 3,
            other => other,
        }
    }

    /// Flag byte of the init message.
    pub fn init_flags(&self) -> u8 {
        u8::from(self.cal_word_in_rom)
            | u8::from(self.band_gap_fuse) << 1
            | u8::from(self.single_panel_access_18f) << 2
            | u8::from(self.vcc_vpp_delay) << 3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chip(core_type: &str, power_sequence: &str) -> ChipInfo {
        ChipInfo {
            chip_name: "16F628".into(),
            core_type: core_type.into(),
            power_sequence: power_sequence.into(),
            socket_image: "18PIN".into(),
            rom_size: 0x800,
            eeprom_size: 0x80,
            fuse_blank: vec![0x3FFF],
            flash_chip: true,
            ..ChipInfo::default()
        }
    }

    #[test]
    fn rom_blank_matches_the_instruction_width() {
        for core in CORE_TYPES {
            let mut info = chip(core.name, "VCC");
            info.core_type = core.name.into();
            let props = Properties::from_chip(&info).unwrap();
            assert_eq!(props.rom_blank as u32, (1 << core.bits) - 1);
        }
    }

    #[test]
    fn fast_power_sequences_share_codes_and_set_the_delay() {
        let plain = Properties::from_chip(&chip("BIT14_B", "VCCVPP2")).unwrap();
        let fast = Properties::from_chip(&chip("BIT14_B", "VCCFASTVPP2")).unwrap();
        assert_eq!(plain.power_sequence, fast.power_sequence);
        assert!(!plain.vcc_vpp_delay);
        assert!(fast.vcc_vpp_delay);
    }

    #[test]
    fn icsp_remaps_vpp2_codes() {
        let props = Properties::from_chip(&chip("BIT14_B", "VCCVPP2")).unwrap();
        assert_eq!(props.power_sequence_effective(false), 2);
        assert_eq!(props.power_sequence_effective(true), 1);

        let props = Properties::from_chip(&chip("BIT14_B", "VPP2VCC")).unwrap();
        assert_eq!(props.power_sequence_effective(true), 3);

        let props = Properties::from_chip(&chip("BIT14_B", "VCCVPP1")).unwrap();
        assert_eq!(props.power_sequence_effective(true), 1);
    }

    #[test]
    fn socket_hint_follows_the_image_token() {
        let props = Properties::from_chip(&chip("BIT14_B", "VCC")).unwrap();
        assert_eq!(props.socket_hint, "socket pin 2");

        let mut icsp_only = chip("BIT14_B", "VCC");
        icsp_only.icsp_only = true;
        let props = Properties::from_chip(&icsp_only).unwrap();
        assert!(props.socket_hint.is_empty());
    }

    #[test]
    fn bit16_a_selects_single_panel_access() {
        let with = Properties::from_chip(&chip("BIT16_A", "VCC")).unwrap();
        assert!(with.single_panel_access_18f);
        assert_eq!(with.init_flags(), 0b0100);

        let without = Properties::from_chip(&chip("BIT16_C", "VCC")).unwrap();
        assert!(!without.single_panel_access_18f);
        assert_eq!(without.init_flags(), 0);
    }

    #[test]
    fn unknown_tokens_are_rejected() {
        assert!(matches!(
            Properties::from_chip(&chip("BIT20_X", "VCC")),
            Err(Error::UnsupportedCoreType(name)) if name == "BIT20_X"
        ));
        assert!(matches!(
            Properties::from_chip(&chip("BIT14_B", "VXX")),
            Err(Error::UnsupportedPowerSequence(name)) if name == "VXX"
        ));
    }
}
