//! Maps a part name given on the command line to the constants the OCD layer
//! and the startup identification banner need: where code flash is mapped
//! into the target's data address space, where the device signature lives,
//! and NVM/EEPROM page sizes (unused by this bridge today, but part of a
//! complete device record — see [`DeviceInfo::eeprom_page_size`]).
//!
//! Matching is case-insensitive and keyed off three regexes, one per AVR
//! family this bridge knows how to talk to.

use regex::Regex;

/// The expected silicon signature (`SIGROW.DEVICEID`) for every family this
/// table recognizes.
pub const EXPECTED_SIGNATURE: (u8, u8, u8) = (0x1E, 0x00, 0x00);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    /// UPDI data-space address at which code flash is mapped.
    pub flash_offset: u32,
    /// UPDI data-space address of the 3-byte device signature.
    pub signature_addr: u32,
    /// Expected signature bytes for this family.
    pub signature: (u8, u8, u8),
    pub flash_page_size: u32,
    pub eeprom_page_size: u32,
}

/// Looks up `part_name` (matched case-insensitively) against the known
/// megaAVR-0, tinyAVR-0/1/2, and AVR-Dx/Ex regexes. Returns `None` for an
/// unrecognized name.
pub fn lookup(part_name: &str) -> Option<DeviceInfo> {
    let part_name = part_name.to_ascii_lowercase();

    let megaavr = Regex::new(r"^atmega(?P<flash>8|16|32|48)0(?P<pincount>8|9)$").unwrap();
    let tinyavr =
        Regex::new(r"^attiny(?P<flash>2|4|8|16|32)(?P<series>0|1|2)(?P<pincount>2|4|6|7)$").unwrap();
    let newavr = Regex::new(
        r"^avr(?P<flash>16|32|64|128)(?P<series>da|db|dd|du|ea|eb)(?P<pincount>14|20|28|32|48|64)$",
    )
    .unwrap();

    if let Some(caps) = megaavr.captures(&part_name) {
        let high_density = caps["flash"].parse::<u32>().unwrap() >= 32;
        return Some(DeviceInfo {
            flash_offset: 0x4000,
            signature_addr: 0x1100,
            signature: EXPECTED_SIGNATURE,
            flash_page_size: if high_density { 128 } else { 64 },
            eeprom_page_size: if high_density { 64 } else { 32 },
        });
    }

    if let Some(caps) = tinyavr.captures(&part_name) {
        let high_density = caps["flash"].parse::<u32>().unwrap() >= 32;
        return Some(DeviceInfo {
            flash_offset: 0x8000,
            signature_addr: 0x1100,
            signature: EXPECTED_SIGNATURE,
            flash_page_size: if high_density { 128 } else { 64 },
            eeprom_page_size: if high_density { 64 } else { 32 },
        });
    }

    if let Some(caps) = newavr.captures(&part_name) {
        return Some(match &caps["series"] {
            "da" | "db" | "dd" => DeviceInfo {
                flash_offset: 0x800000,
                signature_addr: 0x1100,
                signature: EXPECTED_SIGNATURE,
                flash_page_size: 512,
                eeprom_page_size: 1,
            },
            "du" => DeviceInfo {
                flash_offset: 0x800000,
                signature_addr: 0x1080,
                signature: EXPECTED_SIGNATURE,
                flash_page_size: 512,
                eeprom_page_size: 1,
            },
            "ea" => DeviceInfo {
                flash_offset: 0x800000,
                signature_addr: 0x1100,
                signature: EXPECTED_SIGNATURE,
                flash_page_size: if &caps["flash"] == "64" { 128 } else { 64 },
                eeprom_page_size: 8,
            },
            "eb" => DeviceInfo {
                flash_offset: 0x800000,
                signature_addr: 0x1080,
                signature: EXPECTED_SIGNATURE,
                flash_page_size: 64,
                eeprom_page_size: 8,
            },
            _ => unreachable!("regex only matches the five known series codes"),
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn megaavr_low_and_high_density() {
        let lo = lookup("atmega808").unwrap();
        assert_eq!(lo.flash_offset, 0x4000);
        assert_eq!(lo.flash_page_size, 64);
        assert_eq!(lo.eeprom_page_size, 32);

        let hi = lookup("ATmega3209").unwrap();
        assert_eq!(hi.flash_offset, 0x4000);
        assert_eq!(hi.flash_page_size, 128);
        assert_eq!(hi.eeprom_page_size, 64);
    }

    #[test]
    fn tinyavr_maps_to_0x8000() {
        let d = lookup("attiny1624").unwrap();
        assert_eq!(d.flash_offset, 0x8000);
        assert_eq!(d.flash_page_size, 64);
    }

    #[test]
    fn avr_dx_family_is_flat_512_page() {
        let d = lookup("avr128da48").unwrap();
        assert_eq!(d.flash_offset, 0x800000);
        assert_eq!(d.signature_addr, 0x1100);
        assert_eq!(d.flash_page_size, 512);
        assert_eq!(d.eeprom_page_size, 1);
    }

    #[test]
    fn avr_du_and_eb_use_alternate_signature_address() {
        assert_eq!(lookup("avr64du32").unwrap().signature_addr, 0x1080);
        assert_eq!(lookup("avr16eb14").unwrap().signature_addr, 0x1080);
    }

    #[test]
    fn avr_ea_page_size_depends_on_flash_density() {
        assert_eq!(lookup("avr64ea48").unwrap().flash_page_size, 128);
        assert_eq!(lookup("avr32ea48").unwrap().flash_page_size, 64);
    }

    #[test]
    fn unrecognized_part_name_is_rejected() {
        assert!(lookup("attiny85").is_none());
        assert!(lookup("totally-not-an-avr").is_none());
    }
}
