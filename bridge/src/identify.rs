//! The startup identification banner: a short, separate UPDI connection
//! that reads the SIB, the device signature, and the silicon revision, and
//! prints them for the operator before the RSP server binds. This is not
//! part of the debug session proper — the connection is torn down and a
//! fresh one is opened for [`crate::server::RspServer`] — but a complete
//! bridge always runs it, since it's how an operator confirms the right
//! chip is on the other end of the wire.

use devicetable::DeviceInfo;
use log::warn;
use std::time::Duration;
use updi::{Result, UpdiClient, KEY_NVMPROG};

pub fn run(port_name: &str, baud_rate: u32, devinfo: &DeviceInfo) -> Result<()> {
    let mut updi = UpdiClient::open(port_name, baud_rate)?;

    let updi_rev = match updi.connect() {
        Ok(rev) => rev,
        Err(_) => {
            updi.resynchronize()?;
            updi.connect()?
        }
    };

    std::thread::sleep(Duration::from_millis(100));
    let sib = updi.read_sib()?;
    let sib_str = String::from_utf8_lossy(&sib);

    updi.key(KEY_NVMPROG)?;
    updi.store_csr(0x8, 0x59)?;
    updi.store_csr(0x8, 0x00)?;
    std::thread::sleep(Duration::from_millis(100));

    let signature = updi.load_burst(devinfo.signature_addr, updi::DataWidth::Byte, 3)?;
    let revid = updi.load_direct(0x0F01, updi::AddrWidth::ThreeByte, updi::DataWidth::Byte)? as u8;

    let sig_str = format!(
        "{:02X}-{:02X}-{:02X}",
        signature[0], signature[1], signature[2]
    );
    let expected = devinfo.signature;
    if (signature[0], signature[1], signature[2]) != expected {
        warn!(
            "device signature {sig_str} does not match expected {:02X}-{:02X}-{:02X} for this part",
            expected.0, expected.1, expected.2
        );
    }

    let rev = if revid & 0xF0 != 0 {
        format!("{}{}", (b'A' + (revid >> 4) - 1) as char, revid & 0x0F)
    } else {
        ((b'A' + revid - 1) as char).to_string()
    };

    let nvmver = sib_str.as_bytes().get(10).map(|&b| b as char).unwrap_or('?');
    let ocdver = sib_str.as_bytes().get(13).map(|&b| b as char).unwrap_or('?');

    println!("UPDI rev.{updi_rev}");
    println!("SIB: {sib_str}");
    println!("Signature: {sig_str} (revision {rev})");
    println!("NVM: v{nvmver} / OCD: v{ocdver}");

    updi.store_csr(0x8, 0x59)?;
    updi.store_csr(0x8, 0x00)?;
    std::thread::sleep(Duration::from_millis(100));
    updi.disconnect()?;
    Ok(())
}
