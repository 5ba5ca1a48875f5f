//! Wire-level driver for the UPDI (Unified Program and Debug Interface) bus.
//!
//! UPDI is a half-duplex, self-echoing, even-parity serial protocol: every
//! byte the host writes comes back on the same wire before any real
//! response, because host and target share one line. [`UpdiClient::command`]
//! is the single choke point that enforces that discipline; every other
//! method here is a thin, bit-exact encoding of one instruction built on top
//! of it.

mod error;
mod transport;

pub use error::{Result, UpdiError};
pub use transport::{open, UpdiPort};

#[cfg(any(test, feature = "mock"))]
pub use transport::mock;

use log::{debug, info};
use std::time::Duration;

/// `key` instruction phrase that unlocks NVM programming access.
pub const KEY_NVMPROG: &[u8; 8] = b"NVMProg ";
/// `key` instruction phrase that unlocks a chip (or user row) erase.
pub const KEY_NVMERASE: &[u8; 8] = b"NVMErase";
/// `key` instruction phrase that unlocks the user row for NVM-less writes.
pub const KEY_NVMUSERROW: &[u8; 8] = b"NVMUs&te";
/// `key` instruction phrase that unlocks on-chip debug access.
pub const KEY_OCD: &[u8; 8] = b"OCD     ";

/// Address width of a direct (`lds`/`sts`) or pointer (`ld ptr`/`st ptr`)
/// operand, per the UPDI opcode map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrWidth {
    Byte = 0,
    Word = 1,
    ThreeByte = 2,
}

/// Data width of a direct or indirect operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataWidth {
    Byte = 0,
    Word = 1,
}

impl DataWidth {
    fn bytes(self) -> usize {
        match self {
            DataWidth::Byte => 1,
            DataWidth::Word => 2,
        }
    }
}

/// Address-step mode applied after an indirect access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrStep {
    NoChange = 0b00,
    PostIncrement = 0b01,
    PostDecrement = 0b11,
}

/// A UPDI client bound to one serial transport.
///
/// `connect` must succeed before any instruction other than `resynchronize`
/// is meaningful; the type itself does not enforce that, matching the
/// source's behavior of letting any call surface a timeout if the bus isn't
/// actually listening.
pub struct UpdiClient<T: UpdiPort> {
    port: T,
}

impl UpdiClient<Box<dyn serialport::SerialPort>> {
    /// Opens `port_name` at `baud_rate` with the parity/stop-bit/timeout
    /// configuration the UPDI bus requires, without performing the
    /// handshake yet.
    pub fn open(port_name: &str, baud_rate: u32) -> Result<Self> {
        Ok(UpdiClient {
            port: transport::open(port_name, baud_rate)?,
        })
    }
}

impl<T: UpdiPort> UpdiClient<T> {
    /// Wraps an already-open transport. Used directly by tests against
    /// [`transport::mock::MockPort`]; production code goes through
    /// [`UpdiClient::open`].
    pub fn with_port(port: T) -> Self {
        UpdiClient { port }
    }

    /// Runs the UPDI handshake: HV-pulse DTR toggle, BREAK, a legacy
    /// contention-check disable for T412-class parts, then a harmless
    /// `ldcs CTRLA` to confirm the target is listening. Returns the UPDI
    /// revision found in the high nibble of the CSR value.
    pub fn connect(&mut self) -> Result<u8> {
        debug!("opening UPDI handshake");
        self.port.set_dtr(false)?;
        std::thread::sleep(Duration::from_millis(1));
        self.port.set_dtr(true)?;
        std::thread::sleep(Duration::from_millis(1));
        self.port.set_dtr(false)?;

        self.port.send_break(Duration::from_micros(1))?;
        std::thread::sleep(Duration::from_millis(5));
        self.port.clear_input_buffer()?;

        // stcs CTRLB, 0x08 (disable contention check; compatibility with T412)
        let (ok, _) = self.command(&[0xC3, 0x08], 0, false)?;
        if !ok {
            return Err(UpdiError::EchoTimedOut { instruction: "stcs" });
        }
        self.port.clear_input_buffer()?;

        let (ok, buf) = self.command(&[0x80], 1, false)?;
        if !ok || buf.len() != 1 {
            return Err(UpdiError::TimedOut);
        }
        let rev = buf[0] >> 4;
        info!("UPDI version: {rev}");
        Ok(rev)
    }

    /// Issues `stcs CTRLB, UPDIDIS` then releases the transport.
    pub fn disconnect(self) -> Result<()> {
        let mut this = self;
        this.store_csr(0x3, 4)
    }

    /// Transmits a 25 ms BREAK and reads `STATUSB` to clear the sticky
    /// parity-error flag. Returns the PESIG byte.
    pub fn resynchronize(&mut self) -> Result<u8> {
        debug!("resynchronizing (25 ms break)");
        self.port.send_break(Duration::from_millis(25))?;
        let (ok, buf) = self.command(&[0x81], 1, false)?;
        if !ok || buf.len() != 1 {
            return Err(UpdiError::TimedOut);
        }
        info!("UPDI resynchronized; error code: {:02x}", buf[0]);
        Ok(buf[0])
    }

    /// Transmits `txdata` (prefixed by the sync byte `0x55` unless
    /// `skip_sync`), consumes the echo, then reads `n_expected` response
    /// bytes. Returns `(success, response)`; `success` is false on an echo
    /// or response length mismatch, mirroring the source's non-exceptional
    /// low-level `command()`.
    fn command(&mut self, txdata: &[u8], n_expected: usize, skip_sync: bool) -> Result<(bool, Vec<u8>)> {
        let n_tx = if skip_sync { txdata.len() } else { txdata.len() + 1 };
        self.port.clear_input_buffer()?;

        if skip_sync {
            self.port.write_all(txdata)?;
        } else {
            self.port.write_all(&[0x55])?;
            self.port.write_all(txdata)?;
        }
        self.port.flush()?;

        let echo = self.port.read_upto(n_tx)?;
        if echo.len() != n_tx {
            debug!("instruction echo not received (expected {n_tx}, got {})", echo.len());
            return Ok((false, Vec::new()));
        }

        if n_expected == 0 {
            return Ok((true, Vec::new()));
        }

        let resp = self.port.read_upto(n_expected)?;
        if resp.len() != n_expected {
            debug!("response not received (expected {n_expected}, got {})", resp.len());
            return Ok((false, Vec::new()));
        }
        Ok((true, resp))
    }

    /// `ldcs addr` — CSR read, `0 <= addr <= 15`.
    pub fn load_csr(&mut self, addr: u8) -> Result<u8> {
        assert!(addr <= 0xF);
        let (ok, buf) = self.command(&[0x80 | addr], 1, false)?;
        if !ok {
            return Err(UpdiError::ResponseTimedOut { instruction: "ldcs" });
        }
        Ok(buf[0])
    }

    /// `stcs addr, value` — CSR write.
    pub fn store_csr(&mut self, addr: u8, value: u8) -> Result<()> {
        assert!(addr <= 0xF);
        let (ok, _) = self.command(&[0xC0 | addr, value], 0, false)?;
        if !ok {
            return Err(UpdiError::EchoTimedOut { instruction: "stcs" });
        }
        Ok(())
    }

    /// `key.sib width` — reads the 32-byte System Information Block. The
    /// width operand is accepted for fidelity with the opcode map but is
    /// ignored by real hardware, which always returns 32 bytes.
    pub fn read_sib(&mut self) -> Result<[u8; 32]> {
        let (ok, buf) = self.command(&[0xE4 | 0b10], 32, false)?;
        if !ok {
            return Err(UpdiError::ResponseTimedOut { instruction: "sib" });
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(&buf);
        Ok(out)
    }

    /// `key` — unlocks the functionality named by `key` (one of the
    /// `KEY_*` constants), transmitted least-significant-byte-first (i.e.
    /// reversed relative to the ASCII phrase).
    pub fn key(&mut self, key: &[u8; 8]) -> Result<()> {
        let mut txdata = Vec::with_capacity(9);
        txdata.push(0xE0);
        txdata.extend(key.iter().rev());
        let (ok, _) = self.command(&txdata, 0, false)?;
        if !ok {
            return Err(UpdiError::EchoTimedOut { instruction: "key" });
        }
        Ok(())
    }

    /// `repeat count` — arms the next instruction to repeat `count` times,
    /// `1 <= count <= 256`.
    pub fn repeat(&mut self, count: u16) -> Result<()> {
        assert!((1..=0x100).contains(&count));
        let (ok, _) = self.command(&[0xA0, (count - 1) as u8], 0, false)?;
        if !ok {
            return Err(UpdiError::EchoTimedOut { instruction: "repeat" });
        }
        Ok(())
    }

    /// `lds addr` — direct load.
    pub fn load_direct(&mut self, addr: u32, addr_width: AddrWidth, data_width: DataWidth) -> Result<u32> {
        let instr = match addr_width {
            AddrWidth::Byte => vec![0x00 | data_width as u8, addr as u8],
            AddrWidth::Word => vec![0x04 | data_width as u8, addr as u8, (addr >> 8) as u8],
            AddrWidth::ThreeByte => vec![
                0x08 | data_width as u8,
                addr as u8,
                (addr >> 8) as u8,
                (addr >> 16) as u8,
            ],
        };
        let (ok, buf) = self.command(&instr, data_width.bytes(), false)?;
        if !ok {
            return Err(UpdiError::ResponseTimedOut { instruction: "lds" });
        }
        Ok(match data_width {
            DataWidth::Byte => buf[0] as u32,
            DataWidth::Word => buf[0] as u32 | ((buf[1] as u32) << 8),
        })
    }

    /// `sts addr, val` — direct store. Fails with `AddressNacked` or
    /// `DataNacked` depending on which phase the target refused to ACK.
    pub fn store_direct(&mut self, addr: u32, data: u32, addr_width: AddrWidth, data_width: DataWidth) -> Result<()> {
        let instr = match addr_width {
            AddrWidth::Byte => vec![0x40 | data_width as u8, addr as u8],
            AddrWidth::Word => vec![0x44 | data_width as u8, addr as u8, (addr >> 8) as u8],
            AddrWidth::ThreeByte => vec![
                0x48 | data_width as u8,
                addr as u8,
                (addr >> 8) as u8,
                (addr >> 16) as u8,
            ],
        };
        let (ok, buf) = self.command(&instr, 1, false)?;
        if !ok || buf[0] != 0x40 {
            return Err(UpdiError::AddressNacked { instruction: "sts" });
        }

        let databytes: Vec<u8> = match data_width {
            DataWidth::Byte => vec![data as u8],
            DataWidth::Word => vec![data as u8, (data >> 8) as u8],
        };
        let (ok, buf) = self.command(&databytes, 1, true)?;
        if !ok || buf[0] != 0x40 {
            return Err(UpdiError::DataNacked { instruction: "sts" });
        }
        Ok(())
    }

    /// `st ptr addr` — sets the indirect pointer.
    pub fn store_pointer(&mut self, addr: u32, addr_width: AddrWidth) -> Result<()> {
        let instr = match addr_width {
            AddrWidth::Byte => vec![0x68, addr as u8],
            AddrWidth::Word => vec![0x69, addr as u8, (addr >> 8) as u8],
            AddrWidth::ThreeByte => vec![0x6A, addr as u8, (addr >> 8) as u8, (addr >> 16) as u8],
        };
        let (ok, buf) = self.command(&instr, 1, false)?;
        if !ok || buf[0] != 0x40 {
            return Err(UpdiError::InstructionNotEchoed { instruction: "st ptr" });
        }
        Ok(())
    }

    /// `ld ptr` — reads the indirect pointer.
    pub fn load_pointer(&mut self, addr_width: AddrWidth) -> Result<u32> {
        let width = addr_width as u8;
        let n = width as usize + 1;
        let (ok, buf) = self.command(&[0x28 | width], n, false)?;
        if !ok {
            return Err(UpdiError::ResponseTimedOut { instruction: "ld ptr" });
        }
        Ok(match addr_width {
            AddrWidth::Byte => buf[0] as u32,
            AddrWidth::Word => buf[0] as u32 | ((buf[1] as u32) << 8),
            AddrWidth::ThreeByte => buf[0] as u32 | ((buf[1] as u32) << 8) | ((buf[2] as u32) << 16),
        })
    }

    /// `ld *ptr` — indirect load. Must be preceded by [`UpdiClient::repeat`]
    /// when `burst > 1`. Returns `burst * data_width` bytes, low byte first.
    pub fn load_indirect(&mut self, data_width: DataWidth, addr_step: AddrStep, burst: usize) -> Result<Vec<u8>> {
        let opcode = 0x20 | ((addr_step as u8) << 2) | data_width as u8;
        let n = burst * data_width.bytes();
        let (ok, buf) = self.command(&[opcode], n, false)?;
        if !ok {
            return Err(UpdiError::ResponseTimedOut { instruction: "ld" });
        }
        Ok(buf)
    }

    /// `st *ptr` — indirect store. `data` must hold at least
    /// `burst * data_width` bytes; each element is written (and ACKed)
    /// separately, with the sync byte sent only on the instruction phase.
    pub fn store_indirect(&mut self, data: &[u8], data_width: DataWidth, addr_step: AddrStep, burst: usize) -> Result<()> {
        let elem_bytes = data_width.bytes();
        assert!(data.len() >= burst * elem_bytes);
        assert!((1..=0x100).contains(&burst));

        let opcode = 0x60 | ((addr_step as u8) << 2) | data_width as u8;
        let (ok, _) = self.command(&[opcode], 0, false)?;
        if !ok {
            return Err(UpdiError::InstructionNotEchoed { instruction: "st *ptr" });
        }

        for i in 0..burst {
            let chunk = &data[i * elem_bytes..(i + 1) * elem_bytes];
            let (ok, buf) = self.command(chunk, 1, true)?;
            if !ok || buf[0] != 0x40 {
                return Err(UpdiError::DataNacked { instruction: "st *ptr" });
            }
        }
        Ok(())
    }

    /// Burst indirect load: `st ptr(addr); repeat(n); ld *ptr++`.
    pub fn load_burst(&mut self, addr: u32, data_width: DataWidth, burst: usize) -> Result<Vec<u8>> {
        self.store_pointer(addr, AddrWidth::ThreeByte)?;
        self.repeat(burst as u16)?;
        self.load_indirect(data_width, AddrStep::PostIncrement, burst)
    }

    /// Burst indirect store: `st ptr(addr); repeat(n); st *ptr++`.
    pub fn store_burst(&mut self, addr: u32, data: &[u8], data_width: DataWidth, burst: usize) -> Result<()> {
        self.store_pointer(addr, AddrWidth::ThreeByte)?;
        self.repeat(burst as u16)?;
        self.store_indirect(data, data_width, AddrStep::PostIncrement, burst)
    }
}

#[cfg(test)]
mod tests {
    use super::transport::mock::MockPort;
    use super::*;

    fn client_with(responses: &[u8]) -> UpdiClient<MockPort> {
        UpdiClient::with_port(MockPort::with_responses(responses))
    }

    #[test]
    fn ldcs_returns_csr_value() {
        // sync echo + opcode echo + CSR value
        let mut c = client_with(&[0x55, 0x82, 0x37]);
        assert_eq!(c.load_csr(2).unwrap(), 0x37);
        assert_eq!(c.port.written, vec![0x55, 0x82]);
    }

    #[test]
    fn stcs_requires_echo_only() {
        let mut c = client_with(&[0x55, 0xC2, 0x08]);
        c.store_csr(2, 0x08).unwrap();
        assert_eq!(c.port.written, vec![0x55, 0xC2, 0x08]);
    }

    #[test]
    fn ldcs_times_out_without_full_echo() {
        let mut c = client_with(&[0x55]); // opcode echo byte missing
        let err = c.load_csr(2).unwrap_err();
        assert!(matches!(err, UpdiError::ResponseTimedOut { .. }));
    }

    #[test]
    fn load_direct_word_is_little_endian() {
        // 4 echo bytes (sync + 3-byte word-address instruction), then the
        // little-endian word response 0x1234.
        let mut c = client_with(&[0, 0, 0, 0, 0x34, 0x12]);
        let v = c
            .load_direct(0x0F80, AddrWidth::Word, DataWidth::Word)
            .unwrap();
        assert_eq!(v, 0x1234);
    }

    #[test]
    fn store_direct_requires_both_acks() {
        // address stage: 4 echo bytes + ack; data stage: 1 echo byte (skip-sync) + ack
        let mut c = client_with(&[0, 0, 0, 0, 0x40, 0, 0x40]);
        c.store_direct(0x1234, 0x56, AddrWidth::Word, DataWidth::Byte)
            .unwrap();
    }

    #[test]
    fn store_direct_address_nack_is_reported() {
        let mut c = client_with(&[0, 0, 0, 0, 0x00]); // address stage ack is not 0x40
        let err = c
            .store_direct(0x1234, 0x56, AddrWidth::Word, DataWidth::Byte)
            .unwrap_err();
        assert!(matches!(err, UpdiError::AddressNacked { .. }));
    }

    #[test]
    fn key_is_transmitted_reversed() {
        let mut c = client_with(&[0; 10]); // sync + opcode + 8 key bytes, echoed back
        c.key(KEY_OCD).unwrap();
        let mut expect = vec![0x55, 0xE0];
        expect.extend(KEY_OCD.iter().rev());
        assert_eq!(c.port.written, expect);
    }

    #[test]
    fn burst_load_issues_pointer_repeat_then_load() {
        // st ptr: 5 echo bytes + 1 ack; repeat: 3 echo bytes; ld *ptr++: 2
        // echo bytes + 4 data bytes.
        let mut c = client_with(&[0, 0, 0, 0, 0, 0x40, 0, 0, 0, 0, 0, 1, 2, 3, 4]);
        let data = c.load_burst(0x0F80, DataWidth::Byte, 4).unwrap();
        assert_eq!(data, vec![1, 2, 3, 4]);
    }

    #[test]
    fn connect_returns_updi_revision_high_nibble() {
        let mut c = client_with(&[
            0x55, 0xC3, 0x08, // stcs CTRLB echo (no response bytes)
            0x55, 0x80, 0x30, // ldcs CTRLA -> value 0x30 means rev 3
        ]);
        let rev = c.connect().unwrap();
        assert_eq!(rev, 3);
    }

    #[test]
    fn resynchronize_reports_pesig() {
        let mut c = client_with(&[0x55, 0x81, 0x04]);
        let pesig = c.resynchronize().unwrap();
        assert_eq!(pesig, 0x04);
    }
}
