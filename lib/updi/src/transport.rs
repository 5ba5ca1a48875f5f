use std::io::{self, Read, Write};
use std::time::Duration;

/// What the UPDI driver needs from a serial port: byte I/O, DTR control, and
/// break-signal transmission. Implemented for [`Box<dyn serialport::SerialPort>`]
/// and, in tests, for an in-memory stub that plays back canned bus traffic.
pub trait UpdiPort: Read + Write {
    fn set_dtr(&mut self, level: bool) -> io::Result<()>;
    fn send_break(&mut self, duration: Duration) -> io::Result<()>;
    fn clear_input_buffer(&mut self) -> io::Result<()>;

    /// Read up to `n` bytes, returning as many as arrived before the port's
    /// read timeout elapsed. A partial (including empty) result is not an
    /// error; it is the caller's job to notice it read fewer bytes than it
    /// asked for.
    fn read_upto(&mut self, n: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        let mut filled = 0;
        while filled < n {
            match self.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(read) => filled += read,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        buf.truncate(filled);
        Ok(buf)
    }
}

impl UpdiPort for Box<dyn serialport::SerialPort> {
    fn set_dtr(&mut self, level: bool) -> io::Result<()> {
        self.write_data_terminal_ready(level)
            .map_err(serialport_err_to_io)
    }

    fn send_break(&mut self, duration: Duration) -> io::Result<()> {
        self.set_break().map_err(serialport_err_to_io)?;
        std::thread::sleep(duration);
        self.clear_break().map_err(serialport_err_to_io)
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        self.clear(serialport::ClearBuffer::Input)
            .map_err(serialport_err_to_io)
    }
}

fn serialport_err_to_io(e: serialport::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e)
}

/// Opens and configures the serial port the way the UPDI handshake expects:
/// even parity, two stop bits, a short per-call read timeout, DTR deasserted.
pub fn open(port_name: &str, baud_rate: u32) -> Result<Box<dyn serialport::SerialPort>, serialport::Error> {
    let mut port = serialport::new(port_name, baud_rate)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::Even)
        .stop_bits(serialport::StopBits::Two)
        .timeout(Duration::from_secs(1))
        .open()?;
    port.write_data_terminal_ready(false)?;
    Ok(port)
}

/// An in-memory stand-in for a real serial port, for driver tests and for
/// other crates in this workspace that need a UPDI bus double (exposed
/// outside this crate via the `mock` feature, since `ocd`'s own tests need
/// it too).
#[cfg(any(test, feature = "mock"))]
pub mod mock {
    use super::*;
    use std::collections::VecDeque;

    /// A fake UPDI bus: whatever is written is recorded, and a pre-seeded
    /// queue of responses is handed back on each `read`.
    #[derive(Default)]
    pub struct MockPort {
        pub written: Vec<u8>,
        pub to_read: VecDeque<u8>,
        pub breaks_sent: Vec<Duration>,
        pub dtr_history: Vec<bool>,
        pub clears: usize,
    }

    impl MockPort {
        pub fn with_responses(bytes: &[u8]) -> Self {
            MockPort {
                to_read: bytes.iter().copied().collect(),
                ..Default::default()
            }
        }

        pub fn push_responses(&mut self, bytes: &[u8]) {
            self.to_read.extend(bytes.iter().copied());
        }
    }

    impl Read for MockPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.to_read.is_empty() {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "mock timeout"));
            }
            let mut n = 0;
            while n < buf.len() {
                match self.to_read.pop_front() {
                    Some(b) => {
                        buf[n] = b;
                        n += 1;
                    }
                    None => break,
                }
            }
            Ok(n)
        }
    }

    impl Write for MockPort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl UpdiPort for MockPort {
        fn set_dtr(&mut self, level: bool) -> io::Result<()> {
            self.dtr_history.push(level);
            Ok(())
        }

        fn send_break(&mut self, duration: Duration) -> io::Result<()> {
            self.breaks_sent.push(duration);
            Ok(())
        }

        fn clear_input_buffer(&mut self) -> io::Result<()> {
            // The canned queue represents traffic the target will still
            // send, not garbage already sitting in the buffer, so clearing
            // it here would eat responses the test hasn't consumed yet.
            self.clears += 1;
            Ok(())
        }
    }
}
