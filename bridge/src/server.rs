//! The GDB Remote Serial Protocol server: TCP accept, packet dispatch, and
//! the continue/interrupt polling loop. Everything here is synchronous and
//! single-threaded, serving exactly one client connection per invocation.

use log::{debug, error, info};
use ocd::{BreakpointError, OcdDebugger, Traps};
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::time::Duration;
use updi::UpdiPort;

use crate::error::{BridgeError, Result};

/// Response codes the dispatcher hands back verbatim.
mod reply {
    pub const OK: &str = "OK";
    pub const SIGTRAP: &str = "S05";
    pub const SIGINT: &str = "S02";
    pub const E_GENERAL: &str = "E00";
    pub const E_PARSE: &str = "E01";
    pub const E_RANGE: &str = "E02";
    pub const E_HWBP_EXHAUSTED: &str = "E04";
    pub const E_NO_SUCH_BP: &str = "E05";
}

/// Owns the listening socket; constructed before the OCD attach so a
/// misconfigured `--rsp-port` fails fast.
pub struct RspServer {
    listener: TcpListener,
}

impl RspServer {
    pub fn bind(rsp_port: u16) -> Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", rsp_port))?;
        Ok(RspServer { listener })
    }

    /// Attaches the OCD layer, accepts exactly one client, and serves it
    /// until disconnect, `D`, or a fatal UPDI/IO failure. The OCD is
    /// detached on every exit path, fatal or not.
    pub fn serve<T: UpdiPort>(self, mut ocd: OcdDebugger<T>) -> Result<()> {
        ocd.attach()?;
        ocd.reset()?;
        ocd.set_traps(Traps::SWBP | Traps::HWBP)?;

        info!("listening on {}", self.listener.local_addr()?);
        let (mut stream, addr) = self.listener.accept()?;
        info!("debugger connected from {addr}");

        let result = session(&mut ocd, &mut stream);
        if let Err(e) = ocd.detach() {
            error!("error detaching UPDI after session: {e}");
        }
        result
    }
}

fn session<T: UpdiPort>(ocd: &mut OcdDebugger<T>, stream: &mut TcpStream) -> Result<()> {
    let mut parser = rsp::PacketParser::new();
    let mut buf = [0u8; 1024];
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            info!("debugger disconnected");
            return Ok(());
        }
        let data = &buf[..n];
        debug!("recv {n} B");

        if rsp::contains_interrupt(data) {
            stream.write_all(b"+")?;
            ocd.halt()?;
            ocd.poll_halted(None, None)?;
            send_packet(stream, reply::SIGINT)?;
        }

        for packet in parser.process_bytes(data) {
            stream.write_all(b"+")?;
            debug!("packet: {packet}");
            if dispatch(ocd, stream, &packet)? {
                return Ok(());
            }
        }
    }
}

fn send_packet(stream: &mut TcpStream, payload: &str) -> Result<()> {
    debug!("reply: {payload}");
    stream.write_all(&rsp::encode_packet(payload))?;
    Ok(())
}

/// Dispatches one decoded packet. Returns `Ok(true)` iff the server should
/// stop serving (a `D` detach request).
fn dispatch<T: UpdiPort>(ocd: &mut OcdDebugger<T>, stream: &mut TcpStream, packet: &str) -> Result<bool> {
    if packet.starts_with("qSupported") {
        send_packet(stream, "PacketSize=1024")?;
    } else if packet.starts_with("qSymbol") {
        send_packet(stream, reply::OK)?;
    } else if packet == "!" {
        send_packet(stream, reply::OK)?;
    } else if packet == "?" {
        send_packet(stream, reply::SIGTRAP)?;
    } else if packet.starts_with("qRcmd") {
        handle_monitor(ocd, stream, packet)?;
    } else if packet.starts_with("Z0") || packet.starts_with("z0") {
        send_packet(stream, reply::E_GENERAL)?;
    } else if let Some(rest) = packet.strip_prefix("Z1") {
        handle_set_breakpoint(ocd, stream, rest)?;
    } else if let Some(rest) = packet.strip_prefix("z1") {
        handle_clear_breakpoint(ocd, stream, rest)?;
    } else if packet.starts_with('s') {
        ocd.step()?;
        send_packet(stream, reply::SIGTRAP)?;
    } else if packet.starts_with('c') {
        do_continue(ocd, stream)?;
    } else if packet.starts_with('g') {
        handle_read_registers(ocd, stream)?;
    } else if let Some(rest) = packet.strip_prefix('G') {
        handle_write_registers(ocd, stream, rest)?;
    } else if let Some(rest) = packet.strip_prefix('m') {
        handle_read_memory(ocd, stream, rest)?;
    } else if let Some(rest) = packet.strip_prefix('M') {
        handle_write_memory(ocd, stream, rest)?;
    } else if packet.starts_with("vAttach") {
        send_packet(stream, reply::SIGTRAP)?;
    } else if packet.starts_with("vRun") || packet.starts_with('R') || packet.starts_with('r') {
        ocd.reset()?;
        send_packet(stream, reply::SIGTRAP)?;
    } else if packet.starts_with("vKill") {
        send_packet(stream, reply::OK)?;
    } else if packet.starts_with('T') || packet.starts_with('H') {
        send_packet(stream, reply::OK)?;
    } else if packet == "D" {
        send_packet(stream, reply::OK)?;
        return Ok(true);
    } else if packet == "k" {
        // intentionally silent: no flash-rewriting kill to perform, and
        // unlike `D` this does not end the session.
    } else {
        send_packet(stream, "")?;
    }
    Ok(false)
}

/// `c`: resume the CPU, then alternate polling the halt flag with
/// short-timeout reads for an async `0x03` interrupt.
fn do_continue<T: UpdiPort>(ocd: &mut OcdDebugger<T>, stream: &mut TcpStream) -> Result<()> {
    ocd.run()?;
    stream.set_read_timeout(Some(Duration::from_millis(10)))?;
    let outcome = continue_poll(ocd, stream);
    stream.set_read_timeout(None)?;
    outcome
}

fn continue_poll<T: UpdiPort>(ocd: &mut OcdDebugger<T>, stream: &mut TcpStream) -> Result<()> {
    let mut b = [0u8; 1];
    loop {
        if ocd.is_halted()? {
            return send_packet(stream, reply::SIGTRAP);
        }
        match stream.read(&mut b) {
            Ok(0) => return Ok(()),
            Ok(_) if b[0] == 0x03 => {
                stream.write_all(b"+")?;
                ocd.halt()?;
                ocd.poll_halted(None, None)?;
                return send_packet(stream, reply::SIGINT);
            }
            Ok(_) => continue,
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => continue,
            Err(e) => return Err(BridgeError::Io(e)),
        }
    }
}

fn handle_read_registers<T: UpdiPort>(ocd: &mut OcdDebugger<T>, stream: &mut TcpStream) -> Result<()> {
    let gprs = ocd.get_register_file()?;
    let sreg = ocd.get_sreg()?;
    let sp = ocd.get_sp()?;
    let byte_pc = ocd.get_pc()? << 1;

    let mut payload = hex_encode(&gprs);
    payload.push_str(&format!("{sreg:02x}"));
    payload.push_str(&format!("{:02x}{:02x}", sp & 0xFF, sp >> 8));
    payload.push_str(&format!(
        "{:02x}{:02x}{:02x}",
        byte_pc & 0xFF,
        (byte_pc >> 8) & 0xFF,
        (byte_pc >> 16) & 0xFF
    ));
    payload.push_str("00");
    send_packet(stream, &payload)
}

fn handle_write_registers<T: UpdiPort>(
    ocd: &mut OcdDebugger<T>,
    stream: &mut TcpStream,
    hex: &str,
) -> Result<()> {
    let Some(bytes) = hex_decode(hex) else {
        return send_packet(stream, reply::E_PARSE);
    };
    if bytes.len() < 39 {
        return send_packet(stream, reply::E_PARSE);
    }

    let mut gprs = [0u8; 32];
    gprs.copy_from_slice(&bytes[..32]);
    let sp = bytes[33] as u16 | ((bytes[34] as u16) << 8);
    let byte_pc = bytes[35] as u32 | ((bytes[36] as u32) << 8) | ((bytes[37] as u32) << 16);

    ocd.set_register_file(&gprs)?;
    ocd.set_sreg(bytes[32])?;
    ocd.set_sp(sp)?;
    ocd.set_pc(byte_pc >> 1)?;
    send_packet(stream, reply::OK)
}

fn handle_read_memory<T: UpdiPort>(ocd: &mut OcdDebugger<T>, stream: &mut TcpStream, args: &str) -> Result<()> {
    let Some((addr, len)) = parse_addr_len(args) else {
        return send_packet(stream, reply::E_PARSE);
    };
    let data = if addr < 0x200000 {
        ocd.read_code(addr, len)?
    } else if (0x800000..0x810000).contains(&addr) {
        ocd.read_data(addr - 0x800000, len)?
    } else {
        return send_packet(stream, reply::E_RANGE);
    };
    send_packet(stream, &hex_encode(&data))
}

fn handle_write_memory<T: UpdiPort>(ocd: &mut OcdDebugger<T>, stream: &mut TcpStream, args: &str) -> Result<()> {
    let Some((addr_len, hex)) = args.split_once(':') else {
        return send_packet(stream, reply::E_PARSE);
    };
    let Some((addr, _len)) = parse_addr_len(addr_len) else {
        return send_packet(stream, reply::E_PARSE);
    };
    let Some(data) = hex_decode(hex) else {
        return send_packet(stream, reply::E_PARSE);
    };
    if !(0x800000..0x810000).contains(&addr) {
        return send_packet(stream, reply::E_RANGE);
    }
    if ocd.write_data(addr - 0x800000, &data)? {
        send_packet(stream, reply::OK)
    } else {
        send_packet(stream, reply::E_RANGE)
    }
}

fn handle_set_breakpoint<T: UpdiPort>(ocd: &mut OcdDebugger<T>, stream: &mut TcpStream, args: &str) -> Result<()> {
    let Some(byte_addr) = parse_bp_addr(args) else {
        return send_packet(stream, reply::E_PARSE);
    };
    match ocd.arm_breakpoint(byte_addr >> 1)? {
        Ok(()) => send_packet(stream, reply::OK),
        Err(BreakpointError::OutOfSlots) => send_packet(stream, reply::E_HWBP_EXHAUSTED),
        Err(BreakpointError::NoSuchBreakpoint) => unreachable!("arm never returns NoSuchBreakpoint"),
    }
}

fn handle_clear_breakpoint<T: UpdiPort>(ocd: &mut OcdDebugger<T>, stream: &mut TcpStream, args: &str) -> Result<()> {
    let Some(byte_addr) = parse_bp_addr(args) else {
        return send_packet(stream, reply::E_PARSE);
    };
    match ocd.disarm_breakpoint(byte_addr >> 1)? {
        Ok(()) => send_packet(stream, reply::OK),
        Err(BreakpointError::NoSuchBreakpoint) => send_packet(stream, reply::E_NO_SUCH_BP),
        Err(BreakpointError::OutOfSlots) => unreachable!("disarm never returns OutOfSlots"),
    }
}

/// Monitor commands reached through `qRcmd,<hex>`.
fn handle_monitor<T: UpdiPort>(ocd: &mut OcdDebugger<T>, stream: &mut TcpStream, packet: &str) -> Result<()> {
    let hex = packet.strip_prefix("qRcmd,").or_else(|| packet.strip_prefix("qRcmd:")).unwrap_or("");
    let Some(cmd_bytes) = hex_decode(hex) else {
        return send_packet(stream, "");
    };
    let cmd = String::from_utf8_lossy(&cmd_bytes);
    let cmd = cmd.trim();

    match cmd {
        "reset" => {
            ocd.reset()?;
            send_packet(stream, reply::OK)
        }
        "step" => {
            ocd.enable_traps(Traps::STEP)?;
            ocd.run()?;
            send_packet(stream, reply::OK)
        }
        _ => {
            let Some((name, state)) = cmd.split_once(' ') else {
                return send_packet(stream, "");
            };
            let trap = match name {
                "inttrap" => Traps::INT,
                "jmptrap" => Traps::JMP,
                "unk1" => Traps::UNKNOWN1,
                "unk2" => Traps::UNKNOWN2,
                _ => return send_packet(stream, ""),
            };
            match state {
                "on" => ocd.enable_traps(trap)?,
                "off" => ocd.disable_traps(trap)?,
                _ => return send_packet(stream, ""),
            }
            send_packet(stream, &hex_encode(format!("{name}: {state}\n").as_bytes()))
        }
    }
}

fn parse_addr_len(s: &str) -> Option<(u32, u32)> {
    let (addr, len) = s.split_once(',')?;
    Some((
        u32::from_str_radix(addr, 16).ok()?,
        u32::from_str_radix(len, 16).ok()?,
    ))
}

fn parse_bp_addr(s: &str) -> Option<u32> {
    let rest = s.strip_prefix(',')?;
    let addr = rest.split(',').next()?;
    u32::from_str_radix(addr, 16).ok()
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(s.get(i..i + 2)?, 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addr_len_parses_hex_fields() {
        assert_eq!(parse_addr_len("200000,10"), Some((0x200000, 0x10)));
        assert_eq!(parse_addr_len("not-hex,10"), None);
        assert_eq!(parse_addr_len("10"), None);
    }

    #[test]
    fn bp_addr_ignores_trailing_kind_field() {
        assert_eq!(parse_bp_addr(",1234,2"), Some(0x1234));
        assert_eq!(parse_bp_addr("1234,2"), None);
    }

    #[test]
    fn hex_round_trip() {
        let bytes = [0x00, 0x01, 0x7f, 0xff];
        assert_eq!(hex_decode(&hex_encode(&bytes)).unwrap(), bytes);
    }

    #[test]
    fn hex_decode_rejects_odd_length() {
        assert!(hex_decode("abc").is_none());
    }
}
