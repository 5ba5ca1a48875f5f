use structopt::StructOpt;

/// AVR UPDI remote debug bridge: speaks GDB Remote Serial Protocol on a TCP
/// socket, drives the target over a SerialUPDI adapter.
#[derive(StructOpt, Debug)]
#[structopt(name = "updi-gdb-bridge")]
pub struct Opt {
    /// MCU part name, e.g. `avr128da48`, `attiny1624`, `atmega4809`.
    #[structopt(short = "p", long)]
    pub part: String,

    /// Serial port the SerialUPDI adapter is attached to, e.g. `/dev/ttyS1`
    /// or `COM5`.
    #[structopt(short = "P", long)]
    pub port: String,

    /// Baud rate for UPDI communication.
    #[structopt(short = "b", long, default_value = "115200")]
    pub bps: u32,

    /// TCP port to accept the GDB RSP connection on.
    #[structopt(short = "r", long)]
    pub rsp_port: u16,

    /// Raise the log level to DEBUG, including per-instruction UPDI traffic.
    #[structopt(short = "v", long)]
    pub verbose: bool,
}
