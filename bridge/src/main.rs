mod cli;
mod error;
mod identify;
mod server;

use cli::Opt;
use ocd::OcdDebugger;
use server::RspServer;
use structopt::StructOpt;
use updi::UpdiClient;

fn main() {
    let opt = Opt::from_args();

    let level = if opt.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if let Err(e) = run(&opt) {
        log::error!("{e}");
        if let error::BridgeError::Updi(updi_err) = &e {
            if let Some(instruction) = updi_err.instruction() {
                log::error!("failing instruction: {instruction}");
            }
        }
        std::process::exit(1);
    }
}

fn run(opt: &Opt) -> error::Result<()> {
    let Some(devinfo) = devicetable::lookup(&opt.part) else {
        return Err(error::BridgeError::UnknownPart(opt.part.clone()));
    };

    identify::run(&opt.port, opt.bps, &devinfo)?;

    let updi = UpdiClient::open(&opt.port, opt.bps)?;
    let ocd = OcdDebugger::new(updi, devinfo.flash_offset);

    let server = RspServer::bind(opt.rsp_port)?;
    server.serve(ocd)
}
