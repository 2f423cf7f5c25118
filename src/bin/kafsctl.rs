use clap::{Parser, Subcommand};
use libkafs::cell;
use libkafs::error::KafsError;
use libkafs::kafs::{AfsInterface, LinuxAfs};
use std::io;
use std::path::PathBuf;
use tracing::error;

#[derive(Debug, clap::Parser)]
#[clap(about = "Poke the AFS cache manager and this session's tokens")]
struct OptParser {
    #[clap(subcommand)]
    command: Opt,
}

#[derive(Debug, Subcommand)]
enum Opt {
    /// Report whether an AFS client is running on this host.
    Probe,
    /// Print the cell serving a path.
    Cell { path: PathBuf },
    /// Print the cell this workstation belongs to.
    WsCell,
    /// Move this process into a fresh process authentication group.
    Setpag,
    /// Discard every token held by the current authentication group.
    Unlog,
}

fn to_io(err: KafsError) -> io::Error {
    error!(?err);
    io::Error::new(io::ErrorKind::Other, "afs request failed")
}

fn main() -> io::Result<()> {
    let opt = OptParser::parse();

    tracing_subscriber::fmt::init();

    let afs = LinuxAfs::new();
    match opt.command {
        Opt::Probe => {
            if afs.has_afs() {
                println!("afs: running");
            } else {
                println!("afs: not running");
            }
            Ok(())
        }
        Opt::Cell { path } => {
            let cell = cell::cell_of_file(&afs, &path).map_err(to_io)?;
            println!("{cell}");
            Ok(())
        }
        Opt::WsCell => {
            let cell = afs.ws_cell().map_err(to_io)?;
            println!("{cell}");
            Ok(())
        }
        Opt::Setpag => {
            afs.setpag().map_err(to_io)?;
            println!("entered a new pag");
            Ok(())
        }
        Opt::Unlog => {
            afs.unlog().map_err(to_io)?;
            println!("tokens discarded");
            Ok(())
        }
    }
}
