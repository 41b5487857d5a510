// MASSBUS server: presents emulated RP/RM disks and TU78 tapes, backed by
// container files, to a historical host connected through an FPGA bridge.
mod bridge;
mod bus;
mod drive_type;
mod drives;
mod image;
mod massbus;
mod operator;

#[cfg(test)]
mod tests;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{error, info, warn};

use bridge::BridgeSet;
use bus::BusSet;
use operator::{Operator, Outcome};

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut offline = false;
    let mut startup: Option<PathBuf> = None;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--offline" => offline = true,
            other if startup.is_none() && !other.starts_with('-') => {
                startup = Some(PathBuf::from(other))
            }
            other => {
                eprintln!("usage: mbserver [--offline] [startup-command-file]");
                error!("unexpected argument '{}'", other);
                return 1;
            }
        }
    }

    let bridges = if offline {
        info!("offline mode, skipping bridge probe");
        BridgeSet::empty()
    } else {
        BridgeSet::enumerate()
    };
    let mut buses = BusSet::new();

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let flag = Arc::clone(&interrupted);
        if let Err(err) = ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)) {
            warn!("interrupt handler not installed: {}", err);
        }
    }

    let mut exited = false;
    {
        let mut operator = Operator::new(&bridges, &mut buses);

        if let Some(path) = &startup {
            match std::fs::read_to_string(path) {
                Ok(script) => {
                    for line in script.lines() {
                        if matches!(operator.execute(line), Outcome::Exit) {
                            exited = true;
                            break;
                        }
                    }
                }
                Err(err) => {
                    error!("cannot read {}: {}", path.display(), err);
                    return 1;
                }
            }
        }

        let stdin = io::stdin();
        while !exited && !interrupted.load(Ordering::SeqCst) {
            print!("mbs> ");
            let _ = io::stdout().flush();
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {
                    if matches!(operator.execute(&line), Outcome::Exit) {
                        break;
                    }
                }
                Err(err) => {
                    error!("operator input failed: {}", err);
                    break;
                }
            }
        }
    }

    // Shutdown order matters: the operator surface is already quiet, now
    // stop and join every service thread, tear the buses down (detaching
    // drives), and let the bridges close as their last references drop.
    buses.shutdown();
    info!("server exiting");
    0
}
