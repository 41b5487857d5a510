// Operator command surface
//
// Line-oriented verbs that drive the core: bus creation, drive
// configuration, image attachment, status display. Mutating verbs go
// through Bus methods and therefore run under the per-bus gate; show verbs
// print a snapshot that is not atomic across buses.
use std::path::Path;
use std::sync::Arc;

use log::info;

use crate::bridge::{Bridge, BridgeFamily, BridgeSet};
use crate::bus::{Bus, BusSet};
use crate::drive_type::{self, Packing};
use crate::drives::DriveUnit;
use crate::image::{DiskImage, TapeImage};

pub enum Outcome {
    Continue,
    Exit,
}

#[derive(Default)]
struct Modifiers {
    serial: Option<u16>,
    alias: Option<String>,
    online: Option<bool>,
    write: Option<bool>,
    bits18: Option<bool>,
    format: Option<String>,
    port: Option<String>,
    share: Option<String>,
    octal: Option<bool>,
    count: Option<u32>,
    clock: Option<u8>,
    delay: Option<u8>,
    force: bool,
    configuration: Option<String>,
}

pub struct Operator<'a> {
    bridges: &'a BridgeSet,
    buses: &'a mut BusSet,
    octal: bool,
}

impl<'a> Operator<'a> {
    pub fn new(bridges: &'a BridgeSet, buses: &'a mut BusSet) -> Self {
        Self {
            bridges,
            buses,
            octal: true,
        }
    }

    /// Execute one operator line. Errors are reported to the console and
    /// leave configuration untouched.
    pub fn execute(&mut self, line: &str) -> Outcome {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Outcome::Continue;
        }
        let mut words = line.split_whitespace();
        let verb = words.next().unwrap_or("").to_ascii_lowercase();
        let rest: Vec<&str> = words.collect();

        let result = match verb.as_str() {
            "create-bus" | "create" => self.create_bus(&rest),
            "connect" => self.connect(&rest),
            "disconnect" => self.disconnect(&rest),
            "attach" => self.attach(&rest),
            "detach" => self.detach(&rest),
            "set" => self.set(&rest),
            "show" => self.show(&rest),
            "show-bridge" => self.show_bridge(),
            "show-all" => self.show_all(),
            "rewind" => self.rewind(&rest),
            "help" | "?" => {
                print_help();
                Ok(())
            }
            "exit" | "quit" => return Outcome::Exit,
            other => Err(format!("unknown command '{}'; try 'help'", other)),
        };
        if let Err(message) = result {
            println!("?{}", message);
        }
        Outcome::Continue
    }

    fn create_bus(&mut self, args: &[&str]) -> Result<(), String> {
        let (positional, mods) = parse_modifiers(args)?;
        let [name, target] = positional[..] else {
            return Err("usage: create-bus <letter> <disk|tape|network|bridge-index> [force]".into());
        };
        let name = parse_bus_name(name)?;
        if self.buses.find(name).is_some() {
            return Err(format!("bus {} already exists", name));
        }

        let bridge = match target.parse::<usize>() {
            Ok(index) => {
                if mods.configuration.is_some() {
                    return Err("bitstream loading is not supported on this server".into());
                }
                let node = self
                    .bridges
                    .node(index)
                    .ok_or_else(|| format!("no bridge {}", index))?;
                Bridge::open(node, mods.force).map_err(|e| e.to_string())?
            }
            Err(_) => {
                let family = parse_family(target)?;
                Bridge::offline(family)
            }
        };
        if !bridge.is_offline() && !bridge.link_up() {
            println!("bus {}: MASSBUS cable is not connected", name);
        }

        let bus = Bus::new(name, Arc::new(bridge)).map_err(|e| e.to_string())?;
        bus.begin_service();
        self.buses.add(bus);
        println!("bus {} created", name);
        Ok(())
    }

    fn connect(&mut self, args: &[&str]) -> Result<(), String> {
        let (positional, mods) = parse_modifiers(args)?;
        let [unit_spec, type_name] = positional[..] else {
            return Err("usage: connect <bus><unit> <type> [serial=n] [alias=name]".into());
        };
        let (bus, unit) = self.resolve_new_unit(unit_spec)?;
        let dtype = drive_type::lookup(type_name)
            .ok_or_else(|| format!("unknown drive type '{}'", type_name))?;
        bus.connect(
            unit,
            dtype,
            mods.serial.unwrap_or(1),
            mods.alias.as_deref().unwrap_or(""),
        )
        .map_err(|e| e.to_string())
    }

    fn disconnect(&mut self, args: &[&str]) -> Result<(), String> {
        let (bus, unit) = self.resolve_unit(args.first().copied().unwrap_or(""))?;
        bus.disconnect(unit).map_err(|e| e.to_string())
    }

    fn attach(&mut self, args: &[&str]) -> Result<(), String> {
        let (positional, mods) = parse_modifiers(args)?;
        let [unit_spec, path] = positional[..] else {
            return Err("usage: attach <unit> <image-path> [write|nowrite] [bits=16|18]".into());
        };
        if let Some(format) = &mods.format {
            if !format.eq_ignore_ascii_case("simh") {
                return Err(format!("unsupported image format '{}'", format));
            }
        }
        let (bus, unit) = self.resolve_unit(unit_spec)?;
        let read_only = !mods.write.unwrap_or(true);
        let path = Path::new(path);

        if let Some(bits18) = mods.bits18 {
            bus.with_drive(unit, |d| {
                if let DriveUnit::Disk(disk) = d {
                    disk.set_packing(bits18);
                }
            });
        }

        // Learn what kind of image the slot needs before touching the
        // filesystem.
        let plan = bus
            .with_drive(unit, |d| match d {
                DriveUnit::Disk(disk) => {
                    let packing = if disk.packing18() { Packing::Bits18 } else { Packing::Bits16 };
                    (true, disk.common.dtype.capacity_bytes(packing))
                }
                DriveUnit::Tape(_) => (false, 0),
            })
            .ok_or_else(|| format!("unit {} is empty", unit_spec))?;

        match plan {
            (true, capacity) => {
                let image = if path.exists() {
                    DiskImage::open(path, read_only)
                } else if read_only {
                    return Err(format!("{} does not exist", path.display()));
                } else {
                    DiskImage::create(path, capacity)
                }
                .map_err(|e| e.to_string())?;
                bus.with_drive(unit, |d| {
                    if let DriveUnit::Disk(disk) = d {
                        disk.attach_image(image);
                    }
                });
            }
            (false, _) => {
                let image = TapeImage::open(path, read_only).map_err(|e| e.to_string())?;
                bus.with_drive(unit, |d| {
                    if let DriveUnit::Tape(tape) = d {
                        tape.attach_image(image);
                    }
                });
            }
        }
        info!("{}: attached {}", unit_spec, path.display());
        Ok(())
    }

    fn detach(&mut self, args: &[&str]) -> Result<(), String> {
        let (bus, unit) = self.resolve_unit(args.first().copied().unwrap_or(""))?;
        bus.with_drive(unit, |d| d.detach());
        Ok(())
    }

    fn set(&mut self, args: &[&str]) -> Result<(), String> {
        let (positional, mods) = parse_modifiers(args)?;
        let [target] = positional[..] else {
            return Err("usage: set <bus|unit> <modifiers>".into());
        };
        if let Some(octal) = mods.octal {
            self.octal = octal;
        }

        // A bare bus letter takes the bridge trims; anything else names a
        // drive.
        if target.len() == 1 {
            let bus = self
                .buses
                .find(parse_bus_name(target)?)
                .ok_or_else(|| format!("no bus {}", target))?;
            if let Some(divisor) = mods.clock {
                bus.bridge().set_data_clock(divisor);
            }
            if let Some(delay) = mods.delay {
                bus.bridge().set_transfer_delay(delay);
            }
            return Ok(());
        }

        let (bus, unit) = self.resolve_unit(target)?;
        if mods.port.is_some() || mods.share.is_some() {
            println!("dual-port operation is not implemented; port/share ignored");
        }
        if mods.count.is_some() {
            println!("count applies to host commands only; ignored");
        }
        bus.with_drive(unit, |d| -> Result<(), String> {
            if let Some(serial) = mods.serial {
                d.set_serial(serial);
            }
            if let Some(alias) = &mods.alias {
                d.common_mut().alias = alias.clone();
            }
            if let Some(write) = mods.write {
                d.set_read_only(!write);
            }
            if let Some(bits18) = mods.bits18 {
                match d {
                    DriveUnit::Disk(disk) => disk.set_packing(bits18),
                    DriveUnit::Tape(_) => return Err("bits apply to disks only".into()),
                }
            }
            if let Some(online) = mods.online {
                if online {
                    if !d.go_online() {
                        return Err("no image attached".into());
                    }
                } else {
                    d.go_offline();
                }
            }
            Ok(())
        })
        .ok_or_else(|| format!("unit {} is empty", target))?
    }

    fn show(&mut self, args: &[&str]) -> Result<(), String> {
        let (bus, unit) = self.resolve_unit(args.first().copied().unwrap_or(""))?;
        for (slot, line) in bus.describe_units() {
            if slot == unit {
                println!("{}{} {}", bus.name(), slot, line);
            }
        }
        Ok(())
    }

    fn show_bridge(&mut self) -> Result<(), String> {
        for (index, node) in self.bridges.nodes().iter().enumerate() {
            println!("bridge {}: {}", index, node.display());
        }
        for bus in self.buses.iter() {
            let bridge = bus.bridge();
            let (cbus, dbus) = bridge.parity_errors();
            println!(
                "bus {}: {} ({} family, vhdl {}), attached {}, link {}, parity {}/{}, recv {}",
                bus.name(),
                bridge.name(),
                bus.family(),
                self.radix16(bridge.vhdl_version()),
                self.radix8(bridge.attached() as u16),
                if bridge.link_up() { "up" } else { "down" },
                cbus,
                dbus,
                bridge.recv_count(),
            );
        }
        Ok(())
    }

    fn show_all(&mut self) -> Result<(), String> {
        if self.buses.is_empty() {
            println!("no buses configured");
        }
        for bus in self.buses.iter() {
            println!("bus {} ({} family)", bus.name(), bus.family());
            for (slot, line) in bus.describe_units() {
                println!("  {}{} {}", bus.name(), slot, line);
            }
        }
        Ok(())
    }

    fn rewind(&mut self, args: &[&str]) -> Result<(), String> {
        let (bus, unit) = self.resolve_unit(args.first().copied().unwrap_or(""))?;
        bus.with_drive(unit, |d| match d {
            DriveUnit::Tape(tape) => {
                tape.rewind();
                Ok(())
            }
            DriveUnit::Disk(_) => Err("rewind applies to tapes only".to_string()),
        })
        .ok_or_else(|| "unit is empty".to_string())?
    }

    // "<letter><digit>" or an alias known to some bus.
    fn resolve_unit(&self, spec: &str) -> Result<(Arc<Bus>, usize), String> {
        if spec.is_empty() {
            return Err("a unit name is required".into());
        }
        if let Ok((bus, unit)) = self.parse_unit_spec(spec) {
            return Ok((bus, unit));
        }
        for bus in self.buses.iter() {
            if let Some(unit) = bus.find_by_alias(spec) {
                return Ok((Arc::clone(bus), unit));
            }
        }
        Err(format!("no unit or alias '{}'", spec))
    }

    // Like resolve_unit, but the slot is allowed (expected) to be empty.
    fn resolve_new_unit(&self, spec: &str) -> Result<(Arc<Bus>, usize), String> {
        self.parse_unit_spec(spec)
    }

    fn parse_unit_spec(&self, spec: &str) -> Result<(Arc<Bus>, usize), String> {
        let mut chars = spec.chars();
        let (Some(letter), Some(digit), None) = (chars.next(), chars.next(), chars.next()) else {
            return Err(format!("'{}' is not a <bus><unit> name", spec));
        };
        let unit = digit
            .to_digit(8)
            .ok_or_else(|| format!("unit digit must be 0-7, got '{}'", digit))? as usize;
        let bus = self
            .buses
            .find(parse_bus_name(&letter.to_string())?)
            .ok_or_else(|| format!("no bus {}", letter))?;
        Ok((Arc::clone(bus), unit))
    }

    fn radix16(&self, value: u16) -> String {
        if self.octal {
            format!("{:#o}", value)
        } else {
            format!("{:#x}", value)
        }
    }

    fn radix8(&self, value: u16) -> String {
        self.radix16(value)
    }
}

fn parse_bus_name(word: &str) -> Result<char, String> {
    let mut chars = word.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii_alphabetic() => Ok(c.to_ascii_uppercase()),
        _ => Err(format!("'{}' is not a bus letter", word)),
    }
}

fn parse_family(word: &str) -> Result<BridgeFamily, String> {
    match word.to_ascii_lowercase().as_str() {
        "disk" => Ok(BridgeFamily::Disk),
        "tape" => Ok(BridgeFamily::Tape),
        "network" => Ok(BridgeFamily::Network),
        other => Err(format!("'{}' is not a bus family", other)),
    }
}

// Split arguments into positional words and the recognised modifier set.
// Anything else is an error, reported before any state changes.
fn parse_modifiers<'t>(args: &[&'t str]) -> Result<(Vec<&'t str>, Modifiers), String> {
    let mut positional = Vec::new();
    let mut mods = Modifiers::default();
    for &arg in args {
        let lower = arg.to_ascii_lowercase();
        match lower.as_str() {
            "online" => mods.online = Some(true),
            "offline" => mods.online = Some(false),
            "write" => mods.write = Some(true),
            "nowrite" => mods.write = Some(false),
            "octal" => mods.octal = Some(true),
            "hex" => mods.octal = Some(false),
            "force" => mods.force = true,
            _ => match lower.split_once('=') {
                Some(("serial", v)) => {
                    mods.serial = Some(v.parse().map_err(|_| format!("bad serial '{}'", v))?)
                }
                Some(("alias", _)) => {
                    // Preserve the operator's case.
                    mods.alias = Some(arg.split_once('=').map(|(_, v)| v).unwrap_or("").to_string())
                }
                Some(("bits", v)) => {
                    mods.bits18 = Some(match v {
                        "16" => false,
                        "18" => true,
                        _ => return Err(format!("bits must be 16 or 18, got '{}'", v)),
                    })
                }
                Some(("format", v)) => mods.format = Some(v.to_string()),
                Some(("port", v)) => {
                    if !matches!(v, "a" | "b" | "both") {
                        return Err(format!("port must be A, B or both, got '{}'", v));
                    }
                    mods.port = Some(v.to_string())
                }
                Some(("share", v)) => {
                    if !matches!(v, "none" | "read" | "write") {
                        return Err(format!("share must be none, read or write, got '{}'", v));
                    }
                    mods.share = Some(v.to_string())
                }
                Some(("count", v)) => {
                    mods.count = Some(v.parse().map_err(|_| format!("bad count '{}'", v))?)
                }
                Some(("clock", v)) => {
                    mods.clock = Some(v.parse().map_err(|_| format!("bad clock '{}'", v))?)
                }
                Some(("delay", v)) => {
                    mods.delay = Some(v.parse().map_err(|_| format!("bad delay '{}'", v))?)
                }
                Some(("configuration", v)) => mods.configuration = Some(v.to_string()),
                _ => positional.push(arg),
            },
        }
    }
    Ok((positional, mods))
}

fn print_help() {
    println!("commands:");
    println!("  create-bus <letter> <disk|tape|network|bridge-index> [force]");
    println!("  connect <bus><unit> <type> [serial=n] [alias=name]");
    println!("  disconnect <unit>");
    println!("  attach <unit> <image-path> [write|nowrite] [bits=16|18] [format=simh]");
    println!("  detach <unit>");
    println!("  set <bus|unit> [serial=n] [alias=name] [online|offline] [write|nowrite]");
    println!("      [bits=16|18] [clock=n] [delay=n] [octal|hex]");
    println!("  show <unit> | show-bridge | show-all");
    println!("  rewind <unit>");
    println!("  exit");
}
