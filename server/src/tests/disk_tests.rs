// Disk Drive Command Tests
#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Arc;

    use tempfile::{tempdir, TempDir};

    use crate::bridge::window::geometry_word;
    use crate::bridge::{Bridge, BridgeFamily};
    use crate::bus::Bus;
    use crate::drive_type::{self, Packing};
    use crate::drives::DriveUnit;
    use crate::image::DiskImage;
    use crate::massbus::{
        mk_command, FN_READ, FN_WRITE, OF_FMT18, RPCS1, RPDA, RPDC, RPDS, RPDT, RPOF, RPSN, RpDs,
    };

    fn disk_bus() -> (Arc<Bus>, Arc<Bridge>, TempDir) {
        let bridge = Arc::new(Bridge::offline(BridgeFamily::Disk));
        let bus = Bus::new('A', Arc::clone(&bridge)).unwrap();
        (bus, bridge, tempdir().unwrap())
    }

    fn seek_to(bridge: &Bridge, dtype: &drive_type::DriveType, lba: u32, packing: Packing) {
        let (c, h, s) = dtype.from_lba(lba, packing).unwrap();
        bridge.write_reg(0, RPDC, c as u16);
        bridge.write_reg(0, RPDA, ((h as u16) << 8) | s as u16);
    }

    #[test]
    fn test_connect_publishes_presence_and_registers() {
        let (bus, bridge, _dir) = disk_bus();
        let rp06 = drive_type::lookup("RP06").unwrap();
        bus.connect(0, rp06, 1234, "packa").unwrap();

        assert_eq!(bus.units_connected(), 0b0000_0001);
        assert_eq!(bridge.attached(), 0b0000_0001);
        assert_eq!(bus.units_online(), 0);

        let ds = RpDs::from_bits_truncate(bridge.read_reg(0, RPDS));
        assert!(ds.contains(RpDs::DRY));
        assert!(!ds.contains(RpDs::MOL));
        assert_eq!(bridge.read_reg(0, RPDT), 0o20022);
        assert_eq!(bridge.read_reg(0, RPSN), 1234);
        assert_eq!(bridge.geometry(0), geometry_word(815, 19, 22));
        assert_eq!(bus.find_by_alias("PACKA"), Some(0));

        bus.disconnect(0).unwrap();
        assert_eq!(bridge.attached(), 0);
    }

    #[test]
    fn test_incompatible_family_is_refused_at_connect() {
        let (bus, _bridge, _dir) = disk_bus();
        let tu78 = drive_type::lookup("TU78").unwrap();
        assert!(bus.connect(0, tu78, 1, "").is_err());
        assert_eq!(bus.units_connected(), 0);
    }

    #[test]
    fn test_sector_round_trip_16_bit() {
        let (bus, bridge, dir) = disk_bus();
        let rp06 = drive_type::lookup("RP06").unwrap();
        bus.connect(0, rp06, 1, "").unwrap();

        let path = dir.path().join("s1.dsk");
        let image = DiskImage::create(&path, 1024 * 512).unwrap();
        bus.with_drive(0, |d| match d {
            DriveUnit::Disk(disk) => disk.attach_image(image),
            DriveUnit::Tape(_) => unreachable!(),
        });
        assert!(bus.with_drive(0, |d| d.go_online()).unwrap());
        assert_eq!(bus.units_online(), 0b0000_0001);

        let data: Vec<u32> = (0..256)
            .map(|i| if i % 2 == 0 { 0xABCD } else { 0x1234 })
            .collect();
        seek_to(&bridge, rp06, 42, Packing::Bits16);
        bridge.host_push_data(&data);
        bus.do_command(mk_command(0, RPCS1, FN_WRITE));

        let raw = fs::read(&path).unwrap();
        let base = 42 * 512;
        assert_eq!(&raw[base..base + 8], &[0xCD, 0xAB, 0x34, 0x12, 0xCD, 0xAB, 0x34, 0x12]);

        bus.do_command(mk_command(0, RPCS1, FN_READ));
        let sent = bridge.host_take_data();
        assert_eq!(sent, data);
        assert_eq!(bridge.host_last_send_count(), 256);
        assert_eq!(bus.units_online(), 0b0000_0001);
    }

    #[test]
    fn test_sector_round_trip_18_bit() {
        let (bus, bridge, dir) = disk_bus();
        let rp06 = drive_type::lookup("RP06").unwrap();
        bus.connect(0, rp06, 1, "").unwrap();

        bus.with_drive(0, |d| match d {
            DriveUnit::Disk(disk) => disk.set_packing(true),
            DriveUnit::Tape(_) => unreachable!(),
        });
        assert_eq!(bridge.read_reg(0, RPOF) & OF_FMT18, OF_FMT18);
        // Sectors per track shrink from 22 to 20 in 18-bit packing.
        assert_eq!(bridge.geometry(0), geometry_word(815, 19, 20));

        let path = dir.path().join("s2.dsk");
        let image = DiskImage::create(&path, 64 * 1024).unwrap();
        bus.with_drive(0, |d| match d {
            DriveUnit::Disk(disk) => disk.attach_image(image),
            DriveUnit::Tape(_) => unreachable!(),
        });
        assert!(bus.with_drive(0, |d| d.go_online()).unwrap());

        let data: Vec<u32> = (0..256)
            .map(|i| if i % 2 == 0 { 0o123456 } else { 0o654321 })
            .collect();
        seek_to(&bridge, rp06, 5, Packing::Bits18);
        bridge.host_push_data(&data);
        bus.do_command(mk_command(0, RPCS1, FN_WRITE));

        let raw = fs::read(&path).unwrap();
        let expected: u64 = (0o123456 << 18) | 0o654321;
        for quad in raw[5 * 1024..6 * 1024].chunks_exact(8) {
            assert_eq!(u64::from_le_bytes(quad.try_into().unwrap()), expected);
        }

        bus.do_command(mk_command(0, RPCS1, FN_READ));
        assert_eq!(bridge.host_take_data(), data);
    }

    #[test]
    fn test_write_to_read_only_pack_drops_drive_offline() {
        let (bus, bridge, dir) = disk_bus();
        let rp06 = drive_type::lookup("RP06").unwrap();
        bus.connect(0, rp06, 1, "").unwrap();

        let path = dir.path().join("ro.dsk");
        drop(DiskImage::create(&path, 64 * 512).unwrap());
        let image = DiskImage::open(&path, true).unwrap();
        bus.with_drive(0, |d| match d {
            DriveUnit::Disk(disk) => disk.attach_image(image),
            DriveUnit::Tape(_) => unreachable!(),
        });
        assert!(bus.with_drive(0, |d| d.go_online()).unwrap());
        assert!(RpDs::from_bits_truncate(bridge.read_reg(0, RPDS)).contains(RpDs::WRL));

        seek_to(&bridge, rp06, 7, Packing::Bits16);
        bridge.host_push_data(&vec![0x5555u32; 256]);
        bus.do_command(mk_command(0, RPCS1, FN_WRITE));

        assert_eq!(bus.units_online(), 0);
        assert!(!RpDs::from_bits_truncate(bridge.read_reg(0, RPDS)).contains(RpDs::MOL));
        // The image never changed.
        assert!(fs::read(&path).unwrap().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_address_outside_geometry_drops_drive_offline() {
        let (bus, bridge, dir) = disk_bus();
        let rp06 = drive_type::lookup("RP06").unwrap();
        bus.connect(0, rp06, 1, "").unwrap();
        let image = DiskImage::create(&dir.path().join("x.dsk"), 64 * 512).unwrap();
        bus.with_drive(0, |d| match d {
            DriveUnit::Disk(disk) => disk.attach_image(image),
            DriveUnit::Tape(_) => unreachable!(),
        });
        assert!(bus.with_drive(0, |d| d.go_online()).unwrap());

        bridge.write_reg(0, RPDC, 0o77777);
        bridge.write_reg(0, RPDA, 0);
        bus.do_command(mk_command(0, RPCS1, FN_READ));
        assert_eq!(bus.units_online(), 0);
        assert!(bridge.host_take_data().is_empty());
    }

    #[test]
    fn test_commands_for_offline_or_empty_units_are_dropped() {
        let (bus, bridge, _dir) = disk_bus();
        let rp06 = drive_type::lookup("RP06").unwrap();
        bus.connect(0, rp06, 1, "").unwrap();

        // Connected but spun down: dropped before the handler runs.
        bus.do_command(mk_command(0, RPCS1, FN_READ));
        assert!(bridge.host_take_data().is_empty());
        // Empty slot: dropped too.
        bus.do_command(mk_command(5, RPCS1, FN_READ));
        assert!(bridge.host_take_data().is_empty());
    }

    #[test]
    fn test_unrecognised_functions_are_ignored() {
        let (bus, bridge, dir) = disk_bus();
        let rp06 = drive_type::lookup("RP06").unwrap();
        bus.connect(0, rp06, 1, "").unwrap();
        let image = DiskImage::create(&dir.path().join("y.dsk"), 64 * 512).unwrap();
        bus.with_drive(0, |d| match d {
            DriveUnit::Disk(disk) => disk.attach_image(image),
            DriveUnit::Tape(_) => unreachable!(),
        });
        assert!(bus.with_drive(0, |d| d.go_online()).unwrap());

        // A seek reaches the server only by accident; nothing should move.
        bus.do_command(mk_command(0, RPCS1, 0o05));
        assert_eq!(bus.units_online(), 0b0000_0001);
        assert!(bridge.host_take_data().is_empty());
    }
}
