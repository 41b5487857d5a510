// Container File Tests
#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use crate::drive_type::Packing;
    use crate::image::{DiskImage, ImageError, TapeImage, TapeRead};

    #[test]
    fn test_disk_16_bit_sector_layout() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pack.dsk");
        let image = DiskImage::create(&path, 64 * 512).unwrap();

        let mut sector = [0u32; 256];
        sector[0] = 0xABCD;
        sector[1] = 0x1234;
        image.write_sector(3, Packing::Bits16, &sector).unwrap();

        let raw = fs::read(&path).unwrap();
        let base = 3 * 512;
        assert_eq!(&raw[base..base + 4], &[0xCD, 0xAB, 0x34, 0x12]);

        let mut back = [0u32; 256];
        image.read_sector(3, Packing::Bits16, &mut back).unwrap();
        assert_eq!(back, sector);
    }

    #[test]
    fn test_disk_18_bit_sector_layout() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pack18.dsk");
        let image = DiskImage::create(&path, 16 * 1024).unwrap();

        let mut sector = [0u32; 256];
        for pair in sector.chunks_exact_mut(2) {
            pair[0] = 0o123456;
            pair[1] = 0o654321;
        }
        image.write_sector(2, Packing::Bits18, &sector).unwrap();

        // Each quadword holds one 36-bit value right-aligned, little-endian.
        let raw = fs::read(&path).unwrap();
        let expected: u64 = (0o123456 << 18) | 0o654321;
        for quad in raw[2 * 1024..3 * 1024].chunks_exact(8) {
            assert_eq!(u64::from_le_bytes(quad.try_into().unwrap()), expected);
        }

        let mut back = [0u32; 256];
        image.read_sector(2, Packing::Bits18, &mut back).unwrap();
        assert_eq!(back, sector);
    }

    #[test]
    fn test_disk_reads_past_end_return_zeros() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("short.dsk");
        let image = DiskImage::create(&path, 512).unwrap();
        let mut sector = [0xFFFF_FFFFu32; 256];
        image.read_sector(9, Packing::Bits16, &mut sector).unwrap();
        assert!(sector.iter().all(|&w| w == 0));
    }

    #[test]
    fn test_tape_records_marks_and_ends() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reel.tap");
        let mut tape = TapeImage::open(&path, false).unwrap();
        tape.write_record(b"hello").unwrap();
        tape.write_mark().unwrap();
        tape.write_record(b"world!!").unwrap();
        tape.rewind();
        assert!(tape.at_bot());
        assert_eq!(tape.position(), 0);

        let mut buf = [0u8; 64];
        assert_eq!(tape.read_record_forward(&mut buf).unwrap(), TapeRead::Data(5));
        assert_eq!(&buf[..5], b"hello");
        assert_eq!(tape.read_record_forward(&mut buf).unwrap(), TapeRead::TapeMark);
        assert_eq!(tape.read_record_forward(&mut buf).unwrap(), TapeRead::Data(7));
        assert_eq!(&buf[..7], b"world!!");
        assert_eq!(tape.read_record_forward(&mut buf).unwrap(), TapeRead::End);
        assert!(tape.at_eot());
    }

    #[test]
    fn test_tape_frame_layout_pads_odd_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("frames.tap");
        let mut tape = TapeImage::open(&path, false).unwrap();
        tape.write_record(b"hello").unwrap();
        let raw = fs::read(&path).unwrap();
        // 4-byte count, 5 payload bytes padded to 6, trailing count.
        assert_eq!(raw.len(), 4 + 6 + 4);
        assert_eq!(&raw[0..4], &5u32.to_le_bytes());
        assert_eq!(&raw[4..9], b"hello");
        assert_eq!(raw[9], 0);
        assert_eq!(&raw[10..14], &5u32.to_le_bytes());
    }

    #[test]
    fn test_tape_reverse_traversal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rev.tap");
        let mut tape = TapeImage::open(&path, false).unwrap();
        tape.write_record(b"alpha").unwrap();
        tape.write_mark().unwrap();
        tape.write_record(b"bravo-two").unwrap();

        // Head is at EOT. Reverse reads return payloads in forward byte
        // order and leave the head in front of the frame they consumed.
        let mut buf = [0u8; 64];
        assert_eq!(tape.read_record_reverse(&mut buf).unwrap(), TapeRead::Data(9));
        assert_eq!(&buf[..9], b"bravo-two");
        assert_eq!(tape.space_reverse().unwrap(), TapeRead::TapeMark);
        assert_eq!(tape.read_record_reverse(&mut buf).unwrap(), TapeRead::Data(5));
        assert_eq!(&buf[..5], b"alpha");
        assert!(tape.at_bot());
        assert_eq!(tape.read_record_reverse(&mut buf).unwrap(), TapeRead::End);
    }

    #[test]
    fn test_tape_spacing_counts_frames() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("space.tap");
        let mut tape = TapeImage::open(&path, false).unwrap();
        tape.write_record(b"one").unwrap();
        tape.write_record(b"two").unwrap();
        tape.write_mark().unwrap();
        tape.rewind();

        assert_eq!(tape.space_forward().unwrap(), TapeRead::Data(3));
        assert_eq!(tape.space_forward().unwrap(), TapeRead::Data(3));
        assert_eq!(tape.space_forward().unwrap(), TapeRead::TapeMark);
        assert_eq!(tape.space_forward().unwrap(), TapeRead::End);
    }

    #[test]
    fn test_tape_write_truncates_what_follows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("trunc.tap");
        let mut tape = TapeImage::open(&path, false).unwrap();
        tape.write_record(b"keep").unwrap();
        tape.write_record(b"drop-me").unwrap();
        tape.rewind();
        tape.space_forward().unwrap();
        tape.write_record(b"new!").unwrap();

        let mut buf = [0u8; 64];
        tape.rewind();
        assert_eq!(tape.read_record_forward(&mut buf).unwrap(), TapeRead::Data(4));
        assert_eq!(&buf[..4], b"keep");
        assert_eq!(tape.read_record_forward(&mut buf).unwrap(), TapeRead::Data(4));
        assert_eq!(&buf[..4], b"new!");
        assert_eq!(tape.read_record_forward(&mut buf).unwrap(), TapeRead::End);
    }

    #[test]
    fn test_tape_erase_from_position() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("erase.tap");
        let mut tape = TapeImage::open(&path, false).unwrap();
        tape.write_record(b"keep").unwrap();
        tape.write_record(b"gone").unwrap();
        tape.rewind();
        tape.space_forward().unwrap();
        tape.truncate().unwrap();
        assert!(tape.at_eot());
        assert_eq!(fs::metadata(&path).unwrap().len(), 4 + 4 + 4);
    }

    #[test]
    fn test_read_only_tape_refuses_writes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ro.tap");
        let mut tape = TapeImage::open(&path, false).unwrap();
        tape.write_record(b"data").unwrap();
        drop(tape);

        let mut tape = TapeImage::open(&path, true).unwrap();
        assert!(matches!(tape.write_record(b"nope"), Err(ImageError::ReadOnly)));
        assert!(matches!(tape.write_mark(), Err(ImageError::ReadOnly)));
        assert!(matches!(tape.truncate(), Err(ImageError::ReadOnly)));
    }

    #[test]
    fn test_corrupt_frame_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.tap");
        // A leading count with no payload behind it.
        fs::write(&path, 100u32.to_le_bytes()).unwrap();
        let mut tape = TapeImage::open(&path, false).unwrap();
        let mut buf = [0u8; 128];
        assert!(matches!(
            tape.read_record_forward(&mut buf),
            Err(ImageError::Corrupt(_))
        ));
    }
}
