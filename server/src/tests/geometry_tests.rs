// Drive Type and Geometry Tests
#[cfg(test)]
mod tests {
    use crate::bridge::window::geometry_word;
    use crate::drive_type::{self, Packing, INVALID_SECTOR};

    #[test]
    fn test_lookup_is_case_insensitive() {
        assert_eq!(drive_type::lookup("rp06").unwrap().name, "RP06");
        assert_eq!(drive_type::lookup("Tu78").unwrap().name, "TU78");
        assert!(drive_type::lookup("RP99").is_none());
    }

    #[test]
    fn test_families_never_overlap() {
        for t in drive_type::all() {
            assert!(!(t.is_disk() && t.is_tape()), "{} is both disk and tape", t.name);
        }
        assert!(drive_type::lookup("RM80").unwrap().is_disk());
        assert!(drive_type::lookup("TU78").unwrap().is_tape());
    }

    #[test]
    fn test_rp06_sector_counts_depend_on_packing() {
        let rp06 = drive_type::lookup("RP06").unwrap();
        assert_eq!(rp06.sectors(Packing::Bits16), 22);
        assert_eq!(rp06.sectors(Packing::Bits18), 20);
        assert_eq!(rp06.heads, 19);
        assert_eq!(rp06.cylinders, 815);
    }

    #[test]
    fn test_lba_round_trip_is_a_bijection() {
        for name in ["RP04", "RP06", "RP07", "RM03", "RM05", "RM80"] {
            let t = drive_type::lookup(name).unwrap();
            for packing in [Packing::Bits16, Packing::Bits18] {
                let total = t.total_sectors(packing);
                for lba in [0, 1, 42, total / 2, total - 1] {
                    let (c, h, s) = t.from_lba(lba, packing).unwrap();
                    assert_eq!(t.to_lba(c, h, s, packing), lba, "{} lba {}", name, lba);
                }
                assert!(t.from_lba(total, packing).is_none());
            }
        }
    }

    #[test]
    fn test_out_of_range_chs_maps_to_sentinel() {
        let rp06 = drive_type::lookup("RP06").unwrap();
        assert_eq!(rp06.to_lba(815, 0, 0, Packing::Bits16), INVALID_SECTOR);
        assert_eq!(rp06.to_lba(0, 19, 0, Packing::Bits16), INVALID_SECTOR);
        assert_eq!(rp06.to_lba(0, 0, 22, Packing::Bits16), INVALID_SECTOR);
        // Sector 20 exists in 16-bit packing but not in 18-bit packing.
        assert_ne!(rp06.to_lba(0, 0, 20, Packing::Bits16), INVALID_SECTOR);
        assert_eq!(rp06.to_lba(0, 0, 20, Packing::Bits18), INVALID_SECTOR);
    }

    #[test]
    fn test_geometry_word_encoding() {
        assert_eq!(geometry_word(815, 19, 20), (814 << 16) | (18 << 8) | 19);
        assert_eq!(geometry_word(1, 1, 1), 0);
    }

    #[test]
    fn test_capacity_matches_geometry() {
        let rp06 = drive_type::lookup("RP06").unwrap();
        assert_eq!(
            rp06.capacity_bytes(Packing::Bits16),
            815 * 19 * 22 * 512
        );
        assert_eq!(
            rp06.capacity_bytes(Packing::Bits18),
            815 * 19 * 20 * 1024
        );
    }
}
