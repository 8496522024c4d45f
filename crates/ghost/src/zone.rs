const FNV_OFFSET_BASIS: u32 = 0x911c9dc5;
const FNV_PRIME: u32 = 0x01000193;

/// Hashes a level name into the zone id carried by every state.
///
/// 32-bit FNV-1a over the UTF-16 code units of the name, high byte first.
pub fn zone_hash(level: &str) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    for unit in level.encode_utf16() {
        for byte in unit.to_be_bytes() {
            hash ^= byte as u32;
            hash = hash.wrapping_mul(FNV_PRIME);
        }
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_name_is_offset_basis() {
        assert_eq!(zone_hash(""), FNV_OFFSET_BASIS);
    }

    #[test]
    fn hashes_each_code_unit_high_byte_first() {
        // 'A' is 0x0041: hash 0x00 then 0x41
        let mut expected = FNV_OFFSET_BASIS;
        expected = expected.wrapping_mul(FNV_PRIME);
        expected ^= 0x41;
        expected = expected.wrapping_mul(FNV_PRIME);
        assert_eq!(zone_hash("A"), expected);
    }

    #[test]
    fn distinct_levels_get_distinct_zones() {
        assert_ne!(zone_hash("Zone_Library"), zone_hash("Zone_Dungeon"));
        assert_eq!(zone_hash("Zone_Library"), zone_hash("Zone_Library"));
    }
}
