//! GPU architecture family lookup from CUDA compute capability.

/// Family returned for compute capabilities that are not in the table.
pub const UNKNOWN_FAMILY: &str = "Unknown";

/// Maps a compute capability `major.minor` to its hardware generation name.
pub fn arch_family(major: i32, minor: i32) -> &'static str {
    match major {
        1 => "Tesla",
        2 => "Fermi",
        3 => "Kepler",
        5 => "Maxwell",
        6 => "Pascal",
        // 7.0 and 7.2 are Volta, 7.5 is Turing
        7 if minor < 5 => "volta",
        7 => "Turing",
        8 => "Ampere",
        _ => UNKNOWN_FAMILY,
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn known_families() {
        let table = [
            ((1, 0), "Tesla"),
            ((2, 1), "Fermi"),
            ((3, 5), "Kepler"),
            ((5, 2), "Maxwell"),
            ((6, 1), "Pascal"),
            ((7, 0), "volta"),
            ((7, 2), "volta"),
            ((7, 5), "Turing"),
            ((8, 0), "Ampere"),
            ((8, 6), "Ampere"),
        ];
        for ((major, minor), family) in table {
            assert_eq!(arch_family(major, minor), family, "{major}.{minor}");
        }
    }

    #[test]
    fn unmapped_major_is_unknown() {
        for major in [-1, 0, 4, 9, 10, 100] {
            assert_eq!(arch_family(major, 0), UNKNOWN_FAMILY);
        }
    }
}
