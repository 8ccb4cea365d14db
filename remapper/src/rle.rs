//! Run length encoding of usage sets, used to list usages to the configuration tool.

use heapless::Vec;

/// `count` consecutive usages starting at `start`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UsageRange {
    pub start: u32,
    pub count: u32,
}

/// Encode an ascending sequence of usages into maximal runs of consecutive values.
///
/// Usage 0 is never a valid start of a run and is skipped. Runs that don't fit in `N` are dropped.
pub fn encode<const N: usize>(usages: impl IntoIterator<Item = u32>) -> Vec<UsageRange, N> {
    let mut ranges = Vec::new();
    let mut current = UsageRange::default();
    for usage in usages {
        if usage == 0 {
            continue;
        }
        if current.start != 0 && usage == current.start.saturating_add(current.count) {
            current.count += 1;
            continue;
        }
        if current.start != 0 && usage < current.start.saturating_add(current.count) {
            // Duplicate
            continue;
        }
        if current.start != 0 && ranges.push(current).is_err() {
            warn!("Usage range list is full, capacity is {}", N);
            return ranges;
        }
        current = UsageRange { start: usage, count: 1 };
    }
    if current.start != 0 && ranges.push(current).is_err() {
        warn!("Usage range list is full, capacity is {}", N);
    }
    ranges
}

/// Expand runs back into the usages they cover
pub fn decode(ranges: &[UsageRange]) -> impl Iterator<Item = u32> + '_ {
    ranges
        .iter()
        .flat_map(|range| (0..range.count).map(move |i| range.start + i))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(usages: &[u32]) {
        let ranges: Vec<UsageRange, 16> = encode(usages.iter().copied());
        let decoded: Vec<u32, 64> = decode(&ranges).collect();
        assert_eq!(decoded.as_slice(), usages);
    }

    #[test]
    fn test_encode_runs() {
        let ranges: Vec<UsageRange, 8> = encode([0x0007_0004, 0x0007_0005, 0x0007_0006, 0x0009_0001, 0x000C_00E2]);
        assert_eq!(
            ranges.as_slice(),
            &[
                UsageRange { start: 0x0007_0004, count: 3 },
                UsageRange { start: 0x0009_0001, count: 1 },
                UsageRange { start: 0x000C_00E2, count: 1 },
            ]
        );
    }

    #[test]
    fn test_round_trip() {
        round_trip(&[]);
        round_trip(&[0x0001_0030]);
        round_trip(&[1, 2, 3, 4, 5, 6, 7, 8]);
        round_trip(&[0x0001_0030, 0x0001_0031, 0x0001_0038, 0x000C_0238, 0xFFF1_0001]);
    }

    #[test]
    fn test_zero_and_duplicates_are_skipped() {
        let ranges: Vec<UsageRange, 4> = encode([0, 5, 5, 6]);
        assert_eq!(ranges.as_slice(), &[UsageRange { start: 5, count: 2 }]);
    }

    #[test]
    fn test_capacity() {
        let ranges: Vec<UsageRange, 2> = encode([1, 3, 5, 7]);
        assert_eq!(ranges.len(), 2);
    }
}
