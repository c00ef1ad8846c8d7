//! Weighted country table for simulated users.

/// (ISO-3166 alpha-2, relative weight). Roughly tracks where ambient
/// traffic comes from; only the shape matters.
const COUNTRY_WEIGHTS: &[(&str, u64)] = &[
    ("US", 22),
    ("IN", 10),
    ("GB", 8),
    ("DE", 7),
    ("BR", 7),
    ("JP", 6),
    ("FR", 5),
    ("CA", 5),
    ("MX", 4),
    ("AU", 4),
    ("KR", 3),
    ("ES", 3),
    ("IT", 3),
    ("NG", 3),
    ("NL", 2),
    ("SE", 2),
    ("PH", 2),
    ("ID", 2),
    ("ZA", 1),
    ("AR", 1),
];

fn total_weight() -> u64 {
    COUNTRY_WEIGHTS.iter().map(|(_, w)| w).sum()
}

/// Deterministic weighted pick: the same index always maps to the same
/// country, and indices spread across the table proportionally to weight.
pub fn country_for_index(index: usize) -> &'static str {
    // Knuth multiplicative hash, high bits.
    let hashed = ((index as u64).wrapping_add(1).wrapping_mul(2_654_435_761) >> 8) % total_weight();
    let mut acc = 0;
    for &(code, weight) in COUNTRY_WEIGHTS {
        acc += weight;
        if hashed < acc {
            return code;
        }
    }
    COUNTRY_WEIGHTS[0].0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn same_index_same_country() {
        for i in 0..50 {
            assert_eq!(country_for_index(i), country_for_index(i));
        }
    }

    #[test]
    fn spread_covers_several_countries() {
        let mut seen: HashMap<&str, usize> = HashMap::new();
        for i in 0..1000 {
            *seen.entry(country_for_index(i)).or_default() += 1;
        }
        assert!(seen.len() >= 10, "only {} countries hit", seen.len());
        let us = seen.get("US").copied().unwrap_or(0);
        let se = seen.get("SE").copied().unwrap_or(0);
        assert!(us > se, "US {us} vs SE {se}");
    }
}
