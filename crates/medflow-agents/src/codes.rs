//! Static code tables shared by the stage agents

/// Unlisted-procedure codes, sorted ascending. Candidate retrieval anchors
/// each candidate to its nearest unlisted neighbours; the compliance stage
/// flags unlisted codes billed without value units.
pub const UNLISTED_PROCEDURE_CODES: &[&str] = &[
    "15999", "17999", "19499", "20999", "21899", "22999", "23929", "24999", "25999", "26989",
    "27299", "27599", "27899", "28899", "29999", "30999", "31899", "32999", "33999", "36299",
    "37799", "38999", "39499", "39599", "40799", "40899", "41599", "41899", "42299", "42999",
    "43289", "43499", "43659", "43999", "44238", "44799", "44899", "44979", "45399", "45999",
    "46999", "47379", "47399", "47579", "47999", "48999", "49329", "49659", "49999", "50549",
    "50949", "51999", "53899", "54699", "55559", "55899", "58578", "58579", "58679", "58999",
    "59897", "59898", "59899", "60659", "60699", "64999", "66999", "67299", "67399", "67599",
    "67999", "68399", "68899", "69399", "69799", "69949", "69979",
];

/// Whether a code is in the unlisted set
pub fn is_unlisted(code: &str) -> bool {
    UNLISTED_PROCEDURE_CODES.binary_search(&code).is_ok()
}

/// Nearest unlisted codes numerically below and above `code`
pub fn nearest_unlisted_neighbors(code: &str) -> (Option<&'static str>, Option<&'static str>) {
    let Ok(numeric) = code.parse::<u32>() else {
        return (None, None);
    };

    let mut below = None;
    let mut above = None;
    for candidate in UNLISTED_PROCEDURE_CODES {
        let Ok(value) = candidate.parse::<u32>() else {
            continue;
        };
        if value < numeric {
            below = Some(*candidate);
        } else if value > numeric {
            above = Some(*candidate);
            break;
        }
    }
    (below, above)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_is_sorted() {
        let mut sorted = UNLISTED_PROCEDURE_CODES.to_vec();
        sorted.sort();
        assert_eq!(sorted, UNLISTED_PROCEDURE_CODES);
    }

    #[test]
    fn test_is_unlisted() {
        assert!(is_unlisted("49999"));
        assert!(!is_unlisted("49616"));
    }

    #[test]
    fn test_neighbors() {
        let (below, above) = nearest_unlisted_neighbors("49616");
        assert_eq!(below, Some("49329"));
        assert_eq!(above, Some("49659"));

        let (below, _) = nearest_unlisted_neighbors("15000");
        assert_eq!(below, None);

        let (_, above) = nearest_unlisted_neighbors("99999");
        assert_eq!(above, None);
    }
}
