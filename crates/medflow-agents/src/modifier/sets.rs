//! Pre-vetted modifier table and phase classification
//!
//! Only modifiers in the pre-vetted table may ever be proposed. Phase one
//! covers the compliance-bypass family; phase two is everything else in
//! the table.

use medflow_core::ModifierClassification;

/// A modifier from the pre-vetted table
#[derive(Debug, Clone, Copy)]
pub struct VettedModifier {
    pub code: &'static str,
    pub description: &'static str,
    pub classification: ModifierClassification,
    pub documentation_required: &'static str,
    pub fee_adjustment: &'static str,
}

/// Compliance-related modifiers assignable in phase one
pub const PHASE_ONE_MODIFIERS: &[&str] = &[
    "59", "XE", "XS", "XP", "XU", "25", "57", "24", "58", "78", "79",
];

/// Statically configured conflicting pairs; order-insensitive
pub const CONFLICTING_PAIRS: &[(&str, &str)] = &[
    ("59", "XE"),
    ("59", "XP"),
    ("59", "XS"),
    ("59", "XU"),
    ("26", "TC"),
    ("50", "LT"),
    ("50", "RT"),
    ("80", "82"),
    ("52", "53"),
    ("76", "77"),
];

pub const PRE_VETTED: &[VettedModifier] = &[
    VettedModifier {
        code: "22",
        description: "Increased procedural services",
        classification: ModifierClassification::Pricing,
        documentation_required: "Operative report documenting substantially greater work",
        fee_adjustment: "Carrier-priced increase",
    },
    VettedModifier {
        code: "24",
        description: "Unrelated E/M service during a postoperative period",
        classification: ModifierClassification::Payment,
        documentation_required: "Documentation that the E/M was unrelated to the surgery",
        fee_adjustment: "None",
    },
    VettedModifier {
        code: "25",
        description: "Significant, separately identifiable E/M service",
        classification: ModifierClassification::Payment,
        documentation_required: "Separate E/M documentation beyond the procedure note",
        fee_adjustment: "None",
    },
    VettedModifier {
        code: "26",
        description: "Professional component",
        classification: ModifierClassification::Pricing,
        documentation_required: "",
        fee_adjustment: "Professional component only",
    },
    VettedModifier {
        code: "50",
        description: "Bilateral procedure",
        classification: ModifierClassification::Pricing,
        documentation_required: "Laterality documented in the note",
        fee_adjustment: "150% of allowable",
    },
    VettedModifier {
        code: "51",
        description: "Multiple procedures",
        classification: ModifierClassification::Pricing,
        documentation_required: "",
        fee_adjustment: "Multiple-procedure reduction",
    },
    VettedModifier {
        code: "52",
        description: "Reduced services",
        classification: ModifierClassification::Pricing,
        documentation_required: "Explanation of the reduction",
        fee_adjustment: "Carrier-priced reduction",
    },
    VettedModifier {
        code: "53",
        description: "Discontinued procedure",
        classification: ModifierClassification::Pricing,
        documentation_required: "Documentation of extenuating circumstances",
        fee_adjustment: "Carrier-priced reduction",
    },
    VettedModifier {
        code: "57",
        description: "Decision for surgery",
        classification: ModifierClassification::Payment,
        documentation_required: "E/M documenting the decision for major surgery",
        fee_adjustment: "None",
    },
    VettedModifier {
        code: "58",
        description: "Staged or related procedure during the postoperative period",
        classification: ModifierClassification::Payment,
        documentation_required: "Documentation of planned staging",
        fee_adjustment: "New global period",
    },
    VettedModifier {
        code: "59",
        description: "Distinct procedural service",
        classification: ModifierClassification::Payment,
        documentation_required: "Documentation of separate site, session, or lesion",
        fee_adjustment: "None",
    },
    VettedModifier {
        code: "62",
        description: "Two surgeons",
        classification: ModifierClassification::Payment,
        documentation_required: "Both operative reports",
        fee_adjustment: "62.5% each",
    },
    VettedModifier {
        code: "63",
        description: "Procedure performed on infant less than 4 kg",
        classification: ModifierClassification::Pricing,
        documentation_required: "Weight documented",
        fee_adjustment: "125% of allowable",
    },
    VettedModifier {
        code: "66",
        description: "Surgical team",
        classification: ModifierClassification::Payment,
        documentation_required: "Team-surgery documentation",
        fee_adjustment: "Carrier-priced",
    },
    VettedModifier {
        code: "76",
        description: "Repeat procedure by same physician",
        classification: ModifierClassification::Informational,
        documentation_required: "Reason for the repeat",
        fee_adjustment: "None",
    },
    VettedModifier {
        code: "77",
        description: "Repeat procedure by another physician",
        classification: ModifierClassification::Informational,
        documentation_required: "Reason for the repeat",
        fee_adjustment: "None",
    },
    VettedModifier {
        code: "78",
        description: "Unplanned return to the operating room",
        classification: ModifierClassification::Payment,
        documentation_required: "Documentation of the related complication",
        fee_adjustment: "Intraoperative percentage only",
    },
    VettedModifier {
        code: "79",
        description: "Unrelated procedure during the postoperative period",
        classification: ModifierClassification::Payment,
        documentation_required: "Documentation of unrelated condition",
        fee_adjustment: "New global period",
    },
    VettedModifier {
        code: "80",
        description: "Assistant surgeon",
        classification: ModifierClassification::Payment,
        documentation_required: "Assistant documented in the operative report",
        fee_adjustment: "16% of allowable",
    },
    VettedModifier {
        code: "82",
        description: "Assistant surgeon when qualified resident unavailable",
        classification: ModifierClassification::Payment,
        documentation_required: "Unavailability statement",
        fee_adjustment: "16% of allowable",
    },
    VettedModifier {
        code: "AS",
        description: "Non-physician assistant at surgery",
        classification: ModifierClassification::Payment,
        documentation_required: "Assistant documented in the operative report",
        fee_adjustment: "85% of assistant allowable",
    },
    VettedModifier {
        code: "LT",
        description: "Left side",
        classification: ModifierClassification::Location,
        documentation_required: "",
        fee_adjustment: "None",
    },
    VettedModifier {
        code: "RT",
        description: "Right side",
        classification: ModifierClassification::Location,
        documentation_required: "",
        fee_adjustment: "None",
    },
    VettedModifier {
        code: "TC",
        description: "Technical component",
        classification: ModifierClassification::Pricing,
        documentation_required: "",
        fee_adjustment: "Technical component only",
    },
    VettedModifier {
        code: "XE",
        description: "Separate encounter",
        classification: ModifierClassification::Payment,
        documentation_required: "Documentation of the separate encounter",
        fee_adjustment: "None",
    },
    VettedModifier {
        code: "XP",
        description: "Separate practitioner",
        classification: ModifierClassification::Payment,
        documentation_required: "Documentation of the separate practitioner",
        fee_adjustment: "None",
    },
    VettedModifier {
        code: "XS",
        description: "Separate structure",
        classification: ModifierClassification::Payment,
        documentation_required: "Documentation of the separate organ/structure",
        fee_adjustment: "None",
    },
    VettedModifier {
        code: "XU",
        description: "Unusual non-overlapping service",
        classification: ModifierClassification::Payment,
        documentation_required: "Documentation of the non-overlapping service",
        fee_adjustment: "None",
    },
];

/// Look up a modifier in the pre-vetted table
pub fn vetted(code: &str) -> Option<&'static VettedModifier> {
    PRE_VETTED.iter().find(|m| m.code == code)
}

pub fn is_vetted(code: &str) -> bool {
    vetted(code).is_some()
}

pub fn is_phase_one(code: &str) -> bool {
    PHASE_ONE_MODIFIERS.contains(&code)
}

/// Whether two modifier codes are configured as conflicting
pub fn conflicts(a: &str, b: &str) -> bool {
    CONFLICTING_PAIRS
        .iter()
        .any(|(x, y)| (*x == a && *y == b) || (*x == b && *y == a))
}

/// The allowed set for one line item and phase: the intersection of the
/// procedure's applicable list, the pre-vetted table, and the phase
/// filter. A procedure without an applicable list is unrestricted by the
/// store, so the pre-vetted table alone bounds it.
pub fn allowed_for(applicable: Option<&[String]>, phase_one: bool) -> Vec<&'static str> {
    PRE_VETTED
        .iter()
        .map(|m| m.code)
        .filter(|code| is_phase_one(code) == phase_one)
        .filter(|code| match applicable {
            Some(list) => list.iter().any(|a| a == code),
            None => true,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_one_family_is_vetted() {
        for code in PHASE_ONE_MODIFIERS {
            assert!(is_vetted(code), "{} missing from pre-vetted table", code);
        }
    }

    #[test]
    fn test_conflicts_symmetric() {
        assert!(conflicts("59", "XE"));
        assert!(conflicts("XE", "59"));
        assert!(conflicts("LT", "50"));
        assert!(!conflicts("59", "50"));
    }

    #[test]
    fn test_allowed_for_intersection() {
        let applicable = vec!["59".to_string(), "50".to_string(), "ZZ".to_string()];
        let phase1 = allowed_for(Some(&applicable), true);
        assert_eq!(phase1, vec!["59"]);

        let phase2 = allowed_for(Some(&applicable), false);
        assert_eq!(phase2, vec!["50"]);
    }

    #[test]
    fn test_allowed_for_unrestricted() {
        let phase1 = allowed_for(None, true);
        assert_eq!(phase1.len(), PHASE_ONE_MODIFIERS.len());
    }
}
