//! Property-based checks for the pure engine: normalization idempotence and
//! classification totality/stability.

use proptest::prelude::*;

use pharma_price_ops::engine::{
    classify, normalize_manufacturer, normalize_name, normalize_specification, ClassifierInput,
};

const SOURCES: &[&str] = &[
    "keyword:rx",
    "browser",
    "keyword:manufacturer",
    "keyword:product",
    "keyword:dosage",
    "keyword:health",
    "default",
];

proptest! {
    #[test]
    fn normalize_name_is_idempotent(s in "\\PC{0,64}") {
        let once = normalize_name(&s);
        prop_assert_eq!(normalize_name(&once), once.clone());
    }

    #[test]
    fn normalize_specification_is_idempotent(s in "\\PC{0,64}") {
        let once = normalize_specification(&s);
        prop_assert_eq!(normalize_specification(&once), once.clone());
    }

    #[test]
    fn normalize_manufacturer_is_idempotent(s in "\\PC{0,64}") {
        let once = normalize_manufacturer(&s);
        prop_assert_eq!(normalize_manufacturer(&once), once.clone());
    }

    // Inputs shaped like real listings: promo tags, units, pack separators.
    #[test]
    fn normalize_is_idempotent_on_listing_shapes(
        prefix in proptest::sample::select(vec!["", "【热销】", "[促销]", "★ "]),
        body in "[一-龥a-zA-Z0-9]{1,32}",
        amount in 1u32..1000,
        unit in proptest::sample::select(vec!["mg", "MG", "毫克", "g", "G", "克", "ml", "ML", "毫升", "L", "升"]),
        count in 1u32..100,
        sep in proptest::sample::select(vec!["*", "×", "x"]),
    ) {
        let spec = format!("{prefix}{body} {amount}{unit}{sep}{count}粒");
        let once = normalize_specification(&spec);
        prop_assert_eq!(normalize_specification(&once), once.clone());
    }

    #[test]
    fn classification_is_total(
        name in "\\PC{0,48}",
        manufacturer in "\\PC{0,32}",
    ) {
        let c = classify(&ClassifierInput {
            name: &name,
            manufacturer: &manufacturer,
            approval_number: None,
        });
        prop_assert!((0.0..=1.0).contains(&c.confidence));
        prop_assert!(SOURCES.contains(&c.source.as_str()));
    }

    #[test]
    fn classification_is_stable(
        name in "\\PC{0,48}",
        manufacturer in "\\PC{0,32}",
    ) {
        let input = ClassifierInput {
            name: &name,
            manufacturer: &manufacturer,
            approval_number: None,
        };
        prop_assert_eq!(classify(&input), classify(&input));
    }

    // A recognized approval number only ever strengthens confidence.
    #[test]
    fn approval_signal_is_monotone(name in "\\PC{0,48}") {
        let without = classify(&ClassifierInput {
            name: &name,
            manufacturer: "",
            approval_number: None,
        });
        let with = classify(&ClassifierInput {
            name: &name,
            manufacturer: "",
            approval_number: Some("国药准字H20044597"),
        });
        prop_assert!(with.confidence >= without.confidence);
    }
}
