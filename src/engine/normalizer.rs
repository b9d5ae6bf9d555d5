//! Deterministic string cleanup for product names, specifications and
//! manufacturers. Every function here is pure and idempotent:
//! `normalize(normalize(x)) == normalize(x)` for all inputs.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::domain::{Offer, PharmaOpsError, Result};

/// Decorative tags the upstream prepends or appends to product names.
static PROMO_TAG_LEADING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[【\[（(](?:热销|促销|特价|秒杀|包邮|新品|推荐|爆款|自营)[】\]）)]\s*)+").unwrap()
});

static PROMO_TAG_TRAILING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:\s*[【\[（(](?:热销|促销|特价|秒杀|包邮|新品|推荐|爆款|自营)[】\]）)])+$").unwrap()
});

/// Stray marketing symbols at either end of a name.
static EDGE_SYMBOLS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[★☆❤♥~!！\s]+|[★☆❤♥~!！\s]+$").unwrap());

/// Runs of whitespace, including the full-width space.
static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\s\u{3000}]+").unwrap());

/// Quantity-with-unit occurrences inside a specification. Longer unit
/// spellings must come first in the alternation.
static UNIT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d+(?:\.\d+)?)\s*(毫克|毫升|克|升|[mM][gG]|[mM][lL]|[gG]|[lL])").unwrap()
});

/// Multiplicative pack separators equivalent to `*`.
static PACK_SEPARATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*[×xX*]\s*(\d)").unwrap());

fn collapse_whitespace(s: &str) -> String {
    WHITESPACE_RUN.replace_all(s.trim(), " ").trim().to_string()
}

/// Strip to a fixpoint: removing a symbol can expose another tag underneath.
fn strip_promo_tags(s: &str) -> String {
    let mut current = s.to_string();
    loop {
        let stripped = PROMO_TAG_LEADING.replace(&current, "");
        let stripped = PROMO_TAG_TRAILING.replace(&stripped, "");
        let next = EDGE_SYMBOLS.replace_all(&stripped, "").to_string();
        if next == current {
            return next;
        }
        current = next;
    }
}

fn canonical_unit(raw: &str) -> &'static str {
    match raw {
        "毫克" => "mg",
        "毫升" => "ml",
        "克" => "g",
        "升" => "L",
        u if u.eq_ignore_ascii_case("mg") => "mg",
        u if u.eq_ignore_ascii_case("ml") => "ml",
        u if u.eq_ignore_ascii_case("g") => "g",
        _ => "L",
    }
}

/// Clean a display name. The trailing `(RX)` marker survives because it
/// informs classification.
pub fn normalize_name(raw: &str) -> String {
    collapse_whitespace(&strip_promo_tags(raw))
}

/// Clean a packaging specification: whitespace, promotional tags, canonical
/// units ({mg, g, ml, L}) and a canonical `*` pack separator. The `A*B粒`
/// pack structure is preserved.
pub fn normalize_specification(raw: &str) -> String {
    let cleaned = collapse_whitespace(&strip_promo_tags(raw));
    let with_units = UNIT_RE.replace_all(&cleaned, |caps: &regex::Captures<'_>| {
        format!("{}{}", &caps[1], canonical_unit(&caps[2]))
    });
    PACK_SEPARATOR.replace_all(&with_units, "*$1").to_string()
}

pub fn normalize_manufacturer(raw: &str) -> String {
    collapse_whitespace(&strip_promo_tags(raw))
}

/// Case-insensitive substring match after whitespace collapse; used to keep
/// only aggregates and offers that actually concern a keyword.
pub fn matches_keyword(name: &str, keyword: &str) -> bool {
    let name = collapse_whitespace(name).to_lowercase().replace(' ', "");
    let keyword = collapse_whitespace(keyword).to_lowercase().replace(' ', "");
    !keyword.is_empty() && name.contains(&keyword)
}

/// The drug uniqueness tuple: (normalized name, normalized specification,
/// normalized manufacturer).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityKey {
    pub name: String,
    pub specification: String,
    pub manufacturer: String,
}

impl IdentityKey {
    pub fn new(name: &str, specification: &str, manufacturer: &str) -> Self {
        Self {
            name: normalize_name(name),
            specification: normalize_specification(specification),
            manufacturer: normalize_manufacturer(manufacturer),
        }
    }
}

/// Normalize an offer in place, deriving its identity key. Offers whose name
/// vanishes under cleanup are malformed and dropped by the caller.
pub fn normalize_offer(mut offer: Offer) -> Result<(IdentityKey, Offer)> {
    offer.name = normalize_name(&offer.name);
    offer.specification = normalize_specification(&offer.specification);
    offer.manufacturer = normalize_manufacturer(&offer.manufacturer);

    if offer.name.is_empty() {
        return Err(PharmaOpsError::Normalization(
            "offer name is empty after cleanup".to_string(),
        ));
    }
    if offer.price_cents <= 0 {
        return Err(PharmaOpsError::Normalization(format!(
            "non-positive price for '{}'",
            offer.name
        )));
    }

    let key = IdentityKey {
        name: offer.name.clone(),
        specification: offer.specification.clone(),
        manufacturer: offer.manufacturer.clone(),
    };

    Ok((key, offer))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whitespace_collapse() {
        assert_eq!(normalize_name("  阿莫西林   胶囊  "), "阿莫西林 胶囊");
        assert_eq!(normalize_name("阿莫西林\u{3000}胶囊"), "阿莫西林 胶囊");
    }

    #[test]
    fn test_promo_tags_stripped() {
        assert_eq!(normalize_name("【热销】阿莫西林胶囊"), "阿莫西林胶囊");
        assert_eq!(normalize_name("阿莫西林胶囊【包邮】"), "阿莫西林胶囊");
        assert_eq!(normalize_name("★阿莫西林胶囊★"), "阿莫西林胶囊");
    }

    #[test]
    fn test_rx_marker_preserved() {
        assert_eq!(normalize_name("片仔癀 3g*1粒(RX)"), "片仔癀 3g*1粒(RX)");
    }

    #[test]
    fn test_unit_canonicalization() {
        assert_eq!(normalize_specification("0.25G*24粒"), "0.25g*24粒");
        assert_eq!(normalize_specification("100毫升"), "100ml");
        assert_eq!(normalize_specification("250毫克*12片"), "250mg*12片");
        assert_eq!(normalize_specification("1升"), "1L");
        assert_eq!(normalize_specification("10ML"), "10ml");
    }

    #[test]
    fn test_pack_structure_preserved() {
        assert_eq!(normalize_specification("3g×1粒"), "3g*1粒");
        assert_eq!(normalize_specification("3g x 1粒"), "3g*1粒");
        assert_eq!(normalize_specification("3g*1粒"), "3g*1粒");
    }

    #[test]
    fn test_idempotence_on_samples() {
        let samples = [
            "【热销】阿莫西林  胶囊 0.25G×24粒",
            "片仔癀 3g*1粒(RX)",
            "  ★维生素C咀嚼片 100毫克 ",
            "",
            "   ",
        ];
        for s in samples {
            let once = normalize_name(s);
            assert_eq!(normalize_name(&once), once, "name not idempotent for {s:?}");
            let once = normalize_specification(s);
            assert_eq!(
                normalize_specification(&once),
                once,
                "spec not idempotent for {s:?}"
            );
        }
    }

    #[test]
    fn test_keyword_matching() {
        assert!(matches_keyword("阿莫西林胶囊 0.25g", "阿莫西林"));
        assert!(matches_keyword("Amoxicillin Capsules", "amoxicillin"));
        assert!(!matches_keyword("布洛芬缓释胶囊", "阿莫西林"));
        assert!(!matches_keyword("阿莫西林", ""));
    }

    #[test]
    fn test_identity_key_normalizes_components() {
        let a = IdentityKey::new("【热销】片仔癀", "3g×1粒", "  漳州片仔癀药业 ");
        let b = IdentityKey::new("片仔癀", "3g*1粒", "漳州片仔癀药业");
        assert_eq!(a, b);
    }

    #[test]
    fn test_normalize_offer_rejects_empty_name() {
        let offer = Offer {
            name: "【热销】".to_string(),
            specification: String::new(),
            manufacturer: String::new(),
            price_cents: 100,
            supplier_name: "s".to_string(),
            supplier_id: None,
            source_url: None,
            approval_number: None,
            source: crate::domain::OfferSource::Endpoint,
            crawled_at: chrono::Utc::now(),
        };
        assert!(normalize_offer(offer).is_err());
    }
}
