//! Product category assignment from name, manufacturer and approval-number
//! signals. Pure: the same input always yields the same
//! (category, confidence, source) triple.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::Category;

/// Prescription marker, half- or full-width parens, case-insensitive.
static RX_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)[（(]\s*rx\s*[）)]").unwrap());

static APPROVAL_DRUG: Lazy<Regex> = Lazy::new(|| Regex::new(r"国药准字[HZSJB]\d{8}").unwrap());
static APPROVAL_DEVICE: Lazy<Regex> = Lazy::new(|| Regex::new(r"国械注[准进]").unwrap());
static APPROVAL_COSMETIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"卫妆准字|国妆特字").unwrap());
static APPROVAL_HEALTH: Lazy<Regex> = Lazy::new(|| Regex::new(r"国食健字|卫食健字").unwrap());

const COSMETIC_KEYWORDS: &[&str] = &[
    "珍珠霜", "珍珠膏", "面霜", "乳液", "精华液", "洗面奶", "面膜", "眼霜", "皇后牌",
];

const DEVICE_KEYWORDS: &[&str] = &[
    "医用口罩", "外科口罩", "血糖仪", "血压计", "体温计", "雾化器", "注射器", "绷带", "纱布",
];

const DOSAGE_FORMS: &[&str] = &[
    "片", "胶囊", "颗粒", "糖浆", "注射液", "口服液", "滴眼液", "软膏", "乳膏", "喷雾剂",
    "气雾剂", "栓", "丸", "散", "贴", "凝胶", "洗剂", "酊",
];

const HEALTH_MARKERS: &[&str] = &["保健", "营养"];

const HEALTH_PRODUCTS: &[&str] = &["维生素", "钙片", "鱼油", "蛋白粉", "益生菌"];

/// Signals available when classifying a product.
#[derive(Debug, Clone, Default)]
pub struct ClassifierInput<'a> {
    pub name: &'a str,
    pub manufacturer: &'a str,
    pub approval_number: Option<&'a str>,
}

/// Category with confidence and provenance, so callers can re-classify later
/// without losing the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub category: Category,
    pub confidence: f64,
    pub source: String,
}

impl Classification {
    fn new(category: Category, confidence: f64, source: &str) -> Self {
        Self {
            category,
            confidence,
            source: source.to_string(),
        }
    }
}

/// Classify an approval number by its regulator prefix, when recognized.
pub fn classify_approval_number(approval: &str) -> Option<Category> {
    if APPROVAL_DRUG.is_match(approval) {
        Some(Category::Drug)
    } else if APPROVAL_DEVICE.is_match(approval) {
        Some(Category::MedicalDevice)
    } else if APPROVAL_COSMETIC.is_match(approval) {
        Some(Category::Cosmetic)
    } else if APPROVAL_HEALTH.is_match(approval) {
        Some(Category::HealthProduct)
    } else {
        None
    }
}

/// Rule ladder, first match wins. The approval-number signal sits between the
/// prescription marker and the keyword rules: when present it overrides
/// everything except an explicit `(RX)` marker.
pub fn classify(input: &ClassifierInput<'_>) -> Classification {
    // 1. Prescription marker in the name.
    if RX_MARKER.is_match(input.name) {
        return Classification::new(Category::Drug, 1.00, "keyword:rx");
    }

    // 6. Regulator-issued approval-number prefix, usually scraped from a
    // detail page.
    if let Some(category) = input.approval_number.and_then(classify_approval_number) {
        return Classification::new(category, 1.00, "browser");
    }

    // 2. Manufacturer line of business.
    if input.manufacturer.contains("化妆品") {
        return Classification::new(Category::Cosmetic, 0.95, "keyword:manufacturer");
    }
    if input.manufacturer.contains("医疗器械") {
        return Classification::new(Category::MedicalDevice, 0.95, "keyword:manufacturer");
    }

    // 3. High-confidence product keywords.
    if COSMETIC_KEYWORDS.iter().any(|k| input.name.contains(k)) {
        return Classification::new(Category::Cosmetic, 0.90, "keyword:product");
    }
    if DEVICE_KEYWORDS.iter().any(|k| input.name.contains(k)) {
        return Classification::new(Category::MedicalDevice, 0.90, "keyword:product");
    }

    // 4. Pharmaceutical dosage forms.
    if DOSAGE_FORMS.iter().any(|k| input.name.contains(k)) {
        return Classification::new(Category::Drug, 0.85, "keyword:dosage");
    }

    // 5. Health-product markers combined with a product word.
    if HEALTH_MARKERS.iter().any(|m| input.name.contains(m))
        && HEALTH_PRODUCTS.iter().any(|p| input.name.contains(p))
    {
        return Classification::new(Category::HealthProduct, 0.80, "keyword:health");
    }

    // 7. Default.
    Classification::new(Category::Drug, 0.50, "default")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify_name(name: &str) -> Classification {
        classify(&ClassifierInput {
            name,
            manufacturer: "",
            approval_number: None,
        })
    }

    #[test]
    fn test_rx_marker_wins() {
        let c = classify_name("片仔癀 3g*1粒(RX)");
        assert_eq!(c.category, Category::Drug);
        assert_eq!(c.confidence, 1.00);
        assert_eq!(c.source, "keyword:rx");

        // Full-width parens and mixed case.
        let c = classify_name("某某胶囊（Rx）");
        assert_eq!(c.source, "keyword:rx");
    }

    #[test]
    fn test_rx_beats_approval_number() {
        let c = classify(&ClassifierInput {
            name: "珍珠霜(RX)",
            manufacturer: "",
            approval_number: Some("卫妆准字2019第001号"),
        });
        assert_eq!(c.category, Category::Drug);
        assert_eq!(c.source, "keyword:rx");
    }

    #[test]
    fn test_approval_number_overrides_keywords() {
        let c = classify(&ClassifierInput {
            name: "珍珠霜 25g",
            manufacturer: "",
            approval_number: Some("国药准字H20044597"),
        });
        assert_eq!(c.category, Category::Drug);
        assert_eq!(c.confidence, 1.00);
        assert_eq!(c.source, "browser");
    }

    #[test]
    fn test_approval_prefixes() {
        assert_eq!(
            classify_approval_number("国药准字Z20025034"),
            Some(Category::Drug)
        );
        assert_eq!(
            classify_approval_number("国械注准20163140256"),
            Some(Category::MedicalDevice)
        );
        assert_eq!(
            classify_approval_number("国妆特字G20200123"),
            Some(Category::Cosmetic)
        );
        assert_eq!(
            classify_approval_number("国食健字G20040234"),
            Some(Category::HealthProduct)
        );
        assert_eq!(classify_approval_number("批准文号不详"), None);
    }

    #[test]
    fn test_manufacturer_signal() {
        let c = classify(&ClassifierInput {
            name: "某某产品",
            manufacturer: "上海某某化妆品有限公司",
            approval_number: None,
        });
        assert_eq!(c.category, Category::Cosmetic);
        assert_eq!(c.confidence, 0.95);

        let c = classify(&ClassifierInput {
            name: "某某产品",
            manufacturer: "江苏某某医疗器械有限公司",
            approval_number: None,
        });
        assert_eq!(c.category, Category::MedicalDevice);
    }

    #[test]
    fn test_cosmetic_keyword_beats_dosage_form() {
        // Contains both 珍珠霜 (cosmetic) and 片 (dosage form); the keyword
        // rule has priority.
        let c = classify_name("皇后牌 片仔癀 珍珠霜 25g");
        assert_eq!(c.category, Category::Cosmetic);
        assert!(c.confidence >= 0.90);
    }

    #[test]
    fn test_device_keywords() {
        let c = classify_name("欧姆龙电子血压计 上臂式");
        assert_eq!(c.category, Category::MedicalDevice);
        assert_eq!(c.confidence, 0.90);
    }

    #[test]
    fn test_dosage_form() {
        let c = classify_name("阿莫西林胶囊 0.25g*24粒");
        assert_eq!(c.category, Category::Drug);
        assert_eq!(c.confidence, 0.85);
    }

    #[test]
    fn test_health_product_requires_both_signals() {
        let c = classify_name("营养补充 鱼油软胶囊"); // 胶囊 is a dosage form, rule 4 wins
        assert_eq!(c.category, Category::Drug);

        let c = classify_name("保健佳品 深海鱼油");
        assert_eq!(c.category, Category::HealthProduct);
        assert_eq!(c.confidence, 0.80);
    }

    #[test]
    fn test_default_rule() {
        let c = classify_name("不知名产品");
        assert_eq!(c.category, Category::Drug);
        assert_eq!(c.confidence, 0.50);
        assert_eq!(c.source, "default");
    }

    #[test]
    fn test_classification_is_stable() {
        let input = ClassifierInput {
            name: "阿莫西林胶囊",
            manufacturer: "华北制药",
            approval_number: None,
        };
        assert_eq!(classify(&input), classify(&input));
    }
}
