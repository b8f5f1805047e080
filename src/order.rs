// 🧾 Canonical Order - Typed purchase order built from a normalized document
// The mapping engine hands over raw strings; this is where dates, quantities
// and prices are coerced and the order-level constraints are checked.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::ValidationError;
use crate::mapping::NormalizedDocument;

/// X12 dates are CCYYMMDD
pub const EDI_DATE_FORMAT: &str = "%Y%m%d";

// ============================================================================
// CORE TYPES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalOrderLine {
    /// 1-based position in the line-item loop
    pub line_sequence_number: usize,
    pub sku: String,
    pub quantity_ordered: i64,
    pub unit_of_measure: String,
    pub unit_price: f64,
    pub product_description: Option<String>,
}

impl CanonicalOrderLine {
    pub fn line_total(&self) -> f64 {
        self.unit_price * self.quantity_ordered as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalOrder {
    pub correlation_id: String,
    pub retailer_id: String,
    pub po_number: String,
    /// SA = stand-alone, DS = drop-ship, ...
    pub purchase_order_type: String,
    pub po_date: NaiveDate,
    pub requested_delivery_date: Option<NaiveDate>,
    pub ship_to_name: String,
    pub ship_to_address: Option<String>,
    pub ship_to_city: Option<String>,
    pub ship_to_state: Option<String>,
    pub ship_to_zip: Option<String>,
    pub department_number: Option<String>,
    pub lines: Vec<CanonicalOrderLine>,
    pub interchange_control_number: Option<String>,
    pub transaction_control_number: Option<String>,
    /// Mapped header fields with no canonical slot
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

/// Envelope identifiers carried into the order for traceability
#[derive(Debug, Clone, Default)]
pub struct OrderContext {
    pub correlation_id: String,
    pub retailer_id: String,
    pub interchange_control_number: Option<String>,
    pub transaction_control_number: Option<String>,
}

const HEADER_FIELDS: [&str; 10] = [
    "poNumber",
    "purchaseOrderType",
    "poDate",
    "requestedDeliveryDate",
    "shipToName",
    "shipToAddress",
    "shipToCity",
    "shipToState",
    "shipToZip",
    "departmentNumber",
];

// ============================================================================
// BUILD + VALIDATE
// ============================================================================

impl CanonicalOrder {
    /// Coerce and validate. Every problem is collected, not just the first.
    pub fn from_document(
        context: OrderContext,
        document: &NormalizedDocument,
    ) -> Result<CanonicalOrder, Vec<ValidationError>> {
        let mut errors = Vec::new();
        let header = &document.header;

        let po_number = required_text(header, "poNumber", None, &mut errors);
        let purchase_order_type = required_text(header, "purchaseOrderType", None, &mut errors);
        let ship_to_name = required_text(header, "shipToName", None, &mut errors);
        let po_date = if optional_text(header, "poDate").is_some() {
            optional_date(header, "poDate", &mut errors)
        } else {
            errors.push(ValidationError::missing("poDate"));
            None
        };
        let requested_delivery_date = optional_date(header, "requestedDeliveryDate", &mut errors);

        if document.lines.is_empty() {
            errors.push(ValidationError::Constraint {
                field: "lines".to_string(),
                message: "a purchase order must have at least one line item".to_string(),
                line: None,
            });
        }

        let lines: Vec<CanonicalOrderLine> = document
            .lines
            .iter()
            .enumerate()
            .filter_map(|(i, raw)| build_line(i + 1, raw, &mut errors))
            .collect();

        let attributes: BTreeMap<String, String> = header
            .iter()
            .filter(|(k, _)| !HEADER_FIELDS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if !attributes.is_empty() {
            debug!(fields = ?attributes.keys().collect::<Vec<_>>(), "header fields kept as attributes");
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        // All required pieces are present once `errors` is empty
        match (po_number, purchase_order_type, ship_to_name, po_date) {
            (Some(po_number), Some(purchase_order_type), Some(ship_to_name), Some(po_date)) => {
                Ok(CanonicalOrder {
                    correlation_id: context.correlation_id,
                    retailer_id: context.retailer_id.to_uppercase(),
                    po_number,
                    purchase_order_type,
                    po_date,
                    requested_delivery_date,
                    ship_to_name,
                    ship_to_address: optional_text(header, "shipToAddress"),
                    ship_to_city: optional_text(header, "shipToCity"),
                    ship_to_state: optional_text(header, "shipToState"),
                    ship_to_zip: optional_text(header, "shipToZip"),
                    department_number: optional_text(header, "departmentNumber"),
                    lines,
                    interchange_control_number: context.interchange_control_number,
                    transaction_control_number: context.transaction_control_number,
                    attributes,
                })
            }
            _ => Err(vec![ValidationError::missing("poNumber")]),
        }
    }

    pub fn total_units(&self) -> i64 {
        self.lines.iter().map(|l| l.quantity_ordered).sum()
    }

    pub fn order_value(&self) -> f64 {
        self.lines.iter().map(|l| l.line_total()).sum()
    }
}

fn build_line(
    sequence: usize,
    raw: &BTreeMap<String, String>,
    errors: &mut Vec<ValidationError>,
) -> Option<CanonicalOrderLine> {
    let line = Some(sequence);
    let before = errors.len();

    let sku = required_text(raw, "sku", line, errors);
    let unit_of_measure = required_text(raw, "unitOfMeasure", line, errors);

    let quantity = match raw.get("quantityOrdered").map(|v| v.trim()) {
        None | Some("") => {
            errors.push(ValidationError::missing_on_line("quantityOrdered", sequence));
            None
        }
        Some(text) => match parse_quantity(text) {
            Some(q) if q >= 1 => Some(q),
            Some(q) => {
                errors.push(ValidationError::Constraint {
                    field: "quantityOrdered".to_string(),
                    message: format!("ordered quantity must be at least 1, got {}", q),
                    line,
                });
                None
            }
            None => {
                errors.push(invalid("quantityOrdered", text, "an integer", line));
                None
            }
        },
    };

    let unit_price = match raw.get("unitPrice").map(|v| v.trim()) {
        None | Some("") => {
            errors.push(ValidationError::missing_on_line("unitPrice", sequence));
            None
        }
        Some(text) => match text.parse::<f64>() {
            Ok(p) if p.is_finite() && p > 0.0 => Some(p),
            Ok(_) => {
                errors.push(ValidationError::Constraint {
                    field: "unitPrice".to_string(),
                    message: format!("unit price must be positive, got {}", text),
                    line,
                });
                None
            }
            Err(_) => {
                errors.push(invalid("unitPrice", text, "a decimal number", line));
                None
            }
        },
    };

    if errors.len() > before {
        return None;
    }

    Some(CanonicalOrderLine {
        line_sequence_number: sequence,
        sku: sku?,
        quantity_ordered: quantity?,
        unit_of_measure: unit_of_measure?,
        unit_price: unit_price?,
        product_description: optional_text(raw, "productDescription"),
    })
}

// ============================================================================
// COERCION HELPERS
// ============================================================================

/// X12 quantities are R (decimal) on the wire; whole numbers only here ("120", "120.0")
fn parse_quantity(text: &str) -> Option<i64> {
    if let Ok(q) = text.parse::<i64>() {
        return Some(q);
    }
    text.parse::<f64>()
        .ok()
        .filter(|q| q.is_finite() && q.fract() == 0.0)
        .map(|q| q as i64)
}

pub fn parse_edi_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text.trim(), EDI_DATE_FORMAT).ok()
}

fn required_text(
    fields: &BTreeMap<String, String>,
    name: &str,
    line: Option<usize>,
    errors: &mut Vec<ValidationError>,
) -> Option<String> {
    match optional_text(fields, name) {
        Some(value) => Some(value),
        None => {
            errors.push(match line {
                Some(n) => ValidationError::missing_on_line(name, n),
                None => ValidationError::missing(name),
            });
            None
        }
    }
}

fn optional_text(fields: &BTreeMap<String, String>, name: &str) -> Option<String> {
    fields
        .get(name)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn optional_date(
    fields: &BTreeMap<String, String>,
    name: &str,
    errors: &mut Vec<ValidationError>,
) -> Option<NaiveDate> {
    let text = optional_text(fields, name)?;
    match parse_edi_date(&text) {
        Some(date) => Some(date),
        None => {
            errors.push(invalid(name, &text, "a date in CCYYMMDD form", None));
            None
        }
    }
}

fn invalid(field: &str, value: &str, expected: &str, line: Option<usize>) -> ValidationError {
    ValidationError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        expected: expected.to_string(),
        line,
    }
}

// ============================================================================
// TESTS
// ============================================================================
