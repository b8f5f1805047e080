// 📄 X12 Reader - Interchange → Groups → Transactions
// Reads delimiters from the fixed-width ISA header, splits segments, and
// walks the ISA/GS/ST envelopes. Structural problems become MalformedSegment;
// nothing is repaired here.

use serde::Serialize;
use tracing::debug;

use crate::error::{EdiError, Result};

/// The ISA segment is fixed width; delimiters sit at fixed offsets.
pub const ISA_LENGTH: usize = 106;
const ELEMENT_DELIMITER_OFFSET: usize = 3;
const COMPONENT_SEPARATOR_OFFSET: usize = 104;
const SEGMENT_TERMINATOR_OFFSET: usize = 105;

const ISA_MIN_ELEMENTS: usize = 16;
const GS_MIN_ELEMENTS: usize = 8;
const ST_MIN_ELEMENTS: usize = 2;

// ============================================================================
// CORE TYPES
// ============================================================================

/// One segment. `line` is its 1-based position in the interchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub id: String,
    pub elements: Vec<String>,
    pub line: usize,
    /// Segment text as received, without terminator
    pub raw: String,
}

impl Segment {
    pub fn parse(raw: &str, element_delimiter: char, line: usize) -> Self {
        let mut parts = raw.split(element_delimiter);
        let id = parts.next().unwrap_or_default().trim().to_string();
        Segment {
            id,
            elements: parts.map(str::to_string).collect(),
            line,
            raw: raw.to_string(),
        }
    }

    /// 1-based element (BEG03 = 3); empty string when out of range
    pub fn element(&self, position: usize) -> &str {
        position
            .checked_sub(1)
            .and_then(|i| self.elements.get(i))
            .map(String::as_str)
            .unwrap_or("")
    }

    /// X12 reference notation, e.g. "BEG03"
    pub fn reference(&self, position: usize) -> String {
        format!("{}{:02}", self.id, position)
    }
}

/// ST...SE. `segments` holds the body, without the ST and SE envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub transaction_set_code: String,
    pub control_number: String,
    pub segments: Vec<Segment>,
}

impl Transaction {
    pub fn find_first(&self, id: &str) -> Option<&Segment> {
        self.segments.iter().find(|s| s.id == id)
    }

    pub fn find_all<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Segment> + 'a {
        self.segments.iter().filter(move |s| s.id == id)
    }

    /// Body segments as received, the input the mapping engine expects
    pub fn raw_segments(&self) -> Vec<&str> {
        self.segments.iter().map(|s| s.raw.as_str()).collect()
    }
}

/// GS...GE
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionalGroup {
    pub functional_id: String,
    pub sender_code: String,
    pub receiver_code: String,
    pub control_number: String,
    pub transactions: Vec<Transaction>,
}

/// ISA...IEA
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Interchange {
    pub sender_id: String,
    pub receiver_id: String,
    pub date: String,
    pub time: String,
    pub control_number: String,
    pub element_delimiter: char,
    pub component_separator: char,
    pub segment_terminator: char,
    pub groups: Vec<FunctionalGroup>,
}

impl Interchange {
    pub fn transactions(&self) -> impl Iterator<Item = &Transaction> {
        self.groups.iter().flat_map(|g| g.transactions.iter())
    }

    pub fn first_transaction(&self) -> Result<&Transaction> {
        self.transactions()
            .next()
            .ok_or_else(|| EdiError::malformed("ST", 0, "no ST transaction found in interchange"))
    }
}

// ============================================================================
// READER
// ============================================================================

/// Parse raw X12 content into its envelope tree.
pub fn read_interchange(raw: &str) -> Result<Interchange> {
    if raw.trim().is_empty() {
        return Err(EdiError::malformed("ISA", 0, "EDI content is empty"));
    }

    let normalized = raw.replace("\r\n", "\n").replace('\r', "\n");
    let content = normalized.trim_start_matches('\u{feff}').trim_start();

    let header: Vec<char> = content.chars().take(ISA_LENGTH).collect();
    if header.len() < ISA_LENGTH {
        return Err(EdiError::malformed(
            "ISA",
            1,
            format!("content too short to contain an ISA segment (min {} chars)", ISA_LENGTH),
        ));
    }

    let element_delimiter = header[ELEMENT_DELIMITER_OFFSET];
    let component_separator = header[COMPONENT_SEPARATOR_OFFSET];
    let segment_terminator = header[SEGMENT_TERMINATOR_OFFSET];

    debug!(
        element = %element_delimiter,
        component = %component_separator,
        terminator = %segment_terminator.escape_debug(),
        "detected X12 delimiters"
    );

    let segments: Vec<Segment> = content
        .split(segment_terminator)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .enumerate()
        .map(|(i, s)| Segment::parse(s, element_delimiter, i + 1))
        .collect();

    build_interchange(segments, element_delimiter, component_separator, segment_terminator)
}

fn build_interchange(
    segments: Vec<Segment>,
    element_delimiter: char,
    component_separator: char,
    segment_terminator: char,
) -> Result<Interchange> {
    let mut interchange: Option<Interchange> = None;
    let mut group: Option<FunctionalGroup> = None;
    let mut transaction: Option<Transaction> = None;

    for segment in segments {
        match segment.id.as_str() {
            "ISA" => {
                if interchange.is_some() {
                    return Err(EdiError::malformed("ISA", segment.line, "nested ISA envelope"));
                }
                require_elements(&segment, ISA_MIN_ELEMENTS)?;
                interchange = Some(Interchange {
                    sender_id: segment.element(6).trim().to_string(),
                    receiver_id: segment.element(8).trim().to_string(),
                    date: segment.element(9).to_string(),
                    time: segment.element(10).to_string(),
                    control_number: segment.element(13).to_string(),
                    element_delimiter,
                    component_separator,
                    segment_terminator,
                    groups: Vec::new(),
                });
            }
            "GS" => {
                require_open(interchange.is_some(), &segment, "ISA")?;
                if group.is_some() {
                    return Err(EdiError::malformed("GS", segment.line, "GS before the previous GE"));
                }
                require_elements(&segment, GS_MIN_ELEMENTS)?;
                group = Some(FunctionalGroup {
                    functional_id: segment.element(1).to_string(),
                    sender_code: segment.element(2).to_string(),
                    receiver_code: segment.element(3).to_string(),
                    control_number: segment.element(6).to_string(),
                    transactions: Vec::new(),
                });
            }
            "ST" => {
                require_open(group.is_some(), &segment, "GS")?;
                if transaction.is_some() {
                    return Err(EdiError::malformed("ST", segment.line, "ST before the previous SE"));
                }
                require_elements(&segment, ST_MIN_ELEMENTS)?;
                transaction = Some(Transaction {
                    transaction_set_code: segment.element(1).trim().to_string(),
                    control_number: segment.element(2).trim().to_string(),
                    segments: Vec::new(),
                });
            }
            "SE" => {
                let done = transaction.take().ok_or_else(|| {
                    EdiError::malformed("SE", segment.line, "SE without a matching ST")
                })?;
                match group.as_mut() {
                    Some(g) => g.transactions.push(done),
                    None => return Err(outside("SE", segment.line, "GS")),
                }
            }
            "GE" => {
                if transaction.is_some() {
                    return Err(EdiError::malformed("GE", segment.line, "GE before SE closed the transaction"));
                }
                let done = group.take().ok_or_else(|| outside("GE", segment.line, "GS"))?;
                match interchange.as_mut() {
                    Some(i) => i.groups.push(done),
                    None => return Err(outside("GE", segment.line, "ISA")),
                }
            }
            "IEA" => {
                require_open(interchange.is_some(), &segment, "ISA")?;
            }
            _ => match transaction.as_mut() {
                Some(t) => t.segments.push(segment),
                None => debug!(segment = %segment.id, line = segment.line, "segment outside ST/SE ignored"),
            },
        }
    }

    if let Some(open) = transaction {
        return Err(EdiError::malformed(
            "ST",
            0,
            format!("transaction {} has no SE trailer", open.control_number),
        ));
    }

    interchange.ok_or_else(|| EdiError::malformed("ISA", 0, "no ISA segment found in EDI content"))
}

fn require_elements(segment: &Segment, min: usize) -> Result<()> {
    if segment.elements.len() < min {
        return Err(EdiError::malformed(
            &segment.id,
            segment.line,
            format!(
                "expected at least {} elements but found {}",
                min,
                segment.elements.len()
            ),
        ));
    }
    Ok(())
}

fn require_open(open: bool, segment: &Segment, envelope: &str) -> Result<()> {
    if open {
        Ok(())
    } else {
        Err(outside(&segment.id, segment.line, envelope))
    }
}

fn outside(segment_id: &str, line: usize, envelope: &str) -> EdiError {
    EdiError::malformed(
        segment_id,
        line,
        format!("segment outside of {} envelope", envelope),
    )
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_TARGET_850: &str = "ISA*00*          *00*          *ZZ*TARGET         *ZZ*VENDORABC      *260219*1200*^*00501*000000042*0*P*>~GS*PO*TGTBUY*VENDORABC*20260219*1200*42*X*005010~ST*850*0001~BEG*00*SA*TGT-2026-00042**20260219~REF*DP*042~DTM*002*20260305~N1*ST*Target Store #1742*92*1742~N3*700 Nicollet Mall~N4*Minneapolis*MN*55402~PO1*1*120*EA*24.99**UI*089541234567~PO1*2*60*EA*49.99**UI*089599876543~CTT*2~SE*11*0001~GE*1*42~IEA*1*000000042~";

    #[test]
    fn test_isa_envelope() {
        let interchange = read_interchange(SAMPLE_TARGET_850).unwrap();

        assert_eq!(interchange.sender_id, "TARGET");
        assert_eq!(interchange.receiver_id, "VENDORABC");
        assert_eq!(interchange.control_number, "000000042");
        assert_eq!(interchange.element_delimiter, '*');
        assert_eq!(interchange.component_separator, '>');
        assert_eq!(interchange.segment_terminator, '~');
        println!("✅ ISA envelope test PASSED");
    }

    #[test]
    fn test_byte_order_mark_is_ignored() {
        let with_bom = format!("\u{feff}{}", SAMPLE_TARGET_850);
        let interchange = read_interchange(&with_bom).unwrap();
        assert_eq!(interchange.sender_id, "TARGET");
        assert_eq!(interchange.first_transaction().unwrap().segments.len(), 9);
    }

    #[test]
    fn test_group_and_transaction() {
        let interchange = read_interchange(SAMPLE_TARGET_850).unwrap();

        assert_eq!(interchange.groups.len(), 1);
        assert_eq!(interchange.groups[0].functional_id, "PO");
        assert_eq!(interchange.groups[0].control_number, "42");

        let transaction = interchange.first_transaction().unwrap();
        assert_eq!(transaction.transaction_set_code, "850");
        assert_eq!(transaction.control_number, "0001");
        // BEG REF DTM N1 N3 N4 PO1 PO1 CTT
        assert_eq!(transaction.segments.len(), 9);
    }

    #[test]
    fn test_segment_extraction() {
        let interchange = read_interchange(SAMPLE_TARGET_850).unwrap();
        let transaction = interchange.first_transaction().unwrap();

        let beg = transaction.find_first("BEG").unwrap();
        assert_eq!(beg.element(3), "TGT-2026-00042");
        assert_eq!(beg.element(5), "20260219");
        assert_eq!(beg.element(99), "");

        let n1 = transaction.find_first("N1").unwrap();
        assert_eq!(n1.element(1), "ST");
        assert_eq!(n1.element(2), "Target Store #1742");

        let lines: Vec<&Segment> = transaction.find_all("PO1").collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].element(2), "120");
        assert_eq!(lines[0].element(7), "089541234567");
        assert_eq!(lines[1].element(4), "49.99");
    }

    #[test]
    fn test_segment_parsing() {
        let seg = Segment::parse("BEG*00*SA*TGT-2026-00042**20260219", '*', 1);
        assert_eq!(seg.id, "BEG");
        assert_eq!(seg.element(0), "");
        assert_eq!(seg.element(4), "");
        assert_eq!(seg.element(5), "20260219");
        assert_eq!(seg.reference(3), "BEG03");
        assert_eq!(seg.reference(10), "BEG10");
    }

    #[test]
    fn test_newline_separated_segments() {
        let with_newlines = SAMPLE_TARGET_850.replace('~', "~\r\n");
        let interchange = read_interchange(&with_newlines).unwrap();
        assert_eq!(interchange.first_transaction().unwrap().segments.len(), 9);
    }

    #[test]
    fn test_empty_and_short_content() {
        let err = read_interchange("   ").unwrap_err();
        assert!(err.to_string().contains("empty"));

        let err = read_interchange("ISA*too-short").unwrap_err();
        assert!(matches!(err, EdiError::MalformedSegment { ref segment_id, .. } if segment_id == "ISA"));
        assert!(err.to_string().contains("too short"));
    }

    #[test]
    fn test_structural_errors() {
        let no_se = SAMPLE_TARGET_850.replace("SE*11*0001~", "");
        let err = read_interchange(&no_se).unwrap_err();
        assert!(matches!(err, EdiError::MalformedSegment { .. }));

        let short_st = SAMPLE_TARGET_850.replace("ST*850*0001~", "ST*850~");
        let err = read_interchange(&short_st).unwrap_err();
        assert!(err.to_string().contains("expected at least 2 elements"));

        let no_gs = SAMPLE_TARGET_850
            .replace("GS*PO*TGTBUY*VENDORABC*20260219*1200*42*X*005010~", "")
            .replace("GE*1*42~", "");
        let err = read_interchange(&no_gs).unwrap_err();
        assert!(err.to_string().contains("outside of GS envelope"));
    }

    #[test]
    fn test_no_transaction() {
        let empty_group = SAMPLE_TARGET_850
            .split("ST*850")
            .next()
            .unwrap()
            .to_string()
            + "GE*0*42~IEA*1*000000042~";
        let interchange = read_interchange(&empty_group).unwrap();
        assert!(interchange.first_transaction().is_err());
    }
}
