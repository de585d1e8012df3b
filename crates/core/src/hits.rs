//! Tabular search output parsing.
//!
//! Search tasks write one hit per line with [`HIT_FIELDS`] in order. Output
//! is stored raw and parsed only when read. Parsing is strict: a line with
//! the wrong number of columns, or a non-numeric value in a numeric column,
//! fails the whole read instead of being skipped.

use std::io::BufRead;

use serde::Serialize;

/// Output columns, in order, as passed to `-outfmt`.
pub const HIT_FIELDS: [&str; 27] = [
    "qaccver",
    "saccver",
    "pident",
    "length",
    "mismatch",
    "gapopen",
    "qstart",
    "qend",
    "sstart",
    "send",
    "evalue",
    "bitscore",
    "score",
    "qlen",
    "slen",
    "nident",
    "positive",
    "gaps",
    "ppos",
    "qcovs",
    "qcovhsp",
    "staxids",
    "sscinames",
    "scomnames",
    "sblastnames",
    "sskingdoms",
    "stitle",
];

/// Number of columns every output line must have.
pub const HIT_FIELD_COUNT: usize = HIT_FIELDS.len();

/// Sentinel the tool prints for a value it could not compute.
pub const MISSING_VALUE: &str = "N/A";

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("line {line}: expected {expected} fields, found {actual}")]
    FieldCount {
        line: usize,
        expected: usize,
        actual: usize,
    },

    #[error("line {line}: field '{field}' expects a number, got '{value}'")]
    InvalidNumber {
        line: usize,
        field: &'static str,
        value: String,
    },

    #[error("failed to read output: {0}")]
    Io(#[from] std::io::Error),
}

/// One parsed hit. Every column is optional: blank and `N/A` values parse
/// as `None`, never as zero.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HitRecord {
    pub query_accession: Option<String>,
    pub subject_accession: Option<String>,
    pub percent_identity: Option<f64>,
    pub alignment_length: Option<i64>,
    pub mismatches: Option<i64>,
    pub gap_opens: Option<i64>,
    pub query_start: Option<i64>,
    pub query_end: Option<i64>,
    pub subject_start: Option<i64>,
    pub subject_end: Option<i64>,
    pub evalue: Option<f64>,
    pub bit_score: Option<f64>,
    pub raw_score: Option<i64>,
    pub query_length: Option<i64>,
    pub subject_length: Option<i64>,
    pub identical: Option<i64>,
    pub positives: Option<i64>,
    pub gaps: Option<i64>,
    pub percent_positives: Option<f64>,
    pub query_coverage: Option<f64>,
    pub query_coverage_hsp: Option<f64>,
    pub subject_tax_ids: Option<String>,
    pub subject_scientific_names: Option<String>,
    pub subject_common_names: Option<String>,
    pub subject_blast_names: Option<String>,
    pub subject_super_kingdoms: Option<String>,
    pub subject_title: Option<String>,
}

/// Records read from one output, plus how many were collected.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HitSet {
    pub records: Vec<HitRecord>,
    pub count: usize,
}

/// Column accessor that coerces by declared type.
struct Columns<'a> {
    values: Vec<&'a str>,
    line: usize,
}

impl<'a> Columns<'a> {
    fn raw(&self, index: usize) -> Option<&'a str> {
        let value: &'a str = self.values[index];
        let value = value.trim();
        (!value.is_empty() && value != MISSING_VALUE).then_some(value)
    }

    fn text(&self, index: usize) -> Option<String> {
        self.raw(index).map(str::to_string)
    }

    fn int(&self, index: usize) -> Result<Option<i64>, ParseError> {
        self.number(index)
    }

    /// `NaN` and infinities are words, not measurements.
    fn real(&self, index: usize) -> Result<Option<f64>, ParseError> {
        match self.number::<f64>(index)? {
            Some(value) if !value.is_finite() => Err(self.invalid(index)),
            value => Ok(value),
        }
    }

    fn number<T: std::str::FromStr>(&self, index: usize) -> Result<Option<T>, ParseError> {
        self.raw(index)
            .map(|value| value.parse::<T>().map_err(|_| self.invalid(index)))
            .transpose()
    }

    fn invalid(&self, index: usize) -> ParseError {
        ParseError::InvalidNumber {
            line: self.line,
            field: HIT_FIELDS[index],
            value: self.values[index].trim().to_string(),
        }
    }
}

/// Parse one output line. `line_no` is only used in error messages.
pub fn parse_hit_line(
    line: &str,
    delimiter: char,
    line_no: usize,
) -> Result<HitRecord, ParseError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let values: Vec<&str> = line.split(delimiter).collect();
    if values.len() != HIT_FIELD_COUNT {
        return Err(ParseError::FieldCount {
            line: line_no,
            expected: HIT_FIELD_COUNT,
            actual: values.len(),
        });
    }
    let c = Columns {
        values,
        line: line_no,
    };

    Ok(HitRecord {
        query_accession: c.text(0),
        subject_accession: c.text(1),
        percent_identity: c.real(2)?,
        alignment_length: c.int(3)?,
        mismatches: c.int(4)?,
        gap_opens: c.int(5)?,
        query_start: c.int(6)?,
        query_end: c.int(7)?,
        subject_start: c.int(8)?,
        subject_end: c.int(9)?,
        evalue: c.real(10)?,
        bit_score: c.real(11)?,
        raw_score: c.int(12)?,
        query_length: c.int(13)?,
        subject_length: c.int(14)?,
        identical: c.int(15)?,
        positives: c.int(16)?,
        gaps: c.int(17)?,
        percent_positives: c.real(18)?,
        query_coverage: c.real(19)?,
        query_coverage_hsp: c.real(20)?,
        subject_tax_ids: c.text(21),
        subject_scientific_names: c.text(22),
        subject_common_names: c.text(23),
        subject_blast_names: c.text(24),
        subject_super_kingdoms: c.text(25),
        subject_title: c.text(26),
    })
}

/// Parse a whole output, skipping blank lines and stopping after `limit`
/// records when one is given.
pub fn parse_hits<R: BufRead>(
    reader: R,
    delimiter: char,
    limit: Option<usize>,
) -> Result<HitSet, ParseError> {
    let mut records = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        if limit.is_some_and(|max| records.len() >= max) {
            break;
        }
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(parse_hit_line(&line, delimiter, index + 1)?);
    }
    let count = records.len();
    Ok(HitSet { records, count })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn sample_fields() -> Vec<&'static str> {
        vec![
            "NM_000546.6",
            "NC_000017.11",
            "99.52",
            "420",
            "2",
            "0",
            "1",
            "420",
            "7687490",
            "7687071",
            "1e-180",
            "771",
            "417",
            "420",
            "83257441",
            "418",
            "418",
            "0",
            "99.52",
            "100",
            "100",
            "9606",
            "Homo sapiens",
            "human",
            "primates",
            "Eukaryota",
            "Homo sapiens chromosome 17",
        ]
    }

    fn sample_line(delimiter: char) -> String {
        sample_fields().join(&delimiter.to_string())
    }

    #[test]
    fn well_formed_line_parses() {
        let hit = parse_hit_line(&sample_line('\t'), '\t', 1).expect("parse");
        assert_eq!(hit.query_accession.as_deref(), Some("NM_000546.6"));
        assert_eq!(hit.subject_accession.as_deref(), Some("NC_000017.11"));
        assert_eq!(hit.query_start, Some(1));
        assert_eq!(hit.query_end, Some(420));
        assert_eq!(hit.subject_start, Some(7687490));
        assert_eq!(hit.subject_end, Some(7687071));
        assert_eq!(hit.percent_identity, Some(99.52));
        assert_eq!(hit.evalue, Some(1e-180));
        assert_eq!(hit.subject_title.as_deref(), Some("Homo sapiens chromosome 17"));
    }

    #[test]
    fn na_numeric_field_is_absent() {
        let mut fields = sample_fields();
        fields[2] = "N/A";
        fields[12] = "";
        let hit = parse_hit_line(&fields.join("\t"), '\t', 1).expect("parse");
        assert_eq!(hit.percent_identity, None);
        assert_eq!(hit.raw_score, None);
        assert_eq!(hit.alignment_length, Some(420));
    }

    #[test]
    fn na_text_field_is_absent() {
        let mut fields = sample_fields();
        fields[23] = "N/A";
        let hit = parse_hit_line(&fields.join("\t"), '\t', 1).expect("parse");
        assert_eq!(hit.subject_common_names, None);
    }

    #[test]
    fn too_few_fields_rejected() {
        let fields = &sample_fields()[..26];
        let err = parse_hit_line(&fields.join("\t"), '\t', 3).unwrap_err();
        assert_matches!(
            err,
            ParseError::FieldCount {
                line: 3,
                expected: 27,
                actual: 26
            }
        );
    }

    #[test]
    fn too_many_fields_rejected() {
        let mut fields = sample_fields();
        fields.push("extra");
        let err = parse_hit_line(&fields.join("\t"), '\t', 1).unwrap_err();
        assert_matches!(err, ParseError::FieldCount { actual: 28, .. });
        assert!(err.to_string().contains("expected 27 fields, found 28"));
    }

    #[test]
    fn non_numeric_value_rejected() {
        let mut fields = sample_fields();
        fields[6] = "one";
        let err = parse_hit_line(&fields.join("\t"), '\t', 1).unwrap_err();
        assert_matches!(
            &err,
            ParseError::InvalidNumber { field: "qstart", value, .. } if value == "one"
        );
    }

    #[test]
    fn non_finite_value_rejected() {
        for (index, word) in [(2, "NaN"), (10, "inf"), (11, "-infinity")] {
            let mut fields = sample_fields();
            fields[index] = word;
            let err = parse_hit_line(&fields.join("\t"), '\t', 4).unwrap_err();
            assert_matches!(
                &err,
                ParseError::InvalidNumber { line: 4, value, .. } if value == word
            );
        }
    }

    #[test]
    fn custom_delimiter() {
        let hit = parse_hit_line(&sample_line(','), ',', 1).expect("parse");
        assert_eq!(hit.gaps, Some(0));
    }

    #[test]
    fn crlf_line_endings_tolerated() {
        let line = format!("{}\r\n", sample_line('\t'));
        assert!(parse_hit_line(&line, '\t', 1).is_ok());
    }

    #[test]
    fn parse_hits_skips_blank_lines_and_counts() {
        let text = format!("{l}\n\n   \n{l}\n", l = sample_line('\t'));
        let set = parse_hits(text.as_bytes(), '\t', None).expect("parse");
        assert_eq!(set.count, 2);
        assert_eq!(set.records.len(), 2);
    }

    #[test]
    fn parse_hits_honours_limit() {
        let text = format!("{l}\n{l}\n{l}\n", l = sample_line('\t'));
        let set = parse_hits(text.as_bytes(), '\t', Some(2)).expect("parse");
        assert_eq!(set.count, 2);
    }

    #[test]
    fn parse_hits_fails_on_malformed_line() {
        let text = format!("{}\nbroken\tline\n", sample_line('\t'));
        let err = parse_hits(text.as_bytes(), '\t', None).unwrap_err();
        assert_matches!(err, ParseError::FieldCount { line: 2, actual: 2, .. });
    }

    #[test]
    fn empty_output_is_empty_set() {
        let set = parse_hits("".as_bytes(), '\t', None).expect("parse");
        assert_eq!(set.count, 0);
        assert!(set.records.is_empty());
    }

    #[test]
    fn hit_record_serializes_absent_as_null() {
        let mut fields = sample_fields();
        fields[2] = "N/A";
        let hit = parse_hit_line(&fields.join("\t"), '\t', 1).expect("parse");
        let json = serde_json::to_value(&hit).expect("serialize");
        assert!(json["percent_identity"].is_null());
        assert_eq!(json["query_start"], 1);
    }
}
