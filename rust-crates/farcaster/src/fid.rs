//! FID extraction from loosely shaped listing records.

use serde_json::Value;

#[derive(Clone, Copy, Debug)]
enum FieldKind {
    Number,
    Text,
}

#[derive(Clone, Copy, Debug)]
struct FidRule {
    pointer: &'static str,
    kind: FieldKind,
}

impl FidRule {
    /// `None` when the field is absent or of another type. `Some(None)` when
    /// the field has the rule's type but holds no usable identifier.
    fn apply(&self, record: &Value) -> Option<Option<u64>> {
        let field = record.pointer(self.pointer)?;
        match self.kind {
            FieldKind::Number if field.is_number() => Some(whole_number(field)),
            FieldKind::Text => field.as_str().map(parse_leading_integer),
            FieldKind::Number => None,
        }
    }
}

/// Evaluated top to bottom; the first rule whose field type matches decides.
const FID_RULES: [FidRule; 4] = [
    FidRule {
        pointer: "/fid",
        kind: FieldKind::Number,
    },
    FidRule {
        pointer: "/fid",
        kind: FieldKind::Text,
    },
    FidRule {
        pointer: "/user/fid",
        kind: FieldKind::Number,
    },
    FidRule {
        pointer: "/user/fid",
        kind: FieldKind::Text,
    },
];

/// Returns the record's FID, or `None` when no rule matches or the deciding
/// field is unusable. Zero is not a valid FID.
pub fn extract_fid(record: &Value) -> Option<u64> {
    FID_RULES
        .iter()
        .find_map(|rule| rule.apply(record))
        .flatten()
        .filter(|fid| *fid > 0)
}

/// JSON numbers written as `42.0` still count; fractions and negatives do not.
fn whole_number(field: &Value) -> Option<u64> {
    field.as_u64().or_else(|| {
        field
            .as_f64()
            .filter(|n| n.fract() == 0.0 && *n >= 0.0 && *n < u64::MAX as f64)
            .map(|n| n as u64)
    })
}

/// Leading-digits parse: surrounding whitespace and trailing garbage are ignored.
fn parse_leading_integer(raw: &str) -> Option<u64> {
    let trimmed = raw.trim_start();
    let trimmed = trimmed.strip_prefix('+').unwrap_or(trimmed);
    let end = trimmed
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, _)| i)
        .unwrap_or(trimmed.len());
    trimmed[..end].parse().ok()
}
