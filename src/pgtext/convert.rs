use crate::data::osm::EntityKind;

/// Conversion from the raw decoded text of an array element to a typed value.
///
/// `null_value` supplies the representation of both the unquoted `NULL` token
/// and SQL NULL, which have no raw text to convert.
pub trait TypeConversion: Default {
    type Output;

    fn convert(&self, raw: &str) -> Result<Self::Output, String>;

    fn null_value(&self) -> Self::Output;
}

/// Identity conversion, NULL becomes the empty string.
#[derive(Debug, Default)]
pub struct StringConversion;

impl TypeConversion for StringConversion {
    type Output = String;

    fn convert(&self, raw: &str) -> Result<String, String> {
        Ok(raw.to_string())
    }

    fn null_value(&self) -> String {
        String::new()
    }
}

/// Base-10 conversion to i64 with `strtoll` semantics: leading whitespace and
/// an optional sign are accepted, parsing stops at the first non-digit, and
/// input without a leading number yields 0 rather than an error.
#[derive(Debug, Default)]
pub struct Int64Conversion;

impl TypeConversion for Int64Conversion {
    type Output = i64;

    fn convert(&self, raw: &str) -> Result<i64, String> {
        Ok(parse_i64_prefix(raw))
    }

    fn null_value(&self) -> i64 {
        0
    }
}

/// Conversion of the single-character item type tag (`n`/`w`/`r`) used in the
/// `member_types` column. Unknown single characters map to
/// [`EntityKind::Undefined`]; longer input is malformed.
#[derive(Debug, Default)]
pub struct ItemTypeConversion;

impl TypeConversion for ItemTypeConversion {
    type Output = EntityKind;

    fn convert(&self, raw: &str) -> Result<EntityKind, String> {
        let mut chars = raw.chars();
        let first = chars.next();
        if chars.next().is_some() {
            return Err(format!("\"{}\" is not a valid item type encoding", raw));
        }
        Ok(match first {
            Some('n') => EntityKind::Node,
            Some('w') => EntityKind::Way,
            Some('r') => EntityKind::Relation,
            _ => EntityKind::Undefined,
        })
    }

    fn null_value(&self) -> EntityKind {
        EntityKind::Undefined
    }
}

/// Parse the longest leading integer of `s`, saturating on overflow and
/// returning 0 if no digits are found.
pub fn parse_i64_prefix(s: &str) -> i64 {
    let mut chars = s.trim_start().chars().peekable();
    let negative = match chars.peek() {
        Some('-') => {
            chars.next();
            true
        }
        Some('+') => {
            chars.next();
            false
        }
        _ => false,
    };
    let mut value: i64 = 0;
    for c in chars {
        let digit = match c.to_digit(10) {
            Some(d) => d as i64,
            None => break,
        };
        value = match value.checked_mul(10).and_then(|v| {
            if negative {
                v.checked_sub(digit)
            } else {
                v.checked_add(digit)
            }
        }) {
            Some(v) => v,
            None => return if negative { i64::MIN } else { i64::MAX },
        };
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int64_parses_plain_numbers() {
        assert_eq!(Int64Conversion.convert("1514"), Ok(1514));
        assert_eq!(Int64Conversion.convert("-42"), Ok(-42));
        assert_eq!(Int64Conversion.convert("  77"), Ok(77));
    }

    #[test]
    fn int64_is_tolerant_like_strtoll() {
        assert_eq!(Int64Conversion.convert("abc"), Ok(0));
        assert_eq!(Int64Conversion.convert(""), Ok(0));
        assert_eq!(Int64Conversion.convert("12abc"), Ok(12));
        assert_eq!(
            Int64Conversion.convert("999999999999999999999999"),
            Ok(i64::MAX)
        );
    }

    #[test]
    fn item_type_tags() {
        assert_eq!(ItemTypeConversion.convert("n"), Ok(EntityKind::Node));
        assert_eq!(ItemTypeConversion.convert("w"), Ok(EntityKind::Way));
        assert_eq!(ItemTypeConversion.convert("r"), Ok(EntityKind::Relation));
        assert_eq!(ItemTypeConversion.convert("x"), Ok(EntityKind::Undefined));
        assert!(ItemTypeConversion.convert("nw").is_err());
        assert_eq!(ItemTypeConversion.null_value(), EntityKind::Undefined);
    }
}
