use super::convert::TypeConversion;
use super::ParseError;

/// Scanner over a PostgreSQL one-dimensional array literal (`{...}`).
///
/// Yields the elements left to right, converted through the chosen
/// [`TypeConversion`]. The braces are structural; quoting and the two-character
/// escape set (`\"`, `\\`) are honoured inside quoted elements, and the bare
/// token `NULL` maps to the conversion's null value.
pub struct ArrayParser<'a, C: TypeConversion> {
    input: &'a str,
    pos: usize,
    started: bool,
    done: bool,
    conversion: C,
}

impl<'a, C: TypeConversion> ArrayParser<'a, C> {
    pub fn new(input: &'a str) -> ArrayParser<'a, C> {
        ArrayParser {
            input,
            pos: 0,
            started: false,
            done: false,
            conversion: C::default(),
        }
    }

    fn error(&mut self, buffer: &[u8], message: impl Into<String>) -> ParseError {
        self.done = true;
        ParseError::new(self.input, self.pos, buffer, message)
    }

    fn convert(&mut self, buffer: Vec<u8>) -> Result<C::Output, ParseError> {
        let text = match String::from_utf8(buffer) {
            Ok(text) => text,
            Err(e) => {
                let bytes = e.into_bytes();
                return Err(self.error(&bytes, "element is not valid UTF-8"));
            }
        };
        self.conversion
            .convert(&text)
            .map_err(|message| self.error(text.as_bytes(), message))
    }

    fn parse_next(&mut self) -> Option<Result<C::Output, ParseError>> {
        let bytes = self.input.as_bytes();
        if !self.started {
            if bytes.first() != Some(&b'{') {
                return Some(Err(self.error(&[], "array literal must start with '{'")));
            }
            self.pos = 1;
            self.started = true;
        }
        // Skip element separators and padding before the next element.
        while self.pos < bytes.len() && matches!(bytes[self.pos], b',' | b' ') {
            self.pos += 1;
        }
        if self.pos >= bytes.len() {
            return Some(Err(self.error(&[], "unexpected end of input, array not terminated by '}'")));
        }
        if bytes[self.pos] == b'}' {
            self.done = true;
            return None;
        }

        let mut buffer: Vec<u8> = Vec::new();
        if bytes[self.pos] == b'"' {
            self.pos += 1;
            loop {
                if self.pos >= bytes.len() {
                    return Some(Err(self.error(&buffer, "unexpected end of input inside a quoted element")));
                }
                match bytes[self.pos] {
                    b'\\' => {
                        self.pos += 1;
                        if self.pos >= bytes.len() {
                            return Some(Err(self.error(&buffer, "unexpected end of input after '\\'")));
                        }
                        match bytes[self.pos] {
                            c @ (b'"' | b'\\') => buffer.push(c),
                            _ => return Some(Err(self.error(&buffer, "invalid escape sequence"))),
                        }
                        self.pos += 1;
                    }
                    b'"' => {
                        self.pos += 1;
                        break;
                    }
                    c => {
                        buffer.push(c);
                        self.pos += 1;
                    }
                }
            }
            Some(self.convert(buffer))
        } else {
            loop {
                if self.pos >= bytes.len() {
                    return Some(Err(self.error(&buffer, "unexpected end of input, array not terminated by '}'")));
                }
                match bytes[self.pos] {
                    // Unquoted spaces are padding, never data.
                    b' ' => self.pos += 1,
                    // The delimiter is left for the separator skip above.
                    b',' | b'}' => break,
                    c => {
                        buffer.push(c);
                        self.pos += 1;
                    }
                }
            }
            if buffer == b"NULL" {
                return Some(Ok(self.conversion.null_value()));
            }
            Some(self.convert(buffer))
        }
    }
}

impl<'a, C: TypeConversion> Iterator for ArrayParser<'a, C> {
    type Item = Result<C::Output, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        self.parse_next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pgtext::convert::{Int64Conversion, ItemTypeConversion, StringConversion};
    use crate::data::osm::EntityKind;

    fn parse_strings(input: &str) -> Vec<String> {
        ArrayParser::<StringConversion>::new(input)
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    fn parse_ints(input: &str) -> Vec<i64> {
        ArrayParser::<Int64Conversion>::new(input)
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn array_of_integers() {
        assert_eq!(parse_ints("{1,5,8,65,75,1514}"), vec![1, 5, 8, 65, 75, 1514]);
    }

    #[test]
    fn empty_array() {
        assert_eq!(parse_strings("{}"), Vec::<String>::new());
        assert_eq!(parse_strings("{ }"), Vec::<String>::new());
    }

    #[test]
    fn quoted_and_unquoted_elements() {
        assert_eq!(parse_strings("{\"an y\",ham}"), vec!["an y", "ham"]);
        assert_eq!(parse_strings("{ abc , def }"), vec!["abc", "def"]);
    }

    #[test]
    fn structural_characters_inside_quotes_are_data() {
        assert_eq!(parse_strings("{\"an}y\",\"ham\"}"), vec!["an}y", "ham"]);
        assert_eq!(parse_strings("{\"an{y\",\"a,b\"}"), vec!["an{y", "a,b"]);
    }

    #[test]
    fn escaped_quotes_and_backslashes() {
        assert_eq!(parse_strings(r#"{"an\"y"}"#), vec!["an\"y"]);
        assert_eq!(parse_strings(r#"{"an\\y"}"#), vec!["an\\y"]);
    }

    #[test]
    fn invalid_escape_sequence_is_fatal() {
        let result: Result<Vec<String>, _> =
            ArrayParser::<StringConversion>::new(r#"{"an\ny"}"#).collect();
        let error = result.unwrap_err();
        assert!(error.message.contains("invalid escape sequence"));
        assert_eq!(error.buffer, "an");
    }

    #[test]
    fn unterminated_quoted_element_is_fatal() {
        let result: Result<Vec<String>, _> =
            ArrayParser::<StringConversion>::new("{\"abc").collect();
        assert!(result.is_err());
    }

    #[test]
    fn unterminated_array_is_fatal() {
        let result: Result<Vec<i64>, _> = ArrayParser::<Int64Conversion>::new("{1,2").collect();
        assert!(result.is_err());
    }

    #[test]
    fn null_token_uses_the_conversions_null_value() {
        assert_eq!(parse_ints("{1,NULL,3}"), vec![1, 0, 3]);
        assert_eq!(parse_strings("{a,NULL,b}"), vec!["a", "", "b"]);
    }

    #[test]
    fn quoting_suppresses_null_interpretation() {
        assert_eq!(
            parse_strings("{\"1\",\"NULL\",\"3\"}"),
            vec!["1", "NULL", "3"]
        );
    }

    #[test]
    fn empty_quoted_string_is_a_valid_element() {
        assert_eq!(parse_strings("{\"\"}"), vec![""]);
        assert_eq!(parse_strings("{\"\",\"x\"}"), vec!["", "x"]);
    }

    #[test]
    fn item_type_elements() {
        let kinds: Vec<EntityKind> = ArrayParser::<ItemTypeConversion>::new("{w,n,r}")
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(
            kinds,
            vec![EntityKind::Way, EntityKind::Node, EntityKind::Relation]
        );
    }

    #[test]
    fn parser_stops_after_an_error() {
        let mut parser = ArrayParser::<StringConversion>::new("no braces");
        assert!(matches!(parser.next(), Some(Err(_))));
        assert!(parser.next().is_none());
    }
}
