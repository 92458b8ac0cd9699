use super::ParseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Progress {
    None,
    Key,
    Separator,
    Value,
    End,
}

impl Progress {
    fn advance(self) -> Progress {
        match self {
            Progress::None => Progress::Key,
            Progress::Key => Progress::Separator,
            Progress::Separator => Progress::Value,
            Progress::Value => Progress::End,
            Progress::End => Progress::End,
        }
    }
}

/// Scanner over a PostgreSQL hstore literal (`"k"=>"v", ...`).
///
/// Yields the key/value pairs left to right. Keys and values may be quoted or
/// bare; only `"` and `\` are escapable, and there is no NULL token. `=` and
/// `>` are structural outside quotes and plain data inside them. The empty
/// literal yields no pairs.
pub struct HStoreParser<'a> {
    input: &'a str,
    pos: usize,
    done: bool,
}

impl<'a> HStoreParser<'a> {
    pub fn new(input: &'a str) -> HStoreParser<'a> {
        HStoreParser {
            input,
            pos: 0,
            done: false,
        }
    }

    fn error(&mut self, key: &[u8], value: &[u8], message: impl Into<String>) -> ParseError {
        self.done = true;
        let buffer = if value.is_empty() && !key.is_empty() { key } else { value };
        ParseError::new(self.input, self.pos, buffer, message)
    }

    fn parse_next(&mut self) -> Option<Result<(String, String), ParseError>> {
        let bytes = self.input.as_bytes();
        // Pair separators and padding before a key are structural.
        while self.pos < bytes.len() && matches!(bytes[self.pos], b' ' | b',') {
            self.pos += 1;
        }
        if self.pos >= bytes.len() {
            self.done = true;
            return None;
        }

        let mut key: Vec<u8> = Vec::new();
        let mut value: Vec<u8> = Vec::new();
        let mut progress = Progress::None;
        let mut quoted = false;
        let mut escaped = false;

        // Appends a character of a key or value. An escaped or ordinary data
        // character before a token has started opens the token.
        fn push(progress: &mut Progress, key: &mut Vec<u8>, value: &mut Vec<u8>, c: u8) {
            if matches!(*progress, Progress::None | Progress::Separator) {
                *progress = progress.advance();
            }
            match *progress {
                Progress::Key => key.push(c),
                Progress::Value => value.push(c),
                _ => {}
            }
        }

        while self.pos < bytes.len() && progress != Progress::End {
            let c = bytes[self.pos];
            if escaped {
                match c {
                    b'"' | b'\\' => {
                        push(&mut progress, &mut key, &mut value, c);
                        escaped = false;
                    }
                    _ => {
                        return Some(Err(self.error(
                            &key,
                            &value,
                            "is no valid escape sequence in a hstore key or value",
                        )))
                    }
                }
            } else if c == b'\\' {
                escaped = true;
            } else if c == b'=' {
                if !quoted && progress == Progress::Key {
                    progress = progress.advance();
                } else if !quoted && progress == Progress::Value {
                    return Some(Err(self.error(
                        &key,
                        &value,
                        "'=' is not allowed at the end of a value",
                    )));
                } else if quoted {
                    push(&mut progress, &mut key, &mut value, c);
                } else if progress == Progress::None {
                    return Some(Err(self.error(&key, &value, "'=' is not allowed there")));
                }
            } else if c == b'>' {
                if quoted {
                    push(&mut progress, &mut key, &mut value, c);
                } else if matches!(progress, Progress::Key | Progress::Value) {
                    return Some(Err(self.error(
                        &key,
                        &value,
                        "'>' is not allowed inside a key or a value without a preceding '='",
                    )));
                } else if progress != Progress::Separator {
                    return Some(Err(self.error(&key, &value, "'>' is not allowed there")));
                }
                // Inside the separator the '>' completes the '=>' arrow.
            } else if c == b'"' {
                match progress {
                    Progress::None | Progress::Separator => {
                        progress = progress.advance();
                        quoted = true;
                    }
                    Progress::Key | Progress::Value => {
                        progress = progress.advance();
                        quoted = false;
                    }
                    Progress::End => {
                        return Some(Err(self.error(&key, &value, "double '\"' inserted")))
                    }
                }
            } else if c == b' ' || c == b',' {
                // Spaces and commas end a bare token and are data in a quoted one.
                if matches!(progress, Progress::Key | Progress::Value) {
                    if quoted {
                        push(&mut progress, &mut key, &mut value, c);
                    } else {
                        progress = progress.advance();
                    }
                }
            } else {
                push(&mut progress, &mut key, &mut value, c);
            }
            self.pos += 1;
        }

        if escaped {
            return Some(Err(self.error(&key, &value, "unexpected end of input after '\\'")));
        }
        if quoted {
            return Some(Err(self.error(
                &key,
                &value,
                "unexpected end of input inside a quoted string",
            )));
        }
        if progress == Progress::End && self.pos < bytes.len() && bytes[self.pos] == b'"' {
            return Some(Err(self.error(&key, &value, "double '\"' inserted")));
        }

        let key = match String::from_utf8(key) {
            Ok(key) => key,
            Err(e) => {
                let bytes = e.into_bytes();
                return Some(Err(self.error(&bytes, &[], "key is not valid UTF-8")));
            }
        };
        let value = match String::from_utf8(value) {
            Ok(value) => value,
            Err(e) => {
                let bytes = e.into_bytes();
                return Some(Err(self.error(&[], &bytes, "value is not valid UTF-8")));
            }
        };
        Some(Ok((key, value)))
    }
}

impl<'a> Iterator for HStoreParser<'a> {
    type Item = Result<(String, String), ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        self.parse_next()
    }
}
