//! Callback Scripts
//!
//! Cross-origin RPC endpoints answer with a script made of callback
//! invocations such as
//!
//! ```text
//! mythril.callbacks[4]({"total": 3});
//! mythril.callbacks[5](500, "Internal Server Error")
//! ```
//!
//! Only that statement form is understood; arguments are JSON values.

use crate::{CallbackTable, JsValue, ScriptError};

/// One parsed `path[index](args...)` statement
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub index: usize,
    pub args: Vec<JsValue>,
}

struct Cursor<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<u8> {
        self.src.as_bytes().get(self.pos).copied()
    }

    fn skip_separators(&mut self) {
        while let Some(b) = self.peek() {
            if b.is_ascii_whitespace() || b == b';' {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(|b| b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, byte: u8) -> Result<(), ScriptError> {
        self.skip_whitespace();
        if self.peek() == Some(byte) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.syntax(format!("expected '{}'", byte as char)))
        }
    }

    fn syntax(&self, message: String) -> ScriptError {
        ScriptError::Syntax { offset: self.pos, message }
    }

    fn index(&mut self) -> Result<usize, ScriptError> {
        self.skip_whitespace();
        let start = self.pos;
        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
            self.pos += 1;
        }
        self.src[start..self.pos]
            .parse()
            .map_err(|_| ScriptError::Syntax { offset: start, message: "expected slot index".into() })
    }

    /// Consume up to the `)` closing the argument list, returning the text
    /// between the parentheses.
    fn arguments(&mut self) -> Result<&'a str, ScriptError> {
        let start = self.pos;
        let bytes = self.src.as_bytes();
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;

        while let Some(&b) = bytes.get(self.pos) {
            if in_string {
                match b {
                    _ if escaped => escaped = false,
                    b'\\' => escaped = true,
                    b'"' => in_string = false,
                    _ => {}
                }
            } else {
                match b {
                    b'"' => in_string = true,
                    b'[' | b'{' | b'(' => depth += 1,
                    b']' | b'}' => depth = depth.saturating_sub(1),
                    b')' if depth == 0 => {
                        let args = &self.src[start..self.pos];
                        self.pos += 1;
                        return Ok(args);
                    }
                    b')' => depth -= 1,
                    _ => {}
                }
            }
            self.pos += 1;
        }
        Err(ScriptError::Syntax { offset: start, message: "unterminated argument list".into() })
    }
}

/// Parse every callback invocation in `source`, addressed through `path`
pub fn parse_callbacks(source: &str, path: &str) -> Result<Vec<Invocation>, ScriptError> {
    let mut cursor = Cursor { src: source, pos: 0 };
    let mut out = Vec::new();

    loop {
        cursor.skip_separators();
        if cursor.peek().is_none() {
            return Ok(out);
        }

        if !cursor.rest().starts_with(path) {
            let found: String = cursor.rest()
                .chars()
                .take_while(|c| *c != '(' && *c != ';' && *c != '\n')
                .take(40)
                .collect();
            return Err(ScriptError::UnknownCallee { offset: cursor.pos, found });
        }
        cursor.pos += path.len();

        cursor.expect(b'[')?;
        let index = cursor.index()?;
        cursor.expect(b']')?;
        cursor.expect(b'(')?;

        let args_offset = cursor.pos;
        let raw = cursor.arguments()?;
        let args: Vec<JsValue> = serde_json::from_str(&format!("[{}]", raw))
            .map_err(|source| ScriptError::Arguments { offset: args_offset, source })?;

        out.push(Invocation { index, args });
    }
}

/// Run a callback script against the table. The whole script is parsed
/// before any slot is called, so a malformed script has no effect.
/// Returns the number of slots actually invoked.
pub fn evaluate(source: &str, table: &CallbackTable) -> Result<usize, ScriptError> {
    let invocations = parse_callbacks(source, table.path())?;
    tracing::debug!("Evaluating {} callback invocation(s)", invocations.len());

    Ok(invocations
        .iter()
        .filter(|inv| table.invoke(inv.index, &inv.args))
        .count())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const PATH: &str = "mythril.callbacks";

    #[test]
    fn test_parse_single_call() {
        let calls = parse_callbacks(r#"mythril.callbacks[0]({"ok": true});"#, PATH).unwrap();
        assert_eq!(calls, vec![Invocation { index: 0, args: vec![json!({"ok": true})] }]);
    }

    #[test]
    fn test_parse_error_call() {
        let calls = parse_callbacks("mythril.callbacks[3](404, \"Not Found\")", PATH).unwrap();
        assert_eq!(calls[0].index, 3);
        assert_eq!(calls[0].args, vec![json!(404), json!("Not Found")]);
    }

    #[test]
    fn test_parse_multiple_statements() {
        let src = "mythril.callbacks[0](1);\n  mythril.callbacks[2]( [1, 2] ) ;";
        let calls = parse_callbacks(src, PATH).unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].args, vec![json!([1, 2])]);
    }

    #[test]
    fn test_parens_inside_strings() {
        let src = r#"mythril.callbacks[1]("a) b", {"k": "(\")"})"#;
        let calls = parse_callbacks(src, PATH).unwrap();
        assert_eq!(calls[0].args[0], json!("a) b"));
        assert_eq!(calls[0].args[1], json!({"k": "(\")"}));
    }

    #[test]
    fn test_empty_args_and_empty_script() {
        assert!(parse_callbacks("mythril.callbacks[0]()", PATH).unwrap()[0].args.is_empty());
        assert!(parse_callbacks("  ;\n ", PATH).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_callee() {
        let err = parse_callbacks("alert(1)", PATH).unwrap_err();
        assert!(matches!(err, ScriptError::UnknownCallee { offset: 0, ref found } if found == "alert"));
    }

    #[test]
    fn test_bad_arguments() {
        let err = parse_callbacks("mythril.callbacks[0]({oops})", PATH).unwrap_err();
        assert!(matches!(err, ScriptError::Arguments { offset: 21, .. }));
    }

    #[test]
    fn test_unterminated() {
        let err = parse_callbacks("mythril.callbacks[0](1, 2", PATH).unwrap_err();
        assert!(matches!(err, ScriptError::Syntax { .. }));
    }
}
