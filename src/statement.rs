//! SQL statements with positional parameter binding.
//!
//! A [`Statement`] pairs an immutable SQL template with ordered parameter
//! values. Placeholders use the `$1 .. $n` syntax and are recognized only
//! outside string literals, quoted identifiers and comments. Binding arity
//! is validated before any network I/O; the rendered statement carries the
//! parameters as escaped SQL literals, which is how the Simple Query
//! protocol transports them.

use thiserror::Error;

/// Binding arity mismatch, detected before any I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("statement has {placeholders} placeholders but {bound} values are bound")]
pub struct ParameterMismatch {
    pub placeholders: usize,
    pub bound: usize,
}

/// A scalar parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    Text(String),
}

impl Value {
    /// Renders this value as a SQL literal. Text is single-quoted with
    /// embedded quotes doubled (standard_conforming_strings).
    fn render(&self, out: &mut String) {
        match self {
            Value::Null => out.push_str("NULL"),
            Value::Boolean(true) => out.push_str("TRUE"),
            Value::Boolean(false) => out.push_str("FALSE"),
            Value::Int32(n) => out.push_str(&n.to_string()),
            Value::Int64(n) => out.push_str(&n.to_string()),
            Value::Float64(f) => {
                if f.is_finite() {
                    out.push_str(&f.to_string());
                } else {
                    // Infinity/NaN need the quoted spelling
                    out.push('\'');
                    out.push_str(&f.to_string());
                    out.push_str("'::float8");
                }
            }
            Value::Text(s) => {
                out.push('\'');
                for ch in s.chars() {
                    if ch == '\'' {
                        out.push('\'');
                    }
                    out.push(ch);
                }
                out.push('\'');
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

/// An immutable SQL template plus its ordered bound parameters.
#[derive(Debug, Clone)]
pub struct Statement {
    sql: String,
    params: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Binds the next positional parameter.
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }

    /// Binds a sequence of parameters in order.
    pub fn bind_all(mut self, values: impl IntoIterator<Item = Value>) -> Self {
        self.params.extend(values);
        self
    }

    /// The SQL template as given.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Renders the statement with parameters substituted as literals.
    ///
    /// # Errors
    ///
    /// `ParameterMismatch` if the highest placeholder index differs from
    /// the number of bound values. Detected before any I/O.
    pub(crate) fn render(&self) -> Result<String, ParameterMismatch> {
        let (rendered, placeholders) = self.substitute()?;
        if placeholders != self.params.len() {
            return Err(ParameterMismatch {
                placeholders,
                bound: self.params.len(),
            });
        }
        Ok(rendered)
    }

    /// Scans the template, substituting placeholders found outside quoted
    /// regions and comments. Returns the rendered SQL and the highest
    /// placeholder index seen.
    fn substitute(&self) -> Result<(String, usize), ParameterMismatch> {
        #[derive(Clone, Copy, PartialEq)]
        enum State {
            Normal,
            SingleQuote,
            DoubleQuote,
            LineComment,
            BlockComment(u32),
        }

        let mut out = String::with_capacity(self.sql.len());
        let mut max_index = 0usize;
        let mut state = State::Normal;
        let mut chars = self.sql.char_indices().peekable();

        while let Some((_, ch)) = chars.next() {
            match state {
                State::Normal => match ch {
                    '\'' => {
                        state = State::SingleQuote;
                        out.push(ch);
                    }
                    '"' => {
                        state = State::DoubleQuote;
                        out.push(ch);
                    }
                    '-' if matches!(chars.peek(), Some((_, '-'))) => {
                        chars.next();
                        state = State::LineComment;
                        out.push_str("--");
                    }
                    '/' if matches!(chars.peek(), Some((_, '*'))) => {
                        chars.next();
                        state = State::BlockComment(1);
                        out.push_str("/*");
                    }
                    '$' if matches!(chars.peek(), Some((_, c)) if c.is_ascii_digit()) => {
                        let mut index = 0usize;
                        while let Some((_, c)) = chars.peek().copied() {
                            let Some(digit) = c.to_digit(10) else { break };
                            chars.next();
                            index = index * 10 + digit as usize;
                        }
                        if index == 0 || index > self.params.len() {
                            // Placeholder without a bound value; report the
                            // full placeholder count for the error
                            return Err(ParameterMismatch {
                                placeholders: index.max(max_index),
                                bound: self.params.len(),
                            });
                        }
                        max_index = max_index.max(index);
                        self.params[index - 1].render(&mut out);
                    }
                    _ => out.push(ch),
                },
                State::SingleQuote => {
                    out.push(ch);
                    if ch == '\'' {
                        // Doubled quote stays inside the literal
                        if matches!(chars.peek(), Some((_, '\''))) {
                            chars.next();
                            out.push('\'');
                        } else {
                            state = State::Normal;
                        }
                    }
                }
                State::DoubleQuote => {
                    out.push(ch);
                    if ch == '"' {
                        state = State::Normal;
                    }
                }
                State::LineComment => {
                    out.push(ch);
                    if ch == '\n' {
                        state = State::Normal;
                    }
                }
                State::BlockComment(depth) => {
                    match ch {
                        '*' if matches!(chars.peek(), Some((_, '/'))) => {
                            chars.next();
                            out.push_str("*/");
                            state = if depth == 1 {
                                State::Normal
                            } else {
                                State::BlockComment(depth - 1)
                            };
                        }
                        '/' if matches!(chars.peek(), Some((_, '*'))) => {
                            chars.next();
                            out.push_str("/*");
                            state = State::BlockComment(depth + 1);
                        }
                        _ => out.push(ch),
                    };
                }
            }
        }

        Ok((out, max_index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_no_params() {
        let stmt = Statement::new("SELECT COUNT(*) FROM customer");
        assert_eq!(stmt.render().unwrap(), "SELECT COUNT(*) FROM customer");
    }

    #[test]
    fn test_render_substitutes_in_order() {
        let stmt = Statement::new("insert into customer (id, first_name) values ($1, $2)")
            .bind(1i64)
            .bind("John");
        assert_eq!(
            stmt.render().unwrap(),
            "insert into customer (id, first_name) values (1, 'John')"
        );
    }

    #[test]
    fn test_render_escapes_quotes() {
        let stmt = Statement::new("insert into t (name) values ($1)").bind("O'Brien");
        assert_eq!(
            stmt.render().unwrap(),
            "insert into t (name) values ('O''Brien')"
        );
    }

    #[test]
    fn test_render_null_and_bool() {
        let stmt = Statement::new("values ($1, $2)")
            .bind(Option::<i64>::None)
            .bind(true);
        assert_eq!(stmt.render().unwrap(), "values (NULL, TRUE)");
    }

    #[test]
    fn test_placeholder_reuse() {
        let stmt = Statement::new("select $1, $1").bind(7i32);
        assert_eq!(stmt.render().unwrap(), "select 7, 7");
    }

    #[test]
    fn test_too_few_bound() {
        let stmt = Statement::new("values ($1, $2)").bind(1i64);
        assert_eq!(
            stmt.render(),
            Err(ParameterMismatch {
                placeholders: 2,
                bound: 1
            })
        );
    }

    #[test]
    fn test_too_many_bound() {
        let stmt = Statement::new("values ($1)").bind(1i64).bind(2i64);
        assert_eq!(
            stmt.render(),
            Err(ParameterMismatch {
                placeholders: 1,
                bound: 2
            })
        );
    }

    #[test]
    fn test_placeholder_ignored_in_string_literal() {
        let stmt = Statement::new("select '$1', $1").bind(5i32);
        assert_eq!(stmt.render().unwrap(), "select '$1', 5");
    }

    #[test]
    fn test_placeholder_ignored_in_quoted_identifier() {
        let stmt = Statement::new(r#"select "$1" from t where id = $1"#).bind(5i32);
        assert_eq!(stmt.render().unwrap(), r#"select "$1" from t where id = 5"#);
    }

    #[test]
    fn test_placeholder_ignored_in_comments() {
        let stmt = Statement::new("select $1 -- not $2\n/* nor /* $3 */ here */").bind(1i32);
        assert_eq!(
            stmt.render().unwrap(),
            "select 1 -- not $2\n/* nor /* $3 */ here */"
        );
    }

    #[test]
    fn test_doubled_quote_stays_in_literal() {
        let stmt = Statement::new("select 'it''s $1' , $1").bind(9i32);
        assert_eq!(stmt.render().unwrap(), "select 'it''s $1' , 9");
    }

    #[test]
    fn test_dollar_zero_rejected() {
        let stmt = Statement::new("select $0");
        assert!(stmt.render().is_err());
    }

    #[test]
    fn test_nonfinite_float() {
        let stmt = Statement::new("values ($1)").bind(f64::NAN);
        assert_eq!(stmt.render().unwrap(), "values ('NaN'::float8)");
    }
}
