/// Format code for parameter and result values in the PostgreSQL protocol.
///
/// The Simple Query protocol always carries text format; binary shows up
/// only in RowDescription metadata and is rejected at decode time by
/// consumers that cannot handle it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(i16)]
pub enum FormatCode {
    /// Text format (0)
    #[default]
    Text = 0,
    /// Binary format (1)
    Binary = 1,
}

impl TryFrom<i16> for FormatCode {
    type Error = i16;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(FormatCode::Text),
            1 => Ok(FormatCode::Binary),
            _ => Err(value),
        }
    }
}

impl FormatCode {
    /// Converts the FormatCode to an i16 value.
    pub fn as_i16(self) -> i16 {
        self as i16
    }
}

/// SQLSTATE codes surfaced by this crate.
///
/// See: https://www.postgresql.org/docs/current/errcodes-appendix.html
pub mod sql_state {
    /// Class 23 prefix: integrity constraint violation.
    pub const INTEGRITY_CONSTRAINT_VIOLATION_CLASS: &str = "23";
    /// 23505: unique_violation.
    pub const UNIQUE_VIOLATION: &str = "23505";
    /// 28P01: invalid_password.
    pub const INVALID_PASSWORD: &str = "28P01";
    /// 42601: syntax_error.
    pub const SYNTAX_ERROR: &str = "42601";
}

/// Type OIDs for the scalar types this crate reads and writes.
pub mod type_oid {
    pub const BOOL: i32 = 16;
    pub const INT8: i32 = 20;
    pub const INT4: i32 = 23;
    pub const TEXT: i32 = 25;
    pub const FLOAT8: i32 = 701;
}
