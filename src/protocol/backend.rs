use bytes::{Buf, BufMut, BytesMut};

use crate::protocol::codec::{get_cstring, get_nullable_bytes, put_cstring};
use crate::protocol::error::ProtocolError;
use crate::protocol::types::FormatCode;

/// Messages sent by the backend (server) to the client.
#[derive(Debug)]
pub enum BackendMessage {
    /// 'R' - Authentication request / acknowledgement
    Authentication(AuthenticationRequest),
    /// 'K' - Backend key data identifying this session
    BackendKeyData { process_id: i32, secret_key: i32 },
    /// 'S' - Parameter status report
    ParameterStatus { name: String, value: String },
    /// 'Z' - Ready for query
    ReadyForQuery { status: TransactionStatus },
    /// 'T' - Result set column metadata
    RowDescription { fields: Vec<FieldDescription> },
    /// 'D' - One result row
    DataRow { values: Vec<Option<Vec<u8>>> },
    /// 'C' - Command completion tag (e.g. "INSERT 0 1")
    CommandComplete { tag: String },
    /// 'I' - Response to an empty query string
    EmptyQueryResponse,
    /// 'E' - Error response
    ErrorResponse(ServerError),
    /// 'N' - Notice response
    NoticeResponse(ServerError),
    /// 'A' - Asynchronous notification (NOTIFY)
    NotificationResponse(Notification),
}

/// The server's authentication demand during startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthenticationRequest {
    /// Authentication succeeded (code 0).
    Ok,
    /// Server wants the password in cleartext (code 3).
    CleartextPassword,
    /// Any method this client does not implement (MD5, SCRAM, ...).
    Unsupported(i32),
}

impl BackendMessage {
    /// Short name of the message kind, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            BackendMessage::Authentication(_) => "Authentication",
            BackendMessage::BackendKeyData { .. } => "BackendKeyData",
            BackendMessage::ParameterStatus { .. } => "ParameterStatus",
            BackendMessage::ReadyForQuery { .. } => "ReadyForQuery",
            BackendMessage::RowDescription { .. } => "RowDescription",
            BackendMessage::DataRow { .. } => "DataRow",
            BackendMessage::CommandComplete { .. } => "CommandComplete",
            BackendMessage::EmptyQueryResponse => "EmptyQueryResponse",
            BackendMessage::ErrorResponse(_) => "ErrorResponse",
            BackendMessage::NoticeResponse(_) => "NoticeResponse",
            BackendMessage::NotificationResponse(_) => "NotificationResponse",
        }
    }

    /// Decodes a message body. The type byte and length have already been
    /// consumed by the codec.
    pub fn decode(tag: u8, src: &mut BytesMut) -> Result<Self, ProtocolError> {
        match tag {
            b'R' => {
                if src.len() < 4 {
                    return Err(ProtocolError::InvalidMessage);
                }
                let code = src.get_i32();
                let request = match code {
                    0 => AuthenticationRequest::Ok,
                    3 => AuthenticationRequest::CleartextPassword,
                    other => AuthenticationRequest::Unsupported(other),
                };
                Ok(BackendMessage::Authentication(request))
            }
            b'K' => {
                if src.len() < 8 {
                    return Err(ProtocolError::InvalidMessage);
                }
                Ok(BackendMessage::BackendKeyData {
                    process_id: src.get_i32(),
                    secret_key: src.get_i32(),
                })
            }
            b'S' => Ok(BackendMessage::ParameterStatus {
                name: get_cstring(src)?,
                value: get_cstring(src)?,
            }),
            b'Z' => {
                if src.is_empty() {
                    return Err(ProtocolError::InvalidMessage);
                }
                Ok(BackendMessage::ReadyForQuery {
                    status: TransactionStatus::from_byte(src.get_u8())?,
                })
            }
            b'T' => {
                if src.len() < 2 {
                    return Err(ProtocolError::InvalidMessage);
                }
                let count = src.get_i16();
                if count < 0 {
                    return Err(ProtocolError::InvalidMessage);
                }
                let mut fields = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    fields.push(FieldDescription::decode(src)?);
                }
                Ok(BackendMessage::RowDescription { fields })
            }
            b'D' => {
                if src.len() < 2 {
                    return Err(ProtocolError::InvalidMessage);
                }
                let count = src.get_i16();
                if count < 0 {
                    return Err(ProtocolError::InvalidMessage);
                }
                let mut values = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    values.push(get_nullable_bytes(src)?);
                }
                Ok(BackendMessage::DataRow { values })
            }
            b'C' => Ok(BackendMessage::CommandComplete {
                tag: get_cstring(src)?,
            }),
            b'I' => Ok(BackendMessage::EmptyQueryResponse),
            b'E' => Ok(BackendMessage::ErrorResponse(ServerError::decode(src)?)),
            b'N' => Ok(BackendMessage::NoticeResponse(ServerError::decode(src)?)),
            b'A' => {
                if src.len() < 4 {
                    return Err(ProtocolError::InvalidMessage);
                }
                Ok(BackendMessage::NotificationResponse(Notification {
                    process_id: src.get_i32(),
                    channel: get_cstring(src)?,
                    payload: get_cstring(src)?,
                }))
            }
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }

    /// Encodes the complete frame (type byte + length + body).
    /// Used by the backend role (the scripted test server).
    pub fn encode(&self, dst: &mut BytesMut) {
        let mut body = BytesMut::new();
        let tag = match self {
            BackendMessage::Authentication(request) => {
                let code = match request {
                    AuthenticationRequest::Ok => 0,
                    AuthenticationRequest::CleartextPassword => 3,
                    AuthenticationRequest::Unsupported(code) => *code,
                };
                body.put_i32(code);
                b'R'
            }
            BackendMessage::BackendKeyData {
                process_id,
                secret_key,
            } => {
                body.put_i32(*process_id);
                body.put_i32(*secret_key);
                b'K'
            }
            BackendMessage::ParameterStatus { name, value } => {
                put_cstring(&mut body, name);
                put_cstring(&mut body, value);
                b'S'
            }
            BackendMessage::ReadyForQuery { status } => {
                body.put_u8(status.as_byte());
                b'Z'
            }
            BackendMessage::RowDescription { fields } => {
                body.put_i16(fields.len() as i16);
                for field in fields {
                    field.encode(&mut body);
                }
                b'T'
            }
            BackendMessage::DataRow { values } => {
                body.put_i16(values.len() as i16);
                for value in values {
                    match value {
                        Some(bytes) => {
                            body.put_i32(bytes.len() as i32);
                            body.extend_from_slice(bytes);
                        }
                        None => body.put_i32(-1),
                    }
                }
                b'D'
            }
            BackendMessage::CommandComplete { tag } => {
                put_cstring(&mut body, tag);
                b'C'
            }
            BackendMessage::EmptyQueryResponse => b'I',
            BackendMessage::ErrorResponse(error) => {
                error.encode(&mut body);
                b'E'
            }
            BackendMessage::NoticeResponse(notice) => {
                notice.encode(&mut body);
                b'N'
            }
            BackendMessage::NotificationResponse(notification) => {
                body.put_i32(notification.process_id);
                put_cstring(&mut body, &notification.channel);
                put_cstring(&mut body, &notification.payload);
                b'A'
            }
        };

        dst.put_u8(tag);
        dst.put_i32((4 + body.len()) as i32);
        dst.extend_from_slice(&body);
    }
}

/// Transaction status indicator in the ReadyForQuery message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// 'I' - Idle (not in a transaction block)
    Idle,
    /// 'T' - In a transaction block
    InTransaction,
    /// 'E' - In a failed transaction block
    Failed,
}

impl TransactionStatus {
    pub fn as_byte(self) -> u8 {
        match self {
            TransactionStatus::Idle => b'I',
            TransactionStatus::InTransaction => b'T',
            TransactionStatus::Failed => b'E',
        }
    }

    pub fn from_byte(byte: u8) -> Result<Self, ProtocolError> {
        match byte {
            b'I' => Ok(TransactionStatus::Idle),
            b'T' => Ok(TransactionStatus::InTransaction),
            b'E' => Ok(TransactionStatus::Failed),
            _ => Err(ProtocolError::InvalidMessage),
        }
    }
}

/// Column metadata in a RowDescription message.
#[derive(Debug, Clone)]
pub struct FieldDescription {
    pub name: String,
    pub table_oid: i32,
    pub column_id: i16,
    pub type_oid: i32,
    pub type_len: i16,
    pub type_modifier: i32,
    pub format: FormatCode,
}

impl FieldDescription {
    /// A text-format field with no table attribution; the shape the test
    /// backend emits for computed columns like COUNT(*).
    pub fn text(name: impl Into<String>, type_oid: i32) -> Self {
        Self {
            name: name.into(),
            table_oid: 0,
            column_id: 0,
            type_oid,
            type_len: -1,
            type_modifier: -1,
            format: FormatCode::Text,
        }
    }

    fn decode(src: &mut BytesMut) -> Result<Self, ProtocolError> {
        let name = get_cstring(src)?;
        if src.len() < 18 {
            return Err(ProtocolError::InvalidMessage);
        }
        Ok(Self {
            name,
            table_oid: src.get_i32(),
            column_id: src.get_i16(),
            type_oid: src.get_i32(),
            type_len: src.get_i16(),
            type_modifier: src.get_i32(),
            format: FormatCode::try_from(src.get_i16())
                .map_err(|_| ProtocolError::InvalidMessage)?,
        })
    }

    fn encode(&self, dst: &mut BytesMut) {
        put_cstring(dst, &self.name);
        dst.put_i32(self.table_oid);
        dst.put_i16(self.column_id);
        dst.put_i32(self.type_oid);
        dst.put_i16(self.type_len);
        dst.put_i32(self.type_modifier);
        dst.put_i16(self.format.as_i16());
    }
}

/// An asynchronous notification event: the payload of a
/// NotificationResponse, delivered in server emission order per channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Process id of the connection that issued the NOTIFY.
    pub process_id: i32,
    /// Channel name the notification was sent on.
    pub channel: String,
    /// Notification payload (empty string if none was given).
    pub payload: String,
}

/// An error or notice reported by the server.
///
/// Field codes follow the protocol's error-field table; only the fields
/// this crate acts on are kept, the rest are ignored at decode time.
#[derive(Debug, Clone)]
pub struct ServerError {
    /// Severity: ERROR, FATAL, PANIC (or NOTICE etc. for notices).
    pub severity: String,
    /// SQLSTATE code, e.g. "23505".
    pub code: String,
    /// Primary human-readable message.
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
    /// Constraint name, present on constraint violations.
    pub constraint: Option<String>,
}

impl ServerError {
    /// Creates an ERROR-severity error with the given SQLSTATE and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: "ERROR".to_string(),
            code: code.into(),
            message: message.into(),
            detail: None,
            hint: None,
            constraint: None,
        }
    }

    /// Whether this error is in SQLSTATE class 23 (integrity constraint
    /// violation), which covers duplicate-key failures.
    pub fn is_constraint_violation(&self) -> bool {
        self.code
            .starts_with(crate::protocol::sql_state::INTEGRITY_CONSTRAINT_VIOLATION_CLASS)
    }

    fn decode(src: &mut BytesMut) -> Result<Self, ProtocolError> {
        let mut error = Self::new("XX000", "");
        loop {
            if src.is_empty() {
                return Err(ProtocolError::InvalidMessage);
            }
            let code = src.get_u8();
            // Zero byte terminates the field list
            if code == 0 {
                break;
            }
            let value = get_cstring(src)?;
            match code {
                b'S' => error.severity = value,
                b'C' => error.code = value,
                b'M' => error.message = value,
                b'D' => error.detail = Some(value),
                b'H' => error.hint = Some(value),
                b'n' => error.constraint = Some(value),
                _ => {}
            }
        }
        Ok(error)
    }

    fn encode(&self, dst: &mut BytesMut) {
        for (code, value) in [
            (b'S', Some(self.severity.as_str())),
            (b'V', Some(self.severity.as_str())),
            (b'C', Some(self.code.as_str())),
            (b'M', Some(self.message.as_str())),
            (b'D', self.detail.as_deref()),
            (b'H', self.hint.as_deref()),
            (b'n', self.constraint.as_deref()),
        ] {
            if let Some(value) = value {
                dst.put_u8(code);
                put_cstring(dst, value);
            }
        }
        dst.put_u8(0); // terminator
    }
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} ({})", self.severity, self.message, self.code)
    }
}

impl std::error::Error for ServerError {}
