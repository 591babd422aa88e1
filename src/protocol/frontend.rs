use bytes::{Buf, BufMut, BytesMut};

use crate::protocol::codec::{get_cstring, put_cstring};
use crate::protocol::error::ProtocolError;

/// Protocol version 3.0.
const PROTOCOL_VERSION_3: i32 = 3 << 16;

/// Parameters sent in the startup frame.
#[derive(Debug, Clone, Default)]
pub struct StartupParameters {
    pub user: String,
    pub database: Option<String>,
    pub application_name: Option<String>,
    pub other: Vec<(String, String)>,
}

/// The untyped first frame of a session: protocol version plus parameters.
#[derive(Debug, Clone)]
pub struct StartupMessage {
    pub protocol_version: i32,
    pub parameters: StartupParameters,
}

impl StartupMessage {
    /// Creates a version 3.0 startup message.
    pub fn new(parameters: StartupParameters) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION_3,
            parameters,
        }
    }

    /// Encodes the startup frame. Unlike every later message it carries no
    /// type byte; the Int32 length includes itself.
    pub fn encode(&self, dst: &mut BytesMut) {
        let mut body = BytesMut::new();
        body.put_i32(self.protocol_version);
        put_cstring(&mut body, "user");
        put_cstring(&mut body, &self.parameters.user);
        if let Some(database) = &self.parameters.database {
            put_cstring(&mut body, "database");
            put_cstring(&mut body, database);
        }
        if let Some(application_name) = &self.parameters.application_name {
            put_cstring(&mut body, "application_name");
            put_cstring(&mut body, application_name);
        }
        for (name, value) in &self.parameters.other {
            put_cstring(&mut body, name);
            put_cstring(&mut body, value);
        }
        body.put_u8(0); // terminator

        dst.put_i32((4 + body.len()) as i32);
        dst.extend_from_slice(&body);
    }

    /// Decodes a startup frame. The buffer must contain the complete frame
    /// (length already validated by the codec).
    pub fn decode(src: &mut BytesMut) -> Result<Self, ProtocolError> {
        let _len = src.get_i32();
        let version = src.get_i32();

        if (version >> 16) != 3 {
            return Err(ProtocolError::UnsupportedProtocolVersion(version));
        }

        let mut parameters = StartupParameters::default();
        loop {
            if src.is_empty() {
                break;
            }

            let name = get_cstring(src)?;
            // Empty name signals end of parameters
            if name.is_empty() {
                break;
            }
            let value = get_cstring(src)?;

            match name.as_str() {
                "user" => parameters.user = value,
                "database" => parameters.database = Some(value),
                "application_name" => parameters.application_name = Some(value),
                _ => parameters.other.push((name, value)),
            }
        }

        if parameters.user.is_empty() {
            return Err(ProtocolError::MissingParameter("user"));
        }

        Ok(Self {
            protocol_version: version,
            parameters,
        })
    }
}

/// Typed messages sent by the frontend (client) after startup.
#[derive(Debug)]
pub enum FrontendMessage {
    /// 'p' - Password response to an authentication request
    Password(String),
    /// 'Q' - Simple query
    Query(String),
    /// 'X' - Termination
    Terminate,
}

impl FrontendMessage {
    /// Encodes the complete frame (type byte + length + body).
    pub fn encode(&self, dst: &mut BytesMut) {
        match self {
            FrontendMessage::Password(password) => {
                dst.put_u8(b'p');
                dst.put_i32((4 + password.len() + 1) as i32);
                put_cstring(dst, password);
            }
            FrontendMessage::Query(query) => {
                dst.put_u8(b'Q');
                dst.put_i32((4 + query.len() + 1) as i32);
                put_cstring(dst, query);
            }
            FrontendMessage::Terminate => {
                dst.put_u8(b'X');
                dst.put_i32(4);
            }
        }
    }

    /// Decodes a message body. The type byte and length have already been
    /// consumed by the codec.
    pub fn decode(tag: u8, src: &mut BytesMut) -> Result<Self, ProtocolError> {
        match tag {
            b'p' => Ok(FrontendMessage::Password(get_cstring(src)?)),
            b'Q' => Ok(FrontendMessage::Query(get_cstring(src)?)),
            b'X' => Ok(FrontendMessage::Terminate),
            _ => Err(ProtocolError::UnknownMessageType(tag)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::codec::Decoder;

    use crate::protocol::codec::{BackendCodec, StartupCodec};

    fn startup(user: &str, database: Option<&str>) -> StartupMessage {
        StartupMessage::new(StartupParameters {
            user: user.to_string(),
            database: database.map(str::to_string),
            application_name: None,
            other: Vec::new(),
        })
    }

    #[test]
    fn test_startup_round_trip() {
        let mut buf = BytesMut::new();
        startup("postgres", Some("testdb")).encode(&mut buf);

        let decoded = StartupCodec::new().decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.protocol_version, PROTOCOL_VERSION_3);
        assert_eq!(decoded.parameters.user, "postgres");
        assert_eq!(decoded.parameters.database, Some("testdb".to_string()));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_startup_missing_user() {
        let msg = StartupMessage::new(StartupParameters::default());
        let mut buf = BytesMut::new();
        msg.encode(&mut buf);

        let result = StartupCodec::new().decode(&mut buf);
        assert!(matches!(result, Err(ProtocolError::MissingParameter("user"))));
    }

    #[test]
    fn test_startup_incomplete_waits() {
        let mut buf = BytesMut::new();
        startup("postgres", None).encode(&mut buf);
        let _ = buf.split_off(buf.len() - 2); // drop the tail

        assert!(StartupCodec::new().decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_query_round_trip() {
        let mut buf = BytesMut::new();
        FrontendMessage::Query("SELECT 1".to_string()).encode(&mut buf);

        let decoded = BackendCodec::new().decode(&mut buf).unwrap().unwrap();
        let FrontendMessage::Query(q) = decoded else {
            panic!("expected Query message, got {decoded:?}")
        };
        assert_eq!(q, "SELECT 1");
    }

    #[test]
    fn test_password_round_trip() {
        let mut buf = BytesMut::new();
        FrontendMessage::Password("secret".to_string()).encode(&mut buf);

        let decoded = BackendCodec::new().decode(&mut buf).unwrap().unwrap();
        assert!(matches!(decoded, FrontendMessage::Password(p) if p == "secret"));
    }

    #[test]
    fn test_terminate_round_trip() {
        let mut buf = BytesMut::new();
        FrontendMessage::Terminate.encode(&mut buf);
        assert_eq!(&buf[..], &[b'X', 0, 0, 0, 4]);

        let decoded = BackendCodec::new().decode(&mut buf).unwrap().unwrap();
        assert!(matches!(decoded, FrontendMessage::Terminate));
    }

    #[test]
    fn test_decode_unknown_type() {
        let mut buf = BytesMut::from(&[b'!', 0, 0, 0, 4][..]);
        let result = BackendCodec::new().decode(&mut buf);
        assert!(matches!(result, Err(ProtocolError::UnknownMessageType(b'!'))));
    }

    #[test]
    fn test_decode_eof() {
        let mut buf = BytesMut::new();
        assert!(BackendCodec::new().decode(&mut buf).unwrap().is_none());
    }
}
