//! Parsing of decoded reply payloads.
//!
//! Register reads answer with a comma-separated `KEY=VALUE` list, e.g.
//!
//! ```text
//! MP,NR=0,ID=10,NAME=Temp. Aussen,LEN=4,TP=0,BIT=0,VAL=21.5,MAX=100.0,MIN=-50.0
//! ```
//!
//! Session commands answer `OK;`, register-level failures start with `ERR,`.

use std::str;

use thiserror::Error;

use crate::command::RESPONSE_SUCCESS;

/// Payload parsing failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResponseError {
    #[error("payload is not valid UTF-8")]
    Encoding,
    #[error("missing field {0} in payload {1:?}")]
    MissingField(&'static str, String),
    #[error("malformed field {0} in payload {1:?}")]
    MalformedField(&'static str, String),
}

/// A register value reported by the controller.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterValue {
    /// Register number (`NR=` field).
    pub nr: u16,
    /// Display name the device reports (`NAME=` field).
    pub name: String,
    /// Decoded value (`VAL=` field). The controller already applies its
    /// decimal scaling, so this is e.g. `21.5` for 21.5 degrees.
    pub value: f64,
}

/// A parsed reply payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// `OK;` - command accepted.
    Ok,
    /// `ERR,...` - the controller rejected the query (e.g. unknown register).
    Err(String),
    /// A register read result.
    Value(RegisterValue),
}

impl Response {
    /// Parse a decoded frame payload.
    pub fn parse(payload: &[u8]) -> Result<Self, ResponseError> {
        if payload == RESPONSE_SUCCESS {
            return Ok(Response::Ok);
        }

        let text = str::from_utf8(payload).map_err(|_| ResponseError::Encoding)?;

        if let Some(rest) = text.strip_prefix("ERR,") {
            return Ok(Response::Err(rest.trim_end_matches(';').to_string()));
        }

        let nr_text = field(text, "NR")?;
        let nr = nr_text
            .parse::<u16>()
            .map_err(|_| ResponseError::MalformedField("NR", text.to_string()))?;

        let name = field(text, "NAME")?.to_string();

        let val_text = field(text, "VAL")?;
        let value = val_text
            .parse::<f64>()
            .map_err(|_| ResponseError::MalformedField("VAL", text.to_string()))?;

        Ok(Response::Value(RegisterValue { nr, name, value }))
    }
}

/// Find `KEY=` in a comma-separated payload and return its value.
fn field<'a>(text: &'a str, key: &'static str) -> Result<&'a str, ResponseError> {
    text.split(',')
        .find_map(|part| {
            let (k, v) = part.split_once('=')?;
            (k == key).then_some(v)
        })
        .ok_or_else(|| ResponseError::MissingField(key, text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ok() {
        assert_eq!(Response::parse(b"OK;"), Ok(Response::Ok));
    }

    #[test]
    fn test_parse_err() {
        assert_eq!(
            Response::parse(b"ERR,INVALID NR;"),
            Ok(Response::Err("INVALID NR".to_string()))
        );
    }

    #[test]
    fn test_parse_process_value() {
        let payload =
            b"MP,NR=0,ID=10,NAME=Temp. Aussen,LEN=4,TP=0,BIT=0,VAL=21.5,MAX=100.0,MIN=-50.0";
        let parsed = Response::parse(payload).unwrap();
        assert_eq!(
            parsed,
            Response::Value(RegisterValue {
                nr: 0,
                name: "Temp. Aussen".to_string(),
                value: 21.5,
            })
        );
    }

    #[test]
    fn test_parse_negative_value() {
        let payload = b"MP,NR=0,NAME=Temp. Aussen,VAL=-7.3,MAX=100.0";
        match Response::parse(payload).unwrap() {
            Response::Value(v) => assert_eq!(v.value, -7.3),
            other => panic!("unexpected parse result {:?}", other),
        }
    }

    #[test]
    fn test_parse_missing_val() {
        let payload = b"MP,NR=0,NAME=Temp. Aussen";
        assert!(matches!(
            Response::parse(payload),
            Err(ResponseError::MissingField("VAL", _))
        ));
    }

    #[test]
    fn test_parse_malformed_val() {
        let payload = b"MP,NR=0,NAME=x,VAL=abc,";
        assert!(matches!(
            Response::parse(payload),
            Err(ResponseError::MalformedField("VAL", _))
        ));
    }

    #[test]
    fn test_parse_non_utf8() {
        assert_eq!(Response::parse(&[0xFF, 0xFE]), Err(ResponseError::Encoding));
    }
}
