// Sensor reading domain model and payload decoding
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub current: f64,
    pub voltage: f64,
}

impl SensorReading {
    pub fn new(current: f64, voltage: f64) -> Self {
        Self { current, voltage }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum DecodeError {
    #[error("payload is not valid UTF-8")]
    NotUtf8,
    #[error("expected \"<current>,<voltage>\" but got {0:?}")]
    MissingField(String),
    #[error("field {field} is not a number: {value:?}")]
    NotNumeric { field: &'static str, value: String },
}

/// Decode a `"<current>,<voltage>"` payload. Splits on the first comma only.
pub fn decode(payload: &str) -> Result<SensorReading, DecodeError> {
    let (current, voltage) = payload
        .split_once(',')
        .ok_or_else(|| DecodeError::MissingField(payload.to_string()))?;

    let current = parse_field("current", current)?;
    let voltage = parse_field("voltage", voltage)?;

    Ok(SensorReading::new(current, voltage))
}

/// Decode a raw message body as received from the broker.
pub fn decode_bytes(payload: &[u8]) -> Result<SensorReading, DecodeError> {
    let text = std::str::from_utf8(payload).map_err(|_| DecodeError::NotUtf8)?;
    decode(text)
}

fn parse_field(field: &'static str, raw: &str) -> Result<f64, DecodeError> {
    let trimmed = raw.trim();
    match trimmed.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(DecodeError::NotNumeric {
            field,
            value: raw.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_valid_payload() {
        let reading = decode("1.23,220.45").unwrap();
        assert_eq!(reading, SensorReading::new(1.23, 220.45));

        let reading = decode(" 0.5 , 119 ").unwrap();
        assert_eq!(reading, SensorReading::new(0.5, 119.0));
    }

    #[test]
    fn test_decode_missing_comma() {
        assert_eq!(
            decode("1.23"),
            Err(DecodeError::MissingField("1.23".to_string()))
        );
        assert!(decode("").is_err());
    }

    #[test]
    fn test_decode_non_numeric_fields() {
        assert!(matches!(
            decode("abc,100"),
            Err(DecodeError::NotNumeric { field: "current", .. })
        ));
        assert!(matches!(
            decode("1.0,"),
            Err(DecodeError::NotNumeric { field: "voltage", .. })
        ));
        assert!(matches!(
            decode("NaN,100"),
            Err(DecodeError::NotNumeric { field: "current", .. })
        ));
    }

    #[test]
    fn test_decode_splits_on_first_comma() {
        // everything after the first comma belongs to the voltage field
        assert!(matches!(
            decode("1.0,2.0,3.0"),
            Err(DecodeError::NotNumeric { field: "voltage", .. })
        ));
    }

    #[test]
    fn test_decode_bytes_rejects_invalid_utf8() {
        assert_eq!(decode_bytes(&[0xff, 0xfe]), Err(DecodeError::NotUtf8));
        assert_eq!(
            decode_bytes(b"2.5,230").unwrap(),
            SensorReading::new(2.5, 230.0)
        );
    }
}
