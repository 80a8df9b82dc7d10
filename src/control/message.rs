//! Control message wire format
//!
//! One JSON object per line:
//!
//! ```text
//! {"type":"setGain","band":2,"gainDb":3.5}
//! {"type":"setAll","band0":-6.0,"band2":3.0}
//! ```
//!
//! Unknown fields are ignored. A `setAll` only touches the bands it names.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

use crate::error::{EqError, Result};

const TYPE_SET_GAIN: &str = "setGain";
const TYPE_SET_ALL: &str = "setAll";
const BAND_KEY_PREFIX: &str = "band";

/// A decoded gain update
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    SetOneBand { band: usize, gain_db: f64 },
    /// Band index to gain; iteration is in increasing band order
    SetAllBands(BTreeMap<usize, f64>),
}

impl ControlMessage {
    /// Decode one line of the control channel
    pub fn parse(line: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(line.trim())
            .map_err(|e| EqError::malformed(format!("invalid JSON: {}", e)))?;

        let object = value
            .as_object()
            .ok_or_else(|| EqError::malformed("expected a JSON object"))?;

        let kind = object
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| EqError::malformed("missing \"type\""))?;

        match kind {
            TYPE_SET_GAIN => {
                let band = object
                    .get("band")
                    .and_then(band_index)
                    .ok_or_else(|| EqError::malformed("\"band\" must be a non-negative integer"))?;
                let gain_db = object
                    .get("gainDb")
                    .and_then(Value::as_f64)
                    .ok_or_else(|| EqError::malformed("\"gainDb\" must be a number"))?;
                Ok(ControlMessage::SetOneBand { band, gain_db })
            }
            TYPE_SET_ALL => Ok(ControlMessage::SetAllBands(band_gains(object))),
            other => Err(EqError::malformed(format!("unknown message type {:?}", other))),
        }
    }

    /// Encode as one line of the control channel, without the newline
    pub fn to_wire(&self) -> String {
        match self {
            ControlMessage::SetOneBand { band, gain_db } => json!({
                "type": TYPE_SET_GAIN,
                "band": band,
                "gainDb": gain_db,
            })
            .to_string(),
            ControlMessage::SetAllBands(gains) => {
                let mut object = Map::new();
                object.insert("type".to_string(), json!(TYPE_SET_ALL));
                for (band, gain_db) in gains {
                    object.insert(format!("{}{}", BAND_KEY_PREFIX, band), json!(gain_db));
                }
                Value::Object(object).to_string()
            }
        }
    }

    /// Number of bands the message would update
    pub fn band_count(&self) -> usize {
        match self {
            ControlMessage::SetOneBand { .. } => 1,
            ControlMessage::SetAllBands(gains) => gains.len(),
        }
    }
}

/// Accept `2` and `2.0`, reject negatives and fractions
fn band_index(value: &Value) -> Option<usize> {
    if let Some(n) = value.as_u64() {
        return usize::try_from(n).ok();
    }
    let f = value.as_f64()?;
    if f >= 0.0 && f.fract() == 0.0 && f <= usize::MAX as f64 {
        Some(f as usize)
    } else {
        None
    }
}

/// Collect `bandN` keys holding numbers; anything else is skipped
fn band_gains(object: &Map<String, Value>) -> BTreeMap<usize, f64> {
    object
        .iter()
        .filter_map(|(key, value)| {
            let band = key.strip_prefix(BAND_KEY_PREFIX)?.parse::<usize>().ok()?;
            Some((band, value.as_f64()?))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test]
    fn test_parse_set_gain() {
        let msg = ControlMessage::parse(r#"{"type":"setGain","band":2,"gainDb":3.5}"#).unwrap();
        assert_eq!(msg, ControlMessage::SetOneBand { band: 2, gain_db: 3.5 });
    }

    #[test]
    fn test_parse_set_gain_with_integer_gain_and_extras() {
        let msg = ControlMessage::parse(
            r#"{"gainDb":-4,"band":0.0,"type":"setGain","source":"ui","seq":12}"#,
        )
        .unwrap();
        assert_eq!(msg, ControlMessage::SetOneBand { band: 0, gain_db: -4.0 });
    }

    #[test]
    fn test_parse_partial_set_all() {
        let msg = ControlMessage::parse(r#"{"type":"setAll","band0":-6.0,"band2":3.0}"#).unwrap();
        let expected: BTreeMap<usize, f64> = [(0, -6.0), (2, 3.0)].into_iter().collect();
        assert_eq!(msg, ControlMessage::SetAllBands(expected));
    }

    #[test]
    fn test_set_all_skips_odd_keys() {
        let msg = ControlMessage::parse(
            r#"{"type":"setAll","band1":"loud","bandx":2.0,"band3":null,"band4":1,"gain":9}"#,
        )
        .unwrap();
        let expected: BTreeMap<usize, f64> = [(4, 1.0)].into_iter().collect();
        assert_eq!(msg, ControlMessage::SetAllBands(expected));
    }

    #[test_case("" ; "empty line")]
    #[test_case("not json" ; "garbage")]
    #[test_case("[1,2,3]" ; "array")]
    #[test_case(r#"{"band":1,"gainDb":2.0}"# ; "missing type")]
    #[test_case(r#"{"type":"reset"}"# ; "unknown type")]
    #[test_case(r#"{"type":"setGain","gainDb":2.0}"# ; "missing band")]
    #[test_case(r#"{"type":"setGain","band":-1,"gainDb":2.0}"# ; "negative band")]
    #[test_case(r#"{"type":"setGain","band":1.5,"gainDb":2.0}"# ; "fractional band")]
    #[test_case(r#"{"type":"setGain","band":1,"gainDb":"high"}"# ; "string gain")]
    fn test_malformed(line: &str) {
        let err = ControlMessage::parse(line).unwrap_err();
        assert_eq!(err.error_code(), "MALFORMED_MESSAGE");
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_wire_shapes() {
        let one = ControlMessage::SetOneBand { band: 1, gain_db: -2.5 };
        let wire: Value = serde_json::from_str(&one.to_wire()).unwrap();
        assert_eq!(wire, json!({"type": "setGain", "band": 1, "gainDb": -2.5}));

        let all = ControlMessage::SetAllBands([(0, 1.0), (4, -3.0)].into_iter().collect());
        let wire: Value = serde_json::from_str(&all.to_wire()).unwrap();
        assert_eq!(wire, json!({"type": "setAll", "band0": 1.0, "band4": -3.0}));
        assert!(!all.to_wire().contains('\n'));
    }

    #[test]
    fn test_wire_parses_back() {
        let msg = ControlMessage::SetAllBands([(1, 6.0), (3, -12.0)].into_iter().collect());
        assert_eq!(ControlMessage::parse(&msg.to_wire()).unwrap(), msg);
        assert_eq!(msg.band_count(), 2);
    }
}
