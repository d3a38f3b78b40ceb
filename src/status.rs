use std::str::FromStr;

use serde::Serialize;

use crate::error::UPSError;

const SEPARATOR: char = ' ';
const QUERY_FIELDS: usize = 8;
const STATUS_BITS: usize = 8;
const RATING_FIELDS: usize = 4;

// `I` answers with fixed width columns after the '#'.
const COMPANY_WIDTH: usize = 15;
const MODEL_WIDTH: usize = 10;
const VERSION_WIDTH: usize = 10;

#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusFlags {
    pub utility_fail: bool,
    pub battery_low: bool,
    pub bypass_or_buck_active: bool,
    pub ups_fail: bool,
    pub standby: bool,
    pub online: bool,
    pub test_in_progress: bool,
    pub shutdown_active: bool,
    pub beeper_on: bool,
}

impl StatusFlags {
    /// Decodes the eight character bit field, leftmost character first.
    pub fn decode(bits: &str) -> Option<StatusFlags> {
        let bits = bits.as_bytes();
        if bits.len() != STATUS_BITS || !bits.iter().all(|&c| c == b'0' || c == b'1') {
            return None;
        }

        let set = |i: usize| bits[i] == b'1';
        Some(StatusFlags {
            utility_fail: set(0),
            battery_low: set(1),
            bypass_or_buck_active: set(2),
            ups_fail: set(3),
            standby: set(4),
            online: !set(4),
            test_in_progress: set(5),
            shutdown_active: set(6),
            beeper_on: set(7),
        })
    }
}

/// Telemetry answered to a `Q1` query.
#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct QueryResult {
    pub input_voltage: f32,
    pub input_fault_voltage: f32,
    pub output_voltage: f32,
    pub output_current: u32,
    pub input_frequency: f32,
    pub battery_voltage: f32,
    pub temperature: f32,
    pub status: StatusFlags,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub company: String,
    pub model: String,
    pub version: String,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct Rating {
    pub voltage: f32,
    pub current: u32,
    pub battery_voltage: f32,
    pub frequency: f32,
}

fn parse_field<T: FromStr>(line: &str, name: &str, value: &str) -> Result<T, UPSError> {
    value
        .parse()
        .map_err(|_| UPSError::malformed(line, format!("{} {:?} is not a number", name, value)))
}

fn strip_hash(line: &str) -> Result<&str, UPSError> {
    line.strip_prefix('#')
        .ok_or_else(|| UPSError::malformed(line, "missing leading '#'"))
}

/// Decodes the answer to `Q1`: `MMM.M NNN.N PPP.P QQQ RR.R S.SS TT.T b7b6b5b4b3b2b1b0`.
pub fn decode_query(line: &str) -> Result<QueryResult, UPSError> {
    let fields: Vec<&str> = line.split(SEPARATOR).collect();
    if fields.len() != QUERY_FIELDS {
        return Err(UPSError::malformed(
            line,
            format!("expected {} fields, got {}", QUERY_FIELDS, fields.len()),
        ));
    }

    // Some units lead with the '(' that other Megatec answers start with.
    let input_voltage = fields[0].strip_prefix('(').unwrap_or(fields[0]);

    let status = StatusFlags::decode(fields[7]).ok_or_else(|| {
        UPSError::malformed(
            line,
            format!("status {:?} is not {} binary digits", fields[7], STATUS_BITS),
        )
    })?;

    let result = QueryResult {
        input_voltage: parse_field(line, "input voltage", input_voltage)?,
        input_fault_voltage: parse_field(line, "input fault voltage", fields[1])?,
        output_voltage: parse_field(line, "output voltage", fields[2])?,
        output_current: parse_field(line, "output current", fields[3])?,
        input_frequency: parse_field(line, "input frequency", fields[4])?,
        battery_voltage: parse_field(line, "battery voltage", fields[5])?,
        temperature: parse_field(line, "temperature", fields[6])?,
        status,
    };
    log::debug!("{:?}", result);
    Ok(result)
}

/// Decodes the answer to `I`: `#Company_Name UPS_Model Version`.
pub fn decode_info(line: &str) -> Result<DeviceInfo, UPSError> {
    let body = strip_hash(line)?;
    let column = |start: usize, width: usize, name: &str| -> Result<String, UPSError> {
        body.get(start..start + width)
            .map(|s| s.trim().to_string())
            .ok_or_else(|| UPSError::malformed(line, format!("{} column is truncated", name)))
    };

    let info = DeviceInfo {
        company: column(0, COMPANY_WIDTH, "company")?,
        model: column(COMPANY_WIDTH + 1, MODEL_WIDTH, "model")?,
        version: column(COMPANY_WIDTH + MODEL_WIDTH + 2, VERSION_WIDTH, "version")?,
    };
    log::debug!("{:?}", info);
    Ok(info)
}

/// Decodes the answer to `F`: `#MMM.M QQQ SS.SS RR.R`.
pub fn decode_rating(line: &str) -> Result<Rating, UPSError> {
    let fields: Vec<&str> = strip_hash(line)?.split(SEPARATOR).collect();
    if fields.len() != RATING_FIELDS {
        return Err(UPSError::malformed(
            line,
            format!("expected {} fields, got {}", RATING_FIELDS, fields.len()),
        ));
    }

    let rating = Rating {
        voltage: parse_field(line, "rated voltage", fields[0])?,
        current: parse_field(line, "rated current", fields[1])?,
        battery_voltage: parse_field(line, "rated battery voltage", fields[2])?,
        frequency: parse_field(line, "rated frequency", fields[3])?,
    };
    log::debug!("{:?}", rating);
    Ok(rating)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn malformed_reason(res: Result<impl std::fmt::Debug, UPSError>) -> String {
        match res {
            Err(UPSError::MalformedResponse { reason, .. }) => reason,
            other => panic!("expected malformed response, got {:?}", other),
        }
    }

    #[test]
    fn decodes_nominal_line() {
        let result = decode_query("220.0 220.0 220.0 005 50.0 13.6 25.0 00000000").unwrap();
        assert_eq!(result.input_voltage, 220.0);
        assert_eq!(result.input_fault_voltage, 220.0);
        assert_eq!(result.output_voltage, 220.0);
        assert_eq!(result.output_current, 5);
        assert_eq!(result.input_frequency, 50.0);
        assert_eq!(result.battery_voltage, 13.6);
        assert_eq!(result.temperature, 25.0);
        assert_eq!(
            result.status,
            StatusFlags {
                online: true,
                ..StatusFlags::default()
            }
        );
    }

    #[test]
    fn decodes_status_bits() {
        let status = decode_query("220.0 220.0 220.0 005 50.0 13.6 25.0 10100001")
            .unwrap()
            .status;
        assert!(status.utility_fail);
        assert!(!status.battery_low);
        assert!(status.bypass_or_buck_active);
        assert!(!status.ups_fail);
        assert!(!status.standby);
        assert!(status.online);
        assert!(!status.test_in_progress);
        assert!(!status.shutdown_active);
        assert!(status.beeper_on);
    }

    #[test]
    fn standby_is_never_online() {
        for n in 0u32..256 {
            let bits = format!("{:08b}", n);
            let status = StatusFlags::decode(&bits).unwrap();
            assert_eq!(status.standby, !status.online, "bits {}", bits);
            assert_eq!(status.standby, bits.as_bytes()[4] == b'1');
        }
    }

    #[test]
    fn strips_leading_bracket() {
        let result = decode_query("(220.0 219.5 221.0 012 49.9 27.1 30.0 00001000").unwrap();
        assert_eq!(result.input_voltage, 220.0);
        assert!(result.status.standby);
        assert!(!result.status.online);
    }

    #[test]
    fn wrong_field_count() {
        let reason = malformed_reason(decode_query("220.0 220.0 220.0 005 50.0 13.6"));
        assert_eq!(reason, "expected 8 fields, got 6");
        let reason = malformed_reason(decode_query(
            "220.0 220.0 220.0 005 50.0 13.6 25.0 00000000 1",
        ));
        assert_eq!(reason, "expected 8 fields, got 9");
        // Doubled separators make empty fields.
        malformed_reason(decode_query("220.0  220.0 220.0 005 50.0 13.6 25.0 00000000"));
    }

    #[test]
    fn bad_status_field() {
        malformed_reason(decode_query("220.0 220.0 220.0 005 50.0 13.6 25.0 0000000"));
        malformed_reason(decode_query("220.0 220.0 220.0 005 50.0 13.6 25.0 000000000"));
        malformed_reason(decode_query("220.0 220.0 220.0 005 50.0 13.6 25.0 0000200x"));
    }

    #[test]
    fn numbers_must_parse() {
        let reason = malformed_reason(decode_query("220.0 220.0 abc 005 50.0 13.6 25.0 00000000"));
        assert!(reason.starts_with("output voltage"), "{}", reason);
        let reason = malformed_reason(decode_query("220.0 220.0 220.0 -05 50.0 13.6 25.0 00000000"));
        assert!(reason.starts_with("output current"), "{}", reason);
        let reason = malformed_reason(decode_query("( 220.0 220.0 005 50.0 13.6 25.0 00000000"));
        assert!(reason.starts_with("input voltage"), "{}", reason);
    }

    #[test]
    fn carries_raw_line() {
        match decode_query("garbage") {
            Err(UPSError::MalformedResponse { line, .. }) => assert_eq!(line, "garbage"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn decodes_info() {
        let info = decode_info("#MEGATEC         UPS-1000   V2.3      ").unwrap();
        assert_eq!(info.company, "MEGATEC");
        assert_eq!(info.model, "UPS-1000");
        assert_eq!(info.version, "V2.3");

        malformed_reason(decode_info("MEGATEC         UPS-1000   V2.3      "));
        malformed_reason(decode_info("#MEGATEC UPS"));
    }

    #[test]
    fn decodes_rating() {
        let rating = decode_rating("#220.0 003 12.00 50.0").unwrap();
        assert_eq!(
            rating,
            Rating {
                voltage: 220.0,
                current: 3,
                battery_voltage: 12.0,
                frequency: 50.0,
            }
        );

        malformed_reason(decode_rating("220.0 003 12.00 50.0"));
        malformed_reason(decode_rating("#220.0 003 12.00"));
        malformed_reason(decode_rating("#220.0 3A 12.00 50.0"));
    }

    #[test]
    fn serializes_with_snake_case_names() {
        let result = decode_query("230.1 230.1 229.8 010 50.1 27.0 31.0 00000001").unwrap();
        let json = serde_json::to_value(result).unwrap();
        assert_eq!(json["output_current"], 10);
        assert_eq!(json["status"]["online"], true);
        assert_eq!(json["status"]["standby"], false);
        assert_eq!(json["status"]["beeper_on"], true);
        assert_eq!(json["status"]["utility_fail"], false);
        assert!(json.get("input_voltage").is_some());
    }
}
