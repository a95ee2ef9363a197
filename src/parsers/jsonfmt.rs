// src/parsers/jsonfmt.rs

//! The JSON directive engine.
//!
//! Each line is one (non-nested) JSON object. For every key with a
//! configured subformat, the value is run through the regular directive
//! engine with that subformat as the rule. Empty values are skipped,
//! unknown keys are ignored.

use std::collections::HashMap;

use crate::config::{FormatError, ParseConf, RuntimeFlags};
use crate::data::logitem::LogItem;
use crate::parsers::format::{parse_format, LogFormat, SpecErr};
use crate::storage::Classify;

use ::serde_json::Value;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-key subformats, compiled once.
#[derive(Clone, Debug)]
pub struct JsonLogFormat {
    keys: HashMap<String, LogFormat>,
}

impl JsonLogFormat {
    pub fn compile(conf: &ParseConf) -> Result<JsonLogFormat, FormatError> {
        let mut keys: HashMap<String, LogFormat> =
            HashMap::with_capacity(conf.json_log_keys.len());
        for (key, spec) in conf.json_log_keys.iter() {
            keys.insert(key.clone(), LogFormat::compile(spec, &conf.date_format)?);
        }

        Ok(JsonLogFormat { keys })
    }
}

/// Walk one JSON object and feed each mapped value through the directive
/// engine.
pub fn parse_json_format(
    logitem: &mut LogItem,
    line: &str,
    jfmt: &JsonLogFormat,
    conf: &ParseConf,
    rt: &RuntimeFlags,
    classify: &dyn Classify,
) -> Result<(), SpecErr> {
    let value: Value = match serde_json::from_str(line.trim_end()) {
        Ok(val) => val,
        Err(_) => {
            logitem.errstr = Some(String::from("Malformed JSON object."));
            return Err(SpecErr::LineInv);
        }
    };
    let obj = match value.as_object() {
        Some(val) => val,
        None => {
            logitem.errstr = Some(String::from("Malformed JSON object."));
            return Err(SpecErr::LineInv);
        }
    };

    for (key, val) in obj.iter() {
        let fmt: &LogFormat = match jfmt.keys.get(key) {
            Some(val) => val,
            None => continue,
        };
        let sval: String = match val {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            // nested objects, arrays, and nulls carry no token
            _ => continue,
        };
        // empty JSON value, e.g. {"method": ""}
        if sval.is_empty() {
            continue;
        }
        parse_format(logitem, &sval, fmt, conf, rt, classify)?;
    }

    Ok(())
}
