//! Tolerant parsing of OCR engine output.
//!
//! Engines are expected to print a single JSON object, but real ones often
//! emit diagnostic lines first. Parsing is an explicit two-stage function
//! returning a tagged result, not exception-driven fallthrough: try the
//! whole trimmed output, then retry with only the last line.

use serde_json::Value;

/// Extracted fields from one engine invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OcrOutput {
    /// None = the engine found no parseable amount (not an error)
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub raw_text: Option<String>,
    pub confidence: Option<f64>,
}

/// Tagged parse result.
#[derive(Debug)]
pub enum ParseOutcome {
    Parsed(OcrOutput),
    /// Neither the whole output nor its last line was valid JSON
    Unparseable(String),
}

/// Parse engine stdout (or a remote response body).
///
/// Empty output parses successfully with no amount. `grand_total` wins over
/// `amount`; a numeric field counts only if it is finite.
pub fn parse_engine_output(output: &str) -> ParseOutcome {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return ParseOutcome::Parsed(OcrOutput::default());
    }

    let value = match serde_json::from_str::<Value>(trimmed) {
        Ok(v) => v,
        Err(whole_err) => {
            let last_line = trimmed.lines().last().unwrap_or("");
            match serde_json::from_str::<Value>(last_line.trim()) {
                Ok(v) => v,
                Err(_) => return ParseOutcome::Unparseable(whole_err.to_string()),
            }
        }
    };

    ParseOutcome::Parsed(payload_from_value(&value))
}

/// Map a parsed JSON payload to [`OcrOutput`].
pub fn payload_from_value(value: &Value) -> OcrOutput {
    let amount = finite_number(value.get("grand_total"))
        .or_else(|| finite_number(value.get("amount")));

    OcrOutput {
        amount,
        currency: value
            .get("currency")
            .and_then(Value::as_str)
            .map(String::from),
        raw_text: value
            .get("raw_text")
            .and_then(Value::as_str)
            .map(String::from),
        confidence: finite_number(value.get("confidence")),
    }
}

fn finite_number(value: Option<&Value>) -> Option<f64> {
    value.and_then(Value::as_f64).filter(|n| n.is_finite())
}
