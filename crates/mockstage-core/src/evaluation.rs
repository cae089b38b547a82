//! Turns a free-form evaluation response into a structured report.
//!
//! The model is instructed to emit a fenced JSON block, but responses
//! arrive with prose around the block, inconsistent key casing, or
//! scores on the wrong scale. The parser tolerates all of that; it only
//! fails when a mandatory numeric field cannot be recovered at all.

use mockstage_schema::{EngineError, EvaluationReport};
use serde_json::Value;
use std::collections::HashMap;

/// Rescale rule for out-of-range scores, applied uniformly: a value
/// above 10 is divided by 10 once (covers 0-100 scales), then every
/// value is clamped into [0, 10].
fn normalize_score(mut value: f64) -> f64 {
    if value > 10.0 {
        value /= 10.0;
    }
    value.clamp(0.0, 10.0)
}

/// Locate the JSON payload: a ```json fence first, then any ``` fence,
/// then the outermost brace span.
fn extract_json_block(raw: &str) -> Option<&str> {
    for fence in ["```json", "```"] {
        if let Some(start) = raw.find(fence) {
            let body = &raw[start + fence.len()..];
            if let Some(end) = body.find("```") {
                let inner = body[..end].trim();
                if inner.starts_with('{') {
                    return Some(inner);
                }
            }
        }
    }
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| raw[start..=end].trim())
}

fn number_field(fields: &HashMap<String, &Value>, key: &str) -> Result<f64, EngineError> {
    let value = fields
        .get(key)
        .ok_or_else(|| EngineError::EvaluationUnparseable(format!("missing field: {key}")))?;
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| EngineError::EvaluationUnparseable(format!("field {key} is not numeric")))?;
    Ok(normalize_score(number))
}

fn list_field(fields: &HashMap<String, &Value>, key: &str) -> Vec<String> {
    fields
        .get(key)
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

pub fn parse(raw: &str) -> Result<EvaluationReport, EngineError> {
    let block = extract_json_block(raw).ok_or_else(|| {
        EngineError::EvaluationUnparseable("no JSON object found in response".into())
    })?;

    let value: Value = serde_json::from_str(block)
        .map_err(|e| EngineError::EvaluationUnparseable(format!("invalid JSON: {e}")))?;
    let object = value.as_object().ok_or_else(|| {
        EngineError::EvaluationUnparseable("evaluation payload is not an object".into())
    })?;

    // Key lookup is case-insensitive.
    let fields: HashMap<String, &Value> = object
        .iter()
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v))
        .collect();

    Ok(EvaluationReport {
        overall_score: number_field(&fields, "overall_score")?,
        correctness: number_field(&fields, "correctness")?,
        depth: number_field(&fields, "depth")?,
        communication: number_field(&fields, "communication")?,
        strengths: list_field(&fields, "strengths"),
        areas_to_improve: list_field(&fields, "areas_to_improve"),
        recommendations: list_field(&fields, "recommendations"),
    })
}
