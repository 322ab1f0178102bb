use serde_json::json;

use crate::error::TransferError;
use crate::http::Timing;
use crate::metrics::types::MetricsCollectorConfig;

/// Timing trace for a success, when the run keeps breakdowns or the
/// request was slow.
pub(super) fn success_trace(config: &MetricsCollectorConfig, timing: &Timing) -> Option<String> {
    let threshold = config.slow_threshold_ms;
    let is_slow = threshold > 0 && timing.total_ms >= threshold as f64;
    if !config.save_timing_breakdown && !is_slow {
        return None;
    }
    let mut trace = json!({
        "total_ms": timing.total_ms,
        "dns_ms": timing.dns_ms,
        "connect_ms": timing.connect_ms,
        "tls_ms": timing.tls_ms,
        "first_byte_ms": timing.first_byte_ms,
        "download_ms": timing.download_ms,
    });
    if is_slow && let Some(fields) = trace.as_object_mut() {
        fields.insert("is_slow".to_owned(), json!(true));
        fields.insert("threshold_ms".to_owned(), json!(threshold));
    }
    Some(trace.to_string())
}

pub(super) fn error_trace(error: &TransferError, request_number: u64) -> String {
    json!({
        "error_code": error.code.as_u8(),
        "error_type": error.code.type_name(),
        "message": error.message,
        "request_number": request_number,
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn timing(total_ms: f64) -> Timing {
        Timing {
            total_ms,
            first_byte_ms: total_ms / 2.0,
            download_ms: total_ms / 2.0,
            ..Timing::default()
        }
    }

    #[test]
    fn fast_success_has_no_trace_by_default() -> Result<(), String> {
        let config = MetricsCollectorConfig::default();
        match success_trace(&config, &timing(12.0)) {
            None => Ok(()),
            Some(trace) => Err(format!("Unexpected trace {}", trace)),
        }
    }

    #[test]
    fn slow_success_is_flagged() -> Result<(), String> {
        let config = MetricsCollectorConfig::default();
        let trace = success_trace(&config, &timing(1500.0)).ok_or("Expected slow trace")?;
        let value: serde_json::Value =
            serde_json::from_str(&trace).map_err(|err| err.to_string())?;
        if value.get("is_slow") != Some(&json!(true)) {
            return Err(format!("Missing slow flag in {}", trace));
        }
        if value.get("threshold_ms") != Some(&json!(1000)) {
            return Err(format!("Missing threshold in {}", trace));
        }
        Ok(())
    }

    #[test]
    fn breakdown_is_kept_when_requested() -> Result<(), String> {
        let config = MetricsCollectorConfig {
            save_timing_breakdown: true,
            ..MetricsCollectorConfig::default()
        };
        let trace = success_trace(&config, &timing(5.0)).ok_or("Expected breakdown trace")?;
        let value: serde_json::Value =
            serde_json::from_str(&trace).map_err(|err| err.to_string())?;
        if value.get("is_slow").is_some() {
            return Err("Fast request flagged as slow".to_owned());
        }
        if value.get("first_byte_ms") != Some(&json!(2.5)) {
            return Err(format!("Unexpected breakdown {}", trace));
        }
        Ok(())
    }

    #[test]
    fn error_trace_names_the_code() -> Result<(), String> {
        let error = TransferError::new(ErrorCode::Timeout, "timed out");
        let value: serde_json::Value =
            serde_json::from_str(&error_trace(&error, 42)).map_err(|err| err.to_string())?;
        if value.get("error_type") != Some(&json!("timeout"))
            || value.get("error_code") != Some(&json!(1))
            || value.get("request_number") != Some(&json!(42))
        {
            return Err(format!("Unexpected error trace {}", value));
        }
        Ok(())
    }
}
