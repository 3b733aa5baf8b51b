use spanlens_core::filter::{FieldType, FilterField, FilterFields, QueryType};
use spanlens_core::model::span::{
    FIELD_DURATION, FIELD_STATUS, FIELD_STATUS_CODE, STATUS_ERROR, STATUS_SUCCESS,
    TAG_LATENCY_FIRST_RESP, TAG_LATENCY_FIRST_TOKEN_RESP, TAG_REASONING_DURATION,
    TAG_START_TIME_FIRST_RESP, TAG_START_TIME_FIRST_TOKEN_RESP,
};
use spanlens_core::{Result, SpanlensError};

/// Maps user-facing filter fields onto stored columns: `status` becomes a
/// `status_code` predicate and latencies given in milliseconds become microseconds.
pub fn rewrite_special_fields(filter: &mut FilterFields) -> Result<()> {
    filter.traverse_mut(&mut |field| match field.field_name.as_str() {
        FIELD_STATUS => rewrite_status(field),
        FIELD_DURATION
        | TAG_LATENCY_FIRST_RESP
        | TAG_LATENCY_FIRST_TOKEN_RESP
        | TAG_START_TIME_FIRST_RESP
        | TAG_START_TIME_FIRST_TOKEN_RESP
        | TAG_REASONING_DURATION => rewrite_latency(field),
        _ => Ok(()),
    })
}

fn rewrite_status(field: &mut FilterField) -> Result<()> {
    if field.query_type != Some(QueryType::In) {
        return Err(SpanlensError::InvalidFilter(
            "status only supports the in query type".to_string(),
        ));
    }
    let mut success = false;
    let mut error = false;
    for value in &field.values {
        match value.as_str() {
            STATUS_SUCCESS => success = true,
            STATUS_ERROR => error = true,
            other => {
                return Err(SpanlensError::InvalidFilter(format!(
                    "unknown status value: {other}"
                )));
            }
        }
    }
    field.field_name = FIELD_STATUS_CODE.to_string();
    field.field_type = Some(FieldType::Long);
    let (query_type, values) = match (success, error) {
        (true, true) => (QueryType::AlwaysTrue, Vec::new()),
        (true, false) => (QueryType::In, vec!["0".to_string()]),
        (false, true) => (QueryType::NotIn, vec!["0".to_string()]),
        (false, false) => {
            return Err(SpanlensError::InvalidFilter(
                "status filter needs at least one value".to_string(),
            ));
        }
    };
    field.query_type = Some(query_type);
    field.values = values;
    Ok(())
}

fn rewrite_latency(field: &mut FilterField) -> Result<()> {
    if matches!(
        field.query_type,
        Some(QueryType::Exist) | Some(QueryType::NotExist) | Some(QueryType::AlwaysTrue)
    ) {
        return Ok(());
    }
    if field.effective_type() != FieldType::Long {
        return Err(SpanlensError::InvalidFilter(format!(
            "{} must be filtered as long",
            field.field_name
        )));
    }
    for value in &mut field.values {
        let millis: i64 = value.trim().parse().map_err(|_| {
            SpanlensError::InvalidFilter(format!("bad latency value: {value}"))
        })?;
        let micros = millis.checked_mul(1000).ok_or_else(|| {
            SpanlensError::InvalidFilter(format!("latency value out of range: {value}"))
        })?;
        *value = micros.to_string();
    }
    Ok(())
}
