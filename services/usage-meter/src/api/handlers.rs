use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use tracing::{error, info, warn};

use crate::config::FailurePolicy;
use crate::meter::{
    Decision, LimitCheck, MeterError, PeriodUsage, PlanUsage, UsagePeriod, DEFAULT_HISTORY_MONTHS,
};

use super::types::{
    required_field, CheckQuery, ConsumeRequest, ConsumeResponse, ErrorResponse,
    FeatureUsageResponse, FieldError, HistoryQuery, HistoryResponse, PeriodQuery, PlanQuery,
};
use super::ApiState;

type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = Result<Json<T>, ApiError>;

pub async fn consume_usage(
    State(state): State<Arc<ApiState>>,
    payload: Result<Json<ConsumeRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ConsumeResponse>), ApiError> {
    let Json(request) = payload.map_err(|rejection| malformed_request(rejection.body_text()))?;
    let action = request.validate().map_err(invalid_field)?;

    match state
        .meter
        .check_and_increment(&action.user_id, &action.feature, &action.plan)
        .await
    {
        Ok(decision) => {
            let status = match decision {
                Decision::Allowed(_) => StatusCode::OK,
                Decision::Denied(_) => StatusCode::TOO_MANY_REQUESTS,
            };
            Ok((
                status,
                Json(ConsumeResponse {
                    allowed: decision.is_allowed(),
                    message: decision.message(),
                    decision: Some(decision),
                    degraded: false,
                }),
            ))
        }
        Err(err @ MeterError::StoreUnavailable { .. })
            if state.config.failure_policy == FailurePolicy::Open =>
        {
            warn!(
                user_id = %action.user_id,
                feature = %action.feature,
                error = %err,
                "counter store unavailable, allowing uncounted usage"
            );
            Ok((
                StatusCode::OK,
                Json(ConsumeResponse {
                    allowed: true,
                    decision: None,
                    message: "usage could not be recorded, request allowed".to_string(),
                    degraded: true,
                }),
            ))
        }
        Err(err) => Err(meter_error(err)),
    }
}

pub async fn get_plan_usage(
    State(state): State<Arc<ApiState>>,
    Path(user_id): Path<String>,
    query: Result<Query<PlanQuery>, QueryRejection>,
) -> ApiResult<PlanUsage> {
    let Query(query) = query.map_err(|rejection| malformed_request(rejection.body_text()))?;
    let plan = required_field("plan", query.plan).map_err(invalid_field)?;
    let summary = state
        .meter
        .usage_summary(&user_id, &plan)
        .await
        .map_err(meter_error)?;
    Ok(Json(summary))
}

pub async fn get_feature_usage(
    State(state): State<Arc<ApiState>>,
    Path((user_id, feature)): Path<(String, String)>,
    query: Result<Query<PlanQuery>, QueryRejection>,
) -> ApiResult<FeatureUsageResponse> {
    let Query(query) = query.map_err(|rejection| malformed_request(rejection.body_text()))?;
    let plan = required_field("plan", query.plan).map_err(invalid_field)?;
    let usage = state
        .meter
        .get_usage(&user_id, &feature, &plan)
        .await
        .map_err(meter_error)?;
    Ok(Json(FeatureUsageResponse {
        percentage: usage.percentage,
        usage,
    }))
}

pub async fn get_period_usage(
    State(state): State<Arc<ApiState>>,
    Path(user_id): Path<String>,
    query: Result<Query<PeriodQuery>, QueryRejection>,
) -> ApiResult<PeriodUsage> {
    let Query(query) = query.map_err(|rejection| malformed_request(rejection.body_text()))?;
    let plan = required_field("plan", query.plan).map_err(invalid_field)?;
    let period = match query.period.as_deref() {
        Some(raw) => raw.parse::<UsagePeriod>().map_err(meter_error)?,
        None => UsagePeriod::default(),
    };
    let totals = state
        .meter
        .usage_for_period(&user_id, &plan, period)
        .await
        .map_err(meter_error)?;
    Ok(Json(totals))
}

pub async fn check_limit(
    State(state): State<Arc<ApiState>>,
    Path(user_id): Path<String>,
    query: Result<Query<CheckQuery>, QueryRejection>,
) -> ApiResult<LimitCheck> {
    let Query(query) = query.map_err(|rejection| malformed_request(rejection.body_text()))?;
    let plan = required_field("plan", query.plan).map_err(invalid_field)?;
    let feature = required_field("feature", query.feature).map_err(invalid_field)?;
    let check = state
        .meter
        .can_use(&user_id, &feature, &plan, query.count.unwrap_or(1))
        .await
        .map_err(meter_error)?;
    Ok(Json(check))
}

pub async fn get_usage_history(
    State(state): State<Arc<ApiState>>,
    Path(user_id): Path<String>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> ApiResult<HistoryResponse> {
    let Query(query) = query.map_err(|rejection| malformed_request(rejection.body_text()))?;
    let months = query.months.unwrap_or(DEFAULT_HISTORY_MONTHS);
    let history = state
        .meter
        .usage_history(&user_id, months, query.feature.as_deref())
        .await
        .map_err(meter_error)?;

    info!(user_id = %user_id, months, "served usage history");

    Ok(Json(HistoryResponse {
        months,
        feature_filter: query.feature,
        history,
    }))
}

pub async fn health_check(State(state): State<Arc<ApiState>>) -> ApiResult<serde_json::Value> {
    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": "usage-meter",
        "plans": state.meter.policy().plan_names(),
    })))
}

fn invalid_field(err: FieldError) -> ApiError {
    bad_request(
        &format!("invalid_{}", err.field),
        &format!("{} cannot be empty", err.field),
    )
}

fn malformed_request(reason: String) -> ApiError {
    bad_request("invalid_request", &reason)
}

fn meter_error(err: MeterError) -> ApiError {
    match &err {
        MeterError::InvalidUserId => bad_request("invalid_user_id", &err.to_string()),
        MeterError::UnknownFeature(_) => bad_request("unknown_feature", &err.to_string()),
        MeterError::UnknownPlan(_) => bad_request("unknown_plan", &err.to_string()),
        MeterError::InvalidHistoryRange { .. } => bad_request("invalid_months", &err.to_string()),
        MeterError::InvalidRequiredCount => bad_request("invalid_count", &err.to_string()),
        MeterError::InvalidPeriod(_) => bad_request("invalid_period", &err.to_string()),
        MeterError::StoreUnavailable { mutation, .. } => {
            error!(error = %err, "usage store unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorResponse {
                    error: "usage store unavailable, try again later".to_string(),
                    code: "store_unavailable".to_string(),
                    details: Some(serde_json::json!({
                        "retry_safe": err.is_retry_safe(),
                        "mutation": mutation.to_string(),
                    })),
                }),
            )
        }
        MeterError::Policy(_) => internal_error(&err),
    }
}

fn bad_request(code: &str, message: &str) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message.to_string(),
            code: code.to_string(),
            details: None,
        }),
    )
}

fn internal_error<E: std::fmt::Display>(err: E) -> ApiError {
    error!(error = %err, "usage API internal error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: "internal server error".to_string(),
            code: "internal_error".to_string(),
            details: Some(serde_json::json!({ "message": err.to_string() })),
        }),
    )
}
