// src/web/admin.rs
// Admin dashboard handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;

use crate::db::stats::{
    get_counter_totals_sync, get_daily_counters_sync, get_token_totals_sync,
};
use crate::db::trace::{
    get_article_timeline_sync, get_node_stats_sync, search_events_sync, EventFilter,
};
use crate::web::state::AppState;

/// Blended cost assumptions per 1M tokens (USD), for the dashboard estimate
const INPUT_COST_PER_M: f64 = 0.27;
const OUTPUT_COST_PER_M: f64 = 1.10;

#[derive(Debug, Deserialize)]
pub struct DaysQuery {
    #[serde(default = "default_days")]
    pub days: u32,
}

fn default_days() -> u32 {
    7
}

pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

fn counter(totals: &HashMap<String, i64>, name: &str) -> i64 {
    totals.get(name).copied().unwrap_or(0)
}

fn rate(numerator: i64, denominator: i64) -> f64 {
    if denominator <= 0 {
        0.0
    } else {
        (numerator as f64 / denominator as f64 * 10_000.0).round() / 10_000.0
    }
}

fn internal_error(e: impl std::fmt::Display) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": e.to_string()})),
    )
}

/// GET /admin/news/filter-stats?days=N
pub async fn filter_stats(
    State(state): State<AppState>,
    Query(query): Query<DaysQuery>,
) -> impl IntoResponse {
    let days = query.days;
    let result = state
        .pool
        .interact(move |conn| {
            let totals = get_counter_totals_sync(conn, days)?;
            let tokens = get_token_totals_sync(conn, days)?;
            Ok((totals, tokens))
        })
        .await;

    let (totals, tokens) = match result {
        Ok(parts) => parts,
        Err(e) => return internal_error(e).into_response(),
    };

    let initial_useful = counter(&totals, "initial_useful");
    let initial_uncertain = counter(&totals, "initial_uncertain");
    let initial_skip = counter(&totals, "initial_skip");
    let fine_keep = counter(&totals, "fine_keep");
    let fine_delete = counter(&totals, "fine_delete");
    let initial_total = initial_useful + initial_uncertain + initial_skip;

    let total_input: i64 = tokens.iter().map(|t| t.input_tokens).sum();
    let total_output: i64 = tokens.iter().map(|t| t.output_tokens).sum();
    let cost_estimate = total_input as f64 / 1_000_000.0 * INPUT_COST_PER_M
        + total_output as f64 / 1_000_000.0 * OUTPUT_COST_PER_M;

    Json(json!({
        "days": days,
        "initial": {
            "useful": initial_useful,
            "uncertain": initial_uncertain,
            "skip": initial_skip,
            "pass_rate": rate(initial_useful + initial_uncertain, initial_total),
        },
        "fine": {
            "keep": fine_keep,
            "delete": fine_delete,
            "keep_rate": rate(fine_keep, fine_keep + fine_delete),
        },
        "filter_errors": counter(&totals, "filter_error"),
        "embedding": {
            "success": counter(&totals, "embedding_success"),
            "error": counter(&totals, "embedding_error"),
        },
        "tokens": {
            "by_stage": tokens,
            "total_input": total_input,
            "total_output": total_output,
            "cost_estimate_usd": (cost_estimate * 100.0).round() / 100.0,
        },
    }))
    .into_response()
}

/// GET /admin/news/filter-stats/daily?days=N
pub async fn filter_stats_daily(
    State(state): State<AppState>,
    Query(query): Query<DaysQuery>,
) -> impl IntoResponse {
    let days = query.days;
    let result = state
        .pool
        .interact(move |conn| get_daily_counters_sync(conn, days))
        .await;

    match result {
        Ok(daily) => Json(json!({"days": days, "daily": daily})).into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

/// GET /admin/news/layer15-stats?days=N
pub async fn layer15_stats(
    State(state): State<AppState>,
    Query(query): Query<DaysQuery>,
) -> impl IntoResponse {
    let days = query.days;
    let result = state
        .pool
        .interact(move |conn| get_counter_totals_sync(conn, days))
        .await;

    let totals = match result {
        Ok(totals) => totals,
        Err(e) => return internal_error(e).into_response(),
    };

    let providers: HashMap<String, i64> = totals
        .iter()
        .filter_map(|(name, value)| {
            name.strip_prefix("layer15_provider_")
                .map(|provider| (provider.to_string(), *value))
        })
        .collect();

    let success = counter(&totals, "layer15_fetch_success");
    let error = counter(&totals, "layer15_fetch_error");

    Json(json!({
        "days": days,
        "fetch": {
            "success": success,
            "error": error,
            "success_rate": rate(success, success + error),
        },
        "providers": providers,
    }))
    .into_response()
}

/// GET /admin/news/news-pipeline-stats?days=N
pub async fn news_pipeline_stats(
    State(state): State<AppState>,
    Query(query): Query<DaysQuery>,
) -> impl IntoResponse {
    let days = query.days;
    let result = state
        .pool
        .interact(move |conn| {
            let totals = get_counter_totals_sync(conn, days)?;
            let tokens = get_token_totals_sync(conn, days)?;
            let nodes = get_node_stats_sync(conn, days)?;
            Ok((totals, tokens, nodes))
        })
        .await;

    let (totals, tokens, nodes) = match result {
        Ok(parts) => parts,
        Err(e) => return internal_error(e).into_response(),
    };

    let score_distribution: HashMap<String, i64> = totals
        .iter()
        .filter_map(|(name, value)| {
            name.strip_prefix("layer1_score_")
                .map(|bucket| (bucket.to_string(), *value))
        })
        .collect();

    let stage_tokens: Vec<&crate::db::stats::StageTokens> = tokens
        .iter()
        .filter(|t| t.stage.starts_with("layer1_") || t.stage == "deep_multi_agent"
            || t.stage == "single_filter" || t.stage == "initial_filter")
        .collect();
    let agent_tokens: Vec<&crate::db::stats::StageTokens> = tokens
        .iter()
        .filter(|t| t.stage.starts_with("agent_"))
        .collect();

    let layer1_prompt = counter(&totals, "layer1_prompt_tokens");
    let layer1_cached = counter(&totals, "layer1_cached_tokens");
    let deep_prompt = counter(&totals, "deep_prompt_tokens");
    let deep_cached = counter(&totals, "deep_cached_tokens");

    Json(json!({
        "days": days,
        "routing": {
            "discard": counter(&totals, "layer1_discard"),
            "lightweight": counter(&totals, "layer1_lightweight"),
            "full_analysis": counter(&totals, "layer1_full_analysis"),
            "critical": counter(&totals, "layer1_critical_event"),
        },
        "score_distribution": score_distribution,
        "tokens": {
            "by_stage": stage_tokens,
            "by_agent": agent_tokens,
        },
        "cache": {
            "layer1_hit_rate": rate(layer1_cached, layer1_prompt),
            "deep_hit_rate": rate(deep_cached, deep_prompt),
        },
        "node_latency": nodes,
    }))
    .into_response()
}

/// GET /admin/pipeline/article/{id}
pub async fn pipeline_article(
    State(state): State<AppState>,
    Path(article_id): Path<String>,
) -> impl IntoResponse {
    let id = article_id.clone();
    let result = state
        .pool
        .interact(move |conn| get_article_timeline_sync(conn, &id))
        .await;

    match result {
        Ok(timeline) => Json(json!({
            "article_id": article_id,
            "events": timeline,
        }))
        .into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

/// GET /admin/pipeline/stats?days=N
pub async fn pipeline_stats(
    State(state): State<AppState>,
    Query(query): Query<DaysQuery>,
) -> impl IntoResponse {
    let days = query.days;
    let result = state
        .pool
        .interact(move |conn| get_node_stats_sync(conn, days))
        .await;

    match result {
        Ok(stats) => Json(json!({"days": days, "nodes": stats})).into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub layer: Option<String>,
    pub node: Option<String>,
    pub status: Option<String>,
    #[serde(default = "default_days")]
    pub days: u32,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

/// GET /admin/pipeline/events?layer&node&status&days&limit&offset
pub async fn pipeline_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> impl IntoResponse {
    let filter = EventFilter {
        layer: query.layer,
        node: query.node,
        status: query.status,
        days: query.days,
        limit: query.limit,
        offset: query.offset,
    };

    let result = state
        .pool
        .interact(move |conn| search_events_sync(conn, &filter))
        .await;

    match result {
        Ok(events) => Json(json!({
            "count": events.len(),
            "events": events,
        }))
        .into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

/// POST /admin/news/trigger-monitor
pub async fn trigger_monitor(State(state): State<AppState>) -> impl IntoResponse {
    let already_running = state.monitor.read().await.running;
    if already_running {
        return Json(json!({
            "status": "already_running",
        }))
        .into_response();
    }

    state.trigger.fire();
    Json(json!({
        "status": "triggered",
        "task_id": uuid::Uuid::new_v4().to_string(),
    }))
    .into_response()
}

/// GET /admin/news/monitor-status
pub async fn monitor_status(State(state): State<AppState>) -> impl IntoResponse {
    let monitor = state.monitor.read().await;
    Json(json!({
        "status": if monitor.running { "running" } else { "idle" },
        "progress": monitor.progress,
        "last_run": monitor.last_run,
        "next_run_at": monitor.next_run_at,
    }))
    .into_response()
}
