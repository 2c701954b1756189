//! 与 OpenTelemetry 上下文互转。
//!
//! # 教案式说明
//! - **意图（Why）**：宿主往往同时使用 OpenTelemetry SDK，进出 OTel API 边界时需要在两种上下文之间搬运追踪信息；
//! - **逻辑（How）**：只桥接 Span 上下文（TraceId、SpanId、TraceFlags、TraceState），转换后的 OTel 上下文以远端父 Span 的形式出现；
//! - **契约（What）**：
//!   - Baggage 不参与转换，留在 [`Context`] 内部；
//!   - OTel 侧 Span 上下文无效时，[`from_otel`] 原样返回 `base`；
//!   - TraceState 不合法时返回 [`OtelBridgeError`]，不会静默丢弃条目。

use opentelemetry::trace::{
    self as otel_trace, SpanContext as OtelSpanContext, TraceContextExt as _,
};
use thiserror::Error;

use crate::context::Context;
use crate::error::codes;
use crate::trace::{SpanId, TraceContext, TraceFlags, TraceId, TraceState, TraceStateEntry};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum OtelBridgeError {
    #[error("TraceState 转换失败: {0}")]
    TraceStateConversion(String),
}

impl OtelBridgeError {
    pub fn code(&self) -> &'static str {
        codes::OTEL_BRIDGE
    }
}

/// 把 `context` 的追踪信息转换为 OTel 上下文；没有追踪信息时返回空的 OTel 上下文。
pub fn to_otel(context: &Context) -> Result<opentelemetry::Context, OtelBridgeError> {
    let Some(trace) = context.trace() else {
        return Ok(opentelemetry::Context::new());
    };
    let otel_state = otel_trace::TraceState::from_key_value(
        trace
            .trace_state
            .iter()
            .map(|entry| (entry.key.as_str(), entry.value.as_str())),
    )
    .map_err(|err| {
        OtelBridgeError::TraceStateConversion(format!("构造 otel TraceState 失败: {err}"))
    })?;

    let span_context = OtelSpanContext::new(
        otel_trace::TraceId::from_bytes(trace.trace_id.to_bytes()),
        otel_trace::SpanId::from_bytes(trace.span_id.to_bytes()),
        otel_trace::TraceFlags::new(trace.trace_flags.bits()),
        true,
        otel_state,
    );

    Ok(opentelemetry::Context::new().with_remote_span_context(span_context))
}

/// 以 `base` 为基础，叠加 `otel` 中的 Span 上下文。
pub fn from_otel(
    otel: &opentelemetry::Context,
    base: &Context,
) -> Result<Context, OtelBridgeError> {
    let span = otel.span();
    let span_context = span.span_context();
    if !span_context.is_valid() {
        return Ok(base.clone());
    }
    Ok(base.with_trace(span_context_to_trace(span_context)?))
}

fn span_context_to_trace(ctx: &OtelSpanContext) -> Result<TraceContext, OtelBridgeError> {
    let header = ctx.trace_state().header();
    let trace_state = if header.is_empty() {
        TraceState::default()
    } else {
        let entries = header
            .split(',')
            .filter_map(|pair| pair.split_once('='))
            .map(|(key, value)| TraceStateEntry::new(key, value))
            .collect();
        TraceState::from_entries(entries).map_err(|err| {
            OtelBridgeError::TraceStateConversion(format!("otel TraceState -> spark 失败: {err}"))
        })?
    };

    Ok(TraceContext {
        trace_id: TraceId::from_bytes(ctx.trace_id().to_bytes()),
        span_id: SpanId::from_bytes(ctx.span_id().to_bytes()),
        trace_flags: TraceFlags::new(ctx.trace_flags().to_u8()),
        trace_state,
    })
}
