//! 配置校验模块
//!
//! 校验规则：
//! - server.url 为 http(s) 且无结尾斜杠
//! - server.start_time 为 `now` 或毫秒时间戳
//! - max_concurrent_builds > 0
//! - 0 < build_timeout_secs <= MAX_BUILD_TIMEOUT_SECS (若设置)
//! - channel_capacity > 0
//! - sink 名称非空且唯一，file sink 需要 `path`

use std::collections::HashSet;

use contracts::{ContractError, ListenerBlueprint, SinkType, MAX_BUILD_TIMEOUT_SECS};

/// 校验 ListenerBlueprint 配置
///
/// 返回第一个遇到的错误，或 Ok(())。
pub fn validate(blueprint: &ListenerBlueprint) -> Result<(), ContractError> {
    validate_server(blueprint)?;
    validate_processing(blueprint)?;
    validate_stream(blueprint)?;
    validate_sinks(blueprint)?;
    Ok(())
}

fn validate_server(blueprint: &ListenerBlueprint) -> Result<(), ContractError> {
    let server = &blueprint.server;

    if !(server.url.starts_with("http://") || server.url.starts_with("https://")) {
        return Err(ContractError::config_validation(
            "server.url",
            format!("must be an http(s) URL, got '{}'", server.url),
        ));
    }
    if server.url.ends_with('/') {
        return Err(ContractError::config_validation(
            "server.url",
            "must not end with '/'",
        ));
    }

    let start = server.start_time.as_str();
    if start != "now" && start.parse::<u64>().is_err() {
        return Err(ContractError::config_validation(
            "server.start_time",
            format!("expected 'now' or epoch milliseconds, got '{start}'"),
        ));
    }

    Ok(())
}

fn validate_processing(blueprint: &ListenerBlueprint) -> Result<(), ContractError> {
    let processing = &blueprint.processing;

    if processing.max_concurrent_builds == 0 {
        return Err(ContractError::config_validation(
            "processing.max_concurrent_builds",
            "must be > 0",
        ));
    }
    match processing.build_timeout_secs {
        Some(0) => {
            return Err(ContractError::config_validation(
                "processing.build_timeout_secs",
                "must be > 0 when set",
            ));
        }
        Some(secs) if secs > MAX_BUILD_TIMEOUT_SECS => {
            return Err(ContractError::config_validation(
                "processing.build_timeout_secs",
                format!("must be <= {MAX_BUILD_TIMEOUT_SECS}, got {secs}"),
            ));
        }
        _ => {}
    }

    Ok(())
}

fn validate_stream(blueprint: &ListenerBlueprint) -> Result<(), ContractError> {
    if blueprint.stream.channel_capacity == 0 {
        return Err(ContractError::config_validation(
            "stream.channel_capacity",
            "must be > 0",
        ));
    }
    Ok(())
}

/// 校验 sink 配置
fn validate_sinks(blueprint: &ListenerBlueprint) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for (idx, sink) in blueprint.sinks.iter().enumerate() {
        if sink.name.is_empty() {
            return Err(ContractError::config_validation(
                format!("sinks[{}].name", idx),
                "sink name cannot be empty",
            ));
        }
        if !seen.insert(sink.name.as_str()) {
            return Err(ContractError::config_validation(
                format!("sinks[name={}]", sink.name),
                "duplicate sink name",
            ));
        }
        if sink.queue_capacity == 0 {
            return Err(ContractError::config_validation(
                format!("sinks[{}].queue_capacity", sink.name),
                "must be > 0",
            ));
        }
        if sink.sink_type == SinkType::File && !sink.params.contains_key("path") {
            return Err(ContractError::config_validation(
                format!("sinks[{}].params.path", sink.name),
                "file sink requires a path",
            ));
        }
    }
    Ok(())
}
