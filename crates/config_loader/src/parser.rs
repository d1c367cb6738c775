//! 配置解析模块
//!
//! 支持 TOML (主要) 和 JSON (可选) 格式。

use contracts::{ContractError, ListenerBlueprint};

/// 配置文件格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// TOML 格式 (推荐)
    Toml,
    /// JSON 格式
    Json,
}

impl ConfigFormat {
    /// 从文件扩展名推断格式
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

pub fn parse_toml(content: &str) -> Result<ListenerBlueprint, ContractError> {
    toml::from_str(content).map_err(|e| ContractError::ConfigParse {
        message: format!("TOML parse error: {e}"),
        source: Some(Box::new(e)),
    })
}

pub fn parse_json(content: &str) -> Result<ListenerBlueprint, ContractError> {
    serde_json::from_str(content).map_err(|e| ContractError::ConfigParse {
        message: format!("JSON parse error: {e}"),
        source: Some(Box::new(e)),
    })
}

/// 根据格式解析配置
pub fn parse(content: &str, format: ConfigFormat) -> Result<ListenerBlueprint, ContractError> {
    match format {
        ConfigFormat::Toml => parse_toml(content),
        ConfigFormat::Json => parse_json(content),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::SinkType;

    #[test]
    fn test_parse_toml_full() {
        let content = r#"
[server]
url = "https://ge.example.com"
start_time = "1700000000000"
with_credentials = false

[processing]
max_concurrent_builds = 12
build_timeout_secs = 600

[stream]
reconnect_delay_ms = 500

[[sinks]]
name = "records"
sink_type = "file"
params = { path = "records.jsonl" }
"#;
        let bp = parse_toml(content).unwrap();
        assert_eq!(bp.server.url, "https://ge.example.com");
        assert_eq!(bp.server.start_time, "1700000000000");
        assert!(!bp.server.with_credentials);
        assert_eq!(bp.processing.max_concurrent_builds, 12);
        assert_eq!(bp.processing.build_timeout_secs, Some(600));
        assert_eq!(bp.stream.reconnect_delay_ms, 500);
        assert_eq!(bp.stream.channel_capacity, 256);
        assert_eq!(bp.sinks[0].sink_type, SinkType::File);
        assert_eq!(bp.sinks[0].params["path"], "records.jsonl");
    }

    #[test]
    fn test_parse_json_minimal() {
        let content = r#"{ "server": { "url": "http://localhost:5086" } }"#;
        let bp = parse_json(content).unwrap();
        assert_eq!(bp.processing.max_concurrent_builds, 6);
    }

    #[test]
    fn test_parse_toml_syntax_error() {
        let err = parse_toml("invalid toml [[[").unwrap_err();
        assert!(matches!(err, ContractError::ConfigParse { .. }));
    }

    #[test]
    fn test_parse_toml_missing_server() {
        let err = parse_toml("[processing]\nmax_concurrent_builds = 2\n").unwrap_err();
        assert!(err.to_string().contains("server"));
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(
            ConfigFormat::from_extension("TOML"),
            Some(ConfigFormat::Toml)
        );
        assert_eq!(
            ConfigFormat::from_extension("json"),
            Some(ConfigFormat::Json)
        );
        assert_eq!(ConfigFormat::from_extension("yaml"), None);
    }
}
