use anyhow::Context;
use std::path::Path;

use genflow_core::models::{Parameters, SourceAsset};

/// Initialize tracing for the CLI. `json` switches to one JSON object per line.
pub fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("genflow=info"));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Parse `key=value` into the request parameters. The value is read as JSON when it
/// parses (`duration=5`, `watermark=false`), as a plain string otherwise.
pub fn parse_params(pairs: &[String]) -> anyhow::Result<Parameters> {
    let mut params = Parameters::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .with_context(|| format!("Parameter '{}' must look like key=value", pair))?;
        let key = key.trim();
        if key.is_empty() {
            anyhow::bail!("Parameter '{}' has an empty name", pair);
        }
        let value = serde_json::from_str(raw)
            .unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
        params.insert(key.to_string(), value);
    }
    Ok(params)
}

/// Interpret a `--source` argument: a data URI, an http(s) URL, or a local file
pub fn source_from_arg(arg: &str) -> anyhow::Result<SourceAsset> {
    if arg.starts_with("data:") {
        return Ok(SourceAsset::DataUri {
            data_uri: arg.to_string(),
        });
    }
    if arg.starts_with("http://") || arg.starts_with("https://") {
        return Ok(SourceAsset::url(arg));
    }

    let path = Path::new(arg);
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read source file {}", path.display()))?;
    Ok(SourceAsset::Bytes {
        bytes,
        mime: mime_for_path(path).to_string(),
    })
}

fn mime_for_path(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match extension.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn params_prefer_json_values() {
        let params = parse_params(&[
            "duration=5".to_string(),
            "resolution=1080P".to_string(),
            "watermark=false".to_string(),
        ])
        .unwrap();

        assert_eq!(params["duration"], json!(5));
        assert_eq!(params["resolution"], json!("1080P"));
        assert_eq!(params["watermark"], json!(false));
    }

    #[test]
    fn params_without_equals_are_rejected() {
        assert!(parse_params(&["duration".to_string()]).is_err());
        assert!(parse_params(&["=5".to_string()]).is_err());
    }

    #[test]
    fn source_kinds() {
        assert_eq!(
            source_from_arg("https://cdn.example.com/a.png").unwrap(),
            SourceAsset::url("https://cdn.example.com/a.png")
        );
        assert!(matches!(
            source_from_arg("data:image/png;base64,AAAA").unwrap(),
            SourceAsset::DataUri { .. }
        ));

        let mut file = tempfile::Builder::new().suffix(".JPG").tempfile().unwrap();
        file.write_all(b"\xff\xd8\xff").unwrap();
        match source_from_arg(file.path().to_str().unwrap()).unwrap() {
            SourceAsset::Bytes { bytes, mime } => {
                assert_eq!(bytes.len(), 3);
                assert_eq!(mime, "image/jpeg");
            }
            other => panic!("unexpected source {other:?}"),
        }

        assert!(source_from_arg("/definitely/not/here.png").is_err());
    }
}
