use crate::error::{ErrorKind, ServerError};

/// Validates an artifact manifest's required fields and the well-formedness
/// of any `remotes[*].url` entries.
///
/// Package/registry-specific validation (e.g. checking a `registry`-typed
/// MCP-server child actually resolves) is not performed here — that lives in
/// the Agent-Manifest Resolver, which runs at deploy time, not publish time.
pub fn validate_artifact_value(value: &serde_json::Value) -> Result<(), ServerError> {
    let obj = value.as_object().ok_or_else(|| {
        ServerError::new(ErrorKind::InvalidInput, "artifact value must be a JSON object")
    })?;

    let name = obj
        .get("name")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty());
    if name.is_none() {
        return Err(ServerError::new(
            ErrorKind::InvalidInput,
            "artifact value must have a non-empty string \"name\"",
        ));
    }

    let version = obj
        .get("version")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty());
    if version.is_none() {
        return Err(ServerError::new(
            ErrorKind::InvalidInput,
            "artifact value must have a non-empty string \"version\"",
        ));
    }

    if let Some(remotes) = obj.get("remotes") {
        let remotes = remotes.as_array().ok_or_else(|| {
            ServerError::new(ErrorKind::InvalidInput, "\"remotes\" must be an array")
        })?;
        for (i, remote) in remotes.iter().enumerate() {
            let url = remote
                .get("url")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    ServerError::new(
                        ErrorKind::InvalidInput,
                        format!("remotes[{i}] is missing a string \"url\""),
                    )
                })?;
            validate_url(url).map_err(|reason| {
                ServerError::new(
                    ErrorKind::InvalidInput,
                    format!("remotes[{i}].url is malformed: {reason}"),
                )
            })?;
        }
    }

    Ok(())
}

fn validate_url(raw: &str) -> Result<(), &'static str> {
    let (scheme, rest) = raw.split_once("://").ok_or("missing scheme")?;
    if !matches!(scheme, "http" | "https") {
        return Err("scheme must be http or https");
    }
    if rest.is_empty() {
        return Err("missing host");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rejects_missing_name() {
        let v = json!({"version": "1.0.0"});
        assert!(validate_artifact_value(&v).is_err());
    }

    #[test]
    fn rejects_missing_version() {
        let v = json!({"name": "com.ex/foo"});
        assert!(validate_artifact_value(&v).is_err());
    }

    #[test]
    fn accepts_minimal_valid_artifact() {
        let v = json!({"name": "com.ex/foo", "version": "1.0.0"});
        assert!(validate_artifact_value(&v).is_ok());
    }

    #[test]
    fn rejects_malformed_remote_url() {
        let v = json!({
            "name": "com.ex/foo",
            "version": "1.0.0",
            "remotes": [{"url": "not-a-url"}],
        });
        assert!(validate_artifact_value(&v).is_err());
    }

    #[test]
    fn accepts_well_formed_remote_urls() {
        let v = json!({
            "name": "com.ex/foo",
            "version": "1.0.0",
            "remotes": [{"url": "https://example.com/mcp"}],
        });
        assert!(validate_artifact_value(&v).is_ok());
    }
}
