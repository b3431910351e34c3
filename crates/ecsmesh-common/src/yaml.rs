//! YAML loading for mesh manifests
//!
//! Documents are parsed with yaml-rust2, converted to `serde_json::Value`
//! and then deserialized into typed structs with serde.

use serde::de::DeserializeOwned;
use serde_json::{Map, Number, Value};
use thiserror::Error;
use yaml_rust2::{Yaml, YamlLoader};

/// Error type for YAML parsing
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct YamlError(String);

impl From<YamlError> for crate::Error {
    fn from(err: YamlError) -> Self {
        crate::Error::config(format!("invalid YAML: {err}"))
    }
}

/// Parse a YAML string into a `serde_json::Value`
///
/// Only the first document is read. Empty input yields `Value::Null`.
pub fn parse_yaml(input: &str) -> Result<Value, YamlError> {
    let docs = YamlLoader::load_from_str(input).map_err(|e| YamlError(e.to_string()))?;
    match docs.into_iter().next() {
        Some(doc) => yaml_to_json(doc),
        None => Ok(Value::Null),
    }
}

/// Parse YAML straight into a typed value
pub fn from_yaml_str<T: DeserializeOwned>(input: &str) -> crate::Result<T> {
    let value = parse_yaml(input)?;
    serde_json::from_value(value).map_err(|e| crate::Error::config(e.to_string()))
}

fn yaml_to_json(yaml: Yaml) -> Result<Value, YamlError> {
    match yaml {
        Yaml::Null => Ok(Value::Null),
        Yaml::Boolean(b) => Ok(Value::Bool(b)),
        Yaml::Integer(i) => Ok(Value::Number(i.into())),
        Yaml::Real(s) => {
            let f: f64 = s
                .parse()
                .map_err(|e: std::num::ParseFloatError| YamlError(e.to_string()))?;
            Ok(Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null))
        }
        Yaml::String(s) => Ok(Value::String(s)),
        Yaml::Array(arr) => arr
            .into_iter()
            .map(yaml_to_json)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Yaml::Hash(map) => map
            .into_iter()
            .map(|(k, v)| {
                let key = match k {
                    Yaml::String(s) => s,
                    Yaml::Integer(i) => i.to_string(),
                    Yaml::Boolean(b) => b.to_string(),
                    _ => return Err(YamlError("unsupported YAML key type".to_string())),
                };
                yaml_to_json(v).map(|v| (key, v))
            })
            .collect::<Result<Map<String, Value>, _>>()
            .map(Value::Object),
        Yaml::Alias(_) => Err(YamlError("YAML aliases not supported".to_string())),
        Yaml::BadValue => Err(YamlError("bad YAML value".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_parse_nested_manifest() {
        let yaml = r#"
region: us-west-2
services:
  - id: greeter
    container:
      trafficPort: 3000
  - id: name
"#;
        let result = parse_yaml(yaml).unwrap();
        assert_eq!(result["region"], "us-west-2");
        assert_eq!(result["services"][0]["container"]["trafficPort"], 3000);
        assert_eq!(result["services"][1]["id"], "name");
    }

    #[test]
    fn test_parse_yaml_empty() {
        assert_eq!(parse_yaml("").unwrap(), Value::Null);
    }

    #[test]
    fn test_parse_yaml_invalid() {
        assert!(parse_yaml("not: valid: yaml: {{").is_err());
    }

    #[test]
    fn test_from_yaml_str_typed() {
        #[derive(Deserialize, Debug, PartialEq)]
        #[serde(rename_all = "camelCase")]
        struct Conn {
            from: String,
            local_bind_port: Option<u16>,
        }

        let conn: Conn = from_yaml_str("from: greeter\nlocalBindPort: 8080").unwrap();
        assert_eq!(
            conn,
            Conn {
                from: "greeter".to_string(),
                local_bind_port: Some(8080),
            }
        );
    }

    #[test]
    fn test_from_yaml_str_type_mismatch_is_config_error() {
        let err = from_yaml_str::<u16>("hello").unwrap_err();
        assert!(matches!(err, crate::Error::Config { .. }));
    }
}
