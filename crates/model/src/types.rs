use std::{
    collections::{
        BTreeMap,
        BTreeSet,
    },
    fmt,
    str::FromStr,
};

use indexmap::IndexMap;
use serde::{
    Deserialize,
    Serialize,
};

pub const DEFAULT_FUNCTION_NAME: &str = "handler";

/// Identifies one supported guest evaluator. The evaluators themselves are
/// external collaborators; this tag selects which one a context is built
/// against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LanguageId {
    Js,
    Python,
    Ruby,
}

impl LanguageId {
    pub fn as_str(&self) -> &'static str {
        match self {
            LanguageId::Js => "js",
            LanguageId::Python => "python",
            LanguageId::Ruby => "ruby",
        }
    }
}

impl fmt::Display for LanguageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LanguageId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "js" => Ok(LanguageId::Js),
            "python" => Ok(LanguageId::Python),
            "ruby" => Ok(LanguageId::Ruby),
            other => Err(errors::ErrorMetadata::bad_request(
                "UnsupportedLanguage",
                format!("unrecognized languageId: {other}"),
            )
            .into()),
        }
    }
}

/// The persisted form of a user-uploaded function plus its dependencies,
/// stored as pretty JSON at `functions/{id}.json`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionAsset {
    pub id: String,
    pub language_id: LanguageId,
    pub function_name: String,
    /// When true, JS source is evaluated as a module and the entry is
    /// resolved from the module namespace rather than a global binding.
    #[serde(default)]
    pub js_eval_as_module: bool,
    pub source_code: String,
    /// Dependency name -> source text. Names are unique; order is not
    /// significant but is preserved as uploaded.
    #[serde(default)]
    pub dependencies: IndexMap<String, String>,
}

/// Ingestion-only manifest shape. Parsing tolerates comments, trailing
/// commas, and single-quoted strings; unknown properties are ignored.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadManifest {
    pub id: Option<String>,
    pub language_id: LanguageId,
    pub function_name: Option<String>,
    pub js_eval_as_module: Option<bool>,
    pub source: Option<String>,
    pub source_file: Option<String>,
    #[serde(default)]
    pub dependencies: IndexMap<String, DependencySpec>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencySpec {
    pub source: Option<String>,
    pub file: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Kv,
    Sql,
}

/// A resource record persisted at `resources/{id}.json`. Runtime handles
/// (e.g. an in-process KV map) are created lazily on first binding and live
/// for the process lifetime only.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    /// Function ids permitted to bind this resource. May be extended but
    /// never shrunk through the exposed API.
    #[serde(default)]
    pub owners: BTreeSet<String>,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_tags_round_trip() {
        for (tag, lang) in [
            ("js", LanguageId::Js),
            ("python", LanguageId::Python),
            ("ruby", LanguageId::Ruby),
        ] {
            assert_eq!(tag.parse::<LanguageId>().unwrap(), lang);
            assert_eq!(lang.to_string(), tag);
            assert_eq!(serde_json::to_string(&lang).unwrap(), format!("\"{tag}\""));
        }
        assert!("kotlin".parse::<LanguageId>().is_err());
    }

    #[test]
    fn asset_serialization_shape() {
        let asset = FunctionAsset {
            id: "0190e0a0-0000-7000-8000-000000000000".to_string(),
            language_id: LanguageId::Js,
            function_name: "handler".to_string(),
            js_eval_as_module: false,
            source_code: "function handler(e) { return e; }".to_string(),
            dependencies: IndexMap::new(),
        };
        let json = serde_json::to_value(&asset).unwrap();
        assert_eq!(json["languageId"], "js");
        assert_eq!(json["functionName"], "handler");
        assert_eq!(json["jsEvalAsModule"], false);
        let back: FunctionAsset = serde_json::from_value(json).unwrap();
        assert_eq!(back, asset);
    }
}
