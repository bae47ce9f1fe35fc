use std::path::{
    Path,
    PathBuf,
};

use anyhow::Context;
use errors::ErrorMetadata;
use indexmap::IndexMap;

use crate::types::{
    FunctionAsset,
    UploadManifest,
    DEFAULT_FUNCTION_NAME,
};

/// Parse manifest text. The format is JSON with C/YAML-style comments,
/// trailing commas, and single-quoted strings tolerated; unknown properties
/// are ignored. Missing required fields surface as `InvalidManifest`.
pub fn parse_manifest(text: &str) -> anyhow::Result<UploadManifest> {
    json5::from_str(text)
        .map_err(|e| ErrorMetadata::bad_request("InvalidManifest", format!("invalid manifest: {e}")).into())
}

/// Persists one [`FunctionAsset`] per file under `{root}/functions/`,
/// written atomically so readers never observe a torn document.
pub struct AssetStore {
    base: PathBuf,
}

impl AssetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            base: root.into().join("functions"),
        }
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.base.join(format!("{id}.json"))
    }

    pub fn save(&self, asset: &FunctionAsset) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(asset)?;
        common::fs::write_atomically(&self.path_for(&asset.id), json.as_bytes())?;
        tracing::debug!("saved function asset {}", asset.id);
        Ok(())
    }

    pub fn load(&self, id: &str) -> anyhow::Result<Option<FunctionAsset>> {
        let path = self.path_for(id);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).context(format!("failed to read {}", path.display())),
        };
        let asset = serde_json::from_str(&text)
            .with_context(|| format!("corrupt asset document {}", path.display()))?;
        Ok(Some(asset))
    }

    pub fn list(&self) -> anyhow::Result<Vec<FunctionAsset>> {
        let entries = match std::fs::read_dir(&self.base) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).context(format!("failed to scan {}", self.base.display())),
        };
        let mut assets = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let text = std::fs::read_to_string(&path)?;
            match serde_json::from_str(&text) {
                Ok(asset) => assets.push(asset),
                Err(e) => tracing::warn!("skipping corrupt asset {}: {e}", path.display()),
            }
        }
        assets.sort_by(|a: &FunctionAsset, b: &FunctionAsset| a.id.cmp(&b.id));
        Ok(assets)
    }

    /// Resolve an upload manifest into a persistable asset: exactly one of
    /// `source`/`sourceFile` (and per-dependency `source`/`file`) must yield
    /// non-empty text, with file paths resolved against `cwd`. Mints a
    /// UUIDv7 when the manifest omits an id.
    pub fn resolve_manifest(
        &self,
        cwd: &Path,
        manifest: UploadManifest,
    ) -> anyhow::Result<FunctionAsset> {
        let source_code = resolve_source(
            cwd,
            manifest.source.as_deref(),
            manifest.source_file.as_deref(),
            "function",
        )?;
        let mut dependencies = IndexMap::with_capacity(manifest.dependencies.len());
        for (name, dep) in &manifest.dependencies {
            let text = resolve_source(cwd, dep.source.as_deref(), dep.file.as_deref(), name)?;
            dependencies.insert(name.clone(), text);
        }
        Ok(FunctionAsset {
            id: manifest
                .id
                .unwrap_or_else(|| uuid::Uuid::now_v7().to_string()),
            language_id: manifest.language_id,
            function_name: manifest
                .function_name
                .unwrap_or_else(|| DEFAULT_FUNCTION_NAME.to_string()),
            js_eval_as_module: manifest.js_eval_as_module.unwrap_or(false),
            source_code,
            dependencies,
        })
    }
}

fn resolve_source(
    cwd: &Path,
    inline: Option<&str>,
    file: Option<&str>,
    what: &str,
) -> anyhow::Result<String> {
    let text = match (inline, file) {
        (Some(_), Some(_)) => {
            return Err(ErrorMetadata::bad_request(
                "InvalidManifest",
                format!("{what}: provide source or a source file, not both"),
            )
            .into());
        },
        (Some(inline), None) => inline.to_string(),
        (None, Some(file)) => {
            let path = cwd.join(file);
            std::fs::read_to_string(&path).map_err(|e| {
                ErrorMetadata::bad_request(
                    "InvalidManifest",
                    format!("{what}: failed to read {}: {e}", path.display()),
                )
            })?
        },
        (None, None) => {
            return Err(ErrorMetadata::bad_request(
                "InvalidManifest",
                format!("{what}: missing source"),
            )
            .into());
        },
    };
    if text.trim().is_empty() {
        return Err(ErrorMetadata::bad_request(
            "InvalidManifest",
            format!("{what}: source is empty"),
        )
        .into());
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use errors::ErrorMetadataAnyhowExt;
    use regex::Regex;

    use super::*;
    use crate::types::LanguageId;

    const UUID_V7_RE: &str =
        r"^[0-9a-f]{8}-[0-9a-f]{4}-7[0-9a-f]{3}-[89ab][0-9a-f]{3}-[0-9a-f]{12}$";

    #[test]
    fn manifest_tolerates_jsonc_syntax() -> anyhow::Result<()> {
        let manifest = parse_manifest(
            r#"{
                // the evaluator to use
                'languageId': 'js',
                "functionName": "handler",
                "source": "function handler(e) { return e; }",
                "unknownField": 42,
            }"#,
        )?;
        assert_eq!(manifest.language_id, LanguageId::Js);
        assert_eq!(manifest.function_name.as_deref(), Some("handler"));
        Ok(())
    }

    #[test]
    fn manifest_requires_language() {
        let err = parse_manifest(r#"{"source": "x"}"#).unwrap_err();
        assert_eq!(err.short_msg(), "InvalidManifest");
    }

    #[test]
    fn resolve_rejects_ambiguous_source() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = AssetStore::new(dir.path().join(".faas"));
        let manifest = parse_manifest(
            r#"{"languageId": "js", "source": "x()", "sourceFile": "fn.js"}"#,
        )?;
        let err = store.resolve_manifest(dir.path(), manifest).unwrap_err();
        assert_eq!(err.short_msg(), "InvalidManifest");

        let manifest = parse_manifest(r#"{"languageId": "js"}"#)?;
        let err = store.resolve_manifest(dir.path(), manifest).unwrap_err();
        assert_eq!(err.short_msg(), "InvalidManifest");

        let manifest = parse_manifest(r#"{"languageId": "js", "source": "   "}"#)?;
        let err = store.resolve_manifest(dir.path(), manifest).unwrap_err();
        assert_eq!(err.short_msg(), "InvalidManifest");
        Ok(())
    }

    #[test]
    fn resolve_save_load_round_trips() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = AssetStore::new(dir.path().join(".faas"));

        std::fs::write(dir.path().join("greeter.js"), "module.exports = {};")?;
        let manifest = parse_manifest(
            r#"{
                languageId: 'js',
                source: "function handler(e) { return e; }",
                dependencies: { greeter: { file: 'greeter.js' } },
            }"#,
        )?;
        let asset = store.resolve_manifest(dir.path(), manifest)?;

        // Server-minted ids are UUIDv7.
        assert!(Regex::new(UUID_V7_RE)?.is_match(&asset.id));
        assert_eq!(asset.function_name, DEFAULT_FUNCTION_NAME);
        assert_eq!(asset.dependencies["greeter"], "module.exports = {};");

        store.save(&asset)?;
        let loaded = store.load(&asset.id)?.expect("asset should exist");
        assert_eq!(loaded, asset);

        assert_eq!(store.load("missing-id")?, None);
        assert_eq!(store.list()?, vec![asset]);
        Ok(())
    }

    #[test]
    fn minted_ids_carry_nondecreasing_timestamps() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = AssetStore::new(dir.path());
        let mut stamps = Vec::new();
        for _ in 0..3 {
            let manifest = parse_manifest(r#"{"languageId": "js", "source": "f()"}"#)?;
            let id = store.resolve_manifest(dir.path(), manifest)?.id;
            // The first 48 bits of a v7 id are epoch millis.
            stamps.push(id.replace('-', "")[..12].to_string());
        }
        let mut sorted = stamps.clone();
        sorted.sort();
        assert_eq!(stamps, sorted);
        Ok(())
    }

    #[test]
    fn manifest_supplied_id_is_honored() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = AssetStore::new(dir.path());
        let manifest = parse_manifest(
            r#"{"id": "my-function", "languageId": "python", "source": "def handler(e): pass"}"#,
        )?;
        let asset = store.resolve_manifest(dir.path(), manifest)?;
        assert_eq!(asset.id, "my-function");
        Ok(())
    }
}
