use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::errors::{Result, SyncError};
use crate::tag_utils::FilterEntry;

pub const TAGS_GROUP_NAME: &str = "Tags";
const INDENT: &[u8] = b"    ";

/// What to do when no group in the document is named "Tags".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MissingTagsPolicy {
    /// Rewrite the document unchanged.
    #[default]
    Ignore,
    /// Fail the run without touching the file.
    Error,
    /// Add a new "Tags" group at the end of the document.
    Append,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpliceOutcome {
    Replaced(usize),
    Unchanged,
    Appended,
}

/// Canonical path of the running binary, symlinks resolved.
pub fn binary_path() -> Result<PathBuf> {
    std::env::current_exe()
        .and_then(|p| p.canonicalize())
        .map_err(|e| SyncError::Config(format!("cannot locate own binary: {}", e)))
}

/// `<binary dir>/../res/filters.json`
pub fn default_filters_path() -> Result<PathBuf> {
    filters_path_from_binary(&binary_path()?)
}

pub fn filters_path_from_binary(exe: &Path) -> Result<PathBuf> {
    let install_root = exe
        .parent()
        .and_then(Path::parent)
        .ok_or_else(|| SyncError::Config(format!("no parent directory above {}", exe.display())))?;
    Ok(install_root.join("res").join("filters.json"))
}

pub fn load_document(path: &Path) -> Result<Vec<Value>> {
    let content = fs::read(path).map_err(|e| SyncError::filesystem(path, e))?;
    let doc: Value = serde_json::from_slice(&content).map_err(|e| SyncError::MalformedDocument {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    match doc {
        Value::Array(groups) => Ok(groups),
        other => Err(SyncError::MalformedDocument {
            path: path.to_path_buf(),
            reason: format!("expected a top-level array, found {}", json_kind(&other)),
        }),
    }
}

pub fn splice_tags(
    groups: &mut Vec<Value>,
    entries: &[FilterEntry],
    policy: MissingTagsPolicy,
) -> Result<SpliceOutcome> {
    let filters = serde_json::to_value(entries).map_err(|e| SyncError::Config(e.to_string()))?;

    let mut replaced = 0;
    for group in groups.iter_mut() {
        let Some(object) = group.as_object_mut() else {
            continue;
        };
        if object.get("name").and_then(Value::as_str) == Some(TAGS_GROUP_NAME) {
            object.insert("filters".to_string(), filters.clone());
            replaced += 1;
        }
    }
    if replaced > 0 {
        debug!("Replaced filters of {} \"{}\" group(s)", replaced, TAGS_GROUP_NAME);
        return Ok(SpliceOutcome::Replaced(replaced));
    }

    match policy {
        MissingTagsPolicy::Ignore => {
            warn!("No \"{}\" group found, document left unchanged", TAGS_GROUP_NAME);
            Ok(SpliceOutcome::Unchanged)
        }
        MissingTagsPolicy::Error => Err(SyncError::MissingSection(TAGS_GROUP_NAME.to_string())),
        MissingTagsPolicy::Append => {
            groups.push(json!({
                "type": "group",
                "name": TAGS_GROUP_NAME,
                "filters": filters,
            }));
            Ok(SpliceOutcome::Appended)
        }
    }
}

pub fn render_document(groups: &[Value]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(INDENT);
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    groups
        .serialize(&mut serializer)
        .map_err(|e| SyncError::Config(format!("cannot serialize filters document: {}", e)))?;
    Ok(out)
}

/// Replaces `path` with `content` through a sibling temp file and a rename.
/// Symlinks are followed so the link survives and the real file is updated,
/// and the existing file's permissions carry over to the new one.
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let target = path.canonicalize().map_err(|e| SyncError::filesystem(path, e))?;
    let permissions = fs::metadata(&target)
        .map_err(|e| SyncError::filesystem(&target, e))?
        .permissions();
    let dir = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| SyncError::filesystem(dir, e))?;
    tmp.write_all(content)
        .and_then(|_| tmp.as_file().set_permissions(permissions))
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| SyncError::filesystem(tmp.path(), e))?;
    tmp.persist(&target)
        .map_err(|e| SyncError::filesystem(&target, e.error))?;
    Ok(())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag_utils::FILTER_TYPE_GENRE;
    use tempfile::tempdir;

    fn entry(id: &str, name: &str) -> FilterEntry {
        FilterEntry {
            kind: FILTER_TYPE_GENRE.to_string(),
            name: name.to_string(),
            id: id.to_string(),
            can_exclude: true,
        }
    }

    fn sample_groups() -> Vec<Value> {
        vec![
            json!({"type": "title", "name": "Title"}),
            json!({"type": "sort", "name": "Sort", "options": ["Latest", "Popular"], "default": {"index": 0, "ascending": false}}),
            json!({"type": "group", "name": "Tags", "filters": [{"type": "genre", "name": "Old", "id": "old", "canExclude": true}]}),
            json!({"type": "check", "name": "Has Chapters", "default": true}),
        ]
    }

    #[test]
    fn test_replaces_only_tags_filters() {
        let mut groups = sample_groups();
        let before = groups.clone();
        let entries = vec![entry("a", "Action"), entry("b", "Comedy")];

        let outcome = splice_tags(&mut groups, &entries, MissingTagsPolicy::Ignore).unwrap();

        assert_eq!(outcome, SpliceOutcome::Replaced(1));
        assert_eq!(groups[2]["filters"], serde_json::to_value(&entries).unwrap());
        assert_eq!(groups[2]["type"], "group");
        for i in [0, 1, 3] {
            assert_eq!(groups[i], before[i]);
        }
    }

    #[test]
    fn test_every_tags_group_is_replaced() {
        let mut groups = vec![
            json!({"name": "Tags", "filters": []}),
            "not an object".into(),
            json!({"name": "Tags"}),
        ];
        let outcome = splice_tags(&mut groups, &[entry("a", "Action")], MissingTagsPolicy::Error).unwrap();
        assert_eq!(outcome, SpliceOutcome::Replaced(2));
        assert_eq!(groups[2]["filters"][0]["id"], "a");
        assert_eq!(groups[1], json!("not an object"));
    }

    #[test]
    fn test_missing_tags_policies() {
        let original = vec![json!({"name": "Genres", "filters": []})];
        let entries = vec![entry("a", "Action")];

        let mut groups = original.clone();
        let outcome = splice_tags(&mut groups, &entries, MissingTagsPolicy::Ignore).unwrap();
        assert_eq!(outcome, SpliceOutcome::Unchanged);
        assert_eq!(groups, original);

        let mut groups = original.clone();
        let err = splice_tags(&mut groups, &entries, MissingTagsPolicy::Error).unwrap_err();
        assert!(matches!(err, SyncError::MissingSection(_)));
        assert_eq!(groups, original);

        let mut groups = original.clone();
        let outcome = splice_tags(&mut groups, &entries, MissingTagsPolicy::Append).unwrap();
        assert_eq!(outcome, SpliceOutcome::Appended);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[1]["name"], "Tags");
        assert_eq!(groups[1]["filters"][0]["name"], "Action");
    }

    #[test]
    fn test_render_uses_four_space_indent_and_keeps_key_order() {
        let groups = vec![json!({"type": "group", "name": "Tags", "filters": []})];
        let rendered = String::from_utf8(render_document(&groups).unwrap()).unwrap();
        assert_eq!(
            rendered,
            "[\n    {\n        \"type\": \"group\",\n        \"name\": \"Tags\",\n        \"filters\": []\n    }\n]"
        );
    }

    #[test]
    fn test_load_rejects_non_array() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("filters.json");
        fs::write(&path, r#"{"name": "Tags"}"#).unwrap();
        let err = load_document(&path).unwrap_err();
        assert!(matches!(err, SyncError::MalformedDocument { .. }));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempdir().unwrap();
        let err = load_document(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, SyncError::Filesystem { .. }));
    }

    #[test]
    fn test_shorter_rewrite_leaves_no_trailing_bytes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("filters.json");
        let long = format!("[{}]", vec![r#"{"name": "Filler"}"#; 50].join(", "));
        fs::write(&path, &long).unwrap();

        write_atomic(&path, b"[]").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"[]");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_rewrite_keeps_file_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let path = dir.path().join("filters.json");
        fs::write(&path, "[]").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        write_atomic(&path, b"[{\"name\": \"Tags\"}]").unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o644);
    }

    #[cfg(unix)]
    #[test]
    fn test_rewrite_through_symlink_updates_real_file() {
        let dir = tempdir().unwrap();
        let real = dir.path().join("real_filters.json");
        let link = dir.path().join("filters.json");
        fs::write(&real, r#"[{"name": "Old"}]"#).unwrap();
        std::os::unix::fs::symlink(&real, &link).unwrap();

        write_atomic(&link, b"[]").unwrap();

        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(fs::read(&real).unwrap(), b"[]");
        assert_eq!(fs::read(&link).unwrap(), b"[]");
    }

    #[test]
    fn test_rewrite_of_missing_file_fails() {
        let dir = tempdir().unwrap();
        let err = write_atomic(&dir.path().join("absent.json"), b"[]").unwrap_err();
        assert!(matches!(err, SyncError::Filesystem { .. }));
    }

    #[test]
    fn test_binary_path_is_canonical() {
        let exe = binary_path().unwrap();
        assert_eq!(exe.canonicalize().unwrap(), exe);
    }

    #[test]
    fn test_filters_path_from_binary() {
        let path = filters_path_from_binary(Path::new("/opt/source/scripts/update-tags")).unwrap();
        assert_eq!(path, PathBuf::from("/opt/source/res/filters.json"));
    }

    #[test]
    fn test_policy_from_toml_value() {
        #[derive(Deserialize)]
        struct Holder {
            policy: MissingTagsPolicy,
        }
        let holder: Holder = toml::from_str(r#"policy = "append""#).unwrap();
        assert_eq!(holder.policy, MissingTagsPolicy::Append);
    }
}
