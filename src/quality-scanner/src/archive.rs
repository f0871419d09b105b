//! 源码归档打包
//!
//! 把源码树压缩为 zip 归档，排除默认列表与仓库自己的
//! `.gitignore` 条目。每条 ignore 条目同时在任意深度生效。

use std::fs;
use std::io::{Cursor, Write};
use std::path::Path;

use anyhow::{Context, Result};
use glob::Pattern;
use tracing::{debug, warn};

/// 默认排除列表：版本库元数据与常见构建产物目录
const DEFAULT_EXCLUDES: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "node_modules",
    "target",
    "dist",
    "build",
    "__pycache__",
    ".idea",
    ".vscode",
];

/// 仓库的 ignore 文件名
const IGNORE_FILE: &str = ".gitignore";

/// 排除规则集合
pub struct ExcludeSet {
    patterns: Vec<Pattern>,
}

impl ExcludeSet {
    /// 从默认列表 + 仓库 .gitignore 构建规则集合
    pub fn from_root(root: &Path) -> Self {
        let mut entries: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();

        let ignore_path = root.join(IGNORE_FILE);
        if let Ok(raw) = fs::read_to_string(&ignore_path) {
            for line in raw.lines() {
                let line = line.trim();
                // 空行、注释和取反规则跳过（取反不支持）
                if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                    continue;
                }
                // 目录规则的尾斜杠与锚定用的头斜杠都去掉
                let entry = line.trim_end_matches('/').trim_start_matches('/');
                if !entry.is_empty() {
                    entries.push(entry.to_string());
                }
            }
            debug!("Loaded ignore entries from {}", ignore_path.display());
        }

        Self::from_entries(&entries)
    }

    /// 从条目列表构建；每条同时生成任意深度变体
    fn from_entries(entries: &[String]) -> Self {
        let mut patterns = Vec::new();
        for entry in entries {
            match Pattern::new(entry) {
                Ok(p) => patterns.push(p),
                Err(e) => warn!("Skipping invalid ignore pattern {:?}: {}", entry, e),
            }
            // 任意深度匹配
            let nested = format!("**/{}", entry);
            if let Ok(p) = Pattern::new(&nested) {
                patterns.push(p);
            }
        }
        Self { patterns }
    }

    /// 判断相对路径是否被排除
    pub fn is_excluded(&self, relative_path: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(relative_path))
    }
}

/// 把源码树打包为 zip 字节
///
/// 相对路径统一使用 '/' 分隔符；被排除的目录整棵子树跳过。
pub fn pack_source_tree(root: &Path) -> Result<Vec<u8>> {
    let excludes = ExcludeSet::from_root(root);

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut cursor);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);

        let mut file_count = 0usize;
        add_dir_entries(root, root, &excludes, &mut writer, &options, &mut file_count)?;

        writer.finish().context("Failed to finalize archive")?;

        debug!(files = file_count, "Source tree packed");
    }

    Ok(cursor.into_inner())
}

/// 递归添加目录内容
fn add_dir_entries(
    root: &Path,
    dir: &Path,
    excludes: &ExcludeSet,
    writer: &mut zip::ZipWriter<&mut Cursor<Vec<u8>>>,
    options: &zip::write::SimpleFileOptions,
    file_count: &mut usize,
) -> Result<()> {
    let entries =
        fs::read_dir(dir).with_context(|| format!("Failed to read directory: {}", dir.display()))?;

    for entry in entries {
        let entry = entry?;
        let path = entry.path();

        let relative = path
            .strip_prefix(root)
            .context("Entry escaped the source root")?
            .to_string_lossy()
            .replace('\\', "/");

        if excludes.is_excluded(&relative) {
            debug!("Excluded from archive: {}", relative);
            continue;
        }

        let metadata = fs::symlink_metadata(&path)?;
        if metadata.is_dir() {
            add_dir_entries(root, &path, excludes, writer, options, file_count)?;
        } else if metadata.is_file() {
            let contents = fs::read(&path)
                .with_context(|| format!("Failed to read file: {}", path.display()))?;
            writer
                .start_file(relative.as_str(), *options)
                .with_context(|| format!("Failed to add archive entry: {}", relative))?;
            writer.write_all(&contents)?;
            *file_count += 1;
        }
        // 符号链接等其它类型跳过
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    /// 列出归档内所有文件名
    fn archive_entries(bytes: &[u8]) -> BTreeSet<String> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap();
        (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect()
    }

    fn write_file(root: &Path, relative: &str, contents: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_pack_includes_source_files() {
        let tmp = tempfile::tempdir().unwrap();
        write_file(tmp.path(), "src/main.rs", "fn main() {}");
        write_file(tmp.path(), "README.md", "# readme");

        let bytes = pack_source_tree(tmp.path()).unwrap();
        let entries = archive_entries(&bytes);

        assert!(entries.contains("src/main.rs"));
        assert!(entries.contains("README.md"));
    }

    #[test]
    fn test_pack_excludes_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        write_file(tmp.path(), "src/lib.rs", "");
        write_file(tmp.path(), ".git/HEAD", "ref: refs/heads/main");
        write_file(tmp.path(), "target/debug/app", "binary");
        write_file(tmp.path(), "node_modules/pkg/index.js", "");

        let bytes = pack_source_tree(tmp.path()).unwrap();
        let entries = archive_entries(&bytes);

        assert!(entries.contains("src/lib.rs"));
        assert!(!entries.iter().any(|e| e.starts_with(".git/")));
        assert!(!entries.iter().any(|e| e.starts_with("target/")));
        assert!(!entries.iter().any(|e| e.starts_with("node_modules/")));
    }

    #[test]
    fn test_pack_honors_gitignore() {
        let tmp = tempfile::tempdir().unwrap();
        write_file(tmp.path(), ".gitignore", "secret/\n*.log\n# comment\n\n!keep.log\n");
        write_file(tmp.path(), "src/main.rs", "");
        write_file(tmp.path(), "secret/credentials.txt", "hunter2");
        write_file(tmp.path(), "logs/app.log", "log line");

        let bytes = pack_source_tree(tmp.path()).unwrap();
        let entries = archive_entries(&bytes);

        assert!(entries.contains("src/main.rs"));
        // 被 ignore 的目录中没有任何文件进入归档
        assert!(!entries.iter().any(|e| e.contains("secret")));
        assert!(!entries.iter().any(|e| e.ends_with(".log")));
    }

    #[test]
    fn test_gitignore_entries_match_at_any_depth() {
        let tmp = tempfile::tempdir().unwrap();
        write_file(tmp.path(), ".gitignore", "generated\n");
        write_file(tmp.path(), "generated/a.rs", "");
        write_file(tmp.path(), "src/deep/generated/b.rs", "");
        write_file(tmp.path(), "src/ok.rs", "");

        let bytes = pack_source_tree(tmp.path()).unwrap();
        let entries = archive_entries(&bytes);

        assert!(entries.contains("src/ok.rs"));
        assert!(!entries.iter().any(|e| e.contains("generated")));
    }

    #[test]
    fn test_exclude_set_matching() {
        let excludes =
            ExcludeSet::from_entries(&["*.tmp".to_string(), "cache".to_string()]);

        assert!(excludes.is_excluded("a.tmp"));
        assert!(excludes.is_excluded("deep/nested/b.tmp"));
        assert!(excludes.is_excluded("cache"));
        assert!(excludes.is_excluded("sub/cache"));
        assert!(!excludes.is_excluded("src/main.rs"));
    }

    #[test]
    fn test_pack_empty_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let bytes = pack_source_tree(tmp.path()).unwrap();
        assert!(archive_entries(&bytes).is_empty());
    }
}
