//! `@import` 的宿主能力接口与文件系统实现。
//! 核心只依赖 `Importer` 这一个外部接口，I/O 全部同步发生在这里。

use crate::error::{ErrorKind, LessError, LessResult};
use std::cell::RefCell;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// 导入解析结果。`already_imported` 由 `@import (once)` 语义消费。
#[derive(Debug, Clone)]
pub struct ImportedSource {
    pub source: String,
    pub canonical_path: String,
    pub already_imported: bool,
}

pub trait Importer {
    fn import(&self, path: &str, current_file: Option<&str>) -> LessResult<ImportedSource>;
}

/// 基于文件系统的默认实现：优先相对当前文件目录，再依次检索 include 路径，
/// 无扩展名时补 `.less` 再试。
pub struct FileImporter {
    current_dir: Option<PathBuf>,
    include_paths: Vec<PathBuf>,
    imported: RefCell<HashSet<PathBuf>>,
}

impl FileImporter {
    pub fn new(current_dir: Option<PathBuf>, include_paths: Vec<PathBuf>) -> Self {
        Self {
            current_dir,
            include_paths,
            imported: RefCell::new(HashSet::new()),
        }
    }

    fn resolve(&self, target: &str, current_file: Option<&str>) -> LessResult<PathBuf> {
        let raw = Path::new(target);
        let mut candidates = Vec::new();
        if raw.is_absolute() {
            candidates.push(raw.to_path_buf());
        } else {
            if let Some(dir) = current_file.and_then(|f| Path::new(f).parent()) {
                candidates.push(dir.join(raw));
            }
            if let Some(dir) = &self.current_dir {
                candidates.push(dir.join(raw));
            }
            for base in &self.include_paths {
                candidates.push(base.join(raw));
            }
        }
        for candidate in candidates {
            if let Some(found) = Self::find_existing(&candidate) {
                return Ok(found);
            }
        }
        Err(LessError::eval(
            ErrorKind::ImportFailed,
            format!("无法解析 @import 路径 {target}"),
        ))
    }

    fn find_existing(candidate: &Path) -> Option<PathBuf> {
        let mut attempts = vec![candidate.to_path_buf()];
        if candidate.extension().is_none() {
            attempts.push(candidate.with_extension("less"));
        }
        for attempt in attempts {
            if attempt.exists() && attempt.is_file() {
                if let Ok(real) = attempt.canonicalize() {
                    return Some(real);
                }
                return Some(attempt);
            }
        }
        None
    }
}

impl Importer for FileImporter {
    fn import(&self, path: &str, current_file: Option<&str>) -> LessResult<ImportedSource> {
        let resolved = self.resolve(path, current_file)?;
        let source = fs::read_to_string(&resolved).map_err(|err| {
            LessError::eval(
                ErrorKind::ImportFailed,
                format!("读取文件 {} 失败: {err}", resolved.display()),
            )
        })?;
        let already_imported = !self.imported.borrow_mut().insert(resolved.clone());
        Ok(ImportedSource {
            source,
            canonical_path: resolved.display().to_string(),
            already_imported,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_path_reports_import_failure() {
        let importer = FileImporter::new(None, Vec::new());
        let err = importer.import("definitely-missing.less", None).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ImportFailed);
    }
}
