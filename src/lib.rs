//! less_rs 库入口，提供面向 Rust 与 Node.js 的 LESS 编译能力。
//! 流水线为：分块（Chunker）→ 解析（Parser）→ 求值（Evaluator）→
//! extend 改写（Visitor）→ CSS 输出（Output）。

mod ast;
mod chunker;
mod color;
mod env;
mod error;
mod evaluator;
mod functions;
mod importer;
mod output;
mod parser;
mod tokenizer;
mod unit;
mod visitor;

pub use crate::error::{ErrorKind, LessError, LessResult};
pub use crate::importer::{FileImporter, ImportedSource, Importer};

use crate::env::Env;
use crate::evaluator::Evaluator;
use crate::output::Output;
use crate::parser::Parser;
use std::fs;
use std::path::{Path, PathBuf};

/// LESS 编译配置。`optimization` 为 0 时跳过分块预扫描。
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// 是否输出压缩后的 CSS。
    pub compress: bool,
    /// 严格数学模式：运算符只在括号内生效。
    pub strict_math: bool,
    /// 分块优化级别：0 关闭预扫描，≥1 启用。
    pub optimization: u8,
    /// 是否在输出中保留 `/* */` 注释。
    pub keep_comments: bool,
    /// 当前源文件所在目录，用于解析相对 @import。
    pub current_dir: Option<PathBuf>,
    /// 额外的检索目录。
    pub include_paths: Vec<PathBuf>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            compress: false,
            strict_math: false,
            optimization: 1,
            keep_comments: true,
            current_dir: None,
            include_paths: Vec::new(),
        }
    }
}

/// 编译 LESS 源码为 CSS 文本。
///
/// # 参数
/// * `source` - 待编译的 LESS 字符串
/// * `options` - 编译配置
pub fn compile(source: &str, options: CompileOptions) -> LessResult<String> {
    if options.current_dir.is_some() || !options.include_paths.is_empty() {
        let importer = FileImporter::new(
            options.current_dir.clone(),
            options.include_paths.clone(),
        );
        compile_with_importer(source, None, &options, Some(&importer))
    } else {
        compile_with_importer(source, None, &options, None)
    }
}

/// 从文件路径编译 LESS，自动处理 @import。
pub fn compile_file<P: AsRef<Path>>(path: P, mut options: CompileOptions) -> LessResult<String> {
    let path = path.as_ref();
    let source = fs::read_to_string(path).map_err(|err| {
        LessError::eval(
            ErrorKind::ImportFailed,
            format!("读取文件 {} 失败: {err}", path.display()),
        )
    })?;
    if options.current_dir.is_none() {
        if let Some(parent) = path.parent() {
            options.current_dir = Some(parent.to_path_buf());
        }
    }
    let importer = FileImporter::new(
        options.current_dir.clone(),
        options.include_paths.clone(),
    );
    compile_with_importer(
        &source,
        Some(&path.display().to_string()),
        &options,
        Some(&importer),
    )
}

/// 注入自定义导入能力的编译入口（核心唯一的外部接口）。
pub fn compile_with_importer(
    source: &str,
    file_name: Option<&str>,
    options: &CompileOptions,
    importer: Option<&dyn Importer>,
) -> LessResult<String> {
    let parser = Parser::new(options.strict_math, options.keep_comments, options.optimization);
    let nodes = parser.parse(source, file_name)?;

    let mut env = Env::new(options);
    env.importer = importer;
    env.current_file = file_name.map(str::to_string);
    let mut evaluator = Evaluator::new(env);
    let mut evaluated = evaluator.evaluate(nodes)?;

    let records = std::mem::take(&mut evaluator.env.extends);
    visitor::resolve_extends(&mut evaluated, &records);

    let mut out = Output::new(options.compress, options.keep_comments);
    ast::append_statement_sequence(&evaluated, &mut out);
    Ok(out.finish().trim().to_string())
}

#[cfg(feature = "node")]
use napi::{Error, Result};
#[cfg(feature = "node")]
use napi_derive::napi;

/// Node.js 侧的编译选项对象。
#[cfg(feature = "node")]
#[napi(object)]
pub struct JsCompileOptions {
    /// 是否压缩输出 CSS。
    pub compress: Option<bool>,
    /// 严格数学模式。
    pub strict_math: Option<bool>,
    /// 源文件路径，用于解析 @import。
    pub filename: Option<String>,
}

/// 暴露给 Node.js 的编译函数。
#[cfg(feature = "node")]
#[napi]
pub fn compile_less(source: String, options: Option<JsCompileOptions>) -> Result<String> {
    let opt = options.unwrap_or(JsCompileOptions {
        compress: None,
        strict_math: None,
        filename: None,
    });
    let mut compile_options = CompileOptions {
        compress: opt.compress.unwrap_or(false),
        strict_math: opt.strict_math.unwrap_or(false),
        ..CompileOptions::default()
    };
    if let Some(filename) = opt.filename {
        let path = PathBuf::from(&filename);
        if let Some(parent) = path.parent() {
            let dir = parent.to_path_buf();
            compile_options.current_dir = Some(dir.clone());
            compile_options.include_paths.push(dir);
        }
    }
    compile(&source, compile_options).map_err(|err| Error::from_reason(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_basic_variable() {
        let src = r"@base: #111;
body {
  color: @base;
}";
        let css = compile(src, CompileOptions::default()).unwrap();
        assert!(css.contains("color: #111"));
    }

    #[test]
    fn compile_nested_selectors() {
        let src = r".btn {
  color: #fff;
  &:hover {
    color: #000;
  }
}";
        let css = compile(src, CompileOptions::default()).unwrap();
        assert!(css.contains(".btn:hover"));
        assert!(css.contains("color: #000"));
    }

    #[test]
    fn compile_important_flag() {
        let src = r"@base: 10px;
.box {
  margin: @base !important;
}";
        let css = compile(
            src,
            CompileOptions {
                compress: true,
                ..CompileOptions::default()
            },
        )
        .unwrap();
        assert!(css.contains("margin:10px!important"));
        assert!(!css.contains("!important!important"));
    }

    #[test]
    fn compile_mixin_invocation() {
        let src = r".rounded(@radius) {
  border-radius: @radius;
}

.card {
  .rounded(8px);
}";
        let css = compile(src, CompileOptions::default()).unwrap();
        assert!(css.contains("border-radius: 8px"));
        assert!(!css.contains(".rounded"));
    }

    #[test]
    fn compile_arithmetic_expression() {
        let src = r"@base: 10px;
.box {
  width: @base + 5px;
  padding: (@base * 2);
}";
        let css = compile(src, CompileOptions::default()).unwrap();
        assert!(css.contains("width: 15px"));
        assert!(css.contains("padding: 20px"));
    }

    #[test]
    fn compile_multiple_arithmetic_segments() {
        let src = r"@spacing: 12px;
.box {
  padding: (@spacing * 0.75) (@spacing * 1.5);
}";
        let css = compile(src, CompileOptions::default()).unwrap();
        assert!(css.contains("padding: 9px 18px"));
    }

    #[test]
    fn compile_color_functions() {
        let src = r"@brand: #336699;
.btn {
  background: lighten(@brand, 20%);
  border-color: darken(@brand, 10%);
  color: fade(#ffffff, 40%);
}";
        let css = compile(src, CompileOptions::default()).unwrap();
        assert!(css.contains("background: #6699cc"));
        assert!(css.contains("border-color: #264c73"));
        assert!(css.contains("color: rgba(255, 255, 255, 0.4)"));
    }

    #[test]
    fn compile_arithmetic_division_and_negative() {
        let src = r"@gap: 12px;
.grid {
  margin: -(@gap / 2);
  width: (@gap * -2);
}";
        let css = compile(src, CompileOptions::default()).unwrap();
        assert!(css.contains("margin: -6px"));
        assert!(css.contains("width: -24px"));
    }

    #[test]
    fn compile_import_statement() {
        let src = r#"@import "reset.css";
@color: #000;
body {
  color: @color;
}"#;
        let pretty = compile(src, CompileOptions::default()).unwrap();
        assert!(pretty.trim_start().starts_with("@import \"reset.css\";"));
        assert!(pretty.contains("body {"));

        let minified = compile(
            src,
            CompileOptions {
                compress: true,
                ..CompileOptions::default()
            },
        )
        .unwrap();
        assert!(minified.starts_with("@import \"reset.css\";"));
        assert!(minified.contains("body{color:#000}"));
    }
}
