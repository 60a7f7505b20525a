use thiserror::Error;

/// 错误分类，覆盖词法、语法与语义三个阶段。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    // 词法
    UnterminatedComment,
    UnterminatedString,
    UnbalancedBraces,
    // 语法
    Expected,
    ExtendNotTerminated,
    UnrecognizedCondition,
    DirectiveUnknown,
    MissingSemicolon,
    IncompleteRule,
    // 语义
    UndefinedVariable,
    RecursiveVariable,
    InvalidVariableForPropertyName,
    NamedAfterPositional,
    WrongArgumentCount,
    NoMatchingMixin,
    IncomparableOperands,
    DivideByZero,
    ColorArithmetic,
    InvalidImportCombo,
    UnrecognizedImportOption,
    IncompatibleUnits,
    // 宿主 I/O（导入解析）
    ImportFailed,
}

/// 编译全流程统一的错误类型，始终携带最近可得的定位信息。
#[derive(Debug, Error)]
#[error("{message} (位置 {index}{})", file_suffix(.file))]
pub struct LessError {
    pub kind: ErrorKind,
    pub message: String,
    pub index: usize,
    pub file: Option<String>,
}

fn file_suffix(file: &Option<String>) -> String {
    match file {
        Some(name) => format!(", 文件 {name}"),
        None => String::new(),
    }
}

pub type LessResult<T> = Result<T, LessError>;

impl LessError {
    /// 解析阶段错误，定位到源码字节偏移。
    pub fn parse<S: Into<String>>(kind: ErrorKind, message: S, index: usize) -> Self {
        LessError {
            kind,
            message: message.into(),
            index,
            file: None,
        }
    }

    /// 求值阶段错误，定位信息由调用方在需要时补充。
    pub fn eval<S: Into<String>>(kind: ErrorKind, message: S) -> Self {
        LessError {
            kind,
            message: message.into(),
            index: 0,
            file: None,
        }
    }

    pub fn with_file(mut self, file: Option<&str>) -> Self {
        if self.file.is_none() {
            self.file = file.map(str::to_string);
        }
        self
    }
}
