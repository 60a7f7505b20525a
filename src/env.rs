//! 求值上下文：作用域帧栈、内建函数表、导入句柄与若干编译开关。
//! 一次编译独占一个 `Env`，不跨线程共享。

use crate::ast::{MixinDefinition, Node, NodeKind, Selector};
use crate::functions::FunctionRegistry;
use crate::importer::Importer;
use crate::CompileOptions;
use indexmap::IndexMap;
use std::collections::HashSet;

/// 作用域帧。变量表在帧建立时整体登记，同名后写覆盖前写（惰性求值语义）。
#[derive(Debug, Clone, Default)]
pub struct Frame {
    pub variables: IndexMap<String, Node>,
    pub mixins: Vec<MixinEntry>,
}

/// 可被 mixin 调用命中的成员：显式定义，或选择器可作调用路径的规则集
/// （带守卫的规则集只能被调用，不在原地输出）。
#[derive(Debug, Clone)]
pub enum MixinEntry {
    Definition(MixinDefinition),
    Ruleset {
        name: String,
        rules: Vec<Node>,
        guard: Option<Node>,
    },
}

impl MixinEntry {
    pub fn name(&self) -> &str {
        match self {
            MixinEntry::Definition(def) => &def.name,
            MixinEntry::Ruleset { name, .. } => name,
        }
    }

    pub fn rules(&self) -> &[Node] {
        match self {
            MixinEntry::Definition(def) => &def.rules,
            MixinEntry::Ruleset { rules, .. } => rules,
        }
    }
}

impl Frame {
    /// 扫描一段规则体，登记其中的变量与 mixin 成员。
    pub fn from_rules(rules: &[Node]) -> Self {
        let mut frame = Frame::default();
        frame.absorb(rules);
        frame
    }

    pub fn absorb(&mut self, rules: &[Node]) {
        for node in rules {
            match &node.kind {
                NodeKind::Rule(rule) if rule.variable => {
                    let name = rule.name.trim_start_matches('@').to_string();
                    self.variables.insert(name, rule.value.clone());
                }
                NodeKind::MixinDefinition(def) => {
                    self.mixins.push(MixinEntry::Definition((**def).clone()));
                }
                NodeKind::Ruleset(ruleset) => {
                    for selector in &ruleset.selectors {
                        if let Some(name) = callable_name(selector) {
                            self.mixins.push(MixinEntry::Ruleset {
                                name,
                                rules: ruleset.rules.clone(),
                                guard: ruleset.guard.clone(),
                            });
                        }
                    }
                }
                _ => {}
            }
        }
    }

    pub fn bind(&mut self, name: impl Into<String>, value: Node) {
        self.variables.insert(name.into(), value);
    }
}

/// 选择器能否作为 mixin 调用路径：紧邻的纯文本类/ID 复合（如 `.a` 或 `.a.b`）。
fn callable_name(selector: &Selector) -> Option<String> {
    let mut name = String::new();
    for (i, element) in selector.elements.iter().enumerate() {
        if i > 0 && !element.combinator.is_empty() {
            return None;
        }
        name.push_str(element.value_text()?);
    }
    if name.starts_with('.') || name.starts_with('#') {
        Some(name)
    } else {
        None
    }
}

/// extend 记录：求值期间收集，求值后由访问器统一改写选择器。
#[derive(Debug, Clone)]
pub struct ExtendRecord {
    pub extender: Selector,
    pub target: Selector,
    pub partial: bool,
}

pub struct Env<'i> {
    pub frames: Vec<Frame>,
    pub compress: bool,
    pub strict_math: bool,
    pub keep_comments: bool,
    pub optimization: u8,
    pub functions: FunctionRegistry,
    pub importer: Option<&'i dyn Importer>,
    /// 正在求值的变量名（不含 `@`），用于截断直接递归。
    pub variable_stack: Vec<String>,
    /// `@import (once)` 的按绝对路径去重集合。
    pub imported: HashSet<String>,
    /// 正在展开中的导入路径，无条件截断循环导入（与 once/multiple 无关）。
    pub importing: Vec<String>,
    pub extends: Vec<ExtendRecord>,
    /// 守卫求值期间 `default()` 的取值；守卫之外为 `None`。
    pub default_guard: Option<bool>,
    pub current_file: Option<String>,
    /// mixin 展开深度，用于截断失控递归。
    pub mixin_depth: usize,
}

impl<'i> Env<'i> {
    pub fn new(options: &CompileOptions) -> Self {
        Self {
            frames: Vec::new(),
            compress: options.compress,
            strict_math: options.strict_math,
            keep_comments: options.keep_comments,
            optimization: options.optimization,
            functions: FunctionRegistry::with_builtins(),
            importer: None,
            variable_stack: Vec::new(),
            imported: HashSet::new(),
            importing: Vec::new(),
            extends: Vec::new(),
            default_guard: None,
            current_file: None,
            mixin_depth: 0,
        }
    }

    pub fn push_frame(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    pub fn pop_frame(&mut self) {
        self.frames.pop();
    }

    /// 自内向外查找变量定义，返回未求值的规则值节点。
    pub fn find_variable(&self, name: &str) -> Option<Node> {
        for frame in self.frames.iter().rev() {
            if let Some(value) = frame.variables.get(name) {
                return Some(value.clone());
            }
        }
        None
    }
}
