//! 类型化 AST：带共享头部（位置、注释、引用标记）的标签联合，
//! 以及各变体的 CSS 文本生成。求值返回新节点，原树保持不变。

use crate::color::{self, Rgba};
use crate::output::Output;

/// 所有节点共享的头部信息。
#[derive(Debug, Clone, Default)]
pub struct NodeHeader {
    /// 归一化源码中的字节偏移。
    pub index: Option<usize>,
    pub pre_comments: Vec<Comment>,
    pub post_comments: Vec<Comment>,
    /// 来自 reference 导入的节点不参与输出，除非被 extend 或 mixin 引用。
    pub is_reference: bool,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub header: NodeHeader,
    pub kind: NodeKind,
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Text(String),
    Comment(Comment),
    Keyword(String),
    Number(Number),
    Color(Rgba),
    Quoted(Quoted),
    /// 变量引用，名称含前导 `@`（间接引用为 `@@`）。
    Variable(String),
    Url(Box<Node>),
    Script(String),
    Call(Call),
    Assignment(Assignment),
    Operation(Box<Operation>),
    Condition(Box<Condition>),
    /// 空格分隔的项序列。
    Expression(Vec<Node>),
    /// 逗号分隔的表达式序列，可携带 `!important`。
    Value(Value),
    Rule(Box<Rule>),
    Attribute(Attribute),
    Ruleset(Box<Ruleset>),
    MixinDefinition(Box<MixinDefinition>),
    MixinCall(Box<MixinCall>),
    DetachedRuleset(Vec<Node>),
    DetachedCall(String),
    Import(Box<Import>),
    Media(Box<Media>),
    Directive(Box<Directive>),
    KeyFrame(Box<KeyFrame>),
    Extend(Extend),
    Paren(Box<Node>),
}

#[derive(Debug, Clone)]
pub struct Comment {
    pub text: String,
    pub index: usize,
    pub is_pre_selector: bool,
}

impl Comment {
    pub fn new(text: String, index: usize) -> Self {
        Self {
            text,
            index,
            is_pre_selector: false,
        }
    }

    /// `/* */` 注释是合法 CSS，`//` 注释只存在于 LESS 源里。
    pub fn is_css_valid(&self) -> bool {
        self.text.starts_with("/*")
    }

    /// `/**/` 与 `/*\*/` 是老式浏览器 hack，不算文档注释。
    pub fn is_css_hack(&self) -> bool {
        self.text == "/**/" || self.text == "/*\\*/"
    }

    /// `/*!` 与 `/**` 开头的注释在压缩输出中也保留。
    pub fn is_special(&self) -> bool {
        !self.is_css_hack() && (self.text.starts_with("/*!") || self.text.starts_with("/**"))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Number {
    pub value: f64,
    pub unit: String,
}

impl Number {
    pub fn new(value: f64, unit: impl Into<String>) -> Self {
        Self {
            value,
            unit: unit.into(),
        }
    }

    pub fn css(&self) -> String {
        format!("{}{}", format_number(self.value), self.unit)
    }
}

#[derive(Debug, Clone)]
pub struct Quoted {
    pub quote: Option<char>,
    pub content: String,
    /// `~"..."` 转义串输出时去掉引号。
    pub escaped: bool,
}

#[derive(Debug, Clone)]
pub struct Call {
    pub name: String,
    pub args: Vec<Node>,
}

#[derive(Debug, Clone)]
pub struct Assignment {
    pub key: String,
    pub value: Box<Node>,
}

#[derive(Debug, Clone)]
pub struct Operation {
    pub op: char,
    pub left: Node,
    pub right: Node,
}

#[derive(Debug, Clone)]
pub struct Condition {
    /// `=`、`<`、`>`、`<=`、`>=`、`and`、`or`。
    pub op: String,
    pub left: Node,
    pub right: Node,
    pub negate: bool,
}

#[derive(Debug, Clone)]
pub struct Value {
    pub expressions: Vec<Node>,
    /// 空串或 `!important`。
    pub important: String,
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub name: String,
    pub value: Node,
    /// 名称以 `@` 开头的规则是变量，永不输出。
    pub variable: bool,
    pub variadic: bool,
    /// `+:` 合并为 `", "`，`+_:` 合并为 `" "`。
    pub merge: Option<&'static str>,
    /// `@{name}: ...` 形式，求值时解析属性名。
    pub interpolated: bool,
}

#[derive(Debug, Clone)]
pub struct Attribute {
    pub key: String,
    pub op: Option<String>,
    pub value: Option<Box<Node>>,
}

#[derive(Debug, Clone)]
pub enum ElementValue {
    Text(String),
    Node(Box<Node>),
}

#[derive(Debug, Clone)]
pub struct Element {
    /// 归一化组合子：`""`、`" "`、`"+"`、`">"`、`"~"`。
    pub combinator: &'static str,
    pub value: ElementValue,
}

impl Element {
    pub fn text(combinator: &'static str, value: impl Into<String>) -> Self {
        Self {
            combinator,
            value: ElementValue::Text(value.into()),
        }
    }

    pub fn value_text(&self) -> Option<&str> {
        match &self.value {
            ElementValue::Text(t) => Some(t),
            ElementValue::Node(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Selector {
    pub elements: Vec<Element>,
}

impl Selector {
    pub fn css(&self, compress: bool) -> String {
        let mut text = String::new();
        for (i, element) in self.elements.iter().enumerate() {
            match element.combinator {
                "" => {}
                " " => {
                    if i > 0 {
                        text.push(' ');
                    }
                }
                c => {
                    if i > 0 && !compress {
                        text.push(' ');
                    }
                    text.push_str(c);
                    if !compress {
                        text.push(' ');
                    }
                }
            }
            match &element.value {
                ElementValue::Text(t) => text.push_str(t),
                ElementValue::Node(n) => text.push_str(&n.to_css(compress)),
            }
        }
        text
    }
}

/// 规则集。`guard` 为 `Some` 时即带守卫的规则集（`.sel when (...) { }`）。
#[derive(Debug, Clone, Default)]
pub struct Ruleset {
    pub selectors: Vec<Selector>,
    pub rules: Vec<Node>,
    pub guard: Option<Node>,
}

#[derive(Debug, Clone)]
pub struct MixinParam {
    pub name: Option<String>,
    pub default: Option<Node>,
    /// 无名字的字面量参数：调用实参必须与之相等才算匹配。
    pub pattern: Option<Node>,
    pub variadic: bool,
}

#[derive(Debug, Clone)]
pub struct MixinDefinition {
    pub name: String,
    pub params: Vec<MixinParam>,
    pub rules: Vec<Node>,
    pub guard: Option<Node>,
    pub variadic: bool,
}

impl MixinDefinition {
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// 无默认值的必填参数个数（含字面量模式参数）。
    pub fn required(&self) -> usize {
        self.params
            .iter()
            .filter(|p| !p.variadic && p.default.is_none())
            .count()
    }
}

#[derive(Debug, Clone)]
pub struct MixinArg {
    pub name: Option<String>,
    pub value: Node,
}

#[derive(Debug, Clone)]
pub struct MixinCall {
    pub path: Vec<Element>,
    pub args: Vec<MixinArg>,
    pub important: bool,
}

impl MixinCall {
    /// 调用路径的展示文本，如 `.ns .mixin`。
    pub fn path_css(&self) -> String {
        Selector {
            elements: self.path.clone(),
        }
        .css(false)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportOptions {
    pub once: bool,
    pub multiple: bool,
    pub css: bool,
    pub less: bool,
    pub inline: bool,
    pub reference: bool,
    pub optional: bool,
}

#[derive(Debug, Clone)]
pub struct Import {
    pub path: Node,
    pub features: Vec<Node>,
    pub options: ImportOptions,
}

#[derive(Debug, Clone)]
pub struct Media {
    pub features: Vec<Node>,
    pub rules: Vec<Node>,
}

#[derive(Debug, Clone)]
pub struct Directive {
    /// 含前导 `@`，如 `@font-face`。
    pub name: String,
    pub identifier: String,
    pub rules: Option<Vec<Node>>,
    pub value: Option<Node>,
}

#[derive(Debug, Clone)]
pub struct KeyFrame {
    /// `from`、`to` 或百分比档位。
    pub selectors: Vec<String>,
    pub rules: Vec<Node>,
}

#[derive(Debug, Clone, Default)]
pub struct Extend {
    pub exact: Vec<Selector>,
    pub partial: Vec<Selector>,
}

impl Node {
    pub fn new(kind: NodeKind) -> Self {
        Self {
            header: NodeHeader::default(),
            kind,
        }
    }

    pub fn at(kind: NodeKind, index: usize) -> Self {
        Self {
            header: NodeHeader {
                index: Some(index),
                ..NodeHeader::default()
            },
            kind,
        }
    }

    pub fn keyword(text: impl Into<String>) -> Self {
        Self::new(NodeKind::Keyword(text.into()))
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(NodeKind::Text(text.into()))
    }

    pub fn number(value: f64, unit: impl Into<String>) -> Self {
        Self::new(NodeKind::Number(Number::new(value, unit)))
    }

    pub fn color(rgba: Rgba) -> Self {
        Self::new(NodeKind::Color(rgba))
    }

    pub fn is_variable_rule(&self) -> bool {
        matches!(&self.kind, NodeKind::Rule(rule) if rule.variable)
    }

    /// 声明级条目：规则或注释，输出在块体内部。
    pub fn is_declaration(&self) -> bool {
        match &self.kind {
            NodeKind::Rule(rule) => !rule.variable,
            NodeKind::Comment(_) => true,
            _ => false,
        }
    }

    /// 语句级条目：输出为独立块。
    pub fn is_block_statement(&self) -> bool {
        matches!(
            &self.kind,
            NodeKind::Ruleset(_)
                | NodeKind::Media(_)
                | NodeKind::Directive(_)
                | NodeKind::Import(_)
        )
    }

    /// 节点作为纯文本参与插值或比较时的字符串形式（引号剥除）。
    pub fn text_value(&self) -> String {
        match &self.kind {
            NodeKind::Quoted(q) => q.content.clone(),
            NodeKind::Keyword(k) | NodeKind::Text(k) => k.clone(),
            NodeKind::Number(n) => n.css(),
            NodeKind::Value(v) if v.expressions.len() == 1 => v.expressions[0].text_value(),
            NodeKind::Expression(terms) if terms.len() == 1 => terms[0].text_value(),
            other => Node::new(other.clone()).to_css(false),
        }
    }

    pub fn to_css(&self, compress: bool) -> String {
        let mut out = Output::new(compress, true);
        self.append_css(&mut out);
        out.finish()
    }

    /// 先输出前置注释，再输出节点本体，最后输出后置注释。
    pub fn append_css(&self, out: &mut Output) {
        if self.header.is_reference {
            return;
        }
        for comment in &self.header.pre_comments {
            append_comment(comment, out, true);
        }
        self.append_kind_css(out);
        for comment in &self.header.post_comments {
            append_comment(comment, out, true);
        }
    }

    fn append_kind_css(&self, out: &mut Output) {
        match &self.kind {
            NodeKind::Text(t) | NodeKind::Keyword(t) => out.add(t.clone()),
            NodeKind::Comment(c) => append_comment(c, out, false),
            NodeKind::Number(n) => out.add(n.css()),
            NodeKind::Color(c) => out.add(color::format_css(*c, out.compress)),
            NodeKind::Quoted(q) => {
                if q.escaped || q.quote.is_none() {
                    out.add(q.content.clone());
                } else {
                    let quote = q.quote.unwrap_or('"');
                    out.add(format!("{quote}{}{quote}", q.content));
                }
            }
            NodeKind::Variable(name) => out.add(name.clone()),
            NodeKind::Url(inner) => {
                out.add("url(");
                inner.append_css(out);
                out.add(")");
            }
            NodeKind::Script(body) => out.add(format!("`{body}`")),
            NodeKind::Call(call) => {
                out.add(format!("{}(", call.name));
                let sep = if out.compress { "," } else { ", " };
                for (i, arg) in call.args.iter().enumerate() {
                    if i > 0 {
                        out.add(sep.to_string());
                    }
                    arg.append_css(out);
                }
                out.add(")");
            }
            NodeKind::Assignment(assignment) => {
                out.add(format!("{}=", assignment.key));
                assignment.value.append_css(out);
            }
            NodeKind::Operation(op) => {
                op.left.append_css(out);
                if out.compress {
                    out.add_char(op.op);
                } else {
                    out.add(format!(" {} ", op.op));
                }
                op.right.append_css(out);
            }
            NodeKind::Condition(cond) => {
                cond.left.append_css(out);
                out.add(format!(" {} ", cond.op));
                cond.right.append_css(out);
            }
            NodeKind::Expression(terms) => append_expression(terms, out),
            NodeKind::Value(value) => {
                let sep = if out.compress { "," } else { ", " };
                for (i, expression) in value.expressions.iter().enumerate() {
                    if i > 0 {
                        out.add(sep.to_string());
                    }
                    expression.append_css(out);
                }
                if !value.important.is_empty() {
                    if out.compress {
                        out.add(value.important.clone());
                    } else {
                        out.add(format!(" {}", value.important));
                    }
                }
            }
            NodeKind::Rule(rule) => {
                if rule.variable {
                    return;
                }
                out.add(rule.name.clone());
                out.add(if out.compress { ":" } else { ": " });
                rule.value.append_css(out);
            }
            NodeKind::Attribute(attr) => {
                out.add(format!("[{}", attr.key));
                if let (Some(op), Some(value)) = (&attr.op, &attr.value) {
                    out.add(op.clone());
                    value.append_css(out);
                }
                out.add("]");
            }
            NodeKind::Ruleset(ruleset) => append_ruleset(ruleset, out),
            NodeKind::Media(media) => append_media(media, out),
            NodeKind::Directive(directive) => append_directive(directive, out),
            NodeKind::KeyFrame(frame) => append_keyframe(frame, out),
            NodeKind::Import(import) => append_import(import, out),
            NodeKind::Paren(inner) => {
                out.add("(");
                inner.append_css(out);
                out.add(")");
            }
            // 以下节点在求值阶段被消费，正常情况下不会走到输出。
            NodeKind::MixinDefinition(_)
            | NodeKind::MixinCall(_)
            | NodeKind::DetachedRuleset(_)
            | NodeKind::DetachedCall(_)
            | NodeKind::Extend(_) => {}
        }
    }
}

fn append_comment(comment: &Comment, out: &mut Output, inline: bool) {
    if !out.keep_comments || !comment.is_css_valid() {
        return;
    }
    if out.compress && !comment.is_special() {
        return;
    }
    out.add(comment.text.clone());
    if !inline && !out.compress {
        out.add("\n");
    }
}

fn append_expression(terms: &[Node], out: &mut Output) {
    let mut previous_was_slash = false;
    for (i, term) in terms.iter().enumerate() {
        let is_slash = matches!(&term.kind, NodeKind::Text(t) if t == "/");
        if i > 0 && !is_slash && !previous_was_slash {
            out.add(" ");
        }
        term.append_css(out);
        previous_was_slash = is_slash;
    }
}

/// 声明序列的块体输出。调用方负责外层花括号与缩进。
fn append_declarations(declarations: &[&Node], out: &mut Output) {
    if out.compress {
        let mut first = true;
        for declaration in declarations {
            match &declaration.kind {
                NodeKind::Comment(c) => append_comment(c, out, true),
                _ => {
                    if !first {
                        out.add(";");
                    }
                    declaration.append_css(out);
                    first = false;
                }
            }
        }
    } else {
        for declaration in declarations {
            match &declaration.kind {
                NodeKind::Comment(c) => append_comment(c, out, false),
                _ => {
                    declaration.append_css(out);
                    out.add(";\n");
                }
            }
        }
    }
}

fn split_block(rules: &[Node]) -> (Vec<&Node>, Vec<&Node>) {
    let mut declarations = Vec::new();
    let mut nested = Vec::new();
    for rule in rules {
        if rule.header.is_reference {
            continue;
        }
        if rule.is_declaration() {
            declarations.push(rule);
        } else if rule.is_block_statement() {
            nested.push(rule);
        }
    }
    (declarations, nested)
}

fn append_block(declarations: &[&Node], out: &mut Output) {
    out.add(if out.compress { "{" } else { " {\n" });
    out.push();
    append_declarations(declarations, out);
    out.indent(1);
    if out.compress {
        out.trim_right_char(';');
    }
    out.pop_and_append();
    out.add(if out.compress { "}" } else { "}\n" });
}

fn append_ruleset(ruleset: &Ruleset, out: &mut Output) {
    let (declarations, nested) = split_block(&ruleset.rules);
    let has_own_block = !declarations.is_empty();
    if has_own_block {
        if ruleset.selectors.is_empty() {
            // 裸声明（指令块体内部）。
            append_declarations(&declarations, out);
        } else {
            let selectors: Vec<String> = ruleset
                .selectors
                .iter()
                .map(|s| s.css(out.compress))
                .collect();
            out.append_many(&selectors, if out.compress { "," } else { ", " });
            append_block(&declarations, out);
        }
    }
    for (i, child) in nested.iter().enumerate() {
        if !out.compress && (has_own_block || i > 0) {
            out.add("\n");
        }
        child.append_css(out);
    }
}

fn append_media(media: &Media, out: &mut Output) {
    out.add("@media");
    let features: Vec<String> = media
        .features
        .iter()
        .map(|f| f.to_css(out.compress))
        .collect();
    if !features.is_empty() {
        out.add(" ");
        out.append_many(&features, if out.compress { "," } else { ", " });
    }
    out.add(if out.compress { "{" } else { " {\n" });
    out.push();
    append_statement_sequence(&media.rules, out);
    out.indent(1);
    out.pop_and_append();
    out.add(if out.compress { "}" } else { "}\n" });
}

fn append_directive(directive: &Directive, out: &mut Output) {
    match (&directive.rules, &directive.value) {
        (Some(rules), _) => {
            out.add(directive.name.clone());
            if !directive.identifier.is_empty() {
                out.add(format!(" {}", directive.identifier));
            }
            out.add(if out.compress { "{" } else { " {\n" });
            out.push();
            append_statement_sequence(rules, out);
            out.indent(1);
            if out.compress {
                out.trim_right_char(';');
            }
            out.pop_and_append();
            out.add(if out.compress { "}" } else { "}\n" });
        }
        (None, Some(value)) => {
            out.add(directive.name.clone());
            out.add(" ");
            value.append_css(out);
            out.add(if out.compress { ";" } else { ";\n" });
        }
        (None, None) => {
            out.add(directive.name.clone());
            out.add(if out.compress { ";" } else { ";\n" });
        }
    }
}

fn append_keyframe(frame: &KeyFrame, out: &mut Output) {
    let stops: Vec<String> = frame.selectors.clone();
    out.append_many(&stops, if out.compress { "," } else { ", " });
    let (declarations, _) = split_block(&frame.rules);
    append_block(&declarations, out);
}

fn append_import(import: &Import, out: &mut Output) {
    out.add("@import ");
    import.path.append_css(out);
    if !import.features.is_empty() {
        out.add(" ");
        let features: Vec<String> = import
            .features
            .iter()
            .map(|f| f.to_css(out.compress))
            .collect();
        out.append_many(&features, if out.compress { "," } else { ", " });
    }
    out.add(if out.compress { ";" } else { ";\n" });
}

/// 顶层或块体内的语句序列输出：声明、注释与嵌套块按源顺序排布。
pub fn append_statement_sequence(nodes: &[Node], out: &mut Output) {
    let mut previous_was_block = false;
    let mut emitted_any = false;
    for node in nodes {
        if node.header.is_reference {
            continue;
        }
        match &node.kind {
            NodeKind::Comment(c) => {
                if out.keep_comments && c.is_css_valid() && (!out.compress || c.is_special()) {
                    if !out.compress && emitted_any && previous_was_block {
                        out.add("\n");
                    }
                    append_comment(c, out, false);
                    emitted_any = true;
                    previous_was_block = false;
                }
            }
            NodeKind::Rule(rule) if !rule.variable => {
                node.append_css(out);
                out.add(if out.compress { ";" } else { ";\n" });
                emitted_any = true;
                previous_was_block = false;
            }
            // inline 导入的原始文本整段落盘
            NodeKind::Text(text) => {
                if !out.compress && emitted_any {
                    out.add("\n");
                }
                out.add(text.clone());
                if !out.compress {
                    out.add("\n");
                }
                emitted_any = true;
                previous_was_block = true;
            }
            NodeKind::Ruleset(_)
            | NodeKind::Media(_)
            | NodeKind::Directive(_)
            | NodeKind::KeyFrame(_)
            | NodeKind::Import(_) => {
                let before = out.frame_is_empty();
                if !out.compress && emitted_any {
                    out.add("\n");
                }
                node.append_css(out);
                if !before || !out.frame_is_empty() {
                    emitted_any = true;
                }
                previous_was_block = true;
            }
            _ => {}
        }
    }
}

/// 数值输出：最多四位小数，去掉尾零。
pub fn format_number(value: f64) -> String {
    let mut value = value;
    if value.abs() < 1e-9 {
        value = 0.0;
    }
    let mut formatted = format!("{value:.4}");
    while formatted.contains('.') && formatted.ends_with('0') {
        formatted.pop();
    }
    if formatted.ends_with('.') {
        formatted.pop();
    }
    formatted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_css_trims_trailing_zeros() {
        assert_eq!(Number::new(14.0, "px").css(), "14px");
        assert_eq!(Number::new(0.75, "").css(), "0.75");
        assert_eq!(Number::new(-6.0, "px").css(), "-6px");
    }

    #[test]
    fn selector_css_spaces_combinators() {
        let selector = Selector {
            elements: vec![
                Element::text("", ".a"),
                Element::text(">", ".b"),
                Element::text(" ", ".c"),
            ],
        };
        assert_eq!(selector.css(false), ".a > .b .c");
        assert_eq!(selector.css(true), ".a>.b .c");
    }

    #[test]
    fn comment_flags_follow_prefix() {
        let doc = Comment::new("/** doc */".into(), 0);
        assert!(doc.is_css_valid() && doc.is_special());
        let bang = Comment::new("/*! keep */".into(), 0);
        assert!(bang.is_special());
        let hack = Comment::new("/**/".into(), 0);
        assert!(hack.is_css_hack() && !hack.is_special());
        let line = Comment::new("// local".into(), 0);
        assert!(!line.is_css_valid());
    }

    #[test]
    fn mixin_required_ignores_defaults_and_variadic() {
        let def = MixinDefinition {
            name: ".m".into(),
            params: vec![
                MixinParam {
                    name: Some("a".into()),
                    default: None,
                    pattern: None,
                    variadic: false,
                },
                MixinParam {
                    name: Some("b".into()),
                    default: Some(Node::number(1.0, "px")),
                    pattern: None,
                    variadic: false,
                },
                MixinParam {
                    name: Some("rest".into()),
                    default: None,
                    pattern: None,
                    variadic: true,
                },
            ],
            rules: Vec::new(),
            guard: None,
            variadic: true,
        };
        assert_eq!(def.arity(), 3);
        assert_eq!(def.required(), 1);
    }

    #[test]
    fn value_emission_joins_expressions_with_commas() {
        let value = Node::new(NodeKind::Value(Value {
            expressions: vec![Node::number(1.0, ""), Node::number(2.0, "")],
            important: "!important".into(),
        }));
        assert_eq!(value.to_css(false), "1, 2 !important");
        assert_eq!(value.to_css(true), "1,2!important");
    }

    #[test]
    fn expression_keeps_slash_tight() {
        let expr = Node::new(NodeKind::Expression(vec![
            Node::keyword("small"),
            Node::text("/"),
            Node::number(12.0, "px"),
        ]));
        assert_eq!(expr.to_css(false), "small/12px");
    }
}
