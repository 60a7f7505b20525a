//! 递归下降语法分析。入口产生式为 `primary`，借助 `remember`/`recall`
//! 做回溯消歧：规则、规则集、mixin 定义与调用都从相似前缀开始。

use crate::ast::*;
use crate::chunker;
use crate::error::{ErrorKind, LessError, LessResult};
use crate::tokenizer::{Tokenizer, UntilOptions};
use crate::unit;

/// 带块体的 @ 指令基础名（去掉 vendor 前缀后比较）。
const BLOCK_DIRECTIVES: &[&str] = &[
    "font-face",
    "viewport",
    "page",
    "document",
    "supports",
    "top-left-corner",
    "top-left",
    "top-center",
    "top-right",
    "top-right-corner",
    "bottom-left-corner",
    "bottom-left",
    "bottom-center",
    "bottom-right",
    "bottom-right-corner",
    "left-top",
    "left-middle",
    "left-bottom",
    "right-top",
    "right-middle",
    "right-bottom",
];

/// `filter` 属性接受的函数链。
const FILTER_FUNCTIONS: &[&str] = &[
    "blur",
    "brightness",
    "contrast",
    "drop-shadow",
    "grayscale",
    "hue-rotate",
    "invert",
    "opacity",
    "saturate",
    "sepia",
    "url",
];

/// 实参保持原文的函数：内部表达式交给浏览器求值。
const RAW_ARGUMENT_FUNCTIONS: &[&str] = &["calc", "var", "env", "expression"];

const IMPORT_OPTIONS: &[&str] = &[
    "once", "multiple", "css", "less", "inline", "reference", "optional",
];

pub struct Parser {
    pub strict_math: bool,
    pub keep_comments: bool,
    pub optimization: u8,
}

impl Parser {
    pub fn new(strict_math: bool, keep_comments: bool, optimization: u8) -> Self {
        Self {
            strict_math,
            keep_comments,
            optimization,
        }
    }

    pub fn parse(&self, source: &str, file_name: Option<&str>) -> LessResult<Vec<Node>> {
        let chunked =
            chunker::chunk(source, self.optimization).map_err(|e| e.with_file(file_name))?;
        let mut state = State {
            t: Tokenizer::new(&chunked, self.keep_comments),
            strict_math: self.strict_math,
            paren_level: 0,
        };
        let nodes = state.primary().map_err(|e| e.with_file(file_name))?;
        state.t.skip_whitespace();
        if !state.t.is_eof() {
            return Err(LessError::parse(
                ErrorKind::IncompleteRule,
                "存在无法解析的剩余输入",
                state.t.index(),
            )
            .with_file(file_name));
        }
        Ok(nodes)
    }
}

struct State<'s> {
    t: Tokenizer<'s>,
    strict_math: bool,
    paren_level: usize,
}

impl<'s> State<'s> {
    fn err(&self, kind: ErrorKind, message: impl Into<String>) -> LessError {
        LessError::parse(kind, message, self.t.index())
    }

    fn expect_char(&mut self, expected: char) -> LessResult<()> {
        if self.t.match_char(expected) {
            Ok(())
        } else {
            Err(self.err(ErrorKind::Expected, format!("期待字符 '{expected}'")))
        }
    }

    fn flush_comments(&mut self, into: &mut Vec<Node>) {
        for comment in self.t.take_comments() {
            let index = comment.index;
            into.push(Node::at(NodeKind::Comment(comment), index));
        }
    }

    /// 语法入口：语句序列，直到 EOF 或块尾。
    fn primary(&mut self) -> LessResult<Vec<Node>> {
        let mut nodes = Vec::new();
        loop {
            self.t.skip_whitespace();
            self.flush_comments(&mut nodes);
            if self.t.is_eof() || self.t.current_char() == Some('}') {
                break;
            }
            if self.t.match_char(';') {
                continue;
            }
            if let Some(node) = self.extend_rule()? {
                nodes.push(node);
                continue;
            }
            if let Some(node) = self.mixin_definition()? {
                nodes.push(node);
                continue;
            }
            if let Some(node) = self.rule()? {
                nodes.push(node);
                continue;
            }
            if let Some(node) = self.ruleset()? {
                nodes.push(node);
                continue;
            }
            if let Some(node) = self.mixin_call()? {
                nodes.push(node);
                continue;
            }
            if let Some(node) = self.detached_call()? {
                nodes.push(node);
                continue;
            }
            if let Some(node) = self.directive()? {
                nodes.push(node);
                continue;
            }
            return Err(self.err(ErrorKind::IncompleteRule, "无法识别的语句"));
        }
        Ok(nodes)
    }

    fn block(&mut self) -> LessResult<Vec<Node>> {
        self.expect_char('{')?;
        let nodes = self.primary()?;
        self.expect_char('}')?;
        Ok(nodes)
    }

    // ---- 规则（声明） ----------------------------------------------------

    fn rule(&mut self) -> LessResult<Option<Node>> {
        let saved = self.t.remember();
        let index = self.t.index();

        let mut variable = false;
        let mut interpolated = false;
        let mut merge = None;
        let mut name = String::new();

        if self.t.current_char() == Some('@') && !self.t.peek_str("@{") {
            match self.t.match_re(r"@[\w-]+") {
                Some(text) => {
                    name = text;
                    variable = true;
                }
                None => return Ok(None),
            }
        } else {
            loop {
                if let Some(piece) = self.t.match_re(r"@\{[\w-]+\}") {
                    name.push_str(&piece);
                    interpolated = true;
                    continue;
                }
                if let Some(piece) = self.t.match_re(r"\*?[-_a-zA-Z0-9]+") {
                    name.push_str(&piece);
                    continue;
                }
                break;
            }
            if name.is_empty() {
                return Ok(None);
            }
            if self.t.match_str("+_") {
                merge = Some(" ");
            } else if self.t.match_char('+') {
                merge = Some(", ");
            }
        }

        if !self.t.match_char(':') {
            self.t.recall(saved);
            return Ok(None);
        }

        let value = if variable && self.t.current_char() == Some('{') {
            let rules = self.block()?;
            Node::new(NodeKind::DetachedRuleset(rules))
        } else if !variable && name.eq_ignore_ascii_case("font") {
            self.font_value()?
        } else if !variable && name.eq_ignore_ascii_case("filter") {
            self.filter_value()?
        } else {
            self.value()?
        };

        let ended =
            self.t.match_char(';') || self.t.current_char() == Some('}') || self.t.is_eof();
        if !ended {
            self.t.recall(saved);
            return Ok(None);
        }

        Ok(Some(Node::at(
            NodeKind::Rule(Box::new(Rule {
                name,
                value,
                variable,
                variadic: false,
                merge,
                interpolated,
            })),
            index,
        )))
    }

    // ---- 值与表达式 ------------------------------------------------------

    fn value(&mut self) -> LessResult<Node> {
        let mut expressions = Vec::new();
        loop {
            match self.expression()? {
                Some(expression) => expressions.push(expression),
                None => break,
            }
            if !self.t.match_char(',') {
                break;
            }
        }
        let important = if self.t.match_re(r"!\s*important").is_some() {
            "!important".to_string()
        } else {
            String::new()
        };
        Ok(Node::new(NodeKind::Value(Value {
            expressions,
            important,
        })))
    }

    fn expression(&mut self) -> LessResult<Option<Node>> {
        let mut terms = Vec::new();
        loop {
            if let Some(range) = self.t.match_re(r"U\+[0-9a-fA-F?]+(?:-[0-9a-fA-F?]+)?") {
                terms.push(Node::text(range));
                continue;
            }
            if let Some(term) = self.addition()? {
                terms.push(term);
                continue;
            }
            if let Some(entity) = self.entity()? {
                terms.push(entity);
                continue;
            }
            if let Some(escape) = self.t.match_re(r"\\[0-9a-zA-Z]+") {
                terms.push(Node::text(escape));
                continue;
            }
            // 严格数学模式下括号外的运算符原样输出。
            if self.strict_math && self.paren_level == 0 {
                if let Some(op) = self.t.match_re(r"[+\-*/]") {
                    terms.push(Node::text(op));
                    continue;
                }
            }
            break;
        }
        Ok(match terms.len() {
            0 => None,
            1 => Some(terms.into_iter().next().unwrap()),
            _ => Some(Node::new(NodeKind::Expression(terms))),
        })
    }

    fn operators_active(&self) -> bool {
        !self.strict_math || self.paren_level > 0
    }

    fn addition(&mut self) -> LessResult<Option<Node>> {
        let Some(mut node) = self.multiplication()? else {
            return Ok(None);
        };
        loop {
            if !self.operators_active() {
                break;
            }
            let spaced_before = self.t.is_spaced();
            let op = match self.t.current_char() {
                Some(c @ ('+' | '-')) => c,
                _ => break,
            };
            // `10 -5px` 中的负号吸附数字，不作减法。
            let after = self.t.peek_char(1);
            if spaced_before && !after.map_or(true, |c| c.is_whitespace()) {
                break;
            }
            self.t.match_char(op);
            let rhs = self
                .multiplication()?
                .ok_or_else(|| self.err(ErrorKind::Expected, format!("运算符 '{op}' 缺少右操作数")))?;
            node = Node::new(NodeKind::Operation(Box::new(Operation {
                op,
                left: node,
                right: rhs,
            })));
        }
        Ok(Some(node))
    }

    fn multiplication(&mut self) -> LessResult<Option<Node>> {
        let Some(mut node) = self.operand()? else {
            return Ok(None);
        };
        loop {
            if !self.operators_active() {
                break;
            }
            let op = match self.t.current_char() {
                Some(c @ ('*' | '/')) => c,
                _ => break,
            };
            self.t.match_char(op);
            let rhs = self
                .operand()?
                .ok_or_else(|| self.err(ErrorKind::Expected, format!("运算符 '{op}' 缺少右操作数")))?;
            node = Node::new(NodeKind::Operation(Box::new(Operation {
                op,
                left: node,
                right: rhs,
            })));
        }
        Ok(Some(node))
    }

    fn operand(&mut self) -> LessResult<Option<Node>> {
        let saved = self.t.remember();
        let negate = self.t.current_char() == Some('-')
            && matches!(self.t.peek_char(1), Some('(') | Some('@'));
        if negate {
            self.t.match_char('-');
        }
        let node = if let Some(n) = self.sub()? {
            Some(n)
        } else if let Some(n) = self.dimension()? {
            Some(n)
        } else if let Some(n) = self.color_token() {
            Some(n)
        } else if let Some(n) = self.variable_entity() {
            Some(n)
        } else {
            self.call()?
        };
        let Some(node) = node else {
            self.t.recall(saved);
            return Ok(None);
        };
        Ok(Some(if negate {
            Node::new(NodeKind::Operation(Box::new(Operation {
                op: '*',
                left: Node::number(-1.0, ""),
                right: node,
            })))
        } else {
            node
        }))
    }

    fn sub(&mut self) -> LessResult<Option<Node>> {
        if self.t.current_char() != Some('(') {
            return Ok(None);
        }
        self.t.match_char('(');
        self.paren_level += 1;
        let inner = self.expression()?;
        self.paren_level -= 1;
        let inner =
            inner.ok_or_else(|| self.err(ErrorKind::Expected, "括号内缺少表达式"))?;
        self.expect_char(')')?;
        Ok(Some(Node::new(NodeKind::Paren(Box::new(inner)))))
    }

    fn dimension(&mut self) -> LessResult<Option<Node>> {
        match self.t.current_char() {
            Some(c) if c.is_ascii_digit() || c == '.' || c == '-' || c == '+' => {}
            _ => return Ok(None),
        }
        let saved = self.t.remember();
        let index = self.t.index();
        let Some(number) = self.t.match_number(true, true) else {
            return Ok(None);
        };
        let unit_text = self.t.match_unit();
        if let Some(u) = &unit_text {
            if !unit::is_recognized(u) {
                // 未知单位退回，让关键字兜底（如 `1col`）。
                self.t.recall(saved);
                return Ok(None);
            }
        }
        self.t.skip_whitespace();
        let value: f64 = number.parse().map_err(|_| {
            self.err(ErrorKind::Expected, format!("无法解析数值 {number}"))
        })?;
        Ok(Some(Node::at(
            NodeKind::Number(Number::new(value, unit_text.unwrap_or_default())),
            index,
        )))
    }

    fn color_token(&mut self) -> Option<Node> {
        let index = self.t.index();
        let text = self
            .t
            .match_re(r"#(?:[0-9a-fA-F]{8}|[0-9a-fA-F]{6}|[0-9a-fA-F]{3})")?;
        let rgba = crate::color::parse_hex(&text[1..])?;
        Some(Node::at(NodeKind::Color(rgba), index))
    }

    fn variable_entity(&mut self) -> Option<Node> {
        if self.t.current_char() != Some('@') || self.t.peek_str("@{") {
            return None;
        }
        let index = self.t.index();
        let name = self.t.match_re(r"@@?[\w-]+")?;
        Some(Node::at(NodeKind::Variable(name), index))
    }

    fn quoted(&mut self) -> LessResult<Option<Node>> {
        let saved = self.t.remember();
        let mut escaped = false;
        if self.t.current_char() == Some('~')
            && matches!(self.t.peek_char(1), Some('"') | Some('\''))
        {
            self.t.match_char('~');
            escaped = true;
        }
        match self.t.current_char() {
            Some('"') | Some('\'') => {}
            _ => {
                if escaped {
                    self.t.recall(saved);
                }
                return Ok(None);
            }
        }
        let index = self.t.index();
        let raw = self
            .t
            .get_quoted_string()?
            .ok_or_else(|| self.err(ErrorKind::UnterminatedString, "字符串缺少闭合引号"))?;
        let quote = raw.chars().next().unwrap_or('"');
        let content = raw[1..raw.len() - 1].to_string();
        Ok(Some(Node::at(
            NodeKind::Quoted(Quoted {
                quote: Some(quote),
                content,
                escaped,
            }),
            index,
        )))
    }

    fn script(&mut self) -> Option<Node> {
        if self.t.current_char() != Some('`') {
            return None;
        }
        let index = self.t.index();
        let saved = self.t.remember();
        self.t.match_char('`');
        match self.t.match_until(
            '`',
            UntilOptions {
                include_delimiter: true,
                balanced_parens: false,
            },
        ) {
            Some(mut body) => {
                body.pop();
                Some(Node::at(NodeKind::Script(body.trim().to_string()), index))
            }
            None => {
                self.t.recall(saved);
                None
            }
        }
    }

    fn entity(&mut self) -> LessResult<Option<Node>> {
        if let Some(q) = self.quoted()? {
            return Ok(Some(q));
        }
        if let Some(c) = self.color_token() {
            return Ok(Some(c));
        }
        if let Some(d) = self.dimension()? {
            return Ok(Some(d));
        }
        if let Some(v) = self.variable_entity() {
            return Ok(Some(v));
        }
        if let Some(call) = self.call()? {
            return Ok(Some(call));
        }
        let index = self.t.index();
        if let Some(keyword) = self.t.match_keyword(false, true) {
            self.t.skip_whitespace();
            return Ok(Some(Node::at(NodeKind::Keyword(keyword), index)));
        }
        if let Some(s) = self.script() {
            return Ok(Some(s));
        }
        Ok(None)
    }

    /// 函数调用（含 `url(...)` 与原文透传函数）。
    fn call(&mut self) -> LessResult<Option<Node>> {
        let index = self.t.index();
        let Some(caps) = self
            .t
            .match_re_captures(r"(progid:[\w.:]+|%|[\w-]+)\(")
        else {
            return Ok(None);
        };
        let name = caps[1].clone().unwrap_or_default();
        if name.eq_ignore_ascii_case("url") {
            return Ok(Some(self.url_body(index)?));
        }
        let lowered = name.to_ascii_lowercase();
        if RAW_ARGUMENT_FUNCTIONS.contains(&lowered.as_str()) || lowered.starts_with("progid:") {
            let raw = self
                .t
                .match_balanced_tail('(', ')')
                .ok_or_else(|| self.err(ErrorKind::Expected, format!("{name}(...) 未闭合")))?;
            return Ok(Some(Node::at(
                NodeKind::Call(Call {
                    name,
                    args: vec![Node::text(raw.trim().to_string())],
                }),
                index,
            )));
        }
        let args = self.call_args()?;
        Ok(Some(Node::at(NodeKind::Call(Call { name, args }), index)))
    }

    fn url_body(&mut self, index: usize) -> LessResult<Node> {
        let inner = if let Some(q) = self.quoted()? {
            q
        } else {
            let raw = self
                .t
                .match_until(
                    ')',
                    UntilOptions {
                        include_delimiter: false,
                        balanced_parens: true,
                    },
                )
                .ok_or_else(|| self.err(ErrorKind::Expected, "url(...) 未闭合"))?;
            Node::text(raw.trim().to_string())
        };
        self.expect_char(')')?;
        Ok(Node::at(NodeKind::Url(Box::new(inner)), index))
    }

    /// 调用实参：`key=value` 赋值或表达式，逗号分隔。
    fn call_args(&mut self) -> LessResult<Vec<Node>> {
        let mut args = Vec::new();
        loop {
            self.t.skip_whitespace();
            if self.t.match_char(')') {
                break;
            }
            if let Some(caps) = self.t.match_re_captures(r"([\w-]+)\s*=") {
                let key = caps[1].clone().unwrap_or_default();
                let value = self
                    .expression()?
                    .ok_or_else(|| self.err(ErrorKind::Expected, "赋值实参缺少值"))?;
                args.push(Node::new(NodeKind::Assignment(Assignment {
                    key,
                    value: Box::new(value),
                })));
            } else {
                let value = self
                    .expression()?
                    .ok_or_else(|| self.err(ErrorKind::Expected, "期待函数实参"))?;
                args.push(value);
            }
            if self.t.match_char(',') {
                continue;
            }
            if self.t.match_char(')') {
                break;
            }
            return Err(self.err(ErrorKind::Expected, "函数实参缺少分隔符"));
        }
        Ok(args)
    }

    // ---- font / filter 专用值 -------------------------------------------

    /// `font` 简写：`small/12px` 斜杠形式加逗号尾部。
    fn font_value(&mut self) -> LessResult<Node> {
        let mut terms = Vec::new();
        loop {
            if self.t.match_char('/') {
                terms.push(Node::text("/"));
                continue;
            }
            match self.entity()? {
                Some(term) => terms.push(term),
                None => break,
            }
        }
        let mut expressions = Vec::new();
        if !terms.is_empty() {
            expressions.push(if terms.len() == 1 {
                terms.into_iter().next().unwrap()
            } else {
                Node::new(NodeKind::Expression(terms))
            });
        }
        while self.t.match_char(',') {
            match self.expression()? {
                Some(e) => expressions.push(e),
                None => break,
            }
        }
        let important = if self.t.match_re(r"!\s*important").is_some() {
            "!important".to_string()
        } else {
            String::new()
        };
        Ok(Node::new(NodeKind::Value(Value {
            expressions,
            important,
        })))
    }

    /// `filter` 属性：白名单函数链，未命中时退回普通值解析。
    fn filter_value(&mut self) -> LessResult<Node> {
        let saved = self.t.remember();
        let mut calls = Vec::new();
        loop {
            let call_saved = self.t.remember();
            let index = self.t.index();
            let Some(caps) = self.t.match_re_captures(r"([a-zA-Z-]+)\(") else {
                break;
            };
            let name = caps[1].clone().unwrap_or_default();
            if !FILTER_FUNCTIONS.contains(&name.to_ascii_lowercase().as_str()) {
                self.t.recall(call_saved);
                calls.clear();
                break;
            }
            if name.eq_ignore_ascii_case("url") {
                calls.push(self.url_body(index)?);
            } else {
                let args = self.call_args()?;
                calls.push(Node::at(NodeKind::Call(Call { name, args }), index));
            }
        }
        if calls.is_empty() {
            self.t.recall(saved);
            return self.value();
        }
        let important = if self.t.match_re(r"!\s*important").is_some() {
            "!important".to_string()
        } else {
            String::new()
        };
        Ok(Node::new(NodeKind::Value(Value {
            expressions: vec![if calls.len() == 1 {
                calls.into_iter().next().unwrap()
            } else {
                Node::new(NodeKind::Expression(calls))
            }],
            important,
        })))
    }

    // ---- 选择器与规则集 --------------------------------------------------

    fn ruleset(&mut self) -> LessResult<Option<Node>> {
        let saved = self.t.remember();
        let index = self.t.index();
        let mut selectors = Vec::new();
        loop {
            match self.selector()? {
                Some(selector) => selectors.push(selector),
                None => break,
            }
            if !self.t.match_char(',') {
                break;
            }
        }
        if selectors.is_empty() {
            self.t.recall(saved);
            return Ok(None);
        }
        let guard = if self.t.peek_word("when") {
            self.t.match_str("when");
            Some(self.conditions()?)
        } else {
            None
        };
        if self.t.current_char() != Some('{') {
            self.t.recall(saved);
            return Ok(None);
        }
        let rules = self.block()?;
        Ok(Some(Node::at(
            NodeKind::Ruleset(Box::new(Ruleset {
                selectors,
                rules,
                guard,
            })),
            index,
        )))
    }

    fn selector(&mut self) -> LessResult<Option<Selector>> {
        let mut elements: Vec<Element> = Vec::new();
        loop {
            if self.t.peek_word("when") {
                break;
            }
            let spaced = self.t.is_spaced();
            let explicit = match self.t.current_char() {
                Some('+') => {
                    self.t.match_char('+');
                    Some("+")
                }
                Some('>') => {
                    self.t.match_char('>');
                    Some(">")
                }
                Some('~') if !matches!(self.t.peek_char(1), Some('"') | Some('\'')) => {
                    self.t.match_char('~');
                    Some("~")
                }
                _ => None,
            };
            let value = self.element()?;
            let Some(value) = value else {
                if explicit.is_some() {
                    return Err(self.err(ErrorKind::Expected, "组合子后缺少选择器元素"));
                }
                break;
            };
            let combinator = match explicit {
                Some(c) => c,
                None => {
                    if elements.is_empty() {
                        ""
                    } else if spaced {
                        " "
                    } else {
                        ""
                    }
                }
            };
            elements.push(Element { combinator, value });
        }
        if elements.is_empty() {
            Ok(None)
        } else {
            Ok(Some(Selector { elements }))
        }
    }

    fn element(&mut self) -> LessResult<Option<ElementValue>> {
        // `:extend(...)` 必须先于伪类判定。
        if self.t.peek_str(":extend(") {
            self.t.match_str(":extend(");
            let extend = self.extend_body()?;
            return Ok(Some(ElementValue::Node(Box::new(Node::new(
                NodeKind::Extend(extend),
            )))));
        }
        if self.t.current_char() == Some(':') {
            let Some(mut pseudo) = self.t.match_re(r"::?[\w-]+") else {
                return Ok(None);
            };
            if self.t.current_char() == Some('(') {
                let inner = self
                    .t
                    .match_balanced('(', ')')
                    .ok_or_else(|| self.err(ErrorKind::Expected, "伪类参数括号未闭合"))?;
                pseudo.push('(');
                pseudo.push_str(&inner);
                pseudo.push(')');
            }
            return Ok(Some(ElementValue::Text(pseudo)));
        }
        if self.t.current_char() == Some('[') {
            return Ok(Some(self.attribute()?));
        }
        if self.t.current_char() == Some('(') {
            let inner = self
                .t
                .match_balanced('(', ')')
                .ok_or_else(|| self.err(ErrorKind::Expected, "选择器括号未闭合"))?;
            return Ok(Some(ElementValue::Text(format!("({inner})"))));
        }
        if let Some(text) = self
            .t
            .match_re(r"(?:[.#]?(?:[\w-]|@\{[\w-]+\}|\\.)+|\*|&)")
        {
            return Ok(Some(ElementValue::Text(text)));
        }
        Ok(None)
    }

    fn attribute(&mut self) -> LessResult<ElementValue> {
        self.expect_char('[')?;
        let key = self
            .t
            .match_re(r"(?:[\w-]|@\{[\w-]+\})+")
            .ok_or_else(|| self.err(ErrorKind::Expected, "属性选择器缺少键名"))?;
        let op = self.t.match_re(r"[|~*$^]?=");
        let value = if op.is_some() {
            if let Some(q) = self.quoted()? {
                Some(Box::new(q))
            } else {
                let word = self
                    .t
                    .match_re(r"[\w-]+")
                    .ok_or_else(|| self.err(ErrorKind::Expected, "属性选择器缺少值"))?;
                Some(Box::new(Node::keyword(word)))
            }
        } else {
            None
        };
        self.expect_char(']')?;
        Ok(ElementValue::Node(Box::new(Node::new(NodeKind::Attribute(
            Attribute { key, op, value },
        )))))
    }

    /// `&:extend(...)` 语句形式（以分号或块尾结束）。
    fn extend_rule(&mut self) -> LessResult<Option<Node>> {
        if !self.t.peek_str("&:extend(") {
            return Ok(None);
        }
        let saved = self.t.remember();
        let index = self.t.index();
        self.t.match_str("&:extend(");
        let extend = self.extend_body()?;
        if self.t.match_char(';') || self.t.current_char() == Some('}') {
            return Ok(Some(Node::at(NodeKind::Extend(extend), index)));
        }
        self.t.recall(saved);
        Ok(None)
    }

    /// extend 目标列表，已消费开括号；`all` 尾缀表示前缀匹配。
    fn extend_body(&mut self) -> LessResult<Extend> {
        let mut extend = Extend::default();
        loop {
            let Some(mut selector) = self.selector()? else {
                return Err(self.err(
                    ErrorKind::ExtendNotTerminated,
                    "extend 目标缺少选择器",
                ));
            };
            let partial = selector
                .elements
                .last()
                .and_then(Element::value_text)
                .map_or(false, |t| t == "all");
            if partial {
                selector.elements.pop();
                if selector.elements.is_empty() {
                    return Err(self.err(
                        ErrorKind::ExtendNotTerminated,
                        "extend 目标缺少选择器",
                    ));
                }
                extend.partial.push(selector);
            } else {
                extend.exact.push(selector);
            }
            if self.t.match_char(',') {
                continue;
            }
            if self.t.match_char(')') {
                break;
            }
            return Err(self.err(
                ErrorKind::ExtendNotTerminated,
                "extend(...) 未以 ')' 结束",
            ));
        }
        Ok(extend)
    }

    // ---- mixin ----------------------------------------------------------

    fn mixin_definition(&mut self) -> LessResult<Option<Node>> {
        if !matches!(self.t.current_char(), Some('.') | Some('#')) {
            return Ok(None);
        }
        let saved = self.t.remember();
        let index = self.t.index();
        let Some(name) = self.t.match_re(r"[.#][\w-]+") else {
            return Ok(None);
        };
        if !self.t.match_char('(') {
            self.t.recall(saved);
            return Ok(None);
        }
        let params = match self.mixin_params() {
            Ok(params) => params,
            Err(_) => {
                // 解析不成参数表就不是定义，交还给 mixin 调用分支。
                self.t.recall(saved);
                return Ok(None);
            }
        };
        let guard = if self.t.peek_word("when") {
            self.t.match_str("when");
            Some(self.conditions()?)
        } else {
            None
        };
        if self.t.current_char() != Some('{') {
            self.t.recall(saved);
            return Ok(None);
        }
        let rules = self.block()?;
        let variadic = params.iter().any(|p| p.variadic);
        Ok(Some(Node::at(
            NodeKind::MixinDefinition(Box::new(MixinDefinition {
                name,
                params,
                rules,
                guard,
                variadic,
            })),
            index,
        )))
    }

    /// 形参表：`@name`、`@name: 默认值`、`@rest...`、`...`、字面量模式。
    fn mixin_params(&mut self) -> LessResult<Vec<MixinParam>> {
        let mut params = Vec::new();
        loop {
            self.t.skip_whitespace();
            if self.t.match_char(')') {
                break;
            }
            if self.t.match_str("...") {
                params.push(MixinParam {
                    name: None,
                    default: None,
                    pattern: None,
                    variadic: true,
                });
            } else if self.t.current_char() == Some('@') {
                let name = self
                    .t
                    .match_re(r"@[\w-]+")
                    .ok_or_else(|| self.err(ErrorKind::Expected, "期待参数名"))?;
                let name = name[1..].to_string();
                if self.t.match_str("...") {
                    params.push(MixinParam {
                        name: Some(name),
                        default: None,
                        pattern: None,
                        variadic: true,
                    });
                } else if self.t.match_char(':') {
                    let default = self
                        .expression()?
                        .ok_or_else(|| self.err(ErrorKind::Expected, "参数缺少默认值"))?;
                    params.push(MixinParam {
                        name: Some(name),
                        default: Some(default),
                        pattern: None,
                        variadic: false,
                    });
                } else {
                    params.push(MixinParam {
                        name: Some(name),
                        default: None,
                        pattern: None,
                        variadic: false,
                    });
                }
            } else {
                let pattern = self
                    .entity()?
                    .ok_or_else(|| self.err(ErrorKind::Expected, "期待参数或字面量模式"))?;
                params.push(MixinParam {
                    name: None,
                    default: None,
                    pattern: Some(pattern),
                    variadic: false,
                });
            }
            if self.t.match_char(',') || self.t.match_char(';') {
                continue;
            }
            if self.t.match_char(')') {
                break;
            }
            return Err(self.err(ErrorKind::Expected, "参数表缺少分隔符"));
        }
        Ok(params)
    }

    fn mixin_call(&mut self) -> LessResult<Option<Node>> {
        if !matches!(self.t.current_char(), Some('.') | Some('#')) {
            return Ok(None);
        }
        let saved = self.t.remember();
        let index = self.t.index();
        let mut path: Vec<Element> = Vec::new();
        loop {
            let spaced = self.t.is_spaced();
            let explicit = if self.t.current_char() == Some('>') {
                self.t.match_char('>');
                Some(">")
            } else {
                None
            };
            let Some(segment) = self.t.match_re(r"[.#][\w-]+") else {
                if explicit.is_some() {
                    self.t.recall(saved);
                    return Ok(None);
                }
                break;
            };
            let combinator = match explicit {
                Some(c) => c,
                None if path.is_empty() => "",
                None if spaced => " ",
                None => "",
            };
            path.push(Element::text(combinator, segment));
        }
        if path.is_empty() {
            self.t.recall(saved);
            return Ok(None);
        }
        let args = if self.t.current_char() == Some('(') {
            self.mixin_call_args()?
        } else {
            Vec::new()
        };
        let important = self.t.match_re(r"!\s*important").is_some();
        if self.t.match_char(';') || self.t.current_char() == Some('}') {
            return Ok(Some(Node::at(
                NodeKind::MixinCall(Box::new(MixinCall {
                    path,
                    args,
                    important,
                })),
                index,
            )));
        }
        self.t.recall(saved);
        Ok(None)
    }

    /// 实参表。原始括号体含顶层分号时分隔符为 `;`（允许逗号列表实参）。
    fn mixin_call_args(&mut self) -> LessResult<Vec<MixinArg>> {
        let probe = self.t.remember();
        let raw = self
            .t
            .match_balanced('(', ')')
            .ok_or_else(|| self.err(ErrorKind::Expected, "mixin 实参括号未闭合"))?;
        self.t.recall(probe);
        let separator = if has_top_level_semicolon(&raw) { ';' } else { ',' };
        self.t.match_char('(');
        let mut args = Vec::new();
        loop {
            self.t.skip_whitespace();
            if self.t.match_char(')') {
                break;
            }
            let mut name = None;
            if self.t.current_char() == Some('@') {
                let named_probe = self.t.remember();
                if let Some(var) = self.t.match_re(r"@[\w-]+") {
                    if self.t.match_char(':') {
                        name = Some(var[1..].to_string());
                    } else {
                        self.t.recall(named_probe);
                    }
                }
            }
            let value = if self.t.current_char() == Some('{') {
                Node::new(NodeKind::DetachedRuleset(self.block()?))
            } else if separator == ';' {
                self.value()?
            } else {
                self.expression()?
                    .ok_or_else(|| self.err(ErrorKind::Expected, "期待 mixin 实参"))?
            };
            args.push(MixinArg { name, value });
            if self.t.match_char(separator) {
                continue;
            }
            if self.t.match_char(')') {
                break;
            }
            return Err(self.err(ErrorKind::Expected, "mixin 实参缺少分隔符"));
        }
        Ok(args)
    }

    /// `@detached();` 形式的规则集调用。
    fn detached_call(&mut self) -> LessResult<Option<Node>> {
        if self.t.current_char() != Some('@') {
            return Ok(None);
        }
        let saved = self.t.remember();
        let index = self.t.index();
        let Some(name) = self.t.match_re(r"@[\w-]+") else {
            return Ok(None);
        };
        if self.t.match_char('(') && self.t.match_char(')') {
            if self.t.match_char(';') || self.t.current_char() == Some('}') {
                return Ok(Some(Node::at(
                    NodeKind::DetachedCall(name[1..].to_string()),
                    index,
                )));
            }
        }
        self.t.recall(saved);
        Ok(None)
    }

    // ---- @ 指令 ----------------------------------------------------------

    fn directive(&mut self) -> LessResult<Option<Node>> {
        if self.t.current_char() != Some('@') {
            return Ok(None);
        }
        let index = self.t.index();
        let Some(name) = self.t.match_re(r"@[a-zA-Z-]+") else {
            return Ok(None);
        };
        // vendor 前缀剥离：@-webkit-keyframes → keyframes
        let mut base = name[1..].to_string();
        if base.starts_with('-') {
            if let Some(pos) = base[1..].find('-') {
                base = base[pos + 2..].to_string();
            }
        }

        if base == "import" {
            return Ok(Some(self.import_directive(index)?));
        }
        if base == "media" {
            return Ok(Some(self.media_directive(index)?));
        }
        if base == "keyframes" {
            return Ok(Some(self.keyframes_directive(name, index)?));
        }
        if base == "charset" || base == "namespace" {
            let value = self.value()?;
            if !self.t.match_char(';') {
                return Err(self.err(ErrorKind::MissingSemicolon, format!("{name} 缺少分号")));
            }
            return Ok(Some(Node::at(
                NodeKind::Directive(Box::new(Directive {
                    name,
                    identifier: String::new(),
                    rules: None,
                    value: Some(value),
                })),
                index,
            )));
        }
        if BLOCK_DIRECTIVES.contains(&base.as_str()) {
            let identifier = self
                .t
                .match_until(
                    '{',
                    UntilOptions {
                        include_delimiter: false,
                        balanced_parens: true,
                    },
                )
                .ok_or_else(|| self.err(ErrorKind::Expected, format!("{name} 缺少块体")))?;
            let rules = self.block()?;
            return Ok(Some(Node::at(
                NodeKind::Directive(Box::new(Directive {
                    name,
                    identifier: identifier.trim().to_string(),
                    rules: Some(rules),
                    value: None,
                })),
                index,
            )));
        }
        Err(LessError::parse(
            ErrorKind::DirectiveUnknown,
            format!("无法识别的指令 {name}"),
            index,
        ))
    }

    fn import_directive(&mut self, index: usize) -> LessResult<Node> {
        let mut options = ImportOptions::default();
        if self.t.current_char() == Some('(') {
            let raw = self
                .t
                .match_balanced('(', ')')
                .ok_or_else(|| self.err(ErrorKind::Expected, "@import 选项未闭合"))?;
            for option in raw
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|s| !s.is_empty())
            {
                let option = option.trim().to_ascii_lowercase();
                if !IMPORT_OPTIONS.contains(&option.as_str()) {
                    return Err(LessError::parse(
                        ErrorKind::UnrecognizedImportOption,
                        format!("未知的 @import 选项 {option}"),
                        index,
                    ));
                }
                match option.as_str() {
                    "once" => options.once = true,
                    "multiple" => options.multiple = true,
                    "css" => options.css = true,
                    "less" => options.less = true,
                    "inline" => options.inline = true,
                    "reference" => options.reference = true,
                    "optional" => options.optional = true,
                    _ => unreachable!(),
                }
            }
        }
        let illegal = [
            (options.css && options.less, "css 与 less"),
            (options.inline && options.css, "inline 与 css"),
            (options.inline && options.less, "inline 与 less"),
            (options.inline && options.reference, "inline 与 reference"),
            (options.once && options.multiple, "once 与 multiple"),
            (options.reference && options.css, "reference 与 css"),
        ];
        for (broken, pair) in illegal {
            if broken {
                return Err(LessError::parse(
                    ErrorKind::InvalidImportCombo,
                    format!("@import 选项 {pair} 不能同时使用"),
                    index,
                ));
            }
        }
        if !options.multiple {
            options.once = true;
        }

        let path = if let Some(q) = self.quoted()? {
            q
        } else if self.t.peek_str("url(") {
            let call_index = self.t.index();
            self.t.match_str("url");
            self.t.match_char('(');
            self.url_body(call_index)?
        } else {
            return Err(self.err(ErrorKind::Expected, "@import 缺少路径"));
        };

        let features = if self.t.current_char() == Some(';') {
            Vec::new()
        } else {
            self.media_features()?
        };
        if !self.t.match_char(';') {
            return Err(self.err(ErrorKind::MissingSemicolon, "@import 缺少分号"));
        }
        Ok(Node::at(
            NodeKind::Import(Box::new(Import {
                path,
                features,
                options,
            })),
            index,
        ))
    }

    fn media_directive(&mut self, index: usize) -> LessResult<Node> {
        let features = self.media_features()?;
        let rules = self.block()?;
        Ok(Node::at(
            NodeKind::Media(Box::new(Media { features, rules })),
            index,
        ))
    }

    /// 媒体特征：逗号分隔的组，每组是关键字与 `(属性: 值)` 的序列。
    fn media_features(&mut self) -> LessResult<Vec<Node>> {
        let mut groups = Vec::new();
        loop {
            let mut terms = Vec::new();
            loop {
                self.t.skip_whitespace();
                if self.t.current_char() == Some('(') {
                    self.t.match_char('(');
                    let probe = self.t.remember();
                    let inner = if let Some(prop) = self.t.match_re(r"[\w-]+") {
                        if self.t.match_char(':') {
                            let value = self.value()?;
                            Node::new(NodeKind::Rule(Box::new(Rule {
                                name: prop,
                                value,
                                variable: false,
                                variadic: false,
                                merge: None,
                                interpolated: false,
                            })))
                        } else {
                            self.t.recall(probe);
                            self.expression()?.ok_or_else(|| {
                                self.err(ErrorKind::Expected, "媒体特征括号内缺少内容")
                            })?
                        }
                    } else {
                        self.expression()?.ok_or_else(|| {
                            self.err(ErrorKind::Expected, "媒体特征括号内缺少内容")
                        })?
                    };
                    self.expect_char(')')?;
                    terms.push(Node::new(NodeKind::Paren(Box::new(inner))));
                    continue;
                }
                if let Some(v) = self.variable_entity() {
                    self.t.skip_whitespace();
                    terms.push(v);
                    continue;
                }
                if let Some(word) = self.t.match_keyword(false, false) {
                    self.t.skip_whitespace();
                    terms.push(Node::keyword(word));
                    continue;
                }
                break;
            }
            if !terms.is_empty() {
                groups.push(if terms.len() == 1 {
                    terms.into_iter().next().unwrap()
                } else {
                    Node::new(NodeKind::Expression(terms))
                });
            }
            if !self.t.match_char(',') {
                break;
            }
        }
        Ok(groups)
    }

    /// `@keyframes` 块：`(from|to|N%)` 档位列表各随一个声明块。
    fn keyframes_directive(&mut self, name: String, index: usize) -> LessResult<Node> {
        let identifier = self.t.match_re(r"[\w-]+").unwrap_or_default();
        self.expect_char('{')?;
        let mut frames = Vec::new();
        loop {
            self.t.skip_whitespace();
            self.t.take_comments();
            if self.t.match_char('}') {
                break;
            }
            if self.t.is_eof() {
                return Err(self.err(ErrorKind::Expected, "@keyframes 缺少 '}'"));
            }
            let frame_index = self.t.index();
            let mut stops = Vec::new();
            loop {
                let stop = self
                    .t
                    .match_re(r"from|to|\d+(?:\.\d+)?%")
                    .ok_or_else(|| self.err(ErrorKind::Expected, "期待关键帧档位"))?;
                stops.push(stop);
                if !self.t.match_char(',') {
                    break;
                }
            }
            let rules = self.block()?;
            frames.push(Node::at(
                NodeKind::KeyFrame(Box::new(KeyFrame {
                    selectors: stops,
                    rules,
                })),
                frame_index,
            ));
        }
        Ok(Node::at(
            NodeKind::Directive(Box::new(Directive {
                name,
                identifier,
                rules: Some(frames),
                value: None,
            })),
            index,
        ))
    }

    // ---- 守卫条件 --------------------------------------------------------

    fn conditions(&mut self) -> LessResult<Node> {
        let mut node = self.condition_or()?;
        while self.t.match_char(',') {
            let rhs = self.condition_or()?;
            node = Node::new(NodeKind::Condition(Box::new(Condition {
                op: "or".into(),
                left: node,
                right: rhs,
                negate: false,
            })));
        }
        Ok(node)
    }

    fn condition_or(&mut self) -> LessResult<Node> {
        let mut node = self.condition_and()?;
        while self.t.peek_word("or") {
            self.t.match_str("or");
            let rhs = self.condition_and()?;
            node = Node::new(NodeKind::Condition(Box::new(Condition {
                op: "or".into(),
                left: node,
                right: rhs,
                negate: false,
            })));
        }
        Ok(node)
    }

    fn condition_and(&mut self) -> LessResult<Node> {
        let mut node = self.condition_primary()?;
        while self.t.peek_word("and") {
            self.t.match_str("and");
            let rhs = self.condition_primary()?;
            node = Node::new(NodeKind::Condition(Box::new(Condition {
                op: "and".into(),
                left: node,
                right: rhs,
                negate: false,
            })));
        }
        Ok(node)
    }

    fn condition_primary(&mut self) -> LessResult<Node> {
        let mut negate = false;
        if self.t.peek_word("not") {
            self.t.match_str("not");
            negate = true;
        }
        if self.t.match_char('(') {
            self.paren_level += 1;
            let mut inner = self.condition_or()?;
            self.paren_level -= 1;
            self.expect_char(')')?;
            if negate {
                if let NodeKind::Condition(cond) = &mut inner.kind {
                    cond.negate = !cond.negate;
                }
            }
            return Ok(inner);
        }
        let left = self
            .condition_operand()?
            .ok_or_else(|| self.err(ErrorKind::UnrecognizedCondition, "无法识别的守卫条件"))?;
        let op = self.t.match_re(r">=|<=|=<|=>|<|>|=");
        let node = match op {
            Some(op) => {
                let op = match op.as_str() {
                    "=<" => "<=".to_string(),
                    "=>" => ">=".to_string(),
                    other => other.to_string(),
                };
                let right = self.condition_operand()?.ok_or_else(|| {
                    self.err(ErrorKind::UnrecognizedCondition, "比较缺少右操作数")
                })?;
                Condition {
                    op,
                    left,
                    right,
                    negate,
                }
            }
            None => Condition {
                op: "=".into(),
                left,
                right: Node::keyword("true"),
                negate,
            },
        };
        Ok(Node::new(NodeKind::Condition(Box::new(node))))
    }

    fn condition_operand(&mut self) -> LessResult<Option<Node>> {
        if let Some(n) = self.addition()? {
            return Ok(Some(n));
        }
        self.entity()
    }
}

/// 括号深度为零处出现的分号决定 mixin 实参分隔符。
fn has_top_level_semicolon(raw: &str) -> bool {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        match quote {
            Some(q) => {
                if c == '\\' {
                    chars.next();
                } else if c == q {
                    quote = None;
                }
            }
            None => match c {
                '"' | '\'' => quote = Some(c),
                '(' => depth += 1,
                ')' => depth = depth.saturating_sub(1),
                ';' if depth == 0 => return true,
                _ => {}
            },
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Vec<Node> {
        Parser::new(false, true, 1).parse(src, None).unwrap()
    }

    fn parse_err(src: &str) -> LessError {
        Parser::new(false, true, 1).parse(src, None).unwrap_err()
    }

    #[test]
    fn variable_rule_is_flagged() {
        let nodes = parse("@width: 10px;");
        assert_eq!(nodes.len(), 1);
        match &nodes[0].kind {
            NodeKind::Rule(rule) => {
                assert!(rule.variable);
                assert_eq!(rule.name, "@width");
            }
            other => panic!("期待变量规则, 得到 {other:?}"),
        }
    }

    #[test]
    fn ruleset_collects_selectors_and_rules() {
        let nodes = parse(".a, .b > .c { color: red; }");
        match &nodes[0].kind {
            NodeKind::Ruleset(ruleset) => {
                assert_eq!(ruleset.selectors.len(), 2);
                assert_eq!(ruleset.selectors[1].css(false), ".b > .c");
                assert_eq!(ruleset.rules.len(), 1);
            }
            other => panic!("期待规则集, 得到 {other:?}"),
        }
    }

    #[test]
    fn merge_suffixes_set_separators() {
        let nodes = parse(".x { a+: 1; b+_: 2; }");
        match &nodes[0].kind {
            NodeKind::Ruleset(ruleset) => {
                let merges: Vec<Option<&'static str>> = ruleset
                    .rules
                    .iter()
                    .filter_map(|r| match &r.kind {
                        NodeKind::Rule(rule) => Some(rule.merge),
                        _ => None,
                    })
                    .collect();
                assert_eq!(merges, vec![Some(", "), Some(" ")]);
            }
            other => panic!("期待规则集, 得到 {other:?}"),
        }
    }

    #[test]
    fn interpolated_property_names_are_marked() {
        let nodes = parse(".x { @{side}-width: 1px; }");
        match &nodes[0].kind {
            NodeKind::Ruleset(ruleset) => match &ruleset.rules[0].kind {
                NodeKind::Rule(rule) => {
                    assert!(rule.interpolated);
                    assert_eq!(rule.name, "@{side}-width");
                }
                other => panic!("期待规则, 得到 {other:?}"),
            },
            other => panic!("期待规则集, 得到 {other:?}"),
        }
    }

    #[test]
    fn mixin_definition_vs_call_disambiguation() {
        let nodes = parse(".m(@a) { width: @a; } .use { .m(2px); }");
        assert!(matches!(&nodes[0].kind, NodeKind::MixinDefinition(_)));
        match &nodes[1].kind {
            NodeKind::Ruleset(ruleset) => {
                assert!(matches!(&ruleset.rules[0].kind, NodeKind::MixinCall(_)));
            }
            other => panic!("期待规则集, 得到 {other:?}"),
        }
    }

    #[test]
    fn semicolon_separated_mixin_arguments() {
        let nodes = parse(".use { .m(1, 2; 3); }");
        match &nodes[0].kind {
            NodeKind::Ruleset(ruleset) => match &ruleset.rules[0].kind {
                NodeKind::MixinCall(call) => assert_eq!(call.args.len(), 2),
                other => panic!("期待 mixin 调用, 得到 {other:?}"),
            },
            other => panic!("期待规则集, 得到 {other:?}"),
        }
    }

    #[test]
    fn variadic_params_are_detected() {
        let nodes = parse(".m(@a; @rest...) { }");
        match &nodes[0].kind {
            NodeKind::MixinDefinition(def) => {
                assert!(def.variadic);
                assert_eq!(def.arity(), 2);
                assert_eq!(def.required(), 1);
            }
            other => panic!("期待 mixin 定义, 得到 {other:?}"),
        }
    }

    #[test]
    fn guards_attach_to_definitions_and_rulesets() {
        let nodes = parse(".m(@x) when (@x > 0) { } .r when (@y) { }");
        assert!(matches!(
            &nodes[0].kind,
            NodeKind::MixinDefinition(def) if def.guard.is_some()
        ));
        assert!(matches!(
            &nodes[1].kind,
            NodeKind::Ruleset(rs) if rs.guard.is_some()
        ));
    }

    #[test]
    fn import_options_are_validated() {
        let err = parse_err("@import (inline, css) \"a.css\";");
        assert_eq!(err.kind, ErrorKind::InvalidImportCombo);
        let err = parse_err("@import (weird) \"a.css\";");
        assert_eq!(err.kind, ErrorKind::UnrecognizedImportOption);
        let err = parse_err("@import \"a.css\"");
        assert_eq!(err.kind, ErrorKind::MissingSemicolon);
    }

    #[test]
    fn import_defaults_to_once() {
        let nodes = parse("@import \"a.less\";");
        match &nodes[0].kind {
            NodeKind::Import(import) => assert!(import.options.once),
            other => panic!("期待导入, 得到 {other:?}"),
        }
    }

    #[test]
    fn extend_forms_parse() {
        let nodes = parse(".b:extend(.a) { x: 1; } .c { &:extend(.a all); }");
        match &nodes[0].kind {
            NodeKind::Ruleset(ruleset) => {
                let has_extend = ruleset.selectors[0]
                    .elements
                    .iter()
                    .any(|e| matches!(&e.value, ElementValue::Node(n) if matches!(n.kind, NodeKind::Extend(_))));
                assert!(has_extend);
            }
            other => panic!("期待规则集, 得到 {other:?}"),
        }
        match &nodes[1].kind {
            NodeKind::Ruleset(ruleset) => match &ruleset.rules[0].kind {
                NodeKind::Extend(extend) => {
                    assert_eq!(extend.partial.len(), 1);
                    assert!(extend.exact.is_empty());
                }
                other => panic!("期待 extend, 得到 {other:?}"),
            },
            other => panic!("期待规则集, 得到 {other:?}"),
        }
    }

    #[test]
    fn unterminated_extend_is_an_error() {
        let err = parse_err(".c { &:extend(.a; }");
        assert_eq!(err.kind, ErrorKind::ExtendNotTerminated);
    }

    #[test]
    fn unknown_directive_is_rejected() {
        let err = parse_err("@frobnicate { a: 1; }");
        assert_eq!(err.kind, ErrorKind::DirectiveUnknown);
    }

    #[test]
    fn keyframes_blocks_parse_stops() {
        let nodes = parse("@keyframes fade { from { opacity: 0; } 50% { opacity: 0.5; } to { opacity: 1; } }");
        match &nodes[0].kind {
            NodeKind::Directive(directive) => {
                assert_eq!(directive.identifier, "fade");
                let rules = directive.rules.as_ref().unwrap();
                assert_eq!(rules.len(), 3);
                assert!(matches!(&rules[1].kind, NodeKind::KeyFrame(f) if f.selectors == ["50%"]));
            }
            other => panic!("期待指令, 得到 {other:?}"),
        }
    }

    #[test]
    fn strict_math_keeps_bare_operators_literal() {
        let nodes = Parser::new(true, true, 1)
            .parse(".a { width: 5px + 3; height: (5px + 3); }", None)
            .unwrap();
        match &nodes[0].kind {
            NodeKind::Ruleset(ruleset) => {
                match &ruleset.rules[0].kind {
                    NodeKind::Rule(rule) => {
                        // 括号外：三个独立项，不构成运算节点
                        match &rule.value.kind {
                            NodeKind::Value(v) => {
                                assert!(matches!(&v.expressions[0].kind, NodeKind::Expression(terms) if terms.len() == 3));
                            }
                            other => panic!("期待值, 得到 {other:?}"),
                        }
                    }
                    other => panic!("期待规则, 得到 {other:?}"),
                }
                match &ruleset.rules[1].kind {
                    NodeKind::Rule(rule) => match &rule.value.kind {
                        NodeKind::Value(v) => {
                            assert!(matches!(&v.expressions[0].kind, NodeKind::Paren(inner) if matches!(inner.kind, NodeKind::Operation(_))));
                        }
                        other => panic!("期待值, 得到 {other:?}"),
                    },
                    other => panic!("期待规则, 得到 {other:?}"),
                }
            }
            other => panic!("期待规则集, 得到 {other:?}"),
        }
    }

    #[test]
    fn font_shorthand_keeps_slash() {
        let nodes = parse(".a { font: 12px/1.5 Arial, sans-serif; }");
        match &nodes[0].kind {
            NodeKind::Ruleset(ruleset) => match &ruleset.rules[0].kind {
                NodeKind::Rule(rule) => {
                    let css = rule.value.to_css(false);
                    assert_eq!(css, "12px/1.5 Arial, sans-serif");
                }
                other => panic!("期待规则, 得到 {other:?}"),
            },
            other => panic!("期待规则集, 得到 {other:?}"),
        }
    }

    #[test]
    fn filter_chain_parses_whitelisted_functions() {
        let nodes = parse(".a { filter: blur(2px) brightness(0.5); }");
        match &nodes[0].kind {
            NodeKind::Ruleset(ruleset) => match &ruleset.rules[0].kind {
                NodeKind::Rule(rule) => {
                    assert_eq!(rule.value.to_css(false), "blur(2px) brightness(0.5)");
                }
                other => panic!("期待规则, 得到 {other:?}"),
            },
            other => panic!("期待规则集, 得到 {other:?}"),
        }
    }

    #[test]
    fn detached_ruleset_declaration_and_call() {
        let nodes = parse("@set: { color: red; }; .a { @set(); }");
        assert!(matches!(
            &nodes[0].kind,
            NodeKind::Rule(rule) if rule.variable && matches!(rule.value.kind, NodeKind::DetachedRuleset(_))
        ));
        match &nodes[1].kind {
            NodeKind::Ruleset(ruleset) => {
                assert!(matches!(&ruleset.rules[0].kind, NodeKind::DetachedCall(name) if name == "set"));
            }
            other => panic!("期待规则集, 得到 {other:?}"),
        }
    }

    #[test]
    fn media_features_mix_keywords_and_pairs() {
        let nodes = parse("@media screen and (min-width: 768px) { .a { x: 1; } }");
        match &nodes[0].kind {
            NodeKind::Media(media) => {
                assert_eq!(media.features.len(), 1);
                let css = media.features[0].to_css(false);
                assert_eq!(css, "screen and (min-width: 768px)");
            }
            other => panic!("期待媒体块, 得到 {other:?}"),
        }
    }

    #[test]
    fn comments_are_preserved_as_nodes() {
        let nodes = parse("/* head */ .a { color: red; } // tail\n");
        assert!(matches!(&nodes[0].kind, NodeKind::Comment(c) if c.text == "/* head */"));
        assert!(matches!(&nodes.last().unwrap().kind, NodeKind::Comment(c) if !c.is_css_valid()));
    }
}
