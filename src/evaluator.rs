//! 语义求值：在作用域帧栈上归约 AST。求值产出新节点，原树不被修改；
//! 变量惰性解析、mixin 按候选匹配展开、守卫与运算在这里完成。

use crate::ast::*;
use crate::color::Rgba;
use crate::env::{Env, ExtendRecord, Frame, MixinEntry};
use crate::error::{ErrorKind, LessError, LessResult};
use crate::parser::Parser;
use crate::unit;
use crate::visitor;
use once_cell::sync::Lazy;
use regex::Regex;

/// mixin 展开的深度护栏。守卫循环通常远小于该值。
const MAX_MIXIN_DEPTH: usize = 256;

static INTERPOLATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@\{([\w-]+)\}").expect("内建正则必须合法"));

pub struct Evaluator<'i> {
    pub env: Env<'i>,
}

/// mixin 候选的匹配结论。`Pass` 优于 `Default`，其余候选被丢弃。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MatchOutcome {
    Pass,
    Default,
    GuardFail,
    ArgumentMismatch,
}

impl<'i> Evaluator<'i> {
    pub fn new(env: Env<'i>) -> Self {
        Self { env }
    }

    /// 求值入口：根节点序列按源顺序归约。
    pub fn evaluate(&mut self, nodes: Vec<Node>) -> LessResult<Vec<Node>> {
        self.env.push_frame(Frame::from_rules(&nodes));
        let mut out = Vec::new();
        for node in &nodes {
            let was_call = matches!(&node.kind, NodeKind::MixinCall(_));
            let before = out.len();
            self.eval_statement(node, &[], &mut out)?;
            if was_call
                && out[before..]
                    .iter()
                    .any(|n| matches!(&n.kind, NodeKind::Rule(r) if !r.variable))
            {
                return Err(LessError::eval(
                    ErrorKind::IncompleteRule,
                    "顶层 mixin 调用产生了无法附加的声明",
                ));
            }
        }
        self.env.pop_frame();
        merge_declarations(&mut out);
        Ok(out)
    }

    fn eval_statement(
        &mut self,
        node: &Node,
        parents: &[Selector],
        out: &mut Vec<Node>,
    ) -> LessResult<()> {
        match &node.kind {
            NodeKind::Comment(_) => out.push(node.clone()),
            NodeKind::Rule(rule) if rule.variable => {}
            NodeKind::Rule(rule) => {
                let evaluated = self.eval_rule(node, rule)?;
                out.push(evaluated);
            }
            NodeKind::MixinDefinition(_) => {}
            NodeKind::Ruleset(ruleset) => {
                // 带守卫的规则集只能被调用，不在原地输出。
                if ruleset.guard.is_none() {
                    if let Some(evaluated) = self.eval_ruleset(ruleset, parents, &node.header)? {
                        out.push(evaluated);
                    }
                }
            }
            NodeKind::MixinCall(call) => {
                self.expand_mixin_call(call, parents, &node.header, out)?;
            }
            NodeKind::DetachedCall(name) => {
                self.expand_detached_call(name, parents, out)?;
            }
            NodeKind::Import(import) => {
                self.expand_import(import, parents, &node.header, out)?;
            }
            NodeKind::Media(media) => {
                out.push(self.eval_media(media, parents, &node.header)?);
            }
            NodeKind::Directive(directive) => {
                out.push(self.eval_directive(directive, &node.header)?);
            }
            NodeKind::Extend(extend) => {
                self.record_extends(parents, extend);
            }
            // 顶层散落的纯文本（inline 导入产物等）原样保留。
            NodeKind::Text(_) => out.push(node.clone()),
            _ => {}
        }
        Ok(())
    }

    // ---- 规则集与选择器 --------------------------------------------------

    fn eval_ruleset(
        &mut self,
        ruleset: &Ruleset,
        parents: &[Selector],
        header: &NodeHeader,
    ) -> LessResult<Option<Node>> {
        let (selectors, extends) = self.eval_selectors(&ruleset.selectors)?;
        let joined = join_with_parents(parents, &selectors);
        for (child_index, records) in extends {
            for joined_selector in joined_for_child(parents, &selectors, child_index) {
                for (target, partial) in &records {
                    self.env.extends.push(ExtendRecord {
                        extender: joined_selector.clone(),
                        target: target.clone(),
                        partial: *partial,
                    });
                }
            }
        }

        self.env.push_frame(Frame::from_rules(&ruleset.rules));
        let mut out = Vec::new();
        let result = (|| -> LessResult<()> {
            for rule in &ruleset.rules {
                self.eval_statement(rule, &joined, &mut out)?;
            }
            Ok(())
        })();
        self.env.pop_frame();
        result?;
        merge_declarations(&mut out);

        Ok(Some(Node {
            header: header.clone(),
            kind: NodeKind::Ruleset(Box::new(Ruleset {
                selectors: joined,
                rules: out,
                guard: None,
            })),
        }))
    }

    /// 选择器求值：插值元素文本、剥离 extend 元素并带出其目标。
    #[allow(clippy::type_complexity)]
    fn eval_selectors(
        &mut self,
        selectors: &[Selector],
    ) -> LessResult<(Vec<Selector>, Vec<(usize, Vec<(Selector, bool)>)>)> {
        let mut evaluated = Vec::new();
        let mut all_extends = Vec::new();
        for (index, selector) in selectors.iter().enumerate() {
            let mut elements = Vec::new();
            let mut records = Vec::new();
            for element in &selector.elements {
                match &element.value {
                    ElementValue::Text(text) => {
                        let text = if text.contains("@{") {
                            self.interpolate(text)?
                        } else {
                            text.clone()
                        };
                        elements.push(Element {
                            combinator: element.combinator,
                            value: ElementValue::Text(text),
                        });
                    }
                    ElementValue::Node(inner) => match &inner.kind {
                        NodeKind::Extend(extend) => {
                            for target in &extend.exact {
                                records.push((target.clone(), false));
                            }
                            for target in &extend.partial {
                                records.push((target.clone(), true));
                            }
                        }
                        _ => {
                            let evaluated_inner = self.eval_node(inner)?;
                            elements.push(Element {
                                combinator: element.combinator,
                                value: ElementValue::Node(Box::new(evaluated_inner)),
                            });
                        }
                    },
                }
            }
            if !records.is_empty() {
                all_extends.push((index, records));
            }
            evaluated.push(Selector { elements });
        }
        Ok((evaluated, all_extends))
    }

    fn record_extends(&mut self, parents: &[Selector], extend: &Extend) {
        for parent in parents {
            for target in &extend.exact {
                self.env.extends.push(ExtendRecord {
                    extender: parent.clone(),
                    target: target.clone(),
                    partial: false,
                });
            }
            for target in &extend.partial {
                self.env.extends.push(ExtendRecord {
                    extender: parent.clone(),
                    target: target.clone(),
                    partial: true,
                });
            }
        }
    }

    // ---- 规则（声明） ----------------------------------------------------

    fn eval_rule(&mut self, node: &Node, rule: &Rule) -> LessResult<Node> {
        let name = if rule.interpolated {
            self.interpolate_property_name(&rule.name)?
        } else {
            rule.name.clone()
        };
        let value = self.eval_node(&rule.value)?;
        Ok(Node {
            header: node.header.clone(),
            kind: NodeKind::Rule(Box::new(Rule {
                name,
                value,
                variable: false,
                variadic: rule.variadic,
                merge: rule.merge,
                interpolated: false,
            })),
        })
    }

    /// `@{name}` 属性名插值：变量值必须是关键字、字符串或数值。
    fn interpolate_property_name(&mut self, raw: &str) -> LessResult<String> {
        let mut output = String::new();
        let mut last = 0;
        for caps in INTERPOLATION_RE.captures_iter(raw) {
            let whole = caps.get(0).unwrap();
            let name = caps.get(1).unwrap().as_str();
            output.push_str(&raw[last..whole.start()]);
            let value = self.eval_variable(&format!("@{name}"), None)?;
            match &value.kind {
                NodeKind::Keyword(_) | NodeKind::Quoted(_) | NodeKind::Number(_) => {
                    output.push_str(value.text_value().trim());
                }
                _ => {
                    return Err(LessError::eval(
                        ErrorKind::InvalidVariableForPropertyName,
                        format!("变量 @{name} 不能用作属性名"),
                    ));
                }
            }
            last = whole.end();
        }
        output.push_str(&raw[last..]);
        Ok(output)
    }

    /// `@{name}` 文本插值（字符串与选择器共用）。
    fn interpolate(&mut self, raw: &str) -> LessResult<String> {
        let mut output = String::new();
        let mut last = 0;
        for caps in INTERPOLATION_RE.captures_iter(raw) {
            let whole = caps.get(0).unwrap();
            let name = caps.get(1).unwrap().as_str();
            output.push_str(&raw[last..whole.start()]);
            let value = self.eval_variable(&format!("@{name}"), None)?;
            output.push_str(&value.text_value());
            last = whole.end();
        }
        output.push_str(&raw[last..]);
        Ok(output)
    }

    // ---- 值求值 ----------------------------------------------------------

    fn eval_node(&mut self, node: &Node) -> LessResult<Node> {
        match &node.kind {
            NodeKind::Variable(name) => self.eval_variable(name, node.header.index),
            NodeKind::Operation(op) => {
                let left = unwrap_single(self.eval_node(&op.left)?);
                let right = unwrap_single(self.eval_node(&op.right)?);
                self.operate(op.op, left, right, node.header.index)
            }
            NodeKind::Paren(inner) => Ok(unwrap_single(self.eval_node(inner)?)),
            NodeKind::Expression(terms) => {
                let mut evaluated = Vec::with_capacity(terms.len());
                for term in terms {
                    evaluated.push(self.eval_node(term)?);
                }
                Ok(Node {
                    header: node.header.clone(),
                    kind: NodeKind::Expression(evaluated),
                })
            }
            NodeKind::Value(value) => {
                let mut expressions = Vec::with_capacity(value.expressions.len());
                for expression in &value.expressions {
                    expressions.push(self.eval_node(expression)?);
                }
                Ok(Node {
                    header: node.header.clone(),
                    kind: NodeKind::Value(Value {
                        expressions,
                        important: value.important.clone(),
                    }),
                })
            }
            NodeKind::Call(call) => self.eval_call(node, call),
            NodeKind::Quoted(quoted) => {
                let content = if quoted.content.contains("@{") {
                    self.interpolate(&quoted.content)?
                } else {
                    quoted.content.clone()
                };
                Ok(Node {
                    header: node.header.clone(),
                    kind: NodeKind::Quoted(Quoted {
                        quote: quoted.quote,
                        content,
                        escaped: quoted.escaped,
                    }),
                })
            }
            NodeKind::Url(inner) => {
                let evaluated = self.eval_node(inner)?;
                Ok(Node {
                    header: node.header.clone(),
                    kind: NodeKind::Url(Box::new(evaluated)),
                })
            }
            NodeKind::Script(_) => Ok(Node::keyword("[script unsupported]")),
            NodeKind::Assignment(assignment) => {
                let value = self.eval_node(&assignment.value)?;
                Ok(Node {
                    header: node.header.clone(),
                    kind: NodeKind::Assignment(Assignment {
                        key: assignment.key.clone(),
                        value: Box::new(value),
                    }),
                })
            }
            NodeKind::Condition(_) => Ok(node.clone()),
            _ => Ok(node.clone()),
        }
    }

    fn eval_call(&mut self, node: &Node, call: &Call) -> LessResult<Node> {
        let mut args = Vec::with_capacity(call.args.len());
        for arg in &call.args {
            let evaluated = self.eval_node(arg)?;
            args.push(unwrap_single(evaluated));
        }
        // 原文透传函数只做插值
        if args.len() == 1 {
            let raw = match &args[0].kind {
                NodeKind::Text(text) if text.contains("@{") => Some(text.clone()),
                _ => None,
            };
            if let Some(raw) = raw {
                args[0] = Node::text(self.interpolate(&raw)?);
            }
        }
        if let Some(function) = self.env.functions.get(&call.name) {
            return function(&self.env, &args)
                .map_err(|e| locate(e, node.header.index));
        }
        Ok(Node {
            header: node.header.clone(),
            kind: NodeKind::Call(Call {
                name: call.name.clone(),
                args,
            }),
        })
    }

    /// 变量解析。`@@name` 先求内层，再以其文本值二次查找。
    fn eval_variable(&mut self, name: &str, index: Option<usize>) -> LessResult<Node> {
        let lookup = if let Some(indirect) = name.strip_prefix("@@") {
            let inner = self.eval_variable(&format!("@{indirect}"), index)?;
            inner.text_value().trim_start_matches('@').to_string()
        } else {
            name.trim_start_matches('@').to_string()
        };
        if self.env.variable_stack.iter().any(|n| n == &lookup) {
            return Err(locate(
                LessError::eval(
                    ErrorKind::RecursiveVariable,
                    format!("变量 @{lookup} 的定义引用了自身"),
                ),
                index,
            ));
        }
        let value = self.env.find_variable(&lookup).ok_or_else(|| {
            locate(
                LessError::eval(
                    ErrorKind::UndefinedVariable,
                    format!("未定义的变量 @{lookup}"),
                ),
                index,
            )
        })?;
        self.env.variable_stack.push(lookup);
        let result = self.eval_node(&value);
        self.env.variable_stack.pop();
        Ok(unwrap_single(result?))
    }

    // ---- 运算 ------------------------------------------------------------

    fn operate(&self, op: char, left: Node, right: Node, index: Option<usize>) -> LessResult<Node> {
        let result = match (&left.kind, &right.kind) {
            (NodeKind::Number(l), NodeKind::Number(r)) => {
                self.number_operate(op, l, r).map(|n| Node::new(NodeKind::Number(n)))
            }
            (NodeKind::Color(l), NodeKind::Color(r)) => {
                Ok(Node::color(l.operate(op, *r)))
            }
            (NodeKind::Color(l), NodeKind::Number(r)) => {
                let grey = Rgba::opaque(r.value, r.value, r.value);
                Ok(Node::color(l.operate(op, grey)))
            }
            (NodeKind::Number(l), NodeKind::Color(r)) => {
                // 加法与乘法可交换；数值在左的减除是未定义的颜色算术。
                if op == '+' || op == '*' {
                    let grey = Rgba::opaque(l.value, l.value, l.value);
                    Ok(Node::color(r.operate(op, grey)))
                } else {
                    Err(LessError::eval(
                        ErrorKind::ColorArithmetic,
                        format!("数值不能作为颜色运算 '{op}' 的左操作数"),
                    ))
                }
            }
            _ => Err(LessError::eval(
                ErrorKind::IncomparableOperands,
                format!(
                    "无法对 {} 与 {} 执行 '{op}' 运算",
                    left.to_css(false),
                    right.to_css(false)
                ),
            )),
        };
        result.map_err(|e| locate(e, index))
    }

    fn number_operate(&self, op: char, left: &Number, right: &Number) -> LessResult<Number> {
        let mut right_value = right.value;
        let unit = if left.unit.is_empty() {
            right.unit.clone()
        } else if right.unit.is_empty() || right.unit.eq_ignore_ascii_case(&left.unit) {
            left.unit.clone()
        } else {
            match unit::convert(right.value, &right.unit, &left.unit) {
                Some(converted) => {
                    right_value = converted;
                    left.unit.clone()
                }
                None => {
                    return Err(LessError::eval(
                        ErrorKind::IncompatibleUnits,
                        format!("单位 {} 与 {} 之间没有换算", left.unit, right.unit),
                    ));
                }
            }
        };
        if op == '/' && right_value == 0.0 {
            return Err(LessError::eval(ErrorKind::DivideByZero, "除数为 0"));
        }
        let value = match op {
            '+' => left.value + right_value,
            '-' => left.value - right_value,
            '*' => left.value * right_value,
            _ => left.value / right_value,
        };
        Ok(Number::new(value, unit))
    }

    // ---- 守卫条件 ----------------------------------------------------------

    fn eval_condition(&mut self, node: &Node) -> LessResult<bool> {
        let NodeKind::Condition(cond) = &node.kind else {
            let value = unwrap_single(self.eval_node(node)?);
            return Ok(is_true_node(&value));
        };
        let result = match cond.op.as_str() {
            "and" => self.eval_condition(&cond.left)? && self.eval_condition(&cond.right)?,
            "or" => self.eval_condition(&cond.left)? || self.eval_condition(&cond.right)?,
            op => {
                let left = unwrap_single(self.eval_node(&cond.left)?);
                let right = unwrap_single(self.eval_node(&cond.right)?);
                compare(op, &left, &right)?
            }
        };
        Ok(result ^ cond.negate)
    }

    fn eval_guard(&mut self, guard: &Node, default_value: bool) -> LessResult<bool> {
        self.env.default_guard = Some(default_value);
        let result = self.eval_condition(guard);
        self.env.default_guard = None;
        result
    }

    // ---- mixin 匹配与展开 --------------------------------------------------

    fn expand_mixin_call(
        &mut self,
        call: &MixinCall,
        parents: &[Selector],
        header: &NodeHeader,
        out: &mut Vec<Node>,
    ) -> LessResult<()> {
        if self.env.mixin_depth >= MAX_MIXIN_DEPTH {
            return Err(LessError::eval(
                ErrorKind::NoMatchingMixin,
                format!("mixin {} 的展开深度超出上限", call.path_css()),
            ));
        }

        // 实参在调用方作用域先行求值，具名实参必须在位置实参之后。
        let mut args: Vec<(Option<String>, Node)> = Vec::with_capacity(call.args.len());
        let mut seen_named = false;
        for arg in &call.args {
            if arg.name.is_some() {
                seen_named = true;
            } else if seen_named {
                return Err(locate(
                    LessError::eval(
                        ErrorKind::NamedAfterPositional,
                        format!("mixin {} 的具名实参后不能再出现位置实参", call.path_css()),
                    ),
                    header.index,
                ));
            }
            let value = unwrap_single(self.eval_node(&arg.value)?);
            args.push((arg.name.clone(), value));
        }

        let path: Vec<String> = call
            .path
            .iter()
            .filter_map(|e| e.value_text().map(str::to_string))
            .collect();
        let candidates = self.find_mixin_candidates(&path);
        if candidates.is_empty() {
            return Err(locate(
                LessError::eval(
                    ErrorKind::NoMatchingMixin,
                    format!("未找到可匹配的 mixin {}", call.path_css()),
                ),
                header.index,
            ));
        }

        let mut judged = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let outcome = self.match_candidate(&candidate, &args)?;
            judged.push((candidate, outcome));
        }
        let has_pass = judged.iter().any(|(_, o)| *o == MatchOutcome::Pass);
        let wanted = if has_pass {
            MatchOutcome::Pass
        } else {
            MatchOutcome::Default
        };
        let winners: Vec<&MixinEntry> = judged
            .iter()
            .filter(|(_, o)| *o == wanted)
            .map(|(c, _)| c)
            .collect();
        if winners.is_empty() {
            let all_arity = judged
                .iter()
                .all(|(_, o)| *o == MatchOutcome::ArgumentMismatch);
            let error = if all_arity {
                LessError::eval(
                    ErrorKind::WrongArgumentCount,
                    format!("mixin {} 的实参个数不匹配", call.path_css()),
                )
            } else {
                LessError::eval(
                    ErrorKind::NoMatchingMixin,
                    format!("mixin {} 没有满足守卫的定义", call.path_css()),
                )
            };
            return Err(locate(error, header.index));
        }

        self.env.mixin_depth += 1;
        let result = (|| -> LessResult<()> {
            for winner in winners {
                let mut produced = Vec::new();
                match winner {
                    MixinEntry::Definition(def) => {
                        let frame = self.bind_params(def, &args)?;
                        self.env.push_frame(frame);
                        self.env.push_frame(Frame::from_rules(&def.rules));
                        let body = (|| -> LessResult<()> {
                            for rule in &def.rules {
                                self.eval_statement(rule, parents, &mut produced)?;
                            }
                            Ok(())
                        })();
                        self.env.pop_frame();
                        self.env.pop_frame();
                        body?;
                    }
                    MixinEntry::Ruleset { rules, .. } => {
                        self.env.push_frame(Frame::from_rules(rules));
                        let body = (|| -> LessResult<()> {
                            for rule in rules {
                                self.eval_statement(rule, parents, &mut produced)?;
                            }
                            Ok(())
                        })();
                        self.env.pop_frame();
                        body?;
                    }
                }
                if call.important {
                    apply_important(&mut produced);
                }
                // 被调用即被引用：展开产物不再保留 reference 标记。
                visitor::set_reference(&mut produced, false);
                out.append(&mut produced);
            }
            Ok(())
        })();
        self.env.mixin_depth -= 1;
        result
    }

    /// 自内向外找到第一个含首段命中的帧，再沿命名空间路径下钻。
    fn find_mixin_candidates(&self, path: &[String]) -> Vec<MixinEntry> {
        let Some(first) = path.first() else {
            return Vec::new();
        };
        for frame in self.env.frames.iter().rev() {
            let mut matches: Vec<MixinEntry> = frame
                .mixins
                .iter()
                .filter(|entry| entry.name() == first)
                .cloned()
                .collect();
            if matches.is_empty() {
                continue;
            }
            for segment in &path[1..] {
                let mut next = Vec::new();
                for entry in &matches {
                    let inner = Frame::from_rules(entry.rules());
                    next.extend(
                        inner
                            .mixins
                            .into_iter()
                            .filter(|candidate| candidate.name() == segment),
                    );
                }
                matches = next;
                if matches.is_empty() {
                    break;
                }
            }
            if !matches.is_empty() {
                return matches;
            }
        }
        Vec::new()
    }

    fn match_candidate(
        &mut self,
        entry: &MixinEntry,
        args: &[(Option<String>, Node)],
    ) -> LessResult<MatchOutcome> {
        let (params, guard): (&[MixinParam], &Option<Node>) = match entry {
            MixinEntry::Definition(def) => (&def.params, &def.guard),
            MixinEntry::Ruleset { guard, .. } => (&[], guard),
        };
        let variadic = params.iter().any(|p| p.variadic);
        let arity = params.len();

        let named: Vec<(&String, &Node)> = args
            .iter()
            .filter_map(|(n, v)| n.as_ref().map(|n| (n, v)))
            .collect();
        for (name, _) in &named {
            if !params.iter().any(|p| p.name.as_deref() == Some(name.as_str())) {
                return Ok(MatchOutcome::ArgumentMismatch);
            }
        }
        let positional: Vec<&Node> = args
            .iter()
            .filter(|(n, _)| n.is_none())
            .map(|(_, v)| v)
            .collect();
        if !variadic && positional.len() + named.len() > arity {
            return Ok(MatchOutcome::ArgumentMismatch);
        }

        // 逐个形参核对：模式参数要求字面量相等，必填参数要求实参在位。
        let mut cursor = 0usize;
        for param in params {
            if param.variadic {
                cursor = positional.len();
                continue;
            }
            if let Some(name) = &param.name {
                if named.iter().any(|(n, _)| *n == name) {
                    continue;
                }
            }
            if let Some(pattern) = &param.pattern {
                match positional.get(cursor) {
                    Some(arg) if arg.text_value() == pattern.text_value() => cursor += 1,
                    _ => return Ok(MatchOutcome::ArgumentMismatch),
                }
                continue;
            }
            match positional.get(cursor) {
                Some(_) => cursor += 1,
                None if param.default.is_some() => {}
                None => return Ok(MatchOutcome::ArgumentMismatch),
            }
        }
        if cursor < positional.len() && !variadic {
            return Ok(MatchOutcome::ArgumentMismatch);
        }

        let Some(guard) = guard else {
            return Ok(MatchOutcome::Pass);
        };

        let frame = match entry {
            MixinEntry::Definition(def) => self.bind_params(def, args)?,
            MixinEntry::Ruleset { .. } => Frame::default(),
        };
        self.env.push_frame(frame);
        let plain = self.eval_guard(guard, false);
        let outcome = match plain {
            Ok(true) => Ok(MatchOutcome::Pass),
            Ok(false) if guard_has_default(guard) => match self.eval_guard(guard, true) {
                Ok(true) => Ok(MatchOutcome::Default),
                Ok(false) => Ok(MatchOutcome::GuardFail),
                Err(e) => Err(e),
            },
            Ok(false) => Ok(MatchOutcome::GuardFail),
            Err(e) => Err(e),
        };
        self.env.pop_frame();
        outcome
    }

    /// 形参绑定：先具名后位置，缺省值在半成品作用域内求值，
    /// 变参收拢剩余实参，最后合成 `@arguments`。
    fn bind_params(
        &mut self,
        def: &MixinDefinition,
        args: &[(Option<String>, Node)],
    ) -> LessResult<Frame> {
        let mut frame = Frame::default();
        let mut bound_in_order: Vec<Node> = Vec::new();
        let named: Vec<(&String, &Node)> = args
            .iter()
            .filter_map(|(n, v)| n.as_ref().map(|n| (n, v)))
            .collect();
        let positional: Vec<&Node> = args
            .iter()
            .filter(|(n, _)| n.is_none())
            .map(|(_, v)| v)
            .collect();
        let mut cursor = 0usize;

        for param in &def.params {
            if param.variadic {
                let rest: Vec<Node> = positional[cursor.min(positional.len())..]
                    .iter()
                    .map(|n| (*n).clone())
                    .collect();
                cursor = positional.len();
                let value = Node::new(NodeKind::Expression(rest));
                if let Some(name) = &param.name {
                    frame.bind(name.clone(), value.clone());
                }
                bound_in_order.push(value);
                continue;
            }
            if let Some(name) = &param.name {
                if let Some((_, value)) = named.iter().find(|(n, _)| *n == name) {
                    frame.bind(name.clone(), (*value).clone());
                    bound_in_order.push((*value).clone());
                    continue;
                }
            }
            if param.pattern.is_some() {
                if let Some(arg) = positional.get(cursor) {
                    bound_in_order.push((*arg).clone());
                    cursor += 1;
                }
                continue;
            }
            match positional.get(cursor) {
                Some(arg) => {
                    if let Some(name) = &param.name {
                        frame.bind(name.clone(), (*arg).clone());
                    }
                    bound_in_order.push((*arg).clone());
                    cursor += 1;
                }
                None => {
                    let default = param.default.as_ref().ok_or_else(|| {
                        LessError::eval(
                            ErrorKind::WrongArgumentCount,
                            format!("mixin {} 缺少必填参数 @{}", def.name,
                                param.name.as_deref().unwrap_or("<模式>")),
                        )
                    })?;
                    self.env.push_frame(frame.clone());
                    let value = self.eval_node(default);
                    self.env.pop_frame();
                    let value = unwrap_single(value?);
                    if let Some(name) = &param.name {
                        frame.bind(name.clone(), value.clone());
                    }
                    bound_in_order.push(value);
                }
            }
        }

        frame.bind(
            "arguments",
            Node::new(NodeKind::Expression(bound_in_order)),
        );
        Ok(frame)
    }

    fn expand_detached_call(
        &mut self,
        name: &str,
        parents: &[Selector],
        out: &mut Vec<Node>,
    ) -> LessResult<()> {
        // 游离规则集可以互相调用，与 mixin 共用同一展开深度护栏。
        if self.env.mixin_depth >= MAX_MIXIN_DEPTH {
            return Err(LessError::eval(
                ErrorKind::NoMatchingMixin,
                format!("规则集 @{name} 的展开深度超出上限"),
            ));
        }
        let value = self.env.find_variable(name).ok_or_else(|| {
            LessError::eval(
                ErrorKind::UndefinedVariable,
                format!("未定义的变量 @{name}"),
            )
        })?;
        let NodeKind::DetachedRuleset(rules) = &value.kind else {
            return Err(LessError::eval(
                ErrorKind::NoMatchingMixin,
                format!("变量 @{name} 不是可调用的规则集"),
            ));
        };
        let rules = rules.clone();
        self.env.mixin_depth += 1;
        self.env.push_frame(Frame::from_rules(&rules));
        let result = (|| -> LessResult<()> {
            for rule in &rules {
                self.eval_statement(rule, parents, out)?;
            }
            Ok(())
        })();
        self.env.pop_frame();
        self.env.mixin_depth -= 1;
        result
    }

    // ---- @media 与其他指令 -------------------------------------------------

    fn eval_media(
        &mut self,
        media: &Media,
        parents: &[Selector],
        header: &NodeHeader,
    ) -> LessResult<Node> {
        let mut features = Vec::with_capacity(media.features.len());
        for feature in &media.features {
            features.push(self.eval_feature(feature)?);
        }

        self.env.push_frame(Frame::from_rules(&media.rules));
        let mut inner = Vec::new();
        let result = (|| -> LessResult<()> {
            for rule in &media.rules {
                self.eval_statement(rule, parents, &mut inner)?;
            }
            Ok(())
        })();
        self.env.pop_frame();
        result?;
        merge_declarations(&mut inner);

        // 规则集内部的媒体块：裸声明归还给外层选择器。
        let rules = if parents.is_empty() {
            inner
        } else {
            let (declarations, nested): (Vec<Node>, Vec<Node>) =
                inner.into_iter().partition(Node::is_declaration);
            let mut wrapped = Vec::new();
            if !declarations.is_empty() {
                wrapped.push(Node::new(NodeKind::Ruleset(Box::new(Ruleset {
                    selectors: parents.to_vec(),
                    rules: declarations,
                    guard: None,
                }))));
            }
            wrapped.extend(nested);
            wrapped
        };

        Ok(Node {
            header: header.clone(),
            kind: NodeKind::Media(Box::new(Media { features, rules })),
        })
    }

    /// 媒体特征求值保留括号结构，`(属性: 值)` 对只归约值部分。
    fn eval_feature(&mut self, node: &Node) -> LessResult<Node> {
        match &node.kind {
            NodeKind::Paren(inner) => Ok(Node::new(NodeKind::Paren(Box::new(
                self.eval_feature(inner)?,
            )))),
            NodeKind::Rule(rule) => {
                let value = self.eval_node(&rule.value)?;
                Ok(Node::new(NodeKind::Rule(Box::new(Rule {
                    name: rule.name.clone(),
                    value,
                    variable: false,
                    variadic: false,
                    merge: None,
                    interpolated: false,
                }))))
            }
            NodeKind::Expression(terms) => {
                let mut evaluated = Vec::with_capacity(terms.len());
                for term in terms {
                    evaluated.push(self.eval_feature(term)?);
                }
                Ok(Node::new(NodeKind::Expression(evaluated)))
            }
            _ => self.eval_node(node),
        }
    }

    fn eval_directive(&mut self, directive: &Directive, header: &NodeHeader) -> LessResult<Node> {
        let value = match &directive.value {
            Some(v) => Some(self.eval_node(v)?),
            None => None,
        };
        let rules = match &directive.rules {
            Some(rules) => {
                self.env.push_frame(Frame::from_rules(rules));
                let mut out = Vec::new();
                let result = (|| -> LessResult<()> {
                    for rule in rules {
                        match &rule.kind {
                            NodeKind::KeyFrame(frame) => {
                                out.push(self.eval_keyframe(frame, &rule.header)?);
                            }
                            _ => self.eval_statement(rule, &[], &mut out)?,
                        }
                    }
                    Ok(())
                })();
                self.env.pop_frame();
                result?;
                merge_declarations(&mut out);
                Some(out)
            }
            None => None,
        };
        Ok(Node {
            header: header.clone(),
            kind: NodeKind::Directive(Box::new(Directive {
                name: directive.name.clone(),
                identifier: directive.identifier.clone(),
                rules,
                value,
            })),
        })
    }

    fn eval_keyframe(&mut self, frame: &KeyFrame, header: &NodeHeader) -> LessResult<Node> {
        self.env.push_frame(Frame::from_rules(&frame.rules));
        let mut out = Vec::new();
        let result = (|| -> LessResult<()> {
            for rule in &frame.rules {
                self.eval_statement(rule, &[], &mut out)?;
            }
            Ok(())
        })();
        self.env.pop_frame();
        result?;
        merge_declarations(&mut out);
        Ok(Node {
            header: header.clone(),
            kind: NodeKind::KeyFrame(Box::new(KeyFrame {
                selectors: frame.selectors.clone(),
                rules: out,
            })),
        })
    }

    // ---- @import ----------------------------------------------------------

    fn expand_import(
        &mut self,
        import: &Import,
        parents: &[Selector],
        header: &NodeHeader,
        out: &mut Vec<Node>,
    ) -> LessResult<()> {
        let path_node = self.eval_node(&import.path)?;
        let path_text = match &path_node.kind {
            NodeKind::Quoted(q) => q.content.clone(),
            NodeKind::Url(inner) => inner.text_value(),
            other => Node::new(other.clone()).to_css(false),
        };
        let mut features = Vec::with_capacity(import.features.len());
        for feature in &import.features {
            features.push(self.eval_feature(feature)?);
        }

        let remote = path_text.starts_with("http://")
            || path_text.starts_with("https://")
            || path_text.starts_with("//");
        let treat_as_css = import.options.css
            || (!import.options.less && (path_text.ends_with(".css") || remote));
        let passthrough = |header: &NodeHeader| {
            Node {
                header: header.clone(),
                kind: NodeKind::Import(Box::new(Import {
                    path: path_node.clone(),
                    features: features.clone(),
                    options: import.options.clone(),
                })),
            }
        };

        if treat_as_css && !import.options.inline {
            out.push(passthrough(header));
            return Ok(());
        }
        let Some(importer) = self.env.importer else {
            out.push(passthrough(header));
            return Ok(());
        };

        let imported = match importer.import(&path_text, self.env.current_file.as_deref()) {
            Ok(imported) => imported,
            Err(_) if import.options.optional => return Ok(()),
            Err(e) => return Err(locate(e, header.index)),
        };

        if import.options.once
            && (imported.already_imported || self.env.imported.contains(&imported.canonical_path))
        {
            return Ok(());
        }
        self.env.imported.insert(imported.canonical_path.clone());

        if import.options.inline {
            out.push(Node::text(imported.source));
            return Ok(());
        }

        // 未被 once 去重挡下的循环导入（如互相 (multiple) 导入）无条件截断。
        if self.env.importing.contains(&imported.canonical_path) {
            return Err(locate(
                LessError::eval(
                    ErrorKind::ImportFailed,
                    format!("检测到循环导入: {}", imported.canonical_path),
                ),
                header.index,
            ));
        }

        let parser = Parser::new(
            self.env.strict_math,
            self.env.keep_comments,
            self.env.optimization,
        );
        let mut nodes = parser.parse(&imported.source, Some(&imported.canonical_path))?;
        if import.options.reference {
            visitor::set_reference(&mut nodes, true);
        }

        // 导入的变量与 mixin 并入当前作用域，规则在文本位置内联展开。
        if let Some(frame) = self.env.frames.last_mut() {
            frame.absorb(&nodes);
        }
        self.env.importing.push(imported.canonical_path.clone());
        let previous_file = self.env.current_file.replace(imported.canonical_path);
        let result = (|| -> LessResult<()> {
            for node in &nodes {
                self.eval_statement(node, parents, out)?;
            }
            Ok(())
        })();
        self.env.current_file = previous_file;
        self.env.importing.pop();
        result
    }
}

// ---- 自由函数 -------------------------------------------------------------

fn locate(mut error: LessError, index: Option<usize>) -> LessError {
    if error.index == 0 {
        if let Some(index) = index {
            error.index = index;
        }
    }
    error
}

/// 包装层剥离：单表达式的值、单项的表达式都还原为内部节点。
pub fn unwrap_single(node: Node) -> Node {
    match node.kind {
        NodeKind::Value(value)
            if value.expressions.len() == 1 && value.important.is_empty() =>
        {
            unwrap_single(value.expressions.into_iter().next().unwrap())
        }
        NodeKind::Expression(mut terms) if terms.len() == 1 => unwrap_single(terms.remove(0)),
        kind => Node {
            header: NodeHeader::default(),
            kind,
        },
    }
}

fn is_true_node(node: &Node) -> bool {
    matches!(&node.kind, NodeKind::Keyword(k) if k == "true")
}

fn is_comparable(node: &Node) -> bool {
    matches!(
        &node.kind,
        NodeKind::Number(_) | NodeKind::Quoted(_) | NodeKind::Keyword(_) | NodeKind::Color(_)
    )
}

/// 守卫比较：数值带单位换算，文本按内容，颜色仅支持相等。
fn compare(op: &str, left: &Node, right: &Node) -> LessResult<bool> {
    use std::cmp::Ordering;
    let ordering: Option<Ordering> = match (&left.kind, &right.kind) {
        (NodeKind::Number(l), NodeKind::Number(r)) => {
            let r_value = if l.unit.is_empty() || r.unit.is_empty() || l.unit == r.unit {
                r.value
            } else {
                match unit::convert(r.value, &r.unit, &l.unit) {
                    Some(v) => v,
                    None => {
                        return Err(LessError::eval(
                            ErrorKind::IncomparableOperands,
                            format!("单位 {} 与 {} 的数值无法比较", l.unit, r.unit),
                        ));
                    }
                }
            };
            l.value.partial_cmp(&r_value)
        }
        (NodeKind::Color(l), NodeKind::Color(r)) => {
            if op == "=" {
                return Ok(l == r);
            }
            return Err(LessError::eval(
                ErrorKind::IncomparableOperands,
                "颜色之间只支持相等比较",
            ));
        }
        _ if is_comparable(left) && is_comparable(right) => {
            left.text_value().partial_cmp(&right.text_value())
        }
        _ => {
            if op == "=" {
                return Ok(left.to_css(false) == right.to_css(false));
            }
            return Err(LessError::eval(
                ErrorKind::IncomparableOperands,
                format!(
                    "{} 与 {} 之间没有可用的大小关系",
                    left.to_css(false),
                    right.to_css(false)
                ),
            ));
        }
    };
    let Some(ordering) = ordering else {
        return Ok(false);
    };
    Ok(match op {
        "=" => ordering == Ordering::Equal,
        "<" => ordering == Ordering::Less,
        ">" => ordering == Ordering::Greater,
        "<=" => ordering != Ordering::Greater,
        ">=" => ordering != Ordering::Less,
        _ => false,
    })
}

/// 守卫是否含 `default()` 调用（语法扫描，不求值）。
fn guard_has_default(node: &Node) -> bool {
    match &node.kind {
        NodeKind::Condition(c) => guard_has_default(&c.left) || guard_has_default(&c.right),
        NodeKind::Paren(inner) => guard_has_default(inner),
        NodeKind::Expression(terms) => terms.iter().any(guard_has_default),
        NodeKind::Call(call) => call.name.eq_ignore_ascii_case("default"),
        _ => false,
    }
}

/// `a+:` / `a+_:` 属性合并：同名规则按分隔符聚成一条。
fn merge_declarations(nodes: &mut Vec<Node>) {
    use indexmap::IndexMap;
    let mut first_position: IndexMap<String, usize> = IndexMap::new();
    let mut merged = Vec::with_capacity(nodes.len());
    for node in nodes.drain(..) {
        let mergeable = match &node.kind {
            NodeKind::Rule(rule) if rule.merge.is_some() => Some(rule.name.clone()),
            _ => None,
        };
        let Some(name) = mergeable else {
            merged.push(node);
            continue;
        };
        match first_position.get(&name) {
            None => {
                first_position.insert(name, merged.len());
                merged.push(node);
            }
            Some(&position) => {
                let NodeKind::Rule(incoming) = node.kind else { unreachable!() };
                if let NodeKind::Rule(existing) = &mut merged[position].kind {
                    merge_rule_values(existing, *incoming);
                }
            }
        }
    }
    *nodes = merged;
}

fn merge_rule_values(existing: &mut Rule, incoming: Rule) {
    let separator = incoming.merge.unwrap_or(", ");
    let incoming_value = match incoming.value.kind {
        NodeKind::Value(v) => v,
        other => Value {
            expressions: vec![Node::new(other)],
            important: String::new(),
        },
    };
    if let NodeKind::Value(existing_value) = &mut existing.value.kind {
        if separator == " " {
            // 空格合并：全部项拍平进一个表达式
            let mut terms = Vec::new();
            for expression in existing_value.expressions.drain(..) {
                terms.push(expression);
            }
            for expression in incoming_value.expressions {
                terms.push(expression);
            }
            existing_value.expressions = vec![Node::new(NodeKind::Expression(terms))];
        } else {
            existing_value.expressions.extend(incoming_value.expressions);
        }
        if existing_value.important.is_empty() {
            existing_value.important = incoming_value.important;
        }
    }
}

/// `!important` 传播：调用级标记落到每条产出的声明上。
fn apply_important(nodes: &mut [Node]) {
    for node in nodes {
        match &mut node.kind {
            NodeKind::Rule(rule) => {
                if let NodeKind::Value(value) = &mut rule.value.kind {
                    value.important = "!important".to_string();
                }
            }
            NodeKind::Ruleset(ruleset) => apply_important(&mut ruleset.rules),
            NodeKind::Media(media) => apply_important(&mut media.rules),
            NodeKind::Directive(directive) => {
                if let Some(rules) = &mut directive.rules {
                    apply_important(rules);
                }
            }
            _ => {}
        }
    }
}

/// 父子选择器拼接，支持 `&` 占位。
fn join_with_parents(parents: &[Selector], children: &[Selector]) -> Vec<Selector> {
    if parents.is_empty() {
        return children.to_vec();
    }
    let mut joined = Vec::with_capacity(parents.len() * children.len());
    for parent in parents {
        for child in children {
            joined.push(join_selector(parent, child));
        }
    }
    joined
}

/// 单个子选择器在指定父选择器下展开后的全部形态。
fn joined_for_child(parents: &[Selector], children: &[Selector], index: usize) -> Vec<Selector> {
    let Some(child) = children.get(index) else {
        return Vec::new();
    };
    if parents.is_empty() {
        return vec![child.clone()];
    }
    parents
        .iter()
        .map(|parent| join_selector(parent, child))
        .collect()
}

fn join_selector(parent: &Selector, child: &Selector) -> Selector {
    let has_amp = child
        .elements
        .iter()
        .any(|e| e.value_text().map_or(false, |t| t.contains('&')));
    if !has_amp {
        let mut elements = parent.elements.clone();
        for (i, element) in child.elements.iter().enumerate() {
            let mut element = element.clone();
            if i == 0 && element.combinator.is_empty() {
                element.combinator = " ";
            }
            elements.push(element);
        }
        return Selector { elements };
    }
    let parent_css = parent.css(false);
    let mut elements = Vec::with_capacity(child.elements.len());
    for element in &child.elements {
        match element.value_text() {
            Some(text) if text == "&" => {
                // 单独的 & 保留父选择器的元素结构
                for (i, parent_element) in parent.elements.iter().enumerate() {
                    let mut parent_element = parent_element.clone();
                    if i == 0 {
                        parent_element.combinator = element.combinator;
                    }
                    elements.push(parent_element);
                }
            }
            Some(text) if text.contains('&') => {
                elements.push(Element {
                    combinator: element.combinator,
                    value: ElementValue::Text(text.replace('&', &parent_css)),
                });
            }
            _ => elements.push(element.clone()),
        }
    }
    Selector { elements }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selector(parts: &[(&'static str, &str)]) -> Selector {
        Selector {
            elements: parts
                .iter()
                .map(|&(c, t)| Element::text(c, t.to_string()))
                .collect(),
        }
    }

    #[test]
    fn join_appends_with_descendant_combinator() {
        let parent = selector(&[("", ".container")]);
        let child = selector(&[("", ".title")]);
        assert_eq!(join_selector(&parent, &child).css(false), ".container .title");
    }

    #[test]
    fn join_replaces_ampersand_inline() {
        let parent = selector(&[("", ".btn")]);
        let child = selector(&[("", "&:hover")]);
        assert_eq!(join_selector(&parent, &child).css(false), ".btn:hover");
        let suffix = selector(&[("", "&-primary")]);
        assert_eq!(join_selector(&parent, &suffix).css(false), ".btn-primary");
    }

    #[test]
    fn bare_ampersand_keeps_parent_structure() {
        let parent = selector(&[("", ".a"), (">", ".b")]);
        let child = selector(&[("", "&"), (" ", ".c")]);
        assert_eq!(join_selector(&parent, &child).css(false), ".a > .b .c");
    }

    #[test]
    fn compare_converts_units() {
        let left = Node::number(1.0, "s");
        let right = Node::number(500.0, "ms");
        assert!(compare(">", &left, &right).unwrap());
        assert!(!compare("=", &left, &right).unwrap());
    }

    #[test]
    fn compare_rejects_ordering_between_colors() {
        let a = Node::color(crate::color::parse_color("#111").unwrap());
        let b = Node::color(crate::color::parse_color("#222").unwrap());
        assert!(!compare("=", &a, &b).unwrap());
        assert_eq!(
            compare("<", &a, &b).unwrap_err().kind,
            ErrorKind::IncomparableOperands
        );
    }

    #[test]
    fn guard_default_detection_sees_nested_calls() {
        let guard = Node::new(NodeKind::Condition(Box::new(Condition {
            op: "=".into(),
            left: Node::new(NodeKind::Call(Call {
                name: "default".into(),
                args: vec![],
            })),
            right: Node::keyword("true"),
            negate: false,
        })));
        assert!(guard_has_default(&guard));
        let plain = Node::new(NodeKind::Condition(Box::new(Condition {
            op: ">".into(),
            left: Node::number(1.0, ""),
            right: Node::number(0.0, ""),
            negate: false,
        })));
        assert!(!guard_has_default(&plain));
    }

    #[test]
    fn unwrap_single_strips_value_and_expression_layers() {
        let wrapped = Node::new(NodeKind::Value(Value {
            expressions: vec![Node::new(NodeKind::Expression(vec![Node::number(
                3.0, "px",
            )]))],
            important: String::new(),
        }));
        let inner = unwrap_single(wrapped);
        assert!(matches!(&inner.kind, NodeKind::Number(n) if n.value == 3.0));
    }
}
