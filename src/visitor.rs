//! 求值后的树遍历：通用的变换闭包遍历，以及基于它的两趟处理
//! （reference 标记传播、extend 选择器改写）。

use crate::ast::{Element, ElementValue, Node, NodeKind, Selector};
use crate::env::ExtendRecord;

/// 后序遍历语句树，对每个节点调用一次变换闭包。
pub fn visit_mut<F: FnMut(&mut Node)>(node: &mut Node, f: &mut F) {
    match &mut node.kind {
        NodeKind::Ruleset(ruleset) => {
            for rule in &mut ruleset.rules {
                visit_mut(rule, f);
            }
        }
        NodeKind::Media(media) => {
            for rule in &mut media.rules {
                visit_mut(rule, f);
            }
        }
        NodeKind::Directive(directive) => {
            if let Some(rules) = &mut directive.rules {
                for rule in rules {
                    visit_mut(rule, f);
                }
            }
        }
        NodeKind::KeyFrame(frame) => {
            for rule in &mut frame.rules {
                visit_mut(rule, f);
            }
        }
        NodeKind::DetachedRuleset(rules) => {
            for rule in rules {
                visit_mut(rule, f);
            }
        }
        _ => {}
    }
    f(node);
}

/// 整树设置（或清除）reference 位。
pub fn set_reference(nodes: &mut [Node], value: bool) {
    for node in nodes {
        visit_mut(node, &mut |n| n.header.is_reference = value);
    }
}

/// extend 解析：精确记录把扩展选择器并入目标规则集的选择器列表，
/// 前缀（all）记录对命中的选择器做文本替换。命中的 reference 节点重新可见。
pub fn resolve_extends(nodes: &mut [Node], records: &[ExtendRecord]) {
    if records.is_empty() {
        return;
    }
    for node in nodes {
        visit_mut(node, &mut |n| {
            let NodeKind::Ruleset(ruleset) = &mut n.kind else {
                return;
            };
            if ruleset.selectors.is_empty() {
                return;
            }
            let mut additions: Vec<Selector> = Vec::new();
            for record in records {
                let target_css = record.target.css(false);
                let extender_css = record.extender.css(false);
                for selector in &ruleset.selectors {
                    let selector_css = selector.css(false);
                    if record.partial {
                        if selector_css.contains(&target_css) {
                            additions.push(Selector {
                                elements: vec![Element {
                                    combinator: "",
                                    value: ElementValue::Text(
                                        selector_css.replace(&target_css, &extender_css),
                                    ),
                                }],
                            });
                        }
                    } else if selector_css == target_css {
                        additions.push(record.extender.clone());
                    }
                }
            }
            if additions.is_empty() {
                return;
            }
            let mut existing: Vec<String> =
                ruleset.selectors.iter().map(|s| s.css(false)).collect();
            for addition in additions {
                let css = addition.css(false);
                if !existing.contains(&css) {
                    existing.push(css);
                    ruleset.selectors.push(addition);
                }
            }
            // 被扩展命中的 reference 导入内容（连同块体）需要重新可见。
            set_reference(&mut ruleset.rules, false);
            n.header.is_reference = false;
        });
    }
}
