use less_rs::{
    compile, compile_file, compile_with_importer, CompileOptions, ErrorKind, ImportedSource,
    Importer, LessError, LessResult,
};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::path::Path;

fn compress() -> CompileOptions {
    CompileOptions {
        compress: true,
        ..CompileOptions::default()
    }
}

fn condensed(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

// ---- 端到端场景 -----------------------------------------------------------

#[test]
fn scenario_variable_arithmetic() {
    let css = compile("@w: 10px; .c{ width: @w + 4px; }", compress()).unwrap();
    assert_eq!(css, ".c{width:14px}");
}

#[test]
fn scenario_mixin_with_default() {
    let src = ".r(@r:2px){ border-radius:@r; } .a{ .r; } .b{ .r(6px); }";
    let css = compile(src, compress()).unwrap();
    assert_eq!(css, ".a{border-radius:2px}.b{border-radius:6px}");
}

#[test]
fn scenario_guarded_ruleset_as_mixin() {
    let src = ".c when (@x = true){ a:1; } @x: true; .out{ .c; }";
    let css = compile(src, compress()).unwrap();
    assert_eq!(css, ".out{a:1}");
}

#[test]
fn scenario_extend_rewrites_selectors() {
    let src = ".a{ color: red; } .b:extend(.a){ x:1; }";
    let css = compile(src, compress()).unwrap();
    assert_eq!(css, ".a,.b{color:red}.b{x:1}");
}

#[test]
fn scenario_property_merge() {
    let css = compile(".x{ a+: 1; a+: 2; }", compress()).unwrap();
    assert_eq!(css, ".x{a:1,2}");
}

#[test]
fn scenario_space_merge() {
    let css = compile(".x{ a+_: 1; a+_: 2; }", compress()).unwrap();
    assert_eq!(css, ".x{a:1 2}");
}

#[test]
fn scenario_compression() {
    let css = compile(".a{ color: #ffffff; margin: 0 0 0 0; }", compress()).unwrap();
    assert_eq!(css, ".a{color:#fff;margin:0 0 0 0}");
}

// ---- 可检验性质 -----------------------------------------------------------

#[test]
fn css_passthrough_differs_only_in_whitespace() {
    let src = "div { color: red; margin: 0 auto; }\np > span { font-weight: bold; }";
    let css = compile(src, CompileOptions::default()).unwrap();
    assert_eq!(condensed(&css), condensed(src));
}

#[test]
fn recompiling_output_is_a_fixed_point() {
    let src = ".a { color: red; }\n.b { margin: 0; }";
    let first = compile(src, CompileOptions::default()).unwrap();
    let second = compile(&first, CompileOptions::default()).unwrap();
    assert_eq!(first, second);
}

#[test]
fn block_comments_appear_once_line_comments_never() {
    let src = "/* keep */\n.a { color: red; // gone\n}\n/* tail */";
    let css = compile(src, CompileOptions::default()).unwrap();
    assert_eq!(css.matches("/* keep */").count(), 1);
    assert_eq!(css.matches("/* tail */").count(), 1);
    assert!(!css.contains("gone"));
}

#[test]
fn compression_keeps_only_special_comments() {
    let src = "/*! legal */ /* plain */ .a{ x: 1; }";
    let css = compile(src, compress()).unwrap();
    assert!(css.contains("/*! legal */"));
    assert!(!css.contains("plain"));
}

#[test]
fn variable_scoping_does_not_leak() {
    let src = "@a: 1; .x{ @a: 2; b: @a; } .y{ c: @a; }";
    let css = compile(src, compress()).unwrap();
    assert_eq!(css, ".x{b:2}.y{c:1}");
}

#[test]
fn mixin_arity_is_enforced() {
    let src = ".m(@a, @b){ x: @a; } .z{ .m(1); }";
    let err = compile(src, compress()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::WrongArgumentCount);

    let src = ".m(@a){ x: @a; } .z{ .m(1, 2, 3); }";
    let err = compile(src, compress()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::WrongArgumentCount);
}

#[test]
fn variadic_mixins_absorb_extra_arguments() {
    let src = ".m(@a, @rest...){ x: @a; all: @arguments; } .z{ .m(1, 2, 3); }";
    let css = compile(src, compress()).unwrap();
    assert!(css.contains("x:1"));
    assert!(css.contains("all:1 2 3"));
}

#[test]
fn guard_default_yields_to_specific_match() {
    let src = r"
.m(@x) when (default()) { d: 1; }
.m(@x) when (@x > 0) { p: 1; }
.a { .m(1); }
.b { .m(-1); }
";
    let css = compile(src, compress()).unwrap();
    assert_eq!(css, ".a{p:1}.b{d:1}");
}

#[test]
fn color_arithmetic_commutes_for_addition() {
    let css = compile(".a{ c1: #808080 + 10; c2: 10 + #808080; }", compress()).unwrap();
    assert_eq!(css, ".a{c1:#8a8a8a;c2:#8a8a8a}");
}

#[test]
fn number_minus_color_is_rejected() {
    let err = compile(".a{ c: 10 - #808080; }", compress()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::ColorArithmetic);
}

#[test]
fn strict_math_requires_parentheses() {
    let relaxed = compile(".a{ w: 5px + 3; }", CompileOptions::default()).unwrap();
    assert!(relaxed.contains("w: 8px"));

    let strict = CompileOptions {
        strict_math: true,
        ..CompileOptions::default()
    };
    let literal = compile(".a{ w: 5px + 3; h: (5px + 3); }", strict).unwrap();
    assert!(literal.contains("w: 5px + 3"));
    assert!(literal.contains("h: 8px"));
}

// ---- 导入 -----------------------------------------------------------------

struct MapImporter {
    files: HashMap<String, String>,
    imported: RefCell<HashSet<String>>,
}

impl MapImporter {
    fn new(files: &[(&str, &str)]) -> Self {
        Self {
            files: files
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            imported: RefCell::new(HashSet::new()),
        }
    }
}

impl Importer for MapImporter {
    fn import(&self, path: &str, _current_file: Option<&str>) -> LessResult<ImportedSource> {
        let source = self.files.get(path).cloned().ok_or_else(|| {
            LessError::eval(ErrorKind::ImportFailed, format!("无法解析 {path}"))
        })?;
        let already_imported = !self.imported.borrow_mut().insert(path.to_string());
        Ok(ImportedSource {
            source,
            canonical_path: path.to_string(),
            already_imported,
        })
    }
}

#[test]
fn import_once_deduplicates() {
    let importer = MapImporter::new(&[("a.less", ".from-a { v: 2; }")]);
    let src = "@import \"a.less\";\n@import \"a.less\";\n.z{ u: 1; }";
    let css = compile_with_importer(src, None, &compress(), Some(&importer)).unwrap();
    assert_eq!(css.matches(".from-a").count(), 1);
}

#[test]
fn import_multiple_repeats_content() {
    let importer = MapImporter::new(&[("a.less", ".from-a { v: 2; }")]);
    let src = "@import (multiple) \"a.less\";\n@import (multiple) \"a.less\";";
    let css = compile_with_importer(src, None, &compress(), Some(&importer)).unwrap();
    assert_eq!(css.matches(".from-a").count(), 2);
}

#[test]
fn mutual_multiple_imports_are_detected_as_a_cycle() {
    let importer = MapImporter::new(&[
        ("a.less", "@import (multiple) \"b.less\";\n.from-a { x: 1; }"),
        ("b.less", "@import (multiple) \"a.less\";\n.from-b { y: 2; }"),
    ]);
    let err = compile_with_importer(
        "@import (multiple) \"a.less\";",
        None,
        &compress(),
        Some(&importer),
    )
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::ImportFailed);
}

#[test]
fn mutual_once_imports_dedupe_instead_of_cycling() {
    let importer = MapImporter::new(&[
        ("a.less", "@import \"b.less\";\n.from-a { x: 1; }"),
        ("b.less", "@import \"a.less\";\n.from-b { y: 2; }"),
    ]);
    let css = compile_with_importer(
        "@import \"a.less\";",
        None,
        &compress(),
        Some(&importer),
    )
    .unwrap();
    assert_eq!(css.matches(".from-a").count(), 1);
    assert_eq!(css.matches(".from-b").count(), 1);
}

#[test]
fn imported_variables_are_visible() {
    let importer = MapImporter::new(&[("vars.less", "@brand: #336699;")]);
    let src = "@import \"vars.less\";\nbody{ color: @brand; }";
    let css = compile_with_importer(src, None, &compress(), Some(&importer)).unwrap();
    assert_eq!(css, "body{color:#369}");
}

#[test]
fn reference_import_emits_nothing_until_used() {
    let importer = MapImporter::new(&[("lib.less", ".shared { color: red; }")]);
    let hidden = compile_with_importer(
        "@import (reference) \"lib.less\";\n.own{ x: 1; }",
        None,
        &compress(),
        Some(&importer),
    )
    .unwrap();
    assert_eq!(hidden, ".own{x:1}");

    let importer = MapImporter::new(&[("lib.less", ".shared { color: red; }")]);
    let extended = compile_with_importer(
        "@import (reference) \"lib.less\";\n.b:extend(.shared){ x: 1; }",
        None,
        &compress(),
        Some(&importer),
    )
    .unwrap();
    assert!(extended.contains("color:red"));
    assert!(extended.contains(".b"));
}

#[test]
fn reference_import_rules_pulled_in_by_mixin_call() {
    let importer = MapImporter::new(&[("lib.less", ".badge() { border: 1px; }")]);
    let css = compile_with_importer(
        "@import (reference) \"lib.less\";\n.a{ .badge(); }",
        None,
        &compress(),
        Some(&importer),
    )
    .unwrap();
    assert_eq!(css, ".a{border:1px}");
}

#[test]
fn inline_import_embeds_raw_text() {
    let importer = MapImporter::new(&[("raw.css", ".raw { not: parsed }")]);
    let css = compile_with_importer(
        "@import (inline) \"raw.css\";",
        None,
        &CompileOptions::default(),
        Some(&importer),
    )
    .unwrap();
    assert!(css.contains(".raw { not: parsed }"));
}

#[test]
fn optional_import_tolerates_missing_files() {
    let importer = MapImporter::new(&[]);
    let css = compile_with_importer(
        "@import (optional) \"missing.less\";\n.a{ x: 1; }",
        None,
        &compress(),
        Some(&importer),
    )
    .unwrap();
    assert_eq!(css, ".a{x:1}");
}

#[test]
fn css_imports_pass_through_in_place() {
    let src = "@import (css) \"https://cdn.example.com/reset.css\";\nbody { color: #333; }";
    let css = compile(src, compress()).unwrap();
    assert!(css.starts_with("@import \"https://cdn.example.com/reset.css\";"));
    assert!(css.contains("body{color:#333}"));
}

// ---- 变量与插值 -----------------------------------------------------------

#[test]
fn indirect_variable_lookup() {
    let src = "@name: \"w\"; @w: 10px; .x{ v: @@name; }";
    let css = compile(src, compress()).unwrap();
    assert_eq!(css, ".x{v:10px}");
}

#[test]
fn recursive_variables_are_detected() {
    let err = compile("@a: @a; .x{ b: @a; }", compress()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::RecursiveVariable);
}

#[test]
fn undefined_variables_are_reported() {
    let err = compile(".x{ b: @missing; }", compress()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::UndefinedVariable);
}

#[test]
fn interpolated_property_and_selector_names() {
    let src = "@side: margin; @name: banner; .@{name}{ @{side}-top: 1px; }";
    let css = compile(src, compress()).unwrap();
    assert_eq!(css, ".banner{margin-top:1px}");
}

#[test]
fn quoted_interpolation_and_escape() {
    let src = "@v: 5; .x{ content: \"v@{v}\"; w: ~\"calc(100% - 10px)\"; }";
    let css = compile(src, compress()).unwrap();
    assert!(css.contains("content:\"v5\""));
    assert!(css.contains("w:calc(100% - 10px)"));
}

#[test]
fn script_nodes_reduce_to_placeholder() {
    let css = compile(".x{ v: `window.size`; }", compress()).unwrap();
    assert_eq!(css, ".x{v:[script unsupported]}");
}

// ---- mixin 细节 -----------------------------------------------------------

#[test]
fn named_arguments_bind_by_name() {
    let src = ".m(@a: 1, @b: 2){ v: @a @b; } .x{ .m(@b: 5); }";
    let css = compile(src, compress()).unwrap();
    assert_eq!(css, ".x{v:1 5}");
}

#[test]
fn named_arguments_must_follow_positional() {
    let src = ".m(@a: 1, @b: 2){ v: @a; } .x{ .m(@b: 5, 7); }";
    let err = compile(src, compress()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::NamedAfterPositional);
}

#[test]
fn pattern_parameters_match_literally() {
    let src = ".m(dark){ c: black; } .m(light){ c: white; } .x{ .m(dark); }";
    let css = compile(src, compress()).unwrap();
    assert_eq!(css, ".x{c:black}");
}

#[test]
fn no_matching_mixin_is_reported() {
    let err = compile(".x{ .missing(); }", compress()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::NoMatchingMixin);
}

#[test]
fn namespaced_mixin_calls_descend() {
    let src = "#ns { .m() { x: 1; } } .a { #ns > .m; }";
    let css = compile(src, compress()).unwrap();
    assert!(css.contains(".a{x:1}"));
}

#[test]
fn multiple_matches_all_expand() {
    let src = ".m(){ a: 1; } .m(){ b: 2; } .x{ .m(); }";
    let css = compile(src, compress()).unwrap();
    assert_eq!(css, ".x{a:1;b:2}");
}

#[test]
fn important_propagates_through_calls() {
    let src = ".m(){ color: red; } .a{ .m() !important; }";
    let css = compile(src, compress()).unwrap();
    assert_eq!(css, ".a{color:red!important}");
}

#[test]
fn detached_rulesets_expand_at_call_site() {
    let src = "@set: { color: red; }; .a { @set(); }";
    let css = compile(src, compress()).unwrap();
    assert_eq!(css, ".a{color:red}");
}

#[test]
fn self_referential_detached_ruleset_is_cut_off() {
    let src = "@loop: { @loop(); }; .x { @loop(); }";
    let err = compile(src, compress()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::NoMatchingMixin);
}

#[test]
fn shadow_default_arguments_compose() {
    let src = r".shadow(@x: 0, @y: 2px, @blur: 4px) {
  box-shadow: @x @y @blur rgba(0, 0, 0, 0.4);
}
.dialog { .shadow(); }
.dialog-elevated { .shadow(0, 8px, 16px); }";
    let css = compile(src, compress()).unwrap();
    assert!(css.contains(".dialog{box-shadow:0 2px 4px rgba(0,0,0,0.4)}"));
    assert!(css.contains(".dialog-elevated{box-shadow:0 8px 16px rgba(0,0,0,0.4)}"));
}

// ---- 数值与单位 -----------------------------------------------------------

#[test]
fn unit_conversion_keeps_left_unit() {
    let css = compile(".x{ a: 10px + 1in; b: 1s + 500ms; }", compress()).unwrap();
    assert_eq!(css, ".x{a:106px;b:1.5s}");
}

#[test]
fn incompatible_units_are_rejected() {
    let err = compile(".x{ a: 1px + 1em; }", compress()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::IncompatibleUnits);
}

#[test]
fn unitless_operand_inherits_unit() {
    let css = compile(".x{ a: 5px + 3; b: 2 * 3px; }", compress()).unwrap();
    assert_eq!(css, ".x{a:8px;b:6px}");
}

#[test]
fn division_by_zero_is_rejected() {
    let err = compile(".x{ a: (1 / 0); }", compress()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::DivideByZero);
}

// ---- 块级结构 --------------------------------------------------------------

#[test]
fn nested_media_queries_keep_selector_context() {
    let src = r".panel {
  color: #333;
  @media (min-width: 800px) {
    color: #000;
    .panel__title {
      font-size: 20px;
    }
  }
}

@media (max-width: 600px) {
  .panel {
    width: 100%;
  }
}";
    let css = compile(src, CompileOptions::default()).unwrap();
    assert!(css.contains(".panel {\n  color: #333;"));
    assert!(css.contains("@media (min-width: 800px)"));
    assert!(css.contains(".panel__title"));
    assert!(css.contains("@media (max-width: 600px)"));
    assert!(css.contains(".panel {\n    width: 100%;"));
}

#[test]
fn font_face_and_keyframes_blocks() {
    let src = r"@font-face {
  font-family: 'Open Sans';
  src: url('/fonts/open-sans.woff2') format('woff2');
}

@keyframes fade-in {
  from {
    opacity: 0;
  }
  to {
    opacity: 1;
  }
}";
    let css = compile(src, compress()).unwrap();
    assert!(css.contains(
        "@font-face{font-family:'Open Sans';src:url('/fonts/open-sans.woff2') format('woff2')}"
    ));
    assert!(css.contains("@keyframes fade-in{from{opacity:0}to{opacity:1}}"));
}

#[test]
fn partial_extend_rewrites_all_occurrences() {
    let src = ".a:hover{ color: red; } .b{ &:extend(.a all); }";
    let css = compile(src, compress()).unwrap();
    assert!(css.contains(".a:hover,.b:hover{color:red}"));
}

#[test]
fn charset_directive_passes_through() {
    let css = compile("@charset \"utf-8\";\n.a{ x: 1; }", compress()).unwrap();
    assert!(css.starts_with("@charset \"utf-8\";"));
}

#[test]
fn filter_chain_survives_evaluation() {
    let src = "@amount: 0.5; .x{ filter: blur(2px) brightness(@amount); }";
    let css = compile(src, compress()).unwrap();
    assert_eq!(css, ".x{filter:blur(2px) brightness(0.5)}");
}

#[test]
fn font_shorthand_slash_is_preserved() {
    let css = compile(".x{ font: bold 12px/1.5 Arial, sans-serif; }", compress()).unwrap();
    assert_eq!(css, ".x{font:bold 12px/1.5 Arial,sans-serif}");
}

// ---- 文件编译 --------------------------------------------------------------

#[test]
fn compile_styles_base_fixture() {
    let path = Path::new("fixtures/styles/base.less");
    let css = compile_file(
        path,
        CompileOptions {
            compress: true,
            ..CompileOptions::default()
        },
    )
    .unwrap();
    assert!(css.contains(".page{min-height:100%"));
    assert!(css.contains(".page .title{color:#264c73}"));
    assert!(css.contains(".btn-primary"));
}
