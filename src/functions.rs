//! 内建函数注册表。按小写名称查找（大小写不敏感）；
//! 未注册的调用原样透传为 CSS 函数文本。

use crate::ast::{Node, NodeKind, Number, Quoted};
use crate::color::{self, Rgba};
use crate::env::Env;
use crate::error::{ErrorKind, LessError, LessResult};
use crate::unit;
use indexmap::IndexMap;

pub type BuiltinFn = fn(&Env, &[Node]) -> LessResult<Node>;

pub struct FunctionRegistry {
    map: IndexMap<String, BuiltinFn>,
}

impl FunctionRegistry {
    pub fn empty() -> Self {
        Self {
            map: IndexMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        let builtins: &[(&str, BuiltinFn)] = &[
            ("rgb", fn_rgb),
            ("rgba", fn_rgba),
            ("hsl", fn_hsl),
            ("hsla", fn_hsla),
            ("argb", fn_argb),
            ("red", fn_red),
            ("green", fn_green),
            ("blue", fn_blue),
            ("alpha", fn_alpha),
            ("hue", fn_hue),
            ("saturation", fn_saturation),
            ("lightness", fn_lightness),
            ("luma", fn_luma),
            ("lighten", fn_lighten),
            ("darken", fn_darken),
            ("saturate", fn_saturate),
            ("desaturate", fn_desaturate),
            ("fade", fn_fade),
            ("fadein", fn_fadein),
            ("fadeout", fn_fadeout),
            ("spin", fn_spin),
            ("mix", fn_mix),
            ("greyscale", fn_greyscale),
            ("grayscale", fn_greyscale),
            ("contrast", fn_contrast),
            ("multiply", fn_multiply),
            ("screen", fn_screen),
            ("overlay", fn_overlay),
            ("round", fn_round),
            ("ceil", fn_ceil),
            ("floor", fn_floor),
            ("abs", fn_abs),
            ("percentage", fn_percentage),
            ("unit", fn_unit),
            ("convert", fn_convert),
            ("e", fn_e),
            ("escape", fn_escape),
            ("iscolor", fn_iscolor),
            ("isnumber", fn_isnumber),
            ("isstring", fn_isstring),
            ("iskeyword", fn_iskeyword),
            ("isurl", fn_isurl),
            ("ispixel", fn_ispixel),
            ("ispercentage", fn_ispercentage),
            ("isem", fn_isem),
            ("default", fn_default),
        ];
        for (name, f) in builtins {
            registry.register(name, *f);
        }
        registry
    }

    pub fn register(&mut self, name: &str, function: BuiltinFn) {
        self.map.insert(name.to_ascii_lowercase(), function);
    }

    pub fn get(&self, name: &str) -> Option<BuiltinFn> {
        self.map.get(&name.to_ascii_lowercase()).copied()
    }
}

fn bad_arg(function: &str, detail: impl Into<String>) -> LessError {
    LessError::eval(
        ErrorKind::WrongArgumentCount,
        format!("函数 {function} 的参数不合法: {}", detail.into()),
    )
}

fn arg<'a>(args: &'a [Node], i: usize, function: &str) -> LessResult<&'a Node> {
    args.get(i)
        .ok_or_else(|| bad_arg(function, format!("缺少第 {} 个参数", i + 1)))
}

fn number_arg(args: &[Node], i: usize, function: &str) -> LessResult<Number> {
    match &arg(args, i, function)?.kind {
        NodeKind::Number(n) => Ok(n.clone()),
        other => Err(bad_arg(
            function,
            format!("期待数值, 得到 {}", Node::new(other.clone()).to_css(false)),
        )),
    }
}

fn color_arg(args: &[Node], i: usize, function: &str) -> LessResult<Rgba> {
    let node = arg(args, i, function)?;
    match &node.kind {
        NodeKind::Color(c) => Ok(*c),
        NodeKind::Keyword(k) | NodeKind::Text(k) => color::parse_color(k)
            .ok_or_else(|| bad_arg(function, format!("无法解析颜色 {k}"))),
        NodeKind::Quoted(q) => color::parse_color(&q.content)
            .ok_or_else(|| bad_arg(function, format!("无法解析颜色 {}", q.content))),
        other => Err(bad_arg(
            function,
            format!("期待颜色, 得到 {}", Node::new(other.clone()).to_css(false)),
        )),
    }
}

/// 百分比参数归一化到 `[0,1]`；裸数值按 0–1 解释。
fn fraction_arg(args: &[Node], i: usize, function: &str) -> LessResult<f64> {
    let n = number_arg(args, i, function)?;
    if n.unit == "%" {
        Ok((n.value / 100.0).clamp(0.0, 1.0))
    } else {
        Ok(n.value.clamp(0.0, 1.0))
    }
}

fn channel_arg(args: &[Node], i: usize, function: &str) -> LessResult<f64> {
    let n = number_arg(args, i, function)?;
    if n.unit == "%" {
        Ok(n.value * 255.0 / 100.0)
    } else {
        Ok(n.value)
    }
}

fn fn_rgb(_env: &Env, args: &[Node]) -> LessResult<Node> {
    Ok(Node::color(Rgba::opaque(
        channel_arg(args, 0, "rgb")?,
        channel_arg(args, 1, "rgb")?,
        channel_arg(args, 2, "rgb")?,
    )))
}

fn fn_rgba(_env: &Env, args: &[Node]) -> LessResult<Node> {
    if args.len() == 2 {
        let base = color_arg(args, 0, "rgba")?;
        return Ok(Node::color(color::fade(base, fraction_arg(args, 1, "rgba")?)));
    }
    Ok(Node::color(Rgba::new(
        channel_arg(args, 0, "rgba")?,
        channel_arg(args, 1, "rgba")?,
        channel_arg(args, 2, "rgba")?,
        fraction_arg(args, 3, "rgba")?,
    )))
}

fn fn_hsl(_env: &Env, args: &[Node]) -> LessResult<Node> {
    let h = number_arg(args, 0, "hsl")?.value;
    let s = fraction_arg(args, 1, "hsl")?;
    let l = fraction_arg(args, 2, "hsl")?;
    Ok(Node::color(color::hsl_to_rgb(
        ((h % 360.0) + 360.0) % 360.0 / 360.0,
        s,
        l,
        1.0,
    )))
}

fn fn_hsla(_env: &Env, args: &[Node]) -> LessResult<Node> {
    let h = number_arg(args, 0, "hsla")?.value;
    let s = fraction_arg(args, 1, "hsla")?;
    let l = fraction_arg(args, 2, "hsla")?;
    let a = fraction_arg(args, 3, "hsla")?;
    Ok(Node::color(color::hsl_to_rgb(
        ((h % 360.0) + 360.0) % 360.0 / 360.0,
        s,
        l,
        a,
    )))
}

fn fn_argb(_env: &Env, args: &[Node]) -> LessResult<Node> {
    let c = color_arg(args, 0, "argb")?.clamp();
    Ok(Node::keyword(format!(
        "#{:02x}{:02x}{:02x}{:02x}",
        (c.a * 255.0).round() as u8,
        c.r.round() as u8,
        c.g.round() as u8,
        c.b.round() as u8
    )))
}

fn fn_red(_env: &Env, args: &[Node]) -> LessResult<Node> {
    Ok(Node::number(color_arg(args, 0, "red")?.clamp().r.round(), ""))
}

fn fn_green(_env: &Env, args: &[Node]) -> LessResult<Node> {
    Ok(Node::number(color_arg(args, 0, "green")?.clamp().g.round(), ""))
}

fn fn_blue(_env: &Env, args: &[Node]) -> LessResult<Node> {
    Ok(Node::number(color_arg(args, 0, "blue")?.clamp().b.round(), ""))
}

fn fn_alpha(_env: &Env, args: &[Node]) -> LessResult<Node> {
    Ok(Node::number(color_arg(args, 0, "alpha")?.clamp().a, ""))
}

fn fn_hue(_env: &Env, args: &[Node]) -> LessResult<Node> {
    let (h, _, _) = color::rgb_to_hsl(color_arg(args, 0, "hue")?);
    Ok(Node::number((h * 360.0).round(), ""))
}

fn fn_saturation(_env: &Env, args: &[Node]) -> LessResult<Node> {
    let (_, s, _) = color::rgb_to_hsl(color_arg(args, 0, "saturation")?);
    Ok(Node::number((s * 100.0).round(), "%"))
}

fn fn_lightness(_env: &Env, args: &[Node]) -> LessResult<Node> {
    let (_, _, l) = color::rgb_to_hsl(color_arg(args, 0, "lightness")?);
    Ok(Node::number((l * 100.0).round(), "%"))
}

fn luma(c: Rgba) -> f64 {
    let linear = |v: f64| {
        let v = (v / 255.0).clamp(0.0, 1.0);
        if v <= 0.03928 {
            v / 12.92
        } else {
            ((v + 0.055) / 1.055).powf(2.4)
        }
    };
    0.2126 * linear(c.r) + 0.7152 * linear(c.g) + 0.0722 * linear(c.b)
}

fn fn_luma(_env: &Env, args: &[Node]) -> LessResult<Node> {
    Ok(Node::number((luma(color_arg(args, 0, "luma")?) * 100.0).round(), "%"))
}

fn fn_lighten(_env: &Env, args: &[Node]) -> LessResult<Node> {
    let c = color_arg(args, 0, "lighten")?;
    Ok(Node::color(color::lighten(c, fraction_arg(args, 1, "lighten")?)))
}

fn fn_darken(_env: &Env, args: &[Node]) -> LessResult<Node> {
    let c = color_arg(args, 0, "darken")?;
    Ok(Node::color(color::darken(c, fraction_arg(args, 1, "darken")?)))
}

fn fn_saturate(_env: &Env, args: &[Node]) -> LessResult<Node> {
    let c = color_arg(args, 0, "saturate")?;
    Ok(Node::color(color::saturate(c, fraction_arg(args, 1, "saturate")?)))
}

fn fn_desaturate(_env: &Env, args: &[Node]) -> LessResult<Node> {
    let c = color_arg(args, 0, "desaturate")?;
    Ok(Node::color(color::desaturate(
        c,
        fraction_arg(args, 1, "desaturate")?,
    )))
}

fn fn_fade(_env: &Env, args: &[Node]) -> LessResult<Node> {
    let c = color_arg(args, 0, "fade")?;
    Ok(Node::color(color::fade(c, fraction_arg(args, 1, "fade")?)))
}

fn fn_fadein(_env: &Env, args: &[Node]) -> LessResult<Node> {
    let c = color_arg(args, 0, "fadein")?;
    let amount = fraction_arg(args, 1, "fadein")?;
    Ok(Node::color(color::fade(c, (c.a + amount).clamp(0.0, 1.0))))
}

fn fn_fadeout(_env: &Env, args: &[Node]) -> LessResult<Node> {
    let c = color_arg(args, 0, "fadeout")?;
    let amount = fraction_arg(args, 1, "fadeout")?;
    Ok(Node::color(color::fade(c, (c.a - amount).clamp(0.0, 1.0))))
}

fn fn_spin(_env: &Env, args: &[Node]) -> LessResult<Node> {
    let c = color_arg(args, 0, "spin")?;
    let degrees = number_arg(args, 1, "spin")?.value;
    Ok(Node::color(color::spin(c, degrees)))
}

fn fn_mix(_env: &Env, args: &[Node]) -> LessResult<Node> {
    let first = color_arg(args, 0, "mix")?;
    let second = color_arg(args, 1, "mix")?;
    let weight = if args.len() > 2 {
        fraction_arg(args, 2, "mix")?
    } else {
        0.5
    };
    Ok(Node::color(color::mix(first, second, weight)))
}

fn fn_greyscale(_env: &Env, args: &[Node]) -> LessResult<Node> {
    Ok(Node::color(color::greyscale(color_arg(args, 0, "greyscale")?)))
}

fn fn_contrast(_env: &Env, args: &[Node]) -> LessResult<Node> {
    let base = match color_arg(args, 0, "contrast") {
        Ok(c) => c,
        // 非颜色入参按 less 惯例原样放回，让未知值透传。
        Err(_) => return Ok(arg(args, 0, "contrast")?.clone()),
    };
    let dark = if args.len() > 1 {
        color_arg(args, 1, "contrast")?
    } else {
        Rgba::opaque(0.0, 0.0, 0.0)
    };
    let light = if args.len() > 2 {
        color_arg(args, 2, "contrast")?
    } else {
        Rgba::opaque(255.0, 255.0, 255.0)
    };
    let threshold = if args.len() > 3 {
        fraction_arg(args, 3, "contrast")?
    } else {
        0.43
    };
    Ok(Node::color(if luma(base) < threshold { light } else { dark }))
}

fn fn_multiply(_env: &Env, args: &[Node]) -> LessResult<Node> {
    let bottom = color_arg(args, 0, "multiply")?;
    let top = color_arg(args, 1, "multiply")?;
    Ok(Node::color(color::multiply(bottom, top)))
}

fn fn_screen(_env: &Env, args: &[Node]) -> LessResult<Node> {
    let bottom = color_arg(args, 0, "screen")?;
    let top = color_arg(args, 1, "screen")?;
    Ok(Node::color(color::screen(bottom, top)))
}

fn fn_overlay(_env: &Env, args: &[Node]) -> LessResult<Node> {
    let bottom = color_arg(args, 0, "overlay")?;
    let top = color_arg(args, 1, "overlay")?;
    Ok(Node::color(color::overlay(bottom, top)))
}

fn fn_round(_env: &Env, args: &[Node]) -> LessResult<Node> {
    let n = number_arg(args, 0, "round")?;
    let places = if args.len() > 1 {
        number_arg(args, 1, "round")?.value.max(0.0) as i32
    } else {
        0
    };
    let factor = 10f64.powi(places);
    Ok(Node::number((n.value * factor).round() / factor, n.unit))
}

fn fn_ceil(_env: &Env, args: &[Node]) -> LessResult<Node> {
    let n = number_arg(args, 0, "ceil")?;
    Ok(Node::number(n.value.ceil(), n.unit))
}

fn fn_floor(_env: &Env, args: &[Node]) -> LessResult<Node> {
    let n = number_arg(args, 0, "floor")?;
    Ok(Node::number(n.value.floor(), n.unit))
}

fn fn_abs(_env: &Env, args: &[Node]) -> LessResult<Node> {
    let n = number_arg(args, 0, "abs")?;
    Ok(Node::number(n.value.abs(), n.unit))
}

fn fn_percentage(_env: &Env, args: &[Node]) -> LessResult<Node> {
    let n = number_arg(args, 0, "percentage")?;
    Ok(Node::number(n.value * 100.0, "%"))
}

fn fn_unit(_env: &Env, args: &[Node]) -> LessResult<Node> {
    let n = number_arg(args, 0, "unit")?;
    let unit = match args.get(1) {
        Some(u) => u.text_value(),
        None => String::new(),
    };
    Ok(Node::number(n.value, unit))
}

fn fn_convert(_env: &Env, args: &[Node]) -> LessResult<Node> {
    let n = number_arg(args, 0, "convert")?;
    let target = arg(args, 1, "convert")?.text_value();
    match unit::convert(n.value, &n.unit, &target) {
        Some(value) => Ok(Node::number(value, target)),
        None => Err(LessError::eval(
            ErrorKind::IncompatibleUnits,
            format!("无法将 {} 换算为 {target}", n.css()),
        )),
    }
}

fn fn_e(_env: &Env, args: &[Node]) -> LessResult<Node> {
    let content = arg(args, 0, "e")?.text_value();
    Ok(Node::new(NodeKind::Quoted(Quoted {
        quote: None,
        content,
        escaped: true,
    })))
}

fn fn_escape(_env: &Env, args: &[Node]) -> LessResult<Node> {
    let content = arg(args, 0, "escape")?.text_value();
    let mut escaped = String::with_capacity(content.len());
    for c in content.chars() {
        let keep = c.is_ascii_alphanumeric() || ";/?@&=+$,-_.!~*".contains(c);
        if keep {
            escaped.push(c);
        } else {
            let mut buffer = [0u8; 4];
            for byte in c.encode_utf8(&mut buffer).as_bytes() {
                escaped.push_str(&format!("%{byte:02X}"));
            }
        }
    }
    Ok(Node::keyword(escaped))
}

fn truth(value: bool) -> Node {
    Node::keyword(if value { "true" } else { "false" })
}

fn fn_iscolor(_env: &Env, args: &[Node]) -> LessResult<Node> {
    let node = arg(args, 0, "iscolor")?;
    let is = match &node.kind {
        NodeKind::Color(_) => true,
        NodeKind::Keyword(k) => color::parse_color(k).is_some(),
        _ => false,
    };
    Ok(truth(is))
}

fn fn_isnumber(_env: &Env, args: &[Node]) -> LessResult<Node> {
    Ok(truth(matches!(&arg(args, 0, "isnumber")?.kind, NodeKind::Number(_))))
}

fn fn_isstring(_env: &Env, args: &[Node]) -> LessResult<Node> {
    Ok(truth(matches!(&arg(args, 0, "isstring")?.kind, NodeKind::Quoted(_))))
}

fn fn_iskeyword(_env: &Env, args: &[Node]) -> LessResult<Node> {
    Ok(truth(matches!(&arg(args, 0, "iskeyword")?.kind, NodeKind::Keyword(_))))
}

fn fn_isurl(_env: &Env, args: &[Node]) -> LessResult<Node> {
    Ok(truth(matches!(&arg(args, 0, "isurl")?.kind, NodeKind::Url(_))))
}

fn is_unit(node: &Node, unit: &str) -> bool {
    matches!(&node.kind, NodeKind::Number(n) if n.unit.eq_ignore_ascii_case(unit))
}

fn fn_ispixel(_env: &Env, args: &[Node]) -> LessResult<Node> {
    Ok(truth(is_unit(arg(args, 0, "ispixel")?, "px")))
}

fn fn_ispercentage(_env: &Env, args: &[Node]) -> LessResult<Node> {
    Ok(truth(is_unit(arg(args, 0, "ispercentage")?, "%")))
}

fn fn_isem(_env: &Env, args: &[Node]) -> LessResult<Node> {
    Ok(truth(is_unit(arg(args, 0, "isem")?, "em")))
}

/// `default()` 只在守卫求值期间有意义，取值由求值器注入。
fn fn_default(env: &Env, _args: &[Node]) -> LessResult<Node> {
    match env.default_guard {
        Some(value) => Ok(truth(value)),
        None => Err(LessError::eval(
            ErrorKind::UnrecognizedCondition,
            "default() 只能出现在 mixin 守卫中",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::Env;
    use crate::CompileOptions;

    fn env() -> Env<'static> {
        Env::new(&CompileOptions::default())
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let registry = FunctionRegistry::with_builtins();
        assert!(registry.get("LIGHTEN").is_some());
        assert!(registry.get("no-such-function").is_none());
    }

    #[test]
    fn rgb_builds_color_nodes() {
        let result = fn_rgb(&env(), &[
            Node::number(255.0, ""),
            Node::number(0.0, ""),
            Node::number(0.0, ""),
        ])
        .unwrap();
        assert_eq!(result.to_css(false), "#ff0000");
    }

    #[test]
    fn percentage_scales_and_tags() {
        let result = fn_percentage(&env(), &[Node::number(0.5, "")]).unwrap();
        assert_eq!(result.to_css(false), "50%");
    }

    #[test]
    fn convert_rejects_cross_group_units() {
        let err = fn_convert(&env(), &[Node::number(1.0, "px"), Node::keyword("deg")])
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::IncompatibleUnits);
    }

    #[test]
    fn type_predicates_answer_keywords() {
        let yes = fn_ispixel(&env(), &[Node::number(4.0, "px")]).unwrap();
        assert_eq!(yes.to_css(false), "true");
        let no = fn_isstring(&env(), &[Node::number(4.0, "px")]).unwrap();
        assert_eq!(no.to_css(false), "false");
    }
}
