//! RGBA 颜色模型与变换。RGB 通道取 0–255，alpha 取 0–1；
//! 运算过程中允许越界，输出时统一钳制。

/// 颜色值。通道在算术中间态可以越界，`clamp` 在输出前收敛。
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rgba {
    pub r: f64,
    pub g: f64,
    pub b: f64,
    pub a: f64,
}

impl Rgba {
    pub fn new(r: f64, g: f64, b: f64, a: f64) -> Self {
        Self { r, g, b, a }
    }

    pub fn opaque(r: f64, g: f64, b: f64) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    pub fn clamp(self) -> Self {
        Self {
            r: self.r.clamp(0.0, 255.0),
            g: self.g.clamp(0.0, 255.0),
            b: self.b.clamp(0.0, 255.0),
            a: self.a.clamp(0.0, 1.0),
        }
    }

    /// RGB 通道逐分量运算，alpha 沿用左侧。
    pub fn operate(self, op: char, other: Rgba) -> Rgba {
        let apply = |l: f64, r: f64| match op {
            '+' => l + r,
            '-' => l - r,
            '*' => l * r,
            _ => l / r,
        };
        Rgba {
            r: apply(self.r, other.r),
            g: apply(self.g, other.g),
            b: apply(self.b, other.b),
            a: self.a,
        }
    }
}

pub fn parse_color(input: &str) -> Option<Rgba> {
    let trimmed = input.trim();
    if let Some(stripped) = trimmed.strip_prefix('#') {
        return parse_hex(stripped);
    }
    let lowered = trimmed.to_ascii_lowercase();
    if lowered.starts_with("rgba") {
        return parse_rgb_function(&lowered, true);
    }
    if lowered.starts_with("rgb") {
        return parse_rgb_function(&lowered, false);
    }
    named_color(&lowered)
}

pub fn parse_hex(hex: &str) -> Option<Rgba> {
    match hex.len() {
        3 => {
            let r = hex_value(&hex[0..1])?;
            let g = hex_value(&hex[1..2])?;
            let b = hex_value(&hex[2..3])?;
            Some(Rgba::opaque(
                (r * 17) as f64,
                (g * 17) as f64,
                (b * 17) as f64,
            ))
        }
        6 => {
            let r = hex_value(&hex[0..2])?;
            let g = hex_value(&hex[2..4])?;
            let b = hex_value(&hex[4..6])?;
            Some(Rgba::opaque(r as f64, g as f64, b as f64))
        }
        8 => {
            let r = hex_value(&hex[0..2])?;
            let g = hex_value(&hex[2..4])?;
            let b = hex_value(&hex[4..6])?;
            let a = hex_value(&hex[6..8])?;
            Some(Rgba::new(r as f64, g as f64, b as f64, a as f64 / 255.0))
        }
        _ => None,
    }
}

/// 常见颜色关键字。保持小表即可，未命中的关键字按普通文本输出。
pub fn named_color(name: &str) -> Option<Rgba> {
    let (r, g, b) = match name {
        "black" => (0, 0, 0),
        "silver" => (192, 192, 192),
        "gray" | "grey" => (128, 128, 128),
        "white" => (255, 255, 255),
        "maroon" => (128, 0, 0),
        "red" => (255, 0, 0),
        "purple" => (128, 0, 128),
        "fuchsia" | "magenta" => (255, 0, 255),
        "green" => (0, 128, 0),
        "lime" => (0, 255, 0),
        "olive" => (128, 128, 0),
        "yellow" => (255, 255, 0),
        "navy" => (0, 0, 128),
        "blue" => (0, 0, 255),
        "teal" => (0, 128, 128),
        "aqua" | "cyan" => (0, 255, 255),
        "orange" => (255, 165, 0),
        "transparent" => return Some(Rgba::new(0.0, 0.0, 0.0, 0.0)),
        _ => return None,
    };
    Some(Rgba::opaque(r as f64, g as f64, b as f64))
}

fn parse_rgb_function(input: &str, has_alpha: bool) -> Option<Rgba> {
    let start = input.find('(')? + 1;
    let end = input.rfind(')')?;
    let body = &input[start..end];
    let parts: Vec<&str> = body.split(',').map(|s| s.trim()).collect();
    if (has_alpha && parts.len() != 4) || (!has_alpha && parts.len() != 3) {
        return None;
    }
    let channel = |raw: &str| -> Option<f64> {
        if let Some(pct) = raw.strip_suffix('%') {
            let value: f64 = pct.trim().parse().ok()?;
            Some(value * 255.0 / 100.0)
        } else {
            raw.parse().ok()
        }
    };
    let r = channel(parts[0])?;
    let g = channel(parts[1])?;
    let b = channel(parts[2])?;
    let a = if has_alpha { parse_alpha(parts[3])? } else { 1.0 };
    Some(Rgba::new(r, g, b, a))
}

pub fn parse_alpha(input: &str) -> Option<f64> {
    if let Some(value) = input.strip_suffix('%') {
        let num: f64 = value.trim().parse().ok()?;
        Some((num / 100.0).clamp(0.0, 1.0))
    } else {
        input.trim().parse().ok().map(|v: f64| v.clamp(0.0, 1.0))
    }
}

pub fn lighten(color: Rgba, amount: f64) -> Rgba {
    let (h, s, l) = rgb_to_hsl(color);
    hsl_to_rgb(h, s, (l + amount).clamp(0.0, 1.0), color.a)
}

pub fn darken(color: Rgba, amount: f64) -> Rgba {
    let (h, s, l) = rgb_to_hsl(color);
    hsl_to_rgb(h, s, (l - amount).clamp(0.0, 1.0), color.a)
}

pub fn saturate(color: Rgba, amount: f64) -> Rgba {
    let (h, s, l) = rgb_to_hsl(color);
    hsl_to_rgb(h, (s + amount).clamp(0.0, 1.0), l, color.a)
}

pub fn desaturate(color: Rgba, amount: f64) -> Rgba {
    let (h, s, l) = rgb_to_hsl(color);
    hsl_to_rgb(h, (s - amount).clamp(0.0, 1.0), l, color.a)
}

pub fn spin(color: Rgba, degrees: f64) -> Rgba {
    let (h, s, l) = rgb_to_hsl(color);
    let hue = ((h * 360.0 + degrees) % 360.0 + 360.0) % 360.0;
    hsl_to_rgb(hue / 360.0, s, l, color.a)
}

pub fn fade(color: Rgba, amount: f64) -> Rgba {
    Rgba {
        a: amount.clamp(0.0, 1.0),
        ..color
    }
}

pub fn mix(first: Rgba, second: Rgba, weight: f64) -> Rgba {
    let w = weight * 2.0 - 1.0;
    let a = first.a - second.a;
    let combined = if w * a == -1.0 {
        w
    } else {
        (w + a) / (1.0 + w * a)
    };
    let w1 = (combined + 1.0) / 2.0;
    let w2 = 1.0 - w1;
    Rgba {
        r: first.r * w1 + second.r * w2,
        g: first.g * w1 + second.g * w2,
        b: first.b * w1 + second.b * w2,
        a: first.a * weight + second.a * (1.0 - weight),
    }
}

pub fn greyscale(color: Rgba) -> Rgba {
    desaturate(color, 1.0)
}

pub fn multiply(bottom: Rgba, top: Rgba) -> Rgba {
    color_blend(blend_multiply, bottom, top)
}

pub fn screen(bottom: Rgba, top: Rgba) -> Rgba {
    color_blend(blend_screen, bottom, top)
}

pub fn overlay(bottom: Rgba, top: Rgba) -> Rgba {
    color_blend(blend_overlay, bottom, top)
}

pub fn format_hex(color: Rgba) -> String {
    let c = color.clamp();
    format!(
        "#{:02x}{:02x}{:02x}",
        to_channel(c.r),
        to_channel(c.g),
        to_channel(c.b)
    )
}

/// 压缩模式下 `#aabbcc` 缩写为 `#abc`。
pub fn format_hex_compressed(color: Rgba) -> String {
    let long = format_hex(color);
    let b = long.as_bytes();
    if b[1] == b[2] && b[3] == b[4] && b[5] == b[6] {
        format!("#{}{}{}", &long[1..2], &long[3..4], &long[5..6])
    } else {
        long
    }
}

pub fn format_rgba(color: Rgba, compress: bool) -> String {
    let c = color.clamp();
    let sep = if compress { "," } else { ", " };
    format!(
        "rgba({}{sep}{}{sep}{}{sep}{})",
        to_channel(c.r),
        to_channel(c.g),
        to_channel(c.b),
        format_float(c.a)
    )
}

/// 输出颜色的 CSS 文本：不透明走十六进制，半透明走 rgba()。
pub fn format_css(color: Rgba, compress: bool) -> String {
    let c = color.clamp();
    if c.a >= 1.0 {
        if compress {
            format_hex_compressed(c)
        } else {
            format_hex(c)
        }
    } else {
        format_rgba(c, compress)
    }
}

fn color_blend<F>(mode: F, bottom: Rgba, top: Rgba) -> Rgba
where
    F: Fn(f64, f64) -> f64 + Copy,
{
    let ab = bottom.a;
    let at = top.a;
    let ar = at + ab * (1.0 - at);
    let bottom_channels = [bottom.r, bottom.g, bottom.b].map(|c| c / 255.0);
    let top_channels = [top.r, top.g, top.b].map(|c| c / 255.0);
    let mut result = [0.0; 3];
    for i in 0..3 {
        let cb = bottom_channels[i];
        let cs = top_channels[i];
        let mut cr = mode(cb, cs);
        if ar > 0.0 {
            cr = (at * cs + ab * (cb - at * (cb + cs - cr))) / ar;
        }
        result[i] = cr * 255.0;
    }
    Rgba::new(result[0], result[1], result[2], ar).clamp()
}

fn blend_multiply(a: f64, b: f64) -> f64 {
    a * b
}

fn blend_screen(a: f64, b: f64) -> f64 {
    a + b - a * b
}

fn blend_overlay(base: f64, overlay: f64) -> f64 {
    if base <= 0.5 {
        blend_multiply(base * 2.0, overlay)
    } else {
        blend_screen(base * 2.0 - 1.0, overlay)
    }
}

fn hex_value(hex: &str) -> Option<u8> {
    u8::from_str_radix(hex, 16).ok()
}

pub fn rgb_to_hsl(color: Rgba) -> (f64, f64, f64) {
    let r = color.r / 255.0;
    let g = color.g / 255.0;
    let b = color.b / 255.0;

    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let l = (max + min) / 2.0;

    if (max - min).abs() < f64::EPSILON {
        return (0.0, 0.0, l);
    }

    let d = max - min;
    let s = if l > 0.5 {
        d / (2.0 - max - min)
    } else {
        d / (max + min)
    };

    let h = if (max - r).abs() < f64::EPSILON {
        (g - b) / d + if g < b { 6.0 } else { 0.0 }
    } else if (max - g).abs() < f64::EPSILON {
        (b - r) / d + 2.0
    } else {
        (r - g) / d + 4.0
    } / 6.0;

    (h, s, l)
}

pub fn hsl_to_rgb(h: f64, s: f64, l: f64, alpha: f64) -> Rgba {
    if s <= 0.0 {
        let v = l * 255.0;
        return Rgba::new(v, v, v, alpha);
    }

    let q = if l < 0.5 {
        l * (1.0 + s)
    } else {
        l + s - l * s
    };
    let p = 2.0 * l - q;

    Rgba::new(
        hue_to_rgb(p, q, h + 1.0 / 3.0) * 255.0,
        hue_to_rgb(p, q, h) * 255.0,
        hue_to_rgb(p, q, h - 1.0 / 3.0) * 255.0,
        alpha,
    )
    .clamp()
}

fn hue_to_rgb(p: f64, q: f64, mut t: f64) -> f64 {
    if t < 0.0 {
        t += 1.0;
    }
    if t > 1.0 {
        t -= 1.0;
    }
    match t {
        _ if t < 1.0 / 6.0 => p + (q - p) * 6.0 * t,
        _ if t < 1.0 / 2.0 => q,
        _ if t < 2.0 / 3.0 => p + (q - p) * (2.0 / 3.0 - t) * 6.0,
        _ => p,
    }
}

fn to_channel(value: f64) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

pub fn format_float(value: f64) -> String {
    let mut formatted = format!("{value:.3}");
    while formatted.contains('.') && formatted.ends_with('0') {
        formatted.pop();
    }
    if formatted.ends_with('.') {
        formatted.pop();
    }
    if formatted.is_empty() {
        "0".to_string()
    } else {
        formatted
    }
}
