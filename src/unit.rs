//! 尺寸单位表与同量纲换算。跨量纲的加减会被求值器拒绝。

/// 输出时原样保留的已知单位集合。
pub const RECOGNIZED_UNITS: &[&str] = &[
    "%", "px", "em", "pc", "ex", "in", "deg", "ms", "pt", "cm", "mm", "ch", "rem", "vw", "vh",
    "vmin", "vmax", "vm", "grad", "rad", "fr", "gr", "Hz", "kHz", "dpi", "dpcm", "dppx", "s",
];

pub fn is_recognized(unit: &str) -> bool {
    RECOGNIZED_UNITS
        .iter()
        .any(|u| u.eq_ignore_ascii_case(unit))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Group {
    Length,
    Angle,
    Time,
    Frequency,
}

/// 单位到组内基准值的倍率。字体相对单位（em/rem/...）与视口单位
/// 没有固定换算，不属于任何组。
fn factor(unit: &str) -> Option<(Group, f64)> {
    let entry = match unit.to_ascii_lowercase().as_str() {
        "px" => (Group::Length, 1.0),
        "in" => (Group::Length, 96.0),
        "pt" => (Group::Length, 96.0 / 72.0),
        "pc" => (Group::Length, 16.0),
        "cm" => (Group::Length, 96.0 / 2.54),
        "mm" => (Group::Length, 96.0 / 25.4),
        "deg" => (Group::Angle, 1.0),
        "grad" => (Group::Angle, 0.9),
        "rad" => (Group::Angle, 180.0 / std::f64::consts::PI),
        "s" => (Group::Time, 1000.0),
        "ms" => (Group::Time, 1.0),
        "hz" => (Group::Frequency, 1.0),
        "khz" => (Group::Frequency, 1000.0),
        _ => return None,
    };
    Some(entry)
}

/// 同组单位之间换算数值，无已知换算时返回 `None`。
pub fn convert(value: f64, from: &str, to: &str) -> Option<f64> {
    if from.eq_ignore_ascii_case(to) {
        return Some(value);
    }
    let (from_group, from_factor) = factor(from)?;
    let (to_group, to_factor) = factor(to)?;
    if from_group != to_group {
        return None;
    }
    Some(value * from_factor / to_factor)
}
