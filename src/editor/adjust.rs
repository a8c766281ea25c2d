//! Brightness, contrast and named colour filters.
//!
//! Adjustments are kept as slider state ([`Adjustments`]) and composed into a
//! [`FilterChain`] when something is drawn. The chain renders to the same
//! filter string a 2D canvas context accepts and applies the matching pixel
//! maths (CSS Filter Effects definitions, in sRGB space, clamped after every
//! function).

use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Percent range accepted for brightness and contrast
pub const PERCENT_MIN: f32 = 0.0;
pub const PERCENT_MAX: f32 = 200.0;

/// Upper bound for `saturate()`
const SATURATE_MAX: f32 = 10.0;

/// Filter parse errors
#[derive(Error, Debug, PartialEq)]
pub enum FilterParseError {
    #[error("Unknown filter '{0}'")]
    UnknownFilter(String),

    #[error("Invalid filter amount '{0}'")]
    InvalidAmount(String),
}

/// Optional colour filter applied after brightness and contrast
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum NamedFilter {
    #[default]
    None,
    Grayscale(f32),
    Sepia(f32),
    Invert(f32),
    Saturate(f32),
}

impl NamedFilter {
    /// Clamp the amount into the range the filter function accepts
    pub fn clamped(self) -> Self {
        let unit = |a: f32| if a.is_finite() { a.clamp(0.0, 1.0) } else { 1.0 };
        match self {
            NamedFilter::None => NamedFilter::None,
            NamedFilter::Grayscale(a) => NamedFilter::Grayscale(unit(a)),
            NamedFilter::Sepia(a) => NamedFilter::Sepia(unit(a)),
            NamedFilter::Invert(a) => NamedFilter::Invert(unit(a)),
            NamedFilter::Saturate(a) => {
                NamedFilter::Saturate(if a.is_finite() { a.clamp(0.0, SATURATE_MAX) } else { 1.0 })
            }
        }
    }

    /// Filter function text, `None` for no filter
    pub fn css(&self) -> Option<String> {
        match self {
            NamedFilter::None => None,
            NamedFilter::Grayscale(a) => Some(format!("grayscale({a})")),
            NamedFilter::Sepia(a) => Some(format!("sepia({a})")),
            NamedFilter::Invert(a) => Some(format!("invert({a})")),
            NamedFilter::Saturate(a) => Some(format!("saturate({a})")),
        }
    }

    fn is_identity(&self) -> bool {
        match *self {
            NamedFilter::None => true,
            NamedFilter::Grayscale(a) | NamedFilter::Sepia(a) | NamedFilter::Invert(a) => a == 0.0,
            NamedFilter::Saturate(a) => a == 1.0,
        }
    }

    /// 3x3 colour matrix, rows produce r, g, b
    fn matrix(&self) -> Option<[[f32; 3]; 3]> {
        match *self {
            NamedFilter::Grayscale(a) => {
                let k = 1.0 - a;
                Some([
                    [0.2126 + 0.7874 * k, 0.7152 - 0.7152 * k, 0.0722 - 0.0722 * k],
                    [0.2126 - 0.2126 * k, 0.7152 + 0.2848 * k, 0.0722 - 0.0722 * k],
                    [0.2126 - 0.2126 * k, 0.7152 - 0.7152 * k, 0.0722 + 0.9278 * k],
                ])
            }
            NamedFilter::Sepia(a) => {
                let k = 1.0 - a;
                Some([
                    [0.393 + 0.607 * k, 0.769 - 0.769 * k, 0.189 - 0.189 * k],
                    [0.349 - 0.349 * k, 0.686 + 0.314 * k, 0.168 - 0.168 * k],
                    [0.272 - 0.272 * k, 0.534 - 0.534 * k, 0.131 + 0.869 * k],
                ])
            }
            NamedFilter::Saturate(s) => Some([
                [0.213 + 0.787 * s, 0.715 - 0.715 * s, 0.072 - 0.072 * s],
                [0.213 - 0.213 * s, 0.715 + 0.285 * s, 0.072 - 0.072 * s],
                [0.213 - 0.213 * s, 0.715 - 0.715 * s, 0.072 + 0.928 * s],
            ]),
            NamedFilter::None | NamedFilter::Invert(_) => None,
        }
    }
}

/// Parse `50%` or `0.5`
fn parse_amount(text: &str) -> Result<f32, FilterParseError> {
    let text = text.trim();
    let invalid = || FilterParseError::InvalidAmount(text.to_string());
    let value = match text.strip_suffix('%') {
        Some(pct) => pct.trim().parse::<f32>().map_err(|_| invalid())? / 100.0,
        None => text.parse::<f32>().map_err(|_| invalid())?,
    };
    if !value.is_finite() || value < 0.0 {
        return Err(invalid());
    }
    Ok(value)
}

impl FromStr for NamedFilter {
    type Err = FilterParseError;

    /// Accepts `none`, a bare name (`sepia`, full strength) or a function
    /// call (`grayscale(1)`, `sepia(50%)`)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("none") {
            return Ok(NamedFilter::None);
        }

        let (name, amount) = match s.split_once('(') {
            Some((name, rest)) => {
                let arg = rest
                    .strip_suffix(')')
                    .ok_or_else(|| FilterParseError::InvalidAmount(s.to_string()))?;
                (name.trim(), parse_amount(arg)?)
            }
            None => (s, 1.0),
        };

        let filter = match name.to_ascii_lowercase().as_str() {
            "grayscale" => NamedFilter::Grayscale(amount),
            "sepia" => NamedFilter::Sepia(amount),
            "invert" => NamedFilter::Invert(amount),
            "saturate" => NamedFilter::Saturate(amount),
            _ => return Err(FilterParseError::UnknownFilter(name.to_string())),
        };
        Ok(filter.clamped())
    }
}

impl TryFrom<String> for NamedFilter {
    type Error = FilterParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NamedFilter> for String {
    fn from(filter: NamedFilter) -> Self {
        filter.to_string()
    }
}

impl fmt::Display for NamedFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.css() {
            Some(css) => f.write_str(&css),
            None => f.write_str("none"),
        }
    }
}

/// Slider state: brightness and contrast in percent plus a named filter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Adjustments {
    brightness: f32,
    contrast: f32,
    filter: NamedFilter,
}

impl Default for Adjustments {
    fn default() -> Self {
        Self {
            brightness: 100.0,
            contrast: 100.0,
            filter: NamedFilter::None,
        }
    }
}

fn clamp_percent(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(PERCENT_MIN, PERCENT_MAX)
    } else {
        100.0
    }
}

impl Adjustments {
    /// Out-of-range values are clamped to the nearest bound
    pub fn new(brightness: f32, contrast: f32, filter: NamedFilter) -> Self {
        Self {
            brightness: clamp_percent(brightness),
            contrast: clamp_percent(contrast),
            filter: filter.clamped(),
        }
    }

    pub fn brightness(&self) -> f32 {
        self.brightness
    }

    pub fn contrast(&self) -> f32 {
        self.contrast
    }

    pub fn filter(&self) -> NamedFilter {
        self.filter
    }

    /// Compose the drawable filter
    pub fn chain(&self) -> FilterChain {
        FilterChain {
            brightness: self.brightness,
            contrast: self.contrast,
            named: self.filter,
        }
    }
}

/// Composed pixel filter: `brightness(B%) contrast(C%) [named]`
#[derive(Debug, Clone, PartialEq)]
pub struct FilterChain {
    brightness: f32,
    contrast: f32,
    named: NamedFilter,
}

impl FilterChain {
    /// Canvas filter string
    pub fn css(&self) -> String {
        let mut css = format!("brightness({}%) contrast({}%)", self.brightness, self.contrast);
        if let Some(named) = self.named.css() {
            css.push(' ');
            css.push_str(&named);
        }
        css
    }

    /// True when applying the chain leaves every pixel unchanged
    pub fn is_identity(&self) -> bool {
        self.brightness == 100.0 && self.contrast == 100.0 && self.named.is_identity()
    }

    /// Brightness then contrast, per channel
    fn tone_lut(&self) -> [u8; 256] {
        let b = self.brightness / 100.0;
        let c = self.contrast / 100.0;
        let mut lut = [0u8; 256];
        for (v, out) in lut.iter_mut().enumerate() {
            let x = (v as f32 / 255.0 * b).clamp(0.0, 1.0);
            let x = ((x - 0.5) * c + 0.5).clamp(0.0, 1.0);
            *out = (x * 255.0).round() as u8;
        }
        lut
    }

    /// Filter a straight-alpha image; alpha is preserved
    pub fn apply(&self, image: &RgbaImage) -> RgbaImage {
        let mut out = image.clone();
        if self.is_identity() {
            return out;
        }

        tracing::debug!(
            "Applying filter '{}' to {}x{}",
            self.css(),
            image.width(),
            image.height()
        );

        let lut = self.tone_lut();
        let matrix = self.named.matrix();

        for p in out.pixels_mut() {
            let r = lut[p[0] as usize] as f32;
            let g = lut[p[1] as usize] as f32;
            let b = lut[p[2] as usize] as f32;

            let (r, g, b) = match (matrix, self.named) {
                (Some(m), _) => (
                    m[0][0] * r + m[0][1] * g + m[0][2] * b,
                    m[1][0] * r + m[1][1] * g + m[1][2] * b,
                    m[2][0] * r + m[2][1] * g + m[2][2] * b,
                ),
                (None, NamedFilter::Invert(a)) => {
                    let inv = |c: f32| a * (255.0 - c) + (1.0 - a) * c;
                    (inv(r), inv(g), inv(b))
                }
                (None, _) => (r, g, b),
            };

            p[0] = r.round().clamp(0.0, 255.0) as u8;
            p[1] = g.round().clamp(0.0, 255.0) as u8;
            p[2] = b.round().clamp(0.0, 255.0) as u8;
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_pixel(rgba: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(1, 1, image::Rgba(rgba))
    }

    #[test]
    fn default_chain_is_identity() {
        let chain = Adjustments::default().chain();
        assert!(chain.is_identity());
        assert_eq!(chain.css(), "brightness(100%) contrast(100%)");
    }

    #[test]
    fn chain_renders_brightness_contrast_and_named_filter() {
        let filter: NamedFilter = "grayscale(1)".parse().unwrap();
        let adjustments = Adjustments::new(120.0, 80.0, filter);
        assert_eq!(
            adjustments.chain().css(),
            "brightness(120%) contrast(80%) grayscale(1)"
        );
    }

    #[test]
    fn parses_filter_syntax() {
        assert_eq!("none".parse::<NamedFilter>().unwrap(), NamedFilter::None);
        assert_eq!("".parse::<NamedFilter>().unwrap(), NamedFilter::None);
        assert_eq!("sepia".parse::<NamedFilter>().unwrap(), NamedFilter::Sepia(1.0));
        assert_eq!(
            "Sepia(50%)".parse::<NamedFilter>().unwrap(),
            NamedFilter::Sepia(0.5)
        );
        assert_eq!(
            "saturate(2)".parse::<NamedFilter>().unwrap(),
            NamedFilter::Saturate(2.0)
        );
        // Over-range amounts clamp instead of failing
        assert_eq!(
            "invert(3)".parse::<NamedFilter>().unwrap(),
            NamedFilter::Invert(1.0)
        );
        assert!(matches!(
            "blur(2px)".parse::<NamedFilter>(),
            Err(FilterParseError::UnknownFilter(_))
        ));
        assert!(matches!(
            "sepia(lots)".parse::<NamedFilter>(),
            Err(FilterParseError::InvalidAmount(_))
        ));
        assert!("grayscale(1".parse::<NamedFilter>().is_err());
    }

    #[test]
    fn out_of_range_sliders_clamp() {
        let adjustments = Adjustments::new(500.0, -20.0, NamedFilter::Grayscale(4.0));
        assert_eq!(adjustments.brightness(), PERCENT_MAX);
        assert_eq!(adjustments.contrast(), PERCENT_MIN);
        assert_eq!(adjustments.filter(), NamedFilter::Grayscale(1.0));

        let adjustments = Adjustments::new(f32::NAN, 100.0, NamedFilter::None);
        assert_eq!(adjustments.brightness(), 100.0);
    }

    #[test]
    fn brightness_scales_channels() {
        let chain = Adjustments::new(50.0, 100.0, NamedFilter::None).chain();
        let out = chain.apply(&one_pixel([200, 100, 0, 77]));
        assert_eq!(out.get_pixel(0, 0).0, [100, 50, 0, 77]);
    }

    #[test]
    fn zero_contrast_is_mid_grey() {
        let chain = Adjustments::new(100.0, 0.0, NamedFilter::None).chain();
        let out = chain.apply(&one_pixel([250, 3, 90, 255]));
        assert_eq!(out.get_pixel(0, 0).0, [128, 128, 128, 255]);
    }

    #[test]
    fn grayscale_equalizes_channels() {
        let chain = Adjustments::new(100.0, 100.0, NamedFilter::Grayscale(1.0)).chain();
        let [r, g, b, _] = chain.apply(&one_pixel([255, 0, 0, 255])).get_pixel(0, 0).0;
        assert!(r.abs_diff(g) <= 1 && g.abs_diff(b) <= 1);
        assert_eq!(r, 54);
    }

    #[test]
    fn invert_flips_channels() {
        let chain = Adjustments::new(100.0, 100.0, NamedFilter::Invert(1.0)).chain();
        let out = chain.apply(&one_pixel([255, 0, 100, 255]));
        assert_eq!(out.get_pixel(0, 0).0, [0, 255, 155, 255]);
    }

    #[test]
    fn serde_uses_filter_text() {
        let json = serde_json::to_string(&Adjustments::new(110.0, 90.0, NamedFilter::Sepia(1.0)))
            .unwrap();
        assert!(json.contains("\"sepia(1)\""));
        let back: Adjustments = serde_json::from_str(&json).unwrap();
        assert_eq!(back.filter(), NamedFilter::Sepia(1.0));
    }
}
