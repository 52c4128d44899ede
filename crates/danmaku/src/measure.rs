//! Text width estimation used for lane collision checks.
//!
//! The engine never rasterizes text. A renderer that knows real glyph
//! metrics can plug them in through [`TextMeasure`].

/// Layout width of a comment's text.
pub trait TextMeasure: Send + Sync {
    /// Width of `text` rendered at `font_size * size`.
    fn width(&self, text: &str, font_size: f64, size: f32) -> f64;
}

impl<F> TextMeasure for F
where
    F: Fn(&str, f64, f32) -> f64 + Send + Sync,
{
    fn width(&self, text: &str, font_size: f64, size: f32) -> f64 {
        self(text, font_size, size)
    }
}

/// Counts half-width characters as half an em and everything else as one.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmWidthMeasure;

fn is_half_width(c: char) -> bool {
    c.is_ascii() || ('\u{FF61}'..='\u{FFDC}').contains(&c)
}

impl TextMeasure for EmWidthMeasure {
    fn width(&self, text: &str, font_size: f64, size: f32) -> f64 {
        let ems: f64 = text
            .lines()
            .map(|line| {
                line.chars()
                    .map(|c| if is_half_width(c) { 0.5 } else { 1.0 })
                    .sum::<f64>()
            })
            .fold(0.0, f64::max);
        ems * font_size * f64::from(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_em_width() {
        let measure = EmWidthMeasure;
        assert_eq!(measure.width("abcd", 20.0, 1.0), 40.0);
        assert_eq!(measure.width("弹幕", 20.0, 1.0), 40.0);
        assert_eq!(measure.width("ab", 20.0, 2.0), 40.0);
        // widest line wins
        assert_eq!(measure.width("ab\nabcdef", 10.0, 1.0), 30.0);
    }

    #[test]
    fn test_closure_measure() {
        let fixed = |_: &str, _: f64, _: f32| 100.0;
        assert_eq!(fixed.width("anything", 25.0, 1.0), 100.0);
    }
}
