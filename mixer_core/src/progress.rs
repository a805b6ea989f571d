//! Progress percentage and the cosmetic color ramp.

use mixer_traits::{LightEffect, Rgb};

pub const VIOLET: Rgb = Rgb::new(255, 0, 255);
pub const BLUE: Rgb = Rgb::new(0, 0, 255);
pub const RED: Rgb = Rgb::new(255, 0, 0);
pub const YELLOW: Rgb = Rgb::new(255, 255, 0);

/// Percentage of the recipe dispensed so far, floored and clamped to
/// [0, 100]. An empty recipe (`total_g <= 0`) is immediately complete.
pub fn compute_progress(mixed_g: f64, total_g: f64) -> u8 {
    if total_g <= 0.0 {
        return 100;
    }
    let pct = (mixed_g / total_g * 100.0).floor();
    pct.clamp(0.0, 100.0) as u8
}

/// Color ramp from violet through blue and cyan to green as the mix
/// approaches completion. Presentation only.
pub fn progress_effect(progress: u8) -> LightEffect {
    let fade = |color| LightEffect::Fade { color, ms: 500 };
    match progress {
        0..15 => LightEffect::Solid(VIOLET),
        15..30 => fade(Rgb::new(130, 0, 255)),
        30..45 => fade(BLUE),
        45..60 => fade(Rgb::new(0, 130, 255)),
        60..75 => fade(Rgb::new(0, 255, 255)),
        75..90 => fade(Rgb::new(0, 255, 130)),
        _ => fade(Rgb::new(0, 255, 0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floors_the_ratio() {
        assert_eq!(compute_progress(1.0, 3.0), 33);
        assert_eq!(compute_progress(2.0, 3.0), 66);
    }

    #[test]
    fn full_amount_is_exactly_100() {
        assert_eq!(compute_progress(250.0, 250.0), 100);
    }

    #[test]
    fn clamps_overshoot_and_negatives() {
        assert_eq!(compute_progress(300.0, 250.0), 100);
        assert_eq!(compute_progress(-4.0, 250.0), 0);
    }

    #[test]
    fn empty_recipe_is_complete() {
        assert_eq!(compute_progress(0.0, 0.0), 100);
    }

    #[test]
    fn ramp_starts_solid_and_ends_green() {
        assert_eq!(progress_effect(0), LightEffect::Solid(VIOLET));
        assert_eq!(
            progress_effect(100),
            LightEffect::Fade {
                color: Rgb::new(0, 255, 0),
                ms: 500
            }
        );
    }
}
