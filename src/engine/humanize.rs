//! Human interaction simulation.
//!
//! Every page interaction in the engine flows through this module: pointer
//! paths are curved and jittered, clicks land inside the middle of the
//! target box after a visible approach, text arrives keystroke by keystroke
//! with occasional typos and hesitation, and think/reading time comes from
//! named buckets. All gestures are best-effort — a failed gesture is a
//! no-op, never a field-fill failure.
//!
//! Randomness is sampled into a plain plan *before* any await so the run
//! future stays Send; delays all flow through [`Pacing`], whose `zero()`
//! mode lets tests drive the whole simulator with no real sleeping.

use chromiumoxide::layout::Point;
use chromiumoxide::{Element, Page};
use rand::distr::{Distribution, Uniform};
use rand::RngExt;
use std::time::Duration;

/// Central timing policy. `zero()` turns every sleep into a no-op.
#[derive(Debug, Clone, Copy)]
pub struct Pacing {
    zero: bool,
}

impl Pacing {
    pub fn standard() -> Self {
        Self { zero: false }
    }

    /// No real delays; used by tests and `plan_only` dry runs.
    pub fn zero() -> Self {
        Self { zero: true }
    }

    pub async fn sleep_ms(&self, ms: u64) {
        if !self.zero && ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }
}

/// Named think-time buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Think {
    SimpleField,
    ComplexField,
    Decision,
    Review,
}

impl Think {
    fn range_ms(self) -> (u64, u64) {
        match self {
            Think::SimpleField => (300, 800),
            Think::ComplexField => (800, 2_000),
            Think::Decision => (1_000, 2_500),
            Think::Review => (1_500, 4_000),
        }
    }
}

fn sample_ms(lo: u64, hi: u64) -> u64 {
    let mut rng = rand::rng();
    Uniform::new(lo, hi.max(lo + 1))
        .map(|d| d.sample(&mut rng))
        .unwrap_or(lo)
}

/// Quadratic bezier between two points with a jittered control point —
/// never a straight line or an instant jump.
pub fn curve_points(from: (f64, f64), to: (f64, f64), steps: usize) -> Vec<(f64, f64)> {
    let (jx, jy) = {
        let mut rng = rand::rng();
        (
            rng.random_range(-80.0..80.0f64),
            rng.random_range(-60.0..60.0f64),
        )
    };
    let ctrl = ((from.0 + to.0) / 2.0 + jx, (from.1 + to.1) / 2.0 + jy);

    (1..=steps)
        .map(|i| {
            let t = i as f64 / steps as f64;
            let inv = 1.0 - t;
            (
                inv * inv * from.0 + 2.0 * inv * t * ctrl.0 + t * t * to.0,
                inv * inv * from.1 + 2.0 * inv * t * ctrl.1 + t * t * to.1,
            )
        })
        .collect()
}

/// The simulator. One per run, owned by the run context.
#[derive(Debug, Clone)]
pub struct Humanizer {
    pacing: Pacing,
    /// Probability of using the fully humanized fill path instead of a
    /// direct value assignment.
    pub humanize_probability: f64,
}

impl Humanizer {
    pub fn new(pacing: Pacing, humanize_probability: f64) -> Self {
        Self {
            pacing,
            humanize_probability: humanize_probability.clamp(0.0, 1.0),
        }
    }

    pub fn pacing(&self) -> Pacing {
        self.pacing
    }

    /// Coin flip for the humanized-vs-direct fill decision.
    pub fn roll_humanized(&self) -> bool {
        let mut rng = rand::rng();
        rng.random_bool(self.humanize_probability)
    }

    pub async fn think(&self, kind: Think) {
        let (lo, hi) = kind.range_ms();
        self.pacing.sleep_ms(sample_ms(lo, hi)).await;
    }

    /// Occasional longer distraction pause, independent of think time.
    pub async fn random_break(&self) {
        let roll: f64 = {
            let mut rng = rand::rng();
            rng.random_range(0.0..1.0)
        };
        if roll < 0.05 {
            self.pacing.sleep_ms(sample_ms(4_000, 8_000)).await;
        } else if roll < 0.25 {
            self.pacing.sleep_ms(sample_ms(500, 1_500)).await;
        }
    }

    /// Move the pointer along a curved path in 8–15 jittered increments.
    pub async fn move_pointer(&self, page: &Page, from: (f64, f64), to: (f64, f64)) {
        let plan: Vec<((f64, f64), u64)> = {
            let steps = {
                let mut rng = rand::rng();
                rng.random_range(8usize..=15)
            };
            curve_points(from, to, steps)
                .into_iter()
                .map(|p| (p, sample_ms(8, 35)))
                .collect()
        };

        for ((x, y), pause) in plan {
            let _ = page.move_mouse(Point::new(x, y)).await;
            self.pacing.sleep_ms(pause).await;
        }
    }

    /// Click a random point within the middle 30–70% band of `rect`, after a
    /// short pointer approach and a randomized press pause.
    pub async fn click_rect(&self, page: &Page, rect: crate::engine::locator::Rect) {
        let (target, approach_from, press_ms) = {
            let mut rng = rand::rng();
            let fx: f64 = rng.random_range(0.3..0.7);
            let fy: f64 = rng.random_range(0.3..0.7);
            let target = (rect.x + rect.width * fx, rect.y + rect.height * fy);
            let approach = (
                (target.0 + rng.random_range(-180.0..180.0f64)).max(0.0),
                (target.1 + rng.random_range(-120.0..120.0f64)).max(0.0),
            );
            (target, approach, rng.random_range(40u64..140))
        };

        self.move_pointer(page, approach_from, target).await;
        self.pacing.sleep_ms(press_ms).await;
        let _ = page.click(Point::new(target.0, target.1)).await;
    }

    /// Type `text` into `element` character by character with variable
    /// delays, occasional typo-and-backspace, and hesitation pauses. With a
    /// small probability the existing content is cleared first.
    pub async fn type_text(&self, page: &Page, element: &Element, text: &str) {
        // Sample the whole keystroke plan up front.
        #[derive(Clone)]
        enum Key {
            Char(char),
            Backspace,
            Pause(u64),
        }
        let (clear_first, plan): (bool, Vec<(Key, u64)>) = {
            let mut rng = rand::rng();
            let clear_first = rng.random_bool(0.08);
            let mut plan = Vec::new();
            for ch in text.chars() {
                if ch.is_ascii_alphanumeric() && rng.random_bool(0.04) {
                    let wrong = neighbor_key(ch, rng.random_range(0u8..4));
                    plan.push((Key::Char(wrong), rng.random_range(60u64..160)));
                    plan.push((Key::Pause(rng.random_range(150u64..450)), 0));
                    plan.push((Key::Backspace, rng.random_range(80u64..200)));
                }
                if rng.random_bool(0.06) {
                    plan.push((Key::Pause(rng.random_range(300u64..900)), 0));
                }
                plan.push((Key::Char(ch), rng.random_range(40u64..150)));
            }
            (clear_first, plan)
        };

        let _ = element.focus().await;
        if clear_first {
            // Select-all-delete via the native setter; per-key deletion on a
            // long prefill reads as robotic anyway.
            let _ = crate::engine::locator::set_marked_value(page, "").await;
        }

        let mut buf = [0u8; 4];
        for (key, delay) in plan {
            match key {
                Key::Char(ch) => {
                    let _ = element.type_str(ch.encode_utf8(&mut buf)).await;
                }
                Key::Backspace => {
                    let _ = element.press_key("Backspace").await;
                }
                Key::Pause(ms) => {
                    self.pacing.sleep_ms(ms).await;
                }
            }
            self.pacing.sleep_ms(delay).await;
        }
    }

    /// Reading pause scaled to page length, followed by randomized scroll
    /// bursts with an occasional small reverse scroll.
    pub async fn read_page(&self, page: &Page, word_count: usize) {
        // ~240 words/minute, clamped to keep pathological pages sane.
        let base_ms = ((word_count as u64).saturating_mul(250) / 240).clamp(800, 6_000);
        let read_ms = {
            let jitter = sample_ms(0, base_ms / 3 + 1);
            base_ms + jitter
        };
        self.pacing.sleep_ms(read_ms).await;

        let bursts: Vec<(i64, u64, bool, i64)> = {
            let mut rng = rand::rng();
            let passes = rng.random_range(2usize..5);
            (0..passes)
                .map(|_| {
                    (
                        rng.random_range(200i64..650),
                        rng.random_range(250u64..1_100),
                        rng.random_bool(0.2),
                        rng.random_range(60i64..180),
                    )
                })
                .collect()
        };

        for (down, pause, reverse, up) in bursts {
            let _ = page
                .evaluate(format!(
                    "window.scrollBy({{top: {}, behavior: 'smooth'}});",
                    down
                ))
                .await;
            self.pacing.sleep_ms(pause).await;
            if reverse {
                let _ = page
                    .evaluate(format!(
                        "window.scrollBy({{top: -{}, behavior: 'smooth'}});",
                        up
                    ))
                    .await;
                self.pacing.sleep_ms(200).await;
            }
        }
    }
}

/// A plausible adjacent key for a typo. Not a real keyboard map — close
/// enough that transcripts read like fat-finger noise.
fn neighbor_key(ch: char, salt: u8) -> char {
    const ROWS: [&str; 4] = ["qwertyuiop", "asdfghjkl", "zxcvbnm", "1234567890"];
    let lower = ch.to_ascii_lowercase();
    for row in ROWS {
        if let Some(idx) = row.find(lower) {
            let bytes = row.as_bytes();
            let next = match salt % 2 {
                0 if idx + 1 < bytes.len() => bytes[idx + 1],
                _ if idx > 0 => bytes[idx - 1],
                _ => bytes[(idx + 1).min(bytes.len() - 1)],
            };
            let out = next as char;
            return if ch.is_ascii_uppercase() {
                out.to_ascii_uppercase()
            } else {
                out
            };
        }
    }
    ch
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn curve_never_degenerates_to_endpoints_only() {
        let pts = curve_points((0.0, 0.0), (500.0, 300.0), 12);
        assert_eq!(pts.len(), 12);
        // Final point must land on the target.
        let last = pts.last().unwrap();
        assert!((last.0 - 500.0).abs() < 1e-6);
        assert!((last.1 - 300.0).abs() < 1e-6);
        // Intermediate points exist between the endpoints.
        assert!(pts.len() > 2);
    }

    #[test]
    fn neighbor_key_stays_on_keyboard() {
        for ch in "abcxyz019".chars() {
            let n = neighbor_key(ch, 1);
            assert!(n.is_ascii_alphanumeric());
            assert_ne!(n, ' ');
        }
        // Unknown characters pass through unchanged.
        assert_eq!(neighbor_key('é', 0), 'é');
    }

    #[test]
    fn neighbor_key_preserves_case() {
        let n = neighbor_key('A', 0);
        assert!(n.is_ascii_uppercase());
    }

    #[tokio::test]
    async fn zero_pacing_does_not_sleep() {
        let pacing = Pacing::zero();
        let start = std::time::Instant::now();
        pacing.sleep_ms(10_000).await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn think_buckets_are_instant_under_zero_pacing() {
        let h = Humanizer::new(Pacing::zero(), 1.0);
        let start = std::time::Instant::now();
        h.think(Think::Review).await;
        h.random_break().await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn humanize_probability_is_clamped() {
        let h = Humanizer::new(Pacing::zero(), 42.0);
        assert!(h.humanize_probability <= 1.0);
    }
}
