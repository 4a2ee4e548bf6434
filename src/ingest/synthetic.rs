//! Synthetic scenes for tests and dry runs.
//!
//! Figures are dark, person-shaped silhouettes (a body with a head) on a flat
//! background. All randomness comes from an explicit seed.

use image::{GrayImage, Luma};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::frame::Frame;

/// Renders frames containing evenly spaced silhouettes.
#[derive(Clone, Debug)]
pub struct SceneBuilder {
    width: u32,
    height: u32,
    background: u8,
    figure_shade: u8,
    body: (u32, u32),
    head_side: u32,
}

impl SceneBuilder {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            background: 200,
            figure_shade: 40,
            body: (24, 60),
            head_side: 14,
        }
    }

    /// Frame with `persons` silhouettes, all shifted right by `shift_x` pixels.
    pub fn render(&self, persons: usize, shift_x: i32) -> GrayImage {
        let mut image = GrayImage::from_pixel(self.width, self.height, Luma([self.background]));
        if persons == 0 {
            return image;
        }

        let (body_w, body_h) = self.body;
        let figure_h = body_h + self.head_side;
        let top = (self.height as i32 - figure_h as i32) / 2;
        let spacing = self.width as i32 / (persons as i32 + 1);

        for i in 0..persons as i32 {
            let center_x = spacing * (i + 1) + shift_x;
            let head_x = center_x - self.head_side as i32 / 2;
            self.fill(&mut image, head_x, top, self.head_side, self.head_side);
            let body_x = center_x - body_w as i32 / 2;
            self.fill(&mut image, body_x, top + self.head_side as i32, body_w, body_h);
        }
        image
    }

    fn fill(&self, image: &mut GrayImage, x: i32, y: i32, w: u32, h: u32) {
        for py in y.max(0)..(y + h as i32).min(self.height as i32) {
            for px in x.max(0)..(x + w as i32).min(self.width as i32) {
                image.put_pixel(px as u32, py as u32, Luma([self.figure_shade]));
            }
        }
    }
}

/// Uniform random noise, reproducible from `seed`.
pub fn noise_frame(width: u32, height: u32, seed: u64) -> GrayImage {
    let mut rng = StdRng::seed_from_u64(seed);
    GrayImage::from_fn(width, height, |_, _| Luma([rng.gen::<u8>()]))
}

/// Endless source of walking silhouettes with occasional noise bursts.
pub struct SyntheticSource {
    scene: SceneBuilder,
    persons: usize,
    step_px: i32,
    noise_every: u64,
    frame_count: u64,
    rng: StdRng,
}

impl SyntheticSource {
    pub fn new(scene: SceneBuilder, persons: usize, seed: u64) -> Self {
        Self {
            scene,
            persons,
            step_px: 2,
            noise_every: 0,
            frame_count: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Horizontal drift per frame.
    pub fn with_step(mut self, step_px: i32) -> Self {
        self.step_px = step_px;
        self
    }

    /// Emit a pure-noise frame every `n` frames (0 disables).
    pub fn with_noise_every(mut self, n: u64) -> Self {
        self.noise_every = n;
        self
    }

    pub fn frames_generated(&self) -> u64 {
        self.frame_count
    }

    pub fn next_frame(&mut self) -> Frame {
        self.frame_count += 1;
        if self.noise_every > 0 && self.frame_count % self.noise_every == 0 {
            let seed = self.rng.gen();
            return Frame::from_luma(noise_frame(self.scene.width, self.scene.height, seed));
        }
        // Walk back and forth across a small range so figures stay in frame.
        let span = 16i64;
        let phase = (self.frame_count as i64 * self.step_px as i64).rem_euclid(2 * span);
        let shift = if phase < span { phase } else { 2 * span - phase };
        Frame::from_luma(self.scene.render(self.persons, shift as i32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_places_figures_on_background() {
        let frame = SceneBuilder::new(320, 240).render(2, 0);
        let dark = frame.pixels().filter(|p| p[0] == 40).count();
        assert_eq!(dark, 2 * (24 * 60 + 14 * 14));
    }

    #[test]
    fn noise_is_reproducible() {
        assert_eq!(noise_frame(16, 16, 7), noise_frame(16, 16, 7));
        assert_ne!(noise_frame(16, 16, 7), noise_frame(16, 16, 8));
    }

    fn luma(frame: Frame) -> GrayImage {
        frame.analysis_luma(64).unwrap()
    }

    #[test]
    fn source_emits_noise_on_schedule() {
        let scene = SceneBuilder::new(64, 96);
        let mut source = SyntheticSource::new(scene.clone(), 1, 3)
            .with_noise_every(2)
            .with_step(4);

        assert_eq!(luma(source.next_frame()), scene.render(1, 4));
        let noisy = luma(source.next_frame());
        assert!(noisy.pixels().any(|p| p[0] != 200 && p[0] != 40));
        assert_eq!(luma(source.next_frame()), scene.render(1, 12));
        assert_eq!(source.frames_generated(), 3);
    }

    #[test]
    fn figures_walk_back_inside_the_span() {
        let scene = SceneBuilder::new(64, 96);
        let mut source = SyntheticSource::new(scene.clone(), 1, 3).with_step(10);
        assert_eq!(luma(source.next_frame()), scene.render(1, 10));
        // 20 px of travel folds back to 12.
        assert_eq!(luma(source.next_frame()), scene.render(1, 12));
    }
}
