use image::Rgb;
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Seed of the class palette. Fixed so colors are stable across requests.
pub const PALETTE_SEED: u64 = 42;

/// Maps a class index to a display color.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette {
    colors: Vec<Rgb<u8>>,
}

impl Palette {
    pub fn seeded(num_classes: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let colors = (0..num_classes).map(|_| Rgb(rng.gen::<[u8; 3]>())).collect();
        Self { colors }
    }

    /// Out-of-range indices render black.
    pub fn color(&self, class: u8) -> Rgb<u8> {
        self.colors
            .get(usize::from(class))
            .copied()
            .unwrap_or(Rgb([0, 0, 0]))
    }
}
