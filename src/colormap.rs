//! Named colormaps and the categorical mask palette.
//!
//! Ramps follow the matplotlib colormaps of the same name: segmented maps use
//! their per-channel breakpoints, perceptual maps are sampled at 0.1 steps and
//! interpolated linearly in between.

use clap::ValueEnum;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum Colormap {
    #[default]
    Gray,
    Bone,
    Viridis,
    Plasma,
    Magma,
    Inferno,
    Hot,
    Jet,
    Coolwarm,
}

type Segments = &'static [(f32, f32)];

enum Ramp {
    Segmented { r: Segments, g: Segments, b: Segments },
    Uniform(&'static [[f32; 3]]),
}

const GRAY: Segments = &[(0.0, 0.0), (1.0, 1.0)];

const BONE_R: Segments = &[(0.0, 0.0), (0.746_032, 0.652_778), (1.0, 1.0)];
const BONE_G: Segments = &[
    (0.0, 0.0),
    (0.365_079, 0.319_444),
    (0.746_032, 0.777_778),
    (1.0, 1.0),
];
const BONE_B: Segments = &[(0.0, 0.0), (0.365_079, 0.444_444), (1.0, 1.0)];

const HOT_R: Segments = &[(0.0, 0.041_6), (0.365_079, 1.0), (1.0, 1.0)];
const HOT_G: Segments = &[(0.0, 0.0), (0.365_079, 0.0), (0.746_032, 1.0), (1.0, 1.0)];
const HOT_B: Segments = &[(0.0, 0.0), (0.746_032, 0.0), (1.0, 1.0)];

const JET_R: Segments = &[(0.0, 0.0), (0.35, 0.0), (0.66, 1.0), (0.89, 1.0), (1.0, 0.5)];
const JET_G: Segments = &[
    (0.0, 0.0),
    (0.125, 0.0),
    (0.375, 1.0),
    (0.64, 1.0),
    (0.91, 0.0),
    (1.0, 0.0),
];
const JET_B: Segments = &[(0.0, 0.5), (0.11, 1.0), (0.34, 1.0), (0.65, 0.0), (1.0, 0.0)];

const VIRIDIS: &[[f32; 3]] = &[
    [0.267, 0.005, 0.329],
    [0.283, 0.141, 0.458],
    [0.254, 0.265, 0.530],
    [0.207, 0.372, 0.553],
    [0.164, 0.471, 0.558],
    [0.128, 0.567, 0.551],
    [0.134, 0.658, 0.518],
    [0.267, 0.749, 0.441],
    [0.478, 0.821, 0.318],
    [0.741, 0.873, 0.150],
    [0.993, 0.906, 0.144],
];

const PLASMA: &[[f32; 3]] = &[
    [0.050, 0.030, 0.528],
    [0.254, 0.014, 0.615],
    [0.417, 0.001, 0.658],
    [0.562, 0.051, 0.642],
    [0.692, 0.165, 0.565],
    [0.798, 0.280, 0.470],
    [0.881, 0.393, 0.383],
    [0.949, 0.517, 0.295],
    [0.988, 0.652, 0.211],
    [0.988, 0.808, 0.145],
    [0.940, 0.975, 0.131],
];

const MAGMA: &[[f32; 3]] = &[
    [0.001, 0.000, 0.014],
    [0.081, 0.060, 0.200],
    [0.232, 0.060, 0.438],
    [0.390, 0.100, 0.502],
    [0.550, 0.161, 0.506],
    [0.716, 0.215, 0.475],
    [0.868, 0.288, 0.409],
    [0.967, 0.439, 0.360],
    [0.994, 0.624, 0.427],
    [0.997, 0.800, 0.558],
    [0.987, 0.991, 0.750],
];

const INFERNO: &[[f32; 3]] = &[
    [0.001, 0.000, 0.014],
    [0.087, 0.044, 0.224],
    [0.258, 0.039, 0.406],
    [0.416, 0.090, 0.433],
    [0.578, 0.148, 0.404],
    [0.735, 0.216, 0.330],
    [0.865, 0.317, 0.226],
    [0.955, 0.465, 0.099],
    [0.988, 0.645, 0.040],
    [0.964, 0.843, 0.273],
    [0.988, 0.998, 0.645],
];

const COOLWARM: &[[f32; 3]] = &[
    [0.230, 0.299, 0.754],
    [0.552, 0.690, 0.996],
    [0.865, 0.865, 0.865],
    [0.958, 0.604, 0.482],
    [0.706, 0.016, 0.150],
];

/// Ten distinct colours for mask labels, picked by enumeration order.
pub const TAB10: [[u8; 3]; 10] = [
    [0x1f, 0x77, 0xb4],
    [0xff, 0x7f, 0x0e],
    [0x2c, 0xa0, 0x2c],
    [0xd6, 0x27, 0x28],
    [0x94, 0x67, 0xbd],
    [0x8c, 0x56, 0x4b],
    [0xe3, 0x77, 0xc2],
    [0x7f, 0x7f, 0x7f],
    [0xbc, 0xbd, 0x22],
    [0x17, 0xbe, 0xcf],
];

/// Colour for the `i`-th label present in a volume.
pub fn categorical(i: usize) -> [u8; 3] {
    TAB10[i % TAB10.len()]
}

impl Colormap {
    fn ramp(&self) -> Ramp {
        match self {
            Colormap::Gray => Ramp::Segmented {
                r: GRAY,
                g: GRAY,
                b: GRAY,
            },
            Colormap::Bone => Ramp::Segmented {
                r: BONE_R,
                g: BONE_G,
                b: BONE_B,
            },
            Colormap::Hot => Ramp::Segmented {
                r: HOT_R,
                g: HOT_G,
                b: HOT_B,
            },
            Colormap::Jet => Ramp::Segmented {
                r: JET_R,
                g: JET_G,
                b: JET_B,
            },
            Colormap::Viridis => Ramp::Uniform(VIRIDIS),
            Colormap::Plasma => Ramp::Uniform(PLASMA),
            Colormap::Magma => Ramp::Uniform(MAGMA),
            Colormap::Inferno => Ramp::Uniform(INFERNO),
            Colormap::Coolwarm => Ramp::Uniform(COOLWARM),
        }
    }

    /// Colour at `t` in `[0, 1]`, channels in `[0, 1]`.
    pub fn rgb(&self, t: f32) -> [f32; 3] {
        let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
        match self.ramp() {
            Ramp::Segmented { r, g, b } => [segment(r, t), segment(g, t), segment(b, t)],
            Ramp::Uniform(table) => {
                let position = t * (table.len() - 1) as f32;
                let lower = position.floor() as usize;
                let upper = (lower + 1).min(table.len() - 1);
                let fraction = position - lower as f32;
                let (a, b) = (table[lower], table[upper]);
                [0, 1, 2].map(|c| a[c] + (b[c] - a[c]) * fraction)
            }
        }
    }

    pub fn rgb8(&self, t: f32) -> [u8; 3] {
        self.rgb(t).map(|c| (c * 255.0).round() as u8)
    }
}

fn segment(points: Segments, t: f32) -> f32 {
    for pair in points.windows(2) {
        let ((x0, y0), (x1, y1)) = (pair[0], pair[1]);
        if t <= x1 {
            if x1 <= x0 {
                return y1;
            }
            return y0 + (y1 - y0) * (t - x0) / (x1 - x0);
        }
    }
    points.last().map_or(0.0, |&(_, y)| y)
}
