//! Progress interpolation
//!
//! A multi-phase flash shows one continuous bar: each phase maps the SDK's
//! [0, 1] progress into its own integer sub-range.

/// Integer progress sub-range `[min, max]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressRange {
    pub min: u32,
    pub max: u32,
}

impl ProgressRange {
    /// Whole bar
    pub const FULL: ProgressRange = ProgressRange { min: 0, max: 100 };

    pub const fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    /// Range of the core-module phase of a flash with `module_count` modules
    pub fn first_phase(module_count: usize) -> Self {
        Self::new(0, phase_split(module_count))
    }

    /// Range of the remainder phase of a flash with `module_count` modules
    pub fn remainder_phase(module_count: usize) -> Self {
        Self::new(phase_split(module_count), 100)
    }

    /// `min + progress * (max - min)`, with progress clamped to [0, 1] and
    /// the result truncated
    pub fn scale(&self, progress: f32) -> u32 {
        let progress = if progress.is_nan() { 0.0 } else { progress.clamp(0.0, 1.0) };
        let span = self.max.saturating_sub(self.min) as f32;
        self.min + (progress * span) as u32
    }
}

fn phase_split(module_count: usize) -> u32 {
    let count = u32::try_from(module_count.max(1)).unwrap_or(u32::MAX);
    100 / count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_full_range() {
        assert_eq!(ProgressRange::FULL.scale(0.5), 50);
        assert_eq!(ProgressRange::FULL.scale(0.0), 0);
        assert_eq!(ProgressRange::FULL.scale(1.0), 100);
    }

    #[test]
    fn test_scale_upper_half() {
        let range = ProgressRange::new(50, 100);
        assert_eq!(range.scale(0.0), 50);
        assert_eq!(range.scale(1.0), 100);
    }

    #[test]
    fn test_scale_truncates() {
        let range = ProgressRange::new(0, 14);
        assert_eq!(range.scale(0.5), 7);
        assert_eq!(range.scale(0.99), 13);
    }

    #[test]
    fn test_scale_clamps() {
        assert_eq!(ProgressRange::FULL.scale(-0.3), 0);
        assert_eq!(ProgressRange::FULL.scale(1.7), 100);
        assert_eq!(ProgressRange::FULL.scale(f32::NAN), 0);
    }

    #[test]
    fn test_phase_ranges() {
        assert_eq!(ProgressRange::first_phase(7), ProgressRange::new(0, 14));
        assert_eq!(ProgressRange::remainder_phase(7), ProgressRange::new(14, 100));
        assert_eq!(ProgressRange::first_phase(1), ProgressRange::new(0, 100));
        assert_eq!(ProgressRange::first_phase(0), ProgressRange::new(0, 100));
    }
}
