//! Note-to-frequency math.
//!
//! Pure functions: the engine consumes frequencies, never notes. Note 69 is
//! concert A at 440 Hz in every tuning; other notes differ per tuning by
//! their semitone ratio table, and fine tune shifts the result in cents.

/// Concert pitch in Hz, note 69.
pub const CONCERT_A_FREQ: f32 = 440.0;
/// MIDI note number of concert A.
pub const CONCERT_A_NOTE: i32 = 69;

/// Fine-tune bounds in cents, one semitone either way.
pub const MAX_FINE_TUNE: i32 = 100;

/// Semitone ratio system used to derive pitches from note numbers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Tuning {
    /// 12-tone equal temperament, ratio 2^(1/12) per semitone.
    #[default]
    Equal12,
    /// 5-limit just intonation ratios.
    JustIntonation,
    /// Pythagorean (3-limit) ratios.
    Pythagorean,
}

/// Just intonation ratios for the 12 semitones above the tonic.
const JUST_RATIOS: [f64; 12] = [
    1.0,
    16.0 / 15.0,
    9.0 / 8.0,
    6.0 / 5.0,
    5.0 / 4.0,
    4.0 / 3.0,
    45.0 / 32.0,
    3.0 / 2.0,
    8.0 / 5.0,
    5.0 / 3.0,
    16.0 / 9.0,
    15.0 / 8.0,
];

/// Pythagorean ratios for the 12 semitones above the tonic.
const PYTHAGOREAN_RATIOS: [f64; 12] = [
    1.0,
    256.0 / 243.0,
    9.0 / 8.0,
    32.0 / 27.0,
    81.0 / 64.0,
    4.0 / 3.0,
    729.0 / 512.0,
    3.0 / 2.0,
    128.0 / 81.0,
    27.0 / 16.0,
    16.0 / 9.0,
    243.0 / 128.0,
];

/// Ratio between a note `semitones` away from concert A and concert A.
fn transpose_factor(tuning: Tuning, semitones: i32) -> f64 {
    let octaves = semitones.div_euclid(12);
    let step = semitones.rem_euclid(12) as usize;
    let within = match tuning {
        Tuning::Equal12 => libm::exp2(f64::from(step as u32) / 12.0),
        Tuning::JustIntonation => JUST_RATIOS[step],
        Tuning::Pythagorean => PYTHAGOREAN_RATIOS[step],
    };
    libm::exp2(f64::from(octaves)) * within
}

/// Frequency of `note` under `tuning`, shifted by `fine_tune` cents.
///
/// `fine_tune` is clamped to ±[`MAX_FINE_TUNE`].
pub fn note_to_freq(tuning: Tuning, note: i32, fine_tune: i32) -> f32 {
    let fine = fine_tune.clamp(-MAX_FINE_TUNE, MAX_FINE_TUNE);
    let semitone_factor = transpose_factor(tuning, note - CONCERT_A_NOTE);
    let cent_factor = libm::exp2(f64::from(fine) / 1200.0);
    (f64::from(CONCERT_A_FREQ) * semitone_factor * cent_factor) as f32
}

/// Nearest note to `freq` under `tuning`.
pub fn note_from_freq(tuning: Tuning, freq: f32) -> i32 {
    if freq <= 0.0 {
        return 0;
    }
    // Octave first, then the closest table entry by log distance.
    let ratio = f64::from(freq) / f64::from(CONCERT_A_FREQ);
    let semitones = 12.0 * libm::log2(ratio);
    let guess = libm::round(semitones) as i32;
    let mut best = guess;
    let mut best_dist = f64::INFINITY;
    for candidate in guess - 1..=guess + 1 {
        let f = transpose_factor(tuning, candidate);
        let dist = libm::fabs(libm::log2(ratio / f));
        if dist < best_dist {
            best_dist = dist;
            best = candidate;
        }
    }
    best + CONCERT_A_NOTE
}
