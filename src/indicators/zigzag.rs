// ATR-multiple zigzag over a single forward pass of (close, atr) pairs.
//
// A swing is only confirmed once price retraces by `atr_mult` ATRs from the
// running extreme, so every confirmation lags the extreme it names. Confirmed
// pivots are never revised.

use crate::models::{Pivot, PivotFeatures, PivotKind, StructureLabel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Seeking,
    TrendingUp,
    TrendingDown,
}

#[derive(Debug, Clone, Copy)]
struct Extreme {
    price: f64,
    index: usize,
    atr: f64,
}

#[derive(Debug)]
pub struct AtrZigzag {
    atr_mult: f64,
    state: State,
    next_index: usize,

    // Running extremes while no direction is established.
    seek_min: Option<Extreme>,
    seek_max: Option<Extreme>,
    // Candidate extreme of the current swing.
    candidate: Option<Extreme>,

    confirmed: Vec<Pivot>,

    // Forward-filled state for consumers.
    last_high: f64,
    last_low: f64,
    bars_since_high: Option<usize>,
    bars_since_low: Option<usize>,
    high_structure: Option<StructureLabel>,
    low_structure: Option<StructureLabel>,
    high_confirmed_now: bool,
    low_confirmed_now: bool,
}

impl AtrZigzag {
    pub fn new(atr_mult: f64) -> Self {
        Self {
            atr_mult,
            state: State::Seeking,
            next_index: 0,
            seek_min: None,
            seek_max: None,
            candidate: None,
            confirmed: Vec::new(),
            last_high: f64::NAN,
            last_low: f64::NAN,
            bars_since_high: None,
            bars_since_low: None,
            high_structure: None,
            low_structure: None,
            high_confirmed_now: false,
            low_confirmed_now: false,
        }
    }

    pub fn atr_mult(&self) -> f64 {
        self.atr_mult
    }

    pub fn pivots(&self) -> &[Pivot] {
        &self.confirmed
    }

    /// Forward-filled pivot columns as of the most recent bar fed in.
    pub fn features(&self) -> PivotFeatures {
        PivotFeatures {
            high_confirmed: self.high_confirmed_now,
            low_confirmed: self.low_confirmed_now,
            last_high: self.last_high,
            last_low: self.last_low,
            bars_since_high: self.bars_since_high,
            bars_since_low: self.bars_since_low,
            high_structure: self.high_structure,
            low_structure: self.low_structure,
        }
    }

    /// Feed the next bar. Returns the pivot confirmed on this bar, if any.
    pub fn update(&mut self, close: f64, atr: f64) -> Option<Pivot> {
        let index = self.next_index;
        self.next_index += 1;

        self.high_confirmed_now = false;
        self.low_confirmed_now = false;
        if let Some(n) = self.bars_since_high.as_mut() {
            *n += 1;
        }
        if let Some(n) = self.bars_since_low.as_mut() {
            *n += 1;
        }

        let threshold = self.atr_mult * atr;

        match self.state {
            State::Seeking => {
                let first_bar = self.seek_min.is_none();
                let bar = Extreme { price: close, index, atr };
                if self.seek_min.map_or(true, |m| close < m.price) {
                    self.seek_min = Some(bar);
                }
                if self.seek_max.map_or(true, |m| close > m.price) {
                    self.seek_max = Some(bar);
                }

                // The very first bar has no prior direction to break out of.
                if first_bar || threshold.is_nan() {
                    return None;
                }

                let min = self.seek_min.unwrap_or(bar);
                let max = self.seek_max.unwrap_or(bar);
                if close >= min.price + threshold {
                    // The running min becomes the swing anchor; it is not
                    // emitted as a confirmed pivot.
                    self.state = State::TrendingUp;
                    self.candidate = Some(Extreme { price: close, index, atr });
                } else if close <= max.price - threshold {
                    self.state = State::TrendingDown;
                    self.candidate = Some(Extreme { price: close, index, atr });
                }
                None
            }
            State::TrendingUp => {
                let cand = self.candidate.expect("trending state without candidate");
                if close > cand.price {
                    self.candidate = Some(Extreme { price: close, index, atr });
                    None
                } else if close <= cand.price - threshold {
                    let pivot = self.confirm(cand, index, PivotKind::High);
                    self.state = State::TrendingDown;
                    self.candidate = Some(Extreme { price: close, index, atr });
                    Some(pivot)
                } else {
                    None
                }
            }
            State::TrendingDown => {
                let cand = self.candidate.expect("trending state without candidate");
                if close < cand.price {
                    self.candidate = Some(Extreme { price: close, index, atr });
                    None
                } else if close >= cand.price + threshold {
                    let pivot = self.confirm(cand, index, PivotKind::Low);
                    self.state = State::TrendingUp;
                    self.candidate = Some(Extreme { price: close, index, atr });
                    Some(pivot)
                } else {
                    None
                }
            }
        }
    }

    fn confirm(&mut self, extreme: Extreme, confirmed_at: usize, kind: PivotKind) -> Pivot {
        let pivot = Pivot {
            index: extreme.index,
            price: extreme.price,
            atr_at_pivot: extreme.atr,
            confirmed_at_index: confirmed_at,
            kind,
        };

        match kind {
            PivotKind::High => {
                if !self.last_high.is_nan() {
                    self.high_structure = Some(if pivot.price > self.last_high {
                        StructureLabel::HigherHigh
                    } else {
                        StructureLabel::LowerHigh
                    });
                }
                self.last_high = pivot.price;
                self.bars_since_high = Some(0);
                self.high_confirmed_now = true;
            }
            PivotKind::Low => {
                if !self.last_low.is_nan() {
                    self.low_structure = Some(if pivot.price < self.last_low {
                        StructureLabel::LowerLow
                    } else {
                        StructureLabel::HigherLow
                    });
                }
                self.last_low = pivot.price;
                self.bars_since_low = Some(0);
                self.low_confirmed_now = true;
            }
        }

        self.confirmed.push(pivot);
        pivot
    }
}
