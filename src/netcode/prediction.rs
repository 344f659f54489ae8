//! Client-side prediction and reconciliation against authoritative snapshots

use std::collections::VecDeque;

use crate::game::math::Vec2;

/// Outcome of comparing a prediction with server authority
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Correction {
    /// Prediction within threshold; keep the local state
    None,
    /// Snap to authority, then replay unacknowledged movement
    Snap { authoritative: Vec2, corrected: Vec2 },
}

#[derive(Debug, Clone, Copy)]
struct Predicted {
    sequence: u64,
    delta: Vec2,
    position: Vec2,
}

/// Tracks locally applied movement so it can be reconciled with snapshots
#[derive(Debug, Clone)]
pub struct ClientPredictor {
    threshold: f32,
    position: Vec2,
    history: VecDeque<Predicted>,
}

impl ClientPredictor {
    pub fn new(start: Vec2, threshold: f32) -> Self {
        Self {
            threshold,
            position: start,
            history: VecDeque::new(),
        }
    }

    pub fn position(&self) -> Vec2 {
        self.position
    }

    pub fn unacknowledged(&self) -> usize {
        self.history.len()
    }

    /// Apply a movement locally before the server confirms it
    pub fn apply_local(&mut self, sequence: u64, delta: Vec2) -> Vec2 {
        self.position += delta;
        self.history.push_back(Predicted {
            sequence,
            delta,
            position: self.position,
        });
        self.position
    }

    /// Reconcile against the authoritative position for `ack_sequence`
    pub fn reconcile(&mut self, ack_sequence: u64, authoritative: Vec2) -> Correction {
        let predicted = self
            .history
            .iter()
            .rev()
            .find(|p| p.sequence <= ack_sequence)
            .map(|p| p.position);
        while self.history.front().is_some_and(|p| p.sequence <= ack_sequence) {
            self.history.pop_front();
        }

        // with nothing acknowledged locally the prediction is wherever we are
        let predicted = predicted.unwrap_or(self.position);
        if predicted.distance(authoritative) <= self.threshold {
            return Correction::None;
        }

        let mut corrected = authoritative;
        for pending in self.history.iter_mut() {
            corrected += pending.delta;
            pending.position = corrected;
        }
        self.position = corrected;
        Correction::Snap {
            authoritative,
            corrected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn predictor_at_105(threshold: f32) -> ClientPredictor {
        let mut predictor = ClientPredictor::new(Vec2::new(100.0, 100.0), threshold);
        predictor.apply_local(1, Vec2::new(5.0, 0.0));
        predictor
    }

    #[test]
    fn small_error_is_left_alone() {
        let mut predictor = predictor_at_105(5.0);
        assert_eq!(predictor.reconcile(1, Vec2::new(103.0, 100.0)), Correction::None);
        assert_eq!(predictor.position(), Vec2::new(105.0, 100.0));
    }

    #[test]
    fn large_error_snaps_to_authority() {
        let mut predictor = predictor_at_105(1.0);
        let correction = predictor.reconcile(1, Vec2::new(103.0, 100.0));

        assert_eq!(
            correction,
            Correction::Snap {
                authoritative: Vec2::new(103.0, 100.0),
                corrected: Vec2::new(103.0, 100.0),
            }
        );
        assert_eq!(predictor.position(), Vec2::new(103.0, 100.0));
    }

    #[test]
    fn unacknowledged_moves_are_replayed_after_a_snap() {
        let mut predictor = predictor_at_105(1.0);
        predictor.apply_local(2, Vec2::new(0.0, 4.0));
        predictor.apply_local(3, Vec2::new(0.0, 4.0));

        let correction = predictor.reconcile(1, Vec2::new(103.0, 100.0));
        assert_eq!(
            correction,
            Correction::Snap {
                authoritative: Vec2::new(103.0, 100.0),
                corrected: Vec2::new(103.0, 108.0),
            }
        );
        assert_eq!(predictor.unacknowledged(), 2);

        // later acks compare against the replayed prediction
        assert_eq!(predictor.reconcile(3, Vec2::new(103.0, 108.0)), Correction::None);
        assert_eq!(predictor.unacknowledged(), 0);
    }
}
