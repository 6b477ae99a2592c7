//! Key-lock state machine
//!
//! Decides, tick by tick, whether the freshly correlated key is reported or
//! whether a previously locked key keeps being reported. Locking needs a
//! streak of agreeing ticks (shortened for unambiguous material), switching
//! away from a lock needs a longer streak, and relative-key flips are
//! suppressed unless the new reading is very confident.

use std::collections::{BTreeMap, VecDeque};

use crate::config::{ConfidenceTier, LockConfig};
use crate::key::{Detection, Key, KeyCandidate};

/// Whether a key is currently locked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockPhase {
    Unlocked,
    Locked,
}

/// How a lock was acquired or moved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    QuickLock,
    Lock,
    FastSwitch,
    Switch,
}

/// Long-lived lock state owned by one detector
#[derive(Debug, Clone, PartialEq)]
pub struct LockState {
    current_key: Option<Key>,
    current_confidence: f32,
    lock_strength: f32,
    votes: BTreeMap<Key, f32>,
    same_key_counter: usize,
    high_confidence_counter: usize,
    adaptive_lock_frames: usize,
    adaptive_unlock_frames: usize,
    last_detected: Option<Key>,
    recent_detections: VecDeque<(Key, f32)>,
    rms_history: VecDeque<f32>,
    confidence_history: VecDeque<f32>,
}

impl LockState {
    /// Empty state with the initial frame counts of `config`
    pub fn new(config: &LockConfig) -> Self {
        Self {
            current_key: None,
            current_confidence: 0.0,
            lock_strength: 0.0,
            votes: BTreeMap::new(),
            same_key_counter: 0,
            high_confidence_counter: 0,
            adaptive_lock_frames: config.frames_to_lock,
            adaptive_unlock_frames: config.frames_to_unlock,
            last_detected: None,
            recent_detections: VecDeque::with_capacity(config.recent_detections),
            rms_history: VecDeque::with_capacity(config.signal_history),
            confidence_history: VecDeque::with_capacity(config.signal_history),
        }
    }

    pub fn phase(&self) -> LockPhase {
        match self.current_key {
            Some(_) => LockPhase::Locked,
            None => LockPhase::Unlocked,
        }
    }

    pub fn current_key(&self) -> Option<Key> {
        self.current_key
    }

    pub fn current_confidence(&self) -> f32 {
        self.current_confidence
    }

    pub fn lock_strength(&self) -> f32 {
        self.lock_strength
    }

    pub fn votes(&self) -> &BTreeMap<Key, f32> {
        &self.votes
    }

    pub fn same_key_counter(&self) -> usize {
        self.same_key_counter
    }

    pub fn high_confidence_counter(&self) -> usize {
        self.high_confidence_counter
    }

    /// Current (lock, unlock) frame requirements
    pub fn adaptive_frames(&self) -> (usize, usize) {
        (self.adaptive_lock_frames, self.adaptive_unlock_frames)
    }

    pub fn recent_detections(&self) -> impl Iterator<Item = &(Key, f32)> {
        self.recent_detections.iter()
    }

    /// Key with the largest accumulated vote
    pub fn vote_leader(&self) -> Option<Key> {
        self.votes
            .iter()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(key, _)| *key)
    }
}

/// The state machine: configuration plus the state it mutates
#[derive(Debug, Clone)]
pub struct KeyLock {
    config: LockConfig,
    state: LockState,
}

impl KeyLock {
    pub fn new(config: LockConfig) -> Self {
        let state = LockState::new(&config);
        Self { config, state }
    }

    pub fn state(&self) -> &LockState {
        &self.state
    }

    pub fn phase(&self) -> LockPhase {
        self.state.phase()
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Back to the initial empty state
    pub fn reset(&mut self) {
        self.state = LockState::new(&self.config);
    }

    /// Feed one tick's candidate and the window RMS, get the reported key
    pub fn update(&mut self, candidate: &KeyCandidate, rms: f32) -> Detection {
        let confidence = candidate.confidence;
        let detected = candidate.key;

        self.track_signal(rms, confidence);
        self.decay_votes();

        let threshold = self.effective_threshold(rms);
        if confidence < threshold {
            return self.low_confidence(confidence, threshold);
        }

        push_bounded(
            &mut self.state.recent_detections,
            (detected, confidence),
            self.config.recent_detections,
        );
        *self.state.votes.entry(detected).or_insert(0.0) += confidence;

        match self.state.current_key {
            None => self.update_unlocked(detected, confidence),
            Some(current) if current == detected => self.hold(current, confidence),
            Some(current) => self.contest(current, detected, confidence),
        }
    }

    /// Record RMS and confidence; retune the frame requirements once deep enough
    fn track_signal(&mut self, rms: f32, confidence: f32) {
        let capacity = self.config.signal_history;
        push_bounded(&mut self.state.rms_history, rms, capacity);
        push_bounded(&mut self.state.confidence_history, confidence, capacity);

        if self.state.rms_history.len() < self.config.min_signal_history {
            return;
        }

        let band = self.config.band_for(mean(&self.state.rms_history));
        let tier = self.config.tier_for(mean(&self.state.confidence_history));
        let (lock, unlock) = self.config.adaptive_frames(band, tier);
        if (lock, unlock) != self.state.adaptive_frames() {
            tracing::debug!(band = band.name, ?tier, lock, unlock, "adaptive frames changed");
        }
        self.state.adaptive_lock_frames = lock;
        self.state.adaptive_unlock_frames = unlock;
    }

    fn decay_votes(&mut self) {
        let decay = self.config.vote_decay;
        let floor = self.config.vote_floor;
        self.state.votes.retain(|_, weight| {
            *weight *= decay;
            *weight >= floor
        });
    }

    /// Base threshold scaled by loudness and historical confidence
    fn effective_threshold(&self, rms: f32) -> f32 {
        let warmed_up = self.state.rms_history.len() >= self.config.min_signal_history;
        let (level, tier_factor) = if warmed_up {
            let tier = self.config.tier_for(mean(&self.state.confidence_history));
            (
                mean(&self.state.rms_history),
                self.config.tier_threshold_factor(tier),
            )
        } else {
            (rms, self.config.tier_threshold_factor(ConfidenceTier::Medium))
        };
        self.config.confidence_threshold
            * self.config.band_for(level).threshold_multiplier
            * tier_factor
    }

    fn low_confidence(&mut self, confidence: f32, threshold: f32) -> Detection {
        let state = &mut self.state;
        state.same_key_counter = 0;
        state.high_confidence_counter = 0;
        state.lock_strength *= self.config.low_confidence_decay;

        match state.current_key {
            Some(current) if state.lock_strength > self.config.hold_floor => {
                tracing::debug!(
                    key = %current,
                    confidence,
                    threshold,
                    "low confidence, holding lock"
                );
                Detection::reported(current, state.current_confidence)
            }
            _ => {
                tracing::trace!(confidence, threshold, "low confidence, nothing reported");
                Detection::unreported(confidence)
            }
        }
    }

    fn update_unlocked(&mut self, detected: Key, confidence: f32) -> Detection {
        let quick_bar = self.config.quick_lock_confidence;
        let state = &mut self.state;
        if state.last_detected == Some(detected) {
            state.same_key_counter += 1;
            if confidence > quick_bar {
                state.high_confidence_counter += 1;
            } else {
                state.high_confidence_counter = 0;
            }
        } else {
            state.same_key_counter = 1;
            state.high_confidence_counter = usize::from(confidence > quick_bar);
            state.last_detected = Some(detected);
        }

        if state.high_confidence_counter >= self.config.quick_lock_frames
            && self.has_consensus(detected)
        {
            return self.transition(detected, confidence, Transition::QuickLock);
        }

        tracing::debug!(
            key = %detected,
            count = self.state.same_key_counter,
            needed = self.state.adaptive_lock_frames,
            high = self.state.high_confidence_counter,
            confidence,
            "locking"
        );

        if self.state.same_key_counter >= self.state.adaptive_lock_frames {
            return self.transition(detected, confidence, Transition::Lock);
        }

        Detection::reported(detected, confidence)
    }

    /// Locked key seen again
    fn hold(&mut self, current: Key, confidence: f32) -> Detection {
        let smoothing = self.config.confidence_smoothing;
        let state = &mut self.state;
        state.same_key_counter = 0;
        state.high_confidence_counter = 0;
        state.lock_strength = (state.lock_strength + self.config.strengthen_step).min(1.0);
        state.current_confidence =
            smoothing * state.current_confidence + (1.0 - smoothing) * confidence;

        tracing::trace!(
            key = %current,
            strength = state.lock_strength,
            confidence,
            "holding"
        );
        Detection::reported(current, state.current_confidence)
    }

    /// A different key seen while locked
    fn contest(&mut self, current: Key, detected: Key, confidence: f32) -> Detection {
        let decay = self.config.contested_decay;
        self.state.high_confidence_counter = 0;

        if detected.is_relative_of(current)
            && confidence < self.config.relative_override_confidence
        {
            // A pending switch to another key keeps its count
            let state = &mut self.state;
            state.lock_strength *= decay;
            tracing::debug!(
                key = %detected,
                locked = %current,
                confidence,
                "relative key blocked"
            );
            return Detection::reported(current, state.current_confidence);
        }

        let state = &mut self.state;
        if state.last_detected == Some(detected) {
            state.same_key_counter += 1;
        } else {
            state.same_key_counter = 1;
            state.last_detected = Some(detected);
        }
        state.lock_strength *= decay;

        if confidence > self.config.fast_switch_confidence
            && self.state.same_key_counter >= self.config.fast_switch_frames
            && self.has_consensus(detected)
            && self.state.vote_leader() == Some(detected)
        {
            return self.transition(detected, confidence, Transition::FastSwitch);
        }

        tracing::debug!(
            key = %detected,
            locked = %current,
            count = self.state.same_key_counter,
            needed = self.state.adaptive_unlock_frames,
            strength = self.state.lock_strength,
            "switch pending"
        );

        if self.state.same_key_counter >= self.state.adaptive_unlock_frames {
            return self.transition(detected, confidence, Transition::Switch);
        }

        Detection::reported(current, self.state.current_confidence)
    }

    /// At least `min_consensus_detections` recent ticks, and enough of them on `key`
    fn has_consensus(&self, key: Key) -> bool {
        let recent = &self.state.recent_detections;
        if recent.len() < self.config.min_consensus_detections {
            return false;
        }
        let agreeing = recent.iter().filter(|(k, _)| *k == key).count();
        agreeing as f32 / recent.len() as f32 >= self.config.consensus_ratio
    }

    fn transition(&mut self, key: Key, confidence: f32, kind: Transition) -> Detection {
        let strength = match kind {
            Transition::QuickLock => self.config.quick_lock_strength,
            Transition::Lock => self.config.normal_lock_strength,
            Transition::FastSwitch => self.config.fast_switch_strength,
            Transition::Switch => self.config.switch_strength,
        };
        let previous = self.state.current_key;

        let state = &mut self.state;
        state.current_key = Some(key);
        state.current_confidence = confidence;
        state.lock_strength = strength.clamp(0.0, 1.0);
        state.same_key_counter = 0;
        state.high_confidence_counter = 0;

        match previous {
            Some(from) => tracing::info!(from = %from, to = %key, ?kind, confidence, "key switched"),
            None => tracing::info!(key = %key, ?kind, confidence, "key locked"),
        }
        Detection::reported(key, confidence)
    }
}

fn push_bounded<T>(ring: &mut VecDeque<T>, value: T, capacity: usize) {
    while ring.len() >= capacity.max(1) {
        ring.pop_front();
    }
    ring.push_back(value);
}

fn mean(values: &VecDeque<f32>) -> f32 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f32>() / values.len() as f32
    }
}
