//! Control values and harmony/rhythm linking.
//!
//! The host's parameter manager owns the authoritative values. Each callback
//! receives them as a `ControlState` by `&mut`, so the linker can write the
//! mirrored value back, and the executor captures its own copy at request
//! time.

use serde::{Deserialize, Serialize};

/// Host float values above this threshold switch sync mode on.
pub const SYNC_THRESHOLD: f32 = 0.5;

/// Snapshot of every control the stream reads.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct ControlState {
    /// Harmonic morph amount in [0, 1].
    pub harmony: f32,
    /// Rhythmic morph amount in [0, 1].
    pub rhythm: f32,
    /// Linear gain applied to the main input before buffering, in [0, 1].
    pub source_gain: f32,
    /// Linear gain applied to the sidechain before buffering, in [0, 1].
    pub sidechain_gain: f32,
    /// Link the harmony and rhythm sliders.
    pub sync: bool,
}

impl Default for ControlState {
    fn default() -> Self {
        Self {
            harmony: 0.0,
            rhythm: 0.0,
            source_gain: 1.0,
            sidechain_gain: 1.0,
            sync: false,
        }
    }
}

impl ControlState {
    /// Set `sync` from a host-provided float (boolean at 0.5).
    pub fn set_sync_value(&mut self, value: f32) {
        self.sync = value > SYNC_THRESHOLD;
    }

    /// Sync flag as the model sees it: `1.0` or `0.0`.
    pub fn sync_flag(&self) -> f32 {
        if self.sync {
            1.0
        } else {
            0.0
        }
    }

    /// Copy with every continuous control clamped into [0, 1].
    pub fn clamped(self) -> Self {
        Self {
            harmony: self.harmony.clamp(0.0, 1.0),
            rhythm: self.rhythm.clamp(0.0, 1.0),
            source_gain: self.source_gain.clamp(0.0, 1.0),
            sidechain_gain: self.sidechain_gain.clamp(0.0, 1.0),
            sync: self.sync,
        }
    }
}

/// Harmony/rhythm as seen by the previous callback.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ParameterSnapshot {
    pub harmony: f32,
    pub rhythm: f32,
}

impl From<&ControlState> for ParameterSnapshot {
    fn from(controls: &ControlState) -> Self {
        Self {
            harmony: controls.harmony,
            rhythm: controls.rhythm,
        }
    }
}

/// Which value the linker mirrored this callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkAction {
    None,
    /// Harmony changed; rhythm was overwritten.
    HarmonyToRhythm,
    /// Rhythm changed; harmony was overwritten.
    RhythmToHarmony,
}

/// Edge-triggered harmony/rhythm mirroring for sync mode.
#[derive(Debug, Clone, Default)]
pub struct ParameterLinker {
    previous: ParameterSnapshot,
}

impl ParameterLinker {
    pub fn new(initial: &ControlState) -> Self {
        Self {
            previous: ParameterSnapshot::from(initial),
        }
    }

    /// Mirror whichever slider moved since the last [`commit`](Self::commit).
    ///
    /// Harmony is checked first: if both moved in the same callback, rhythm
    /// takes harmony's value. Values are compared exactly, as the host
    /// reports them.
    pub fn link(&self, controls: &mut ControlState) -> LinkAction {
        if !controls.sync {
            return LinkAction::None;
        }

        if controls.harmony != self.previous.harmony {
            controls.rhythm = controls.harmony;
            LinkAction::HarmonyToRhythm
        } else if controls.rhythm != self.previous.rhythm {
            controls.harmony = controls.rhythm;
            LinkAction::RhythmToHarmony
        } else {
            LinkAction::None
        }
    }

    /// Remember this callback's values for the next edge check.
    pub fn commit(&mut self, controls: &ControlState) {
        self.previous = ParameterSnapshot::from(controls);
    }

    /// Re-seed the snapshot, e.g. on stream restart.
    pub fn reset(&mut self, controls: &ControlState) {
        self.commit(controls);
    }

    pub fn previous(&self) -> ParameterSnapshot {
        self.previous
    }
}
