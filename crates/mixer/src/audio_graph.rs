//! Gain-staged audio graph.
//!
//! Three cascaded gain stages: BIG and SMALL each feed master, master feeds
//! the output and any open recording taps. Until the graph is built, gains
//! are applied by multiplying directly into each track's native volume
//! ([`VolumeRouting::Direct`]). Once built, gains live in the graph's nodes
//! and the tracks are pinned to full volume ([`VolumeRouting::Routed`]).
//! The switch happens once and never reverts.

use gluewave_common::error::{GluewaveError, GluewaveResult};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::track::MediaTrack;

/// Blocks buffered per tap before new blocks are dropped.
pub const TAP_CAPACITY: usize = 256;

/// One of the three gain stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GainStage {
    Big,
    Small,
    Master,
}

/// Current values of the three stages, each in `[0.0, 1.0]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Gains {
    pub big: f64,
    pub small: f64,
    pub master: f64,
}

impl Default for Gains {
    fn default() -> Self {
        Self {
            big: 1.0,
            small: 1.0,
            master: 1.0,
        }
    }
}

impl Gains {
    pub fn get(&self, stage: GainStage) -> f64 {
        match stage {
            GainStage::Big => self.big,
            GainStage::Small => self.small,
            GainStage::Master => self.master,
        }
    }

    fn set(&mut self, stage: GainStage, value: f64) {
        match stage {
            GainStage::Big => self.big = value,
            GainStage::Small => self.small = value,
            GainStage::Master => self.master = value,
        }
    }
}

/// How gains currently reach the tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeRouting {
    /// No graph yet: `track volume = stage gain * master gain`.
    Direct,
    /// Graph built: gains live in nodes, tracks play at full volume.
    Routed { secondary_connected: bool },
}

/// Identifies an open tap.
pub type TapId = u64;

/// Receiving end of a master-output tap.
#[derive(Debug)]
pub struct AudioTap {
    pub id: TapId,
    pub sample_rate: u32,
    pub channels: u16,
    pub blocks: mpsc::Receiver<Vec<f32>>,
}

/// The audio engine behind the graph.
pub trait AudioBackend: Send {
    /// Create the engine context and the BIG and master nodes.
    fn create_context(&mut self) -> GluewaveResult<()>;

    fn sample_rate(&self) -> u32;

    fn channels(&self) -> u16;

    fn set_node_gain(&mut self, stage: GainStage, value: f64);

    /// Route SMALL through its node into master.
    fn connect_secondary(&mut self);

    /// Open a tap on the master output.
    fn open_tap(&mut self) -> GluewaveResult<AudioTap>;

    fn close_tap(&mut self, id: TapId);

    /// Mix one block of interleaved BIG and SMALL samples into master and
    /// deliver it to the open taps. Returns the master block.
    fn process(&mut self, big: &[f32], small: &[f32]) -> Vec<f32>;
}

/// In-process [`AudioBackend`]: sums interleaved `f32` blocks through the
/// three gains and fans the result out to taps.
#[derive(Debug)]
pub struct SoftwareMixer {
    sample_rate: u32,
    channels: u16,
    created: bool,
    node_gains: Gains,
    secondary_connected: bool,
    taps: Vec<(TapId, mpsc::Sender<Vec<f32>>)>,
    next_tap: TapId,
}

impl SoftwareMixer {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            created: false,
            node_gains: Gains::default(),
            secondary_connected: false,
            taps: Vec::new(),
            next_tap: 0,
        }
    }

    pub fn node_gains(&self) -> Gains {
        self.node_gains
    }

    pub fn open_taps(&self) -> usize {
        self.taps.len()
    }
}

impl Default for SoftwareMixer {
    fn default() -> Self {
        Self::new(48_000, 2)
    }
}

impl AudioBackend for SoftwareMixer {
    fn create_context(&mut self) -> GluewaveResult<()> {
        if self.sample_rate == 0 || self.channels == 0 {
            return Err(GluewaveError::audio(format!(
                "Invalid mixer format: {} Hz, {} channels",
                self.sample_rate, self.channels
            )));
        }
        self.created = true;
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn set_node_gain(&mut self, stage: GainStage, value: f64) {
        self.node_gains.set(stage, value);
    }

    fn connect_secondary(&mut self) {
        self.secondary_connected = true;
    }

    fn open_tap(&mut self) -> GluewaveResult<AudioTap> {
        if !self.created {
            return Err(GluewaveError::audio("Audio context not created"));
        }
        let (tx, rx) = mpsc::channel(TAP_CAPACITY);
        let id = self.next_tap;
        self.next_tap += 1;
        self.taps.push((id, tx));
        tracing::debug!(tap = id, "Opened master tap");
        Ok(AudioTap {
            id,
            sample_rate: self.sample_rate,
            channels: self.channels,
            blocks: rx,
        })
    }

    fn close_tap(&mut self, id: TapId) {
        let before = self.taps.len();
        self.taps.retain(|(tap, _)| *tap != id);
        if self.taps.len() != before {
            tracing::debug!(tap = id, "Closed master tap");
        }
    }

    fn process(&mut self, big: &[f32], small: &[f32]) -> Vec<f32> {
        let len = big.len().max(small.len());
        let mut out = vec![0.0f32; len];
        if !self.created {
            return out;
        }

        let gains = self.node_gains;
        let big_gain = (gains.big * gains.master) as f32;
        let small_gain = if self.secondary_connected {
            (gains.small * gains.master) as f32
        } else {
            0.0
        };

        for (i, sample) in big.iter().enumerate() {
            out[i] += sample * big_gain;
        }
        for (i, sample) in small.iter().enumerate() {
            out[i] += sample * small_gain;
        }

        self.taps.retain(|(id, tx)| match tx.try_send(out.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(tap = id, "Tap is full, dropping audio block");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(tap = id, "Tap receiver dropped");
                false
            }
        });

        out
    }
}

/// The three gain stages plus their routing state.
pub struct AudioGraph {
    backend: Box<dyn AudioBackend>,
    routing: VolumeRouting,
    gains: Gains,
}

impl AudioGraph {
    pub fn new(backend: Box<dyn AudioBackend>) -> Self {
        Self {
            backend,
            routing: VolumeRouting::Direct,
            gains: Gains::default(),
        }
    }

    pub fn routing(&self) -> VolumeRouting {
        self.routing
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.routing, VolumeRouting::Routed { .. })
    }

    pub fn gains(&self) -> Gains {
        self.gains
    }

    pub fn backend(&self) -> &dyn AudioBackend {
        self.backend.as_ref()
    }

    pub fn backend_mut(&mut self) -> &mut dyn AudioBackend {
        self.backend.as_mut()
    }

    /// Build the context and the BIG and master chain. Idempotent.
    ///
    /// Returns `false` without side effects when BIG has no source yet or
    /// the context cannot be created; callers retry on the next occasion.
    pub fn ensure_graph(&mut self, big: Option<&mut dyn MediaTrack>) -> bool {
        if self.is_ready() {
            return true;
        }
        let Some(big) = big else {
            tracing::debug!("Audio graph deferred: BIG not loaded");
            return false;
        };
        if let Err(e) = self.backend.create_context() {
            tracing::warn!(error = %e, "Audio graph deferred");
            return false;
        }

        self.backend.set_node_gain(GainStage::Big, self.gains.big);
        self.backend.set_node_gain(GainStage::Master, self.gains.master);
        big.set_volume(1.0);
        self.routing = VolumeRouting::Routed {
            secondary_connected: false,
        };
        tracing::info!(
            big = self.gains.big,
            master = self.gains.master,
            "Audio graph built"
        );
        true
    }

    /// Route SMALL through the graph once both exist. Idempotent.
    pub fn ensure_secondary_connected(&mut self, small: Option<&mut dyn MediaTrack>) -> bool {
        match self.routing {
            VolumeRouting::Direct => false,
            VolumeRouting::Routed {
                secondary_connected: true,
            } => true,
            VolumeRouting::Routed {
                secondary_connected: false,
            } => {
                let Some(small) = small else {
                    return false;
                };
                self.backend.set_node_gain(GainStage::Small, self.gains.small);
                self.backend.connect_secondary();
                small.set_volume(1.0);
                self.routing = VolumeRouting::Routed {
                    secondary_connected: true,
                };
                tracing::info!(small = self.gains.small, "SMALL routed through graph");
                true
            }
        }
    }

    /// Set a stage to `value`, clamped into `[0.0, 1.0]`.
    ///
    /// With the graph built the node changes in place. Before that, the
    /// direct product is written into the tracks' native volume.
    pub fn set_gain(
        &mut self,
        stage: GainStage,
        value: f64,
        big: Option<&mut dyn MediaTrack>,
        small: Option<&mut dyn MediaTrack>,
    ) {
        let value = if value.is_finite() {
            value.clamp(0.0, 1.0)
        } else {
            tracing::warn!(?stage, value, "Ignoring non-finite gain");
            return;
        };
        self.gains.set(stage, value);

        match self.routing {
            VolumeRouting::Routed { .. } => self.backend.set_node_gain(stage, value),
            VolumeRouting::Direct => self.apply_direct(big, small),
        }
    }

    /// Reapply direct volumes, e.g. after a source is replaced pre-graph.
    pub fn apply_direct(
        &self,
        big: Option<&mut dyn MediaTrack>,
        small: Option<&mut dyn MediaTrack>,
    ) {
        if self.routing != VolumeRouting::Direct {
            return;
        }
        if let Some(big) = big {
            big.set_volume(self.gains.big * self.gains.master);
        }
        if let Some(small) = small {
            small.set_volume(self.gains.small * self.gains.master);
        }
    }

    pub fn open_tap(&mut self) -> GluewaveResult<AudioTap> {
        if !self.is_ready() {
            return Err(GluewaveError::audio("Audio graph not built"));
        }
        self.backend.open_tap()
    }

    pub fn close_tap(&mut self, id: TapId) {
        self.backend.close_tap(id);
    }

    /// Pull one block from each track and run it through the graph.
    pub fn pump(
        &mut self,
        frames: usize,
        big: Option<&mut dyn MediaTrack>,
        small: Option<&mut dyn MediaTrack>,
    ) -> Vec<f32> {
        let sample_rate = self.backend.sample_rate();
        let channels = self.backend.channels();
        let len = frames * channels as usize;

        let mut big_block = vec![0.0f32; len];
        let mut small_block = vec![0.0f32; len];
        if let Some(big) = big {
            big.read_audio(sample_rate, channels, &mut big_block);
        }
        if let Some(small) = small {
            small.read_audio(sample_rate, channels, &mut small_block);
        }
        self.backend.process(&big_block, &small_block)
    }
}

impl std::fmt::Debug for AudioGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioGraph")
            .field("routing", &self.routing)
            .field("gains", &self.gains)
            .finish()
    }
}
