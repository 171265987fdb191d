//! Chamber records, pin mapping and the digital output boundary.
//!
//! `ChamberRegistry` is the only owner of chamber state. Pins are driven
//! through `drive`, which keeps at most one line of a pair active.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Instant;

use eyre::WrapErr;
use perfusion_traits::{Clock, DigitalOutput};

use crate::config::{PinMap, PinPair};
use crate::error::Result;
use crate::hw_error::map_hw_error;

/// Number of chamber slots.
pub const CHAMBERS: usize = 8;

/// Chamber number, `1..=8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChamberId(u8);

impl ChamberId {
    pub fn new(n: u8) -> Option<Self> {
        (1..=CHAMBERS as u8).contains(&n).then_some(Self(n))
    }

    /// All chambers, ascending.
    pub fn all() -> impl Iterator<Item = Self> {
        (1..=CHAMBERS as u8).map(Self)
    }

    pub const fn get(self) -> u8 {
        self.0
    }

    #[inline]
    fn index(self) -> usize {
        debug_assert!((1..=CHAMBERS as u8).contains(&self.0), "chamber id out of range");
        usize::from(self.0) - 1
    }
}

impl fmt::Display for ChamberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChamberStatus {
    Unused,
    Running,
    CalculatingTime,
    RemovingMedia,
    AddingMedia,
}

impl fmt::Display for ChamberStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unused => "Unused",
            Self::Running => "Running",
            Self::CalculatingTime => "Calculating Time",
            Self::RemovingMedia => "Removing Media",
            Self::AddingMedia => "Adding Media",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Chamber {
    pub id: ChamberId,
    pub in_use: bool,
    pub status: ChamberStatus,
    pub last_changed: Option<Instant>,
    pub media_volume_ml: f32,
}

impl Chamber {
    fn unused(id: ChamberId) -> Self {
        Self {
            id,
            in_use: false,
            status: ChamberStatus::Unused,
            last_changed: None,
            media_volume_ml: 0.0,
        }
    }
}

/// One of the two actuator lines of a chamber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Line {
    Remove,
    Add,
}

impl Line {
    const fn opposite(self) -> Self {
        match self {
            Self::Remove => Self::Add,
            Self::Add => Self::Remove,
        }
    }

    const fn pin(self, pair: PinPair) -> u8 {
        match self {
            Self::Remove => pair.remove_pin,
            Self::Add => pair.add_pin,
        }
    }
}

pub struct ChamberRegistry<O: DigitalOutput> {
    chambers: [Chamber; CHAMBERS],
    pins: PinMap,
    outputs: O,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl<O: DigitalOutput> fmt::Debug for ChamberRegistry<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChamberRegistry")
            .field("chambers", &self.chambers)
            .field("pins", &self.pins)
            .finish_non_exhaustive()
    }
}

impl<O: DigitalOutput> ChamberRegistry<O> {
    /// Create a registry with every chamber unused. Pins are not touched;
    /// call `reset_all` to force a known output state.
    pub fn new(pins: PinMap, outputs: O, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        let chambers = std::array::from_fn(|i| Chamber::unused(ChamberId(i as u8 + 1)));
        Self {
            chambers,
            pins,
            outputs,
            clock,
        }
    }

    pub fn chamber(&self, id: ChamberId) -> &Chamber {
        &self.chambers[id.index()]
    }

    pub(crate) fn chamber_mut(&mut self, id: ChamberId) -> &mut Chamber {
        &mut self.chambers[id.index()]
    }

    pub fn chambers(&self) -> &[Chamber] {
        &self.chambers
    }

    pub fn pins(&self, id: ChamberId) -> PinPair {
        self.pins.0[id.index()]
    }

    /// Ids of chambers currently in use, ascending.
    pub fn in_use(&self) -> Vec<ChamberId> {
        self.chambers
            .iter()
            .filter(|c| c.in_use)
            .map(|c| c.id)
            .collect()
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    /// Return every chamber to unused and force every pin inactive.
    ///
    /// All pins are attempted; the first failure is returned afterwards.
    pub fn reset_all(&mut self) -> Result<()> {
        for c in &mut self.chambers {
            *c = Chamber::unused(c.id);
        }
        self.de_energize_all()
    }

    fn de_energize_all(&mut self) -> Result<()> {
        let mut first_err: Option<eyre::Report> = None;
        for pin in self.pins.all_pins().collect::<Vec<_>>() {
            if let Err(e) = self.outputs.set(pin, false) {
                let mapped = map_hw_error(&*e);
                tracing::warn!(pin, error = %mapped, "failed to de-energize pin");
                if first_err.is_none() {
                    first_err =
                        Some(eyre::Report::new(mapped).wrap_err(format!("de-energize pin {pin}")));
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn activate(&mut self, id: ChamberId) {
        let now = self.clock.now();
        let c = self.chamber_mut(id);
        c.in_use = true;
        c.status = ChamberStatus::Running;
        c.last_changed = Some(now);
        tracing::debug!(chamber = %id, "chamber activated");
    }

    pub fn deactivate(&mut self, id: ChamberId) {
        let c = self.chamber_mut(id);
        c.in_use = false;
        c.status = ChamberStatus::Unused;
        c.last_changed = None;
        tracing::debug!(chamber = %id, "chamber deactivated");
    }

    /// Activate (`true`) or deactivate (`false`) every chamber.
    pub fn select_all(&mut self, selected: bool) {
        for id in ChamberId::all() {
            if selected {
                self.activate(id);
            } else {
                self.deactivate(id);
            }
        }
    }

    /// Stamp `last_changed` on every chamber in use.
    pub(crate) fn restamp_in_use(&mut self, at: Instant) {
        for c in self.chambers.iter_mut().filter(|c| c.in_use) {
            c.last_changed = Some(at);
        }
    }

    /// Adjust the tracked reservoir volume; the result is clamped at zero.
    pub fn add_volume(&mut self, id: ChamberId, delta_ml: f32) {
        if !delta_ml.is_finite() {
            tracing::warn!(chamber = %id, delta_ml, "ignoring non-finite volume delta");
            return;
        }
        let c = self.chamber_mut(id);
        c.media_volume_ml = (c.media_volume_ml + delta_ml).max(0.0);
        tracing::info!(chamber = %id, delta_ml, volume_ml = c.media_volume_ml, "volume adjusted");
    }

    /// `add_volume` for every chamber not Unused.
    pub fn add_volume_all(&mut self, delta_ml: f32) {
        for id in self.in_use() {
            self.add_volume(id, delta_ml);
        }
    }

    pub fn empty(&mut self, id: ChamberId) {
        self.chamber_mut(id).media_volume_ml = 0.0;
        tracing::info!(chamber = %id, "volume set to zero");
    }

    pub fn empty_all_in_use(&mut self) {
        for id in self.in_use() {
            self.empty(id);
        }
    }

    /// Set one line of a chamber. Activating a line first forces the
    /// opposite line inactive.
    pub fn drive(&mut self, id: ChamberId, line: Line, active: bool) -> Result<()> {
        let pair = self.pins(id);
        if active {
            self.write(line.opposite().pin(pair), false)?;
        }
        let pin = line.pin(pair);
        self.write(pin, active)
            .wrap_err_with(|| format!("chamber {id} {line:?} line"))?;
        tracing::trace!(chamber = %id, ?line, pin, active, "line driven");
        Ok(())
    }

    /// Force both lines of a chamber inactive, trying both even if one fails.
    pub fn release(&mut self, id: ChamberId) -> Result<()> {
        let pair = self.pins(id);
        let remove = self.write(pair.remove_pin, false);
        let add = self.write(pair.add_pin, false);
        remove.and(add)
    }

    fn write(&mut self, pin: u8, active: bool) -> Result<()> {
        self.outputs
            .set(pin, active)
            .map_err(|e| eyre::Report::new(map_hw_error(&*e)))
            .wrap_err_with(|| format!("set pin {pin} {}", if active { "high" } else { "low" }))
    }

    /// Borrow the registry for a monitoring stage; dropping the guard resets
    /// every chamber and de-energises every pin.
    pub fn take_control(&mut self) -> ActuatorGuard<'_, O> {
        ActuatorGuard { registry: self }
    }
}

impl<O: DigitalOutput> Drop for ChamberRegistry<O> {
    fn drop(&mut self) {
        if let Err(e) = self.de_energize_all() {
            tracing::warn!(error = %e, "de-energize on drop failed");
        }
    }
}

/// Scoped control of the registry. Resets on drop, including unwinding.
pub struct ActuatorGuard<'a, O: DigitalOutput> {
    registry: &'a mut ChamberRegistry<O>,
}

impl<O: DigitalOutput> Deref for ActuatorGuard<'_, O> {
    type Target = ChamberRegistry<O>;

    fn deref(&self) -> &Self::Target {
        self.registry
    }
}

impl<O: DigitalOutput> DerefMut for ActuatorGuard<'_, O> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.registry
    }
}

impl<O: DigitalOutput> Drop for ActuatorGuard<'_, O> {
    fn drop(&mut self) {
        if let Err(e) = self.registry.reset_all() {
            tracing::warn!(error = %e, "reset on guard release failed");
        } else {
            tracing::debug!("actuators released");
        }
    }
}
