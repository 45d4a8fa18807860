//! Arenas: groups of units sharing one physical enclosure.
//!
//! A unit belongs to at most one arena at a time. Arenas are built for
//! one episode from the free pool and hand their units back when the
//! episode ends.

use chrono::{DateTime, Utc};

use evostim_protocol::types::UnitId;
use evostim_protocol::{UnitChannel, UnitReply, UnitRequest};

use crate::config::Config;
use crate::error::RunError;

/// A connected unit daemon, claimed exclusively by one arena.
pub struct UnitStub {
    pub unit_id: UnitId,
    pub channel: UnitChannel,
    pub in_use: bool,
}

impl UnitStub {
    pub fn new(channel: UnitChannel) -> Self {
        Self { unit_id: channel.unit_id(), channel, in_use: false }
    }
}

/// Free pool of connected units.
pub struct UnitPool {
    stubs: Vec<UnitStub>,
}

impl UnitPool {
    pub fn new(stubs: Vec<UnitStub>) -> Self {
        Self { stubs }
    }

    /// Claim a unit for an arena. Fails when the unit is unknown or
    /// already belongs to another arena.
    pub fn claim(&mut self, unit_id: UnitId) -> anyhow::Result<UnitStub> {
        let position = self
            .stubs
            .iter()
            .position(|s| s.unit_id == unit_id)
            .ok_or_else(|| anyhow::anyhow!("no connected unit with id {unit_id}"))?;
        let mut stub = self.stubs.remove(position);
        if stub.in_use {
            anyhow::bail!("unit {unit_id} is already claimed by another arena");
        }
        stub.in_use = true;
        Ok(stub)
    }

    pub fn release(&mut self, stubs: Vec<UnitStub>) {
        for mut stub in stubs {
            stub.in_use = false;
            self.stubs.push(stub);
        }
    }

    pub fn stubs_mut(&mut self) -> impl Iterator<Item = &mut UnitStub> {
        self.stubs.iter_mut()
    }
}

/// Suitability of one arena given its temperature readings: every
/// reading must sit within the tolerance band around the target, and
/// no two readings may differ by more than `max_spread`. The value
/// rewards arenas whose wax has cooled furthest below the band's
/// upper edge; an arena that is not entirely good is worth nothing.
pub fn suitability(readings: &[f64], target: f64, tolerance: f64, max_spread: f64) -> f64 {
    let mut value = 0.0;
    let mut good = true;
    for &reading in readings {
        if reading > target + tolerance || reading < target - tolerance {
            good = false;
        } else {
            value += target + tolerance - reading;
        }
    }
    if good {
        for (i, &a) in readings.iter().enumerate() {
            for &b in &readings[i + 1..] {
                if (a - b).abs() > max_spread {
                    good = false;
                }
            }
        }
    }
    if good {
        value
    } else {
        0.0
    }
}

/// An ordered group of units plus the scoring roles they play during
/// a trial: the unit at `selected_roi_index` (and any below
/// `active_unit_count`) runs the stimulus, the rest replay passively.
pub struct Arena {
    pub index: usize,
    stubs: Vec<UnitStub>,
    active_unit_count: usize,
    pub selected_roi_index: usize,
}

impl Arena {
    pub fn new(index: usize, stubs: Vec<UnitStub>, active_unit_count: usize) -> Self {
        Self { index, stubs, active_unit_count, selected_roi_index: 0 }
    }

    pub fn unit_count(&self) -> usize {
        self.stubs.len()
    }

    /// The unit whose region of interest is scored as active.
    pub fn active_unit_id(&self) -> UnitId {
        self.stubs[self.selected_roi_index].unit_id
    }

    pub fn stubs_mut(&mut self) -> impl Iterator<Item = &mut UnitStub> {
        self.stubs.iter_mut()
    }

    /// Hand the units back to the free pool.
    pub fn release(self, pool: &mut UnitPool) {
        pool.release(self.stubs);
    }

    fn is_active(&self, position: usize) -> bool {
        position == self.selected_roi_index || position < self.active_unit_count
    }

    /// Read every unit's wax temperature and score the arena's
    /// readiness for a trial. Returns the suitability value and the
    /// raw readings.
    pub async fn status(&mut self, config: &Config) -> Result<(f64, Vec<f64>), RunError> {
        let mut readings = Vec::with_capacity(self.stubs.len());
        for stub in &mut self.stubs {
            let reply = stub
                .channel
                .request(&UnitRequest::ReadStatus, config.timeouts.control)
                .await
                .map_err(|e| RunError::from_channel(stub.unit_id, "ReadStatus", e))?;
            match reply {
                UnitReply::Reading { temperature } => readings.push(temperature),
                _ => {
                    return Err(RunError::UnexpectedReply {
                        unit_id: stub.unit_id,
                        command: "ReadStatus",
                    })
                }
            }
        }
        let value = suitability(
            &readings,
            config.target_temperature,
            config.temperature_tolerance,
            config.max_temperature_spread,
        );
        tracing::info!(arena = self.index, value, ?readings, "Arena status");
        Ok((value, readings))
    }

    /// Run one stimulus trial across the whole arena: every unit gets
    /// its run command before any reply is collected, so playback
    /// starts in lockstep; then all replies are awaited. There is no
    /// partial completion: a missing reply aborts the trial. Returns
    /// the wall-clock instant active playback began.
    pub async fn run_stimulus(
        &mut self,
        parameters: &[f64],
        config: &Config,
        replay: std::time::Duration,
    ) -> Result<DateTime<Utc>, RunError> {
        let timeout = replay + config.timeouts.margin;
        let roles: Vec<bool> = (0..self.stubs.len()).map(|i| self.is_active(i)).collect();
        for (stub, &active) in self.stubs.iter_mut().zip(&roles) {
            let request = if active {
                UnitRequest::RunActive { parameters: parameters.to_vec() }
            } else {
                UnitRequest::RunPassive
            };
            stub.channel
                .send(&request)
                .await
                .map_err(|e| RunError::from_channel(stub.unit_id, request.name(), e))?;
        }
        let mut started_at = None;
        for (stub, &active) in self.stubs.iter_mut().zip(&roles) {
            let command = if active { "RunActive" } else { "RunPassive" };
            let reply = stub
                .channel
                .receive(command, timeout)
                .await
                .map_err(|e| RunError::from_channel(stub.unit_id, command, e))?;
            tracing::debug!(unit_id = stub.unit_id, ?reply, "Run reply");
            match reply {
                UnitReply::Done => {}
                UnitReply::Started { started_at: at } => started_at = Some(at),
                UnitReply::Rejected { reason } => {
                    return Err(RunError::ProtocolViolation {
                        unit_id: stub.unit_id,
                        command,
                        reason,
                    })
                }
                UnitReply::Reading { .. } => {
                    return Err(RunError::UnexpectedReply { unit_id: stub.unit_id, command })
                }
            }
        }
        started_at.ok_or(RunError::UnexpectedReply {
            unit_id: self.active_unit_id(),
            command: "RunActive",
        })
    }

    /// Blow airflow on every unit to disperse the subjects between
    /// trials.
    pub async fn spread_subjects(&mut self, duration: f64, config: &Config) -> Result<(), RunError> {
        let request = UnitRequest::SpreadSubjects { duration };
        for stub in &mut self.stubs {
            stub.channel
                .send(&request)
                .await
                .map_err(|e| RunError::from_channel(stub.unit_id, "SpreadSubjects", e))?;
        }
        let timeout = std::time::Duration::from_secs_f64(duration.max(0.0)) + config.timeouts.margin;
        for stub in &mut self.stubs {
            let reply = stub
                .channel
                .receive("SpreadSubjects", timeout)
                .await
                .map_err(|e| RunError::from_channel(stub.unit_id, "SpreadSubjects", e))?;
            if let UnitReply::Rejected { reason } = reply {
                return Err(RunError::ProtocolViolation {
                    unit_id: stub.unit_id,
                    command: "SpreadSubjects",
                    reason,
                });
            }
        }
        Ok(())
    }

    /// Column names for the per-frame metric log, in region order.
    pub fn metric_column_names(&self) -> Vec<String> {
        match self.stubs.len() {
            1 => vec!["background".into(), "previous_iteration".into()],
            2 => vec![
                "active_background".into(),
                "active_previous_iteration".into(),
                "passive_background".into(),
                "passive_previous_iteration".into(),
            ],
            n => (0..n)
                .flat_map(|i| {
                    [format!("roi-{i}_background"), format!("roi-{i}_previous_iteration")]
                })
                .collect(),
        }
    }
}
