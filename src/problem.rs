use core::fmt;
use std::rc::Rc;

use crate::{bc::Constraint, error::SimError, state::NUM_FIELDS};

/// Bottom friction law.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Friction {
    #[default]
    None,
    /// `S_q = -g μ q`
    Linear { coefficient: f64 },
    /// Semi-implicit Manning law with roughness `n`.
    Manning { n: f64 },
}

impl Friction {
    pub fn coefficient(&self) -> f64 {
        match *self {
            Friction::None => 0.0,
            Friction::Linear { coefficient } => coefficient,
            Friction::Manning { n } => n,
        }
    }
}

/// Mass matrix used by the high-order update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MassMatrix {
    Lumped,
    #[default]
    Consistent,
}

/// A band `start ≤ x ≤ start + length` of the domain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Zone {
    pub start: f64,
    pub length: f64,
}

impl Zone {
    pub fn new(start: f64, length: f64) -> Self {
        Self { start, length }
    }

    pub fn is_active(&self) -> bool {
        self.length > 0.0
    }

    pub fn end(&self) -> f64 {
        self.start + self.length
    }
}

/// Wave generation zone (outer edge at `start`) and absorption zone (outer edge at `end`).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RelaxationZones {
    pub generation: Option<Zone>,
    pub absorption: Option<Zone>,
}

impl RelaxationZones {
    pub fn generation(&self) -> Option<Zone> {
        self.generation.filter(Zone::is_active)
    }

    pub fn absorption(&self) -> Option<Zone> {
        self.absorption.filter(Zone::is_active)
    }

    pub fn is_active(&self) -> bool {
        self.generation().is_some() || self.absorption().is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parameters {
    pub(crate) gravity: f64,
    pub(crate) friction: Friction,
    pub(crate) zones: RelaxationZones,
    pub(crate) time_order: usize,
    pub(crate) cfl: f64,
    pub(crate) mass_matrix: MassMatrix,
    pub(crate) dispersion: f64,
    pub(crate) still_water_level: f64,
    pub(crate) reflecting_boundaries: bool,
    pub(crate) check_positivity: bool,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            gravity: 9.81,
            friction: Friction::None,
            zones: RelaxationZones::default(),
            time_order: 3,
            cfl: 0.25,
            mass_matrix: MassMatrix::Consistent,
            dispersion: 1.0,
            still_water_level: 0.0,
            reflecting_boundaries: false,
            check_positivity: true,
        }
    }
}

impl Parameters {
    pub fn with_gravity(mut self, g: f64) -> Self {
        self.gravity = g;
        self
    }

    pub fn with_friction(mut self, friction: Friction) -> Self {
        self.friction = friction;
        self
    }

    pub fn with_generation_zone(mut self, start: f64, length: f64) -> Self {
        self.zones.generation = Some(Zone::new(start, length));
        self
    }

    pub fn with_absorption_zone(mut self, start: f64, length: f64) -> Self {
        self.zones.absorption = Some(Zone::new(start, length));
        self
    }

    pub fn with_time_order(mut self, order: usize) -> Self {
        self.time_order = order;
        self
    }

    pub fn with_cfl(mut self, cfl: f64) -> Self {
        self.cfl = cfl;
        self
    }

    pub fn with_mass_matrix(mut self, mass_matrix: MassMatrix) -> Self {
        self.mass_matrix = mass_matrix;
        self
    }

    /// `α` of the relaxation strength `α g / sqrt(m_i)`; zero turns dispersion off.
    pub fn with_dispersion(mut self, alpha: f64) -> Self {
        self.dispersion = alpha;
        self
    }

    pub fn with_still_water_level(mut self, level: f64) -> Self {
        self.still_water_level = level;
        self
    }

    pub fn with_reflecting_boundaries(mut self, on: bool) -> Self {
        self.reflecting_boundaries = on;
        self
    }

    pub fn with_positivity_check(mut self, on: bool) -> Self {
        self.check_positivity = on;
        self
    }

    pub fn gravity(&self) -> f64 {
        self.gravity
    }

    pub fn friction(&self) -> Friction {
        self.friction
    }

    pub fn zones(&self) -> &RelaxationZones {
        &self.zones
    }

    pub fn time_order(&self) -> usize {
        self.time_order
    }

    pub fn cfl(&self) -> f64 {
        self.cfl
    }

    pub fn mass_matrix(&self) -> MassMatrix {
        self.mass_matrix
    }

    pub fn dispersion(&self) -> f64 {
        self.dispersion
    }

    pub fn still_water_level(&self) -> f64 {
        self.still_water_level
    }

    pub fn reflecting_boundaries(&self) -> bool {
        self.reflecting_boundaries
    }

    pub fn validate(&self) -> Result<(), SimError> {
        let positive = |x: f64| x.is_finite() && x > 0.0;
        let non_negative = |x: f64| x.is_finite() && x >= 0.0;

        if !positive(self.gravity) {
            return Err(SimError::config(format!("gravity must be positive, got {}", self.gravity)));
        }
        if !(1..=3).contains(&self.time_order) {
            return Err(SimError::config(format!(
                "SSP order must be 1, 2 or 3, got {}",
                self.time_order
            )));
        }
        if !positive(self.cfl) || self.cfl > 1.0 {
            return Err(SimError::config(format!("CFL must lie in (0, 1], got {}", self.cfl)));
        }
        if !non_negative(self.friction.coefficient()) {
            return Err(SimError::config("friction coefficient must be non-negative"));
        }
        if !non_negative(self.dispersion) {
            return Err(SimError::config("dispersion strength must be non-negative"));
        }
        if !self.still_water_level.is_finite() {
            return Err(SimError::config("still water level must be finite"));
        }
        for zone in [self.zones.generation, self.zones.absorption].into_iter().flatten() {
            if !non_negative(zone.length) || !zone.start.is_finite() {
                return Err(SimError::config(format!("invalid relaxation zone {zone:?}")));
            }
        }
        if let (Some(g), Some(a)) = (self.zones.generation(), self.zones.absorption()) {
            if g.start < a.end() && a.start < g.end() {
                return Err(SimError::config("generation and absorption zones overlap"));
            }
        }
        Ok(())
    }
}

/// Initial state from the node position and the bathymetry there.
pub trait InitialCondition: Fn([f64; 2], f64) -> [f64; NUM_FIELDS] {}
impl<T> InitialCondition for T where T: Fn([f64; 2], f64) -> [f64; NUM_FIELDS] {}

/// Incident wave state `f(x, t)` imposed in the generation zone.
pub trait WaveConditions: Fn([f64; 2], f64) -> [f64; NUM_FIELDS] {}
impl<T> WaveConditions for T where T: Fn([f64; 2], f64) -> [f64; NUM_FIELDS] {}

pub struct Problem<'pb> {
    pub(crate) name: String,
    pub(crate) params: Parameters,
    pub(crate) u0: Rc<dyn InitialCondition + 'pb>,
    pub(crate) waves: Option<Rc<dyn WaveConditions + 'pb>>,
    pub(crate) constraints: Vec<Box<dyn Constraint + 'pb>>,
}

impl<'pb> Problem<'pb> {
    pub fn new(name: impl AsRef<str>, params: Parameters, u0: impl InitialCondition + 'pb) -> Self {
        Self {
            name: name.as_ref().to_string(),
            params,
            u0: Rc::new(u0),
            waves: None,
            constraints: Vec::new(),
        }
    }

    pub fn with_waves(mut self, waves: impl WaveConditions + 'pb) -> Self {
        self.waves = Some(Rc::new(waves));
        self
    }

    /// Constraints are enforced in insertion order; the last one wins on shared DOFs.
    pub fn with_constraint(mut self, constraint: impl Constraint + 'pb) -> Self {
        self.constraints.push(Box::new(constraint));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &Parameters {
        &self.params
    }

    pub fn validate(&self) -> Result<(), SimError> {
        self.params.validate()?;
        if self.params.zones.generation().is_some() && self.waves.is_none() {
            return Err(SimError::config("a generation zone needs wave conditions"));
        }
        Ok(())
    }

    pub(crate) fn wave_state(&self, x: [f64; 2], t: f64) -> Option<[f64; NUM_FIELDS]> {
        self.waves.as_ref().map(|w| w(x, t))
    }
}

impl fmt::Debug for Problem<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Problem")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("u0", &"<dyn InitialCondition>")
            .field("waves", &self.waves.as_ref().map(|_| "<dyn WaveConditions>"))
            .field(
                "constraints",
                &self.constraints.iter().map(|c| c.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
