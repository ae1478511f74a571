use crate::{
    comm::Communicator,
    error::SimError,
    mesh::{Mesh, REFLECTING_TAG},
    state::{DofState, Field, NUM_FIELDS},
};

/// Relative tolerance of the height positivity check.
pub const POSITIVITY_EPS: f64 = 1e-5;

/// Strong modification of the state on a fixed set of DOFs.
pub trait Constraint {
    /// Resolves the DOFs the constraint acts on, once per mesh.
    fn bind(&mut self, mesh: &Mesh);
    fn dofs(&self) -> &[usize];
    fn apply(&self, mesh: &Mesh, t: f64, u: &mut DofState);
    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Walls {
    All,
    Tagged(i32),
}

/// Slip walls: removes the momentum component along the outward normal.
#[derive(Debug, Clone)]
pub struct Reflecting {
    walls: Walls,
    dofs: Vec<usize>,
    normals: Vec<[f64; 2]>,
}

impl Reflecting {
    /// Every boundary DOF.
    pub fn all() -> Self {
        Self::with_walls(Walls::All)
    }

    /// Boundary DOFs carrying the reflecting node tag.
    pub fn partial() -> Self {
        Self::with_walls(Walls::Tagged(REFLECTING_TAG))
    }

    fn with_walls(walls: Walls) -> Self {
        Self {
            walls,
            dofs: Vec::new(),
            normals: Vec::new(),
        }
    }
}

impl Constraint for Reflecting {
    fn bind(&mut self, mesh: &Mesh) {
        let normals = mesh.boundary_normals();
        let tags = mesh.node_tags();
        let (dofs, normals) = normals
            .into_iter()
            .enumerate()
            .filter(|(i, n)| {
                let on_boundary = n[0] != 0.0 || n[1] != 0.0;
                match self.walls {
                    Walls::All => on_boundary,
                    Walls::Tagged(tag) => on_boundary && tags[*i] == tag,
                }
            })
            .unzip();
        self.dofs = dofs;
        self.normals = normals;
    }

    fn dofs(&self) -> &[usize] {
        &self.dofs
    }

    fn apply(&self, _mesh: &Mesh, _t: f64, u: &mut DofState) {
        for (&i, &[nx, ny]) in self.dofs.iter().zip(&self.normals) {
            let hu = u.value(i, Field::Hu);
            let hv = u.value(i, Field::Hv);
            let tangential = hu * ny - hv * nx;
            u.set_value(i, Field::Hu, tangential * ny);
            u.set_value(i, Field::Hv, -tangential * nx);
        }
    }

    fn name(&self) -> &'static str {
        match self.walls {
            Walls::All => "reflecting",
            Walls::Tagged(_) => "partially reflecting",
        }
    }
}

/// Strong Dirichlet condition `u_f(x_i) = g(x_i, t)` on the selected DOFs.
pub struct Dirichlet<S, G> {
    field: Field,
    select: S,
    value: G,
    dofs: Vec<usize>,
}

impl<S, G> Dirichlet<S, G>
where
    S: Fn([f64; 2]) -> bool,
    G: Fn([f64; 2], f64) -> f64,
{
    pub fn new(field: Field, select: S, value: G) -> Self {
        Self {
            field,
            select,
            value,
            dofs: Vec::new(),
        }
    }
}

impl<S, G> Constraint for Dirichlet<S, G>
where
    S: Fn([f64; 2]) -> bool,
    G: Fn([f64; 2], f64) -> f64,
{
    fn bind(&mut self, mesh: &Mesh) {
        self.dofs = select_dofs(mesh, &self.select);
    }

    fn dofs(&self) -> &[usize] {
        &self.dofs
    }

    fn apply(&self, mesh: &Mesh, t: f64, u: &mut DofState) {
        for &i in &self.dofs {
            u.set_value(i, self.field, (self.value)(mesh.coords()[i], t));
        }
    }

    fn name(&self) -> &'static str {
        "dirichlet"
    }
}

/// DOFs overridden by an external callback, field by field.
///
/// The callback sees the current state of the DOF and returns `Some` for
/// each field it wants to impose.
pub struct ConstrainedDofs<S, C> {
    select: S,
    callback: C,
    dofs: Vec<usize>,
}

impl<S, C> ConstrainedDofs<S, C>
where
    S: Fn([f64; 2]) -> bool,
    C: Fn([f64; 2], f64, [f64; NUM_FIELDS]) -> [Option<f64>; NUM_FIELDS],
{
    pub fn new(select: S, callback: C) -> Self {
        Self {
            select,
            callback,
            dofs: Vec::new(),
        }
    }
}

impl<S, C> Constraint for ConstrainedDofs<S, C>
where
    S: Fn([f64; 2]) -> bool,
    C: Fn([f64; 2], f64, [f64; NUM_FIELDS]) -> [Option<f64>; NUM_FIELDS],
{
    fn bind(&mut self, mesh: &Mesh) {
        self.dofs = select_dofs(mesh, &self.select);
    }

    fn dofs(&self) -> &[usize] {
        &self.dofs
    }

    fn apply(&self, mesh: &Mesh, t: f64, u: &mut DofState) {
        for &i in &self.dofs {
            let imposed = (self.callback)(mesh.coords()[i], t, u.row(i));
            for (field, value) in Field::ALL.into_iter().zip(imposed) {
                if let Some(value) = value {
                    u.set_value(i, field, value);
                }
            }
        }
    }

    fn name(&self) -> &'static str {
        "constrained dofs"
    }
}

fn select_dofs(mesh: &Mesh, select: impl Fn([f64; 2]) -> bool) -> Vec<usize> {
    mesh.coords()
        .iter()
        .enumerate()
        .filter(|(_, x)| select(**x))
        .map(|(i, _)| i)
        .collect()
}

/// Fails when `min(h) < -ε max(h)` over all ranks.
pub fn check_positivity(u: &DofState, comm: &dyn Communicator) -> Result<(), SimError> {
    let h_max = comm.all_reduce_max(u.max(Field::H));
    let h_min = comm.all_reduce_min(u.min(Field::H));
    if h_min < -POSITIVITY_EPS * h_max {
        let dof = (0..u.len())
            .find(|&i| u.value(i, Field::H) == h_min)
            .unwrap_or(0);
        return Err(SimError::NegativeHeight { dof, value: h_min });
    }
    Ok(())
}
