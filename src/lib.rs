pub mod types;
pub mod selection;
pub mod vasp_parsers;
pub mod kpath;
pub mod dos;
pub mod projection;

pub use types::Result;

pub use selection::{
    ORBITALS,
    OrbitalKey,
    OrbitalSelector,
    Resolved,
    Selector,
};

pub use vasp_parsers::procar::Procar;
pub use vasp_parsers::poscar::Poscar;
pub use vasp_parsers::kpoints::Kpoints;

pub use projection::{
    BandStructure,
    Projections,
};
