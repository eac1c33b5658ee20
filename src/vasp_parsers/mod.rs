pub mod procar;
pub mod poscar;
pub mod kpoints;
