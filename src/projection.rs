use std::path::Path;

use anyhow::{
    bail,
    Context,
};
use log::debug;
use ndarray::{
    s,
    Array4,
    Array5,
    Axis,
};

use crate::types::{
    Cube,
    Mat33,
    Matrix,
    Result,
    Vector,
};
use crate::selection::{
    self,
    OrbitalSelector,
    Selector,
};
use crate::vasp_parsers::procar::Procar;
use crate::{dos, kpath};


/// Combined band-structure query result: the path coordinate, its segment
/// boundaries, a copy of the band energies and the projected weight of the
/// atom/orbital selection per `(ispin, ikpoint, iband)`.
pub struct BandStructure {
    pub kpath:      Vector<f64>,
    pub boundaries: Vector<f64>,
    pub eigvals:    Cube<f64>,
    pub weights:    Cube<f64>,
}


struct DosCache {
    energies: Vector<f64>,
    perband:  Array4<f64>,
}

struct KpathCache {
    cell:       Mat33<f64>,
    nkseg:      usize,
    path:       Vector<f64>,
    boundaries: Vector<f64>,
}


/// Query surface over one parsed projection file.
///
/// The parsed tensors stay immutable for the lifetime of the instance; the
/// derived DOS state is memoized and dropped whenever the broadening width,
/// the grid resolution or the k-point weights change. Recomputation happens
/// at the next read, so several setter calls in a row cost one recompute.
pub struct Projections {
    procar:      Procar,
    sigma:       f64,
    npoints:     usize,
    weights:     Matrix<f64>,
    dos_cache:   Option<DosCache>,
    kpath_cache: Option<KpathCache>,
}


impl Projections {
    pub fn from_file(path: &(impl AsRef<Path> + ?Sized), lsorbit: bool) -> Result<Self> {
        Ok(Self::new(Procar::from_file(path, lsorbit)?))
    }

    pub fn new(procar: Procar) -> Self {
        let weights = procar.weights.clone();
        Self {
            procar,
            sigma:       dos::DEFAULT_SIGMA,
            npoints:     dos::DEFAULT_NPOINTS,
            weights,
            dos_cache:   None,
            kpath_cache: None,
        }
    }

    pub fn nspin(&self)  -> usize { self.procar.nspin }
    pub fn nkpts(&self)  -> usize { self.procar.nkpts }
    pub fn nbands(&self) -> usize { self.procar.nbands }
    pub fn nions(&self)  -> usize { self.procar.nions }
    pub fn channels(&self) -> &[String] { &self.procar.nlm }

    pub fn sigma(&self) -> f64 { self.sigma }

    pub fn set_sigma(&mut self, sigma: f64) -> Result<()> {
        if sigma <= 0.0 {
            bail!("[DOS]: Broadening width must be positive, got {}", sigma);
        }
        self.sigma = sigma;
        self.dos_cache = None;
        Ok(())
    }

    pub fn npoints(&self) -> usize { self.npoints }

    pub fn set_npoints(&mut self, npoints: usize) -> Result<()> {
        if npoints < 2 {
            bail!("[DOS]: Energy grid needs at least two points, got {}", npoints);
        }
        self.npoints = npoints;
        self.dos_cache = None;
        Ok(())
    }

    pub fn kpoint_weights(&self) -> Matrix<f64> {
        self.weights.clone()
    }

    pub fn set_kpoint_weights(&mut self, weights: Matrix<f64>) -> Result<()> {
        if weights.dim() != self.weights.dim() {
            bail!("[DOS]: K-point weights shaped {:?}, expected {:?}", weights.dim(), self.weights.dim());
        }
        self.weights = weights;
        self.dos_cache = None;
        Ok(())
    }

    /// Drop any caller override and fall back to the parsed weights.
    pub fn restore_kpoint_weights(&mut self) {
        self.weights = self.procar.weights.clone();
        self.dos_cache = None;
    }

    pub fn projections(&self) -> Array5<f64> {
        self.procar.projections.clone()
    }

    pub fn eigenvalues(&self) -> Cube<f64> {
        self.procar.eigvals.clone()
    }

    pub fn kpoint_vectors(&self) -> Matrix<f64> {
        self.procar.kvecs.clone()
    }

    fn dos_cache(&mut self) -> Result<&DosCache> {
        if self.dos_cache.is_none() {
            debug!("[DOS]: Recomputing per-band DOS: sigma={}, npoints={}", self.sigma, self.npoints);
            let (energies, perband) =
                dos::perband_dos(&self.procar.eigvals, &self.weights, self.sigma, self.npoints)?;
            self.dos_cache = Some(DosCache { energies, perband });
        }
        // populated just above
        Ok(self.dos_cache.as_ref().unwrap())
    }

    pub fn total_dos(&mut self) -> Result<(Vector<f64>, Matrix<f64>)> {
        let cache = self.dos_cache()?;
        Ok((cache.energies.clone(), dos::total_dos(&cache.perband)))
    }

    /// Selection-projected DOS curves, one per spin channel.
    ///
    /// When the k-point selection is a strict subset of the mesh, every
    /// selected contribution is divided by its own k-point weight before the
    /// projection weight is applied, so an arbitrary subset is not biased by
    /// the mesh weighting. A full selection keeps the weighted contributions
    /// untouched. Zero-weight k-points cannot be re-normalized and fail the
    /// query.
    pub fn projected_dos(&mut self, atoms: &Selector, kpts: &Selector, orbitals: &OrbitalSelector)
        -> Result<(Vector<f64>, Matrix<f64>)>
    {
        let kidx = selection::resolve(kpts, self.procar.nkpts, "kpoints")?;
        let full = kidx.is_full(self.procar.nkpts);
        let kidx = kidx.indices();

        let pw = self.projected_weights(atoms, orbitals, &kidx)?;

        let (nspin, nbands) = (self.procar.nspin, self.procar.nbands);
        let npoints = self.npoints;
        let kweights = self.weights.clone();

        let cache = self.dos_cache()?;
        let mut curves = Matrix::<f64>::zeros((nspin, npoints));

        for ispin in 0 .. nspin {
            for (j, &ikpt) in kidx.iter().enumerate() {
                let renorm = if full {
                    1.0
                } else {
                    let w = kweights[(ispin, ikpt)];
                    if w == 0.0 {
                        bail!("[DOS]: K-point {} has zero weight, cannot re-normalize a subset selection", ikpt);
                    }
                    1.0 / w
                };

                for iband in 0 .. nbands {
                    let factor = pw[(ispin, j, iband)] * renorm;
                    curves.slice_mut(s![ispin, ..])
                        .scaled_add(factor, &cache.perband.slice(s![ispin, ikpt, iband, ..]));
                }
            }
        }

        Ok((cache.energies.clone(), curves))
    }

    /// Projection weight per `(ispin, selected-kpoint, iband)`: gather the
    /// selected k-points, sum the selected orbital channels, then the
    /// selected atoms.
    fn projected_weights(&self, atoms: &Selector, orbitals: &OrbitalSelector, kidx: &[usize]) -> Result<Cube<f64>> {
        let aidx = selection::resolve(atoms, self.procar.nions, "atoms")?.indices();
        let oidx = selection::resolve_orbitals(orbitals, self.procar.nlm.len())?.indices();

        let gathered = self.procar.projections
            .select(Axis(1), kidx)
            .select(Axis(4), &oidx)
            .select(Axis(3), &aidx);
        Ok(gathered.sum_axis(Axis(4)).sum_axis(Axis(3)))
    }

    /// Cumulative path coordinate and segment boundaries, cached per
    /// (basis, segment-length) pair. Both inputs come either from the caller
    /// or from the structural / path-segmentation collaborator files.
    pub fn kpath(&mut self, cell: Option<&Mat33<f64>>, nkseg: Option<usize>)
        -> Result<(Vector<f64>, Vector<f64>)>
    {
        let cell = cell.copied()
            .context("[KPATH]: No basis supplied; read one from a structural file first")?;
        let nkseg = nkseg
            .context("[KPATH]: No segment length supplied; read one from a path-segmentation file first")?;

        let cached = self.kpath_cache.as_ref()
            .map(|c| c.cell == cell && c.nkseg == nkseg)
            .unwrap_or(false);
        if !cached {
            let (path, boundaries) = kpath::kpath(&self.procar.kvecs, &cell, nkseg)?;
            self.kpath_cache = Some(KpathCache { cell, nkseg, path, boundaries });
        }

        // populated just above
        let c = self.kpath_cache.as_ref().unwrap();
        Ok((c.path.clone(), c.boundaries.clone()))
    }

    pub fn band_structure(&mut self,
                          atoms: &Selector,
                          orbitals: &OrbitalSelector,
                          cell: Option<&Mat33<f64>>,
                          nkseg: Option<usize>) -> Result<BandStructure>
    {
        let (path, boundaries) = self.kpath(cell, nkseg)?;

        let kidx = (0 .. self.procar.nkpts).collect::<Vec<usize>>();
        let weights = self.projected_weights(atoms, orbitals, &kidx)?;

        Ok(BandStructure {
            kpath: path,
            boundaries,
            eigvals: self.procar.eigvals.clone(),
            weights,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    // Projection magnitudes sum to unity for every band, so the full
    // selection reproduces the plain total DOS exactly.
    const SAMPLE: &str = r#"PROCAR lm decomposed
# of k-points:    2         # of bands:   2         # of ions:    1

 k-point     1 :    0.00000000 0.00000000 0.00000000     weight = 0.25000000

band     1 # energy   -1.00000000 # occ.   1.00000000

ion      s     py     pz    tot
  1  0.600  0.300  0.100  1.000

band     2 # energy    1.00000000 # occ.   0.00000000

ion      s     py     pz    tot
  1  0.500  0.250  0.250  1.000

 k-point     2 :    0.50000000 0.00000000 0.00000000     weight = 0.75000000

band     1 # energy   -0.50000000 # occ.   1.00000000

ion      s     py     pz    tot
  1  0.400  0.400  0.200  1.000

band     2 # energy    0.50000000 # occ.   0.00000000

ion      s     py     pz    tot
  1  0.300  0.350  0.350  1.000
"#;

    const EYE: Mat33<f64> = [[1.0, 0.0, 0.0],
                             [0.0, 1.0, 0.0],
                             [0.0, 0.0, 1.0]];

    fn sample() -> Projections {
        Projections::new(Procar::from_str(SAMPLE, false).unwrap())
    }

    fn all() -> (Selector, Selector, OrbitalSelector) {
        (Selector::Range(":".to_string()),
         Selector::Range(":".to_string()),
         OrbitalSelector::Range(":".to_string()))
    }

    #[test]
    fn test_full_selection_matches_total_dos() {
        let mut proj = sample();
        proj.set_sigma(0.1).unwrap();
        proj.set_npoints(301).unwrap();

        let (atoms, kpts, orbitals) = all();
        let (x, total) = proj.total_dos().unwrap();
        let (xp, pdos) = proj.projected_dos(&atoms, &kpts, &orbitals).unwrap();

        assert_eq!(x, xp);
        for ispin in 0 .. proj.nspin() {
            for i in 0 .. x.len() {
                let t = total[(ispin, i)];
                assert_abs_diff_eq!(pdos[(ispin, i)], t, epsilon = 1e-9 * t.abs().max(1.0));
            }
        }
    }

    #[test]
    fn test_subset_renormalizes_by_kpoint_weight() {
        let (atoms, _, orbitals) = all();
        let subset = Selector::Set(vec![1]);

        let mut weighted = sample();
        weighted.set_sigma(0.1).unwrap();
        weighted.set_npoints(301).unwrap();
        let (_, got) = weighted.projected_dos(&atoms, &subset, &orbitals).unwrap();

        // direct recomputation with unit weight at every k-point
        let mut unit = sample();
        unit.set_sigma(0.1).unwrap();
        unit.set_npoints(301).unwrap();
        let ones = Matrix::from_elem(unit.kpoint_weights().dim(), 1.0);
        unit.set_kpoint_weights(ones).unwrap();
        let (_, expect) = unit.projected_dos(&atoms, &subset, &orbitals).unwrap();

        for i in 0 .. got.len_of(Axis(1)) {
            assert_abs_diff_eq!(got[(0, i)], expect[(0, i)], epsilon = 1e-9);
        }
    }

    #[test]
    fn test_zero_weight_subset_fails() {
        let mut proj = sample();
        let zeroed = Matrix::from_shape_vec((1, 2), vec![0.25, 0.0]).unwrap();
        proj.set_kpoint_weights(zeroed).unwrap();

        let (atoms, _, orbitals) = all();
        assert!(proj.projected_dos(&atoms, &Selector::Set(vec![1]), &orbitals).is_err());

        // the full selection never divides, zero weights stay legal there
        let (_, kpts, _) = all();
        assert!(proj.projected_dos(&atoms, &kpts, &orbitals).is_ok());
    }

    #[test]
    fn test_orbital_subset_takes_its_share() {
        let mut proj = sample();
        proj.set_npoints(301).unwrap();

        let (atoms, kpts, _) = all();
        let s_only = OrbitalSelector::Set(vec!["s".into()]);
        let (x, sdos) = proj.projected_dos(&atoms, &kpts, &s_only).unwrap();
        let (_, total) = proj.total_dos().unwrap();

        // s-channel share is below the per-band total everywhere
        for i in 0 .. x.len() {
            assert!(sdos[(0, i)] <= total[(0, i)] + 1e-12);
        }
        assert!(sdos.iter().any(|&v| v > 0.0));
    }

    #[test]
    fn test_spin_channels_take_opposite_signs() {
        let sample = r#"PROCAR lm decomposed
# of k-points:    1         # of bands:   1         # of ions:    1

 k-point     1 :    0.00000000 0.00000000 0.00000000     weight = 1.00000000

band     1 # energy   -0.20000000 # occ.   1.00000000

ion      s    tot
  1  1.000  1.000

 k-point     1 :    0.00000000 0.00000000 0.00000000     weight = 1.00000000

band     1 # energy    0.30000000 # occ.   0.00000000

ion      s    tot
  1  1.000  1.000
"#;
        let mut proj = Projections::new(Procar::from_str(sample, false).unwrap());
        assert_eq!(proj.nspin(), 2);

        proj.set_npoints(301).unwrap();
        let (x, total) = proj.total_dos().unwrap();

        // spin up fills the positive half-plane, spin down the negative one
        assert!(total.slice(s![0usize, ..]).iter().all(|&v| v >= 0.0));
        assert!(total.slice(s![1usize, ..]).iter().all(|&v| v <= 0.0));

        let imin = total.slice(s![1usize, ..]).iter().enumerate()
            .min_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .unwrap().0;
        assert_abs_diff_eq!(x[imin], 0.3, epsilon = 0.01);

        // the identity with the plain total holds per spin channel
        let (atoms, kpts, orbitals) = all();
        let (_, pdos) = proj.projected_dos(&atoms, &kpts, &orbitals).unwrap();
        for ispin in 0 .. 2 {
            for i in 0 .. x.len() {
                let t = total[(ispin, i)];
                assert_abs_diff_eq!(pdos[(ispin, i)], t, epsilon = 1e-9 * t.abs().max(1.0));
            }
        }
    }

    #[test]
    fn test_setters_invalidate_dos_cache() {
        let mut proj = sample();
        let (x1, t1) = proj.total_dos().unwrap();

        proj.set_npoints(x1.len() + 10).unwrap();
        let (x2, _) = proj.total_dos().unwrap();
        assert_eq!(x2.len(), x1.len() + 10);

        proj.set_npoints(x1.len()).unwrap();
        proj.set_sigma(proj.sigma() * 4.0).unwrap();
        let (_, t3) = proj.total_dos().unwrap();
        assert!(t1.iter().zip(t3.iter()).any(|(a, b)| (a - b).abs() > 1e-9));

        assert!(proj.set_sigma(0.0).is_err());
        assert!(proj.set_npoints(1).is_err());
    }

    #[test]
    fn test_weight_override_and_restore() {
        let mut proj = sample();
        let baseline = proj.kpoint_weights();
        let (_, t0) = proj.total_dos().unwrap();

        proj.set_kpoint_weights(baseline.clone() * 2.0).unwrap();
        let (_, t1) = proj.total_dos().unwrap();
        for (a, b) in t0.iter().zip(t1.iter()) {
            assert_abs_diff_eq!(2.0 * a, *b, epsilon = 1e-12);
        }

        proj.restore_kpoint_weights();
        assert_eq!(proj.kpoint_weights(), baseline);
        let (_, t2) = proj.total_dos().unwrap();
        for (a, b) in t0.iter().zip(t2.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
        }

        let bad = Matrix::from_shape_vec((2, 1), vec![1.0, 1.0]).unwrap();
        assert!(proj.set_kpoint_weights(bad).is_err());
    }

    #[test]
    fn test_kpath_requires_basis_and_segment_length() {
        let mut proj = sample();
        assert!(proj.kpath(None, Some(2)).is_err());
        assert!(proj.kpath(Some(&EYE), None).is_err());

        let (path, bounds) = proj.kpath(Some(&EYE), Some(2)).unwrap();
        assert_eq!(path.len(), 2);
        assert_eq!(bounds.len(), 2);
        assert_abs_diff_eq!(path[1], 0.5, epsilon = 1e-12);

        // cached pair is reused, a different pair recomputes
        let (again, _) = proj.kpath(Some(&EYE), Some(2)).unwrap();
        assert_eq!(path, again);
        let (halved, _) = proj.kpath(Some(&[[2.0, 0.0, 0.0],
                                            [0.0, 2.0, 0.0],
                                            [0.0, 0.0, 2.0]]), Some(2)).unwrap();
        assert_abs_diff_eq!(halved[1], 0.25, epsilon = 1e-12);
    }

    #[test]
    fn test_band_structure_query() {
        let mut proj = sample();
        let (atoms, _, _) = all();
        let s_only = OrbitalSelector::Set(vec!["s".into()]);

        let bs = proj.band_structure(&atoms, &s_only, Some(&EYE), Some(2)).unwrap();
        assert_eq!(bs.kpath.len(), 2);
        assert_eq!(bs.eigvals.dim(), (1, 2, 2));
        assert_eq!(bs.weights.dim(), (1, 2, 2));
        assert_abs_diff_eq!(bs.weights[(0, 0, 0)], 0.600, epsilon = 1e-12);
        assert_abs_diff_eq!(bs.weights[(0, 1, 1)], 0.300, epsilon = 1e-12);
    }

    #[test]
    fn test_raw_accessors_return_copies() {
        let proj = sample();
        let mut eig = proj.eigenvalues();
        eig[(0, 0, 0)] = 42.0;
        assert_eq!(proj.eigenvalues()[(0, 0, 0)], -1.0);

        assert_eq!(proj.projections().shape(), &[1, 2, 2, 1, 3]);
        assert_eq!(proj.kpoint_vectors().shape(), &[2, 3]);
        assert_eq!(proj.channels().to_vec(), vec!["s", "py", "pz"]);
    }
}
