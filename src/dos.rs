use std::f64::consts::PI;

use anyhow::bail;
use itertools::izip;
use ndarray::{
    s,
    Array4,
    Axis,
};

use crate::types::{
    Cube,
    Matrix,
    Result,
    Vector,
};


pub const DEFAULT_SIGMA:   f64   = 0.05;
pub const DEFAULT_NPOINTS: usize = 3000;

/// Fraction of the eigenvalue range padded onto each end of the energy axis.
const EDGE_PAD: f64 = 0.05;


pub fn energy_grid(eigvals: &Cube<f64>, npoints: usize) -> Result<Vector<f64>> {
    if npoints < 2 {
        bail!("[DOS]: Energy grid needs at least two points, got {}", npoints);
    }

    let emin = eigvals.iter().copied().fold(f64::INFINITY, f64::min);
    let emax = eigvals.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let pad = (emax - emin) * EDGE_PAD;

    Ok(Vector::linspace(emin - pad, emax + pad, npoints))
}


/// Continuous-density Gaussian kernel, `exp(-(x-x0)^2 / 2s^2) / (s sqrt(2pi))`.
pub fn gaussian(x: &Vector<f64>, center: f64, sigma: f64) -> Vector<f64> {
    let norm = 1.0 / (sigma * (2.0 * PI).sqrt());
    x.mapv(|e| (-(e - center).powi(2) / (2.0 * sigma * sigma)).exp() * norm)
}


/// Broadened DOS contribution of every `(ispin, ikpoint, iband)` entry on a
/// shared energy axis.
///
/// Each contribution carries its k-point weight and the spin sign: spin
/// channel 0 is positive, channel 1 negative, so stacked plots put the two
/// channels in opposite half-planes. The sign is a plotting convention, not a
/// physical scaling.
pub fn perband_dos(eigvals: &Cube<f64>, weights: &Matrix<f64>, sigma: f64, npoints: usize)
    -> Result<(Vector<f64>, Array4<f64>)>
{
    if sigma <= 0.0 {
        bail!("[DOS]: Broadening width must be positive, got {}", sigma);
    }
    let (nspin, nkpts, nbands) = eigvals.dim();
    if weights.dim() != (nspin, nkpts) {
        bail!("[DOS]: K-point weights shaped {:?}, expected ({}, {})", weights.dim(), nspin, nkpts);
    }

    let x = energy_grid(eigvals, npoints)?;
    let mut tdos = Array4::<f64>::zeros((nspin, nkpts, nbands, npoints));

    for (ispin, (eigs_kb, ws_k)) in izip!(eigvals.outer_iter(), weights.outer_iter()).enumerate() {
        let sign = if ispin == 1 { -1.0 } else { 1.0 };
        for (ikpt, (eigs_b, w)) in izip!(eigs_kb.outer_iter(), ws_k.iter()).enumerate() {
            for (iband, e) in eigs_b.iter().enumerate() {
                tdos.slice_mut(s![ispin, ikpt, iband, ..])
                    .assign(&(gaussian(&x, *e, sigma) * (sign * w)));
            }
        }
    }

    Ok((x, tdos))
}


/// Sum the per-band contributions over k-points and bands, per spin channel.
pub fn total_dos(perband: &Array4<f64>) -> Matrix<f64> {
    perband.sum_axis(Axis(2)).sum_axis(Axis(1))
}
