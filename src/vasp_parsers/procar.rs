use std::fs;
use std::path::Path;

use anyhow::{
    bail,
    Context,
};
use log::info;
use ndarray::{
    Array5,
    Array6,
    Axis,
};
use regex::Regex;

use crate::types::{
    Cube,
    Matrix,
    Result,
};
use crate::selection::ORBITALS;


/// Parsed PROCAR-like projection file.
///
/// All tensors are immutable after parse; consumers that need to mutate
/// (e.g. k-point weight overrides) must copy first.
#[derive(Clone)]
pub struct Procar {
    pub nspin:       usize,
    pub nkpts:       usize,
    pub nbands:      usize,
    pub nions:       usize,
    pub lsorbit:     bool,
    pub nlm:         Vec<String>,
    pub projections: Array5<f64>,   // [ispin, ikpoint, iband, iion, ichannel]
    pub eigvals:     Cube<f64>,     // [ispin, ikpoint, iband]
    pub weights:     Matrix<f64>,   // [ispin, ikpoint]
    pub kvecs:       Matrix<f64>,   // [ikpoint, 3], fractional
}


/// Number of spin channels implied by the flat projection-row count.
///
/// The file never declares `nspin`; it is the only free factor left once
/// `nkpts`, `nbands`, `nions` and the spinor replication are fixed.
pub fn infer_nspin(nrows: usize, nkpts: usize, nbands: usize, nions: usize, lsorbit: bool) -> Result<usize> {
    let spinor = if lsorbit { 4 } else { 1 };
    let chunk = nkpts * nbands * nions * spinor;

    if chunk == 0 {
        bail!("[PROCAR]: Header dimensions nkpts={} nbands={} nions={} contain zero", nkpts, nbands, nions);
    }
    if nrows == 0 || nrows % chunk != 0 {
        bail!("[PROCAR]: {} projection rows not divisible by nkpts*nbands*nions{} = {}, \
               cannot infer spin channels",
              nrows, if lsorbit { "*4" } else { "" }, chunk);
    }
    Ok(nrows / chunk)
}


impl Procar {
    pub fn from_file(path: &(impl AsRef<Path> + ?Sized), lsorbit: bool) -> Result<Self> {
        let context = fs::read_to_string(path.as_ref())
            .with_context(|| format!("[PROCAR]: Failed to read {:?}", path.as_ref()))?;
        Self::from_str(&context, lsorbit)
    }

    pub fn from_str(context: &str, lsorbit: bool) -> Result<Self> {
        let lines = context.lines()
            .filter(|l| !l.trim().is_empty())
            .collect::<Vec<&str>>();
        if lines.len() < 2 {
            bail!("[PROCAR]: File too short, no header line found");
        }

        let (nkpts, nbands, nions) = Self::parse_header(lines[1])?;

        let mut flat       = Vec::<f64>::new();
        let mut nrows      = 0usize;
        let mut rowwidth   = 0usize;
        let mut weights    = Vec::<f64>::new();
        let mut kvec_flat  = Vec::<f64>::new();
        let mut eigvals    = Vec::<f64>::new();

        for line in &lines {
            let tokens = line.split_whitespace().collect::<Vec<&str>>();

            if line.contains("weight") {
                if tokens.len() < 7 {
                    bail!("[PROCAR]: Malformed k-point line: {:?}", line);
                }
                weights.push(Self::parse_token(tokens[tokens.len() - 1], line)?);
                for t in &tokens[tokens.len() - 6 .. tokens.len() - 3] {
                    kvec_flat.push(Self::parse_token(t, line)?);
                }
            } else if line.contains("occ.") {
                if tokens.len() < 4 {
                    bail!("[PROCAR]: Malformed band line: {:?}", line);
                }
                eigvals.push(Self::parse_token(tokens[tokens.len() - 4], line)?);
            } else if !line.bytes().any(|b| b.is_ascii_alphabetic()) {
                // index + channel magnitudes + total
                if tokens.len() < 3 {
                    bail!("[PROCAR]: Malformed projection line: {:?}", line);
                }
                if nrows == 0 {
                    rowwidth = tokens.len();
                } else if tokens.len() != rowwidth {
                    bail!("[PROCAR]: Inconsistent projection line width: expected {} tokens, got {} in {:?}",
                          rowwidth, tokens.len(), line);
                }
                for t in &tokens[1 .. tokens.len() - 1] {
                    flat.push(Self::parse_token(t, line)?);
                }
                nrows += 1;
            }
        }

        let nlmax = rowwidth.saturating_sub(2);
        if nlmax > ORBITALS.len() {
            bail!("[PROCAR]: {} orbital channels found, at most {} supported", nlmax, ORBITALS.len());
        }
        let nlm = ORBITALS[.. nlmax].iter().map(|x| x.to_string()).collect::<Vec<String>>();

        let nspin = infer_nspin(nrows, nkpts, nbands, nions, lsorbit)?;

        if weights.len() != nspin * nkpts {
            bail!("[PROCAR]: {} k-point weight records found, expected nspin*nkpts = {}",
                  weights.len(), nspin * nkpts);
        }
        if eigvals.len() != nspin * nkpts * nbands {
            bail!("[PROCAR]: {} band energy records found, expected nspin*nkpts*nbands = {}",
                  eigvals.len(), nspin * nkpts * nbands);
        }

        // Only the scalar spinor component survives in SOC mode.
        let projections = if lsorbit {
            Array6::from_shape_vec((nspin, nkpts, nbands, 4, nions, nlmax), flat)?
                .index_axis(Axis(3), 0)
                .to_owned()
        } else {
            Array5::from_shape_vec((nspin, nkpts, nbands, nions, nlmax), flat)?
        };

        let eigvals = Cube::from_shape_vec((nspin, nkpts, nbands), eigvals)?;
        let weights = Matrix::from_shape_vec((nspin, nkpts), weights)?;
        let kvecs   = Matrix::from_shape_vec((nspin * nkpts, 3), kvec_flat)?
            .slice_move(ndarray::s![.. nkpts, ..]);

        info!("[PROCAR]: Parsed nspin={} nkpts={} nbands={} nions={} channels={:?} lsorbit={}",
              nspin, nkpts, nbands, nions, &nlm, lsorbit);

        Ok(Self {
            nspin,
            nkpts,
            nbands,
            nions,
            lsorbit,
            nlm,
            projections,
            eigvals,
            weights,
            kvecs,
        })
    }

    /// Second line carries `nkpts nbands nions`, possibly packed against
    /// punctuation, hence digit-run extraction instead of token splitting.
    fn parse_header(line: &str) -> Result<(usize, usize, usize)> {
        let ints = Regex::new(r"\d+").unwrap()
            .find_iter(line)
            .map(|m| m.as_str().parse::<usize>()
                 .with_context(|| format!("[PROCAR]: Invalid integer in header line {:?}", line)))
            .collect::<Result<Vec<usize>>>()?;

        if ints.len() != 3 {
            bail!("[PROCAR]: Header line {:?} should contain exactly three integers \
                   (nkpts, nbands, nions), got {:?}", line, ints);
        }
        Ok((ints[0], ints[1], ints[2]))
    }

    fn parse_token(token: &str, line: &str) -> Result<f64> {
        token.parse::<f64>()
            .with_context(|| format!("[PROCAR]: Invalid number {:?} in line {:?}", token, line))
    }
}
