use std::fs;
use std::path::Path;

use anyhow::{
    bail,
    Context,
};

use crate::types::{
    mat33_det,
    Mat33,
    Result,
};


/// Structural file collaborator. Only the lattice block is parsed here; the
/// engine needs nothing beyond the 3x3 basis matrix.
pub struct Poscar {
    pub comment: String,
    pub scale:   f64,
    pub cell:    Mat33<f64>,
}


impl Poscar {
    pub fn from_file(path: &(impl AsRef<Path> + ?Sized)) -> Result<Self> {
        let context = fs::read_to_string(path.as_ref())
            .with_context(|| format!("[POSCAR]: Failed to read {:?}", path.as_ref()))?;
        Self::from_str(&context)
    }

    pub fn from_str(context: &str) -> Result<Self> {
        let lines = context.lines().collect::<Vec<&str>>();
        if lines.len() < 5 {
            bail!("[POSCAR]: File too short, expected comment, scale and three lattice vectors");
        }

        let comment = lines[0].trim().to_string();
        let scale = lines[1].trim()
            .split_whitespace()
            .next()
            .context("[POSCAR]: Missing scale line")?
            .parse::<f64>()
            .with_context(|| format!("[POSCAR]: Invalid scale factor in {:?}", lines[1]))?;

        let mut cell = [[0.0f64; 3]; 3];
        for (i, row) in cell.iter_mut().enumerate() {
            let v = lines[2 + i]
                .split_whitespace()
                .map(|x| x.parse::<f64>()
                     .with_context(|| format!("[POSCAR]: Invalid lattice vector line {:?}", lines[2 + i])))
                .collect::<Result<Vec<f64>>>()?;
            if v.len() != 3 {
                bail!("[POSCAR]: Lattice vector line {:?} should hold three components", lines[2 + i]);
            }
            row.copy_from_slice(&v);
        }

        // A negative scale is the target cell volume.
        let factor = if scale >= 0.0 {
            scale
        } else {
            (-scale / mat33_det(&cell).abs()).cbrt()
        };
        for row in cell.iter_mut() {
            for x in row.iter_mut() {
                *x *= factor;
            }
        }

        Ok(Self { comment, scale, cell })
    }
}
