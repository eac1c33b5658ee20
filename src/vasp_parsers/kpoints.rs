use std::fs;
use std::path::Path;

use anyhow::{
    bail,
    Context,
};

use crate::types::Result;


/// Path-segmentation file collaborator. Only line-mode files are meaningful
/// here: the third line starts with `L` and the second line gives the number
/// of k-points per straight segment.
pub struct Kpoints {
    pub comment:         String,
    pub nkpts_per_segment: usize,
}


impl Kpoints {
    pub fn from_file(path: &(impl AsRef<Path> + ?Sized)) -> Result<Self> {
        let context = fs::read_to_string(path.as_ref())
            .with_context(|| format!("[KPOINTS]: Failed to read {:?}", path.as_ref()))?;
        Self::from_str(&context)
    }

    pub fn from_str(context: &str) -> Result<Self> {
        let lines = context.lines().collect::<Vec<&str>>();
        if lines.len() < 3 {
            bail!("[KPOINTS]: File too short, expected at least three lines");
        }

        if !lines[2].trim_start().starts_with(|c: char| c.eq_ignore_ascii_case(&'L')) {
            bail!("[KPOINTS]: Not a line-mode file, third line {:?} should start with `L`", lines[2]);
        }

        let nkpts_per_segment = lines[1].trim()
            .split_whitespace()
            .next()
            .context("[KPOINTS]: Missing segment length line")?
            .parse::<usize>()
            .with_context(|| format!("[KPOINTS]: Invalid segment length in {:?}", lines[1]))?;
        if nkpts_per_segment == 0 {
            bail!("[KPOINTS]: Segment length must be positive");
        }

        Ok(Self {
            comment: lines[0].trim().to_string(),
            nkpts_per_segment,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line_mode() {
        let input = r#"K-Path Generated by VASPKIT.
   40
Line-Mode
Reciprocal
   0.0  0.0  0.0   GAMMA
   0.5  0.0  0.5   X
"#;
        let kpoints = Kpoints::from_str(input).unwrap();
        assert_eq!(kpoints.nkpts_per_segment, 40);

        let lower = input.replace("Line-Mode", "line mode");
        assert_eq!(Kpoints::from_str(&lower).unwrap().nkpts_per_segment, 40);
    }

    #[test]
    fn test_reject_non_line_mode() {
        let input = "Automatic mesh\n 0\nGamma\n 4 4 4\n";
        assert!(Kpoints::from_str(input).is_err());
    }

    #[test]
    fn test_bad_segment_length() {
        assert!(Kpoints::from_str("c\n zero\nLine\n").is_err());
        assert!(Kpoints::from_str("c\n 0\nLine\n").is_err());
        assert!(Kpoints::from_str("c\n 40\n").is_err());
    }
}
