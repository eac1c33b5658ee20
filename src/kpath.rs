use anyhow::bail;

use crate::types::{
    mat33_inv,
    Mat33,
    Matrix,
    Result,
    Vector,
};


/// Cumulative path-length coordinate for a band-structure path made of
/// straight segments of `nkseg` k-points each.
///
/// Every segment is shifted to its own first point before distances are
/// taken, so the jump between the end of one segment and the start of the
/// next never counts as displacement. Fractional vectors are mapped to
/// path-length units through the inverse-transpose of the basis. Returns the
/// per-k-point path array and the `nsec + 1` segment boundary positions.
pub fn kpath(kvecs: &Matrix<f64>, cell: &Mat33<f64>, nkseg: usize) -> Result<(Vector<f64>, Vector<f64>)> {
    let nkpts = kvecs.shape()[0];

    if nkseg == 0 {
        bail!("[KPATH]: Segment length must be a positive integer");
    }
    if nkpts == 0 || nkpts % nkseg != 0 {
        bail!("[KPATH]: {} k-points cannot be split into segments of {}", nkpts, nkseg);
    }
    let nsec = nkpts / nkseg;
    let inv = mat33_inv(cell)?;

    let mut path = Vector::<f64>::zeros(nkpts);
    for isec in 0 .. nsec {
        let s0 = isec * nkseg;
        let origin = [kvecs[(s0, 0)], kvecs[(s0, 1)], kvecs[(s0, 2)]];

        for ik in s0 .. s0 + nkseg {
            let v = [kvecs[(ik, 0)] - origin[0],
                     kvecs[(ik, 1)] - origin[1],
                     kvecs[(ik, 2)] - origin[2]];

            // v * inv(cell)^T
            let mut r = [0.0f64; 3];
            for j in 0 .. 3 {
                for i in 0 .. 3 {
                    r[j] += v[i] * inv[j][i];
                }
            }
            path[ik] = (r[0] * r[0] + r[1] * r[1] + r[2] * r[2]).sqrt();
        }
    }

    // chain the segments into one monotone coordinate
    for isec in 1 .. nsec {
        let offset = path[isec * nkseg - 1];
        for ik in isec * nkseg .. (isec + 1) * nkseg {
            path[ik] += offset;
        }
    }

    let mut boundaries = Vector::<f64>::zeros(nsec + 1);
    for isec in 0 .. nsec {
        boundaries[isec] = path[isec * nkseg];
    }
    boundaries[nsec] = path[nkpts - 1];

    Ok((path, boundaries))
}


#[cfg(test)]
mod tests {
    use super::*;

    const EYE: Mat33<f64> = [[1.0, 0.0, 0.0],
                             [0.0, 1.0, 0.0],
                             [0.0, 0.0, 1.0]];

    fn sample_kvecs() -> Matrix<f64> {
        // G -> X then X -> M, three points per straight segment
        Matrix::from_shape_vec((6, 3), vec![
            0.00, 0.0, 0.0,
            0.25, 0.0, 0.0,
            0.50, 0.0, 0.0,
            0.50, 0.00, 0.0,
            0.50, 0.25, 0.0,
            0.50, 0.50, 0.0,
        ]).unwrap()
    }

    #[test]
    fn test_two_segment_path() {
        let (path, bounds) = kpath(&sample_kvecs(), &EYE, 3).unwrap();

        let expect = [0.0, 0.25, 0.5, 0.5, 0.75, 1.0];
        for (x, e) in path.iter().zip(expect.iter()) {
            assert!((x - e).abs() < 1e-12);
        }

        assert_eq!(bounds.len(), 3);
        assert!((bounds[0] - 0.0).abs() < 1e-12);
        assert!((bounds[1] - 0.5).abs() < 1e-12);
        assert!((bounds[2] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_discontinuous_segments_do_not_jump() {
        // second segment starts far away from the first one's end
        let kvecs = Matrix::from_shape_vec((4, 3), vec![
            0.0, 0.0, 0.0,
            0.1, 0.0, 0.0,
            0.0, 0.0, 0.5,
            0.0, 0.2, 0.5,
        ]).unwrap();
        let (path, bounds) = kpath(&kvecs, &EYE, 2).unwrap();

        // segment 2 opens exactly at segment 1's accumulated end
        assert!((path[2] - path[1]).abs() < 1e-12);
        assert!((path[3] - 0.3).abs() < 1e-12);
        assert!((bounds[1] - path[2]).abs() < 1e-12);
    }

    #[test]
    fn test_monotone_non_decreasing() {
        let (path, _) = kpath(&sample_kvecs(), &EYE, 3).unwrap();
        for w in path.as_slice().unwrap().windows(2) {
            assert!(w[1] >= w[0]);
        }
    }

    #[test]
    fn test_basis_scaling() {
        // doubling the real-space cell halves reciprocal distances
        let cell = [[2.0, 0.0, 0.0],
                    [0.0, 2.0, 0.0],
                    [0.0, 0.0, 2.0]];
        let (path, _) = kpath(&sample_kvecs(), &cell, 3).unwrap();
        assert!((path[5] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_segmentation() {
        assert!(kpath(&sample_kvecs(), &EYE, 0).is_err());
        assert!(kpath(&sample_kvecs(), &EYE, 4).is_err());
    }

    #[test]
    fn test_singular_basis() {
        let cell = [[1.0, 0.0, 0.0],
                    [2.0, 0.0, 0.0],
                    [0.0, 0.0, 1.0]];
        assert!(kpath(&sample_kvecs(), &cell, 3).is_err());
    }
}
