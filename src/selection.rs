use anyhow::{
    bail,
    Context,
};

use crate::types::Result;


/// Canonical orbital-channel labels, in the order the projection file emits them.
pub const ORBITALS: [&str; 9] = ["s", "py", "pz", "px", "dxy", "dyz", "dz2", "dxz", "dx2"];


pub fn orbital_index(label: &str) -> Result<usize> {
    ORBITALS.iter()
        .position(|x| *x == label)
        .with_context(|| format!("[SELECT]: Orbital {:?} not available in {:?}", label, &ORBITALS))
}


/// Axis selector for atoms and k-points.
///
/// A bare index keeps the axis-collapsing semantics of scalar indexing and is
/// never wrapped into a one-element set; `Set` and `Range` select without
/// changing rank.
#[derive(Debug, Clone)]
pub enum Selector {
    Single(usize),
    Set(Vec<usize>),
    Range(String),
}


#[derive(Debug, Clone)]
pub enum OrbitalKey {
    Index(usize),
    Label(String),
}

impl From<usize> for OrbitalKey {
    fn from(i: usize) -> Self { OrbitalKey::Index(i) }
}

impl From<&str> for OrbitalKey {
    fn from(s: &str) -> Self { OrbitalKey::Label(s.to_string()) }
}


/// Orbital-channel selector. Sets may mix channel indices and canonical labels.
#[derive(Debug, Clone)]
pub enum OrbitalSelector {
    Single(usize),
    Set(Vec<OrbitalKey>),
    Range(String),
}


/// A selector resolved against a concrete axis length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    Scalar(usize),
    Indices(Vec<usize>),
}

impl Resolved {
    pub fn indices(&self) -> Vec<usize> {
        match self {
            Resolved::Scalar(i)   => vec![*i],
            Resolved::Indices(v)  => v.clone(),
        }
    }

    /// Order-independent check against the full `0 .. len` index set.
    pub fn is_full(&self, len: usize) -> bool {
        match self {
            Resolved::Scalar(_)  => len == 1,
            Resolved::Indices(v) => v.len() == len && v.iter().copied().eq(0 .. len),
        }
    }
}


/// `start:stop:step` range descriptor with Python slice semantics.
///
/// Any component may be omitted; omitted components are open on that side.
/// Negative components count from the tail, negative steps iterate backward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeStr {
    start: Option<i64>,
    stop:  Option<i64>,
    step:  Option<i64>,
}

impl RangeStr {
    pub fn parse(input: &str) -> Result<Self> {
        if !input.contains(':') {
            bail!("[SELECT]: Invalid range string {:?}, expected `start:stop:step`", input);
        }

        let fields = input.split(':').collect::<Vec<_>>();
        if fields.len() > 3 {
            bail!("[SELECT]: Invalid range string {:?}, too many `:`", input);
        }

        let parse_field = |f: &str| -> Result<Option<i64>> {
            let f = f.trim();
            if f.is_empty() {
                Ok(None)
            } else {
                f.parse::<i64>()
                    .map(Some)
                    .with_context(|| format!("[SELECT]: Invalid range component {:?} in {:?}", f, input))
            }
        };

        Ok(Self {
            start: parse_field(fields[0])?,
            stop:  parse_field(fields[1])?,
            step:  fields.get(2).map(|f| parse_field(f)).transpose()?.flatten(),
        })
    }

    pub fn indices(&self, len: usize) -> Result<Vec<usize>> {
        let n = len as i64;
        let step = self.step.unwrap_or(1);
        if step == 0 {
            bail!("[SELECT]: Range step cannot be zero");
        }

        let wrap = |v: i64| if v < 0 { v + n } else { v };

        let (start, stop) = if step > 0 {
            let start = wrap(self.start.unwrap_or(0)).max(0).min(n);
            let stop  = wrap(self.stop.unwrap_or(n)).max(0).min(n);
            (start, stop)
        } else {
            let start = wrap(self.start.unwrap_or(n - 1)).max(-1).min(n - 1);
            let stop  = match self.stop {
                Some(v) => wrap(v).max(-1).min(n - 1),
                None    => -1,
            };
            (start, stop)
        };

        let mut ret = Vec::new();
        let mut i = start;
        while (step > 0 && i < stop) || (step < 0 && i > stop) {
            ret.push(i as usize);
            i += step;
        }
        Ok(ret)
    }
}


fn checked_indices(mut v: Vec<usize>, len: usize, what: &str) -> Result<Vec<usize>> {
    v.sort();
    v.dedup();

    if v.is_empty() {
        bail!("[SELECT]: No {} selected.", what);
    }
    if let Some(&bad) = v.iter().find(|&&i| i >= len) {
        bail!("[SELECT]: {} index {} out of bounds, only {} available", what, bad, len);
    }
    Ok(v)
}


/// Resolve an atom or k-point selector against the axis length.
///
/// Set and range selections come back sorted and deduplicated; the order of a
/// set selector carries no meaning since every consumer reduces by summation.
pub fn resolve(sel: &Selector, len: usize, what: &str) -> Result<Resolved> {
    match sel {
        Selector::Single(i) => {
            if *i >= len {
                bail!("[SELECT]: {} index {} out of bounds, only {} available", what, i, len);
            }
            Ok(Resolved::Scalar(*i))
        },
        Selector::Set(v) => {
            Ok(Resolved::Indices(checked_indices(v.clone(), len, what)?))
        },
        Selector::Range(s) => {
            let v = RangeStr::parse(s)?.indices(len)?;
            Ok(Resolved::Indices(checked_indices(v, len, what)?))
        },
    }
}


/// Resolve an orbital selector; labels go through the fixed orbital table.
pub fn resolve_orbitals(sel: &OrbitalSelector, nchannels: usize) -> Result<Resolved> {
    match sel {
        OrbitalSelector::Single(i) => {
            resolve(&Selector::Single(*i), nchannels, "orbitals")
        },
        OrbitalSelector::Set(keys) => {
            let v = keys.iter()
                .map(|k| match k {
                    OrbitalKey::Index(i)   => Ok(*i),
                    OrbitalKey::Label(lbl) => orbital_index(lbl),
                })
                .collect::<Result<Vec<usize>>>()?;
            Ok(Resolved::Indices(checked_indices(v, nchannels, "orbitals")?))
        },
        OrbitalSelector::Range(s) => {
            resolve(&Selector::Range(s.clone()), nchannels, "orbitals")
        },
    }
}
